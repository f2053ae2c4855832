//! Chunked secret import and export
//!
//! Secrets can be larger than a single command, so both directions run as a
//! small state machine spread over several commands (`INIT`, `PROCESS`,
//! `FINALIZE`). The device holds a single [`TransferLock`] for the duration;
//! anything else that arrives in between aborts the transfer.
//!
//! # Transport Modes
//!
//! - **Plain**: the payload crosses the host channel as plaintext. Exports
//!   are signed by the device identity over `auth_header | plaintext`.
//! - **Secure peer**: the payload is re-encrypted for another device whose
//!   public key is stored as a [`SecretType::PublicKey`](crate::record::SecretType)
//!   record. Keys come from ECDH between the identity key and that public key
//!   with the `"seckey"`/`"secmac"` contexts, and the payload is authenticated
//!   with `HMAC-SHA1(mac_key, SHA-256(auth_header | ciphertext))`.
//!
//! In both modes the label is outside the authenticated data, so a secret may
//! be relabelled in transit.

use std::convert::TryFrom;

use crate::crypto::{
    KeyError, PublicKey, SecretError, SecretKey, SessionError, SessionKeys, PEER_CHANNEL_CONTEXT,
};
use crate::error::ErrorKind;
use crate::record::CodecError;

mod export;
mod import;

pub use export::{ExportChunk, ExportRequest, ExportSession};
pub use import::{ImportRequest, ImportSession};

/// Largest slice of at-rest ciphertext handed out per export step
pub const CHUNK_SIZE: usize = 128;
/// Size of the `len` prefix in front of every chunk
pub const CHUNK_LEN_SIZE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid transport mode {0:#04x}")]
    InvalidMode(u8),
    #[error("invalid transfer phase {0:#04x}")]
    InvalidPhase(u8),
    #[error("malformed transfer data: {0}")]
    Malformed(&'static str),
    #[error("export refused by the record policy")]
    PolicyViolation,
    #[error("record of {size} bytes exceeds the maximum of {max}")]
    DataTooLong { size: usize, max: usize },
    #[error("secure import mac mismatch")]
    WrongMac,
    #[error("secure import padding is invalid")]
    BadPadding,
    #[error("object {0} not found")]
    NotFound(u16),
    #[error("no matching transfer in progress")]
    NoLock,
    #[error("record codec: {0}")]
    Codec(#[from] CodecError),
    #[error("at-rest encryption: {0}")]
    Secret(#[from] SecretError),
    #[error("session: {0}")]
    Session(SessionError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
}

impl From<SessionError> for TransferError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::WrongMac => TransferError::WrongMac,
            SessionError::Unaligned(_) => TransferError::Malformed("ciphertext not block aligned"),
            other => TransferError::Session(other),
        }
    }
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidMode(_)
            | TransferError::InvalidPhase(_)
            | TransferError::Malformed(_) => ErrorKind::Protocol,
            TransferError::PolicyViolation => ErrorKind::Policy,
            TransferError::DataTooLong { .. } => ErrorKind::Resource,
            TransferError::WrongMac | TransferError::BadPadding => ErrorKind::Integrity,
            TransferError::NotFound(_) => ErrorKind::NotFound,
            TransferError::NoLock => ErrorKind::Lock,
            TransferError::Codec(e) => e.kind(),
            TransferError::Default(_)
            | TransferError::Secret(_)
            | TransferError::Session(_)
            | TransferError::Key(_) => ErrorKind::Internal,
        }
    }
}

/// P1 of import and export commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportMode {
    Plain = 1,
    SecurePeer = 2,
}

impl TryFrom<u8> for TransportMode {
    type Error = TransferError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TransportMode::Plain),
            2 => Ok(TransportMode::SecurePeer),
            other => Err(TransferError::InvalidMode(other)),
        }
    }
}

/// P2 of import and export commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Init = 1,
    Process = 2,
    Finalize = 3,
}

impl TryFrom<u8> for Phase {
    type Error = TransferError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Init),
            2 => Ok(Phase::Process),
            3 => Ok(Phase::Finalize),
            other => Err(TransferError::InvalidPhase(other)),
        }
    }
}

/// The single transfer a device may have in flight
#[derive(Debug)]
pub enum TransferLock {
    Import(Box<ImportSession>),
    Export(Box<ExportSession>),
}

impl TransferLock {
    /// Abandon the transfer, clearing what it buffered
    pub fn abort(mut self) {
        match &mut self {
            TransferLock::Import(session) => session.wipe(),
            TransferLock::Export(session) => session.wipe(),
        }
    }

    /// Object ids to report in the audit log: `(secret, counterpart key)`
    pub fn log_ids(&self) -> (Option<u16>, Option<u16>) {
        match self {
            TransferLock::Import(session) => (None, session.pubkey_id()),
            TransferLock::Export(session) => (Some(session.id()), session.pubkey_id()),
        }
    }
}

/// Session keys shared with another device
pub fn peer_session_keys(
    identity: &SecretKey,
    counterpart: &PublicKey,
) -> Result<SessionKeys, TransferError> {
    Ok(SessionKeys::agree(identity, counterpart, &PEER_CHANNEL_CONTEXT)?)
}

/// Split `len(2) | chunk(len)` off the front of `data`
pub(crate) fn split_chunk(data: &[u8]) -> Result<(&[u8], &[u8]), TransferError> {
    if data.len() < CHUNK_LEN_SIZE {
        return Err(TransferError::Malformed("missing chunk length"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let end = CHUNK_LEN_SIZE + len;
    if data.len() < end {
        return Err(TransferError::Malformed("chunk shorter than its length"));
    }
    Ok((&data[CHUNK_LEN_SIZE..end], &data[end..]))
}
