use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::crypto::{SecretError, FINGERPRINT_SIZE};
use crate::error::ErrorKind;

/// Encoded header size, label length byte included
pub const HEADER_SIZE: usize = 13;
/// The part of the header covered by transfer authentication
pub const AUTH_HEADER_SIZE: usize = 12;
pub const MAX_LABEL_SIZE: usize = 127;

pub const OFFSET_TYPE: usize = 0;
pub const OFFSET_ORIGIN: usize = 1;
pub const OFFSET_EXPORT_POLICY: usize = 2;
pub const OFFSET_NB_EXPORT_PLAIN: usize = 3;
pub const OFFSET_NB_EXPORT_SECURE: usize = 4;
pub const OFFSET_NB_EXPORT_PUBKEY: usize = 5;
pub const OFFSET_FINGERPRINT: usize = 6;
pub const OFFSET_RFU1: usize = 10;
pub const OFFSET_RFU2: usize = 11;
pub const OFFSET_LABEL_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("label of {0} bytes exceeds the maximum of {MAX_LABEL_SIZE}")]
    LabelTooLong(usize),
    #[error("unknown secret type {0:#04x}")]
    UnknownType(u8),
    #[error("unknown origin {0:#04x}")]
    UnknownOrigin(u8),
    #[error("unknown export policy {0:#04x}")]
    UnknownPolicy(u8),
    #[error("truncated record: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("invalid secret size {0}")]
    InvalidSize(usize),
    #[error("record is not a public key")]
    NotPublicKey,
    #[error("invalid public key body")]
    InvalidPublicKey,
    #[error("stored payload: {0}")]
    Storage(#[from] SecretError),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Default(_) | CodecError::Storage(_) => ErrorKind::Internal,
            _ => ErrorKind::Protocol,
        }
    }
}

/// What kind of secret a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecretType {
    MasterSeed = 0x10,
    EncryptedMasterSeed = 0x20,
    Bip39Mnemonic = 0x30,
    ElectrumMnemonic = 0x40,
    ShamirShare = 0x50,
    PrivateKey = 0x60,
    PublicKey = 0x70,
    SymmetricKey = 0x80,
    Password = 0x90,
    Certificate = 0xA0,
    TwoFactorSecret = 0xB0,
}

impl TryFrom<u8> for SecretType {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x10 => SecretType::MasterSeed,
            0x20 => SecretType::EncryptedMasterSeed,
            0x30 => SecretType::Bip39Mnemonic,
            0x40 => SecretType::ElectrumMnemonic,
            0x50 => SecretType::ShamirShare,
            0x60 => SecretType::PrivateKey,
            0x70 => SecretType::PublicKey,
            0x80 => SecretType::SymmetricKey,
            0x90 => SecretType::Password,
            0xA0 => SecretType::Certificate,
            0xB0 => SecretType::TwoFactorSecret,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

impl std::fmt::Display for SecretType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SecretType::MasterSeed => "master-seed",
            SecretType::EncryptedMasterSeed => "encrypted-master-seed",
            SecretType::Bip39Mnemonic => "bip39-mnemonic",
            SecretType::ElectrumMnemonic => "electrum-mnemonic",
            SecretType::ShamirShare => "shamir-share",
            SecretType::PrivateKey => "private-key",
            SecretType::PublicKey => "public-key",
            SecretType::SymmetricKey => "symmetric-key",
            SecretType::Password => "password",
            SecretType::Certificate => "certificate",
            SecretType::TwoFactorSecret => "2fa-secret",
        };
        f.write_str(name)
    }
}

/// How a record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Origin {
    PlainImport = 1,
    SecureImport = 2,
    OnCard = 3,
}

impl TryFrom<u8> for Origin {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Origin::PlainImport),
            2 => Ok(Origin::SecureImport),
            3 => Ok(Origin::OnCard),
            other => Err(CodecError::UnknownOrigin(other)),
        }
    }
}

/// Which transports a record may leave the device through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExportPolicy {
    /// Plain or secure-peer export
    Allowed = 1,
    /// Secure-peer export only
    SecureOnly = 2,
    /// Secure-peer export only (reserved for authenticated peers)
    AuthenticatedOnly = 3,
    /// Never exported
    Forbidden = 4,
}

impl TryFrom<u8> for ExportPolicy {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ExportPolicy::Allowed),
            2 => Ok(ExportPolicy::SecureOnly),
            3 => Ok(ExportPolicy::AuthenticatedOnly),
            4 => Ok(ExportPolicy::Forbidden),
            other => Err(CodecError::UnknownPolicy(other)),
        }
    }
}

impl ExportPolicy {
    pub fn allows_plain(&self) -> bool {
        matches!(self, ExportPolicy::Allowed)
    }

    pub fn allows_secure(&self) -> bool {
        !matches!(self, ExportPolicy::Forbidden)
    }
}

/// Saturating usage counters kept in every header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCounters {
    pub plain: u8,
    pub secure: u8,
    pub pubkey: u8,
}

impl ExportCounters {
    pub fn bump_plain(&mut self) {
        self.plain = self.plain.saturating_add(1);
    }

    pub fn bump_secure(&mut self) {
        self.secure = self.secure.saturating_add(1);
    }

    pub fn bump_pubkey(&mut self) {
        self.pubkey = self.pubkey.saturating_add(1);
    }
}

/// Metadata stored in front of every secret
///
/// ```text
/// type | origin | policy | nb_plain | nb_secure | nb_pubkey | fingerprint(4) | rfu1 | rfu2 | label_len | label
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHeader {
    pub secret_type: SecretType,
    pub origin: Origin,
    pub export_policy: ExportPolicy,
    pub counters: ExportCounters,
    pub fingerprint: [u8; FINGERPRINT_SIZE],
    pub rfu1: u8,
    pub rfu2: u8,
    label: Vec<u8>,
}

impl SecretHeader {
    pub fn new(
        secret_type: SecretType,
        origin: Origin,
        export_policy: ExportPolicy,
        label: &[u8],
    ) -> Result<Self, CodecError> {
        check_label(label)?;
        Ok(SecretHeader {
            secret_type,
            origin,
            export_policy,
            counters: ExportCounters::default(),
            fingerprint: [0u8; FINGERPRINT_SIZE],
            rfu1: 0,
            rfu2: 0,
            label: label.to_vec(),
        })
    }

    pub fn label(&self) -> &[u8] {
        &self.label
    }

    pub fn set_label(&mut self, label: &[u8]) -> Result<(), CodecError> {
        check_label(label)?;
        self.label = label.to_vec();
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.label.len()
    }

    /// The 12 bytes covered by export signatures and transfer MACs
    pub fn auth_header(&self) -> [u8; AUTH_HEADER_SIZE] {
        let mut out = [0u8; AUTH_HEADER_SIZE];
        out[OFFSET_TYPE] = self.secret_type as u8;
        out[OFFSET_ORIGIN] = self.origin as u8;
        out[OFFSET_EXPORT_POLICY] = self.export_policy as u8;
        out[OFFSET_NB_EXPORT_PLAIN] = self.counters.plain;
        out[OFFSET_NB_EXPORT_SECURE] = self.counters.secure;
        out[OFFSET_NB_EXPORT_PUBKEY] = self.counters.pubkey;
        out[OFFSET_FINGERPRINT..OFFSET_FINGERPRINT + FINGERPRINT_SIZE]
            .copy_from_slice(&self.fingerprint);
        out[OFFSET_RFU1] = self.rfu1;
        out[OFFSET_RFU2] = self.rfu2;
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.auth_header());
        out.push(self.label.len() as u8);
        out.extend_from_slice(&self.label);
    }

    /// Decode a header and return it with the number of bytes consumed
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        let (raw, consumed) = RawHeader::split(bytes)?;
        let header = SecretHeader {
            secret_type: SecretType::try_from(raw.auth[OFFSET_TYPE])?,
            origin: Origin::try_from(raw.auth[OFFSET_ORIGIN])?,
            export_policy: ExportPolicy::try_from(raw.auth[OFFSET_EXPORT_POLICY])?,
            counters: ExportCounters {
                plain: raw.auth[OFFSET_NB_EXPORT_PLAIN],
                secure: raw.auth[OFFSET_NB_EXPORT_SECURE],
                pubkey: raw.auth[OFFSET_NB_EXPORT_PUBKEY],
            },
            fingerprint: raw.fingerprint(),
            rfu1: raw.auth[OFFSET_RFU1],
            rfu2: raw.auth[OFFSET_RFU2],
            label: raw.label.to_vec(),
        };
        Ok((header, consumed))
    }
}

/// A header as it appears on the wire, before any field is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader<'a> {
    pub auth: [u8; AUTH_HEADER_SIZE],
    pub label: &'a [u8],
}

impl<'a> RawHeader<'a> {
    /// Split `header | label` off the front of `bytes`
    pub fn split(bytes: &'a [u8]) -> Result<(Self, usize), CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let label_len = bytes[OFFSET_LABEL_SIZE] as usize;
        if label_len > MAX_LABEL_SIZE {
            return Err(CodecError::LabelTooLong(label_len));
        }
        let end = HEADER_SIZE + label_len;
        let label = bytes.get(HEADER_SIZE..end).ok_or(CodecError::Truncated {
            needed: end,
            got: bytes.len(),
        })?;
        let mut auth = [0u8; AUTH_HEADER_SIZE];
        auth.copy_from_slice(&bytes[..AUTH_HEADER_SIZE]);
        Ok((RawHeader { auth, label }, end))
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_SIZE] {
        let mut out = [0u8; FINGERPRINT_SIZE];
        out.copy_from_slice(&self.auth[OFFSET_FINGERPRINT..OFFSET_FINGERPRINT + FINGERPRINT_SIZE]);
        out
    }
}

fn check_label(label: &[u8]) -> Result<(), CodecError> {
    if label.len() > MAX_LABEL_SIZE {
        return Err(CodecError::LabelTooLong(label.len()));
    }
    Ok(())
}
