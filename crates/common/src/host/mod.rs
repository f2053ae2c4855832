//! Host side of the device protocol
//!
//! [`HostChannel`] is the counterpart of [`SecureChannel`](crate::channel::SecureChannel):
//! it runs the initiate handshake, checks both signatures in the answer and
//! wraps commands under odd, strictly increasing IV counters. [`Card`] sits on
//! top of it and drives a [`Device`](crate::device::Device) through typed
//! methods, splitting imports and exports into chunks.

mod card;
mod channel;

pub use card::{
    AuditSummary, Card, DeviceStatus, ExportTrailer, ExportedSecret, PinSetup, SecretEntry,
    SecretRef,
};
pub use channel::HostChannel;

use crate::channel::ChannelError;
use crate::crypto::{KeyError, PrimitiveError, SessionError};
use crate::device::DeviceError;
use crate::record::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("device returned status {0:#06x}")]
    Status(u16),
    #[error("secure channel is not open")]
    NotConnected,
    #[error("malformed device response: {0}")]
    Malformed(&'static str),
    #[error("reply iv counter {received} does not answer command counter {sent}")]
    UnexpectedIv { sent: u32, received: u32 },
    #[error("device identity could not be verified")]
    IdentityMismatch,
    #[error("command: {0}")]
    Command(#[from] DeviceError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("record: {0}")]
    Codec(#[from] CodecError),
    #[error("primitive: {0}")]
    Primitive(#[from] PrimitiveError),
}

impl HostError {
    /// The status word the device answered with, if that is what failed
    pub fn status(&self) -> Option<u16> {
        match self {
            HostError::Status(status) => Some(*status),
            _ => None,
        }
    }
}
