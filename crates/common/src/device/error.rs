use crate::channel::ChannelError;
use crate::crypto::KeyError;
use crate::error::ErrorKind;
use crate::record::CodecError;
use crate::store::StoreError;
use crate::transfer::TransferError;

use super::pin::PinError;

/// Status words returned in the last two bytes of every reply
pub mod sw {
    pub const OK: u16 = 0x9000;
    /// Low nibble carries the tries left
    pub const PIN_FAILED: u16 = 0x63C0;
    pub const OPERATION_NOT_ALLOWED: u16 = 0x9C03;
    pub const SETUP_NOT_DONE: u16 = 0x9C04;
    pub const UNSUPPORTED: u16 = 0x9C05;
    pub const UNAUTHORIZED: u16 = 0x9C06;
    pub const SETUP_ALREADY_DONE: u16 = 0x9C07;
    pub const OBJECT_NOT_FOUND: u16 = 0x9C08;
    pub const SIGNATURE_INVALID: u16 = 0x9C0B;
    pub const IDENTITY_BLOCKED: u16 = 0x9C0C;
    pub const INVALID_PARAMETER: u16 = 0x9C0F;
    pub const INCORRECT_P1: u16 = 0x9C10;
    pub const INCORRECT_P2: u16 = 0x9C11;
    pub const SEQUENCE_END: u16 = 0x9C12;
    pub const CHANNEL_REQUIRED: u16 = 0x9C20;
    pub const CHANNEL_UNINITIALIZED: u16 = 0x9C21;
    pub const CHANNEL_WRONG_IV: u16 = 0x9C22;
    pub const CHANNEL_WRONG_MAC: u16 = 0x9C23;
    pub const LOCK_ERROR: u16 = 0x9C30;
    pub const EXPORT_NOT_ALLOWED: u16 = 0x9C31;
    pub const DATA_TOO_LONG: u16 = 0x9C32;
    pub const SECURE_IMPORT_WRONG_MAC: u16 = 0x9C33;
    pub const PKI_LOCKED: u16 = 0x9C40;
    pub const NO_MEMORY_LEFT: u16 = 0x9C01;
    pub const INTERNAL_ERROR: u16 = 0x9CFF;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
    /// Reset-to-factory progress, low byte carries the resets left
    pub const RESET_TO_FACTORY: u16 = 0xFF00;
    /// Reset-to-factory sequence aborted
    pub const RESET_ABORTED: u16 = 0xFFFF;
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("class byte not supported")]
    ClaNotSupported,
    #[error("instruction {0:#04x} not supported")]
    InsNotSupported(u8),
    #[error("wrong command length")]
    WrongLength,
    #[error("command must arrive through the secure channel")]
    ChannelRequired,
    #[error("setup has not been performed")]
    SetupNotDone,
    #[error("setup was already performed")]
    SetupAlreadyDone,
    #[error("pin 0 must be verified first")]
    Unauthorized,
    #[error("operation is not supported")]
    Unsupported,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("incorrect P1 {0:#04x}")]
    IncorrectP1(u8),
    #[error("incorrect P2 {0:#04x}")]
    IncorrectP2(u8),
    #[error("no more entries")]
    SequenceEnd,
    #[error("object {0} not found")]
    NotFound(u16),
    #[error("command conflicts with the transfer in progress")]
    LockError,
    #[error("signature failed to verify")]
    SignatureInvalid,
    #[error("pki personalisation is locked")]
    PkiLocked,
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("pin: {0}")]
    Pin(#[from] PinError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("record: {0}")]
    Codec(#[from] CodecError),
    #[error("transfer: {0}")]
    Transfer(#[from] TransferError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::ChannelRequired
            | DeviceError::SetupNotDone
            | DeviceError::SetupAlreadyDone
            | DeviceError::Unauthorized => ErrorKind::Authentication,
            DeviceError::ClaNotSupported
            | DeviceError::InsNotSupported(_)
            | DeviceError::WrongLength
            | DeviceError::Unsupported
            | DeviceError::InvalidParameter(_)
            | DeviceError::IncorrectP1(_)
            | DeviceError::IncorrectP2(_)
            | DeviceError::SequenceEnd
            | DeviceError::PkiLocked => ErrorKind::Protocol,
            DeviceError::NotFound(_) => ErrorKind::NotFound,
            DeviceError::LockError => ErrorKind::Lock,
            DeviceError::SignatureInvalid => ErrorKind::Integrity,
            DeviceError::Channel(e) => e.kind(),
            DeviceError::Pin(e) => e.kind(),
            DeviceError::Store(e) => e.kind(),
            DeviceError::Codec(e) => e.kind(),
            DeviceError::Transfer(e) => e.kind(),
            DeviceError::Default(_) | DeviceError::Key(_) => ErrorKind::Internal,
        }
    }

    /// The status word this error is reported with
    pub fn status_word(&self) -> u16 {
        match self {
            DeviceError::Default(_) | DeviceError::Key(_) => sw::INTERNAL_ERROR,
            DeviceError::ClaNotSupported => sw::CLA_NOT_SUPPORTED,
            DeviceError::InsNotSupported(_) => sw::INS_NOT_SUPPORTED,
            DeviceError::WrongLength => sw::WRONG_LENGTH,
            DeviceError::ChannelRequired => sw::CHANNEL_REQUIRED,
            DeviceError::SetupNotDone => sw::SETUP_NOT_DONE,
            DeviceError::SetupAlreadyDone => sw::SETUP_ALREADY_DONE,
            DeviceError::Unauthorized => sw::UNAUTHORIZED,
            DeviceError::Unsupported => sw::UNSUPPORTED,
            DeviceError::InvalidParameter(_) => sw::INVALID_PARAMETER,
            DeviceError::IncorrectP1(_) => sw::INCORRECT_P1,
            DeviceError::IncorrectP2(_) => sw::INCORRECT_P2,
            DeviceError::SequenceEnd => sw::SEQUENCE_END,
            DeviceError::NotFound(_) => sw::OBJECT_NOT_FOUND,
            DeviceError::LockError => sw::LOCK_ERROR,
            DeviceError::SignatureInvalid => sw::SIGNATURE_INVALID,
            DeviceError::PkiLocked => sw::PKI_LOCKED,
            DeviceError::Channel(e) => channel_status(e),
            DeviceError::Pin(e) => pin_status(e),
            DeviceError::Store(e) => store_status(e),
            DeviceError::Codec(e) => codec_status(e),
            DeviceError::Transfer(e) => transfer_status(e),
        }
    }
}

fn channel_status(e: &ChannelError) -> u16 {
    match e {
        ChannelError::Uninitialized => sw::CHANNEL_UNINITIALIZED,
        ChannelError::Replay(_) => sw::CHANNEL_WRONG_IV,
        ChannelError::WrongMac => sw::CHANNEL_WRONG_MAC,
        ChannelError::Malformed(_) => sw::WRONG_LENGTH,
        ChannelError::InvalidPublicKey(_) => sw::INVALID_PARAMETER,
        ChannelError::Default(_)
        | ChannelError::NoOutboundIv
        | ChannelError::Key(_)
        | ChannelError::Session(_) => sw::INTERNAL_ERROR,
    }
}

fn pin_status(e: &PinError) -> u16 {
    match e {
        PinError::WrongPin { remaining } => sw::PIN_FAILED | u16::from(*remaining & 0x0F),
        PinError::Blocked => sw::IDENTITY_BLOCKED,
        PinError::Policy(_) => sw::INVALID_PARAMETER,
        PinError::NotBlocked => sw::OPERATION_NOT_ALLOWED,
        PinError::NoSuchSlot(_) | PinError::SlotInUse(_) => sw::INCORRECT_P1,
    }
}

fn store_status(e: &StoreError) -> u16 {
    match e {
        StoreError::NoMemory { .. } | StoreError::IdsExhausted => sw::NO_MEMORY_LEFT,
        StoreError::Duplicate { .. }
        | StoreError::EmptyObject
        | StoreError::OutOfRange { .. }
        | StoreError::StaleHandle { .. } => sw::INTERNAL_ERROR,
    }
}

fn codec_status(e: &CodecError) -> u16 {
    match e {
        CodecError::Default(_) | CodecError::Storage(_) => sw::INTERNAL_ERROR,
        CodecError::LabelTooLong(_)
        | CodecError::UnknownType(_)
        | CodecError::UnknownOrigin(_)
        | CodecError::UnknownPolicy(_)
        | CodecError::Truncated { .. }
        | CodecError::InvalidSize(_)
        | CodecError::NotPublicKey
        | CodecError::InvalidPublicKey => sw::INVALID_PARAMETER,
    }
}

fn transfer_status(e: &TransferError) -> u16 {
    match e {
        TransferError::InvalidMode(_) | TransferError::Malformed(_) => sw::INVALID_PARAMETER,
        TransferError::InvalidPhase(_) => sw::INCORRECT_P2,
        TransferError::PolicyViolation => sw::EXPORT_NOT_ALLOWED,
        TransferError::DataTooLong { .. } => sw::DATA_TOO_LONG,
        TransferError::WrongMac | TransferError::BadPadding => sw::SECURE_IMPORT_WRONG_MAC,
        TransferError::NotFound(_) => sw::OBJECT_NOT_FOUND,
        TransferError::NoLock => sw::LOCK_ERROR,
        TransferError::Codec(e) => codec_status(e),
        TransferError::Default(_)
        | TransferError::Secret(_)
        | TransferError::Session(_)
        | TransferError::Key(_) => sw::INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::ReplayError;

    #[test]
    fn test_status_words() {
        assert_eq!(DeviceError::LockError.status_word(), 0x9C30);
        assert_eq!(DeviceError::IncorrectP2(7).status_word(), 0x9C11);
        assert_eq!(
            DeviceError::from(PinError::WrongPin { remaining: 2 }).status_word(),
            0x63C2
        );
        assert_eq!(
            DeviceError::from(TransferError::PolicyViolation).status_word(),
            0x9C31
        );
        assert_eq!(
            DeviceError::from(TransferError::Codec(CodecError::LabelTooLong(200))).status_word(),
            0x9C0F
        );
        assert_eq!(
            DeviceError::from(StoreError::NoMemory { requested: 10 }).status_word(),
            0x9C01
        );
        assert_eq!(
            DeviceError::from(ChannelError::WrongMac).status_word(),
            0x9C23
        );
    }

    #[test]
    fn test_kinds_follow_the_source() {
        assert_eq!(
            DeviceError::from(TransferError::WrongMac).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(DeviceError::Unauthorized.kind(), ErrorKind::Authentication);
        assert_eq!(DeviceError::NotFound(3).kind(), ErrorKind::NotFound);
        assert_eq!(
            DeviceError::from(ChannelError::Replay(ReplayError::Stale {
                received: 1,
                stored: 3
            }))
            .kind(),
            ErrorKind::Replay
        );
    }
}
