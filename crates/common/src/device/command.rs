//! Inner command encoding
//!
//! Commands are `CLA | INS | P1 | P2 | LC | data(LC)`. When a command comes
//! out of the secure channel it still carries the channel's block padding,
//! so anything past `LC` is ignored.

use std::convert::TryFrom;

use super::error::{sw, DeviceError};

/// Class byte of every command
pub const CLA: u8 = 0xB0;
/// `CLA | INS | P1 | P2`
pub const COMMAND_HEADER_SIZE: usize = 4;

macro_rules! instructions {
    ($($name:ident = $byte:literal,)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Instruction {
            $($name = $byte,)+
        }

        impl TryFrom<u8> for Instruction {
            type Error = DeviceError;
            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($byte => Ok(Instruction::$name),)+
                    other => Err(DeviceError::InsNotSupported(other)),
                }
            }
        }
    };
}

instructions! {
    Setup = 0x2A,
    GetStatus = 0x3C,
    CardLabel = 0x3D,
    CreatePin = 0x40,
    VerifyPin = 0x42,
    ChangePin = 0x44,
    UnblockPin = 0x46,
    ListPins = 0x48,
    LogoutAll = 0x60,
    GetAuthentikeyLegacy = 0x73,
    InitiateSecureChannel = 0x81,
    ProcessSecureChannel = 0x82,
    ImportCertificate = 0x92,
    ExportCertificate = 0x93,
    SignCsr = 0x94,
    ExportPkiPubkey = 0x98,
    LockPki = 0x99,
    ChallengeResponse = 0x9A,
    GenerateMasterSeed = 0xA0,
    ImportSecret = 0xA1,
    ExportSecret = 0xA2,
    ResetSecret = 0xA5,
    ListSecretHeaders = 0xA6,
    PrintLogs = 0xA9,
    GetAuthentikey = 0xAD,
    Generate2fa = 0xAE,
    ResetToFactory = 0xFF,
}

impl Instruction {
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Allowed before setup as long as PKI personalisation is open
    pub fn allowed_before_setup(self) -> bool {
        matches!(
            self,
            Instruction::VerifyPin
                | Instruction::ExportPkiPubkey
                | Instruction::ImportCertificate
                | Instruction::SignCsr
                | Instruction::LockPki
        )
    }
}

/// A parsed command borrowing its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: &'a [u8],
}

impl<'a> Command<'a> {
    /// Parse a command; a missing `LC` means no data
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DeviceError> {
        if bytes.len() < COMMAND_HEADER_SIZE {
            return Err(DeviceError::WrongLength);
        }
        let data = match bytes.get(COMMAND_HEADER_SIZE) {
            None => &[][..],
            Some(&lc) => {
                let start = COMMAND_HEADER_SIZE + 1;
                let end = start + lc as usize;
                bytes.get(start..end).ok_or(DeviceError::WrongLength)?
            }
        };
        Ok(Command {
            cla: bytes[0],
            ins: bytes[1],
            p1: bytes[2],
            p2: bytes[3],
            data,
        })
    }

    pub fn instruction(&self) -> Result<Instruction, DeviceError> {
        Instruction::try_from(self.ins)
    }

    /// Encode a command with [`CLA`]; data longer than 255 bytes is refused
    pub fn encode(ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let lc = u8::try_from(data.len()).map_err(|_| DeviceError::WrongLength)?;
        let mut out = Vec::with_capacity(COMMAND_HEADER_SIZE + 1 + data.len());
        out.extend_from_slice(&[CLA, ins.byte(), p1, p2, lc]);
        out.extend_from_slice(data);
        Ok(out)
    }
}

/// Response data followed by a status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub data: Vec<u8>,
    pub status: u16,
}

impl Reply {
    pub fn ok(data: Vec<u8>) -> Self {
        Reply {
            data,
            status: sw::OK,
        }
    }

    pub fn status(status: u16) -> Self {
        Reply {
            data: Vec::new(),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == sw::OK
    }

    /// `data | sw1 | sw2`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.status.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeviceError> {
        if bytes.len() < 2 {
            return Err(DeviceError::WrongLength);
        }
        let (data, status) = bytes.split_at(bytes.len() - 2);
        Ok(Reply {
            data: data.to_vec(),
            status: u16::from_be_bytes([status[0], status[1]]),
        })
    }
}
