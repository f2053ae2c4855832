//! Command handlers, one `impl Device` block per command family
//!
//! Handlers return the response data on success. Status words, wrapping and
//! lock cleanup on failure are the dispatcher's business.

mod admin;
mod pin;
mod pki;
mod secret;

use super::error::DeviceError;

/// Cursor over command data
pub(super) struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DeviceError> {
        if self.data.len() < len {
            return Err(DeviceError::InvalidParameter("command data truncated"));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, DeviceError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, DeviceError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// `len(1) | value(len)`
    pub fn length_prefixed(&mut self) -> Result<&'a [u8], DeviceError> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }
}
