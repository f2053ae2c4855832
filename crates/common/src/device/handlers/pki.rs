use crate::crypto::SHA256_SIZE;
use crate::device::attestation::{authentikey_response, challenge_response, CHALLENGE_SIZE};
use crate::device::command::Command;
use crate::device::error::DeviceError;
use crate::device::Device;

const INIT: u8 = 1;
const PROCESS: u8 = 2;

/// `offset(2) | len(2)` at the front of certificate `PROCESS` data
fn offset_and_len(data: &[u8]) -> Result<(usize, usize), DeviceError> {
    if data.len() < 4 {
        return Err(DeviceError::WrongLength);
    }
    let offset = u16::from_be_bytes([data[0], data[1]]) as usize;
    let len = u16::from_be_bytes([data[2], data[3]]) as usize;
    Ok((offset, len))
}

impl Device {
    /// `0x0020 | x | sig_len | sig`
    pub(crate) fn get_authentikey(&self) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        Ok(authentikey_response(&self.identity)?)
    }

    pub(crate) fn export_pki_pubkey(&self) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        Ok(self.identity.public().to_uncompressed().to_vec())
    }

    /// Sign the 32-byte hash of a certificate request
    pub(crate) fn sign_csr(&self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        if self.pki.is_locked() {
            return Err(DeviceError::PkiLocked);
        }
        let digest: [u8; SHA256_SIZE] = cmd
            .data
            .get(..SHA256_SIZE)
            .and_then(|d| d.try_into().ok())
            .ok_or(DeviceError::WrongLength)?;
        Ok(self.identity.sign_prehash(&digest)?.to_der())
    }

    /// INIT `size(2)`, PROCESS `offset(2) | len(2) | chunk`
    pub(crate) fn import_certificate(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        if self.pki.is_locked() {
            return Err(DeviceError::PkiLocked);
        }
        match cmd.p2 {
            INIT => {
                if cmd.data.len() < 2 {
                    return Err(DeviceError::WrongLength);
                }
                let size = u16::from_be_bytes([cmd.data[0], cmd.data[1]]) as usize;
                self.pki.begin_certificate(size)?;
                tracing::debug!(size, "certificate upload started");
            }
            PROCESS => {
                let (offset, len) = offset_and_len(cmd.data)?;
                let chunk = cmd.data.get(4..4 + len).ok_or(DeviceError::WrongLength)?;
                self.pki.write_certificate(offset, chunk)?;
            }
            other => return Err(DeviceError::IncorrectP2(other)),
        }
        Ok(Vec::new())
    }

    /// INIT returns `size(2)`, PROCESS `offset(2) | len(2)` returns the chunk
    pub(crate) fn export_certificate(&self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        match cmd.p2 {
            INIT => Ok((self.pki.certificate_size() as u16).to_be_bytes().to_vec()),
            PROCESS => {
                let (offset, len) = offset_and_len(cmd.data)?;
                Ok(self.pki.read_certificate(offset, len)?.to_vec())
            }
            other => Err(DeviceError::IncorrectP2(other)),
        }
    }

    pub(crate) fn lock_pki(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        self.pki.lock();
        tracing::info!("pki personalisation locked");
        Ok(Vec::new())
    }

    /// `challenge(32)` in, `nonce(32) | sig_len(2) | sig` out
    pub(crate) fn challenge_response(&self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        let challenge: [u8; CHALLENGE_SIZE] = cmd
            .data
            .get(..CHALLENGE_SIZE)
            .and_then(|c| c.try_into().ok())
            .ok_or(DeviceError::WrongLength)?;
        challenge_response(&self.identity, &challenge)
    }
}
