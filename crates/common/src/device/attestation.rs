use serde::{Deserialize, Serialize};

use crate::crypto::{
    random_bytes, KeyError, PublicKey, SecretKey, Signature, COORDINATE_SIZE, SHA256_SIZE,
};

use super::error::DeviceError;

/// Prefix of every challenge-response message
pub const CHALLENGE_PREFIX: &[u8] = b"Challenge:";
/// Size of both the host challenge and the device nonce
pub const CHALLENGE_SIZE: usize = 32;
/// Largest device certificate accepted by `import certificate`
pub const MAX_CERTIFICATE_SIZE: usize = 2048;

/// Anything that can sign on behalf of the device identity.
///
/// The secure channel handshake, plain exports and the PKI commands only
/// need this much of the identity key.
pub trait AttestationSigner {
    fn public_key(&self) -> PublicKey;

    /// ECDSA over SHA-256 of `msg`
    fn sign(&self, msg: &[u8]) -> Result<Signature, KeyError>;

    /// ECDSA over a digest the caller already computed
    fn sign_prehash(&self, digest: &[u8; SHA256_SIZE]) -> Result<Signature, KeyError>;
}

impl AttestationSigner for SecretKey {
    fn public_key(&self) -> PublicKey {
        self.public()
    }

    fn sign(&self, msg: &[u8]) -> Result<Signature, KeyError> {
        Ok(SecretKey::sign(self, msg))
    }

    fn sign_prehash(&self, digest: &[u8; SHA256_SIZE]) -> Result<Signature, KeyError> {
        SecretKey::sign_prehash(self, digest)
    }
}

/// `0x0020 | x(32) | sig_len(2) | sig`, signed over the first 34 bytes
pub fn authentikey_response<S: AttestationSigner + ?Sized>(
    signer: &S,
) -> Result<Vec<u8>, KeyError> {
    let mut response = Vec::with_capacity(2 + COORDINATE_SIZE + 2 + 72);
    response.extend_from_slice(&(COORDINATE_SIZE as u16).to_be_bytes());
    response.extend_from_slice(&signer.public_key().x_coordinate());
    let signature = signer.sign(&response)?.to_der();
    response.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    response.extend_from_slice(&signature);
    Ok(response)
}

/// The message signed in a challenge-response round
pub fn challenge_message(nonce: &[u8; CHALLENGE_SIZE], challenge: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(CHALLENGE_PREFIX.len() + 2 * CHALLENGE_SIZE);
    msg.extend_from_slice(CHALLENGE_PREFIX);
    msg.extend_from_slice(nonce);
    msg.extend_from_slice(challenge);
    msg
}

/// Sign a host challenge with a fresh nonce: `nonce(32) | sig_len(2) | sig`
pub fn challenge_response<S: AttestationSigner + ?Sized>(
    signer: &S,
    challenge: &[u8; CHALLENGE_SIZE],
) -> Result<Vec<u8>, DeviceError> {
    let mut nonce = [0u8; CHALLENGE_SIZE];
    random_bytes(&mut nonce).map_err(|e| anyhow::anyhow!("{}", e))?;
    let msg = challenge_message(&nonce, challenge);
    let signature = signer.sign(&msg)?;
    if signer.public_key().verify(&msg, &signature).is_err() {
        tracing::warn!("challenge signature failed to verify");
        return Err(DeviceError::SignatureInvalid);
    }

    let signature = signature.to_der();
    let mut response = Vec::with_capacity(CHALLENGE_SIZE + 2 + signature.len());
    response.extend_from_slice(&nonce);
    response.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    response.extend_from_slice(&signature);
    Ok(response)
}

/// Device certificate and the personalisation lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiState {
    certificate: Vec<u8>,
    locked: bool,
}

impl PkiState {
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn certificate_size(&self) -> usize {
        self.certificate.len()
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Start a certificate upload of `size` bytes, dropping the old one
    pub fn begin_certificate(&mut self, size: usize) -> Result<(), DeviceError> {
        self.ensure_unlocked()?;
        if size > MAX_CERTIFICATE_SIZE {
            return Err(DeviceError::WrongLength);
        }
        self.certificate = vec![0u8; size];
        Ok(())
    }

    pub fn write_certificate(&mut self, offset: usize, chunk: &[u8]) -> Result<(), DeviceError> {
        self.ensure_unlocked()?;
        let end = offset
            .checked_add(chunk.len())
            .filter(|end| *end <= self.certificate.len())
            .ok_or(DeviceError::WrongLength)?;
        self.certificate[offset..end].copy_from_slice(chunk);
        Ok(())
    }

    pub fn read_certificate(&self, offset: usize, len: usize) -> Result<&[u8], DeviceError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.certificate.len())
            .ok_or(DeviceError::WrongLength)?;
        Ok(&self.certificate[offset..end])
    }

    fn ensure_unlocked(&self) -> Result<(), DeviceError> {
        if self.locked {
            return Err(DeviceError::PkiLocked);
        }
        Ok(())
    }
}
