//! At-rest encryption for stored records
//!
//! Record payloads are PKCS#7 padded and encrypted with AES-128 in ECB mode
//! under a single per-device `StorageKey`. Every block is independent, which
//! lets the transfer layer encrypt and decrypt a record one 16-byte block at a
//! time while it is streamed in or out.

use std::ops::Deref;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::primitives::{pkcs7_pad, pkcs7_unpad, random_bytes, AES_BLOCK_SIZE};

/// Size of the storage key in bytes (128 bits)
pub const STORAGE_KEY_SIZE: usize = 16;

/// Errors that can occur during at-rest encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("data length {0} is not a multiple of the block size")]
    Unaligned(usize),
    #[error("invalid padding")]
    Padding,
}

/// The device-internal key records are encrypted under
///
/// Generated once when the device is provisioned; it never leaves the device
/// image and is wiped from memory on drop.
///
/// # Examples
///
/// ```ignore
/// let key = StorageKey::generate()?;
/// let sealed = key.seal(b"seed bytes");
/// assert_eq!(sealed.len() % 16, 0);
/// let opened = key.open(&sealed)?;
/// assert_eq!(&opened[..], b"seed bytes");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StorageKey([u8; STORAGE_KEY_SIZE]);

impl std::fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StorageKey").field(&"..").finish()
    }
}

impl Deref for StorageKey {
    type Target = [u8; STORAGE_KEY_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; STORAGE_KEY_SIZE]> for StorageKey {
    fn from(bytes: [u8; STORAGE_KEY_SIZE]) -> Self {
        StorageKey(bytes)
    }
}

impl StorageKey {
    pub fn generate() -> Result<Self, SecretError> {
        let mut bytes = [0u8; STORAGE_KEY_SIZE];
        random_bytes(&mut bytes).map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(StorageKey(bytes))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != STORAGE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid storage key size, expected {}, got {}",
                STORAGE_KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut bytes = [0u8; STORAGE_KEY_SIZE];
        bytes.copy_from_slice(data);
        Ok(StorageKey(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.0))
    }

    /// Encrypt whole blocks in place
    pub fn encrypt_blocks(&self, data: &mut [u8]) -> Result<(), SecretError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(SecretError::Unaligned(data.len()));
        }
        let cipher = self.cipher();
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Decrypt whole blocks in place
    pub fn decrypt_blocks(&self, data: &mut [u8]) -> Result<(), SecretError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(SecretError::Unaligned(data.len()));
        }
        let cipher = self.cipher();
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Pad and encrypt a whole payload
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        pkcs7_pad(&mut buf);
        let cipher = self.cipher();
        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        buf
    }

    /// Decrypt a whole payload and strip its padding
    pub fn open(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
        let mut buf = Zeroizing::new(ciphertext.to_vec());
        self.decrypt_blocks(&mut buf)?;
        let len = pkcs7_unpad(&buf).ok_or(SecretError::Padding)?;
        buf.truncate(len);
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let key = StorageKey::generate().unwrap();
        let data = b"abandon abandon abandon about";

        let sealed = key.seal(data);
        assert_eq!(sealed.len(), 32);
        assert_ne!(&sealed[..data.len()], &data[..]);

        let opened = key.open(&sealed).unwrap();
        assert_eq!(&opened[..], &data[..]);
    }

    #[test]
    fn test_blockwise_matches_whole_payload() {
        let key = StorageKey::generate().unwrap();
        let mut data = vec![0x5au8; 40];
        let sealed = key.seal(&data);

        pkcs7_pad(&mut data);
        for block in data.chunks_mut(AES_BLOCK_SIZE) {
            key.encrypt_blocks(block).unwrap();
        }
        assert_eq!(data, sealed);
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.1
        let key =
            StorageKey::from_slice(&hex::decode("000102030405060708090a0b0c0d0e0f").unwrap())
                .unwrap();
        let mut block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        key.encrypt_blocks(&mut block).unwrap();
        assert_eq!(hex::encode(&block), "69c4e0d86a7b0430d8cdb78070b4c55a");
        key.decrypt_blocks(&mut block).unwrap();
        assert_eq!(hex::encode(&block), "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_rejects_unaligned_and_bad_padding() {
        let key = StorageKey::generate().unwrap();
        let mut odd = vec![0u8; 17];
        assert!(matches!(
            key.encrypt_blocks(&mut odd),
            Err(SecretError::Unaligned(17))
        ));

        // a block of zeroes encrypted raw has no valid padding
        let mut raw = vec![0u8; 16];
        key.encrypt_blocks(&mut raw).unwrap();
        assert!(matches!(key.open(&raw), Err(SecretError::Padding)));
    }
}
