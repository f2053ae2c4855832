//! Session keys shared between two parties after an ECDH exchange
//!
//! # Protocol Overview
//!
//! Both sides hold a secp256k1 keypair and the other side's public key:
//! 1. **Agree**: ECDH yields the 32-byte x-coordinate `Z` of the shared point
//! 2. **Derive**: `mac_key = HMAC-SHA1(Z, ctx.mac)`, `enc_key = HMAC-SHA1(Z, ctx.enc)[..16]`
//! 3. **Use**: AES-128-CBC under `enc_key` with an explicit IV, HMAC-SHA1
//!    under `mac_key` for authentication
//!
//! The context strings keep the host channel and the device-to-device channel
//! apart even when the same pair of keys is involved.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{PublicKey, SecretKey};
use super::primitives::{ct_eq, hmac_sha1, PrimitiveError, AES_BLOCK_SIZE, HMAC_SHA1_SIZE};

/// AES-128 session key size in bytes
pub const ENC_KEY_SIZE: usize = 16;
/// HMAC-SHA1 session key size in bytes
pub const MAC_KEY_SIZE: usize = HMAC_SHA1_SIZE;
/// CBC initialisation vector size in bytes
pub const IV_SIZE: usize = AES_BLOCK_SIZE;

/// Context strings fed to the key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfContext {
    pub enc: &'static [u8; 6],
    pub mac: &'static [u8; 6],
}

/// Host to device secure channel
pub const HOST_CHANNEL_CONTEXT: KdfContext = KdfContext {
    enc: b"sc_key",
    mac: b"sc_mac",
};

/// Device to device secret transfer
pub const PEER_CHANNEL_CONTEXT: KdfContext = KdfContext {
    enc: b"seckey",
    mac: b"secmac",
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("primitive error: {0}")]
    Primitive(#[from] PrimitiveError),
    #[error("data length {0} is not a multiple of the block size")]
    Unaligned(usize),
    #[error("message authentication failed")]
    WrongMac,
}

/// Symmetric keys derived from an ECDH shared secret
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    enc_key: [u8; ENC_KEY_SIZE],
    mac_key: [u8; MAC_KEY_SIZE],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Derive session keys from the shared x-coordinate
    pub fn derive(shared_x: &[u8], context: &KdfContext) -> Result<Self, SessionError> {
        let mac_key = hmac_sha1(shared_x, &[context.mac])?;
        let mut enc_full = hmac_sha1(shared_x, &[context.enc])?;
        let mut enc_key = [0u8; ENC_KEY_SIZE];
        enc_key.copy_from_slice(&enc_full[..ENC_KEY_SIZE]);
        enc_full.zeroize();
        Ok(SessionKeys { enc_key, mac_key })
    }

    /// ECDH with `peer` followed by [`SessionKeys::derive`]
    pub fn agree(
        local: &SecretKey,
        peer: &PublicKey,
        context: &KdfContext,
    ) -> Result<Self, SessionError> {
        let shared = local.agree(peer);
        Self::derive(shared.as_ref(), context)
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_SIZE] {
        &self.mac_key
    }

    /// HMAC-SHA1 over the concatenation of `parts`
    pub fn mac(&self, parts: &[&[u8]]) -> Result<[u8; MAC_KEY_SIZE], SessionError> {
        Ok(hmac_sha1(&self.mac_key, parts)?)
    }

    /// Recompute the MAC over `parts` and compare it to `tag` in constant time
    pub fn verify_mac(&self, parts: &[&[u8]], tag: &[u8]) -> Result<(), SessionError> {
        let expected = self.mac(parts)?;
        if ct_eq(&expected, tag) {
            Ok(())
        } else {
            Err(SessionError::WrongMac)
        }
    }

    pub fn encryptor(&self, iv: &[u8; IV_SIZE]) -> CbcEncryptor {
        CbcEncryptor(cbc::Encryptor::<Aes128>::new(
            GenericArray::from_slice(&self.enc_key),
            GenericArray::from_slice(iv),
        ))
    }

    pub fn decryptor(&self, iv: &[u8; IV_SIZE]) -> CbcDecryptor {
        CbcDecryptor(cbc::Decryptor::<Aes128>::new(
            GenericArray::from_slice(&self.enc_key),
            GenericArray::from_slice(iv),
        ))
    }
}

/// Streaming AES-128-CBC encryption, one or more whole blocks per call
pub struct CbcEncryptor(cbc::Encryptor<Aes128>);

impl CbcEncryptor {
    pub fn process(&mut self, data: &mut [u8]) -> Result<(), SessionError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(SessionError::Unaligned(data.len()));
        }
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}

/// Streaming AES-128-CBC decryption, one or more whole blocks per call
pub struct CbcDecryptor(cbc::Decryptor<Aes128>);

impl CbcDecryptor {
    pub fn process(&mut self, data: &mut [u8]) -> Result<(), SessionError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(SessionError::Unaligned(data.len()));
        }
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}
