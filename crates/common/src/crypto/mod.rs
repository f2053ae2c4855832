//! Cryptographic primitives for the vault
//!
//! Everything the device computes goes through this module:
//!
//! - **Identity & Authentication**: secp256k1 keypairs (`SecretKey`/`PublicKey`),
//!   ECDSA over SHA-256 with DER encoded signatures
//! - **Storage Encryption**: AES-128-ECB under a per-device `StorageKey`
//! - **Session Keys**: ECDH + HMAC-SHA1 derivation feeding AES-128-CBC and
//!   HMAC-SHA1 message authentication
//! - **Helpers**: SHA-256, PKCS#7, constant-time comparison, system randomness
//!
//! # Security Model
//!
//! ## Device Identity
//! Each device owns one long-term keypair (the "authentikey"). It signs the
//! secure channel handshake, plain exports and attestation challenges, and
//! it is the static half of the device-to-device key agreement.
//!
//! ## Storage Encryption
//! Record payloads are PKCS#7 padded and encrypted block by block under a
//! random 128-bit key generated once at provisioning. The key never leaves
//! the device.
//!
//! ## Session Key Derivation
//! Both the host channel and the device-to-device channel derive their keys
//! from the x-coordinate `Z` of an ECDH shared point:
//! 1. `mac_key = HMAC-SHA1(Z, mac_context)` (20 bytes)
//! 2. `enc_key = HMAC-SHA1(Z, enc_context)[..16]`
//!
//! The host channel uses `"sc_key"`/`"sc_mac"`, the device-to-device channel
//! uses `"seckey"`/`"secmac"`.

mod keys;
mod primitives;
mod secret;
mod session;

pub use keys::{
    KeyError, PublicKey, SecretKey, Signature, COORDINATE_SIZE, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE,
};
pub use primitives::{
    ct_eq, fingerprint, hmac_sha1, pkcs7_pad, pkcs7_padded_len, pkcs7_unpad, random_bytes,
    sha256, PrimitiveError, AES_BLOCK_SIZE, FINGERPRINT_SIZE, HMAC_SHA1_SIZE, SHA256_SIZE,
};
pub use secret::{SecretError, StorageKey, STORAGE_KEY_SIZE};
pub use session::{
    CbcDecryptor, CbcEncryptor, KdfContext, SessionError, SessionKeys, ENC_KEY_SIZE,
    HOST_CHANNEL_CONTEXT, IV_SIZE, MAC_KEY_SIZE, PEER_CHANNEL_CONTEXT,
};
