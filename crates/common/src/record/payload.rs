use zeroize::Zeroizing;

use crate::crypto::{
    fingerprint, random_bytes, PrimitiveError, PublicKey, StorageKey, AES_BLOCK_SIZE,
    PUBLIC_KEY_SIZE,
};

use super::header::{CodecError, SecretHeader, SecretType};

pub const MIN_SEED_SIZE: usize = 16;
pub const MAX_SEED_SIZE: usize = 64;
pub const TWO_FA_SIZE: usize = 20;

/// `[size | random(size)]` for on-device generated secrets
pub fn generated_body(size: usize) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
    let mut body = Zeroizing::new(vec![0u8; size + 1]);
    body[0] = size as u8;
    random_bytes(&mut body[1..])?;
    Ok(body)
}

/// `[65 | 0x04 | x | y]`, the payload of a public-key record
pub fn public_key_body(key: &PublicKey) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + PUBLIC_KEY_SIZE);
    body.push(PUBLIC_KEY_SIZE as u8);
    body.extend_from_slice(&key.to_uncompressed());
    body
}

pub fn parse_public_key_body(body: &[u8]) -> Result<PublicKey, CodecError> {
    match body.split_first() {
        Some((&len, rest)) if len as usize == PUBLIC_KEY_SIZE && rest.len() >= PUBLIC_KEY_SIZE => {
            PublicKey::from_uncompressed(&rest[..PUBLIC_KEY_SIZE])
                .map_err(|_| CodecError::InvalidPublicKey)
        }
        _ => Err(CodecError::InvalidPublicKey),
    }
}

/// A record as laid out in the object store: `header | label | ciphertext`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub header: SecretHeader,
    pub ciphertext: Vec<u8>,
}

impl StoredRecord {
    /// Fingerprint, pad and encrypt `plaintext` under `key`
    pub fn seal(mut header: SecretHeader, plaintext: &[u8], key: &StorageKey) -> Self {
        header.fingerprint = fingerprint(plaintext);
        StoredRecord {
            header,
            ciphertext: key.seal(plaintext),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.ciphertext.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (header, consumed) = SecretHeader::decode(bytes)?;
        let ciphertext = &bytes[consumed..];
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(CodecError::InvalidSize(ciphertext.len()));
        }
        Ok(StoredRecord {
            header,
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn open(&self, key: &StorageKey) -> Result<Zeroizing<Vec<u8>>, CodecError> {
        Ok(key.open(&self.ciphertext)?)
    }

    /// The counterpart key held by a public-key record
    pub fn open_public_key(&self, key: &StorageKey) -> Result<PublicKey, CodecError> {
        if self.header.secret_type != SecretType::PublicKey {
            return Err(CodecError::NotPublicKey);
        }
        parse_public_key_body(&self.open(key)?)
    }
}
