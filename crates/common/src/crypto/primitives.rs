use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Size of a SHA-256 digest in bytes
pub const SHA256_SIZE: usize = 32;
/// Size of an HMAC-SHA1 tag in bytes
pub const HMAC_SHA1_SIZE: usize = 20;
/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;
/// Size of a secret fingerprint (truncated SHA-256) in bytes
pub const FINGERPRINT_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    #[error("primitive error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("entropy source failure: {0}")]
    Entropy(getrandom::Error),
}

/// Fill `buf` from the operating system RNG
pub fn random_bytes(buf: &mut [u8]) -> Result<(), PrimitiveError> {
    getrandom::getrandom(buf).map_err(PrimitiveError::Entropy)
}

pub fn sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    Sha256::digest(data).into()
}

/// First four bytes of SHA-256 over `data`
pub fn fingerprint(data: &[u8]) -> [u8; FINGERPRINT_SIZE] {
    let digest = sha256(data);
    let mut out = [0u8; FINGERPRINT_SIZE];
    out.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
    out
}

/// HMAC-SHA1 of the concatenation of `parts` under `key`
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_SHA1_SIZE], PrimitiveError> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("invalid hmac key: {}", e))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time equality; slices of different length compare unequal
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Length of `len` bytes once PKCS#7 padded to the AES block size
pub fn pkcs7_padded_len(len: usize) -> usize {
    (len / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
}

/// Append PKCS#7 padding so `data` becomes block aligned
pub fn pkcs7_pad(data: &mut Vec<u8>) {
    let pad = AES_BLOCK_SIZE - (data.len() % AES_BLOCK_SIZE);
    data.resize(data.len() + pad, pad as u8);
}

/// Validate PKCS#7 padding and return the unpadded length.
///
/// Every padding byte is inspected, so the running time does not depend on
/// where a mismatch occurs.
pub fn pkcs7_unpad(data: &[u8]) -> Option<usize> {
    if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
        return None;
    }
    let pad = data[data.len() - 1];
    let pad_len = pad as usize;
    if pad_len == 0 || pad_len > AES_BLOCK_SIZE {
        return None;
    }
    let tail = &data[data.len() - AES_BLOCK_SIZE..];
    let mut bad = 0u8;
    for (i, byte) in tail.iter().enumerate() {
        let in_pad = (AES_BLOCK_SIZE - i) <= pad_len;
        if in_pad {
            bad |= byte ^ pad;
        }
    }
    if bad != 0 {
        return None;
    }
    Some(data.len() - pad_len)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hmac_sha1_rfc2202() {
        // RFC 2202 test case 2
        let tag = hmac_sha1(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        assert_eq!(hex::encode(tag), "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_fingerprint_is_sha256_prefix() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fingerprint(b"abc"), [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_pkcs7_pad_and_unpad() {
        let mut data = vec![7u8; 20];
        pkcs7_pad(&mut data);
        assert_eq!(data.len(), 32);
        assert_eq!(&data[20..], &[12u8; 12]);
        assert_eq!(pkcs7_unpad(&data), Some(20));

        // full block of padding when already aligned
        let mut aligned = vec![1u8; 16];
        pkcs7_pad(&mut aligned);
        assert_eq!(aligned.len(), 32);
        assert_eq!(pkcs7_unpad(&aligned), Some(16));
        assert_eq!(pkcs7_padded_len(16), 32);
        assert_eq!(pkcs7_padded_len(15), 16);
    }

    #[test]
    fn test_pkcs7_rejects_bad_padding() {
        assert_eq!(pkcs7_unpad(&[]), None);
        assert_eq!(pkcs7_unpad(&[1u8; 15]), None);

        let mut zero_pad = vec![0u8; 16];
        zero_pad[15] = 0;
        assert_eq!(pkcs7_unpad(&zero_pad), None);

        let mut inconsistent = vec![0u8; 16];
        inconsistent[15] = 3;
        inconsistent[14] = 3;
        inconsistent[13] = 9;
        assert_eq!(pkcs7_unpad(&inconsistent), None);

        let mut too_large = vec![0u8; 16];
        too_large[15] = 17;
        assert_eq!(pkcs7_unpad(&too_large), None);
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"same", b"same"));
        assert!(!ct_eq(b"same", b"sane"));
        assert!(!ct_eq(b"short", b"shorter"));
    }
}
