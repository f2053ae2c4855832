use std::fmt;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroizing;

use super::primitives::{random_bytes, SHA256_SIZE};

/// Size of a secp256k1 private scalar in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an uncompressed SEC1 public key in bytes (`0x04 || X || Y`)
pub const PUBLIC_KEY_SIZE: usize = 65;
/// Size of a single affine coordinate in bytes
pub const COORDINATE_SIZE: usize = 32;

const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;
const SEC1_EVEN_TAG: u8 = 0x02;
const SEC1_ODD_TAG: u8 = 0x03;
const MAX_KEYGEN_ATTEMPTS: usize = 8;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// ECDSA signature over SHA-256, carried on the wire in DER form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(EcdsaSignature);

impl Signature {
    /// Parse a DER encoded signature
    pub fn from_der(bytes: &[u8]) -> Result<Self, KeyError> {
        EcdsaSignature::from_der(bytes)
            .map(Signature)
            .map_err(|_| KeyError::InvalidSignature)
    }

    /// DER encoding, at most 72 bytes
    pub fn to_der(&self) -> Vec<u8> {
        self.0.to_der().as_bytes().to_vec()
    }
}

/// Public half of a secp256k1 keypair
///
/// Used as the device identity ("authentikey"), as the host's and the
/// device's ephemeral channel keys, and as the stored counterpart key of a
/// device-to-device transfer.
///
/// # Examples
///
/// ```ignore
/// let secret_key = SecretKey::generate()?;
/// let public_key = secret_key.public();
///
/// // Uncompressed SEC1 encoding is what goes over the wire
/// let bytes = public_key.to_uncompressed();
/// let recovered = PublicKey::from_uncompressed(&bytes)?;
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(k256::PublicKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl From<k256::PublicKey> for PublicKey {
    fn from(key: k256::PublicKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_uncompressed(bytes)
    }
}

impl PublicKey {
    /// Parse an uncompressed SEC1 point (`0x04 || X || Y`)
    pub fn from_uncompressed(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(KeyError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != SEC1_UNCOMPRESSED_TAG {
            return Err(KeyError::InvalidPublicKey(format!(
                "expected uncompressed point tag 0x04, got {:#04x}",
                bytes[0]
            )));
        }
        k256::PublicKey::from_sec1_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| KeyError::InvalidPublicKey("point is not on the curve".to_string()))
    }

    /// Rebuild a public key from its x-coordinate and a signature it produced.
    ///
    /// The device only ever reveals x-coordinates; both candidate points are
    /// tried against the signature and the one that verifies wins.
    pub fn recover_from_x(
        x: &[u8],
        msg: &[u8],
        signature: &Signature,
    ) -> Result<Self, KeyError> {
        if x.len() != COORDINATE_SIZE {
            return Err(KeyError::InvalidPublicKey(format!(
                "expected {} byte coordinate, got {}",
                COORDINATE_SIZE,
                x.len()
            )));
        }
        for tag in [SEC1_EVEN_TAG, SEC1_ODD_TAG] {
            let mut compressed = [0u8; COORDINATE_SIZE + 1];
            compressed[0] = tag;
            compressed[1..].copy_from_slice(x);
            let Ok(point) = k256::PublicKey::from_sec1_bytes(&compressed) else {
                continue;
            };
            let candidate = PublicKey(point);
            if candidate.verify(msg, signature).is_ok() {
                return Ok(candidate);
            }
        }
        Err(KeyError::VerificationFailed)
    }

    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Self::from_uncompressed(&buff)
    }

    /// Uncompressed SEC1 encoding
    pub fn to_uncompressed(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let point = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn x_coordinate(&self) -> [u8; COORDINATE_SIZE] {
        let mut out = [0u8; COORDINATE_SIZE];
        out.copy_from_slice(&self.to_uncompressed()[1..1 + COORDINATE_SIZE]);
        out
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_uncompressed())
    }

    /// Verify an ECDSA-SHA256 signature on a message.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), KeyError> {
        let verifying_key = VerifyingKey::from_sec1_bytes(&self.to_uncompressed())
            .map_err(|e| anyhow::anyhow!("invalid verifying key: {}", e))?;
        verifying_key
            .verify(msg, &signature.0)
            .map_err(|_| KeyError::VerificationFailed)
    }
}

/// Private half of a secp256k1 keypair
///
/// The scalar is wiped when the key is dropped.
///
/// # Examples
///
/// ```ignore
/// let identity = SecretKey::generate()?;
/// let signature = identity.sign(b"hello");
/// identity.public().verify(b"hello", &signature)?;
///
/// // ECDH with a peer yields the shared x-coordinate
/// let shared = identity.agree(&peer_public);
/// ```
#[derive(Clone)]
pub struct SecretKey(k256::SecretKey);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"..").finish()
    }
}

impl SecretKey {
    /// Generate a new random secret key using the system RNG
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        // out-of-range scalars are astronomically rare; draw again if we hit one
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            random_bytes(bytes.as_mut())
                .map_err(|e| anyhow::anyhow!("failed to generate key material: {}", e))?;
            if let Ok(key) = k256::SecretKey::from_slice(bytes.as_ref()) {
                return Ok(SecretKey(key));
            }
        }
        Err(anyhow::anyhow!("failed to draw a valid secp256k1 scalar").into())
    }

    /// Create a secret key from its 32-byte big-endian scalar
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        k256::SecretKey::from_slice(bytes)
            .map(SecretKey)
            .map_err(|_| anyhow::anyhow!("private key scalar out of range").into())
    }

    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = Zeroizing::new([0; PRIVATE_KEY_SIZE]);
        hex::decode_to_slice(hex, buff.as_mut())
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Self::from_bytes(buff.as_ref())
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    /// Sign a message with ECDSA over SHA-256.
    ///
    /// Signatures are deterministic (RFC 6979) and low-S normalized.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let signing_key = SigningKey::from(&self.0);
        Signature(signing_key.sign(msg))
    }

    /// Sign a SHA-256 digest computed elsewhere
    pub fn sign_prehash(&self, digest: &[u8; SHA256_SIZE]) -> Result<Signature, KeyError> {
        let signing_key = SigningKey::from(&self.0);
        signing_key
            .sign_prehash(digest)
            .map(Signature)
            .map_err(|e| anyhow::anyhow!("prehash signing failed: {}", e).into())
    }

    /// ECDH with `peer`, returning the x-coordinate of the shared point
    pub fn agree(&self, peer: &PublicKey) -> Zeroizing<[u8; COORDINATE_SIZE]> {
        let shared = k256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine());
        let mut out = Zeroizing::new([0u8; COORDINATE_SIZE]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}
