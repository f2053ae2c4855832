/**
 * Host to device secure channel.
 *  ECDH handshake signed by the device identity,
 *  AES-CBC + HMAC-SHA1 wrapping with anti-replay IVs
 */
pub mod channel;
/**
 * Cryptographic types and operations.
 *  - secp256k1 identity and session keys
 *  - At-rest storage key
 *  - Session key derivation
 */
pub mod crypto;
/**
 * The emulated card: command dispatch, PINs,
 *  audit log, attestation and persistence image.
 */
pub mod device;
/**
 * Error classification shared by every module.
 */
pub mod error;
/**
 * Host side of the protocol, used by the CLI
 *  and by the integration tests.
 */
pub mod host;
/**
 * Secret record headers and payload encoding.
 */
pub mod record;
/**
 * Flat object store backing the records.
 */
pub mod store;
/**
 * Chunked import and export state machines.
 */
pub mod transfer;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::build_info;
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::device::{Device, DeviceConfig, DeviceError, DeviceImage, Reply};
    pub use crate::error::ErrorKind;
    pub use crate::host::{Card, HostChannel, HostError};
    pub use crate::record::{ExportPolicy, SecretHeader, SecretType};
    pub use crate::transfer::TransportMode;
    pub use crate::version::BuildInfo;
}
