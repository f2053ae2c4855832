use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{StorageKey, PRIVATE_KEY_SIZE};
use crate::store::ObjectStore;

use super::attestation::PkiState;
use super::audit::AuditLog;
use super::config::DeviceConfig;
use super::pin::PinSlots;

/// Layout version written into every image
pub const IMAGE_VERSION: u8 = 1;

/// Non-volatile state of a device.
///
/// This is what survives power loss on a card: keys, records, credentials
/// and logs. The secure channel, the transfer lock and PIN logins are never
/// part of it. The identity scalar is wiped when the image is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceImage {
    pub version: u8,
    pub config: DeviceConfig,
    pub(crate) identity: [u8; PRIVATE_KEY_SIZE],
    pub(crate) storage_key: StorageKey,
    pub(crate) store: ObjectStore,
    pub(crate) pins: PinSlots,
    pub(crate) audit: AuditLog,
    pub(crate) pki: PkiState,
    pub(crate) card_label: Vec<u8>,
    pub(crate) setup_done: bool,
    pub(crate) option_flags: u16,
    pub(crate) reset_counter: u8,
}

impl std::fmt::Debug for DeviceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceImage")
            .field("version", &self.version)
            .field("store", &self.store)
            .field("setup_done", &self.setup_done)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        self.identity.zeroize();
    }
}
