//! The emulated card
//!
//! A [`Device`] owns everything a card holds: the identity key, the storage
//! key, the object store, PIN slots, the audit log and the PKI state, plus
//! the transient channel and transfer lock. Commands go in through
//! [`Device::process`] as raw bytes and come back as a [`Reply`].
//!
//! # Command Gates
//!
//! Every command passes, in order:
//!
//! 1. the class byte check,
//! 2. the reset-to-factory sequence tracking,
//! 3. the secure channel (commands other than status, initiate and
//!    reset-to-factory must arrive wrapped),
//! 4. the setup gate,
//! 5. the transfer lock (a command for another instruction aborts the
//!    transfer and fails with a lock error),
//! 6. the handler's own PIN check.
//!
//! Errors never produce data, only a bare status word.

use crate::channel::SecureChannel;
use crate::crypto::{PublicKey, SecretKey, StorageKey};
use crate::record::{StoredRecord, STORE_TYPE_TAG};
use crate::store::{ObjectHandle, ObjectStore};
use crate::transfer::{TransferError, TransferLock};

mod attestation;
mod audit;
mod command;
mod config;
mod dispatch;
mod error;
mod handlers;
mod image;
mod pin;

pub use attestation::{
    authentikey_response, challenge_message, challenge_response, AttestationSigner, PkiState,
    CHALLENGE_PREFIX, CHALLENGE_SIZE, MAX_CERTIFICATE_SIZE,
};
pub use audit::{AuditLog, AuditRecord, AUDIT_RECORD_SIZE, DEFAULT_LOG_CAPACITY, LOG_BATCH_SIZE};
pub use command::{Command, Instruction, Reply, CLA, COMMAND_HEADER_SIZE};
pub use config::{DeviceConfig, DEFAULT_MAX_RECORD_SIZE, DEFAULT_PIN_TRIES};
pub use error::{sw, DeviceError};
pub use image::{DeviceImage, IMAGE_VERSION};
pub use pin::{
    OwnerPin, PinError, PinSlots, DEFAULT_PIN, DEFAULT_PUK_TRIES, MAX_PIN_SIZE, MAX_PIN_SLOTS,
    MIN_PIN_SIZE,
};

/// Card resets needed to complete a reset-to-factory
pub const RESET_TO_FACTORY_COUNT: u8 = 5;
/// Protocol and applet version reported by get-status
pub const PROTOCOL_VERSION: (u8, u8) = (0, 1);
pub const APPLET_VERSION: (u8, u8) = (0, 1);

pub struct Device {
    pub(crate) config: DeviceConfig,
    pub(crate) identity: SecretKey,
    pub(crate) storage_key: StorageKey,
    pub(crate) store: ObjectStore,
    pub(crate) pins: PinSlots,
    pub(crate) audit: AuditLog,
    pub(crate) pki: PkiState,
    pub(crate) card_label: Vec<u8>,
    pub(crate) setup_done: bool,
    pub(crate) option_flags: u16,
    pub(crate) reset_counter: u8,

    // transient
    pub(crate) channel: SecureChannel,
    pub(crate) lock: Option<TransferLock>,
    /// Some command other than reset-to-factory ran since the card reset
    pub(crate) command_seen: bool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("authentikey", &self.identity.public())
            .field("store", &self.store)
            .field("setup_done", &self.setup_done)
            .field("channel", &self.channel)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Provision a factory-fresh device with new keys
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let identity = SecretKey::generate()?;
        let storage_key =
            StorageKey::generate().map_err(|e| anyhow::anyhow!("storage key: {}", e))?;
        let pins = PinSlots::new(config.default_pin_tries)?;
        tracing::info!(authentikey = %identity.public().to_hex(), "device provisioned");
        Ok(Device {
            store: ObjectStore::new(config.store_capacity),
            audit: AuditLog::new(config.log_capacity),
            config,
            identity,
            storage_key,
            pins,
            pki: PkiState::default(),
            card_label: Vec::new(),
            setup_done: false,
            option_flags: 0,
            reset_counter: RESET_TO_FACTORY_COUNT,
            channel: SecureChannel::new(),
            lock: None,
            command_seen: false,
        })
    }

    /// Restore a device from its non-volatile state
    pub fn from_image(image: &DeviceImage) -> Result<Self, DeviceError> {
        if image.version != IMAGE_VERSION {
            return Err(anyhow::anyhow!("unsupported device image version {}", image.version).into());
        }
        let identity = SecretKey::from_bytes(&image.identity)?;
        tracing::debug!(objects = image.store.len(), "device restored from image");
        Ok(Device {
            config: image.config.clone(),
            identity,
            storage_key: image.storage_key.clone(),
            store: image.store.clone(),
            pins: image.pins.clone(),
            audit: image.audit.clone(),
            pki: image.pki.clone(),
            card_label: image.card_label.clone(),
            setup_done: image.setup_done,
            option_flags: image.option_flags,
            reset_counter: image.reset_counter,
            channel: SecureChannel::new(),
            lock: None,
            command_seen: false,
        })
    }

    /// Snapshot the non-volatile state
    pub fn image(&self) -> DeviceImage {
        let identity = self.identity.to_bytes();
        DeviceImage {
            version: IMAGE_VERSION,
            config: self.config.clone(),
            identity: *identity,
            storage_key: self.storage_key.clone(),
            store: self.store.clone(),
            pins: self.pins.clone(),
            audit: self.audit.clone(),
            pki: self.pki.clone(),
            card_label: self.card_label.clone(),
            setup_done: self.setup_done,
            option_flags: self.option_flags,
            reset_counter: self.reset_counter,
        }
    }

    /// Card reset: drop the channel, any transfer and every login
    pub fn reset(&mut self) {
        self.deselect();
        self.command_seen = false;
    }

    /// The host selected another application
    pub fn deselect(&mut self) {
        self.channel.close();
        self.abort_transfer();
        self.pins.logout_all();
        tracing::debug!("device deselected");
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn authentikey(&self) -> PublicKey {
        self.identity.public()
    }

    pub fn is_setup_done(&self) -> bool {
        self.setup_done
    }

    pub fn option_flags(&self) -> u16 {
        self.option_flags
    }

    /// Drop the transfer in flight, if any, and clear its buffers
    pub(crate) fn abort_transfer(&mut self) -> bool {
        match self.lock.take() {
            Some(lock) => {
                lock.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_transfer_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub(crate) fn require_pin0(&self) -> Result<(), DeviceError> {
        if !self.pins.is_validated(0) {
            return Err(DeviceError::Unauthorized);
        }
        Ok(())
    }

    pub(crate) fn load_record(&self, id: u16) -> Result<(ObjectHandle, StoredRecord), DeviceError> {
        let handle = self
            .store
            .find(STORE_TYPE_TAG, id)
            .ok_or(DeviceError::NotFound(id))?;
        let record = StoredRecord::from_bytes(self.store.data(&handle)?)?;
        Ok((handle, record))
    }

    /// Allocate and write a new record, returning its id
    pub(crate) fn store_record(&mut self, record: &StoredRecord) -> Result<u16, DeviceError> {
        let bytes = record.to_bytes();
        if bytes.len() > self.config.max_record_size {
            return Err(TransferError::DataTooLong {
                size: bytes.len(),
                max: self.config.max_record_size,
            }
            .into());
        }
        let handle = self.store.create_next(STORE_TYPE_TAG, bytes.len())?;
        self.store.write(&handle, 0, &bytes)?;
        Ok(handle.id())
    }

    /// Rewrite the header of an existing record in place
    pub(crate) fn rewrite_header(
        &mut self,
        handle: &ObjectHandle,
        record: &StoredRecord,
    ) -> Result<(), DeviceError> {
        let header = record.header.encode();
        self.store.write(handle, 0, &header)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fresh_device() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        assert!(!device.is_setup_done());
        assert!(!device.has_transfer_lock());
        assert!(device.store().is_empty());
        assert_eq!(device.pins.tries(0), (3, 0));
    }

    #[test]
    fn test_image_round_trip() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        device.card_label = b"mine".to_vec();
        device.pins.verify(0, DEFAULT_PIN).unwrap();

        let image = device.image();
        let bytes = bincode::serialize(&image).unwrap();
        let image: DeviceImage = bincode::deserialize(&bytes).unwrap();
        let restored = Device::from_image(&image).unwrap();

        assert_eq!(restored.authentikey(), device.authentikey());
        assert_eq!(restored.storage_key, device.storage_key);
        assert_eq!(restored.card_label, b"mine");
        // logins are transient
        assert!(!restored.pins.is_validated(0));
    }

    #[test]
    fn test_image_version_is_checked() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let mut image = device.image();
        image.version = 9;
        assert!(Device::from_image(&image).is_err());
    }
}
