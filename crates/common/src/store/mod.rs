//! Encrypted object storage
//!
//! The device keeps every secret in a single fixed-size arena. Each object
//! is addressed by `(type_tag, id)` and holds `header | label | ciphertext`,
//! where only the ciphertext is secret: it is the PKCS#7 padded payload
//! encrypted under the device's [`StorageKey`](crate::crypto::StorageKey).
//!
//! There is no compaction and no single-object delete; space is only ever
//! reclaimed by a full reset.

mod object_store;

pub use object_store::{ObjectHandle, ObjectStore, StoreError, DEFAULT_STORE_CAPACITY};
