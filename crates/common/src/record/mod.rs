//! Secret record encoding
//!
//! Every stored secret is `header(13) | label | ciphertext`. The first twelve
//! header bytes form the *authenticated header*: plain exports sign it and
//! secure-peer transfers MAC it together with the payload. The label and its
//! length byte are left out so a record can be relabelled between export and
//! import without breaking either.

mod header;
mod payload;

pub use header::{
    CodecError, ExportCounters, ExportPolicy, Origin, RawHeader, SecretHeader, SecretType,
    AUTH_HEADER_SIZE, HEADER_SIZE, MAX_LABEL_SIZE, OFFSET_EXPORT_POLICY, OFFSET_FINGERPRINT,
    OFFSET_LABEL_SIZE, OFFSET_NB_EXPORT_PLAIN, OFFSET_NB_EXPORT_PUBKEY, OFFSET_NB_EXPORT_SECURE,
    OFFSET_ORIGIN, OFFSET_RFU1, OFFSET_RFU2, OFFSET_TYPE,
};
pub use payload::{
    generated_body, parse_public_key_body, public_key_body, StoredRecord, MAX_SEED_SIZE,
    MIN_SEED_SIZE, TWO_FA_SIZE,
};

/// Object store type tag used for every secret
pub const STORE_TYPE_TAG: u8 = 0;
