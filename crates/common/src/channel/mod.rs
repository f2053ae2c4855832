//! Host to device secure channel
//!
//! # Protocol Overview
//!
//! 1. **Initiate**: the host sends an uncompressed secp256k1 public key. The
//!    device answers with the x-coordinate of a fresh ephemeral key, a
//!    signature by that ephemeral key, and a signature by its long-term
//!    identity key binding the two together.
//! 2. **Derive**: both sides run ECDH and derive an AES-128 key and an
//!    HMAC-SHA1 key with the `"sc_key"`/`"sc_mac"` contexts.
//! 3. **Exchange**: every command travels as
//!    `iv(16) | len(2) | ciphertext | mac_len(2) | mac(20)` and every reply as
//!    `iv(16) | len(2) | ciphertext`.
//!
//! # Replay Protection
//!
//! IVs are `random_prefix(12) | counter(4)`. Host counters are odd and must
//! strictly increase; the device answers with `counter + 1` so the two
//! directions never share an IV under the same key. See [`AntiReplayCounter`].

mod counter;
mod secure_channel;

pub use counter::{
    compose_iv, iv_counter, AntiReplayCounter, ReplayError, IV_COUNTER_SIZE, IV_PREFIX_SIZE,
};
pub use secure_channel::{ChannelError, Envelope, SecureChannel};
