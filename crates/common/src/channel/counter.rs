use crate::crypto::IV_SIZE;

/// Random part of a channel IV
pub const IV_PREFIX_SIZE: usize = 12;
/// Big-endian counter part of a channel IV
pub const IV_COUNTER_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("iv does not carry the host direction bit")]
    WrongDirection,
    #[error("stale iv counter {received}, must exceed {stored}")]
    Stale { received: u32, stored: u32 },
    #[error("iv counter space exhausted")]
    Exhausted,
}

/// Counter component of a channel IV
pub fn iv_counter(iv: &[u8; IV_SIZE]) -> u32 {
    let mut counter = [0u8; IV_COUNTER_SIZE];
    counter.copy_from_slice(&iv[IV_PREFIX_SIZE..]);
    u32::from_be_bytes(counter)
}

/// Assemble an IV from its random prefix and counter
pub fn compose_iv(prefix: &[u8; IV_PREFIX_SIZE], counter: u32) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    iv[..IV_PREFIX_SIZE].copy_from_slice(prefix);
    iv[IV_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
    iv
}

/// Monotonic replay guard for one channel.
///
/// Host IVs carry an odd counter that must be strictly greater than the
/// stored value. Accepting a counter `n` moves the stored value to `n + 1`,
/// which is also the counter of the single reply IV the device may use. The
/// host's next counter therefore has to be at least `n + 2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntiReplayCounter {
    stored: u32,
}

impl AntiReplayCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stored = 0;
    }

    pub fn stored(&self) -> u32 {
        self.stored
    }

    /// Check an inbound IV without consuming it; returns its counter
    pub fn check(&self, iv: &[u8; IV_SIZE]) -> Result<u32, ReplayError> {
        if iv[IV_SIZE - 1] & 0x01 == 0 {
            return Err(ReplayError::WrongDirection);
        }
        let received = iv_counter(iv);
        if received <= self.stored {
            return Err(ReplayError::Stale {
                received,
                stored: self.stored,
            });
        }
        if received == u32::MAX {
            return Err(ReplayError::Exhausted);
        }
        Ok(received)
    }

    /// Record `received` as accepted and return the outbound counter
    pub fn accept(&mut self, received: u32) -> Result<u32, ReplayError> {
        if received <= self.stored {
            return Err(ReplayError::Stale {
                received,
                stored: self.stored,
            });
        }
        self.stored = received.checked_add(1).ok_or(ReplayError::Exhausted)?;
        Ok(self.stored)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn iv_with(counter: u32) -> [u8; IV_SIZE] {
        compose_iv(&[0xAA; IV_PREFIX_SIZE], counter)
    }

    #[test]
    fn test_accepts_strictly_increasing_odd_counters() {
        let mut counter = AntiReplayCounter::new();
        for n in [1u32, 3, 7, 9, 1001] {
            let received = counter.check(&iv_with(n)).unwrap();
            assert_eq!(received, n);
            assert_eq!(counter.accept(received).unwrap(), n + 1);
        }
        assert_eq!(counter.stored(), 1002);
    }

    #[test]
    fn test_rejects_replayed_and_stale_counters() {
        let mut counter = AntiReplayCounter::new();
        let received = counter.check(&iv_with(5)).unwrap();
        counter.accept(received).unwrap();

        assert_eq!(
            counter.check(&iv_with(5)),
            Err(ReplayError::Stale {
                received: 5,
                stored: 6
            })
        );
        assert!(counter.check(&iv_with(3)).is_err());
        assert!(counter.accept(6).is_err());
        assert!(counter.check(&iv_with(7)).is_ok());
    }

    #[test]
    fn test_rejects_even_counters() {
        let counter = AntiReplayCounter::new();
        assert_eq!(counter.check(&iv_with(2)), Err(ReplayError::WrongDirection));
    }

    #[test]
    fn test_counter_exhaustion() {
        let counter = AntiReplayCounter::new();
        assert_eq!(
            counter.check(&iv_with(u32::MAX)),
            Err(ReplayError::Exhausted)
        );
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut counter = AntiReplayCounter::new();
        counter.accept(41).unwrap();
        counter.reset();
        assert_eq!(counter.stored(), 0);
        assert!(counter.check(&iv_with(1)).is_ok());
    }

    #[test]
    fn test_iv_layout() {
        let iv = compose_iv(&[1u8; IV_PREFIX_SIZE], 0x01020304);
        assert_eq!(&iv[..IV_PREFIX_SIZE], &[1u8; IV_PREFIX_SIZE]);
        assert_eq!(&iv[IV_PREFIX_SIZE..], &[1, 2, 3, 4]);
        assert_eq!(iv_counter(&iv), 0x01020304);
    }
}
