use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::ct_eq;
use crate::error::ErrorKind;

/// Number of PIN (and PUK) slots
pub const MAX_PIN_SLOTS: usize = 8;
pub const MIN_PIN_SIZE: usize = 4;
pub const MAX_PIN_SIZE: usize = 16;
/// PIN 0 of a factory-fresh device
pub const DEFAULT_PIN: &[u8] = b"Muscle00";
/// Tries given to every PUK created outside of setup
pub const DEFAULT_PUK_TRIES: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("wrong pin, {remaining} tries left")]
    WrongPin { remaining: u8 },
    #[error("pin is blocked")]
    Blocked,
    #[error("pin of {0} bytes is outside {MIN_PIN_SIZE}..={MAX_PIN_SIZE}")]
    Policy(usize),
    #[error("pin is not blocked")]
    NotBlocked,
    #[error("no pin in slot {0}")]
    NoSuchSlot(u8),
    #[error("pin slot {0} is already in use")]
    SlotInUse(u8),
}

impl PinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PinError::WrongPin { .. } | PinError::Blocked => ErrorKind::Authentication,
            PinError::Policy(_)
            | PinError::NotBlocked
            | PinError::NoSuchSlot(_)
            | PinError::SlotInUse(_) => ErrorKind::Protocol,
        }
    }
}

pub fn check_policy(pin: &[u8]) -> Result<(), PinError> {
    if !(MIN_PIN_SIZE..=MAX_PIN_SIZE).contains(&pin.len()) {
        return Err(PinError::Policy(pin.len()));
    }
    Ok(())
}

/// A PIN or PUK with a try counter.
///
/// A wrong attempt consumes a try; a correct one restores them all. Once no
/// tries are left every attempt fails with [`PinError::Blocked`], even with
/// the right code.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct OwnerPin {
    code: Vec<u8>,
    max_tries: u8,
    tries_left: u8,
    #[serde(skip)]
    validated: bool,
}

impl std::fmt::Debug for OwnerPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerPin")
            .field("max_tries", &self.max_tries)
            .field("tries_left", &self.tries_left)
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}

impl OwnerPin {
    pub fn new(code: &[u8], max_tries: u8) -> Result<Self, PinError> {
        check_policy(code)?;
        Ok(OwnerPin {
            code: code.to_vec(),
            max_tries,
            tries_left: max_tries,
            validated: false,
        })
    }

    pub fn tries_left(&self) -> u8 {
        self.tries_left
    }

    pub fn is_blocked(&self) -> bool {
        self.tries_left == 0
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn check(&mut self, candidate: &[u8]) -> Result<(), PinError> {
        if self.is_blocked() {
            self.validated = false;
            return Err(PinError::Blocked);
        }
        if ct_eq(&self.code, candidate) {
            self.tries_left = self.max_tries;
            self.validated = true;
            Ok(())
        } else {
            self.tries_left -= 1;
            self.validated = false;
            Err(PinError::WrongPin {
                remaining: self.tries_left,
            })
        }
    }

    /// Replace the code; the try counter is restored and the login dropped
    pub fn update(&mut self, code: &[u8]) -> Result<(), PinError> {
        check_policy(code)?;
        self.code.zeroize();
        self.code = code.to_vec();
        self.tries_left = self.max_tries;
        self.validated = false;
        Ok(())
    }

    pub fn logout(&mut self) {
        self.validated = false;
    }

    pub fn unblock(&mut self) {
        self.tries_left = self.max_tries;
        self.validated = false;
    }
}

/// The PIN slots of a device with their unblock codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinSlots {
    pins: Vec<Option<OwnerPin>>,
    puks: Vec<Option<OwnerPin>>,
}

impl PinSlots {
    /// Factory state: only PIN 0, set to [`DEFAULT_PIN`]
    pub fn new(default_tries: u8) -> Result<Self, PinError> {
        let mut pins = vec![None; MAX_PIN_SLOTS];
        pins[0] = Some(OwnerPin::new(DEFAULT_PIN, default_tries)?);
        Ok(PinSlots {
            pins,
            puks: vec![None; MAX_PIN_SLOTS],
        })
    }

    pub fn exists(&self, slot: u8) -> bool {
        self.pin(slot).is_ok()
    }

    pub fn pin(&self, slot: u8) -> Result<&OwnerPin, PinError> {
        self.pins
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or(PinError::NoSuchSlot(slot))
    }

    fn pin_mut(&mut self, slot: u8) -> Result<&mut OwnerPin, PinError> {
        self.pins
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(PinError::NoSuchSlot(slot))
    }

    pub fn puk(&self, slot: u8) -> Option<&OwnerPin> {
        self.puks.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn is_validated(&self, slot: u8) -> bool {
        self.pin(slot).map(OwnerPin::is_validated).unwrap_or(false)
    }

    /// Tries left for the PIN and the PUK of `slot`, zero when absent
    pub fn tries(&self, slot: u8) -> (u8, u8) {
        (
            self.pin(slot).map(OwnerPin::tries_left).unwrap_or(0),
            self.puk(slot).map(OwnerPin::tries_left).unwrap_or(0),
        )
    }

    /// Bit `n` set when slot `n` holds a PIN
    pub fn mask(&self) -> u16 {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, pin)| pin.is_some())
            .fold(0u16, |mask, (slot, _)| mask | (1 << slot))
    }

    pub fn logout_all(&mut self) {
        for pin in self.pins.iter_mut().flatten() {
            pin.logout();
        }
    }

    /// Install a PIN and its PUK, replacing whatever the slot held
    pub fn install(
        &mut self,
        slot: u8,
        pin: &[u8],
        pin_tries: u8,
        puk: &[u8],
        puk_tries: u8,
    ) -> Result<(), PinError> {
        if slot as usize >= MAX_PIN_SLOTS {
            return Err(PinError::NoSuchSlot(slot));
        }
        let pin = OwnerPin::new(pin, pin_tries)?;
        let puk = OwnerPin::new(puk, puk_tries)?;
        self.pins[slot as usize] = Some(pin);
        self.puks[slot as usize] = Some(puk);
        Ok(())
    }

    /// Create a PIN in an unused slot
    pub fn create(&mut self, slot: u8, tries: u8, pin: &[u8], puk: &[u8]) -> Result<(), PinError> {
        if self.exists(slot) {
            return Err(PinError::SlotInUse(slot));
        }
        self.install(slot, pin, tries, puk, DEFAULT_PUK_TRIES)
    }

    pub fn verify(&mut self, slot: u8, candidate: &[u8]) -> Result<(), PinError> {
        check_policy(candidate)?;
        self.pin_mut(slot)?.check(candidate)
    }

    pub fn change(&mut self, slot: u8, old: &[u8], new: &[u8]) -> Result<(), PinError> {
        check_policy(old)?;
        check_policy(new)?;
        let pin = self.pin_mut(slot)?;
        pin.check(old)?;
        pin.update(new)
    }

    /// Restore a blocked PIN with its PUK
    pub fn unblock(&mut self, slot: u8, puk: &[u8]) -> Result<(), PinError> {
        if !self.pin(slot)?.is_blocked() {
            return Err(PinError::NotBlocked);
        }
        check_policy(puk)?;
        let code = self
            .puks
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(PinError::NoSuchSlot(slot))?;
        code.check(puk)?;
        self.pin_mut(slot)?.unblock();
        Ok(())
    }

    /// Put PIN 0 back to [`DEFAULT_PIN`], keeping its try limit
    pub fn restore_default(&mut self) -> Result<(), PinError> {
        self.pin_mut(0)?.update(DEFAULT_PIN)
    }
}
