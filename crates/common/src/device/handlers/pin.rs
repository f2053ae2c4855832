use crate::device::audit::AuditRecord;
use crate::device::command::{Command, Instruction};
use crate::device::error::{sw, DeviceError};
use crate::device::pin::{PinError, MAX_PIN_SLOTS, MIN_PIN_SIZE};
use crate::device::Device;

use super::Reader;

impl Device {
    /// Surface a PIN result, logging wrong attempts
    fn audited_pin(
        &mut self,
        ins: Instruction,
        result: Result<(), PinError>,
    ) -> Result<Vec<u8>, DeviceError> {
        if let Err(PinError::WrongPin { remaining }) = &result {
            tracing::warn!(?ins, remaining, "wrong pin presented");
            let status = sw::PIN_FAILED | u16::from(*remaining & 0x0F);
            self.audit
                .append(AuditRecord::new(ins.byte(), None, None, status));
        }
        result?;
        Ok(Vec::new())
    }

    fn existing_slot(&self, cmd: &Command<'_>) -> Result<u8, DeviceError> {
        if !self.pins.exists(cmd.p1) {
            return Err(DeviceError::IncorrectP1(cmd.p1));
        }
        if cmd.p2 != 0 {
            return Err(DeviceError::IncorrectP2(cmd.p2));
        }
        Ok(cmd.p1)
    }

    /// P1 slot, P2 tries, data `len | pin | len | puk`
    #[tracing::instrument(skip_all, fields(slot = cmd.p1))]
    pub(crate) fn create_pin(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        let slot = cmd.p1;
        if slot as usize >= MAX_PIN_SLOTS || self.pins.exists(slot) {
            return Err(DeviceError::IncorrectP1(slot));
        }
        if cmd.p2 == 0 {
            return Err(DeviceError::IncorrectP2(cmd.p2));
        }
        if cmd.data.len() < MIN_PIN_SIZE {
            return Err(DeviceError::InvalidParameter("pin data too short"));
        }
        let mut reader = Reader::new(cmd.data);
        let pin = reader.length_prefixed()?;
        let puk = reader.length_prefixed()?;
        if reader.remaining() != 0 {
            return Err(DeviceError::InvalidParameter("trailing pin data"));
        }
        self.pins.create(slot, cmd.p2, pin, puk)?;
        tracing::debug!("pin created");
        Ok(Vec::new())
    }

    #[tracing::instrument(skip_all, fields(slot = cmd.p1))]
    pub(crate) fn verify_pin(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        let slot = self.existing_slot(cmd)?;
        let result = self.pins.verify(slot, cmd.data);
        self.audited_pin(Instruction::VerifyPin, result)
    }

    /// Data `len | old | len | new`
    #[tracing::instrument(skip_all, fields(slot = cmd.p1))]
    pub(crate) fn change_pin(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        let slot = self.existing_slot(cmd)?;
        let mut reader = Reader::new(cmd.data);
        let old = reader.length_prefixed()?;
        let new = reader.length_prefixed()?;
        let result = self.pins.change(slot, old, new);
        self.audited_pin(Instruction::ChangePin, result)
    }

    /// Data is the PUK of the slot; only valid while the PIN is blocked
    #[tracing::instrument(skip_all, fields(slot = cmd.p1))]
    pub(crate) fn unblock_pin(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        let slot = self.existing_slot(cmd)?;
        let result = self.pins.unblock(slot, cmd.data);
        self.audited_pin(Instruction::UnblockPin, result)
    }

    /// Bit mask of the slots holding a PIN
    pub(crate) fn list_pins(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        if cmd.p1 != 0 {
            return Err(DeviceError::IncorrectP1(cmd.p1));
        }
        if cmd.p2 != 0 {
            return Err(DeviceError::IncorrectP2(cmd.p2));
        }
        if cmd.data.len() != 2 {
            return Err(DeviceError::WrongLength);
        }
        Ok(self.pins.mask().to_be_bytes().to_vec())
    }
}
