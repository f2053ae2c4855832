use crate::device::command::{Command, Instruction, Reply};
use crate::device::error::{sw, DeviceError};
use crate::device::pin::check_policy;
use crate::device::{Device, APPLET_VERSION, PROTOCOL_VERSION, RESET_TO_FACTORY_COUNT};

use super::Reader;

/// Longest card label
pub const MAX_CARD_LABEL_SIZE: usize = 64;
const SETUP_RFU_SIZE: usize = 7;

struct SetupPin<'a> {
    pin_tries: u8,
    puk_tries: u8,
    pin: &'a [u8],
    puk: &'a [u8],
}

impl<'a> SetupPin<'a> {
    /// `pin_tries | puk_tries | pin_len | pin | puk_len | puk`
    fn read(reader: &mut Reader<'a>) -> Result<Self, DeviceError> {
        let pin_tries = reader.u8()?;
        let puk_tries = reader.u8()?;
        let pin = reader.length_prefixed()?;
        let puk = reader.length_prefixed()?;
        check_policy(pin)?;
        check_policy(puk)?;
        if pin_tries == 0 || puk_tries == 0 {
            return Err(DeviceError::InvalidParameter("try limit must be non-zero"));
        }
        Ok(SetupPin {
            pin_tries,
            puk_tries,
            pin,
            puk,
        })
    }
}

impl Device {
    #[tracing::instrument(skip_all)]
    pub(crate) fn setup(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        if self.setup_done {
            return Err(DeviceError::SetupAlreadyDone);
        }
        let mut reader = Reader::new(cmd.data);
        let default_pin = reader.length_prefixed()?;
        self.pins.verify(0, default_pin)?;

        let slot0 = SetupPin::read(&mut reader)?;
        let slot1 = SetupPin::read(&mut reader)?;
        reader.bytes(SETUP_RFU_SIZE)?;
        let option_flags = if reader.remaining() >= 2 {
            reader.u16()?
        } else {
            0
        };

        for (slot, pins) in [(0u8, &slot0), (1u8, &slot1)] {
            self.pins
                .install(slot, pins.pin, pins.pin_tries, pins.puk, pins.puk_tries)?;
        }
        self.option_flags = option_flags;
        self.setup_done = true;
        self.pki.lock();
        tracing::info!(option_flags, "setup complete");
        Ok(Vec::new())
    }

    /// `proto(2) | applet(2) | pin0 | puk0 | pin1 | puk1 | needs_2fa | seeded | setup_done | needs_channel`
    pub(crate) fn status(&self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        if cmd.p1 != 0 {
            return Err(DeviceError::IncorrectP1(cmd.p1));
        }
        if cmd.p2 != 0 {
            return Err(DeviceError::IncorrectP2(cmd.p2));
        }
        let (pin0, puk0, pin1, puk1) = if self.setup_done {
            let (pin0, puk0) = self.pins.tries(0);
            let (pin1, puk1) = self.pins.tries(1);
            (pin0, puk0, pin1, puk1)
        } else {
            (0, 0, 0, 0)
        };
        Ok(vec![
            PROTOCOL_VERSION.0,
            PROTOCOL_VERSION.1,
            APPLET_VERSION.0,
            APPLET_VERSION.1,
            pin0,
            puk0,
            pin1,
            puk1,
            0,
            1,
            self.setup_done as u8,
            self.config.require_secure_channel as u8,
        ])
    }

    /// P2 = 0 sets the label from `len | label` (empty data clears it),
    /// P2 = 1 returns `len | label`
    pub(crate) fn card_label(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        match cmd.p2 {
            0 => {
                if cmd.data.is_empty() {
                    self.card_label.clear();
                    return Ok(Vec::new());
                }
                let mut reader = Reader::new(cmd.data);
                let label = reader.length_prefixed()?;
                if label.len() > MAX_CARD_LABEL_SIZE {
                    return Err(DeviceError::InvalidParameter("card label too long"));
                }
                self.card_label = label.to_vec();
                Ok(Vec::new())
            }
            1 => {
                let mut out = Vec::with_capacity(1 + self.card_label.len());
                out.push(self.card_label.len() as u8);
                out.extend_from_slice(&self.card_label);
                Ok(out)
            }
            other => Err(DeviceError::IncorrectP2(other)),
        }
    }

    pub(crate) fn logout_all(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.pins.logout_all();
        Ok(Vec::new())
    }

    /// One step of the reset-to-factory sequence.
    ///
    /// Only counts when it is the first command after a card reset; any
    /// other command in between restarts the sequence.
    pub(crate) fn reset_to_factory_step(&mut self) -> Result<Reply, DeviceError> {
        if self.command_seen {
            self.reset_counter = RESET_TO_FACTORY_COUNT;
            tracing::debug!("reset-to-factory sequence aborted");
            return Ok(Reply::status(sw::RESET_ABORTED));
        }
        self.command_seen = true;
        self.reset_counter = self.reset_counter.saturating_sub(1);
        if self.reset_counter == 0 {
            self.reset_counter = RESET_TO_FACTORY_COUNT;
            self.reset_to_factory()?;
            return Ok(Reply::status(sw::RESET_TO_FACTORY));
        }
        tracing::debug!(remaining = self.reset_counter, "reset-to-factory armed");
        Ok(Reply::status(sw::RESET_TO_FACTORY | u16::from(self.reset_counter)))
    }

    fn reset_to_factory(&mut self) -> Result<(), DeviceError> {
        let ins = Instruction::ResetToFactory.byte();
        self.audit.begin(ins, None, None);
        self.abort_transfer();
        self.store.reset(true);
        self.card_label.clear();
        self.pins.restore_default()?;
        self.setup_done = false;
        self.audit.complete(None, None, sw::OK);
        tracing::info!("device reset to factory state");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DeviceConfig, DEFAULT_PIN};

    fn command(ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Command<'_> {
        Command {
            cla: crate::device::CLA,
            ins: ins.byte(),
            p1,
            p2,
            data,
        }
    }

    fn setup_data(default_pin: &[u8]) -> Vec<u8> {
        let mut data = vec![default_pin.len() as u8];
        data.extend_from_slice(default_pin);
        for (pin, puk) in [(&b"1234"[..], &b"12345678"[..]), (&b"5678"[..], &b"87654321"[..])] {
            data.extend_from_slice(&[5, 2, pin.len() as u8]);
            data.extend_from_slice(pin);
            data.push(puk.len() as u8);
            data.extend_from_slice(puk);
        }
        data.extend_from_slice(&[0u8; SETUP_RFU_SIZE]);
        data
    }

    #[test]
    fn test_setup_installs_pins() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        let data = setup_data(DEFAULT_PIN);
        device.setup(&command(Instruction::Setup, 0, 0, &data)).unwrap();
        assert!(device.setup_done);
        assert!(device.pki.is_locked());
        assert_eq!(device.pins.tries(0), (5, 2));
        assert_eq!(device.pins.tries(1), (5, 2));
        device.pins.verify(0, b"1234").unwrap();

        assert!(matches!(
            device.setup(&command(Instruction::Setup, 0, 0, &data)),
            Err(DeviceError::SetupAlreadyDone)
        ));
    }

    #[test]
    fn test_setup_requires_default_pin() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        let data = setup_data(b"Muscle01");
        let err = device
            .setup(&command(Instruction::Setup, 0, 0, &data))
            .unwrap_err();
        assert_eq!(err.status_word(), 0x63C2);
        assert!(!device.setup_done);

        let truncated = &setup_data(DEFAULT_PIN)[..20];
        assert!(matches!(
            device.setup(&command(Instruction::Setup, 0, 0, truncated)),
            Err(DeviceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_status_before_setup_hides_tries() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let status = device
            .status(&command(Instruction::GetStatus, 0, 0, &[]))
            .unwrap();
        assert_eq!(status, vec![0, 1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 1]);
        assert!(device
            .status(&command(Instruction::GetStatus, 1, 0, &[]))
            .is_err());
    }

    #[test]
    fn test_card_label() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        assert!(matches!(
            device.card_label(&command(Instruction::CardLabel, 0, 1, &[])),
            Err(DeviceError::Unauthorized)
        ));
        device.pins.verify(0, DEFAULT_PIN).unwrap();
        device
            .card_label(&command(Instruction::CardLabel, 0, 0, b"\x04card"))
            .unwrap();
        assert_eq!(
            device
                .card_label(&command(Instruction::CardLabel, 0, 1, &[]))
                .unwrap(),
            b"\x04card"
        );
        let long = [65u8; 66];
        assert!(device
            .card_label(&command(Instruction::CardLabel, 0, 0, &long))
            .is_err());
        device
            .card_label(&command(Instruction::CardLabel, 0, 0, &[]))
            .unwrap();
        assert!(device.card_label.is_empty());
        assert!(matches!(
            device.card_label(&command(Instruction::CardLabel, 0, 2, &[])),
            Err(DeviceError::IncorrectP2(2))
        ));
    }

    #[test]
    fn test_reset_sequence() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        device.card_label = b"x".to_vec();
        for remaining in (1..RESET_TO_FACTORY_COUNT).rev() {
            device.reset();
            let reply = device.reset_to_factory_step().unwrap();
            assert_eq!(reply.status, 0xFF00 | u16::from(remaining));
        }
        // a second reset without a card reset in between aborts
        assert_eq!(device.reset_to_factory_step().unwrap().status, 0xFFFF);
        assert_eq!(device.reset_counter, RESET_TO_FACTORY_COUNT);
        assert_eq!(device.card_label, b"x");

        for _ in 0..RESET_TO_FACTORY_COUNT {
            device.reset();
            device.reset_to_factory_step().unwrap();
        }
        assert!(device.card_label.is_empty());
        let latest = device.audit.latest().unwrap();
        assert_eq!(latest.ins, 0xFF);
        assert_eq!(latest.status, 0x9000);
    }
}
