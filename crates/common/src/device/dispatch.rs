use zeroize::Zeroizing;

use crate::error::ErrorKind;
use crate::transfer::TransferLock;

use super::command::{Command, Instruction, Reply, CLA};
use super::error::DeviceError;
use super::{Device, RESET_TO_FACTORY_COUNT};

impl Device {
    /// Run one command and produce its reply.
    ///
    /// Failures come back as a bare status word; they also abort any
    /// transfer in progress and settle a pending audit record.
    pub fn process(&mut self, apdu: &[u8]) -> Reply {
        match self.process_plain(apdu) {
            Ok(reply) => reply,
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: DeviceError) -> Reply {
        let status = e.status_word();
        if self.abort_transfer() {
            tracing::debug!("transfer aborted");
        }
        self.audit.fail_pending(status);
        let sw = format!("{:04X}", status);
        match e.kind() {
            ErrorKind::Authentication | ErrorKind::Integrity | ErrorKind::Replay => {
                tracing::warn!(error = %e, %sw, "command failed")
            }
            _ => tracing::debug!(error = %e, %sw, "command failed"),
        }
        Reply::status(status)
    }

    fn process_plain(&mut self, apdu: &[u8]) -> Result<Reply, DeviceError> {
        let cmd = Command::parse(apdu)?;
        if cmd.cla != CLA {
            return Err(DeviceError::ClaNotSupported);
        }
        if cmd.ins == Instruction::ResetToFactory.byte() {
            return self.reset_to_factory_step();
        }
        self.command_seen = true;
        self.reset_counter = RESET_TO_FACTORY_COUNT;

        match Instruction::try_from(cmd.ins) {
            Ok(Instruction::GetStatus) => Ok(Reply::ok(self.status(&cmd)?)),
            Ok(Instruction::InitiateSecureChannel) => {
                let response = self.channel.initiate(cmd.data, &self.identity)?;
                Ok(Reply::ok(response))
            }
            Ok(Instruction::ProcessSecureChannel) => self.process_wrapped(cmd.data),
            _ if self.config.require_secure_channel => Err(DeviceError::ChannelRequired),
            _ => self.execute(&cmd),
        }
    }

    /// Unwrap a channel message, run the inner command and wrap its reply
    fn process_wrapped(&mut self, data: &[u8]) -> Result<Reply, DeviceError> {
        let plaintext = self.channel.unwrap(data)?;
        let inner = Command::parse(&plaintext)?;
        let Reply { data, status } = self.execute(&inner)?;
        let data = Zeroizing::new(data);
        if data.is_empty() {
            return Ok(Reply::status(status));
        }
        let wrapped = self.channel.wrap(&data)?;
        Ok(Reply {
            data: wrapped,
            status,
        })
    }

    /// Apply the setup and lock gates, then route to the handler
    fn execute(&mut self, cmd: &Command<'_>) -> Result<Reply, DeviceError> {
        let ins = cmd.instruction()?;

        if !self.setup_done
            && ins != Instruction::Setup
            && ins != Instruction::GetStatus
            && (self.pki.is_locked() || !ins.allowed_before_setup())
        {
            return Err(DeviceError::SetupNotDone);
        }

        if let Some(lock) = &self.lock {
            let holder = match lock {
                TransferLock::Import(_) => Instruction::ImportSecret,
                TransferLock::Export(_) => Instruction::ExportSecret,
            };
            if ins != holder {
                tracing::warn!(?ins, ?holder, "command interrupted a transfer");
                return Err(DeviceError::LockError);
            }
        }

        let data = match ins {
            Instruction::Setup => self.setup(cmd)?,
            Instruction::GetStatus => self.status(cmd)?,
            Instruction::CardLabel => self.card_label(cmd)?,
            Instruction::CreatePin => self.create_pin(cmd)?,
            Instruction::VerifyPin => self.verify_pin(cmd)?,
            Instruction::ChangePin => self.change_pin(cmd)?,
            Instruction::UnblockPin => self.unblock_pin(cmd)?,
            Instruction::ListPins => self.list_pins(cmd)?,
            Instruction::LogoutAll => self.logout_all()?,
            Instruction::GetAuthentikey | Instruction::GetAuthentikeyLegacy => {
                self.get_authentikey()?
            }
            Instruction::ImportCertificate => self.import_certificate(cmd)?,
            Instruction::ExportCertificate => self.export_certificate(cmd)?,
            Instruction::SignCsr => self.sign_csr(cmd)?,
            Instruction::ExportPkiPubkey => self.export_pki_pubkey()?,
            Instruction::LockPki => self.lock_pki()?,
            Instruction::ChallengeResponse => self.challenge_response(cmd)?,
            Instruction::GenerateMasterSeed => self.generate_master_seed(cmd)?,
            Instruction::Generate2fa => self.generate_2fa(cmd)?,
            Instruction::ImportSecret => self.import_secret(cmd)?,
            Instruction::ExportSecret => self.export_secret(cmd)?,
            Instruction::ResetSecret => self.reset_secret()?,
            Instruction::ListSecretHeaders => self.list_secret_headers(cmd)?,
            Instruction::PrintLogs => self.print_logs(cmd)?,
            Instruction::InitiateSecureChannel
            | Instruction::ProcessSecureChannel
            | Instruction::ResetToFactory => return Err(DeviceError::InsNotSupported(cmd.ins)),
        };
        Ok(Reply::ok(data))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{sw, DeviceConfig, DEFAULT_PIN};

    fn open_device() -> Device {
        Device::new(DeviceConfig {
            require_secure_channel: false,
            ..Default::default()
        })
        .unwrap()
    }

    fn send(device: &mut Device, ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Reply {
        device.process(&Command::encode(ins, p1, p2, data).unwrap())
    }

    #[test]
    fn test_class_and_instruction_checks() {
        let mut device = open_device();
        assert_eq!(device.process(&[0x00, 0x3C, 0, 0]).status, sw::CLA_NOT_SUPPORTED);
        assert_eq!(device.process(&[0xB0, 0x3C]).status, sw::WRONG_LENGTH);
        // unknown instructions fail before the setup gate
        assert_eq!(device.process(&[0xB0, 0x01, 0, 0]).status, sw::INS_NOT_SUPPORTED);
    }

    #[test]
    fn test_channel_required_by_default() {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        let reply = send(&mut device, Instruction::VerifyPin, 0, 0, DEFAULT_PIN);
        assert_eq!(reply.status, sw::CHANNEL_REQUIRED);
        let status = send(&mut device, Instruction::GetStatus, 0, 0, &[]);
        assert!(status.is_ok());
        assert_eq!(status.data.len(), 12);
        let wrapped = send(&mut device, Instruction::ProcessSecureChannel, 0, 0, &[0u8; 58]);
        assert_eq!(wrapped.status, sw::CHANNEL_UNINITIALIZED);
    }

    #[test]
    fn test_setup_gate() {
        let mut device = open_device();
        let reply = send(&mut device, Instruction::ListSecretHeaders, 0, 1, &[]);
        assert_eq!(reply.status, sw::SETUP_NOT_DONE);
        assert!(send(&mut device, Instruction::VerifyPin, 0, 0, DEFAULT_PIN).is_ok());
        assert!(send(&mut device, Instruction::ExportPkiPubkey, 0, 0, &[]).is_ok());

        assert!(send(&mut device, Instruction::LockPki, 0, 0, &[]).is_ok());
        let reply = send(&mut device, Instruction::VerifyPin, 0, 0, DEFAULT_PIN);
        assert_eq!(reply.status, sw::SETUP_NOT_DONE);
    }

    #[test]
    fn test_plain_channel_off_replies_unwrapped() {
        let mut device = open_device();
        device.setup_done = true;
        assert!(send(&mut device, Instruction::VerifyPin, 0, 0, DEFAULT_PIN).is_ok());
        let reply = send(&mut device, Instruction::GenerateMasterSeed, 32, 1, b"\x04test");
        assert!(reply.is_ok());
        assert_eq!(reply.data.len(), 6);
    }

    #[test]
    fn test_conflicting_command_aborts_transfer() {
        let mut device = open_device();
        device.setup_done = true;
        assert!(send(&mut device, Instruction::VerifyPin, 0, 0, DEFAULT_PIN).is_ok());

        let init = [0x90, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(send(&mut device, Instruction::ImportSecret, 1, 1, &init).is_ok());
        assert!(device.has_transfer_lock());

        let reply = send(&mut device, Instruction::ListSecretHeaders, 0, 1, &[]);
        assert_eq!(reply.status, sw::LOCK_ERROR);
        assert!(!device.has_transfer_lock());
        // the interrupted import is recorded with the lock error
        assert_eq!(device.audit.latest().unwrap().status, sw::LOCK_ERROR);

        let reply = send(&mut device, Instruction::ImportSecret, 1, 3, &[0, 1, 0xAA]);
        assert_eq!(reply.status, sw::LOCK_ERROR);
    }

    #[test]
    fn test_initiate_rejects_short_keys() {
        let mut device = open_device();
        device.setup_done = true;
        let reply = send(&mut device, Instruction::InitiateSecureChannel, 0, 0, &[0u8; 10]);
        assert_eq!(reply.status, sw::WRONG_LENGTH);
        assert!(!device.channel.is_initialized());
    }
}
