use std::convert::TryFrom;

use crate::crypto::SessionKeys;
use crate::device::command::{Command, Instruction};
use crate::device::error::{sw, DeviceError};
use crate::device::Device;
use crate::record::{
    generated_body, ExportPolicy, Origin, SecretHeader, SecretType, StoredRecord, MAX_LABEL_SIZE,
    MAX_SEED_SIZE, MIN_SEED_SIZE, TWO_FA_SIZE,
};
use crate::transfer::{
    peer_session_keys, ExportRequest, ExportSession, ImportRequest, ImportSession, Phase,
    TransferError, TransferLock, TransportMode,
};

/// `label_len | label`; empty data means no label
fn parse_label(data: &[u8]) -> Result<&[u8], DeviceError> {
    let Some((&len, rest)) = data.split_first() else {
        return Ok(&[]);
    };
    let len = len as usize;
    if len > MAX_LABEL_SIZE || rest.len() < len {
        return Err(DeviceError::InvalidParameter("invalid label"));
    }
    Ok(&rest[..len])
}

fn id_and_fingerprint(id: u16, record: &StoredRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + record.header.fingerprint.len());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&record.header.fingerprint);
    out
}

impl Device {
    /// P1 seed size, P2 export policy, data `label_len | label`
    #[tracing::instrument(skip_all, fields(size = cmd.p1, policy = cmd.p2))]
    pub(crate) fn generate_master_seed(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        self.audit
            .begin(Instruction::GenerateMasterSeed.byte(), None, None);
        let size = cmd.p1 as usize;
        if !(MIN_SEED_SIZE..=MAX_SEED_SIZE).contains(&size) {
            return Err(DeviceError::IncorrectP1(cmd.p1));
        }
        let policy = ExportPolicy::try_from(cmd.p2).map_err(|_| DeviceError::IncorrectP2(cmd.p2))?;
        self.generate_secret(SecretType::MasterSeed, size, policy, cmd.data)
    }

    /// P2 export policy, data `label_len | label`
    #[tracing::instrument(skip_all, fields(policy = cmd.p2))]
    pub(crate) fn generate_2fa(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        self.audit.begin(Instruction::Generate2fa.byte(), None, None);
        let policy = ExportPolicy::try_from(cmd.p2).map_err(|_| DeviceError::IncorrectP2(cmd.p2))?;
        self.generate_secret(SecretType::TwoFactorSecret, TWO_FA_SIZE, policy, cmd.data)
    }

    fn generate_secret(
        &mut self,
        secret_type: SecretType,
        size: usize,
        policy: ExportPolicy,
        data: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        let label = parse_label(data)?;
        let header = SecretHeader::new(secret_type, Origin::OnCard, policy, label)?;
        let body = generated_body(size).map_err(|e| anyhow::anyhow!("{}", e))?;
        let record = StoredRecord::seal(header, &body, &self.storage_key);
        let id = self.store_record(&record)?;
        self.audit.complete(Some(id), None, sw::OK);
        tracing::info!(id, %secret_type, "secret generated");
        Ok(id_and_fingerprint(id, &record))
    }

    fn counterpart_keys(&self, pubkey_id: u16) -> Result<SessionKeys, DeviceError> {
        let (_, record) = self.load_record(pubkey_id)?;
        let counterpart = record.open_public_key(&self.storage_key)?;
        Ok(peer_session_keys(&self.identity, &counterpart)?)
    }

    /// P1 transport mode, P2 phase
    #[tracing::instrument(skip_all, fields(mode = cmd.p1, phase = cmd.p2))]
    pub(crate) fn import_secret(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        let mode = TransportMode::try_from(cmd.p1)?;
        match Phase::try_from(cmd.p2)? {
            Phase::Init => {
                self.audit.begin(Instruction::ImportSecret.byte(), None, None);
                let request = ImportRequest::parse(mode, cmd.data)?;
                let keys = request
                    .pubkey_id()
                    .map(|pubkey_id| self.counterpart_keys(pubkey_id))
                    .transpose()?;
                let session = ImportSession::begin(&request, keys, self.config.max_record_size)?;
                self.abort_transfer();
                self.lock = Some(TransferLock::Import(Box::new(session)));
                tracing::debug!(?mode, "import started");
                Ok(Vec::new())
            }
            Phase::Process => {
                let Some(TransferLock::Import(session)) = self.lock.as_mut() else {
                    return Err(TransferError::NoLock.into());
                };
                if session.mode() != mode {
                    return Err(TransferError::InvalidMode(cmd.p1).into());
                }
                session.process(cmd.data, &self.storage_key)?;
                Ok(Vec::new())
            }
            Phase::Finalize => {
                let Some(TransferLock::Import(session)) = self.lock.take() else {
                    return Err(TransferError::NoLock.into());
                };
                if session.mode() != mode {
                    return Err(TransferError::InvalidMode(cmd.p1).into());
                }
                let pubkey_id = session.pubkey_id();
                let record = session.finalize(cmd.data, &self.storage_key)?;
                let id = self.store_record(&record)?;
                self.audit.complete(Some(id), pubkey_id, sw::OK);
                tracing::info!(id, secret_type = %record.header.secret_type, ?mode, "secret imported");
                Ok(id_and_fingerprint(id, &record))
            }
        }
    }

    /// P1 transport mode, P2 phase
    #[tracing::instrument(skip_all, fields(mode = cmd.p1, phase = cmd.p2))]
    pub(crate) fn export_secret(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        let mode = TransportMode::try_from(cmd.p1)?;
        match Phase::try_from(cmd.p2)? {
            Phase::Init => self.export_init(mode, cmd.data),
            Phase::Process => {
                let Some(TransferLock::Export(session)) = self.lock.as_mut() else {
                    return Err(TransferError::NoLock.into());
                };
                if session.mode() != mode {
                    return Err(TransferError::InvalidMode(cmd.p1).into());
                }
                let chunk = session.next_chunk(&self.storage_key, &self.identity)?;
                if chunk.last {
                    let (id, pubkey_id) = (session.id(), session.pubkey_id());
                    self.lock = None;
                    self.audit.complete(Some(id), pubkey_id, sw::OK);
                    tracing::info!(id, ?mode, "secret exported");
                }
                Ok(chunk.data)
            }
            Phase::Finalize => Err(TransferError::InvalidPhase(cmd.p2).into()),
        }
    }

    fn export_init(&mut self, mode: TransportMode, data: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let request = ExportRequest::parse(mode, data)?;
        self.audit.begin(
            Instruction::ExportSecret.byte(),
            Some(request.id),
            request.pubkey_id,
        );
        let (handle, mut record) = self.load_record(request.id)?;
        ExportSession::authorize(mode, &record.header)?;
        let keys = request
            .pubkey_id
            .map(|pubkey_id| self.counterpart_keys(pubkey_id))
            .transpose()?;

        // every check passed, count the export
        match mode {
            TransportMode::Plain => record.header.counters.bump_plain(),
            TransportMode::SecurePeer => record.header.counters.bump_secure(),
        }
        self.rewrite_header(&handle, &record)?;
        if let Some(pubkey_id) = request.pubkey_id {
            let (pubkey_handle, mut pubkey_record) = self.load_record(pubkey_id)?;
            pubkey_record.header.counters.bump_pubkey();
            self.rewrite_header(&pubkey_handle, &pubkey_record)?;
            if pubkey_id == request.id {
                record.header.counters = pubkey_record.header.counters;
            }
        }

        let (session, response) = ExportSession::open(&request, mode, &record, keys)?;
        self.abort_transfer();
        self.lock = Some(TransferLock::Export(Box::new(session)));
        Ok(response)
    }

    /// P2 = 1 restarts the listing, P2 = 2 continues it.
    /// Each step returns `id(2) | header | label`.
    pub(crate) fn list_secret_headers(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        let handle = match cmd.p2 {
            1 => self.store.first(),
            2 => self.store.next(),
            other => return Err(DeviceError::IncorrectP2(other)),
        }
        .ok_or(DeviceError::SequenceEnd)?;
        let bytes = self.store.data(&handle)?;
        let (_, header_len) = SecretHeader::decode(bytes)?;
        let mut out = Vec::with_capacity(2 + header_len);
        out.extend_from_slice(&handle.id().to_be_bytes());
        out.extend_from_slice(&bytes[..header_len]);
        Ok(out)
    }

    /// P2 = 1 returns `total | available | [newest]`, P2 = 2 older records
    pub(crate) fn print_logs(&mut self, cmd: &Command<'_>) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        match cmd.p2 {
            1 => Ok(self.audit.first()),
            2 => Ok(self.audit.next_batch()),
            other => Err(DeviceError::IncorrectP2(other)),
        }
    }

    /// Single-record deletion does not exist; only reset-to-factory erases
    pub(crate) fn reset_secret(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.require_pin0()?;
        Err(DeviceError::Unsupported)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DeviceConfig, CLA, DEFAULT_PIN};

    fn command(ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Command<'_> {
        Command {
            cla: CLA,
            ins: ins.byte(),
            p1,
            p2,
            data,
        }
    }

    fn logged_in() -> Device {
        let mut device = Device::new(DeviceConfig::default()).unwrap();
        device.pins.verify(0, DEFAULT_PIN).unwrap();
        device
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label(&[]).unwrap(), b"");
        assert_eq!(parse_label(b"\x04test").unwrap(), b"test");
        assert!(parse_label(b"\x05test").is_err());
        let mut long = vec![128u8];
        long.extend_from_slice(&[b'a'; 128]);
        assert!(parse_label(&long).is_err());
    }

    #[test]
    fn test_generate_seed() {
        let mut device = logged_in();
        let response = device
            .generate_master_seed(&command(Instruction::GenerateMasterSeed, 32, 1, b"\x04test"))
            .unwrap();
        assert_eq!(response.len(), 6);
        let id = u16::from_be_bytes([response[0], response[1]]);

        let (_, record) = device.load_record(id).unwrap();
        assert_eq!(record.header.secret_type, SecretType::MasterSeed);
        assert_eq!(record.header.origin, Origin::OnCard);
        assert_eq!(record.header.label(), b"test");
        assert_eq!(&response[2..], &record.header.fingerprint);
        let body = record.open(&device.storage_key).unwrap();
        assert_eq!(body.len(), 33);
        assert_eq!(body[0], 32);

        let log = device.audit.latest().unwrap();
        assert_eq!((log.ins, log.id1, log.status), (0xA0, id, 0x9000));
    }

    #[test]
    fn test_generate_rejects_bad_parameters() {
        let mut device = logged_in();
        assert!(matches!(
            device.generate_master_seed(&command(Instruction::GenerateMasterSeed, 15, 1, &[])),
            Err(DeviceError::IncorrectP1(15))
        ));
        assert!(matches!(
            device.generate_master_seed(&command(Instruction::GenerateMasterSeed, 65, 1, &[])),
            Err(DeviceError::IncorrectP1(65))
        ));
        assert!(matches!(
            device.generate_2fa(&command(Instruction::Generate2fa, 0, 5, &[])),
            Err(DeviceError::IncorrectP2(5))
        ));

        let mut locked = Device::new(DeviceConfig::default()).unwrap();
        assert!(matches!(
            locked.generate_2fa(&command(Instruction::Generate2fa, 0, 1, &[])),
            Err(DeviceError::Unauthorized)
        ));
    }

    #[test]
    fn test_generate_2fa() {
        let mut device = logged_in();
        let response = device
            .generate_2fa(&command(Instruction::Generate2fa, 0, 4, &[]))
            .unwrap();
        let id = u16::from_be_bytes([response[0], response[1]]);
        let (_, record) = device.load_record(id).unwrap();
        assert_eq!(record.header.secret_type, SecretType::TwoFactorSecret);
        assert_eq!(record.header.export_policy, ExportPolicy::Forbidden);
        assert_eq!(record.open(&device.storage_key).unwrap().len(), 21);
    }

    #[test]
    fn test_list_headers() {
        let mut device = logged_in();
        for label in [&b"\x01a"[..], b"\x02bb"] {
            device
                .generate_master_seed(&command(Instruction::GenerateMasterSeed, 16, 1, label))
                .unwrap();
        }
        let list = |device: &mut Device, p2| {
            device.list_secret_headers(&command(Instruction::ListSecretHeaders, 0, p2, &[]))
        };
        let first = list(&mut device, 1).unwrap();
        assert_eq!(first.len(), 2 + 13 + 1);
        assert_eq!(first[2], 0x10);
        let second = list(&mut device, 2).unwrap();
        assert_eq!(&second[second.len() - 2..], b"bb");
        assert!(matches!(
            list(&mut device, 2),
            Err(DeviceError::SequenceEnd)
        ));
        assert!(matches!(
            list(&mut device, 3),
            Err(DeviceError::IncorrectP2(3))
        ));
    }

    #[test]
    fn test_export_counts_only_successful_attempts() {
        let mut device = logged_in();
        let response = device
            .generate_master_seed(&command(Instruction::GenerateMasterSeed, 16, 2, &[]))
            .unwrap();
        let id = [response[0], response[1]];

        // secure-only refuses plain export
        let err = device
            .export_secret(&command(Instruction::ExportSecret, 1, 1, &id))
            .unwrap_err();
        assert_eq!(err.status_word(), 0x9C31);
        let (_, record) = device.load_record(u16::from_be_bytes(id)).unwrap();
        assert_eq!(record.header.counters.plain, 0);

        let err = device
            .export_secret(&command(Instruction::ExportSecret, 1, 1, &[0x12, 0x34]))
            .unwrap_err();
        assert_eq!(err.status_word(), 0x9C08);
    }

    #[test]
    fn test_plain_export_bumps_counter() {
        let mut device = logged_in();
        let response = device
            .generate_master_seed(&command(Instruction::GenerateMasterSeed, 32, 1, b"\x04test"))
            .unwrap();
        let init = device
            .export_secret(&command(Instruction::ExportSecret, 1, 1, &response[..2]))
            .unwrap();
        assert_eq!(&init[..2], &response[..2]);
        // nb_export_plain sits right after type, origin and policy
        assert_eq!(init[2 + 3], 1);
        assert_eq!(&init[2 + 6..2 + 10], &response[2..]);
        assert!(device.has_transfer_lock());

        let step = device
            .export_secret(&command(Instruction::ExportSecret, 1, 2, &[]))
            .unwrap();
        assert_eq!(u16::from_be_bytes([step[0], step[1]]), 33);
        assert!(!device.has_transfer_lock());
        assert_eq!(device.audit.latest().unwrap().status, 0x9000);
    }

    #[test]
    fn test_reset_secret_is_unsupported() {
        let mut device = logged_in();
        assert!(matches!(
            device.reset_secret(),
            Err(DeviceError::Unsupported)
        ));
    }
}
