use zeroize::Zeroizing;

use crate::crypto::{
    PublicKey, Signature, FINGERPRINT_SIZE, HMAC_SHA1_SIZE, IV_SIZE, SHA256_SIZE,
};
use crate::device::{
    sw, AuditLog, AuditRecord, Command, Device, Instruction, Reply, CHALLENGE_SIZE,
};
use crate::record::{
    public_key_body, ExportPolicy, Origin, SecretHeader, SecretType, AUTH_HEADER_SIZE,
};
use crate::transfer::{Phase, TransportMode, CHUNK_SIZE};

use super::channel::recover_signed_key;
use super::{HostChannel, HostError};

/// Largest certificate slice moved per command
const CERTIFICATE_CHUNK_SIZE: usize = 128;

/// Tries and codes for one PIN slot during setup
#[derive(Clone, Copy)]
pub struct PinSetup<'a> {
    pub pin_tries: u8,
    pub puk_tries: u8,
    pub pin: &'a [u8],
    pub puk: &'a [u8],
}

/// Decoded get-status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub protocol_version: (u8, u8),
    pub applet_version: (u8, u8),
    pub pin0_tries: u8,
    pub puk0_tries: u8,
    pub pin1_tries: u8,
    pub puk1_tries: u8,
    pub needs_2fa: bool,
    pub seeded: bool,
    pub setup_done: bool,
    pub needs_secure_channel: bool,
}

impl DeviceStatus {
    fn parse(data: &[u8]) -> Result<Self, HostError> {
        let b: &[u8; 12] = data
            .get(..12)
            .and_then(|d| d.try_into().ok())
            .ok_or(HostError::Malformed("short status"))?;
        Ok(DeviceStatus {
            protocol_version: (b[0], b[1]),
            applet_version: (b[2], b[3]),
            pin0_tries: b[4],
            puk0_tries: b[5],
            pin1_tries: b[6],
            puk1_tries: b[7],
            needs_2fa: b[8] != 0,
            seeded: b[9] != 0,
            setup_done: b[10] != 0,
            needs_secure_channel: b[11] != 0,
        })
    }
}

/// `id | fingerprint`, returned by generate and import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretRef {
    pub id: u16,
    pub fingerprint: [u8; FINGERPRINT_SIZE],
}

impl SecretRef {
    fn parse(data: &[u8]) -> Result<Self, HostError> {
        if data.len() < 2 + FINGERPRINT_SIZE {
            return Err(HostError::Malformed("short id and fingerprint"));
        }
        let mut fingerprint = [0u8; FINGERPRINT_SIZE];
        fingerprint.copy_from_slice(&data[2..2 + FINGERPRINT_SIZE]);
        Ok(SecretRef {
            id: u16::from_be_bytes([data[0], data[1]]),
            fingerprint,
        })
    }
}

/// One entry of the header listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub id: u16,
    pub header: SecretHeader,
}

/// Everything print-logs returns, newest record first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSummary {
    pub total: u16,
    pub available: u16,
    pub records: Vec<AuditRecord>,
}

/// What authenticates an exported payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTrailer {
    /// DER signature by the exporting device over `auth_header | plaintext`
    Signature(Vec<u8>),
    /// Secure-peer IV and the MAC over `SHA-256(auth_header | ciphertext)`
    Mac {
        iv: [u8; IV_SIZE],
        mac: [u8; HMAC_SHA1_SIZE],
    },
}

/// A secret as it left the device
#[derive(Clone)]
pub struct ExportedSecret {
    pub id: u16,
    pub header: SecretHeader,
    /// Plaintext in plain mode, ciphertext for the peer in secure-peer mode
    pub payload: Zeroizing<Vec<u8>>,
    pub trailer: ExportTrailer,
}

impl std::fmt::Debug for ExportedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedSecret")
            .field("id", &self.id)
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl ExportedSecret {
    /// Check the signature of a plain export against the exporting device
    pub fn verify(&self, authentikey: &PublicKey) -> Result<(), HostError> {
        let ExportTrailer::Signature(der) = &self.trailer else {
            return Err(HostError::Malformed("not a plain export"));
        };
        let signature = Signature::from_der(der)?;
        let mut message = Zeroizing::new(Vec::with_capacity(AUTH_HEADER_SIZE + self.payload.len()));
        message.extend_from_slice(&self.header.auth_header());
        message.extend_from_slice(&self.payload);
        authentikey
            .verify(&message, &signature)
            .map_err(|_| HostError::IdentityMismatch)
    }
}

fn split_exported_chunk(data: &[u8]) -> Result<(&[u8], &[u8]), HostError> {
    let len = data
        .get(..2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or(HostError::Malformed("missing chunk length"))?;
    let chunk = data
        .get(2..2 + len)
        .ok_or(HostError::Malformed("chunk shorter than its length"))?;
    Ok((chunk, &data[2 + len..]))
}

fn push_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
    out.extend_from_slice(chunk);
}

/// Typed host driving an in-process [`Device`].
///
/// Once [`Card::open_channel`] succeeds every command except status, the
/// handshake and reset-to-factory travels wrapped.
pub struct Card<'a> {
    device: &'a mut Device,
    channel: Option<HostChannel>,
}

impl<'a> Card<'a> {
    pub fn new(device: &'a mut Device) -> Self {
        Card {
            device,
            channel: None,
        }
    }

    pub fn device(&mut self) -> &mut Device {
        self.device
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel.as_ref().map_or(false, HostChannel::is_open)
    }

    /// Run the handshake; with `expected` the device identity is checked too
    pub fn open_channel(&mut self, expected: Option<&PublicKey>) -> Result<(), HostError> {
        let mut channel = HostChannel::new()?;
        let reply = self.device.process(&channel.initiate_command()?);
        if !reply.is_ok() {
            return Err(HostError::Status(reply.status));
        }
        channel.complete(&reply.data, expected)?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Model a card reset: both ends lose the channel
    pub fn reset(&mut self) {
        self.device.reset();
        self.channel = None;
    }

    /// Send a command as-is, wrapping it when the channel is open
    pub fn transmit(
        &mut self,
        ins: Instruction,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> Result<Reply, HostError> {
        let apdu = Command::encode(ins, p1, p2, data)?;
        match self.channel.as_mut() {
            Some(channel) if channel.is_open() => {
                let wrapped = channel.wrap(&apdu)?;
                let reply = self.device.process(&wrapped);
                channel.unwrap_reply(reply)
            }
            _ => Ok(self.device.process(&apdu)),
        }
    }

    fn send(&mut self, ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, HostError> {
        let reply = self.transmit(ins, p1, p2, data)?;
        if !reply.is_ok() {
            return Err(HostError::Status(reply.status));
        }
        Ok(reply.data)
    }

    pub fn status(&mut self) -> Result<DeviceStatus, HostError> {
        let data = self.send(Instruction::GetStatus, 0, 0, &[])?;
        DeviceStatus::parse(&data)
    }

    pub fn setup(
        &mut self,
        default_pin: &[u8],
        pin0: &PinSetup<'_>,
        pin1: &PinSetup<'_>,
        option_flags: Option<u16>,
    ) -> Result<(), HostError> {
        let mut data = Zeroizing::new(Vec::with_capacity(96));
        data.push(default_pin.len() as u8);
        data.extend_from_slice(default_pin);
        for slot in [pin0, pin1] {
            data.extend_from_slice(&[slot.pin_tries, slot.puk_tries, slot.pin.len() as u8]);
            data.extend_from_slice(slot.pin);
            data.push(slot.puk.len() as u8);
            data.extend_from_slice(slot.puk);
        }
        data.extend_from_slice(&[0u8; 7]);
        if let Some(flags) = option_flags {
            data.extend_from_slice(&flags.to_be_bytes());
        }
        self.send(Instruction::Setup, 0, 0, &data)?;
        Ok(())
    }

    pub fn verify_pin(&mut self, slot: u8, pin: &[u8]) -> Result<(), HostError> {
        self.send(Instruction::VerifyPin, slot, 0, pin)?;
        Ok(())
    }

    pub fn change_pin(&mut self, slot: u8, old: &[u8], new: &[u8]) -> Result<(), HostError> {
        let mut data = Zeroizing::new(Vec::with_capacity(2 + old.len() + new.len()));
        for pin in [old, new] {
            data.push(pin.len() as u8);
            data.extend_from_slice(pin);
        }
        self.send(Instruction::ChangePin, slot, 0, &data)?;
        Ok(())
    }

    pub fn unblock_pin(&mut self, slot: u8, puk: &[u8]) -> Result<(), HostError> {
        self.send(Instruction::UnblockPin, slot, 0, puk)?;
        Ok(())
    }

    pub fn create_pin(&mut self, slot: u8, tries: u8, pin: &[u8], puk: &[u8]) -> Result<(), HostError> {
        let mut data = Zeroizing::new(Vec::with_capacity(2 + pin.len() + puk.len()));
        for code in [pin, puk] {
            data.push(code.len() as u8);
            data.extend_from_slice(code);
        }
        self.send(Instruction::CreatePin, slot, tries, &data)?;
        Ok(())
    }

    /// Bit mask of the slots holding a PIN
    pub fn list_pins(&mut self) -> Result<u16, HostError> {
        let data = self.send(Instruction::ListPins, 0, 0, &[0, 0])?;
        data.get(..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or(HostError::Malformed("short pin mask"))
    }

    pub fn logout_all(&mut self) -> Result<(), HostError> {
        self.send(Instruction::LogoutAll, 0, 0, &[])?;
        Ok(())
    }

    pub fn set_card_label(&mut self, label: &[u8]) -> Result<(), HostError> {
        let mut data = Vec::with_capacity(1 + label.len());
        if !label.is_empty() {
            data.push(label.len() as u8);
            data.extend_from_slice(label);
        }
        self.send(Instruction::CardLabel, 0, 0, &data)?;
        Ok(())
    }

    pub fn card_label(&mut self) -> Result<Vec<u8>, HostError> {
        let data = self.send(Instruction::CardLabel, 0, 1, &[])?;
        let (&len, label) = data
            .split_first()
            .ok_or(HostError::Malformed("empty card label reply"))?;
        label
            .get(..len as usize)
            .map(<[u8]>::to_vec)
            .ok_or(HostError::Malformed("card label shorter than its length"))
    }

    /// Fetch the device identity; also checks it signed the open channel
    pub fn authentikey(&mut self) -> Result<PublicKey, HostError> {
        let data = self.send(Instruction::GetAuthentikey, 0, 0, &[])?;
        let (key, _) = recover_signed_key(&data)?;
        if let Some(channel) = self.channel.as_ref().filter(|c| c.is_open()) {
            channel.verify_identity(&key)?;
        }
        Ok(key)
    }

    pub fn pki_pubkey(&mut self) -> Result<PublicKey, HostError> {
        let data = self.send(Instruction::ExportPkiPubkey, 0, 0, &[])?;
        Ok(PublicKey::from_uncompressed(&data)?)
    }

    pub fn sign_csr(&mut self, digest: &[u8; SHA256_SIZE]) -> Result<Signature, HostError> {
        let data = self.send(Instruction::SignCsr, 0, 0, digest)?;
        Ok(Signature::from_der(&data)?)
    }

    pub fn import_certificate(&mut self, certificate: &[u8]) -> Result<(), HostError> {
        let size = u16::try_from(certificate.len())
            .map_err(|_| HostError::Malformed("certificate too large"))?;
        self.send(Instruction::ImportCertificate, 0, Phase::Init as u8, &size.to_be_bytes())?;
        for (index, chunk) in certificate.chunks(CERTIFICATE_CHUNK_SIZE).enumerate() {
            let mut data = Vec::with_capacity(4 + chunk.len());
            data.extend_from_slice(&((index * CERTIFICATE_CHUNK_SIZE) as u16).to_be_bytes());
            push_chunk(&mut data, chunk);
            self.send(Instruction::ImportCertificate, 0, Phase::Process as u8, &data)?;
        }
        Ok(())
    }

    pub fn export_certificate(&mut self) -> Result<Vec<u8>, HostError> {
        let data = self.send(Instruction::ExportCertificate, 0, Phase::Init as u8, &[])?;
        let size = data
            .get(..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or(HostError::Malformed("short certificate size"))?;
        let mut certificate = Vec::with_capacity(size);
        while certificate.len() < size {
            let len = (size - certificate.len()).min(CERTIFICATE_CHUNK_SIZE);
            let mut request = (certificate.len() as u16).to_be_bytes().to_vec();
            request.extend_from_slice(&(len as u16).to_be_bytes());
            let chunk = self.send(Instruction::ExportCertificate, 0, Phase::Process as u8, &request)?;
            if chunk.len() != len {
                return Err(HostError::Malformed("certificate chunk of unexpected size"));
            }
            certificate.extend_from_slice(&chunk);
        }
        Ok(certificate)
    }

    pub fn lock_pki(&mut self) -> Result<(), HostError> {
        self.send(Instruction::LockPki, 0, 0, &[])?;
        Ok(())
    }

    /// Returns the device nonce and its signature over
    /// `"Challenge:" | nonce | challenge`
    pub fn challenge_response(
        &mut self,
        challenge: &[u8; CHALLENGE_SIZE],
    ) -> Result<([u8; CHALLENGE_SIZE], Signature), HostError> {
        let data = self.send(Instruction::ChallengeResponse, 0, 0, challenge)?;
        let nonce: [u8; CHALLENGE_SIZE] = data
            .get(..CHALLENGE_SIZE)
            .and_then(|n| n.try_into().ok())
            .ok_or(HostError::Malformed("short challenge response"))?;
        let (der, _) = split_exported_chunk(&data[CHALLENGE_SIZE..])?;
        Ok((nonce, Signature::from_der(der)?))
    }

    #[tracing::instrument(skip(self, label))]
    pub fn generate_master_seed(
        &mut self,
        size: u8,
        policy: ExportPolicy,
        label: &[u8],
    ) -> Result<SecretRef, HostError> {
        let data = label_data(label)?;
        let reply = self.send(Instruction::GenerateMasterSeed, size, policy as u8, &data)?;
        SecretRef::parse(&reply)
    }

    #[tracing::instrument(skip(self, label))]
    pub fn generate_2fa(&mut self, policy: ExportPolicy, label: &[u8]) -> Result<SecretRef, HostError> {
        let data = label_data(label)?;
        let reply = self.send(Instruction::Generate2fa, 0, policy as u8, &data)?;
        SecretRef::parse(&reply)
    }

    /// Import `payload` in plaintext, `chunk_size` bytes per command
    pub fn import_plain(
        &mut self,
        header: &SecretHeader,
        payload: &[u8],
        chunk_size: usize,
    ) -> Result<SecretRef, HostError> {
        let mode = TransportMode::Plain as u8;
        self.send(Instruction::ImportSecret, mode, Phase::Init as u8, &header.encode())?;
        self.send_import_chunks(TransportMode::Plain, payload, chunk_size, &[])
    }

    /// Store `key` as a public-key record, the counterpart of secure-peer transfers
    pub fn import_public_key(&mut self, key: &PublicKey, label: &[u8]) -> Result<SecretRef, HostError> {
        let header = SecretHeader::new(
            SecretType::PublicKey,
            Origin::PlainImport,
            ExportPolicy::Allowed,
            label,
        )?;
        self.import_plain(&header, &public_key_body(key), CHUNK_SIZE)
    }

    /// Import a secure-peer export of another device, sealed for `pubkey_id`
    pub fn import_secure(
        &mut self,
        exported: &ExportedSecret,
        pubkey_id: u16,
    ) -> Result<SecretRef, HostError> {
        let ExportTrailer::Mac { iv, mac } = &exported.trailer else {
            return Err(HostError::Malformed("not a secure-peer export"));
        };
        let mut init = exported.header.encode();
        init.extend_from_slice(&pubkey_id.to_be_bytes());
        init.extend_from_slice(iv);
        let mode = TransportMode::SecurePeer as u8;
        self.send(Instruction::ImportSecret, mode, Phase::Init as u8, &init)?;

        let mut trailer = Vec::with_capacity(1 + HMAC_SHA1_SIZE);
        trailer.push(HMAC_SHA1_SIZE as u8);
        trailer.extend_from_slice(mac);
        self.send_import_chunks(TransportMode::SecurePeer, &exported.payload, CHUNK_SIZE, &trailer)
    }

    /// `PROCESS` every chunk but the last, which goes out with `FINALIZE`
    fn send_import_chunks(
        &mut self,
        mode: TransportMode,
        payload: &[u8],
        chunk_size: usize,
        trailer: &[u8],
    ) -> Result<SecretRef, HostError> {
        let chunk_size = chunk_size.clamp(1, CHUNK_SIZE);
        let mode = mode as u8;
        let mut chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
        let last = chunks.pop().unwrap_or(&[]);
        for chunk in chunks {
            let mut data = Zeroizing::new(Vec::with_capacity(2 + chunk.len()));
            push_chunk(&mut data, chunk);
            self.send(Instruction::ImportSecret, mode, Phase::Process as u8, &data)?;
        }
        let mut data = Zeroizing::new(Vec::with_capacity(2 + last.len() + trailer.len()));
        push_chunk(&mut data, last);
        data.extend_from_slice(trailer);
        let reply = self.send(Instruction::ImportSecret, mode, Phase::Finalize as u8, &data)?;
        SecretRef::parse(&reply)
    }

    /// Export a secret in plaintext; verify it with [`ExportedSecret::verify`]
    pub fn export_plain(&mut self, id: u16) -> Result<ExportedSecret, HostError> {
        self.export(TransportMode::Plain, &id.to_be_bytes())
    }

    /// Export a secret encrypted for the device whose key is record `pubkey_id`
    pub fn export_secure(&mut self, id: u16, pubkey_id: u16) -> Result<ExportedSecret, HostError> {
        let mut data = id.to_be_bytes().to_vec();
        data.extend_from_slice(&pubkey_id.to_be_bytes());
        self.export(TransportMode::SecurePeer, &data)
    }

    fn export(&mut self, mode: TransportMode, request: &[u8]) -> Result<ExportedSecret, HostError> {
        let init = self.send(Instruction::ExportSecret, mode as u8, Phase::Init as u8, request)?;
        let id = init
            .get(..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or(HostError::Malformed("short export header"))?;
        let (header, consumed) = SecretHeader::decode(&init[2..])?;
        let iv: Option<[u8; IV_SIZE]> = match mode {
            TransportMode::Plain => None,
            TransportMode::SecurePeer => {
                let start = 2 + consumed;
                let iv = init
                    .get(start..start + IV_SIZE)
                    .and_then(|iv| iv.try_into().ok())
                    .ok_or(HostError::Malformed("missing export iv"))?;
                Some(iv)
            }
        };

        let mut payload = Zeroizing::new(Vec::new());
        let trailer = loop {
            let step = Zeroizing::new(self.send(
                Instruction::ExportSecret,
                mode as u8,
                Phase::Process as u8,
                &[],
            )?);
            let (chunk, rest) = split_exported_chunk(&step)?;
            payload.extend_from_slice(chunk);
            if rest.is_empty() {
                continue;
            }
            let (tail, _) = split_exported_chunk(rest)?;
            break match iv {
                None => ExportTrailer::Signature(tail.to_vec()),
                Some(iv) => ExportTrailer::Mac {
                    iv,
                    mac: tail
                        .try_into()
                        .map_err(|_| HostError::Malformed("unexpected mac size"))?,
                },
            };
        };
        Ok(ExportedSecret {
            id,
            header,
            payload,
            trailer,
        })
    }

    pub fn list_headers(&mut self) -> Result<Vec<SecretEntry>, HostError> {
        let mut entries = Vec::new();
        let mut p2 = Phase::Init as u8;
        loop {
            let data = match self.send(Instruction::ListSecretHeaders, 0, p2, &[]) {
                Ok(data) => data,
                Err(HostError::Status(sw::SEQUENCE_END)) => return Ok(entries),
                Err(e) => return Err(e),
            };
            let id = data
                .get(..2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(HostError::Malformed("short header entry"))?;
            let (header, _) = SecretHeader::decode(&data[2..])?;
            entries.push(SecretEntry { id, header });
            p2 = Phase::Process as u8;
        }
    }

    pub fn logs(&mut self) -> Result<AuditSummary, HostError> {
        let first = self.send(Instruction::PrintLogs, 0, Phase::Init as u8, &[])?;
        if first.len() < 4 {
            return Err(HostError::Malformed("short log summary"));
        }
        let total = u16::from_be_bytes([first[0], first[1]]);
        let available = u16::from_be_bytes([first[2], first[3]]);
        let mut records = AuditLog::decode_batch(&first[4..]);
        while records.len() < available as usize {
            let batch = self.send(Instruction::PrintLogs, 0, Phase::Process as u8, &[])?;
            if batch.is_empty() {
                break;
            }
            records.extend(AuditLog::decode_batch(&batch));
        }
        Ok(AuditSummary {
            total,
            available,
            records,
        })
    }

    pub fn reset_secret(&mut self, id: u16) -> Result<(), HostError> {
        self.send(Instruction::ResetSecret, 0, 0, &id.to_be_bytes())?;
        Ok(())
    }

    /// One reset-to-factory step, always sent in plain. Returns the status:
    /// `0xFF00 | remaining` while counting down, `0xFF00` once erased and
    /// `0xFFFF` when the sequence was interrupted.
    pub fn reset_to_factory_step(&mut self) -> Result<u16, HostError> {
        let reply = self.device.process(&Command::encode(Instruction::ResetToFactory, 0, 0, &[])?);
        Ok(reply.status)
    }
}

fn label_data(label: &[u8]) -> Result<Vec<u8>, HostError> {
    let len = u8::try_from(label.len()).map_err(|_| HostError::Malformed("label too long"))?;
    let mut data = Vec::with_capacity(1 + label.len());
    data.push(len);
    data.extend_from_slice(label);
    Ok(data)
}
