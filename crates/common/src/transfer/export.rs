use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::{
    pkcs7_unpad, random_bytes, CbcEncryptor, SecretError, SessionKeys, StorageKey, IV_SIZE,
};
use crate::device::AttestationSigner;
use crate::record::{SecretHeader, StoredRecord};

use super::{TransferError, TransportMode, CHUNK_SIZE};

/// An export `INIT` payload: `id(2) | [pubkey_id(2)]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub id: u16,
    pub pubkey_id: Option<u16>,
}

impl ExportRequest {
    pub fn parse(mode: TransportMode, data: &[u8]) -> Result<Self, TransferError> {
        if data.len() < 2 {
            return Err(TransferError::Malformed("missing secret id"));
        }
        let id = u16::from_be_bytes([data[0], data[1]]);
        let pubkey_id = match mode {
            TransportMode::Plain => None,
            TransportMode::SecurePeer => {
                if data.len() < 4 {
                    return Err(TransferError::Malformed("missing counterpart id"));
                }
                Some(u16::from_be_bytes([data[2], data[3]]))
            }
        };
        Ok(ExportRequest { id, pubkey_id })
    }
}

enum ExportStream {
    /// SHA-256 of `auth_header | plaintext`, signed by the identity at the end
    Plain { digest: Sha256 },
    SecurePeer {
        keys: SessionKeys,
        encryptor: CbcEncryptor,
        mac_hash: Sha256,
    },
}

/// One `PROCESS` step of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportChunk {
    pub data: Vec<u8>,
    /// The export is complete and the lock can be released
    pub last: bool,
}

/// Export in progress.
///
/// Holds the at-rest ciphertext of the record and hands it out in
/// [`CHUNK_SIZE`] slices, decrypting each slice under the storage key only
/// when it is requested.
pub struct ExportSession {
    id: u16,
    mode: TransportMode,
    pubkey_id: Option<u16>,
    ciphertext: Vec<u8>,
    offset: usize,
    stream: ExportStream,
}

impl std::fmt::Debug for ExportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("pubkey_id", &self.pubkey_id)
            .field("offset", &self.offset)
            .field("size", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

impl ExportSession {
    /// Whether `header` may leave the device in `mode`
    pub fn authorize(mode: TransportMode, header: &SecretHeader) -> Result<(), TransferError> {
        let allowed = match mode {
            TransportMode::Plain => header.export_policy.allows_plain(),
            TransportMode::SecurePeer => header.export_policy.allows_secure(),
        };
        if !allowed {
            tracing::warn!(policy = ?header.export_policy, ?mode, "export refused by policy");
            return Err(TransferError::PolicyViolation);
        }
        Ok(())
    }

    /// Start exporting `record`, whose counters must already be bumped.
    ///
    /// Returns the session and the `INIT` response:
    /// `id(2) | header(13) | label | [iv(16)]`.
    pub fn open(
        request: &ExportRequest,
        mode: TransportMode,
        record: &StoredRecord,
        peer_keys: Option<SessionKeys>,
    ) -> Result<(Self, Vec<u8>), TransferError> {
        Self::authorize(mode, &record.header)?;
        let auth_header = record.header.auth_header();

        let mut response = Vec::with_capacity(2 + record.header.encoded_len() + IV_SIZE);
        response.extend_from_slice(&request.id.to_be_bytes());
        record.header.encode_into(&mut response);

        let stream = match (mode, peer_keys) {
            (TransportMode::Plain, _) => {
                let mut digest = Sha256::new();
                digest.update(auth_header);
                ExportStream::Plain { digest }
            }
            (TransportMode::SecurePeer, Some(keys)) => {
                let mut iv = [0u8; IV_SIZE];
                random_bytes(&mut iv).map_err(|e| anyhow::anyhow!("{}", e))?;
                response.extend_from_slice(&iv);
                let mut mac_hash = Sha256::new();
                mac_hash.update(auth_header);
                ExportStream::SecurePeer {
                    encryptor: keys.encryptor(&iv),
                    keys,
                    mac_hash,
                }
            }
            (TransportMode::SecurePeer, None) => {
                return Err(anyhow::anyhow!("secure export started without session keys").into())
            }
        };

        tracing::debug!(id = request.id, ?mode, "export started");
        let session = ExportSession {
            id: request.id,
            mode,
            pubkey_id: request.pubkey_id,
            ciphertext: record.ciphertext.clone(),
            offset: 0,
            stream,
        };
        Ok((session, response))
    }

    /// Reset the running hash, which may still buffer plaintext
    pub fn wipe(&mut self) {
        match &mut self.stream {
            ExportStream::Plain { digest } => Digest::reset(digest),
            ExportStream::SecurePeer { mac_hash, .. } => Digest::reset(mac_hash),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn pubkey_id(&self) -> Option<u16> {
        self.pubkey_id
    }

    /// Produce the next `len(2) | chunk` step.
    ///
    /// The step that sees at most [`CHUNK_SIZE`] bytes left is the last one
    /// and carries the trailer: `sig_len(2) | signature` in plain mode,
    /// `mac_len(2) | mac(20)` in secure-peer mode.
    pub fn next_chunk<S: AttestationSigner + ?Sized>(
        &mut self,
        key: &StorageKey,
        signer: &S,
    ) -> Result<ExportChunk, TransferError> {
        let remaining = self.ciphertext.len() - self.offset;
        let last = remaining <= CHUNK_SIZE;
        let take = if last { remaining } else { CHUNK_SIZE };

        let mut chunk = Zeroizing::new(self.ciphertext[self.offset..self.offset + take].to_vec());
        self.offset += take;
        key.decrypt_blocks(&mut chunk)?;

        let mut data = Vec::with_capacity(2 + take + 2 + 72);
        match &mut self.stream {
            ExportStream::Plain { digest } => {
                let len = if last {
                    pkcs7_unpad(&chunk).ok_or(SecretError::Padding)?
                } else {
                    take
                };
                digest.update(&chunk[..len]);
                push_chunk(&mut data, &chunk[..len]);
                if last {
                    let hash: [u8; 32] = std::mem::take(digest).finalize().into();
                    let signature = signer.sign_prehash(&hash)?.to_der();
                    push_chunk(&mut data, &signature);
                }
            }
            ExportStream::SecurePeer {
                keys,
                encryptor,
                mac_hash,
            } => {
                encryptor.process(&mut chunk)?;
                mac_hash.update(&*chunk);
                push_chunk(&mut data, &chunk);
                if last {
                    let hash = std::mem::take(mac_hash).finalize();
                    let mac = keys.mac(&[hash.as_slice()])?;
                    push_chunk(&mut data, &mac);
                }
            }
        }

        if last {
            tracing::debug!(id = self.id, "export complete");
        }
        Ok(ExportChunk { data, last })
    }
}

fn push_chunk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{SecretKey, Signature};
    use crate::record::{ExportPolicy, Origin, SecretType, AUTH_HEADER_SIZE};
    use crate::transfer::{peer_session_keys, split_chunk};

    fn record(policy: ExportPolicy, payload: &[u8], key: &StorageKey) -> StoredRecord {
        let header =
            SecretHeader::new(SecretType::Password, Origin::OnCard, policy, b"label").unwrap();
        StoredRecord::seal(header, payload, key)
    }

    fn drain(
        session: &mut ExportSession,
        key: &StorageKey,
        signer: &SecretKey,
    ) -> (Vec<u8>, Vec<u8>) {
        let mut payload = Vec::new();
        loop {
            let step = session.next_chunk(key, signer).unwrap();
            let (chunk, rest) = split_chunk(&step.data).unwrap();
            payload.extend_from_slice(chunk);
            if step.last {
                let (trailer, _) = split_chunk(rest).unwrap();
                return (payload, trailer.to_vec());
            }
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(
            ExportRequest::parse(TransportMode::Plain, &[0, 5]).unwrap(),
            ExportRequest {
                id: 5,
                pubkey_id: None
            }
        );
        assert_eq!(
            ExportRequest::parse(TransportMode::SecurePeer, &[0, 5, 0, 9])
                .unwrap()
                .pubkey_id,
            Some(9)
        );
        assert!(ExportRequest::parse(TransportMode::Plain, &[0]).is_err());
        assert!(ExportRequest::parse(TransportMode::SecurePeer, &[0, 5]).is_err());
    }

    #[test]
    fn test_policy_enforcement() {
        let key = StorageKey::generate().unwrap();
        let peer = SecretKey::generate().unwrap();
        let identity = SecretKey::generate().unwrap();
        let request = ExportRequest {
            id: 0,
            pubkey_id: Some(1),
        };

        let forbidden = record(ExportPolicy::Forbidden, b"x", &key);
        for mode in [TransportMode::Plain, TransportMode::SecurePeer] {
            let keys = peer_session_keys(&identity, &peer.public()).unwrap();
            assert!(matches!(
                ExportSession::open(&request, mode, &forbidden, Some(keys)),
                Err(TransferError::PolicyViolation)
            ));
        }

        let secure_only = record(ExportPolicy::SecureOnly, b"x", &key);
        assert!(matches!(
            ExportSession::open(&request, TransportMode::Plain, &secure_only, None),
            Err(TransferError::PolicyViolation)
        ));
        let keys = peer_session_keys(&identity, &peer.public()).unwrap();
        assert!(ExportSession::open(&request, TransportMode::SecurePeer, &secure_only, Some(keys)).is_ok());
    }

    #[test]
    fn test_plain_export_is_signed() {
        let key = StorageKey::generate().unwrap();
        let identity = SecretKey::generate().unwrap();
        let payload: Vec<u8> = (0..200u8).collect();
        let record = record(ExportPolicy::Allowed, &payload, &key);
        let request = ExportRequest {
            id: 42,
            pubkey_id: None,
        };

        let (mut session, init) =
            ExportSession::open(&request, TransportMode::Plain, &record, None).unwrap();
        assert_eq!(&init[..2], &[0, 42]);
        assert_eq!(&init[2..], &record.header.encode()[..]);

        // 208 bytes at rest: one full chunk, then the last 80
        let first = session.next_chunk(&key, &identity).unwrap();
        assert!(!first.last);
        assert_eq!(first.data.len(), 2 + CHUNK_SIZE);

        let last = session.next_chunk(&key, &identity).unwrap();
        assert!(last.last);
        let (tail, rest) = split_chunk(&last.data).unwrap();
        let (sig, _) = split_chunk(rest).unwrap();

        let mut exported = first.data[2..].to_vec();
        exported.extend_from_slice(tail);
        assert_eq!(exported, payload);

        let mut signed = record.header.auth_header().to_vec();
        assert_eq!(signed.len(), AUTH_HEADER_SIZE);
        signed.extend_from_slice(&payload);
        let sig = Signature::from_der(sig).unwrap();
        identity.public().verify(&signed, &sig).unwrap();
    }

    #[test]
    fn test_secure_export_encrypts_and_macs() {
        let key = StorageKey::generate().unwrap();
        let identity = SecretKey::generate().unwrap();
        let peer = SecretKey::generate().unwrap();
        let payload = [7u8; 150];
        let record = record(ExportPolicy::SecureOnly, &payload, &key);
        let request = ExportRequest {
            id: 1,
            pubkey_id: Some(2),
        };
        let keys = peer_session_keys(&identity, &peer.public()).unwrap();
        let (mut session, init) =
            ExportSession::open(&request, TransportMode::SecurePeer, &record, Some(keys)).unwrap();
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&init[init.len() - IV_SIZE..]);

        let (ciphertext, mac) = drain(&mut session, &key, &identity);
        assert_eq!(ciphertext.len(), 160);

        // the receiving side derives the same keys from its own secret
        let theirs = peer_session_keys(&peer, &identity.public()).unwrap();
        let mut hash = Sha256::new();
        hash.update(record.header.auth_header());
        hash.update(&ciphertext);
        let digest = hash.finalize();
        theirs.verify_mac(&[digest.as_slice()], &mac).unwrap();

        let mut plaintext = ciphertext.clone();
        theirs.decryptor(&iv).process(&mut plaintext).unwrap();
        let len = pkcs7_unpad(&plaintext).unwrap();
        assert_eq!(&plaintext[..len], &payload[..]);
    }

    #[test]
    fn test_short_record_exports_in_one_step() {
        let key = StorageKey::generate().unwrap();
        let identity = SecretKey::generate().unwrap();
        let record = record(ExportPolicy::Allowed, b"short", &key);
        let request = ExportRequest {
            id: 0,
            pubkey_id: None,
        };
        let (mut session, _) =
            ExportSession::open(&request, TransportMode::Plain, &record, None).unwrap();
        let (payload, sig) = drain(&mut session, &key, &identity);
        assert_eq!(payload, b"short");
        assert!(Signature::from_der(&sig).is_ok());
    }

    #[test]
    fn test_wipe_resets_the_running_signature_hash() {
        let key = StorageKey::generate().unwrap();
        let identity = SecretKey::generate().unwrap();
        let record = record(ExportPolicy::Allowed, &[0x5A; 200], &key);
        let request = ExportRequest {
            id: 0,
            pubkey_id: None,
        };
        let (mut session, _) =
            ExportSession::open(&request, TransportMode::Plain, &record, None).unwrap();
        assert!(!session.next_chunk(&key, &identity).unwrap().last);

        session.wipe();
        let ExportStream::Plain { digest } = &session.stream else {
            panic!("plain export without a digest");
        };
        assert_eq!(digest.clone().finalize(), Sha256::digest(b""));
    }
}
