use std::convert::TryFrom;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{
    pkcs7_pad, pkcs7_padded_len, pkcs7_unpad, CbcDecryptor, SessionKeys, StorageKey,
    AES_BLOCK_SIZE, FINGERPRINT_SIZE, HMAC_SHA1_SIZE, IV_SIZE,
};
use crate::record::{
    ExportPolicy, Origin, RawHeader, SecretHeader, SecretType, StoredRecord, OFFSET_EXPORT_POLICY,
    OFFSET_RFU1, OFFSET_RFU2, OFFSET_TYPE,
};

use super::{split_chunk, TransferError, TransportMode};

/// An import `INIT` payload: `header(13) | label | [pubkey_id(2) | iv(16)]`
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    mode: TransportMode,
    raw: RawHeader<'a>,
    secret_type: SecretType,
    export_policy: ExportPolicy,
    peer: Option<(u16, [u8; IV_SIZE])>,
}

impl<'a> ImportRequest<'a> {
    pub fn parse(mode: TransportMode, data: &'a [u8]) -> Result<Self, TransferError> {
        let (raw, consumed) = RawHeader::split(data)?;
        // origin, counters and fingerprint are recomputed locally
        let secret_type = SecretType::try_from(raw.auth[OFFSET_TYPE])?;
        let export_policy = ExportPolicy::try_from(raw.auth[OFFSET_EXPORT_POLICY])?;

        let peer = match mode {
            TransportMode::Plain => None,
            TransportMode::SecurePeer => {
                let rest = &data[consumed..];
                if rest.len() < 2 + IV_SIZE {
                    return Err(TransferError::Malformed("missing counterpart id or iv"));
                }
                let mut iv = [0u8; IV_SIZE];
                iv.copy_from_slice(&rest[2..2 + IV_SIZE]);
                Some((u16::from_be_bytes([rest[0], rest[1]]), iv))
            }
        };

        Ok(ImportRequest {
            mode,
            raw,
            secret_type,
            export_policy,
            peer,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Id of the public-key record the secret was encrypted for
    pub fn pubkey_id(&self) -> Option<u16> {
        self.peer.map(|(id, _)| id)
    }

    fn stored_header(&self) -> Result<SecretHeader, TransferError> {
        let origin = match self.mode {
            TransportMode::Plain => Origin::PlainImport,
            TransportMode::SecurePeer => Origin::SecureImport,
        };
        let mut header =
            SecretHeader::new(self.secret_type, origin, self.export_policy, self.raw.label)?;
        header.rfu1 = self.raw.auth[OFFSET_RFU1];
        header.rfu2 = self.raw.auth[OFFSET_RFU2];
        Ok(header)
    }
}

struct PeerDecryption {
    keys: SessionKeys,
    decryptor: CbcDecryptor,
    mac_hash: Sha256,
    /// Ciphertext not yet forming a whole block
    pending: Vec<u8>,
}

/// Import in progress.
///
/// Incoming plaintext is fingerprinted and encrypted under the storage key
/// one whole block at a time, so the stored record does not depend on how
/// the host split the payload. In secure-peer mode the last decrypted block
/// is held back until `FINALIZE` because it carries the padding.
pub struct ImportSession {
    mode: TransportMode,
    pubkey_id: Option<u16>,
    header: SecretHeader,
    peer: Option<PeerDecryption>,
    fingerprint: Sha256,
    plaintext: Zeroizing<Vec<u8>>,
    ciphertext: Vec<u8>,
    received: usize,
    max_record_size: usize,
}

impl std::fmt::Debug for ImportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSession")
            .field("mode", &self.mode)
            .field("pubkey_id", &self.pubkey_id)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl ImportSession {
    /// Start an import; secure-peer mode needs the keys shared with the sender
    pub fn begin(
        request: &ImportRequest<'_>,
        peer_keys: Option<SessionKeys>,
        max_record_size: usize,
    ) -> Result<Self, TransferError> {
        let header = request.stored_header()?;
        let peer = match (request.peer, peer_keys) {
            (None, _) => None,
            (Some((_, iv)), Some(keys)) => {
                let mut mac_hash = Sha256::new();
                mac_hash.update(request.raw.auth);
                Some(PeerDecryption {
                    decryptor: keys.decryptor(&iv),
                    keys,
                    mac_hash,
                    pending: Vec::new(),
                })
            }
            (Some(_), None) => {
                return Err(anyhow::anyhow!("secure import started without session keys").into())
            }
        };

        let session = ImportSession {
            mode: request.mode,
            pubkey_id: request.pubkey_id(),
            header,
            peer,
            fingerprint: Sha256::new(),
            plaintext: Zeroizing::new(Vec::new()),
            ciphertext: Vec::new(),
            received: 0,
            max_record_size,
        };
        session.check_size()?;
        tracing::debug!(mode = ?session.mode, pubkey_id = ?session.pubkey_id, "import started");
        Ok(session)
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn pubkey_id(&self) -> Option<u16> {
        self.pubkey_id
    }

    /// Clear buffered plaintext and the running hashes of an abandoned import
    pub fn wipe(&mut self) {
        Digest::reset(&mut self.fingerprint);
        self.plaintext.zeroize();
        if let Some(peer) = self.peer.as_mut() {
            Digest::reset(&mut peer.mac_hash);
            peer.pending.zeroize();
        }
    }

    /// `PROCESS`: data is `len(2) | chunk(len)`
    pub fn process(&mut self, data: &[u8], key: &StorageKey) -> Result<(), TransferError> {
        let (chunk, _) = split_chunk(data)?;
        self.absorb(chunk, key)
    }

    /// `FINALIZE`: data is `[len(2) | chunk(len)]`, followed in secure-peer
    /// mode by `mac_len(1) | mac(20)`
    pub fn finalize(mut self, data: &[u8], key: &StorageKey) -> Result<StoredRecord, TransferError> {
        let (chunk, rest) = if data.len() >= 2 {
            split_chunk(data)?
        } else {
            (&data[..0], data)
        };
        self.received += chunk.len();
        self.check_size()?;

        match self.peer.take() {
            Some(mut peer) => {
                let mac = match rest.split_first() {
                    Some((&len, mac)) if len as usize == HMAC_SHA1_SIZE && mac.len() >= HMAC_SHA1_SIZE => {
                        &mac[..HMAC_SHA1_SIZE]
                    }
                    _ => return Err(TransferError::Malformed("missing or invalid mac")),
                };
                peer.mac_hash.update(chunk);
                let digest = peer.mac_hash.finalize();
                if let Err(e) = peer.keys.verify_mac(&[digest.as_slice()], mac) {
                    tracing::warn!(pubkey_id = ?self.pubkey_id, "secure import failed authentication");
                    return Err(e.into());
                }

                peer.pending.extend_from_slice(chunk);
                let mut blocks = Zeroizing::new(std::mem::take(&mut peer.pending));
                peer.decryptor.process(&mut blocks)?;
                self.plaintext.extend_from_slice(&blocks);

                let unpadded = pkcs7_unpad(&self.plaintext).ok_or(TransferError::BadPadding)?;
                self.fingerprint.update(&self.plaintext[..unpadded]);
                let mut tail = Zeroizing::new(std::mem::take(&mut *self.plaintext));
                key.encrypt_blocks(&mut tail)?;
                self.ciphertext.extend_from_slice(&tail);
            }
            None => {
                self.plaintext.extend_from_slice(chunk);
                self.seal_ready(key, 0)?;
                self.fingerprint.update(&*self.plaintext);
                let mut tail = Zeroizing::new(std::mem::take(&mut *self.plaintext));
                pkcs7_pad(&mut tail);
                key.encrypt_blocks(&mut tail)?;
                self.ciphertext.extend_from_slice(&tail);
            }
        }

        let digest = self.fingerprint.finalize_reset();
        self.header.fingerprint.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        let record = StoredRecord {
            header: self.header.clone(),
            ciphertext: std::mem::take(&mut self.ciphertext),
        };
        if record.encoded_len() > self.max_record_size {
            return Err(TransferError::DataTooLong {
                size: record.encoded_len(),
                max: self.max_record_size,
            });
        }
        tracing::debug!(size = record.encoded_len(), "import finalized");
        Ok(record)
    }

    fn absorb(&mut self, chunk: &[u8], key: &StorageKey) -> Result<(), TransferError> {
        self.received += chunk.len();
        self.check_size()?;

        let hold_back = match self.peer.as_mut() {
            Some(peer) => {
                peer.mac_hash.update(chunk);
                peer.pending.extend_from_slice(chunk);
                let aligned = peer.pending.len() - peer.pending.len() % AES_BLOCK_SIZE;
                let mut blocks = Zeroizing::new(peer.pending.drain(..aligned).collect::<Vec<u8>>());
                peer.decryptor.process(&mut blocks)?;
                self.plaintext.extend_from_slice(&blocks);
                AES_BLOCK_SIZE
            }
            None => {
                self.plaintext.extend_from_slice(chunk);
                0
            }
        };
        self.seal_ready(key, hold_back)
    }

    /// Fingerprint and encrypt every whole block except the last `hold_back` bytes
    fn seal_ready(&mut self, key: &StorageKey, hold_back: usize) -> Result<(), TransferError> {
        let available = self.plaintext.len().saturating_sub(hold_back);
        let ready = available - available % AES_BLOCK_SIZE;
        if ready == 0 {
            return Ok(());
        }
        let mut blocks = Zeroizing::new(self.plaintext.drain(..ready).collect::<Vec<u8>>());
        self.fingerprint.update(&*blocks);
        key.encrypt_blocks(&mut blocks)?;
        self.ciphertext.extend_from_slice(&blocks);
        Ok(())
    }

    /// Smallest record the bytes received so far can produce
    fn check_size(&self) -> Result<(), TransferError> {
        let payload = match self.mode {
            TransportMode::Plain => pkcs7_padded_len(self.received),
            TransportMode::SecurePeer => self.received,
        };
        let size = self.header.encoded_len() + payload;
        if size > self.max_record_size {
            return Err(TransferError::DataTooLong {
                size,
                max: self.max_record_size,
            });
        }
        Ok(())
    }
}
