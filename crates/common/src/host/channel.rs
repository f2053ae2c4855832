use zeroize::Zeroizing;

use crate::channel::{compose_iv, iv_counter, Envelope, IV_PREFIX_SIZE};
use crate::crypto::{
    pkcs7_pad, pkcs7_unpad, random_bytes, PublicKey, SecretKey, SessionKeys, Signature,
    COORDINATE_SIZE, HOST_CHANNEL_CONTEXT,
};
use crate::device::{Command, Instruction, Reply};

use super::HostError;

/// Read a `len(2) | bytes` field at `offset`, returning it and the next offset
fn length_prefixed(data: &[u8], offset: usize) -> Result<(&[u8], usize), HostError> {
    let len = data
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or(HostError::Malformed("missing length"))?;
    let start = offset + 2;
    let field = data
        .get(start..start + len)
        .ok_or(HostError::Malformed("field shorter than its length"))?;
    Ok((field, start + len))
}

/// Recover a key from a `0x0020 | x | sig_len | sig` response.
///
/// The signature covers the first 34 bytes and decides which of the two
/// points sharing `x` is meant.
pub(crate) fn recover_signed_key(data: &[u8]) -> Result<(PublicKey, usize), HostError> {
    let (x, offset) = length_prefixed(data, 0)?;
    if x.len() != COORDINATE_SIZE {
        return Err(HostError::Malformed("unexpected coordinate size"));
    }
    let (der, end) = length_prefixed(data, offset)?;
    let signature = Signature::from_der(der)?;
    let key = PublicKey::recover_from_x(x, &data[..offset], &signature)?;
    Ok((key, end))
}

struct HostSession {
    keys: SessionKeys,
    prefix: [u8; IV_PREFIX_SIZE],
    /// Counter of the next command
    counter: u32,
    /// Counter of the last command sent, answered by `sent + 1`
    sent: Option<u32>,
}

/// Client end of the host channel
pub struct HostChannel {
    client: SecretKey,
    session: Option<HostSession>,
    /// `0x0020 | eph_x | sig1_len | sig1` and the identity signature over it
    identity_proof: Option<(Vec<u8>, Signature)>,
}

impl std::fmt::Debug for HostChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostChannel")
            .field("client", &self.client.public())
            .field("open", &self.is_open())
            .finish()
    }
}

impl HostChannel {
    pub fn new() -> Result<Self, HostError> {
        Ok(HostChannel {
            client: SecretKey::generate()?,
            session: None,
            identity_proof: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn client_key(&self) -> PublicKey {
        self.client.public()
    }

    /// The plain initiate command carrying the client key
    pub fn initiate_command(&self) -> Result<Vec<u8>, HostError> {
        Ok(Command::encode(
            Instruction::InitiateSecureChannel,
            0,
            0,
            &self.client.public().to_uncompressed(),
        )?)
    }

    /// Check the initiate response and derive the session keys.
    ///
    /// The ephemeral key is recovered from its own signature. When the
    /// device identity is already known, the identity signature is checked
    /// right away; otherwise see [`HostChannel::verify_identity`].
    pub fn complete(
        &mut self,
        response: &[u8],
        expected: Option<&PublicKey>,
    ) -> Result<(), HostError> {
        self.session = None;
        self.identity_proof = None;

        let (ephemeral, offset) = recover_signed_key(response)?;
        let (der, end) = length_prefixed(response, offset)?;
        if end != response.len() {
            return Err(HostError::Malformed("trailing bytes after identity signature"));
        }
        let identity_signature = Signature::from_der(der)?;
        self.identity_proof = Some((response[..offset].to_vec(), identity_signature));
        if let Some(identity) = expected {
            self.verify_identity(identity)?;
        }

        let keys = SessionKeys::agree(&self.client, &ephemeral, &HOST_CHANNEL_CONTEXT)?;
        let mut prefix = [0u8; IV_PREFIX_SIZE];
        random_bytes(&mut prefix)?;
        self.session = Some(HostSession {
            keys,
            prefix,
            counter: 1,
            sent: None,
        });
        tracing::debug!(ephemeral = %ephemeral.to_hex(), "host channel open");
        Ok(())
    }

    /// Check that `identity` signed the last handshake
    pub fn verify_identity(&self, identity: &PublicKey) -> Result<(), HostError> {
        let (message, signature) = self
            .identity_proof
            .as_ref()
            .ok_or(HostError::NotConnected)?;
        identity.verify(message, signature).map_err(|_| {
            tracing::warn!("handshake was not signed by the expected identity");
            HostError::IdentityMismatch
        })
    }

    pub fn close(&mut self) {
        self.session = None;
        self.identity_proof = None;
    }

    /// Wrap an inner command into a process-secure-channel command
    pub fn wrap(&mut self, inner: &[u8]) -> Result<Vec<u8>, HostError> {
        let session = self.session.as_mut().ok_or(HostError::NotConnected)?;
        let counter = session.counter;
        session.counter = counter
            .checked_add(2)
            .ok_or(HostError::Malformed("iv counter exhausted"))?;
        let iv = compose_iv(&session.prefix, counter);

        let mut buf = Zeroizing::new(inner.to_vec());
        pkcs7_pad(&mut buf);
        session.keys.encryptor(&iv).process(&mut buf)?;
        let envelope = Envelope {
            iv,
            ciphertext: &buf,
            mac: &[],
        };
        let mac = session.keys.mac(&[&envelope.authenticated_bytes()])?;
        let data = Envelope { mac: &mac, ..envelope }.encode();
        session.sent = Some(counter);
        Ok(Command::encode(Instruction::ProcessSecureChannel, 0, 0, &data)?)
    }

    /// Decrypt the reply to the last wrapped command.
    ///
    /// Failures and empty replies come back bare and are passed through.
    pub fn unwrap_reply(&mut self, reply: Reply) -> Result<Reply, HostError> {
        if !reply.is_ok() || reply.data.is_empty() {
            return Ok(reply);
        }
        let session = self.session.as_mut().ok_or(HostError::NotConnected)?;
        let sent = session.sent.take().ok_or(HostError::Malformed("unsolicited reply"))?;
        let envelope = Envelope::parse_reply(&reply.data)?;
        let received = iv_counter(&envelope.iv);
        if Some(received) != sent.checked_add(1) {
            return Err(HostError::UnexpectedIv { sent, received });
        }

        let mut plaintext = envelope.ciphertext.to_vec();
        session.keys.decryptor(&envelope.iv).process(&mut plaintext)?;
        let len = pkcs7_unpad(&plaintext).ok_or(HostError::Malformed("bad reply padding"))?;
        plaintext.truncate(len);
        Ok(Reply {
            data: plaintext,
            status: reply.status,
        })
    }
}
