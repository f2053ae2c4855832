use zeroize::Zeroizing;

use crate::crypto::{
    pkcs7_pad, random_bytes, KeyError, PublicKey, SecretKey, SessionError, SessionKeys,
    AES_BLOCK_SIZE, COORDINATE_SIZE, HMAC_SHA1_SIZE, HOST_CHANNEL_CONTEXT, IV_SIZE,
    PUBLIC_KEY_SIZE,
};
use crate::device::AttestationSigner;
use crate::error::ErrorKind;

use super::counter::{compose_iv, AntiReplayCounter, ReplayError, IV_PREFIX_SIZE};

const LENGTH_SIZE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("secure channel is not initialized")]
    Uninitialized,
    #[error("invalid client public key: {0}")]
    InvalidPublicKey(KeyError),
    #[error("malformed channel message: {0}")]
    Malformed(&'static str),
    #[error("channel mac mismatch")]
    WrongMac,
    #[error("channel iv rejected: {0}")]
    Replay(#[from] ReplayError),
    #[error("no outbound iv armed")]
    NoOutboundIv,
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("session error: {0}")]
    Session(SessionError),
}

impl From<SessionError> for ChannelError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::WrongMac => ChannelError::WrongMac,
            SessionError::Unaligned(_) => ChannelError::Malformed("ciphertext not block aligned"),
            other => ChannelError::Session(other),
        }
    }
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Uninitialized => ErrorKind::Authentication,
            ChannelError::InvalidPublicKey(_) | ChannelError::Malformed(_) => ErrorKind::Protocol,
            ChannelError::WrongMac => ErrorKind::Integrity,
            ChannelError::Replay(_) => ErrorKind::Replay,
            ChannelError::NoOutboundIv
            | ChannelError::Default(_)
            | ChannelError::Key(_)
            | ChannelError::Session(_) => ErrorKind::Internal,
        }
    }
}

/// A host to device channel message: `iv | len | ciphertext | mac_len | mac`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: &'a [u8],
    pub mac: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Split a command envelope into its parts; trailing bytes are ignored
    pub fn parse(data: &'a [u8]) -> Result<Self, ChannelError> {
        let (iv, ciphertext, rest) = split_body(data)?;
        if rest.len() < LENGTH_SIZE {
            return Err(ChannelError::Malformed("missing mac length"));
        }
        let mac_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        if mac_len != HMAC_SHA1_SIZE {
            return Err(ChannelError::WrongMac);
        }
        let mac = rest
            .get(LENGTH_SIZE..LENGTH_SIZE + mac_len)
            .ok_or(ChannelError::Malformed("truncated mac"))?;
        Ok(Envelope {
            iv,
            ciphertext,
            mac,
        })
    }

    /// Split a reply envelope (`iv | len | ciphertext`, no mac)
    pub fn parse_reply(data: &'a [u8]) -> Result<Self, ChannelError> {
        let (iv, ciphertext, _) = split_body(data)?;
        Ok(Envelope {
            iv,
            ciphertext,
            mac: &[],
        })
    }

    /// The bytes covered by the mac: `iv | len | ciphertext`
    pub fn authenticated_bytes(&self) -> Vec<u8> {
        encode_body(&self.iv, self.ciphertext)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_body(&self.iv, self.ciphertext);
        if !self.mac.is_empty() {
            out.extend_from_slice(&(self.mac.len() as u16).to_be_bytes());
            out.extend_from_slice(self.mac);
        }
        out
    }
}

fn split_body(data: &[u8]) -> Result<([u8; IV_SIZE], &[u8], &[u8]), ChannelError> {
    if data.len() < IV_SIZE + LENGTH_SIZE {
        return Err(ChannelError::Malformed("message shorter than iv and length"));
    }
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&data[..IV_SIZE]);
    let len = u16::from_be_bytes([data[IV_SIZE], data[IV_SIZE + 1]]) as usize;
    let start = IV_SIZE + LENGTH_SIZE;
    let ciphertext = data
        .get(start..start + len)
        .ok_or(ChannelError::Malformed("truncated ciphertext"))?;
    Ok((iv, ciphertext, &data[start + len..]))
}

fn encode_body(iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IV_SIZE + LENGTH_SIZE + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
    out.extend_from_slice(ciphertext);
    out
}

struct ChannelSession {
    keys: SessionKeys,
    counter: AntiReplayCounter,
    prefix: [u8; IV_PREFIX_SIZE],
    outbound: Option<[u8; IV_SIZE]>,
}

/// Device side of the host channel.
///
/// Lives for as long as the card stays selected; `close` drops the session
/// keys and the replay state.
#[derive(Default)]
pub struct SecureChannel {
    session: Option<ChannelSession>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl SecureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    /// Answer an initiate request from the host.
    ///
    /// Response: `0x0020 | eph_x | sig1_len | sig1 | sig2_len | sig2` where
    /// `sig1` is the ephemeral key's signature over `0x0020 | eph_x` and
    /// `sig2` the identity's signature over everything before it.
    #[tracing::instrument(skip_all)]
    pub fn initiate<S: AttestationSigner + ?Sized>(
        &mut self,
        client_pubkey: &[u8],
        identity: &S,
    ) -> Result<Vec<u8>, ChannelError> {
        if client_pubkey.len() < PUBLIC_KEY_SIZE {
            return Err(ChannelError::Malformed("client public key too short"));
        }
        let client = PublicKey::from_uncompressed(&client_pubkey[..PUBLIC_KEY_SIZE])
            .map_err(ChannelError::InvalidPublicKey)?;

        self.session = None;
        let ephemeral = SecretKey::generate()?;
        let keys = SessionKeys::agree(&ephemeral, &client, &HOST_CHANNEL_CONTEXT)?;

        let mut response = Vec::with_capacity(2 + COORDINATE_SIZE + 2 * (2 + 72));
        response.extend_from_slice(&(COORDINATE_SIZE as u16).to_be_bytes());
        response.extend_from_slice(&ephemeral.public().x_coordinate());
        let self_signature = ephemeral.sign(&response).to_der();
        response.extend_from_slice(&(self_signature.len() as u16).to_be_bytes());
        response.extend_from_slice(&self_signature);
        let identity_signature = identity.sign(&response)?.to_der();
        response.extend_from_slice(&(identity_signature.len() as u16).to_be_bytes());
        response.extend_from_slice(&identity_signature);

        self.session = Some(ChannelSession {
            keys,
            counter: AntiReplayCounter::new(),
            prefix: [0u8; IV_PREFIX_SIZE],
            outbound: None,
        });
        tracing::debug!("secure channel initiated");
        Ok(response)
    }

    /// Authenticate, replay-check and decrypt a wrapped command.
    ///
    /// On success exactly one outbound IV is armed for [`SecureChannel::wrap`].
    pub fn unwrap(&mut self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, ChannelError> {
        let session = self.session.as_mut().ok_or(ChannelError::Uninitialized)?;
        let envelope = Envelope::parse(data)?;

        let authenticated = envelope.authenticated_bytes();
        if let Err(e) = session.keys.verify_mac(&[&authenticated], envelope.mac) {
            tracing::warn!("rejected channel message with a bad mac");
            return Err(e.into());
        }
        let received = match session.counter.check(&envelope.iv) {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "rejected channel message iv");
                return Err(e.into());
            }
        };
        if envelope.ciphertext.is_empty() || envelope.ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(ChannelError::Malformed("ciphertext not block aligned"));
        }

        let outbound_counter = session.counter.accept(received)?;
        random_bytes(&mut session.prefix).map_err(|e| anyhow::anyhow!("{}", e))?;
        session.outbound = Some(compose_iv(&session.prefix, outbound_counter));

        let mut plaintext = Zeroizing::new(envelope.ciphertext.to_vec());
        session.keys.decryptor(&envelope.iv).process(&mut plaintext)?;
        Ok(plaintext)
    }

    /// Pad and encrypt a reply under the armed IV: `iv | len | ciphertext`
    pub fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let session = self.session.as_mut().ok_or(ChannelError::Uninitialized)?;
        let iv = session.outbound.take().ok_or(ChannelError::NoOutboundIv)?;

        let mut buf = Zeroizing::new(plaintext.to_vec());
        pkcs7_pad(&mut buf);
        session.keys.encryptor(&iv).process(&mut buf)?;
        Ok(encode_body(&iv, &buf))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::counter::iv_counter;

    struct Host {
        keys: SessionKeys,
        counter: u32,
    }

    impl Host {
        fn connect(channel: &mut SecureChannel, identity: &SecretKey) -> Self {
            let client = SecretKey::generate().unwrap();
            let response = channel
                .initiate(&client.public().to_uncompressed(), identity)
                .unwrap();
            let eph_x = &response[2..2 + COORDINATE_SIZE];
            let sig1_len = u16::from_be_bytes([response[34], response[35]]) as usize;
            let sig1 = crate::crypto::Signature::from_der(&response[36..36 + sig1_len]).unwrap();
            let eph = PublicKey::recover_from_x(eph_x, &response[..34], &sig1).unwrap();
            let keys = SessionKeys::agree(&client, &eph, &HOST_CHANNEL_CONTEXT).unwrap();
            Host { keys, counter: 1 }
        }

        fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
            let iv = compose_iv(&[0x42; IV_PREFIX_SIZE], self.counter);
            self.counter += 2;
            self.seal_with(iv, plaintext)
        }

        fn seal_with(&self, iv: [u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
            let mut buf = plaintext.to_vec();
            pkcs7_pad(&mut buf);
            self.keys.encryptor(&iv).process(&mut buf).unwrap();
            let body = encode_body(&iv, &buf);
            let mac = self.keys.mac(&[&body]).unwrap();
            Envelope {
                iv,
                ciphertext: &buf,
                mac: &mac,
            }
            .encode()
        }
    }

    #[test]
    fn test_initiate_response_layout() {
        let identity = SecretKey::generate().unwrap();
        let mut channel = SecureChannel::new();
        let client = SecretKey::generate().unwrap();
        let response = channel
            .initiate(&client.public().to_uncompressed(), &identity)
            .unwrap();

        assert_eq!(&response[..2], &[0x00, 0x20]);
        let sig1_len = u16::from_be_bytes([response[34], response[35]]) as usize;
        let offset = 36 + sig1_len;
        let sig2_len = u16::from_be_bytes([response[offset], response[offset + 1]]) as usize;
        assert_eq!(response.len(), offset + 2 + sig2_len);

        let sig2 = crate::crypto::Signature::from_der(&response[offset + 2..]).unwrap();
        identity
            .public()
            .verify(&response[..offset], &sig2)
            .unwrap();
        assert!(channel.is_initialized());
    }

    #[test]
    fn test_initiate_rejects_bad_client_key() {
        let identity = SecretKey::generate().unwrap();
        let mut channel = SecureChannel::new();
        assert!(matches!(
            channel.initiate(&[0x04; 10], &identity),
            Err(ChannelError::Malformed(_))
        ));
        let mut compressed_tag = SecretKey::generate().unwrap().public().to_uncompressed();
        compressed_tag[0] = 0x02;
        assert!(matches!(
            channel.initiate(&compressed_tag, &identity),
            Err(ChannelError::InvalidPublicKey(_))
        ));
        assert!(!channel.is_initialized());
    }

    #[test]
    fn test_unwrap_then_wrap() {
        let identity = SecretKey::generate().unwrap();
        let mut channel = SecureChannel::new();
        let mut host = Host::connect(&mut channel, &identity);

        let message = host.seal(b"\xb0\x3c\x00\x00\x00");
        let plaintext = channel.unwrap(&message).unwrap();
        assert_eq!(&plaintext[..5], b"\xb0\x3c\x00\x00\x00");

        let reply = channel.wrap(b"pong").unwrap();
        let envelope = Envelope::parse_reply(&reply).unwrap();
        // reply counter is the accepted counter plus one
        assert_eq!(iv_counter(&envelope.iv), 2);
        let mut buf = envelope.ciphertext.to_vec();
        host.keys.decryptor(&envelope.iv).process(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"pong");

        // the armed iv is single use
        assert!(matches!(
            channel.wrap(b"again"),
            Err(ChannelError::NoOutboundIv)
        ));
    }

    #[test]
    fn test_replayed_message_is_rejected() {
        let identity = SecretKey::generate().unwrap();
        let mut channel = SecureChannel::new();
        let mut host = Host::connect(&mut channel, &identity);

        let message = host.seal(b"first");
        channel.unwrap(&message).unwrap();
        assert!(matches!(
            channel.unwrap(&message),
            Err(ChannelError::Replay(ReplayError::Stale { .. }))
        ));

        // a valid mac does not rescue a stale counter
        let stale = host.seal_with(compose_iv(&[9; IV_PREFIX_SIZE], 1), b"stale");
        assert!(matches!(
            channel.unwrap(&stale),
            Err(ChannelError::Replay(_))
        ));
        let fresh = host.seal(b"fresh");
        assert!(channel.unwrap(&fresh).is_ok());
    }

    #[test]
    fn test_tampered_message_is_rejected() {
        let identity = SecretKey::generate().unwrap();
        let mut channel = SecureChannel::new();
        let mut host = Host::connect(&mut channel, &identity);

        let mut message = host.seal(b"payload");
        message[20] ^= 0x01;
        assert!(matches!(
            channel.unwrap(&message),
            Err(ChannelError::WrongMac)
        ));

        let mut bad_mac_len = host.seal(b"payload");
        let mac_len_offset = bad_mac_len.len() - HMAC_SHA1_SIZE - 2;
        bad_mac_len[mac_len_offset + 1] = 19;
        assert!(matches!(
            channel.unwrap(&bad_mac_len),
            Err(ChannelError::WrongMac)
        ));
    }

    #[test]
    fn test_unwrap_requires_initiate() {
        let mut channel = SecureChannel::new();
        assert!(matches!(
            channel.unwrap(&[0u8; 60]),
            Err(ChannelError::Uninitialized)
        ));
        assert!(matches!(
            channel.wrap(b"x"),
            Err(ChannelError::Uninitialized)
        ));
    }
}
