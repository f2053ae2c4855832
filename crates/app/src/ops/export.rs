use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use common::crypto::{KeyError, PublicKey};
use common::host::{ExportTrailer, ExportedSecret};
use common::record::{CodecError, SecretHeader};

use crate::op::CardError;

/// Export a secret to a JSON bundle, in plain or sealed for a peer card
#[derive(Args, Debug, Clone)]
pub struct Export {
    /// Id of the secret
    pub id: u16,

    /// Id of the peer public-key record to seal the secret for
    #[arg(long)]
    pub to: Option<u16>,

    /// Write the bundle to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error("bundle: {0}")]
    Bundle(#[from] BundleError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("header: {0}")]
    Codec(#[from] CodecError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("bad {0} length")]
    Length(&'static str),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the bundle payload is authenticated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BundleTrailer {
    Plain { signature: String },
    SecurePeer { iv: String, mac: String },
}

/// An exported secret as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Identity of the exporting card
    pub authentikey: String,
    pub id: u16,
    /// Encoded header, label included
    pub header: String,
    pub payload: String,
    #[serde(flatten)]
    pub trailer: BundleTrailer,
}

impl ExportBundle {
    pub fn new(exported: &ExportedSecret, authentikey: &PublicKey) -> Self {
        let trailer = match &exported.trailer {
            ExportTrailer::Signature(der) => BundleTrailer::Plain {
                signature: hex::encode(der),
            },
            ExportTrailer::Mac { iv, mac } => BundleTrailer::SecurePeer {
                iv: hex::encode(iv),
                mac: hex::encode(mac),
            },
        };
        Self {
            authentikey: authentikey.to_hex(),
            id: exported.id,
            header: hex::encode(exported.header.encode()),
            payload: hex::encode(&exported.payload[..]),
            trailer,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, BundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn authentikey(&self) -> Result<PublicKey, BundleError> {
        Ok(PublicKey::from_hex(&self.authentikey)?)
    }

    /// Decode back into what the host client imports
    pub fn exported(&self) -> Result<ExportedSecret, BundleError> {
        let (header, used) = SecretHeader::decode(&hex::decode(&self.header)?)?;
        if used != self.header.len() / 2 {
            return Err(BundleError::Length("header"));
        }
        let trailer = match &self.trailer {
            BundleTrailer::Plain { signature } => ExportTrailer::Signature(hex::decode(signature)?),
            BundleTrailer::SecurePeer { iv, mac } => ExportTrailer::Mac {
                iv: hex::decode(iv)?
                    .try_into()
                    .map_err(|_| BundleError::Length("iv"))?,
                mac: hex::decode(mac)?
                    .try_into()
                    .map_err(|_| BundleError::Length("mac"))?,
            },
        };
        Ok(ExportedSecret {
            id: self.id,
            header,
            payload: Zeroizing::new(hex::decode(&self.payload)?),
            trailer,
        })
    }
}

impl crate::op::Op for Export {
    type Error = ExportError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (exported, authentikey) = ctx.with_card(true, |card, _| {
            let exported = match self.to {
                Some(pubkey_id) => card.export_secure(self.id, pubkey_id)?,
                None => card.export_plain(self.id)?,
            };
            let authentikey = card.authentikey()?;
            if self.to.is_none() {
                exported.verify(&authentikey)?;
            }
            Ok::<_, CardError>((exported, authentikey))
        })?;
        tracing::info!(id = exported.id, secure = self.to.is_some(), "secret exported");

        let json = ExportBundle::new(&exported, &authentikey).to_json()?;
        match &self.out {
            Some(path) => {
                std::fs::write(path, json)?;
                Ok(format!("exported secret {} to {}", self.id, path.display()))
            }
            None => Ok(json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::SecretKey;
    use common::record::{ExportPolicy, Origin, SecretType};

    fn exported(trailer: ExportTrailer) -> ExportedSecret {
        let header = SecretHeader::new(
            SecretType::Password,
            Origin::PlainImport,
            ExportPolicy::Allowed,
            b"mail",
        )
        .unwrap();
        ExportedSecret {
            id: 7,
            header,
            payload: Zeroizing::new(b"hunter22".to_vec()),
            trailer,
        }
    }

    #[test]
    fn test_bundle_keeps_secure_trailer() {
        let key = SecretKey::generate().unwrap().public();
        let original = exported(ExportTrailer::Mac {
            iv: [1u8; 16],
            mac: [2u8; 20],
        });
        let json = ExportBundle::new(&original, &key).to_json().unwrap();
        assert!(json.contains("\"mode\": \"secure_peer\""));

        let bundle = ExportBundle::from_json(&json).unwrap();
        assert_eq!(bundle.authentikey().unwrap(), key);
        let decoded = bundle.exported().unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.header, original.header);
        assert_eq!(&decoded.payload[..], b"hunter22");
        assert_eq!(decoded.trailer, original.trailer);
    }

    #[test]
    fn test_bundle_rejects_short_mac() {
        let key = SecretKey::generate().unwrap().public();
        let mut bundle = ExportBundle::new(&exported(ExportTrailer::Signature(vec![0x30])), &key);
        bundle.trailer = BundleTrailer::SecurePeer {
            iv: hex::encode([0u8; 16]),
            mac: hex::encode([0u8; 4]),
        };
        assert!(matches!(
            bundle.exported(),
            Err(BundleError::Length("mac"))
        ));
    }
}
