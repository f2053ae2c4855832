use std::path::PathBuf;

use clap::{ArgGroup, Args, Subcommand, ValueEnum};
use zeroize::Zeroizing;

use common::crypto::{KeyError, PublicKey};
use common::host::{ExportTrailer, HostError};
use common::record::{CodecError, Origin, SecretHeader, SecretType};

use super::export::{BundleError, ExportBundle};
use super::generate::describe;
use super::Policy;
use crate::op::CardError;

#[derive(Args, Debug, Clone)]
pub struct Import {
    #[command(subcommand)]
    pub source: ImportSource,
}

/// Secret types a user may import directly
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Kind {
    MasterSeed,
    Bip39Mnemonic,
    ElectrumMnemonic,
    PrivateKey,
    SymmetricKey,
    Password,
    Certificate,
    TwoFactor,
}

impl From<Kind> for SecretType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::MasterSeed => SecretType::MasterSeed,
            Kind::Bip39Mnemonic => SecretType::Bip39Mnemonic,
            Kind::ElectrumMnemonic => SecretType::ElectrumMnemonic,
            Kind::PrivateKey => SecretType::PrivateKey,
            Kind::SymmetricKey => SecretType::SymmetricKey,
            Kind::Password => SecretType::Password,
            Kind::Certificate => SecretType::Certificate,
            Kind::TwoFactor => SecretType::TwoFactorSecret,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ImportSource {
    /// Import a secret given as text, hex or a file
    #[command(group(ArgGroup::new("data").required(true)))]
    Secret {
        #[arg(long = "type", value_enum)]
        kind: Kind,
        #[arg(long, value_enum, default_value_t)]
        policy: Policy,
        #[arg(long, default_value = "")]
        label: String,
        /// Payload as UTF-8 text
        #[arg(long, group = "data")]
        text: Option<String>,
        /// Payload as hex
        #[arg(long, group = "data")]
        hex: Option<String>,
        /// Payload read from a file
        #[arg(long, group = "data")]
        file: Option<PathBuf>,
    },
    /// Store the authentikey of a peer card for secure-peer transfers
    Pubkey {
        /// Uncompressed SEC1 key as hex
        key: String,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Import a bundle written by `export`
    Bundle {
        path: PathBuf,
        /// Id of the public-key record of the exporting card, for sealed bundles
        #[arg(long)]
        from: Option<u16>,
        /// Replace the label carried by the bundle
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error("bundle: {0}")]
    Bundle(#[from] BundleError),
    #[error("header: {0}")]
    Codec(#[from] CodecError),
    #[error("key: {0}")]
    Key(#[from] KeyError),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle signature does not match its authentikey: {0}")]
    Signature(HostError),
    #[error("sealed bundles need --from <pubkey id>")]
    MissingPeer,
}

impl ImportSource {
    fn payload(
        text: &Option<String>,
        hex: &Option<String>,
        file: &Option<PathBuf>,
    ) -> Result<Zeroizing<Vec<u8>>, ImportError> {
        let bytes = match (text, hex, file) {
            (Some(text), _, _) => text.as_bytes().to_vec(),
            (_, Some(hex), _) => hex::decode(hex.trim())?,
            (_, _, Some(path)) => std::fs::read(path)?,
            _ => Vec::new(),
        };
        Ok(Zeroizing::new(bytes))
    }
}

impl crate::op::Op for Import {
    type Error = ImportError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret = match &self.source {
            ImportSource::Secret {
                kind,
                policy,
                label,
                text,
                hex,
                file,
            } => {
                let header = SecretHeader::new(
                    (*kind).into(),
                    Origin::PlainImport,
                    (*policy).into(),
                    label.as_bytes(),
                )?;
                let payload = ImportSource::payload(text, hex, file)?;
                ctx.with_card(true, |card, state| {
                    Ok(card.import_plain(&header, &payload, state.config.chunk_size)?)
                })?
            }
            ImportSource::Pubkey { key, label } => {
                let key = PublicKey::from_hex(key.trim())?;
                ctx.with_card(true, |card, _| {
                    Ok(card.import_public_key(&key, label.as_bytes())?)
                })?
            }
            ImportSource::Bundle { path, from, label } => {
                let bundle = ExportBundle::from_json(&std::fs::read_to_string(path)?)?;
                let mut exported = bundle.exported()?;
                if let Some(label) = label {
                    exported.header.set_label(label.as_bytes())?;
                }
                match from {
                    Some(pubkey_id) => ctx.with_card(true, |card, _| {
                        Ok(card.import_secure(&exported, *pubkey_id)?)
                    })?,
                    None => {
                        if matches!(exported.trailer, ExportTrailer::Mac { .. }) {
                            return Err(ImportError::MissingPeer);
                        }
                        // the label is outside the signed bytes
                        exported
                            .verify(&bundle.authentikey()?)
                            .map_err(ImportError::Signature)?;
                        ctx.with_card(true, |card, state| {
                            Ok(card.import_plain(
                                &exported.header,
                                &exported.payload,
                                state.config.chunk_size,
                            )?)
                        })?
                    }
                }
            }
        };
        tracing::info!(id = secret.id, "secret imported");
        Ok(format!("imported {}", describe(secret.id, &secret.fingerprint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sources() {
        let text = ImportSource::payload(&Some("hunter22".to_string()), &None, &None).unwrap();
        assert_eq!(&text[..], b"hunter22");

        let hex = ImportSource::payload(&None, &Some(" 00ff10\n".to_string()), &None).unwrap();
        assert_eq!(&hex[..], &[0x00, 0xFF, 0x10]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let file = ImportSource::payload(&None, &None, &Some(path)).unwrap();
        assert_eq!(&file[..], &[1, 2, 3]);

        let err = ImportSource::payload(&None, &Some("zz".to_string()), &None).unwrap_err();
        assert!(matches!(err, ImportError::Hex(_)));
    }
}
