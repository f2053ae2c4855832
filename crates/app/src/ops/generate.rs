use clap::{Args, Subcommand};

use common::crypto::FINGERPRINT_SIZE;

use super::Policy;
use crate::op::CardError;

#[derive(Args, Debug, Clone)]
pub struct Generate {
    #[command(subcommand)]
    pub kind: GenerateKind,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GenerateKind {
    /// Random master seed
    Seed {
        /// Seed size in bytes
        #[arg(long, default_value_t = 64)]
        size: u8,
        #[arg(long, value_enum, default_value_t)]
        policy: Policy,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Random 20-byte 2FA secret
    #[command(name = "2fa")]
    TwoFactor {
        #[arg(long, value_enum, default_value_t)]
        policy: Policy,
        #[arg(long, default_value = "")]
        label: String,
    },
}

pub(crate) fn describe(id: u16, fingerprint: &[u8; FINGERPRINT_SIZE]) -> String {
    format!("id {} fingerprint {}", id, hex::encode(fingerprint))
}

impl crate::op::Op for Generate {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret = ctx.with_card(true, |card, _| {
            Ok(match &self.kind {
                GenerateKind::Seed {
                    size,
                    policy,
                    label,
                } => card.generate_master_seed(*size, (*policy).into(), label.as_bytes())?,
                GenerateKind::TwoFactor { policy, label } => {
                    card.generate_2fa((*policy).into(), label.as_bytes())?
                }
            })
        })?;
        Ok(format!("generated {}", describe(secret.id, &secret.fingerprint)))
    }
}
