use clap::Args;

use common::device::{sw, RESET_TO_FACTORY_COUNT};
use common::host::{Card, HostError};

use crate::state::StateError;

/// Erase every secret and PIN by sending the reset-to-factory command
/// after each of the required card resets
#[derive(Args, Debug, Clone)]
pub struct ResetFactory {
    /// Confirm the erase
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ResetFactoryError {
    #[error("refusing to erase the card without --yes")]
    NotConfirmed,
    #[error(transparent)]
    State(#[from] StateError),
    #[error("card: {0}")]
    Host(#[from] HostError),
    #[error("reset sequence ended with status {0:04X}")]
    Interrupted(u16),
}

impl crate::op::Op for ResetFactory {
    type Error = ResetFactoryError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        if !self.yes {
            return Err(ResetFactoryError::NotConfirmed);
        }
        let state = ctx.state()?;
        let mut device = state.load_device()?;

        let mut status = sw::RESET_ABORTED;
        {
            let mut card = Card::new(&mut device);
            for _ in 0..RESET_TO_FACTORY_COUNT {
                card.reset();
                status = card.reset_to_factory_step()?;
                tracing::debug!(status = format!("{:04X}", status), "reset-to-factory step");
            }
        }
        state.save_device(&device)?;

        if status != sw::RESET_TO_FACTORY {
            return Err(ResetFactoryError::Interrupted(status));
        }
        Ok("card reset to factory state. Run 'seedkeeper init' to set it up again".to_string())
    }
}
