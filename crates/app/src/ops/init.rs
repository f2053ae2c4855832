use clap::Args;

use common::device::DEFAULT_PIN;
use common::host::{Card, HostError, PinSetup};

use crate::op::CardError;
use crate::state::{AppState, StateError};

/// Create a card (or reuse one reset to factory) and run its setup.
/// The new PIN 0 is the global `--pin`.
#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Unblock code of PIN 0
    #[arg(long)]
    pub puk: String,

    #[arg(long, default_value_t = 5)]
    pub pin_tries: u8,

    #[arg(long, default_value_t = 3)]
    pub puk_tries: u8,

    /// PIN 1 (defaults to PIN 0)
    #[arg(long)]
    pub pin1: Option<String>,

    /// Unblock code of PIN 1 (defaults to the PIN 0 one)
    #[arg(long)]
    pub puk1: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
    #[error("setup failed: {0}")]
    Setup(#[from] HostError),
    #[error(transparent)]
    Card(#[from] CardError),
    #[error("the card is already set up")]
    AlreadySetUp,
}

impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let pin = ctx.pin.as_deref().ok_or(CardError::MissingPin)?;

        // a card that went through reset-to-factory is set up again in place
        let (state, mut device) = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => {
                let device = state.load_device()?;
                if device.is_setup_done() {
                    return Err(InitError::AlreadySetUp);
                }
                (state, device)
            }
            Err(StateError::NotInitialized | StateError::MissingFile(_)) => {
                AppState::init(ctx.config_path.clone(), None)?
            }
            Err(e) => return Err(e.into()),
        };

        let identity = device.authentikey();
        let pin0 = PinSetup {
            pin_tries: self.pin_tries,
            puk_tries: self.puk_tries,
            pin: pin.as_bytes(),
            puk: self.puk.as_bytes(),
        };
        let pin1 = PinSetup {
            pin: self.pin1.as_deref().unwrap_or(pin).as_bytes(),
            puk: self.puk1.as_deref().unwrap_or(&self.puk).as_bytes(),
            ..pin0
        };
        let result = {
            let mut card = Card::new(&mut device);
            card.open_channel(Some(&identity))
                .and_then(|()| card.setup(DEFAULT_PIN, &pin0, &pin1, None))
        };
        state.save_device(&device)?;
        result?;
        tracing::info!(authentikey = %identity.to_hex(), "card set up");

        Ok(format!(
            "Initialized seedkeeper directory at: {}\n\
             - Card: {}\n\
             - Config: {}\n\
             - Authentikey: {}",
            state.dir.display(),
            state.card_path.display(),
            state.config_path.display(),
            identity.to_hex(),
        ))
    }
}
