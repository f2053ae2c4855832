use std::error::Error;
use std::path::PathBuf;

use common::host::{Card, HostError};

use crate::state::{AppState, StateError};

/// Resolve the tracing filter.
///
/// Priority: explicit `--log-level` flag > config file `log_level` > `info`.
pub fn resolve_log_level(explicit: Option<String>, config_path: Option<PathBuf>) -> String {
    if let Some(level) = explicit {
        return level;
    }
    match AppState::load(config_path) {
        Ok(state) => state.config.log_level,
        Err(_) => "info".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("card: {0}")]
    Host(#[from] HostError),
    #[error("PIN 0 is required: pass --pin or set SEEDKEEPER_PIN")]
    MissingPin,
}

#[derive(Clone)]
pub struct OpContext {
    /// Optional custom state path (defaults to ~/.seedkeeper)
    pub config_path: Option<PathBuf>,
    /// PIN 0 given on the command line or in the environment
    pub pin: Option<String>,
}

impl std::fmt::Debug for OpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpContext")
            .field("config_path", &self.config_path)
            .field("pin", &self.pin.as_ref().map(|_| "***"))
            .finish()
    }
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, pin: Option<String>) -> Self {
        Self { config_path, pin }
    }

    pub fn state(&self) -> Result<AppState, StateError> {
        AppState::load(self.config_path.clone())
    }

    /// Load the card, open a channel bound to its recorded identity and,
    /// when `login` is set, verify PIN 0 before running `f`.
    ///
    /// The image is saved whatever `f` returns: failed PIN attempts and
    /// audit records must survive the run.
    pub fn with_card<T>(
        &self,
        login: bool,
        f: impl FnOnce(&mut Card<'_>, &AppState) -> Result<T, CardError>,
    ) -> Result<T, CardError> {
        let state = self.state()?;
        let pin = match (login, self.pin.as_deref()) {
            (true, None) => return Err(CardError::MissingPin),
            (true, Some(pin)) => Some(pin),
            (false, _) => None,
        };

        let mut device = state.load_device()?;
        let result = {
            let mut card = Card::new(&mut device);
            Self::login(&mut card, &state, pin).and_then(|()| f(&mut card, &state))
        };
        state.save_device(&device)?;
        result
    }

    fn login(card: &mut Card<'_>, state: &AppState, pin: Option<&str>) -> Result<(), CardError> {
        card.open_channel(state.authentikey()?.as_ref())?;
        if let Some(pin) = pin {
            card.verify_pin(0, pin.as_bytes())?;
        }
        Ok(())
    }
}

pub trait Op {
    type Error: Error + Send + Sync + 'static;
    type Output;

    fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::op::Op>::Error),
            )*
        }

        impl $crate::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            fn execute(&self, ctx: &$crate::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx)
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_log_level_explicit_wins() {
        let level = resolve_log_level(Some("trace".to_string()), None);
        assert_eq!(level, "trace");
    }

    #[test]
    fn test_resolve_log_level_falls_back_to_info() {
        let level = resolve_log_level(None, Some(PathBuf::from("/nonexistent")));
        assert_eq!(level, "info");
    }

    #[test]
    fn test_resolve_log_level_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::state::AppConfig {
            log_level: "common=debug".to_string(),
            ..Default::default()
        };
        AppState::init(Some(dir.path().to_path_buf()), Some(config)).unwrap();
        let level = resolve_log_level(None, Some(dir.path().to_path_buf()));
        assert_eq!(level, "common=debug");
    }

    #[test]
    fn test_login_needs_a_pin() {
        let dir = tempfile::tempdir().unwrap();
        AppState::init(Some(dir.path().to_path_buf()), None).unwrap();
        let ctx = OpContext::new(Some(dir.path().to_path_buf()), None);
        let err = ctx.with_card(true, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, CardError::MissingPin));
    }
}
