use std::{fs, path::PathBuf};

use common::crypto::{KeyError, PublicKey};
use common::device::{Device, DeviceConfig, DeviceError, DeviceImage};
use common::transfer::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "seedkeeper";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CARD_FILE_NAME: &str = "card.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default tracing filter, e.g. `info` or `common=debug`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Payload bytes per import command
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Identity of the card created by `init`; every channel is checked against it
    #[serde(default)]
    pub authentikey: Option<String>,
    /// Settings of a freshly created card
    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            chunk_size: default_chunk_size(),
            authentikey: None,
            device: DeviceConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the seedkeeper directory (~/.seedkeeper)
    pub dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Path to the persisted device image
    pub card_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.seedkeeper)
    pub fn dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Create the state directory with a factory-fresh card
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<(Self, Device), StateError> {
        let dir = Self::dir(custom_path)?;
        if dir.join(CARD_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&dir)?;

        let mut config = config.unwrap_or_default();
        let device = Device::new(config.device.clone())?;
        config.authentikey = Some(device.authentikey().to_hex());

        let state = Self {
            config_path: dir.join(CONFIG_FILE_NAME),
            card_path: dir.join(CARD_FILE_NAME),
            dir,
            config,
        };
        fs::write(&state.config_path, toml::to_string_pretty(&state.config)?)?;
        state.save_device(&device)?;
        Ok((state, device))
    }

    /// Load existing state from the seedkeeper directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let dir = Self::dir(custom_path)?;
        if !dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let card_path = dir.join(CARD_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        if !card_path.exists() {
            return Err(StateError::MissingFile(CARD_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        Ok(Self {
            dir,
            config_path,
            card_path,
            config,
        })
    }

    pub fn load_device(&self) -> Result<Device, StateError> {
        let bytes = fs::read(&self.card_path)?;
        let image: DeviceImage = bincode::deserialize(&bytes)?;
        Ok(Device::from_image(&image)?)
    }

    /// Write the image next to the card file, then move it over
    pub fn save_device(&self, device: &Device) -> Result<(), StateError> {
        let bytes = bincode::serialize(&device.image())?;
        let staged = self.card_path.with_extension("bin.tmp");
        fs::write(&staged, bytes)?;
        fs::rename(&staged, &self.card_path)?;
        tracing::debug!(path = %self.card_path.display(), "device image saved");
        Ok(())
    }

    pub fn authentikey(&self) -> Result<Option<PublicKey>, StateError> {
        self.config
            .authentikey
            .as_deref()
            .map(PublicKey::from_hex)
            .transpose()
            .map_err(StateError::from)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("seedkeeper directory not initialized. Run 'seedkeeper init' first")]
    NotInitialized,

    #[error("seedkeeper directory already holds a card")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid authentikey in config: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("device image: {0}")]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
