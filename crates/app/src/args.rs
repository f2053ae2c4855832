pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "seedkeeper")]
#[command(about = "Drive an emulated SeedKeeper card kept on disk")]
pub struct Args {
    /// Path to the seedkeeper state directory (defaults to ~/.seedkeeper)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log filter, overriding the one in config.toml
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// PIN 0, verified over the secure channel before the command runs
    #[arg(long, global = true, env = "SEEDKEEPER_PIN", hide_env_values = true)]
    pub pin: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}
