mod args;
mod op;
mod ops;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{
    Authentikey, Export, Generate, Import, Init, Label, List, Logs, ResetFactory, Status, Version,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

command_enum! {
    (Init, Init),
    (Status, Status),
    (Authentikey, Authentikey),
    (Generate, Generate),
    (List, List),
    (Import, Import),
    (Export, Export),
    (Logs, Logs),
    (Label, Label),
    (ResetFactory, ResetFactory),
    (Version, Version),
}

fn main() {
    let args = Args::parse();

    // RUST_LOG > --log-level > config log_level > info
    let log_level = op::resolve_log_level(args.log_level, args.config_path.clone());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();

    let ctx = op::OpContext::new(args.config_path, args.pin);

    match args.command.execute(&ctx) {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
