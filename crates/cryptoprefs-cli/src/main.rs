mod cli;
mod config;
mod prefs;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the encrypted preference store.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(Command::List) {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Keygen => {
            println!("{}", cryptoprefs_storage::key_provider::generate_encoded_key())
        }
        cmd => {
            let file_name = cli.file.as_deref().unwrap_or_else(|| config.file_name());
            let prefs = storage::prefs_from_config(&config, file_name)?;
            let mut stdout = std::io::stdout().lock();
            prefs::handle(cmd, &prefs, config.default_kind(), &mut stdout).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so values on
    // stdout stay scriptable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cryptoprefs {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
