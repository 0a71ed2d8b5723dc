use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cryptoprefs",
    about = "Typed, encrypted key-value preferences from the terminal",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Preferences file to operate on (overrides `file_name` from config).
    #[arg(long, short, global = true)]
    pub file: Option<String>,

    /// Optional subcommand; defaults to listing every entry.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read a value; a missing key is created with DEFAULT.
    Get {
        key: String,
        default: String,
        /// Value type (text, bool, i8, i16, i32, i64, f32, f64).
        #[arg(long, short)]
        kind: Option<String>,
    },
    /// Write a value immediately.
    Put {
        key: String,
        value: String,
        #[arg(long, short)]
        kind: Option<String>,
    },
    /// Queue KEY=VALUE writes and apply them as one batch.
    Queue {
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
        #[arg(long, short)]
        kind: Option<String>,
    },
    /// Delete a key (absent keys are fine).
    Remove { key: String },
    /// Delete every entry of the file.
    Erase {
        /// Confirm the irreversible wipe.
        #[arg(long)]
        yes: bool,
    },
    /// Print every entry.
    List,
    /// Round-trip a probe value through the encrypted store.
    Health,
    /// Print a fresh base64 data key for the `key` config setting.
    Keygen,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
