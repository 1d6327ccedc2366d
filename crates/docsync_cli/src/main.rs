//! docsync CLI
//!
//! Command-line tools for docsync sessions.
//!
//! # Commands
//!
//! - `encrypt` - Encrypt the eligible fields of a JSON document
//! - `decrypt` - Decrypt a document produced by `encrypt`
//! - `settings` - Show, save or clear the persisted connection settings
//! - `status` - Show the persisted session activity log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docsync command-line tools.
#[derive(Parser)]
#[command(name = "docsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding settings.json and status.json
    #[arg(global = true, short, long, default_value = ".docsync")]
    dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt the eligible fields of a JSON document
    Encrypt {
        /// Document file (JSON object)
        input: PathBuf,

        /// Encryption password
        #[arg(short, long)]
        password: String,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a document produced by `encrypt`
    Decrypt {
        /// Document file (JSON object)
        input: PathBuf,

        /// Encryption password
        #[arg(short, long)]
        password: String,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage persisted connection settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Show the persisted session activity log
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the saved settings with the password redacted
    Show {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Update the saved settings; unspecified fields keep their value
    Save {
        /// Remote database address
        #[arg(short, long)]
        address: Option<String>,

        /// Login name
        #[arg(short, long)]
        username: Option<String>,

        /// Login and encryption password
        #[arg(short, long)]
        password: Option<String>,

        /// Keep reconnecting in the background (true, false)
        #[arg(short, long)]
        stay_connected: Option<bool>,
    },

    /// Remove the saved settings
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Encrypt {
            input,
            password,
            output,
        } => {
            commands::crypt::run(commands::crypt::Mode::Encrypt, &input, &password, output.as_deref())?;
        }
        Commands::Decrypt {
            input,
            password,
            output,
        } => {
            commands::crypt::run(commands::crypt::Mode::Decrypt, &input, &password, output.as_deref())?;
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show { format } => {
                commands::settings::show(&cli.dir, &format).await?;
            }
            SettingsAction::Save {
                address,
                username,
                password,
                stay_connected,
            } => {
                let update = commands::settings::Update {
                    address,
                    username,
                    password,
                    stay_connected,
                };
                commands::settings::save(&cli.dir, update).await?;
            }
            SettingsAction::Clear => {
                commands::settings::clear(&cli.dir).await?;
            }
        },
        Commands::Status { format } => {
            commands::status::run(&cli.dir, &format).await?;
        }
        Commands::Version => {
            println!("docsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
