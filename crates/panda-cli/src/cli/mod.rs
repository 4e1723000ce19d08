//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use panda_auth::config;
use panda_auth::interrupt;
use panda_auth::logging;
use panda_auth::provider::Domain;
use tracing::debug;

mod commands;

#[derive(Parser)]
#[command(name = "panda")]
#[command(version)]
#[command(about = "Sign in to the panda client with Internet Identity")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in through the identity provider in your browser
    Login {
        /// Identity provider domain (ic0.app or internetcomputer.org)
        #[arg(long, value_parser = parse_domain)]
        domain: Option<Domain>,
    },

    /// Log out and remove the stored session
    Logout,

    /// Show the signed-in principal
    Whoami,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

fn parse_domain(value: &str) -> Result<Domain, String> {
    value.parse().map_err(|err: anyhow::Error| format!("{err:#}"))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    interrupt::init()?;

    let _log_guard = match logging::init_file_logging() {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: file logging disabled: {err:#}");
            None
        }
    };

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = config::paths::config_path();
    let config = config::Config::load().context("load config")?;
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "panda starting"
    );

    match cli.command {
        Commands::Login { domain } => commands::auth::login(&config, domain).await,
        Commands::Logout => commands::auth::logout(&config).await,
        Commands::Whoami => commands::auth::whoami(&config).await,

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
