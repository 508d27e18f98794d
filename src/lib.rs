pub mod cli;
pub mod core;
pub mod dashboard;
pub mod present;
pub mod providers;
pub mod server;

use crate::core::config::{AppConfig, Credentials};
use anyhow::Result;
use dashboard::Sources;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Summary { watch: bool },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Subnet treasury starting...");

    // A missing .env file is fine, keys may come from the real environment
    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", path.display());
    }

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let credentials = Credentials::from_env();
    debug!(?credentials, "Loaded credentials");
    let sources = Sources::from_config(&config, credentials)?;

    match command {
        AppCommand::Serve => server::serve(server::AppState::new(sources, config)).await,
        AppCommand::Summary { watch: false } => cli::summary::run(&sources, &config).await,
        AppCommand::Summary { watch: true } => cli::summary::watch(&sources, &config).await,
    }
}
