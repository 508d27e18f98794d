use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use subnet_treasury::cli::setup;
use subnet_treasury::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Serve the dashboard API
    Serve,
    /// Display the treasury summary
    Summary {
        /// Refresh on the configured poll interval
        #[arg(short, long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup::setup_at_path(path),
            None => setup::setup(),
        },
        Some(Commands::Serve) => {
            subnet_treasury::run_command(
                subnet_treasury::AppCommand::Serve,
                cli.config_path.as_deref(),
            )
            .await
        }
        Some(Commands::Summary { watch }) => {
            subnet_treasury::run_command(
                subnet_treasury::AppCommand::Summary { watch },
                cli.config_path.as_deref(),
            )
            .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
