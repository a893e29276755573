//! CLI entry point: logging, config loading and command dispatch.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use voxgate_cli::{Cli, CliError, Commands, handlers};
use voxgate_core::TurnConfig;

// The simulator pauses the clock, which needs a current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => TurnConfig::from_path(path).map_err(CliError::from)?,
        None => TurnConfig::default(),
    };

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Simulate { scenario, json } => {
            handlers::simulate::execute(&scenario, json, &config).await?;
        }
        Commands::Policy {
            user_agent,
            max_touch_points,
        } => {
            handlers::policy::execute(user_agent.as_deref(), max_touch_points)?;
        }
        Commands::Config => {
            handlers::config::execute(&config)?;
        }
    }

    Ok(())
}
