//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for the audio turn-taking coordinator.
#[derive(Parser)]
#[command(name = "voxgate")]
#[command(about = "Simulate and inspect the audio turn-taking coordinator")]
#[command(version)]
pub struct Cli {
    /// Coordinator config file (JSON)
    #[arg(long = "config", global = true, env = "VOXGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["voxgate", "config", "--verbose", "--config", "/tmp/turn.json"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/turn.json")));
        assert!(matches!(cli.command, Some(Commands::Config)));
    }

    #[test]
    fn test_policy_args() {
        let cli = Cli::parse_from([
            "voxgate",
            "policy",
            "--user-agent",
            "Mozilla/5.0 (iPhone)",
            "--max-touch-points",
            "5",
        ]);
        match cli.command {
            Some(Commands::Policy {
                user_agent,
                max_touch_points,
            }) => {
                assert_eq!(user_agent.as_deref(), Some("Mozilla/5.0 (iPhone)"));
                assert_eq!(max_touch_points, 5);
            }
            _ => panic!("expected policy command"),
        }
    }

    #[test]
    fn test_simulate_requires_scenario() {
        assert!(Cli::try_parse_from(["voxgate", "simulate"]).is_err());
        let cli = Cli::parse_from(["voxgate", "simulate", "barge_in.json"]);
        match cli.command {
            Some(Commands::Simulate { scenario, json }) => {
                assert_eq!(scenario, PathBuf::from("barge_in.json"));
                assert!(!json);
            }
            _ => panic!("expected simulate command"),
        }
    }
}
