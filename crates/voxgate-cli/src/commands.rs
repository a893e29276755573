//! Available subcommands.

use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a JSON scenario against the coordinator on a virtual clock
    Simulate {
        /// Path to the scenario file
        scenario: PathBuf,
        /// Print the report as JSON instead of a timeline
        #[arg(long)]
        json: bool,
    },

    /// Show which platform quirk policy a user agent selects
    Policy {
        /// Browser user-agent string
        #[arg(long, env = "VOXGATE_USER_AGENT")]
        user_agent: Option<String>,
        /// `navigator.maxTouchPoints` reported by the browser
        #[arg(long, default_value_t = 0)]
        max_touch_points: u32,
    },

    /// Print the effective coordinator config
    Config,
}
