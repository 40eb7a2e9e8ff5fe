use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Top-level CLI parser for the `tally` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tally",
    version,
    about = "Extract accounting data for every authorized tenant into DuckDB"
)]
pub struct Cli {
    /// Configuration file (defaults to ./tally.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Refresh-token state file (overrides destination.state_path)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Stop starting new pages after this many seconds
    #[arg(long, value_name = "SECS")]
    pub time_budget: Option<u64>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    #[must_use]
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget.map(Duration::from_secs)
    }

    /// Default log filter when `TALLY_LOG` is unset.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}
