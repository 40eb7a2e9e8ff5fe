//! Output destination settings.

use serde::{Deserialize, Serialize};
use tally_core::LoadPolicy;

fn default_database_path() -> String {
    String::from("tally.duckdb")
}

fn default_state_path() -> String {
    String::from("tally-state.json")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    /// `full_load` or `incremental_load`.
    #[serde(default)]
    pub load_type: LoadPolicy,

    /// `DuckDB` file the output tables are written to.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// JSON file holding rotated refresh tokens between runs.
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            load_type: LoadPolicy::default(),
            database_path: default_database_path(),
            state_path: default_state_path(),
        }
    }
}
