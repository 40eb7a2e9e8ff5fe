//! # tally-config
//!
//! Layered configuration loading for Tally using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`TALLY_*` prefix, `__` as separator)
//! 2. An explicit config file, or `./tally.toml` when present
//! 3. User-level `~/.config/tally/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `TALLY_OAUTH__CLIENT_ID` -> `oauth.client_id`,
//! `TALLY_DESTINATION__LOAD_TYPE` -> `destination.load_type`, etc.
//! List values (`extract.endpoints`, `extract.tenant_ids`) accept either a TOML
//! array or a comma-separated string.
//!
//! # Usage
//!
//! ```no_run
//! use tally_config::TallyConfig;
//!
//! let config = TallyConfig::load_with_dotenv(None).expect("config");
//! config.validate().expect("valid config");
//! println!("endpoints: {:?}", config.extract.endpoints);
//! ```

mod destination;
mod error;
mod extract;
mod oauth;
mod provider;
mod retry;
pub mod since;

pub use destination::DestinationConfig;
pub use error::ConfigError;
pub use extract::ExtractConfig;
pub use oauth::OAuthConfig;
pub use provider::ProviderConfig;
pub use retry::RetryConfig;

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

const LOCAL_CONFIG_FILE: &str = "tally.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
}

impl TallyConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy` -- use [`Self::load_with_dotenv`] for `.env` support.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Figment`] if a source cannot be read or a value
    /// has the wrong type.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::figment(file).extract().map_err(ConfigError::from)
    }

    /// Load configuration after reading `.env` from the current directory.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_with_dotenv(file: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load(file)
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment directly or layer additional
    /// providers on top.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(global_path));
        }

        match file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local_path = PathBuf::from(LOCAL_CONFIG_FILE);
                if local_path.exists() {
                    figment = figment.merge(Toml::file(local_path));
                }
            }
        }

        figment.merge(Env::prefixed("TALLY_").split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tally").join("config.toml"))
    }

    /// Check everything that must hold before any provider call is made.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotConfigured`] when OAuth credentials are missing
    /// - [`ConfigError::Selection`] for an empty or unknown endpoint selection
    /// - [`ConfigError::InvalidValue`] for an unparseable `modified_since`,
    ///   zero concurrency, or an empty provider URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.oauth.is_configured() {
            return Err(ConfigError::NotConfigured {
                section: "oauth".into(),
            });
        }
        self.extract.endpoint_selection()?;
        self.extract.modified_since_at(chrono::Utc::now())?;
        if self.extract.concurrency == 0 {
            return Err(ConfigError::invalid(
                "extract.concurrency",
                "must be at least 1",
            ));
        }
        for (field, url) in [
            ("oauth.token_url", &self.oauth.token_url),
            ("provider.api_base_url", &self.provider.api_base_url),
            ("provider.connections_url", &self.provider.connections_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        Ok(())
    }
}
