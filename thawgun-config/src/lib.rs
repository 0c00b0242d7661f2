//! # ThawGun Configuration
//!
//! Layered configuration for the time-travel controller.
//!
//! ## Features
//! - **Defaults first**: every field has a sensible default, an empty file is valid
//! - **Validation**: ranges and log levels are checked after merging
//! - **Environment overrides**: `THAWGUN_*` variables, `__` separates nesting levels

#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod clock;
mod drain;
mod error;
mod telemetry;
mod validation;

pub use clock::{ClockConfig, StartMode};
pub use drain::DrainConfig;
pub use error::ConfigError;
pub use telemetry::TelemetryConfig;

/// Base configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/thawgun.yaml";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct ThawConfig {
    /// Virtual clock and wall clock setup.
    #[validate(nested)]
    #[serde(default)]
    pub clock: ClockConfig,

    /// Drain loop limits.
    #[validate(nested)]
    #[serde(default)]
    pub drain: DrainConfig,

    /// Logging and metrics.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ThawConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/thawgun.yaml`, if present
    /// 3. `config/<THAWGUN_ENV>.yaml`, if present
    /// 4. `THAWGUN_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ThawConfig::default()));

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_CONFIG_FILE));
        } else {
            tracing::debug!("{DEFAULT_CONFIG_FILE} not found, using default configuration");
        }

        if let Ok(env) = std::env::var("THAWGUN_ENV") {
            let env_file = format!("config/{}.yaml", env);
            if Path::new(&env_file).exists() {
                figment = figment.merge(Yaml::file(env_file));
            }
        }

        Self::extract(figment.merge(Env::prefixed("THAWGUN_").split("__")))
    }

    /// Load configuration from a specific path, still honouring environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        Self::extract(
            Figment::from(Serialized::defaults(ThawConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("THAWGUN_").split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
