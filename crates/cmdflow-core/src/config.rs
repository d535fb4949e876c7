//! Orchestrator configuration.
//!
//! Defaults, optionally overlaid by a JSON file, then by environment
//! variables:
//!
//! | variable | field |
//! |---|---|
//! | `CMDFLOW_MAX_ALTERNATIVES` | `resolver.max_alternatives` |
//! | `CMDFLOW_DEFAULT_BACKOFF_MS` | `engine.default_retry_policy.backoff_ms` |
//! | `CMDFLOW_MAX_CONCURRENT_STAGES` | `engine.max_concurrent_stages` |

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::EngineConfig;
use crate::selection::ResolverConfig;

pub const ENV_MAX_ALTERNATIVES: &str = "CMDFLOW_MAX_ALTERNATIVES";
pub const ENV_DEFAULT_BACKOFF_MS: &str = "CMDFLOW_DEFAULT_BACKOFF_MS";
pub const ENV_MAX_CONCURRENT_STAGES: &str = "CMDFLOW_MAX_CONCURRENT_STAGES";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the resolver and the pipeline engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub resolver: ResolverConfig,
    pub engine: EngineConfig,
}

impl OrchestratorConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup` (injectable for tests).
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, ENV_MAX_ALTERNATIVES)? {
            self.resolver.max_alternatives = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_DEFAULT_BACKOFF_MS)? {
            self.engine.default_retry_policy.backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_CONCURRENT_STAGES)? {
            self.engine.max_concurrent_stages = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .default_retry_policy
            .validate()
            .map_err(ConfigError::Invalid)?;
        if self.engine.max_concurrent_stages == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_stages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: raw,
            }),
    }
}
