use crate::data::Locale;
use crate::error::ConfigError;
use crate::flow::VersionGate;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fs;

/// Tunables for an [`Engine`](crate::engine::Engine).
///
/// Every field has a default, so a config file only needs the keys it changes:
///
/// ```json
/// { "async_timeout_secs": 30, "locale": { "decimal_separator": ",", "grouping_separator": "." } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_spec_major: u32,
    pub max_spec_major: u32,
    /// How long a webhook ruleset waits before its lookup counts as timed out.
    pub async_timeout_secs: i64,
    /// Nodes `advance` may execute in one call before the run is treated as looping.
    pub max_steps_per_advance: usize,
    /// Freeze completed runs into submissions as soon as they complete.
    pub auto_finalize: bool,
    /// Overrides the organization's locale for response parsing and coercion.
    pub locale: Option<Locale>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let gate = VersionGate::default();
        Self {
            min_spec_major: gate.min_major,
            max_spec_major: gate.max_major,
            async_timeout_secs: 60,
            max_steps_per_advance: 500,
            auto_finalize: true,
            locale: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_spec_major > self.max_spec_major {
            return Err(ConfigError::Invalid(format!(
                "min_spec_major {} is greater than max_spec_major {}",
                self.min_spec_major, self.max_spec_major
            )));
        }
        if self.async_timeout_secs <= 0 {
            return Err(ConfigError::Invalid(
                "async_timeout_secs must be positive".to_string(),
            ));
        }
        if self.max_steps_per_advance == 0 {
            return Err(ConfigError::Invalid(
                "max_steps_per_advance must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn version_gate(&self) -> VersionGate {
        VersionGate::new(self.min_spec_major, self.max_spec_major)
    }

    /// Falls back to the default timeout when the configured one does not fit a `TimeDelta`.
    pub fn async_timeout(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.async_timeout_secs)
            .or_else(|| TimeDelta::try_seconds(Self::default().async_timeout_secs))
            .unwrap_or_default()
    }
}
