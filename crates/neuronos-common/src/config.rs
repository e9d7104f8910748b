//! HAL configuration: backend preference, capability override, and threading.
//!
//! Values are layered: defaults, then an optional TOML/JSON file, then
//! `NEURONOS_*` environment variables.

use crate::capability::CapabilityMask;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

pub const ENV_BACKEND: &str = "NEURONOS_BACKEND";
pub const ENV_FEATURE_MASK: &str = "NEURONOS_FEATURE_MASK";
pub const ENV_NUM_THREADS: &str = "NEURONOS_NUM_THREADS";
pub const ENV_VERIFY_BACKEND: &str = "NEURONOS_VERIFY_BACKEND";

/// Which backend a session should use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendPreference {
    /// Highest-priority eligible backend.
    #[default]
    Auto,
    /// A specific backend by descriptor name; it must still be eligible.
    Named(String),
}

impl From<String> for BackendPreference {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            BackendPreference::Auto
        } else {
            BackendPreference::Named(trimmed.to_string())
        }
    }
}

impl From<BackendPreference> for String {
    fn from(pref: BackendPreference) -> Self {
        match pref {
            BackendPreference::Auto => "auto".to_string(),
            BackendPreference::Named(name) => name,
        }
    }
}

/// Configuration consumed when a kernel session is started.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    pub backend: BackendPreference,
    /// Replaces the detected capability mask (numeric or flag names).
    pub feature_mask: Option<String>,
    pub num_threads: Option<usize>,
    /// Cross-check the selected backend against the portable reference at startup.
    pub verify_backend: bool,
}

impl HalConfig {
    /// Defaults, then `path` if given, then environment overrides; validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Parse a TOML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::from)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(ConfigError::from)?,
            Some("json") => serde_json::from_str(&content).map_err(ConfigError::from)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                )
                .into());
            }
        };
        log::debug!("loaded HAL config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_BACKEND) {
            self.backend = BackendPreference::from(value);
        }
        if let Ok(value) = env::var(ENV_FEATURE_MASK) {
            self.feature_mask = Some(value);
        }
        if let Ok(value) = env::var(ENV_NUM_THREADS) {
            let threads = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue { key: ENV_NUM_THREADS, value })?;
            self.num_threads = Some(threads);
        }
        if let Ok(value) = env::var(ENV_VERIFY_BACKEND) {
            self.verify_backend = parse_bool(&value)
                .ok_or(ConfigError::InvalidValue { key: ENV_VERIFY_BACKEND, value })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "num_threads",
                value: "0".to_string(),
            }
            .into());
        }
        self.feature_mask_override()?;
        Ok(())
    }

    /// The parsed capability override, if one is configured.
    pub fn feature_mask_override(&self) -> Result<Option<CapabilityMask>> {
        match &self.feature_mask {
            None => Ok(None),
            Some(raw) => raw.parse::<CapabilityMask>().map(Some).map_err(|_| {
                ConfigError::InvalidValue { key: "feature_mask", value: raw.clone() }.into()
            }),
        }
    }

    /// The mask selection should use: the override if present, else `detected`.
    pub fn effective_capabilities(&self, detected: CapabilityMask) -> Result<CapabilityMask> {
        Ok(self.feature_mask_override()?.unwrap_or(detected))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
