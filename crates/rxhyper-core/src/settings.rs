//! Runtime settings loaded from TOML and the environment

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::capability::names;
use crate::errors::{RxError, RxResult};

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "RXHYPER_";

/// Tunables shared by every subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Capability name of the storage backend used when a caller supplies none
    pub default_storage: String,
    /// Quiescence window before peer discovery is declared complete
    pub finding_peers_quiescence_ms: u64,
    /// Capacity of event broadcast channels
    pub event_buffer: usize,
    /// Refuse `scheme://` module specifiers in the module loader
    pub reject_remote_modules: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_storage: names::MEMORY_STORAGE.to_string(),
            finding_peers_quiescence_ms: 6_000,
            event_buffer: 256,
            reject_remote_modules: true,
        }
    }
}

impl RuntimeSettings {
    /// Parse settings from a TOML document
    pub fn from_toml_str(content: &str) -> RxResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file
    pub fn load_from_file(path: &Path) -> RxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `RXHYPER_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> RxResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from explicit key/value pairs (keys carry the prefix)
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> RxResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field.to_ascii_lowercase().as_str() {
                "default_storage" => self.default_storage = value.to_string(),
                "finding_peers_quiescence_ms" => {
                    self.finding_peers_quiescence_ms = parse_field(field, value)?;
                }
                "event_buffer" => self.event_buffer = parse_field(field, value)?,
                "reject_remote_modules" => {
                    self.reject_remote_modules = parse_field(field, value)?;
                }
                _ => {}
            }
        }
        self.validate()
    }

    /// Check invariants
    pub fn validate(&self) -> RxResult<()> {
        if self.default_storage.is_empty() {
            return Err(RxError::usage("default_storage must not be empty"));
        }
        if self.event_buffer == 0 {
            return Err(RxError::usage("event_buffer must be at least 1"));
        }
        Ok(())
    }

    /// Quiescence window as a duration
    pub fn finding_peers_quiescence(&self) -> Duration {
        Duration::from_millis(self.finding_peers_quiescence_ms)
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> RxResult<T> {
    value
        .parse()
        .map_err(|_| RxError::usage(format!("Invalid value '{value}' for {field}")))
}
