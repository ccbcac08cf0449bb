//! Configuration
//!
//! Typed configuration loaded from a JSON5 file. Every section has defaults,
//! so an empty file (or no file at all) yields a working setup with an
//! in-memory store.
//!
//! ```json5
//! {
//!   logging: { level: "chatpoll=debug", format: "json" },
//!   polls: { maxOptions: 12, persistenceEnabled: true },
//!   store: { kind: "file", dir: "/var/lib/chatpoll" },
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LoggingConfig;

/// Overrides the logging filter
pub const ENV_LOG_LEVEL: &str = "CHATPOLL_LOG_LEVEL";
/// Switches the store to a file store in the given directory
pub const ENV_STORE_DIR: &str = "CHATPOLL_STORE_DIR";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub logging: LoggingConfig,
    pub polls: PollsConfig,
    pub store: StoreConfig,
}

/// Poll limits and runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollsConfig {
    /// Write remote polls to the store and hydrate them from it
    pub persistence_enabled: bool,
    /// Maximum question length in characters
    pub max_question_length: usize,
    /// Maximum option text length in characters
    pub max_option_length: usize,
    pub max_options: usize,
    /// Capacity of the poll service command channel
    pub command_buffer: usize,
    /// How long shutdown waits for queued store requests to drain
    pub shutdown_flush_timeout_ms: u64,
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: true,
            max_question_length: 255,
            max_option_length: 100,
            max_options: 10,
            command_buffer: 256,
            shutdown_flush_timeout_ms: 5_000,
        }
    }
}

/// Backing store for persisted polls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Records live for the process lifetime only
    #[default]
    Memory,
    /// One file per record under `dir`
    File { dir: PathBuf },
}

impl Config {
    /// Load configuration from a JSON5 file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json5(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string. Environment is not consulted.
    pub fn from_json5(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHATPOLL_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(dir) = lookup(ENV_STORE_DIR).filter(|v| !v.trim().is_empty()) {
            self.store = StoreConfig::File {
                dir: PathBuf::from(dir),
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let polls = &self.polls;
        if polls.command_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "polls.commandBuffer",
                reason: "must be greater than zero".to_string(),
            });
        }
        if polls.max_options == 0 {
            return Err(ConfigError::Invalid {
                field: "polls.maxOptions",
                reason: "must be greater than zero".to_string(),
            });
        }
        if polls.max_question_length == 0 || polls.max_option_length == 0 {
            return Err(ConfigError::Invalid {
                field: "polls",
                reason: "text length limits must be greater than zero".to_string(),
            });
        }
        if let StoreConfig::File { dir } = &self.store {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "store.dir",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_json5("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.polls.persistence_enabled);
        assert_eq!(config.polls.max_options, 10);
        assert_eq!(config.polls.shutdown_flush_timeout_ms, 5_000);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_parse_json5() {
        let config = Config::from_json5(
            r#"{
                // comments and trailing commas are allowed
                logging: { level: "debug", format: "json" },
                polls: { maxOptions: 4, persistenceEnabled: false, shutdownFlushTimeoutMs: 250 },
                store: { kind: "file", dir: "/tmp/polls" },
            }"#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.polls.max_options, 4);
        assert!(!config.polls.persistence_enabled);
        assert_eq!(config.polls.max_question_length, 255);
        assert_eq!(config.polls.shutdown_flush_timeout_ms, 250);
        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: PathBuf::from("/tmp/polls")
            }
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_json5("{ polls: { commandBuffer: 0 } }"),
            Err(ConfigError::Invalid { field: "polls.commandBuffer", .. })
        ));
        assert!(matches!(
            Config::from_json5(r#"{ store: { kind: "file", dir: "" } }"#),
            Err(ConfigError::Invalid { field: "store.dir", .. })
        ));
        assert!(matches!(
            Config::from_json5("{ polls: "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "chatpoll=trace"),
            (ENV_STORE_DIR, "/data/polls"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.logging.level, "chatpoll=trace");
        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: PathBuf::from("/data/polls")
            }
        );
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatpoll.json5");
        std::fs::write(&path, "{ polls: { maxOptions: 3 } }").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.polls.max_options, 3);

        assert!(matches!(
            Config::load(dir.path().join("missing.json5")),
            Err(ConfigError::Read { .. })
        ));
    }
}
