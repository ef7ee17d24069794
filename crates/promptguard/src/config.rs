//! Configuration management for promptguard.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::detection::{EmailPattern, DEFAULT_PLACEHOLDER};
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "promptguard";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "issues.db";

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `PROMPTGUARD_`)
/// 2. TOML config file at `~/.config/promptguard/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Interception configuration.
    pub interception: InterceptionConfig,
    /// Snooze configuration.
    pub snooze: SnoozeConfig,
    /// Presentation configuration.
    pub presentation: PresentationConfig,
    /// Coordinator configuration.
    pub coordinator: CoordinatorConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/promptguard/issues.db`
    pub database_path: Option<PathBuf>,
}

/// Which requests are inspected and how matches are replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionConfig {
    /// URL fragments identifying the chat API. Any one must be present.
    pub endpoint_markers: Vec<String>,
    /// URL fragment identifying a conversation resource. Must be present.
    pub resource_marker: String,
    /// Token written in place of each match.
    pub placeholder: String,
}

/// Dismissal and snooze windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeConfig {
    /// Length of a dismissal or snooze, in hours.
    pub duration_hours: u32,
    /// Dismissing a single issue is permanent instead of time-boxed.
    pub permanent_issue_dismiss: bool,
}

/// UI surface behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Ask for the UI surface when a detection produces an active issue.
    pub auto_show: bool,
    /// Program and arguments run to show the surface. Empty means log only.
    pub command: Vec<String>,
}

/// Coordinator queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of actions that may wait for the coordinator.
    pub queue_capacity: usize,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            endpoint_markers: vec!["backend-api".to_string(), "backend-anon".to_string()],
            resource_marker: "conversation".to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            duration_hours: 24,
            permanent_issue_dismiss: false,
        }
    }
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            auto_show: true,
            command: Vec::new(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

impl SnoozeConfig {
    /// The snooze window in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_hours) * MS_PER_HOUR
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("PROMPTGUARD_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let interception = &self.interception;
        if interception.endpoint_markers.is_empty()
            || interception.endpoint_markers.iter().any(String::is_empty)
        {
            return Err(Error::ConfigValidation {
                message: "endpoint_markers must contain at least one non-empty marker".to_string(),
            });
        }

        if interception.resource_marker.is_empty() {
            return Err(Error::ConfigValidation {
                message: "resource_marker must not be empty".to_string(),
            });
        }

        if EmailPattern::new().matches(&interception.placeholder) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "placeholder '{}' looks like an email address",
                    interception.placeholder
                ),
            });
        }

        // A placeholder that can join with neighbouring text into a new match
        // would let a second redaction pass find addresses the first one made.
        let placeholder = &interception.placeholder;
        if placeholder.is_empty()
            || placeholder.ends_with(is_local_part_char)
            || placeholder.starts_with(is_domain_char)
        {
            return Err(Error::ConfigValidation {
                message: format!(
                    "placeholder '{placeholder}' must not be empty, end with an address \
                     character or start with a domain character"
                ),
            });
        }

        if self.snooze.duration_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "duration_hours must be greater than 0".to_string(),
            });
        }

        if self
            .presentation
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(Error::ConfigValidation {
                message: "presentation command must start with a program name".to_string(),
            });
        }

        if self.coordinator.queue_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "queue_capacity must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

fn is_local_part_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}
