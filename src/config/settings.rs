//! Configuration settings for the session gate.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::GateError;

/// Main configuration structure.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cookie: CookieConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Path to a file holding the session secret. Takes precedence over
    /// `secret_env` when set.
    #[serde(default)]
    pub secret_path: Option<PathBuf>,
    /// Environment variable holding the session secret.
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Lifetime of issued tokens in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

/// A single rate limit policy.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Maximum admitted requests per window.
    pub limit: usize,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Policy for login and registration endpoints.
    #[serde(default = "default_login_policy")]
    pub login: PolicyConfig,
    /// Policy for JSON API endpoints.
    #[serde(default = "default_api_policy")]
    pub api: PolicyConfig,
    /// Policy for everything else.
    #[serde(default = "default_general_policy")]
    pub general: PolicyConfig,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Cookie Max-Age in seconds.
    #[serde(default = "default_cookie_max_age")]
    pub max_age_seconds: u64,
    /// Whether to set the Secure attribute (enable behind HTTPS).
    #[serde(default)]
    pub secure: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_secret_env() -> String {
    "SESSION_SECRET".to_string()
}

fn default_token_ttl_hours() -> u64 {
    168 // 7 days
}

fn default_login_policy() -> PolicyConfig {
    PolicyConfig {
        limit: 5,
        window_seconds: 300,
    }
}

fn default_api_policy() -> PolicyConfig {
    PolicyConfig {
        limit: 100,
        window_seconds: 60,
    }
}

fn default_general_policy() -> PolicyConfig {
    PolicyConfig {
        limit: 60,
        window_seconds: 60,
    }
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_cookie_max_age() -> u64 {
    86_400 * 7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_path: None,
            secret_env: default_secret_env(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: default_login_policy(),
            api: default_api_policy(),
            general: default_general_policy(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            max_age_seconds: default_cookie_max_age(),
            secure: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RateLimitConfig {
    /// Longest configured window in seconds.
    pub fn longest_window_seconds(&self) -> u64 {
        [self.login, self.api, self.general]
            .iter()
            .map(|p| p.window_seconds)
            .max()
            .unwrap_or(60)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GateError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let settings = Self::from_toml(&content).map_err(|e| GateError::Config {
            message: format!("Failed to load config file '{}': {}", path.display(), e),
        })?;

        Ok(settings)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, GateError> {
        let settings: Settings = toml::from_str(content).map_err(|e| GateError::Config {
            message: e.to_string(),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), GateError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(GateError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(GateError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.security.token_ttl_hours == 0 {
            return Err(GateError::Config {
                message: "token_ttl_hours must be greater than zero".to_string(),
            });
        }

        for (name, policy) in [
            ("login", &self.rate_limit.login),
            ("api", &self.rate_limit.api),
            ("general", &self.rate_limit.general),
        ] {
            if policy.window_seconds == 0 {
                return Err(GateError::Config {
                    message: format!("rate_limit.{name}.window_seconds must be greater than zero"),
                });
            }
        }

        if self.cookie.name.is_empty() || self.cookie.name.contains([';', '=', ' ']) {
            return Err(GateError::Config {
                message: format!("Invalid cookie name '{}'", self.cookie.name),
            });
        }

        Ok(())
    }
}
