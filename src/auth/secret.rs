//! Session secret loading.

use std::fmt;
use std::path::Path;

use tracing::warn;

use crate::config::SecurityConfig;
use crate::error::GateError;

/// Secret used when nothing is configured. Any deployment running on it is
/// misconfigured: everyone who knows this string can forge sessions.
pub const INSECURE_FALLBACK_SECRET: &str = "default-secret-key-change-in-production";

/// The process-wide key that signs session tokens.
#[derive(Clone)]
pub struct SessionSecret {
    bytes: Vec<u8>,
    insecure_fallback: bool,
}

impl SessionSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, GateError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(GateError::Secret {
                message: "Session secret must not be empty".to_string(),
            });
        }
        Ok(Self {
            bytes,
            insecure_fallback: false,
        })
    }

    /// Resolve the secret as configured: from `secret_path` when set,
    /// otherwise from the `secret_env` environment variable.
    pub fn resolve(config: &SecurityConfig) -> Result<Self, GateError> {
        match &config.secret_path {
            Some(path) => Self::load_file(path),
            None => Ok(Self::from_env(&config.secret_env)),
        }
    }

    /// Read the secret from an environment variable.
    ///
    /// Falls back to [`INSECURE_FALLBACK_SECRET`] when the variable is unset
    /// or empty, and logs a warning.
    pub fn from_env(var: &str) -> Self {
        Self::from_lookup(var, |name| std::env::var(name).ok())
    }

    /// Like [`SessionSecret::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(var: &str, lookup: F) -> Self
    where
        F: FnOnce(&str) -> Option<String>,
    {
        match lookup(var) {
            Some(value) if !value.is_empty() => Self {
                bytes: value.into_bytes(),
                insecure_fallback: false,
            },
            _ => {
                warn!(
                    env = var,
                    "Session secret not set, using insecure fallback; set it before deploying"
                );
                Self {
                    bytes: INSECURE_FALLBACK_SECRET.as_bytes().to_vec(),
                    insecure_fallback: true,
                }
            }
        }
    }

    /// Load the secret from a file.
    ///
    /// Security: Verifies the file has restrictive permissions (0600 or 0400)
    /// before loading. Trailing whitespace is stripped.
    pub fn load_file(path: &Path) -> Result<Self, GateError> {
        let metadata = std::fs::metadata(path).map_err(|e| GateError::Secret {
            message: format!(
                "Failed to read session secret metadata from {}: {}",
                path.display(),
                e
            ),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            // Only the owner may have any access
            if mode & 0o077 != 0 {
                return Err(GateError::Secret {
                    message: format!(
                        "Session secret file {} has insecure permissions {:04o}, expected 0600 or 0400",
                        path.display(),
                        mode & 0o777
                    ),
                });
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let mut bytes = std::fs::read(path).map_err(|e| GateError::Secret {
            message: format!(
                "Failed to read session secret from {}: {}",
                path.display(),
                e
            ),
        })?;

        let trimmed = bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        bytes.truncate(trimmed);

        Self::new(bytes).map_err(|_| GateError::Secret {
            message: format!("Session secret file {} is empty", path.display()),
        })
    }

    /// The raw key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether this is the built-in fallback rather than a configured secret.
    pub fn is_insecure_fallback(&self) -> bool {
        self.insecure_fallback
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSecret")
            .field("len", &self.bytes.len())
            .field("insecure_fallback", &self.insecure_fallback)
            .finish()
    }
}
