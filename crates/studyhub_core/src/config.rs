//! Runtime configuration read from `STUDYHUB_*` environment variables.
//!
//! # Invariants
//! - Every variable is optional; unset variables keep their default.
//! - Malformed values are reported as `ConfigError`, never silently ignored.

use crate::context::{CallerIdentity, LocalIdentityResolver};
use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::logging::{default_log_level, normalize_level, normalize_log_dir};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "STUDYHUB_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "STUDYHUB_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "STUDYHUB_LOG_DIR";
pub const ENV_LOCAL_MODE: &str = "STUDYHUB_LOCAL_MODE";
pub const ENV_LOCAL_USER: &str = "STUDYHUB_LOCAL_USER";
pub const ENV_LOCAL_RESEARCHER: &str = "STUDYHUB_LOCAL_RESEARCHER";

const DEFAULT_LOCAL_USER: &str = "local-researcher";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}=`{}`: {}", self.key, self.value, self.reason)
    }
}

impl Error for ConfigError {}

/// Resolved core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Database file; `None` runs against an in-memory database.
    pub db_path: Option<PathBuf>,
    pub log_level: &'static str,
    /// Log directory; `None` leaves file logging off.
    pub log_dir: Option<PathBuf>,
    pub local_mode: bool,
    pub local_user: String,
    pub local_researcher: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: default_log_level(),
            log_dir: None,
            local_mode: false,
            local_user: DEFAULT_LOCAL_USER.to_string(),
            local_researcher: true,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = read(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&level).map_err(|err| ConfigError {
                key: ENV_LOG_LEVEL,
                value: level.clone(),
                reason: err.to_string(),
            })?;
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            let path = normalize_log_dir(Path::new(&dir)).map_err(|err| ConfigError {
                key: ENV_LOG_DIR,
                value: dir.clone(),
                reason: err.to_string(),
            })?;
            config.log_dir = Some(path);
        }
        if let Some(flag) = read(ENV_LOCAL_MODE) {
            config.local_mode = parse_flag(ENV_LOCAL_MODE, &flag)?;
        }
        if let Some(user) = read(ENV_LOCAL_USER) {
            config.local_user = user;
        }
        if let Some(flag) = read(ENV_LOCAL_RESEARCHER) {
            config.local_researcher = parse_flag(ENV_LOCAL_RESEARCHER, &flag)?;
        }
        Ok(config)
    }

    /// Fixed-identity resolver when local mode is on.
    pub fn local_identity_resolver(&self) -> Option<LocalIdentityResolver> {
        if !self.local_mode {
            return None;
        }
        let identity = if self.local_researcher {
            CallerIdentity::researcher(self.local_user.as_str())
        } else {
            CallerIdentity::participant(self.local_user.as_str())
        };
        Some(LocalIdentityResolver::new(identity))
    }

    /// Opens the configured database with migrations applied.
    pub fn open_database(&self) -> DbResult<Connection> {
        match self.db_path.as_deref() {
            Some(path) => open_db(path),
            None => open_db_in_memory(),
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            key,
            value: value.to_string(),
            reason: "expected a boolean (true/false, 1/0, yes/no, on/off)".to_string(),
        }),
    }
}
