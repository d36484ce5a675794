//! Project configuration: `migrate.json` merged with command-line flags.

use crate::error::CliError;
use crate::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default store directory.
pub const DEFAULT_STORE: &str = "tidemark_data";

/// Default migrations directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Default entity declarations file.
pub const DEFAULT_SCHEMA: &str = "schema.json";

/// Default lock timeout in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Contents of `migrate.json`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Store directory.
    pub store: Option<PathBuf>,
    /// Migrations directory.
    pub migrations_dir: Option<PathBuf>,
    /// Entity declarations file.
    pub schema: Option<PathBuf>,
    /// Seconds to wait for the migration lock.
    pub lock_timeout_secs: Option<u64>,
    /// Upper bound on one migration's transaction, in seconds.
    pub transaction_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| CliError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Store directory.
    pub store: PathBuf,
    /// Migrations directory.
    pub migrations_dir: PathBuf,
    /// Entity declarations file.
    pub schema: PathBuf,
    /// Lock timeout.
    pub lock_timeout: Duration,
    /// Transaction timeout.
    pub transaction_timeout: Option<Duration>,
}

impl Settings {
    /// Resolve settings: flags win over the file, the file over defaults.
    ///
    /// Relative paths from the file are taken relative to the file's directory.
    pub fn resolve(args: &Args) -> Result<Self, CliError> {
        let file = FileConfig::load(&args.config)?;
        let base = args
            .config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let from_file = |path: Option<PathBuf>, default: &str| {
            let path = path.unwrap_or_else(|| PathBuf::from(default));
            if path.is_relative() {
                base.join(path)
            } else {
                path
            }
        };

        Ok(Self {
            store: args
                .store
                .clone()
                .unwrap_or_else(|| from_file(file.store, DEFAULT_STORE)),
            migrations_dir: args
                .migrations
                .clone()
                .unwrap_or_else(|| from_file(file.migrations_dir, DEFAULT_MIGRATIONS_DIR)),
            schema: args
                .schema
                .clone()
                .unwrap_or_else(|| from_file(file.schema, DEFAULT_SCHEMA)),
            lock_timeout: Duration::from_secs(
                args.lock_timeout
                    .or(file.lock_timeout_secs)
                    .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
            ),
            transaction_timeout: file.transaction_timeout_secs.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("migrate.json");
        let args = Args::parse_from(["migrate", "--config", config.to_str().unwrap(), "down"]);

        let settings = Settings::resolve(&args).unwrap();
        assert_eq!(settings.store, dir.path().join(DEFAULT_STORE));
        assert_eq!(settings.migrations_dir, dir.path().join(DEFAULT_MIGRATIONS_DIR));
        assert_eq!(settings.lock_timeout, Duration::from_secs(30));
        assert!(settings.transaction_timeout.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("migrate.json");
        std::fs::write(
            &config,
            r#"{"store": "db", "lock_timeout_secs": 5, "transaction_timeout_secs": 60}"#,
        )
        .unwrap();

        let args = Args::parse_from([
            "migrate",
            "--config",
            config.to_str().unwrap(),
            "--lock-timeout",
            "1",
            "down",
        ]);
        let settings = Settings::resolve(&args).unwrap();
        assert_eq!(settings.store, dir.path().join("db"));
        assert_eq!(settings.lock_timeout, Duration::from_secs(1));
        assert_eq!(settings.transaction_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("migrate.json");
        std::fs::write(&config, r#"{"connection": "x"}"#).unwrap();

        let args = Args::parse_from(["migrate", "--config", config.to_str().unwrap(), "down"]);
        let err = Settings::resolve(&args).unwrap_err();
        assert_eq!(err.exit_code(), 11);
    }
}
