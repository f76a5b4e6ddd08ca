use clap::ValueEnum;
use serde::Serialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(String),
    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("failed to load env file {}: {source}", .path.display())]
    EnvFile {
        path: std::path::PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Load `KEY=value` pairs from an env file without overriding variables that
/// are already set. Returns `false` when the file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigError> {
    if !path.exists() {
        return Ok(false);
    }
    dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Name of the variable holding the connection URL for a target.
///
/// `None` reads `DATABASE_URL`; `Some("prod")` reads `PROD_DATABASE_URL`.
pub fn database_url_var(target: Option<&str>) -> String {
    match target.map(str::trim).filter(|target| !target.is_empty()) {
        Some(target) => format!(
            "{}_DATABASE_URL",
            target.to_ascii_uppercase().replace('-', "_")
        ),
        None => "DATABASE_URL".to_string(),
    }
}

/// Connection settings for the destination database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
}

impl DatabaseConfig {
    pub fn from_env(target: Option<&str>) -> Result<Self, ConfigError> {
        let key = database_url_var(target);
        let url = env::var(&key)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingVar(key))?;

        Ok(Self {
            url,
            max_connections: env_u32("BULK_LOADER_MAX_CONNECTIONS", 10).max(1),
            acquire_timeout: env_duration_millis("BULK_LOADER_ACQUIRE_TIMEOUT_MS", 15_000),
            max_lifetime: env_duration_millis("BULK_LOADER_MAX_LIFETIME_MS", 300_000),
        })
    }

    /// Make room for every worker plus one connection for catalog queries.
    pub fn sized_for_workers(mut self, workers: usize) -> Self {
        let needed = u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1);
        self.max_connections = self.max_connections.max(needed);
        self
    }
}

/// Whether explicit values may be written into identity columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Override when any mapped column is an identity column.
    #[default]
    Auto,
    On,
    Off,
}

/// Parameters of one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// `schema.table`, or a bare table name in `public`.
    pub table: String,
    pub batch_size: usize,
    pub workers: usize,
    /// Replaces the table's primary key as the merge key when set.
    pub key_columns: Option<Vec<String>>,
    pub identity: IdentityMode,
    pub batch_timeout: Duration,
    /// `None` picks by file extension.
    pub delimiter: Option<u8>,
    pub synchronous_commit: bool,
}

impl ImportConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            key_columns: None,
            identity: IdentityMode::Auto,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            delimiter: None,
            synchronous_commit: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::invalid("table", "must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch size", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::invalid("batch timeout", "must be positive"));
        }
        if let Some(keys) = &self.key_columns {
            if keys.is_empty() || keys.iter().any(|key| key.trim().is_empty()) {
                return Err(ConfigError::invalid("key columns", "names must not be empty"));
            }
        }
        if let Some(delimiter) = self.delimiter {
            if matches!(delimiter, b'"' | b'\n' | b'\r') {
                return Err(ConfigError::invalid(
                    "delimiter",
                    format!("{:?} cannot separate fields", delimiter as char),
                ));
            }
        }
        Ok(())
    }
}

/// Parse a delimiter argument: a single ASCII character, `\t`, or `tab`.
pub fn parse_delimiter(raw: &str) -> Result<u8, String> {
    match raw {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        _ => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if ch.is_ascii() => Ok(ch as u8),
                _ => Err(format!(
                    "delimiter must be a single ASCII character, got {raw:?}"
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ImportConfig::new("dbo.shipping");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let mut config = ImportConfig::new("orders");
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = ImportConfig::new("orders");
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = ImportConfig::new("  ");
        config.key_columns = Some(vec!["id".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_keys_and_quote_delimiter() {
        let mut config = ImportConfig::new("orders");
        config.key_columns = Some(vec![" ".to_string()]);
        assert!(config.validate().is_err());

        let mut config = ImportConfig::new("orders");
        config.delimiter = Some(b'"');
        assert!(config.validate().is_err());
    }

    #[test]
    fn target_selects_prefixed_url_variable() {
        assert_eq!(database_url_var(None), "DATABASE_URL");
        assert_eq!(database_url_var(Some("")), "DATABASE_URL");
        assert_eq!(database_url_var(Some("prod")), "PROD_DATABASE_URL");
        assert_eq!(database_url_var(Some("eu-test")), "EU_TEST_DATABASE_URL");
    }

    #[test]
    fn pool_grows_to_fit_workers() {
        let config = DatabaseConfig {
            url: "postgres://localhost/db".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(15),
            max_lifetime: Duration::from_secs(300),
        };
        assert_eq!(config.clone().sized_for_workers(4).max_connections, 10);
        assert_eq!(config.sized_for_workers(16).max_connections, 17);
    }

    #[test]
    fn delimiter_parsing() {
        assert_eq!(parse_delimiter(","), Ok(b','));
        assert_eq!(parse_delimiter("\\t"), Ok(b'\t'));
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert!(parse_delimiter("::").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let loaded = load_env_file(Path::new("/nonexistent/bulk-loader/.env")).unwrap();
        assert!(!loaded);
    }
}
