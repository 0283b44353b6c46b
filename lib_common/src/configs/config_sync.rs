//! # Synchronizer Configuration
//!
//! Loads the service settings from a dotenv-format file. Variables present in
//! the process environment take precedence over the file, so a deployment can
//! override single keys without editing it. A missing file is not an error:
//! everything may come from the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};

use thiserror::Error;
use url::Url;

/// Cron expression used when `SCHEDULE` is not set.
pub const DEFAULT_SCHEDULE: &str = "* * * * *";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("missing required configuration key '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// PostgreSQL connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub user: String,
    pub password: String,
    pub db: String,
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
}

impl PostgresConfig {
    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgres://{}:*****@{}:{}/{}",
            self.user, self.host, self.port, self.db
        )
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("user", &self.user)
            .field("password", &"*****")
            .field("db", &self.db)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// # Sync Config
///
/// Everything the service reads at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub endpoint_url: Url,
    pub auth_login: String,
    pub auth_password: String,
    pub schedule: String,
    pub postgres: PostgresConfig,
    pub fetch_timeout: Duration,
    pub persist_timeout: Duration,
    pub allow_empty_snapshot: bool,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl SyncConfig {
    /// # Load
    ///
    /// Reads `path` (if it exists) and overlays the process environment.
    ///
    /// # Errors
    /// `ConfigError::Read` for an unreadable or malformed file, otherwise the
    /// first missing or invalid key.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = read_dotenv(path.as_ref())?;
        Self::from_lookup(|key| env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let endpoint = source.required("LOCATION_DATA_ENDPOINT_URL")?;
        let endpoint_url = Url::parse(&endpoint).map_err(|e| ConfigError::Invalid {
            key: "LOCATION_DATA_ENDPOINT_URL",
            reason: e.to_string(),
        })?;

        let postgres = PostgresConfig {
            user: source.required("POSTGRES_USER")?,
            password: source.required("POSTGRES_PASSWORD")?,
            db: source.required("POSTGRES_DB")?,
            host: source.required("POSTGRES_HOST")?,
            port: source.parsed("POSTGRES_PORT", 5432)?,
            pool_size: source.positive("POSTGRES_POOL_SIZE", 4)? as usize,
        };

        Ok(Self {
            endpoint_url,
            auth_login: source.required("AUTH_LOGIN")?,
            auth_password: source.required("AUTH_PASSWORD")?,
            schedule: source
                .optional("SCHEDULE")
                .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            postgres,
            fetch_timeout: Duration::from_secs(source.positive("FETCH_TIMEOUT_SECS", 30)?),
            persist_timeout: Duration::from_secs(source.positive("PERSIST_TIMEOUT_SECS", 120)?),
            allow_empty_snapshot: source.flag("ALLOW_EMPTY_SNAPSHOT", false)?,
            log_dir: source
                .optional("LOG_DIR")
                .map_or_else(|| PathBuf::from("logs"), PathBuf::from),
            log_level: source
                .optional("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("endpoint_url", &self.endpoint_url.as_str())
            .field("auth_login", &self.auth_login)
            .field("auth_password", &"*****")
            .field("schedule", &self.schedule)
            .field("postgres", &self.postgres)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("persist_timeout", &self.persist_timeout)
            .field("allow_empty_snapshot", &self.allow_empty_snapshot)
            .field("log_dir", &self.log_dir)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl fmt::Display for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncConfig
    Endpoint: {} (login: {}),
    Schedule: {},
    Database: {} (pool size {}),
    Timeouts: fetch {}s, persist {}s,
    Allow empty snapshot: {},
    Logs: {} at level {}
",
            self.endpoint_url,
            self.auth_login,
            self.schedule,
            self.postgres.redacted_url(),
            self.postgres.pool_size,
            self.fetch_timeout.as_secs(),
            self.persist_timeout.as_secs(),
            self.allow_empty_snapshot,
            self.log_dir.display(),
            self.log_level
        )
    }
}

fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let mut values = HashMap::new();
    if !path.is_file() {
        return Ok(values);
    }

    let read_error = |source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };
    for item in dotenvy::from_path_iter(path).map_err(read_error)? {
        let (key, value) = item.map_err(read_error)?;
        values.insert(key, value);
    }
    Ok(values)
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: format!("'{raw}': {e}"),
            }),
        }
    }

    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".into(),
            }),
            value => Ok(value),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                key,
                reason: format!("'{v}' is not a boolean"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("LOCATION_DATA_ENDPOINT_URL", "http://upstream.local/indexes"),
            ("AUTH_LOGIN", "sync"),
            ("AUTH_PASSWORD", "s3cret"),
            ("POSTGRES_USER", "loc"),
            ("POSTGRES_PASSWORD", "pg-s3cret"),
            ("POSTGRES_DB", "locations"),
            ("POSTGRES_HOST", "db"),
        ])
    }

    fn build(values: &HashMap<&'static str, &'static str>) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|key| values.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_to_optional_keys() {
        let config = build(&minimal()).unwrap();
        assert_eq!(config.schedule, DEFAULT_SCHEDULE);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.postgres.pool_size, 4);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.persist_timeout, Duration::from_secs(120));
        assert!(!config.allow_empty_snapshot);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_and_invalid_keys_are_named() {
        let mut values = minimal();
        values.remove("AUTH_PASSWORD");
        assert!(matches!(build(&values), Err(ConfigError::Missing("AUTH_PASSWORD"))));

        let mut values = minimal();
        values.insert("POSTGRES_PORT", "not-a-port");
        assert!(matches!(
            build(&values),
            Err(ConfigError::Invalid {
                key: "POSTGRES_PORT",
                ..
            })
        ));

        let mut values = minimal();
        values.insert("LOCATION_DATA_ENDPOINT_URL", "indexes");
        assert!(matches!(
            build(&values),
            Err(ConfigError::Invalid {
                key: "LOCATION_DATA_ENDPOINT_URL",
                ..
            })
        ));

        let mut values = minimal();
        values.insert("FETCH_TIMEOUT_SECS", "0");
        assert!(build(&values).is_err());

        let mut values = minimal();
        values.insert("ALLOW_EMPTY_SNAPSHOT", "maybe");
        assert!(build(&values).is_err());
    }

    #[test]
    fn secrets_never_show_up_in_output() {
        let config = build(&minimal()).unwrap();
        for shown in [format!("{config:?}"), config.to_string()] {
            assert!(!shown.contains("s3cret"), "{shown}");
            assert!(shown.contains("sync"));
        }
        assert_eq!(
            config.postgres.redacted_url(),
            "postgres://loc:*****@db:5432/locations"
        );
    }

    #[test]
    fn loads_a_dotenv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# synchronizer").unwrap();
        for (key, value) in minimal() {
            writeln!(file, "{key}={value}").unwrap();
        }
        writeln!(file, "SCHEDULE=\"*/5 * * * *\"").unwrap();
        writeln!(file, "ALLOW_EMPTY_SNAPSHOT=true").unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint_url.as_str(), "http://upstream.local/indexes");
        assert_eq!(config.schedule, "*/5 * * * *");
        assert!(config.allow_empty_snapshot);
    }

    #[test]
    fn missing_file_falls_back_to_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let result = SyncConfig::load(dir.path().join("absent.env"));
        // Nothing sets the endpoint in the test environment.
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }
}
