//! Store connection settings.

use crate::{OutboxError, OutboxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding [`StoreSettings::host`].
pub const ENV_HOST: &str = "OUTBOX_DB_HOST";
/// Environment variable overriding [`StoreSettings::port`].
pub const ENV_PORT: &str = "OUTBOX_DB_PORT";
/// Environment variable overriding [`StoreSettings::database`].
pub const ENV_DATABASE: &str = "OUTBOX_DB_NAME";
/// Environment variable overriding [`StoreSettings::username`].
pub const ENV_USERNAME: &str = "OUTBOX_DB_USER";
/// Environment variable overriding [`StoreSettings::password`].
pub const ENV_PASSWORD: &str = "OUTBOX_DB_PASSWORD";

/// Default database file.
pub const DEFAULT_DATABASE: &str = "outbox.db";

const LOCAL_HOSTS: [&str; 4] = ["", "localhost", "127.0.0.1", "::1"];

/// Connection parameters for the outbox store.
///
/// The backing engine is an embedded SQLite file, so `database` is a path and
/// `host` must be local. `port`, `username` and `password` are accepted so the
/// same settings file can describe a networked deployment, but are not used
/// to open the connection.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StoreSettings {
    /// Settings for a local database file.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            database: path.as_ref().to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    /// Defaults, overridden from the environment.
    pub fn from_env() -> OutboxResult<Self> {
        let mut settings = Self::default();
        settings.load_from_env()?;
        Ok(settings)
    }

    /// Load settings from a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> OutboxResult<Self> {
        let mut settings = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        settings.load_from_env()?;
        Ok(settings)
    }

    /// Load settings from a specific JSON file.
    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: StoreSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Override fields from `OUTBOX_DB_*` environment variables.
    pub fn load_from_env(&mut self) -> OutboxResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override fields from any key lookup (environment, test maps).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> OutboxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| OutboxError::Config(format!("{}={:?}: {}", ENV_PORT, port, e)))?;
            self.port = Some(port);
        }
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = database;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = Some(password);
        }
        Ok(())
    }

    /// Resolve the database file to open.
    ///
    /// Fails with a connectivity error for any non-local host, since no
    /// network engine is compiled in.
    pub fn database_path(&self) -> OutboxResult<PathBuf> {
        if !LOCAL_HOSTS.contains(&self.host.trim()) {
            return Err(OutboxError::Connectivity(format!(
                "cannot reach host {:?}: only local database files are supported",
                self.host
            )));
        }
        if self.database.trim().is_empty() {
            return Err(OutboxError::Config("database must not be empty".to_string()));
        }
        if self.database.trim() == ":memory:" {
            return Err(OutboxError::Config(
                "in-memory databases cannot be shared by a connection pool".to_string(),
            ));
        }

        if self.port.is_some() {
            warn!(port = ?self.port, "Ignoring port for local database file");
        }
        if self.username.is_some() || self.password.is_some() {
            warn!("Ignoring credentials for local database file");
        }

        Ok(PathBuf::from(self.database.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = StoreSettings::default();
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.database, DEFAULT_DATABASE);
        assert!(settings.port.is_none());
        assert_eq!(
            settings.database_path().unwrap(),
            PathBuf::from(DEFAULT_DATABASE)
        );
    }

    #[test]
    fn test_settings_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(
            &path,
            r#"{
                "host": "127.0.0.1",
                "port": 3306,
                "database": "/var/lib/app/outbox.db",
                "username": "app"
            }"#,
        )
        .unwrap();

        let settings = StoreSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, Some(3306));
        assert_eq!(settings.database, "/var/lib/app/outbox.db");
        assert_eq!(settings.username.as_deref(), Some("app"));
        assert!(settings.password.is_none());
    }

    #[test]
    fn test_settings_load_from_missing_file_fails() {
        let dir = tempdir().unwrap();
        let settings = StoreSettings::load_from_file(&dir.path().join("missing.json"));
        assert!(matches!(settings, Err(OutboxError::Io(_))));
    }

    #[test]
    fn test_settings_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = StoreSettings::load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(settings.host, StoreSettings::default().host);
    }

    #[test]
    fn test_settings_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(&path, "{ host: ").unwrap();

        let result = StoreSettings::load_from_file(&path);
        assert!(matches!(result, Err(OutboxError::Json(_))));
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE, "/tmp/override.db"),
            (ENV_PORT, "5432"),
            (ENV_PASSWORD, "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut settings = StoreSettings::default();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.database, "/tmp/override.db");
        assert_eq!(settings.port, Some(5432));
        assert_eq!(settings.password.as_deref(), Some("hunter2"));
        assert_eq!(settings.host, "localhost");
    }

    #[test]
    fn test_apply_overrides_bad_port() {
        let mut settings = StoreSettings::default();
        let result = settings.apply_overrides(|key| {
            (key == ENV_PORT).then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(OutboxError::Config(_))));
    }

    #[test]
    fn test_remote_host_is_connectivity_error() {
        let settings = StoreSettings {
            host: "db.internal".to_string(),
            ..StoreSettings::default()
        };
        let err = settings.database_path().unwrap_err();
        assert!(matches!(err, OutboxError::Connectivity(_)));
    }

    #[test]
    fn test_empty_and_memory_database_rejected() {
        let empty = StoreSettings::for_path("");
        assert!(matches!(empty.database_path(), Err(OutboxError::Config(_))));

        let memory = StoreSettings::for_path(":memory:");
        assert!(matches!(memory.database_path(), Err(OutboxError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let settings = StoreSettings {
            password: Some("hunter2".to_string()),
            ..StoreSettings::default()
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
