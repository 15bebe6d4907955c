use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration, read from `strata.toml` / `strata.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// How long to wait for another writer before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/main.db"),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory holding `<version>_<name>.sql` files.
    pub directory: PathBuf,
    /// Name of the ledger table inside the target database.
    pub table: String,
    /// Wrap each migration and its ledger write in one savepoint, and hold
    /// a write lock for the whole run.
    pub transactional: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            table: "migrations".to_string(),
            transactional: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_conventional_layout() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, PathBuf::from("db/main.db"));
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.migrations.directory, PathBuf::from("migrations"));
        assert_eq!(config.migrations.table, "migrations");
        assert!(config.migrations.transactional);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [migrations]
            transactional = false
            "#,
        )
        .unwrap();
        assert!(!config.migrations.transactional);
        assert_eq!(config.migrations.table, "migrations");
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn yaml_round_trips_through_serde() {
        let yaml = "database:\n  path: data/app.db\n  busy_timeout_ms: 250\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, PathBuf::from("data/app.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.migrations, MigrationsConfig::default());
    }
}
