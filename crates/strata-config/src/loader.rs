use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["strata.toml", "strata.yml", "strata.yaml"];

/// Locates and parses the strata config file.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `explicit`, or from the first default file
    /// found in the current directory. Falls back to `AppConfig::default()`
    /// when nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
        let cwd = std::env::current_dir()?;
        Self::load_from(explicit, &cwd)
    }

    /// Same as [`ConfigLoader::load`], with an explicit directory to probe.
    pub fn load_from(explicit: Option<&Path>, dir: &Path) -> Result<AppConfig> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::NotFound(format!(
                        "config file {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Self::find_default(dir),
        };

        match path {
            Some(path) => Self::load_file(&path),
            None => {
                debug!("no config file found in {}, using defaults", dir.display());
                Ok(AppConfig::default())
            }
        }
    }

    /// Parse `path` and resolve relative paths against its directory.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let mut config = parse_config(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.database.path = resolve(base, &config.database.path);
        config.migrations.directory = resolve(base, &config.migrations.directory);
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    fn find_default(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_config(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}
