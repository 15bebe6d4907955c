//! Migration definitions and the directory loader.
//!
//! A migration lives in a file named `<version>_<name>.sql`. The file holds a
//! forward section introduced by a `-- UP` line and, optionally, a reverse
//! section introduced by a `-- DOWN` line. Markers only count when they are
//! the whole line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use strata_common::{Error, Result};
use tracing::{debug, info, warn};

pub const UP_MARKER: &str = "-- UP";
pub const DOWN_MARKER: &str = "-- DOWN";

const MIGRATION_EXTENSION: &str = "sql";

static NAME_NORMALIZER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("static regex"));

/// One migration definition, as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub up: String,
    pub down: String,
    pub path: PathBuf,
}

impl MigrationRecord {
    /// Read and parse a single migration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| Error::MalformedMigration {
                file: path.display().to_string(),
                reason: "file name is not valid UTF-8".into(),
            })?;
        let (version, name) = parse_file_name(file_name)?;

        let content = std::fs::read_to_string(path)?;
        let (up, down) = parse_script(&content);

        Ok(Self {
            version,
            name,
            up,
            down,
            path: path.to_path_buf(),
        })
    }

    /// Whether a down script with actual statements exists.
    pub fn is_reversible(&self) -> bool {
        has_statements(&self.down)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Split `<version>_<name>.sql` into its version and normalized name.
pub fn parse_file_name(file_name: &str) -> Result<(i64, String)> {
    let malformed = |reason: String| Error::MalformedMigration {
        file: file_name.to_string(),
        reason,
    };

    let stem = file_name
        .strip_suffix(".sql")
        .ok_or_else(|| malformed("expected a .sql extension".into()))?;
    let (prefix, raw_name) = stem.split_once('_').unwrap_or((stem, ""));

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!(
            "version prefix {prefix:?} is not an integer"
        )));
    }
    let version: i64 = prefix
        .parse()
        .map_err(|e| malformed(format!("version prefix {prefix:?}: {e}")))?;
    if version <= 0 {
        return Err(malformed("version must be strictly positive".into()));
    }

    let name = NAME_NORMALIZER.replace_all(raw_name, "_").into_owned();
    Ok((version, name))
}

/// Split migration content into its up and down scripts.
///
/// The first line equal to `-- DOWN` (ignoring surrounding whitespace) starts
/// the down section. A `-- UP` line at the top of the file is dropped. With no
/// down marker the down script is empty.
pub fn parse_script(content: &str) -> (String, String) {
    let mut up: Vec<&str> = Vec::new();
    let mut down: Vec<&str> = Vec::new();
    let mut in_down = false;
    let mut up_label_seen = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if in_down {
            down.push(line);
        } else if trimmed == DOWN_MARKER {
            in_down = true;
        } else if trimmed == UP_MARKER
            && !up_label_seen
            && up.iter().all(|l| l.trim().is_empty())
        {
            up_label_seen = true;
        } else {
            up.push(line);
        }
    }

    (
        up.join("\n").trim().to_string(),
        down.join("\n").trim().to_string(),
    )
}

/// True when `script` contains something other than blank lines and `--`
/// comments.
pub fn has_statements(script: &str) -> bool {
    script.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

/// A directory of migration files.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every migration, sorted ascending by version.
    ///
    /// Fails without returning a partial set if any file name is malformed
    /// or two files share a version.
    pub fn load(&self) -> Result<Vec<MigrationRecord>> {
        if !self.dir.is_dir() {
            return Err(Error::NotFound(format!(
                "migrations directory {}",
                self.dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_sql = path
                .extension()
                .is_some_and(|ext| ext == MIGRATION_EXTENSION);
            if path.is_file() && is_sql {
                paths.push(path);
            } else {
                debug!("ignoring {}", path.display());
            }
        }
        paths.sort();

        let mut records = paths
            .iter()
            .map(|p| MigrationRecord::from_file(p))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.path.cmp(&b.path)));

        check_unique_versions(&records)?;

        for record in records.iter().filter(|r| !has_statements(&r.up)) {
            warn!(
                "migration {} ({}) has an empty up script",
                record.version, record.name
            );
        }

        info!(
            "loaded {} migrations from {}",
            records.len(),
            self.dir.display()
        );
        Ok(records)
    }
}

fn check_unique_versions(records: &[MigrationRecord]) -> Result<()> {
    let mut by_version: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for record in records {
        by_version
            .entry(record.version)
            .or_default()
            .push(record.file_name());
    }

    let collisions: Vec<(i64, Vec<String>)> = by_version
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect();
    if collisions.is_empty() {
        return Ok(());
    }

    Err(Error::DuplicateVersion {
        versions: collisions.iter().map(|(v, _)| *v).collect(),
        files: collisions
            .into_iter()
            .flat_map(|(_, files)| files)
            .collect::<Vec<_>>()
            .join(", "),
    })
}
