use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use strata_common::{Error, Result};
use tracing::info;

/// Handle to the target database.
///
/// Opened once per invocation and passed explicitly to the ledger, the
/// migrator and the status reporter. The connection closes on drop.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `db_path`. Missing parent
    /// directories are created.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

        Ok(Self { conn })
    }

    /// Open an existing database without write access.
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags).map_err(|e| {
            Error::Database(format!(
                "failed to open {} read-only: {e}",
                db_path.display()
            ))
        })?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
