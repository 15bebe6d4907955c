use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use strata_common::{Error, Result};
use tracing::debug;

const MAX_TABLE_NAME_LEN: usize = 64;

/// One applied migration, as recorded in the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// The table recording which migration versions have been applied.
///
/// Every method takes a plain `&Connection`, so the same calls work against
/// the store directly or inside a transaction / savepoint.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    /// Create the ledger table if it does not exist yet.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
            self.table
        ))
        .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))?;
        Ok(())
    }

    /// Whether the ledger table exists. Never creates it.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to probe ledger table: {e}")))?;
        Ok(found.is_some())
    }

    /// Applied versions, ascending.
    pub fn applied_versions(&self, conn: &Connection) -> Result<BTreeSet<i64>> {
        let mut stmt = conn
            .prepare(&format!("SELECT version FROM {} ORDER BY version", self.table))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut versions = BTreeSet::new();
        for row in rows {
            versions.insert(
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
            );
        }
        Ok(versions)
    }

    /// Full ledger rows, ascending by version.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: parse_datetime(row.get::<_, Option<String>>(2)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
            );
        }
        Ok(entries)
    }

    pub fn is_applied(&self, conn: &Connection, version: i64) -> rusqlite::Result<bool> {
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE version = ?1", self.table),
                params![version],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn record_applied(
        &self,
        conn: &Connection,
        version: i64,
        name: &str,
    ) -> rusqlite::Result<()> {
        debug!("ledger: recording {version} ({name})");
        conn.execute(
            &format!("INSERT INTO {} (version, name) VALUES (?1, ?2)", self.table),
            params![version, name],
        )?;
        Ok(())
    }

    pub fn record_rolled_back(&self, conn: &Connection, version: i64) -> rusqlite::Result<()> {
        debug!("ledger: removing {version}");
        conn.execute(
            &format!("DELETE FROM {} WHERE version = ?1", self.table),
            params![version],
        )?;
        Ok(())
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME_LEN
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid ledger table name: {table:?}")))
    }
}

fn parse_datetime(s: Option<String>) -> DateTime<Utc> {
    let Some(s) = s else {
        return DateTime::<Utc>::UNIX_EPOCH;
    };
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_on(conn: &Connection) -> Ledger {
        let ledger = Ledger::new("migrations").unwrap();
        ledger.ensure(conn).unwrap();
        ledger
    }

    #[test]
    fn ensure_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("migrations").unwrap();
        assert!(!ledger.exists(&conn).unwrap());

        ledger.ensure(&conn).unwrap();
        ledger.ensure(&conn).unwrap();
        assert!(ledger.exists(&conn).unwrap());
    }

    #[test]
    fn record_and_remove_versions() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = ledger_on(&conn);

        ledger.record_applied(&conn, 3, "add_index").unwrap();
        ledger.record_applied(&conn, 1, "add_users").unwrap();
        ledger.record_applied(&conn, 2, "add_roles").unwrap();
        assert_eq!(
            ledger.applied_versions(&conn).unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        ledger.record_rolled_back(&conn, 2).unwrap();
        assert_eq!(
            ledger.applied_versions(&conn).unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(ledger.is_applied(&conn, 3).unwrap());
        assert!(!ledger.is_applied(&conn, 2).unwrap());
    }

    #[test]
    fn duplicate_insert_is_rejected_by_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = ledger_on(&conn);
        ledger.record_applied(&conn, 1, "a").unwrap();
        assert!(ledger.record_applied(&conn, 1, "a").is_err());
    }

    #[test]
    fn entries_carry_name_and_timestamp() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = ledger_on(&conn);
        ledger.record_applied(&conn, 7, "add_users").unwrap();

        let entries = ledger.entries(&conn).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, 7);
        assert_eq!(entries[0].name, "add_users");
        assert!(entries[0].applied_at > DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn custom_table_name_is_used() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("schema_ledger").unwrap();
        ledger.ensure(&conn).unwrap();
        ledger.record_applied(&conn, 1, "a").unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_ledger", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_unsafe_table_names() {
        for bad in ["", "1abc", "drop table x", "a;b", "ledger\"", "x".repeat(65).as_str()] {
            assert!(Ledger::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(Ledger::new("_schema_migrations2").is_ok());
    }

    #[test]
    fn parse_datetime_handles_sqlite_and_rfc3339() {
        let sqlite = parse_datetime(Some("2024-01-01 12:30:00".into()));
        assert_eq!(sqlite.to_rfc3339(), "2024-01-01T12:30:00+00:00");

        let rfc = parse_datetime(Some("2024-01-01T12:30:00Z".into()));
        assert_eq!(rfc, sqlite);

        assert_eq!(parse_datetime(None), DateTime::<Utc>::UNIX_EPOCH);
    }
}
