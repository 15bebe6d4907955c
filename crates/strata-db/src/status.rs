//! Read-only view over the migration directory and the ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use strata_common::Result;

use crate::ledger::Ledger;
use crate::migrations::MigrationSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    /// Name from the migration file; `None` when the file no longer exists.
    pub name: Option<String>,
    /// Name stored in the ledger when the migration was applied.
    pub recorded_name: String,
    pub applied_at: DateTime<Utc>,
}

impl AppliedMigration {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<PendingMigration>,
    pub applied_count: usize,
    pub pending_count: usize,
    pub available_count: usize,
}

impl StatusReport {
    pub fn new(
        applied: Vec<AppliedMigration>,
        pending: Vec<PendingMigration>,
        available_count: usize,
    ) -> Self {
        Self {
            applied_count: applied.len(),
            pending_count: pending.len(),
            applied,
            pending,
            available_count,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }

    pub fn latest_applied(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    /// Applied versions whose definition file is gone.
    pub fn unknown(&self) -> impl Iterator<Item = &AppliedMigration> {
        self.applied.iter().filter(|m| m.name.is_none())
    }
}

/// Build a status report. Never writes: a missing ledger table reads as an
/// empty ledger.
pub fn status(
    conn: &Connection,
    source: &MigrationSource,
    ledger: &Ledger,
) -> Result<StatusReport> {
    let available = source.load()?;
    let entries = if ledger.exists(conn)? {
        ledger.entries(conn)?
    } else {
        Vec::new()
    };

    let names: BTreeMap<i64, &str> = available
        .iter()
        .map(|r| (r.version, r.name.as_str()))
        .collect();

    let applied: Vec<AppliedMigration> = entries
        .into_iter()
        .map(|entry| AppliedMigration {
            version: entry.version,
            name: names.get(&entry.version).map(|n| n.to_string()),
            recorded_name: entry.name,
            applied_at: entry.applied_at,
        })
        .collect();

    let pending = available
        .iter()
        .filter(|r| !applied.iter().any(|a| a.version == r.version))
        .map(|r| PendingMigration {
            version: r.version,
            name: r.name.clone(),
            file: r.file_name(),
        })
        .collect();

    Ok(StatusReport::new(applied, pending, available.len()))
}
