//! Applies and reverts migrations against a [`Store`].
//!
//! In transactional mode (the default) the ledger is read and the run is
//! planned under the database write lock (`BEGIN IMMEDIATE`). Every step then
//! takes the lock again for its own transaction, re-checks the ledger, and
//! commits its script together with its ledger write. A failing step is rolled
//! back on its own; steps committed earlier in the run are kept, including
//! across a crash.

use std::fmt;

use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use strata_common::{Error, Result};
use tracing::{error, info, warn};

use crate::ledger::Ledger;
use crate::migrations::{MigrationRecord, MigrationSource};
use crate::plan::{IdleReason, Plan, plan_down, plan_up, unknown_versions};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Applied,
    RolledBack,
    /// Down script missing; the version stays in the ledger.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub version: i64,
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    pub version: i64,
    pub name: String,
    pub message: String,
}

/// Outcome of one `up` or `down` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    pub steps: Vec<StepReport>,
    pub idle: Option<IdleReason>,
    /// The step that stopped the run. Later candidates were not attempted.
    pub failure: Option<FailedStep>,
}

impl RunReport {
    fn new(direction: Direction, idle: Option<IdleReason>) -> Self {
        Self {
            direction,
            steps: Vec::new(),
            idle,
            failure: None,
        }
    }

    fn push(&mut self, record: &MigrationRecord, status: StepStatus) {
        self.steps.push(StepReport {
            version: record.version,
            name: record.name.clone(),
            status,
        });
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn versions(&self, status: StepStatus) -> Vec<i64> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.version)
            .collect()
    }

    /// Turn a recorded failure into `Error::ScriptExecution`.
    pub fn into_result(mut self) -> Result<Self> {
        match self.failure.take() {
            Some(FailedStep {
                version,
                name,
                message,
            }) => Err(Error::ScriptExecution {
                version,
                name,
                message,
            }),
            None => Ok(self),
        }
    }
}

/// Reconciles the migration directory with the ledger and executes the
/// scripts needed to reach a target.
pub struct Migrator<'s> {
    store: &'s mut Store,
    source: MigrationSource,
    ledger: Ledger,
    transactional: bool,
}

impl<'s> Migrator<'s> {
    pub fn new(store: &'s mut Store, source: MigrationSource, ledger: Ledger) -> Self {
        Self {
            store,
            source,
            ledger,
            transactional: true,
        }
    }

    /// Disable to run scripts that manage their own transactions. Without
    /// it a failing script may leave partial changes and no ledger row.
    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    /// Apply pending migrations up to and including `target`.
    pub fn up(&mut self, target: Option<i64>) -> Result<RunReport> {
        self.run(Direction::Up, target)
    }

    /// Revert applied migrations newer than `target`, or all of them.
    pub fn down(&mut self, target: Option<i64>) -> Result<RunReport> {
        self.run(Direction::Down, target)
    }

    fn run(&mut self, direction: Direction, target: Option<i64>) -> Result<RunReport> {
        // Load errors surface before the database is touched.
        let available = self.source.load()?;
        let source = &self.source;
        let ledger = &self.ledger;
        let transactional = self.transactional;
        let conn = self.store.connection_mut();

        let plan = if transactional {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(lock_error)?;
            let plan = prepare(&tx, ledger, source, &available, direction, target)?;
            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit ledger setup: {e}")))?;
            plan
        } else {
            prepare(conn, ledger, source, &available, direction, target)?
        };

        let mut report = RunReport::new(direction, plan.idle);
        if let Some(reason) = plan.idle {
            info!("{reason}");
        } else {
            info!("{} migration(s) to run {direction}", plan.steps.len());
        }

        let done = match direction {
            Direction::Up => StepStatus::Applied,
            Direction::Down => StepStatus::RolledBack,
        };
        for record in plan.steps {
            match direction {
                Direction::Up => info!("applying migration {}: {}", record.version, record.name),
                Direction::Down if !record.is_reversible() => {
                    warn!(
                        "no down migration for version {}, skipping",
                        record.version
                    );
                    report.push(record, StepStatus::Skipped);
                    continue;
                }
                Direction::Down => {
                    info!("rolling back migration {}: {}", record.version, record.name)
                }
            }

            let result = if transactional {
                execute_locked(conn, ledger, record, direction)
            } else {
                execute(conn, ledger, record, direction).map(|()| true)
            };

            match result {
                Ok(true) => report.push(record, done),
                Ok(false) => info!(
                    "migration {} was already handled by another run",
                    record.version
                ),
                Err(e) => {
                    let message = failure_message(&e);
                    error!("migration {} ({}) failed: {message}", record.version, record.name);
                    report.failure = Some(FailedStep {
                        version: record.version,
                        name: record.name.clone(),
                        message,
                    });
                    break;
                }
            }
        }

        Ok(report)
    }
}

/// Bootstrap the ledger and select the steps for this run.
fn prepare<'a>(
    conn: &Connection,
    ledger: &Ledger,
    source: &MigrationSource,
    available: &'a [MigrationRecord],
    direction: Direction,
    target: Option<i64>,
) -> Result<Plan<'a>> {
    ledger.ensure(conn)?;
    let applied = ledger.applied_versions(conn)?;
    for version in unknown_versions(available, &applied) {
        warn!(
            "applied migration {version} has no definition in {}",
            source.dir().display()
        );
    }

    match direction {
        Direction::Up => Ok(plan_up(available, &applied, target)),
        Direction::Down => plan_down(available, &applied, target),
    }
}

fn execute(
    conn: &Connection,
    ledger: &Ledger,
    record: &MigrationRecord,
    direction: Direction,
) -> rusqlite::Result<()> {
    match direction {
        Direction::Up => {
            conn.execute_batch(&record.up)?;
            ledger.record_applied(conn, record.version, &record.name)
        }
        Direction::Down => {
            conn.execute_batch(&record.down)?;
            ledger.record_rolled_back(conn, record.version)
        }
    }
}

/// Run one step in its own `BEGIN IMMEDIATE` transaction. Returns `false`
/// when the ledger shows another run already took the step.
///
/// A script that makes SQLite abandon the transaction (`INSERT OR ROLLBACK`,
/// `RAISE(ROLLBACK)`, a full disk) only loses its own step.
fn execute_locked(
    conn: &mut Connection,
    ledger: &Ledger,
    record: &MigrationRecord,
    direction: Direction,
) -> rusqlite::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let applied = ledger.is_applied(&tx, record.version)?;
    let pending = match direction {
        Direction::Up => !applied,
        Direction::Down => applied,
    };
    if !pending {
        return Ok(false);
    }

    execute(&tx, ledger, record, direction)?;
    tx.commit()?;
    Ok(true)
}

fn failure_message(e: &rusqlite::Error) -> String {
    let message = e.to_string();
    if message.contains("cannot start a transaction within a transaction") {
        format!(
            "{message} (the script opens its own transaction; \
             set migrations.transactional = false to run it)"
        )
    } else {
        message
    }
}

fn lock_error(e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::Locked(format!(
            "another migration run holds the database: {e}"
        )),
        _ => Error::Database(format!("failed to begin migration run: {e}")),
    }
}
