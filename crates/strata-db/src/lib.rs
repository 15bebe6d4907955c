pub mod ledger;
pub mod migrations;
pub mod migrator;
pub mod plan;
pub mod status;
pub mod store;

pub use ledger::{Ledger, LedgerEntry};
pub use migrations::{MigrationRecord, MigrationSource};
pub use migrator::{Direction, FailedStep, Migrator, RunReport, StepReport, StepStatus};
pub use plan::IdleReason;
pub use status::{AppliedMigration, PendingMigration, StatusReport, status};
pub use store::Store;
