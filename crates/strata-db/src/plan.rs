//! Candidate selection for `up` and `down` runs.

use std::collections::BTreeSet;
use std::fmt;

use strata_common::{Error, Result};

use crate::migrations::MigrationRecord;

/// Why a run had nothing to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// `up`: every known migration (up to the target) is already applied.
    NoPending,
    /// `down`: no applied migration has a definition on disk.
    NothingApplied,
    /// `down`: the target is already the newest applied migration.
    AtTarget(i64),
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::NoPending => write!(f, "no pending migrations"),
            IdleReason::NothingApplied => write!(f, "nothing to roll back"),
            IdleReason::AtTarget(v) => write!(f, "nothing to roll back beyond target {v}"),
        }
    }
}

/// Ordered migrations selected for one run.
#[derive(Debug, PartialEq, Eq)]
pub struct Plan<'a> {
    pub steps: Vec<&'a MigrationRecord>,
    pub idle: Option<IdleReason>,
}

impl<'a> Plan<'a> {
    fn new(steps: Vec<&'a MigrationRecord>, when_empty: IdleReason) -> Self {
        let idle = steps.is_empty().then_some(when_empty);
        Self { steps, idle }
    }

    fn idle(reason: IdleReason) -> Self {
        Self {
            steps: Vec::new(),
            idle: Some(reason),
        }
    }

    pub fn versions(&self) -> Vec<i64> {
        self.steps.iter().map(|r| r.version).collect()
    }
}

/// Unapplied migrations up to and including `target`, ascending.
///
/// `available` must already be sorted ascending by version.
pub fn plan_up<'a>(
    available: &'a [MigrationRecord],
    applied: &BTreeSet<i64>,
    target: Option<i64>,
) -> Plan<'a> {
    let steps = available
        .iter()
        .filter(|r| !applied.contains(&r.version))
        .filter(|r| target.is_none_or(|t| r.version <= t))
        .collect();
    Plan::new(steps, IdleReason::NoPending)
}

/// Applied migrations to revert, newest first.
///
/// Without a target every applied migration with a known definition is
/// selected. With a target, only migrations newer than it are selected and
/// the target itself stays applied; a target that is not among the applied,
/// known migrations is rejected.
pub fn plan_down<'a>(
    available: &'a [MigrationRecord],
    applied: &BTreeSet<i64>,
    target: Option<i64>,
) -> Result<Plan<'a>> {
    if applied.is_empty() {
        return Ok(Plan::idle(IdleReason::NothingApplied));
    }

    let mut steps: Vec<&MigrationRecord> = available
        .iter()
        .rev()
        .filter(|r| applied.contains(&r.version))
        .collect();

    match target {
        None => Ok(Plan::new(steps, IdleReason::NothingApplied)),
        Some(target) => {
            let position = steps
                .iter()
                .position(|r| r.version == target)
                .ok_or(Error::TargetVersionNotFound(target))?;
            steps.truncate(position);
            Ok(Plan::new(steps, IdleReason::AtTarget(target)))
        }
    }
}

/// Applied versions with no definition among `available`.
pub fn unknown_versions(available: &[MigrationRecord], applied: &BTreeSet<i64>) -> Vec<i64> {
    let known: BTreeSet<i64> = available.iter().map(|r| r.version).collect();
    applied.difference(&known).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(version: i64, name: &str) -> MigrationRecord {
        MigrationRecord {
            version,
            name: name.to_string(),
            up: format!("CREATE TABLE {name} (id INTEGER);"),
            down: format!("DROP TABLE {name};"),
            path: PathBuf::from(format!("{version}_{name}.sql")),
        }
    }

    fn available() -> Vec<MigrationRecord> {
        vec![
            record(1, "add_users"),
            record(2, "add_roles"),
            record(3, "add_index"),
        ]
    }

    fn set(versions: &[i64]) -> BTreeSet<i64> {
        versions.iter().copied().collect()
    }

    #[test]
    fn up_selects_all_pending_in_order() {
        let available = available();
        let plan = plan_up(&available, &set(&[]), None);
        assert_eq!(plan.versions(), vec![1, 2, 3]);
        assert_eq!(plan.idle, None);
    }

    #[test]
    fn up_respects_inclusive_target() {
        let available = available();
        let plan = plan_up(&available, &set(&[]), Some(2));
        assert_eq!(plan.versions(), vec![1, 2]);
    }

    #[test]
    fn up_skips_applied_and_fills_gaps() {
        let available = available();
        let plan = plan_up(&available, &set(&[1, 3]), None);
        assert_eq!(plan.versions(), vec![2]);
    }

    #[test]
    fn up_with_everything_applied_is_idle() {
        let available = available();
        let plan = plan_up(&available, &set(&[1, 2, 3]), None);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.idle, Some(IdleReason::NoPending));
    }

    #[test]
    fn up_with_target_below_every_version_is_idle() {
        let available = available();
        let plan = plan_up(&available, &set(&[]), Some(0));
        assert_eq!(plan.idle, Some(IdleReason::NoPending));
    }

    #[test]
    fn down_without_target_reverts_everything_newest_first() {
        let available = available();
        let plan = plan_down(&available, &set(&[1, 2, 3]), None).unwrap();
        assert_eq!(plan.versions(), vec![3, 2, 1]);
    }

    #[test]
    fn down_to_target_keeps_target_applied() {
        let available = available();
        let plan = plan_down(&available, &set(&[1, 2, 3]), Some(1)).unwrap();
        assert_eq!(plan.versions(), vec![3, 2]);
    }

    #[test]
    fn down_to_newest_applied_is_idle() {
        let available = available();
        let plan = plan_down(&available, &set(&[1]), Some(1)).unwrap();
        assert!(plan.steps.is_empty());
        assert_eq!(plan.idle, Some(IdleReason::AtTarget(1)));
        assert_eq!(
            plan.idle.unwrap().to_string(),
            "nothing to roll back beyond target 1"
        );
    }

    #[test]
    fn down_with_empty_ledger_is_idle() {
        let available = available();
        let plan = plan_down(&available, &set(&[]), Some(2)).unwrap();
        assert_eq!(plan.idle, Some(IdleReason::NothingApplied));
    }

    #[test]
    fn down_target_must_be_applied() {
        let available = available();
        let err = plan_down(&available, &set(&[1, 2]), Some(3)).unwrap_err();
        assert!(matches!(err, Error::TargetVersionNotFound(3)));

        let err = plan_down(&available, &set(&[1, 2]), Some(42)).unwrap_err();
        assert!(matches!(err, Error::TargetVersionNotFound(42)));
    }

    #[test]
    fn down_excludes_versions_without_definitions() {
        let available = vec![record(1, "add_users"), record(3, "add_index")];
        let applied = set(&[1, 2, 3]);

        let plan = plan_down(&available, &applied, None).unwrap();
        assert_eq!(plan.versions(), vec![3, 1]);
        assert_eq!(unknown_versions(&available, &applied), vec![2]);

        let err = plan_down(&available, &applied, Some(2)).unwrap_err();
        assert!(matches!(err, Error::TargetVersionNotFound(2)));
    }

    #[test]
    fn down_with_only_unknown_versions_is_idle() {
        let available = available();
        let plan = plan_down(&available, &set(&[99]), None).unwrap();
        assert_eq!(plan.idle, Some(IdleReason::NothingApplied));
    }
}
