use std::fmt::Write;

use strata_config::AppConfig;
use strata_db::{Direction, RunReport, StatusReport, StepStatus};

const BOX_WIDTH: usize = 60;

/// One line per executed step, then a summary line.
pub fn format_run(report: &RunReport) -> String {
    let mut out = String::new();

    if let Some(reason) = report.idle {
        let _ = writeln!(out, "{reason}");
        return out;
    }

    for step in &report.steps {
        let line = match step.status {
            StepStatus::Applied => format!("  ✓ {}: {} applied", step.version, step.name),
            StepStatus::RolledBack => {
                format!("  ✓ {}: {} rolled back", step.version, step.name)
            }
            StepStatus::Skipped => format!(
                "  ! {}: {} skipped (no down migration)",
                step.version, step.name
            ),
        };
        let _ = writeln!(out, "{line}");
    }
    if let Some(failure) = &report.failure {
        let _ = writeln!(
            out,
            "  ✗ {}: {} failed: {}",
            failure.version, failure.name, failure.message
        );
    }

    let done = match report.direction {
        Direction::Up => report.versions(StepStatus::Applied).len(),
        Direction::Down => report.versions(StepStatus::RolledBack).len(),
    };
    let verb = match report.direction {
        Direction::Up => "applied",
        Direction::Down => "rolled back",
    };
    let mut summary = format!("{verb} {done} migration{}", plural(done));
    let skipped = report.versions(StepStatus::Skipped).len();
    if skipped > 0 {
        let _ = write!(summary, ", skipped {skipped}");
    }
    if report.failure.is_some() {
        summary.push_str(", stopped on failure");
    }
    let _ = writeln!(out, "{summary}");
    out
}

/// Boxed summary followed by the applied and pending lists.
pub fn format_status(report: &StatusReport, config: &AppConfig) -> String {
    let mut out = String::new();
    let inner = BOX_WIDTH - 4; // "│ " + " │"

    let title = format!("strata v{} · migration status", env!("CARGO_PKG_VERSION"));
    let title_dashes = BOX_WIDTH.saturating_sub(title.chars().count() + 7); // "╭─── " + " " + "╮"
    let row = |label: &str, value: &str| {
        let text = fit(&format!("{label:<12}{value}"), inner);
        format!("│ {text:<inner$} │")
    };

    let _ = writeln!(out, "╭─── {title} {}╮", "─".repeat(title_dashes));
    let _ = writeln!(out, "{}", row("Database", &config.database.path.display().to_string()));
    let _ = writeln!(
        out,
        "{}",
        row("Migrations", &config.migrations.directory.display().to_string())
    );
    let _ = writeln!(out, "{}", row("Applied", &report.applied_count.to_string()));
    let latest = report
        .latest_applied()
        .map_or_else(|| "none".to_string(), |v| v.to_string());
    let _ = writeln!(out, "{}", row("Latest", &latest));
    let _ = writeln!(out, "{}", row("Available", &report.available_count.to_string()));
    let _ = writeln!(out, "{}", row("Pending", &report.pending_count.to_string()));
    let _ = writeln!(out, "╰{}╯", "─".repeat(BOX_WIDTH - 2));

    if !report.applied.is_empty() {
        let _ = writeln!(out, "\nApplied migrations:");
        for m in &report.applied {
            let _ = writeln!(out, "  ✓ {}: {}", m.version, m.display_name());
        }
        let unknown = report.unknown().count();
        if unknown > 0 {
            let _ = writeln!(
                out,
                "  ! {unknown} applied version{} without a migration file",
                plural(unknown)
            );
        }
    }

    if report.is_up_to_date() {
        let _ = writeln!(out, "\nAll migrations are up to date.");
    } else {
        let _ = writeln!(out, "\nPending migrations:");
        for m in &report.pending {
            let _ = writeln!(out, "  ○ {}: {}", m.version, m.name);
        }
    }
    out
}

/// Shorten `s` to `width` characters, keeping the tail.
fn fit(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len <= width {
        return s.to_string();
    }
    let tail: String = s.chars().skip(len - width + 1).collect();
    format!("…{tail}")
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_db::{AppliedMigration, FailedStep, IdleReason, PendingMigration, StepReport};

    fn step(version: i64, name: &str, status: StepStatus) -> StepReport {
        StepReport {
            version,
            name: name.to_string(),
            status,
        }
    }

    #[test]
    fn idle_run_prints_reason_only() {
        let report = RunReport {
            direction: Direction::Down,
            steps: Vec::new(),
            idle: Some(IdleReason::AtTarget(1)),
            failure: None,
        };
        assert_eq!(format_run(&report), "nothing to roll back beyond target 1\n");
    }

    #[test]
    fn run_lists_steps_and_failure() {
        let report = RunReport {
            direction: Direction::Up,
            steps: vec![step(1, "add_users", StepStatus::Applied)],
            idle: None,
            failure: Some(FailedStep {
                version: 2,
                name: "add_roles".into(),
                message: "no such table: nowhere".into(),
            }),
        };
        let out = format_run(&report);
        assert_eq!(
            out,
            "  ✓ 1: add_users applied\n  ✗ 2: add_roles failed: no such table: nowhere\napplied 1 migration, stopped on failure\n"
        );
    }

    #[test]
    fn rollback_summary_counts_skips() {
        let report = RunReport {
            direction: Direction::Down,
            steps: vec![
                step(3, "add_index", StepStatus::RolledBack),
                step(2, "seed", StepStatus::Skipped),
                step(1, "add_users", StepStatus::RolledBack),
            ],
            idle: None,
            failure: None,
        };
        let out = format_run(&report);
        assert!(out.contains("  ! 2: seed skipped (no down migration)\n"));
        assert!(out.ends_with("rolled back 2 migrations, skipped 1\n"));
    }

    #[test]
    fn status_box_has_consistent_width() {
        let report = StatusReport::new(
            vec![AppliedMigration {
                version: 1,
                name: None,
                recorded_name: "add_users".into(),
                applied_at: Utc::now(),
            }],
            vec![PendingMigration {
                version: 2,
                name: "add_roles".into(),
                file: "2_add_roles.sql".into(),
            }],
            1,
        );
        let mut config = AppConfig::default();
        config.database.path = "/a/very/long/path/that/does/not/fit/inside/the/status/box/main.db".into();

        let out = format_status(&report, &config);
        let box_lines: Vec<&str> = out.lines().take(8).collect();
        for line in &box_lines {
            assert_eq!(line.chars().count(), BOX_WIDTH, "{line}");
        }
        assert!(out.contains("Latest      1 "));
        assert!(out.contains("  ✓ 1: Unknown\n  ! 1 applied version without a migration file\n"));
        assert!(out.contains("Pending migrations:\n  ○ 2: add_roles\n"));
    }

    #[test]
    fn fit_keeps_the_tail() {
        assert_eq!(fit("abcdef", 10), "abcdef");
        assert_eq!(fit("abcdef", 4), "…def");
    }
}
