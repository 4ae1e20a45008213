//! `iamsync apply`: reconcile users against an actions file.

use anyhow::Result;
use colored::Colorize;
use iamkit::backend::Backend;
use reconcile::{
    BatchItem, BatchOptions, BatchReport, NoProgress, ProgressCallback, ReconcileOptions,
    Reconciler, assemble_batch, run_batch,
};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::BatchProgress;
use crate::records::{self, ResultRecord};
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let rows = records::read_action_rows(&args.actions_file)?;
    let items = assemble_batch(&rows);

    if items.is_empty() {
        ui::info("Nothing to apply: no rows have an Action.");
        return Ok(());
    }

    let destructive = count_destructive(&items);
    if !ctx.quiet {
        ui::header(if args.dry_run { "Apply (dry run)" } else { "Apply" });
        ui::kv("Actions file", &args.actions_file.display().to_string());
        ui::kv("Rows", &items.len().to_string());
        if destructive > 0 {
            ui::kv("Destructive", &ui::plural(destructive, "row").red().to_string());
        }
        println!();
    }

    if needs_confirmation(ctx, &args) && !confirm_proceed(items.len(), destructive)? {
        ui::info("Aborted");
        return Ok(());
    }

    let jobs = args.jobs.unwrap_or(ctx.config.apply.jobs).max(1);
    let options = ReconcileOptions {
        dry_run: args.dry_run,
        plan: ctx.config.plan_options(),
    };

    let client = super::client(ctx)?;
    let report = if ctx.quiet {
        apply_items(client.backend(), &items, options, jobs, &mut NoProgress)
    } else {
        apply_items(
            client.backend(),
            &items,
            options,
            jobs,
            &mut BatchProgress::new(),
        )
    };

    if !ctx.quiet {
        print_results(&report);
    }

    if let Some(path) = &args.output {
        let records: Vec<ResultRecord> = report.results.iter().map(ResultRecord::from).collect();
        records::write_records(&records, Some(path))?;
        if !ctx.quiet {
            ui::dim(&format!("Results written to {}", path.display()));
        }
    }

    print_summary(&report, args.dry_run);

    if report.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} failed",
            report.summary.failed,
            ui::plural(report.summary.total(), "user")
        );
    }
    Ok(())
}

/// Reconcile `items` against `backend`.
pub fn apply_items<P: ProgressCallback>(
    backend: &dyn Backend,
    items: &[BatchItem],
    options: ReconcileOptions,
    jobs: usize,
    progress: &mut P,
) -> BatchReport {
    let reconciler = Reconciler::with_options(backend, options);
    run_batch(&reconciler, items, &BatchOptions { jobs }, progress)
}

fn needs_confirmation(ctx: &Context, args: &ApplyArgs) -> bool {
    !args.yes && !args.dry_run && ctx.config.apply.confirm
}

fn count_destructive(items: &[BatchItem]) -> usize {
    items
        .iter()
        .filter(|item| matches!(item, BatchItem::Ready(action) if action.kind.is_destructive()))
        .count()
}

fn confirm_proceed(total: usize, destructive: usize) -> Result<bool> {
    use dialoguer::Confirm;

    let prompt = if destructive > 0 {
        format!(
            "Apply {} ({} deactivating or deleting users)?",
            ui::plural(total, "row"),
            destructive
        )
    } else {
        format!("Apply {}?", ui::plural(total, "row"))
    };

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(destructive == 0)
        .interact()?;

    Ok(confirmed)
}

fn print_results(report: &BatchReport) {
    for result in &report.results {
        if result.succeeded {
            if result.applied_operations.is_empty() {
                println!(
                    "  {} {} ({}): {}",
                    "✓".green(),
                    result.user_name,
                    result.action,
                    "no changes".dimmed()
                );
            } else {
                println!(
                    "  {} {} ({})",
                    "✓".green(),
                    result.user_name.bold(),
                    result.action
                );
            }
        } else {
            println!(
                "  {} {} ({})",
                "✗".red(),
                result.user_name.bold(),
                result.action
            );
        }
        for operation in &result.applied_operations {
            println!("      {}", operation.dimmed());
        }
        for warning in &result.warnings {
            println!("      {} {}", "⚠".yellow(), warning);
        }
        if let Some(error) = &result.error {
            println!("      {}", error.to_string().red());
        }
    }
}

fn print_summary(report: &BatchReport, dry_run: bool) {
    let summary = &report.summary;
    println!();
    let verb = if dry_run { "would apply" } else { "applied" };
    let line = format!(
        "{} succeeded, {} failed, {} {}",
        summary.succeeded,
        summary.failed,
        ui::plural(summary.operations, "operation"),
        verb
    );
    if summary.is_success() {
        ui::success(&line);
    } else {
        ui::error(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamkit::KeyStatus;
    use iamkit::backend::memory::{MemoryBackend, MemoryUser};
    use reconcile::{ActionRow, ErrorKind, PlanOptions};
    use tempfile::TempDir;

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_group("Developers")
            .with_user(MemoryUser::new("alice").group("Admins"))
            .with_user(
                MemoryUser::new("carol")
                    .policy("ReadOnlyAccess")
                    .access_key("AKIACAROL1", KeyStatus::Active)
                    .login_profile(),
            )
            .with_user(MemoryUser::new("dave"))
            .fail_on("dave", "AttachUserPolicy")
    }

    fn options(dry_run: bool) -> ReconcileOptions {
        ReconcileOptions {
            dry_run,
            plan: PlanOptions::default(),
        }
    }

    fn rows() -> Vec<ActionRow> {
        vec![
            ActionRow::new("alice", "change_groups").groups("Developers"),
            ActionRow::new("carol", "delete"),
            ActionRow::new("dave", "add_policy").policies("PowerUserAccess"),
            ActionRow::new("erin", ""),
        ]
    }

    #[test]
    fn test_apply_items() {
        let backend = backend();
        let items = assemble_batch(&rows());

        let report = apply_items(&backend, &items, options(false), 1, &mut NoProgress);

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert!(!backend.contains_user("carol"));
        assert!(backend.user("alice").unwrap().groups.contains("Developers"));

        let dave = &report.results[2];
        assert_eq!(dave.user_name, "dave");
        assert_eq!(
            dave.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ApiCall)
        );
    }

    #[test]
    fn test_apply_items_dry_run_changes_nothing() {
        let backend = backend();
        let items = assemble_batch(&rows());

        let report = apply_items(&backend, &items, options(true), 4, &mut NoProgress);

        assert_eq!(report.summary.failed, 0);
        assert!(backend.contains_user("carol"));
        assert!(backend.user("alice").unwrap().groups.contains("Admins"));
        assert!(
            report.results[0]
                .applied_operations
                .iter()
                .all(|op| op.starts_with("would "))
        );
    }

    #[test]
    fn test_results_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("results.json");
        let backend = backend();
        let items = assemble_batch(&rows());
        let report = apply_items(&backend, &items, options(false), 2, &mut NoProgress);

        let records: Vec<ResultRecord> = report.results.iter().map(ResultRecord::from).collect();
        records::write_records(&records, Some(&path)).unwrap();

        let written: Vec<ResultRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let users: Vec<&str> = written.iter().map(|r| r.user_name.as_str()).collect();
        assert_eq!(users, vec!["alice", "carol", "dave"]);
        assert!(written[1].applied_operations.contains(&"deleted user carol".to_string()));
        assert!(!written[2].succeeded);
    }

    #[test]
    fn test_count_destructive() {
        let items = assemble_batch(&rows());
        assert_eq!(count_destructive(&items), 1);
    }
}
