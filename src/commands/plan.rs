//! `iamsync plan`: preview an actions file against live state.

use anyhow::Result;
use colored::Colorize;
use reconcile::{BatchItem, ErrorDetail, MutationPlan, PlanSummary, Reconciler, assemble_batch};

use crate::Context;
use crate::cli::PlanArgs;
use crate::records;
use crate::ui;

/// Plan for one row, or why it cannot be planned.
pub enum PlanOutcome {
    Planned(MutationPlan),
    Failed {
        user_name: String,
        action: String,
        error: ErrorDetail,
    },
}

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let rows = records::read_action_rows(&args.actions_file)?;
    let items = assemble_batch(&rows);

    ui::header("Plan");
    ui::kv("Actions file", &args.actions_file.display().to_string());
    ui::kv("Rows", &format!("{} ({} with an action)", rows.len(), items.len()));

    if items.is_empty() {
        println!();
        ui::info("No rows have an Action; nothing to plan.");
        return Ok(());
    }

    let client = super::client(ctx)?;
    let reconciler = Reconciler::with_options(
        client.backend(),
        reconcile::ReconcileOptions {
            dry_run: true,
            plan: ctx.config.plan_options(),
        },
    );

    let outcomes = plan_items(&reconciler, &items);
    for outcome in &outcomes {
        print_outcome(outcome);
    }

    let summary = PlanSummary::from_plans(outcomes.iter().filter_map(|o| match o {
        PlanOutcome::Planned(plan) => Some(plan),
        PlanOutcome::Failed { .. } => None,
    }));
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, PlanOutcome::Failed { .. }))
        .count();

    println!();
    ui::kv("Users changing", &summary.users_changed.to_string());
    ui::kv("Already in sync", &summary.users_unchanged.to_string());
    ui::kv(
        "Operations",
        &format!(
            "{} ({} additions, {} removals, {} user deletions)",
            summary.total_operations(),
            summary.additions,
            summary.removals,
            summary.deletions
        ),
    );
    if summary.warnings > 0 {
        ui::kv("Warnings", &summary.warnings.to_string());
    }

    if failed > 0 {
        anyhow::bail!("{} cannot be applied", ui::plural(failed, "row"));
    }
    Ok(())
}

/// Plan every item against a fresh snapshot of its user.
pub fn plan_items(reconciler: &Reconciler<'_>, items: &[BatchItem]) -> Vec<PlanOutcome> {
    items
        .iter()
        .map(|item| match item {
            BatchItem::Ready(action) => match reconciler.plan(action) {
                Ok(plan) => PlanOutcome::Planned(plan),
                Err(e) => PlanOutcome::Failed {
                    user_name: action.user_name.clone(),
                    action: action.kind.to_string(),
                    error: ErrorDetail::from(&e),
                },
            },
            BatchItem::Rejected {
                user_name,
                action,
                error,
            } => PlanOutcome::Failed {
                user_name: user_name.clone(),
                action: action.clone(),
                error: ErrorDetail::from(error),
            },
        })
        .collect()
}

fn print_outcome(outcome: &PlanOutcome) {
    match outcome {
        PlanOutcome::Planned(plan) => {
            ui::section(&format!("{} ({})", plan.user_name, plan.kind));
            for warning in &plan.warnings {
                ui::warn(warning);
            }
            if plan.is_empty() {
                ui::dim("already up to date");
            }
            for operation in &plan.operations {
                ui::operation(&operation.intent(), operation.is_removal());
            }
        }
        PlanOutcome::Failed {
            user_name,
            action,
            error,
        } => {
            ui::section(&format!("{} ({})", user_name, action));
            println!("  {} {}", "✗".red(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamkit::backend::memory::{MemoryBackend, MemoryUser};
    use reconcile::{ActionRow, ErrorKind};

    #[test]
    fn test_plan_items() {
        let backend = MemoryBackend::new()
            .with_group("Developers")
            .with_user(MemoryUser::new("alice").group("Admins"))
            .with_user(MemoryUser::new("bob"));
        let reconciler = Reconciler::new(&backend);
        let items = assemble_batch(&[
            ActionRow::new("alice", "change_groups").groups("Developers"),
            ActionRow::new("bob", "rename"),
            ActionRow::new("ghost", "delete"),
        ]);

        let outcomes = plan_items(&reconciler, &items);

        match &outcomes[0] {
            PlanOutcome::Planned(plan) => {
                let intents: Vec<String> = plan.operations.iter().map(|o| o.intent()).collect();
                assert_eq!(intents, vec!["remove from Admins", "add to Developers"]);
            }
            PlanOutcome::Failed { .. } => panic!("alice should plan"),
        }
        assert!(matches!(
            &outcomes[1],
            PlanOutcome::Failed { error, .. } if error.kind == ErrorKind::Validation
        ));
        assert!(matches!(
            &outcomes[2],
            PlanOutcome::Failed { error, .. } if error.kind == ErrorKind::NotFound
        ));

        // Planning never mutates.
        assert!(backend.user("alice").unwrap().groups.contains("Admins"));
    }
}
