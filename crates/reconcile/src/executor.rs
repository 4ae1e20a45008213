//! Execution engine - applies plans one user at a time and runs batches

use crate::action::{ActionRow, IntendedAction, ValidationError};
use crate::context::ProgressCallback;
use crate::planner::{MutationPlan, Operation, PlanOptions, interpret};
use crate::types::{BatchOptions, BatchReport, ErrorDetail, ReconcileResult};
use iamkit::backend::Backend;
use iamkit::{KeyStatus, UserSnapshot};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Options for a [`Reconciler`]
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Record `would ...` lines instead of calling IAM
    pub dry_run: bool,
    /// How action targets are resolved
    pub plan: PlanOptions,
}

/// Applies mutation plans against a backend.
///
/// Operations run strictly in plan order. The first failure stops the user;
/// whatever already succeeded stays applied and is reported.
pub struct Reconciler<'a> {
    backend: &'a dyn Backend,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self::with_options(backend, ReconcileOptions::default())
    }

    pub fn with_options(backend: &'a dyn Backend, options: ReconcileOptions) -> Self {
        Self { backend, options }
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Read a fresh snapshot of the action's user.
    pub fn snapshot(&self, action: &IntendedAction) -> iamkit::Result<UserSnapshot> {
        iamkit::snapshot::read_snapshot(self.backend, &action.user_name)
    }

    /// Plan an action against the user's current state.
    pub fn plan(&self, action: &IntendedAction) -> iamkit::Result<MutationPlan> {
        let snapshot = self.snapshot(action)?;
        Ok(interpret(action, &snapshot, &self.options.plan))
    }

    /// Execute a plan.
    pub fn reconcile(&self, plan: &MutationPlan) -> ReconcileResult {
        let mut result = ReconcileResult::success(&plan.user_name, plan.kind.as_str());
        result.warnings = plan.warnings.clone();

        for operation in &plan.operations {
            if self.options.dry_run {
                result
                    .applied_operations
                    .push(format!("would {}", operation.intent()));
                continue;
            }

            match perform(self.backend, &plan.user_name, operation) {
                Ok(()) => {
                    log::info!("{}: {}", plan.user_name, operation);
                    result.applied_operations.push(operation.to_string());
                }
                Err(e) => {
                    log::warn!(
                        "{}: failed to {}: {}",
                        plan.user_name,
                        operation.intent(),
                        e
                    );
                    result.fail(ErrorDetail::for_operation(&e, &plan.user_name));
                    break;
                }
            }
        }

        result
    }

    /// Snapshot, plan and execute one action. Never fails: every error ends
    /// up in the returned result.
    pub fn process(&self, action: &IntendedAction) -> ReconcileResult {
        match self.plan(action) {
            Ok(plan) => self.reconcile(&plan),
            Err(e) => {
                log::warn!("{}: {}", action.user_name, e);
                ReconcileResult::failure(
                    &action.user_name,
                    action.kind.as_str(),
                    ErrorDetail::from(&e),
                )
            }
        }
    }
}

/// Issue the IAM call behind one operation.
fn perform(backend: &dyn Backend, user_name: &str, operation: &Operation) -> iamkit::Result<()> {
    match operation {
        Operation::RemoveFromGroup { group } => backend.remove_user_from_group(user_name, group),
        Operation::AddToGroup { group } => backend.add_user_to_group(user_name, group),
        Operation::DetachPolicy { policy } => backend.detach_user_policy(user_name, &policy.arn),
        Operation::AttachPolicy { policy } => backend.attach_user_policy(user_name, &policy.arn),
        Operation::DeleteInlinePolicy { name } => backend.delete_user_policy(user_name, name),
        Operation::DeactivateKey { key_id } => {
            backend.update_access_key(user_name, key_id, KeyStatus::Inactive)
        }
        Operation::DeleteKey { key_id } => backend.delete_access_key(user_name, key_id),
        Operation::DeactivateMfaDevice { serial } => {
            backend.deactivate_mfa_device(user_name, serial)
        }
        Operation::DeleteLoginProfile => backend.delete_login_profile(user_name),
        Operation::DeleteUser { user_name } => backend.delete_user(user_name),
    }
}

/// One entry of a batch: a validated action, or a row that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItem {
    Ready(IntendedAction),
    Rejected {
        user_name: String,
        action: String,
        error: ValidationError,
    },
}

impl BatchItem {
    /// Validate a row.
    pub fn from_row(row: &ActionRow) -> Self {
        match IntendedAction::parse(row) {
            Ok(action) => Self::Ready(action),
            Err(error) => Self::Rejected {
                user_name: row.user_name.trim().to_string(),
                action: row.action.trim().to_string(),
                error,
            },
        }
    }

    pub fn user_name(&self) -> &str {
        match self {
            Self::Ready(action) => &action.user_name,
            Self::Rejected { user_name, .. } => user_name,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            Self::Ready(action) => action.kind.as_str(),
            Self::Rejected { action, .. } => action,
        }
    }
}

/// Validate rows into batch items. Rows with a blank action are dropped.
pub fn assemble_batch(rows: &[ActionRow]) -> Vec<BatchItem> {
    rows.iter()
        .filter(|row| {
            if row.is_blank() {
                log::debug!("Skipping {}: no action", row.user_name.trim());
                return false;
            }
            true
        })
        .map(BatchItem::from_row)
        .collect()
}

fn run_item(reconciler: &Reconciler<'_>, item: &BatchItem) -> ReconcileResult {
    match item {
        BatchItem::Ready(action) => reconciler.process(action),
        BatchItem::Rejected {
            user_name,
            action,
            error,
        } => {
            log::warn!("{}: rejected: {}", user_name, error);
            ReconcileResult::failure(user_name, action, ErrorDetail::from(error))
        }
    }
}

/// Run a batch.
///
/// Produces one result per item, in input order. A failing user never stops
/// the batch. With `jobs > 1` users are reconciled concurrently, but all
/// items for the same user run in order on one worker.
pub fn run_batch<P: ProgressCallback>(
    reconciler: &Reconciler<'_>,
    items: &[BatchItem],
    options: &BatchOptions,
    progress: &mut P,
) -> BatchReport {
    progress.on_batch_start(items.len());

    let results = if options.jobs <= 1 || items.len() <= 1 {
        run_sequential(reconciler, items, progress)
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
        {
            Ok(pool) => run_parallel(&pool, reconciler, items, progress),
            Err(e) => {
                log::warn!("Failed to create thread pool, running sequentially: {}", e);
                run_sequential(reconciler, items, progress)
            }
        }
    };

    let report = BatchReport::from_results(results);
    progress.on_batch_complete(&report.summary);
    report
}

fn run_sequential<P: ProgressCallback>(
    reconciler: &Reconciler<'_>,
    items: &[BatchItem],
    progress: &mut P,
) -> Vec<ReconcileResult> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        progress.on_user_start(item.user_name(), item.action());
        let result = run_item(reconciler, item);
        progress.on_user_complete(&result);
        results.push(result);
    }
    results
}

/// Group item indices by user, keeping first-appearance order.
fn user_lanes(items: &[BatchItem]) -> Vec<Vec<usize>> {
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    let mut lane_of: HashMap<&str, usize> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let lane = *lane_of.entry(item.user_name()).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[lane].push(index);
    }
    lanes
}

fn run_parallel<P: ProgressCallback>(
    pool: &rayon::ThreadPool,
    reconciler: &Reconciler<'_>,
    items: &[BatchItem],
    progress: &mut P,
) -> Vec<ReconcileResult> {
    let lanes = user_lanes(items);
    let progress = Mutex::new(progress);
    let results: Mutex<Vec<(usize, ReconcileResult)>> =
        Mutex::new(Vec::with_capacity(items.len()));

    pool.install(|| {
        lanes.par_iter().for_each(|lane| {
            for &index in lane {
                let item = &items[index];
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_user_start(item.user_name(), item.action());

                let result = run_item(reconciler, item);

                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_user_complete(&result);
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((index, result));
            }
        });
    });

    let mut results = results
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}
