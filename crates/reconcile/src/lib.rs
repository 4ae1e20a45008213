//! # Reconcile
//!
//! Converge IAM users toward intended actions.
//!
//! ## Core Concepts
//!
//! - **IntendedAction**: A validated request for one user (`change_groups`, `delete`, ...)
//! - **MutationPlan**: The minimal ordered IAM calls that satisfy the request
//! - **Reconciler**: Executes plans, stopping a user at its first failed call
//! - **Batch**: Many users at once, with failures isolated per user
//!
//! ## Example
//!
//! ```ignore
//! use iamkit::backend::memory::{MemoryBackend, MemoryUser};
//! use reconcile::{
//!     ActionRow, BatchOptions, NoProgress, Reconciler, assemble_batch, run_batch,
//! };
//!
//! let backend = MemoryBackend::new()
//!     .with_group("Developers")
//!     .with_user(MemoryUser::new("alice").group("Admins"));
//!
//! let rows = vec![ActionRow::new("alice", "change_groups").groups("Developers")];
//! let items = assemble_batch(&rows);
//!
//! let reconciler = Reconciler::new(&backend);
//! let report = run_batch(&reconciler, &items, &BatchOptions::default(), &mut NoProgress);
//!
//! assert_eq!(
//!     report.results[0].applied_operations,
//!     vec!["removed from Admins", "added to Developers"]
//! );
//! ```
//!
//! Plans are always computed against a snapshot read immediately before
//! execution, so re-running a partially applied batch is safe.

pub mod action;
pub mod context;
pub mod diff;
pub mod executor;
pub mod planner;
pub mod types;

// Re-export main types at crate root
pub use action::{ActionKind, ActionRow, IntendedAction, ValidationError, split_list};
pub use context::{LogProgress, NoProgress, ProgressCallback};
pub use diff::PlanSummary;
pub use executor::{BatchItem, ReconcileOptions, Reconciler, assemble_batch, run_batch};
pub use planner::{AWS_MANAGED_POLICY_PREFIX, MutationPlan, Operation, PlanOptions, interpret};
pub use types::{
    BatchOptions, BatchReport, BatchSummary, ErrorDetail, ErrorKind, ReconcileResult,
};
