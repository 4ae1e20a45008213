//! # iamkit
//!
//! Read live AWS IAM user state and apply IAM mutations.
//!
//! This crate provides:
//! - A [`Backend`](backend::Backend) trait with one method per IAM API call
//! - A real backend that drives the `aws` CLI, and an in-memory one
//! - The IAM State Reader ([`snapshot::read_snapshot`])
//! - The Credential Activity Aggregator ([`report::fetch_activity_report`])
//!
//! ## Example
//!
//! ```no_run
//! use iamkit::{Client, PollConfig};
//! use iamkit::backend::aws_cli::AwsCliOptions;
//!
//! let client = Client::new(AwsCliOptions::default()).expect("aws CLI not available");
//!
//! let report = client
//!     .fetch_activity_report(&PollConfig::default())
//!     .expect("credential report failed");
//!
//! for snapshot in client.read_all().expect("listing failed") {
//!     let activity = report.activity_for(&snapshot.user_name);
//!     let snapshot = snapshot.with_activity(&activity);
//!     println!("{}: {} groups", snapshot.user_name, snapshot.groups.len());
//! }
//! ```
//!
//! ## Polling
//!
//! Only the credential report is polled, with exponential backoff and a hard
//! timeout configured through [`PollConfig`]. IAM mutations are never retried.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod poll;
pub mod report;
pub mod snapshot;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use report::ActivityReport;
pub use types::{
    AccessKey, CredentialActivity, KeyStatus, PolicyRef, PollConfig, ReportState, UserRecord,
    UserSnapshot,
};

use backend::Backend;
use backend::aws_cli::AwsCliOptions;

/// High-level client for IAM reads.
///
/// Wraps a backend; mutations go through [`Client::backend`] so the
/// reconciler can drive them one call at a time.
pub struct Client {
    backend: Box<dyn Backend>,
}

impl Client {
    /// Create a client backed by the aws CLI.
    ///
    /// Returns an error if the aws CLI is not installed.
    pub fn new(options: AwsCliOptions) -> Result<Self> {
        let backend = backend::default_backend(options)?;
        Ok(Self {
            backend: Box::new(backend),
        })
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Names of all users in the account.
    pub fn list_user_names(&self) -> Result<Vec<String>> {
        self.backend.list_user_names()
    }

    /// Read the current state of one user.
    pub fn read_snapshot(&self, user_name: &str) -> Result<UserSnapshot> {
        snapshot::read_snapshot(self.backend.as_ref(), user_name)
    }

    /// Read every user in the account.
    pub fn read_all(&self) -> Result<Vec<UserSnapshot>> {
        snapshot::read_all(self.backend.as_ref())
    }

    /// Generate and fetch the credential report, logging each wait.
    pub fn fetch_activity_report(&self, config: &PollConfig) -> Result<ActivityReport> {
        report::fetch_activity_report(self.backend.as_ref(), config, Some(&poll::LogCallback))
    }
}
