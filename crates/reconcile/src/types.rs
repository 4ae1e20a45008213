//! Result types for reconciliation runs

use crate::action::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a user's reconciliation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The target user does not exist
    NotFound,
    /// The action row was malformed or unrecognized
    Validation,
    /// The credential report never became ready
    ReportTimeout,
    /// An IAM call failed
    ApiCall,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::Validation => "Validation",
            Self::ReportTimeout => "ReportTimeout",
            Self::ApiCall => "ApiCall",
        };
        f.write_str(name)
    }
}

/// A captured failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ErrorDetail {
    /// Detail for a failed mutation on `user_name`.
    ///
    /// Only a missing user is `NotFound`. A missing group, policy, key or
    /// MFA device means the IAM call itself failed.
    pub fn for_operation(error: &iamkit::Error, user_name: &str) -> Self {
        match error {
            iamkit::Error::NotFound { entity } if entity != user_name => {
                Self::new(ErrorKind::ApiCall, error.to_string())
            }
            _ => Self::from(error),
        }
    }
}

impl From<&iamkit::Error> for ErrorDetail {
    fn from(error: &iamkit::Error) -> Self {
        let kind = match error {
            iamkit::Error::NotFound { .. } => ErrorKind::NotFound,
            iamkit::Error::ReportTimeout { .. } => ErrorKind::ReportTimeout,
            _ => ErrorKind::ApiCall,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<&ValidationError> for ErrorDetail {
    fn from(error: &ValidationError) -> Self {
        Self::new(ErrorKind::Validation, error.to_string())
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of reconciling one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Target user
    pub user_name: String,
    /// Action as requested (the raw text when it was not recognized)
    pub action: String,
    pub succeeded: bool,
    /// Log lines for operations that completed, in order
    pub applied_operations: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorDetail>,
}

impl ReconcileResult {
    /// A successful result with nothing applied yet
    pub fn success(user_name: &str, action: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            action: action.to_string(),
            succeeded: true,
            applied_operations: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// A failed result with nothing applied
    pub fn failure(user_name: &str, action: &str, error: ErrorDetail) -> Self {
        Self {
            succeeded: false,
            error: Some(error),
            ..Self::success(user_name, action)
        }
    }

    /// Mark this result failed, keeping whatever was applied so far
    pub fn fail(&mut self, error: ErrorDetail) {
        self.succeeded = false;
        self.error = Some(error);
    }

    /// Whether anything was applied
    pub fn is_change(&self) -> bool {
        !self.applied_operations.is_empty()
    }
}

/// Summary of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Operations applied across all users
    pub operations: usize,
}

impl BatchSummary {
    /// Check if the batch was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of users processed
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ReconcileResult) {
        if result.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.operations += result.applied_operations.len();
    }
}

/// Results of a batch, in input order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<ReconcileResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn from_results(results: Vec<ReconcileResult>) -> Self {
        let mut summary = BatchSummary::default();
        for result in &results {
            summary.add_result(result);
        }
        Self { results, summary }
    }

    /// Results that failed
    pub fn failures(&self) -> impl Iterator<Item = &ReconcileResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }
}

/// Options for a batch run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of users reconciled concurrently
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_from_iam_error() {
        let not_found = iamkit::Error::NotFound {
            entity: "ghost".to_string(),
        };
        assert_eq!(ErrorDetail::from(&not_found).kind, ErrorKind::NotFound);

        let timeout = iamkit::Error::ReportTimeout {
            waited_secs: 300,
            attempts: 30,
        };
        assert_eq!(ErrorDetail::from(&timeout).kind, ErrorKind::ReportTimeout);

        let denied = iamkit::Error::AccessDenied {
            message: "nope".to_string(),
        };
        assert_eq!(ErrorDetail::from(&denied).kind, ErrorKind::ApiCall);
    }

    #[test]
    fn test_operation_not_found_is_user_only() {
        let missing = |entity: &str| iamkit::Error::NotFound {
            entity: entity.to_string(),
        };

        assert_eq!(
            ErrorDetail::for_operation(&missing("alice"), "alice").kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            ErrorDetail::for_operation(&missing("Developers"), "alice").kind,
            ErrorKind::ApiCall
        );
        assert_eq!(
            ErrorDetail::for_operation(&missing("AKIAALICE1"), "alice").kind,
            ErrorKind::ApiCall
        );
    }

    #[test]
    fn test_failure_keeps_applied_operations() {
        let mut result = ReconcileResult::success("alice", "change_groups");
        result.applied_operations.push("removed from Admins".to_string());

        result.fail(ErrorDetail::new(ErrorKind::ApiCall, "AddUserToGroup failed"));

        assert!(!result.succeeded);
        assert_eq!(result.applied_operations, vec!["removed from Admins"]);
        assert_eq!(
            result.error.unwrap().to_string(),
            "ApiCall: AddUserToGroup failed"
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut ok = ReconcileResult::success("a", "add_group");
        ok.applied_operations.push("added to Ops".to_string());
        let bad = ReconcileResult::failure(
            "b",
            "rename",
            ErrorDetail::new(ErrorKind::Validation, "unrecognized action 'rename'"),
        );

        let report = BatchReport::from_results(vec![ok, bad]);

        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.operations, 1);
        assert_eq!(report.summary.total(), 2);
        assert!(!report.summary.is_success());
        assert_eq!(report.failures().count(), 1);
    }
}
