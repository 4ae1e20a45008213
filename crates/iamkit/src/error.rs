//! Error types for IAM operations.
//!
//! Errors are categorized so callers can tell a missing user from a
//! throttled request or a credential report that is still being generated.
//! Only [`ErrorCategory::NotReady`] is ever waited on; every other failure
//! is surfaced immediately.

use thiserror::Error;

/// Categories of IAM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The user (or a sub-resource such as a login profile) does not exist
    NotFound,
    /// The credential report has not been generated yet
    NotReady,
    /// The credential report never became ready within the poll budget
    Timeout,
    /// Request rate exceeded
    Throttled,
    /// Caller lacks permission for the operation
    AccessDenied,
    /// Resource still has dependents (e.g. deleting a user with keys)
    Conflict,
    /// Any other failed IAM API call
    Api,
    /// The aws CLI is missing or misconfigured
    Setup,
    /// Local IO/parse errors
    Other,
}

impl ErrorCategory {
    /// Whether the operation should be polled again after a delay.
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::NotReady)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "IAM entity not found",
            Self::NotReady => "Credential report not ready",
            Self::Timeout => "Credential report timed out",
            Self::Throttled => "Request throttled",
            Self::AccessDenied => "Access denied",
            Self::Conflict => "Dependent resources still exist",
            Self::Api => "IAM API call failed",
            Self::Setup => "aws CLI unavailable",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "Check the user name; the user may already have been deleted",
            Self::NotReady => "Wait for the credential report to finish generating",
            Self::Timeout => "Raise [report].timeout_secs or retry later",
            Self::Throttled => "Re-run the batch later; all actions are idempotent",
            Self::AccessDenied => "Check the IAM permissions of the selected profile",
            Self::Conflict => "Remove the dependent resources first, or use the delete action",
            Self::Api => "Check the error details and re-run the batch",
            Self::Setup => "Install the aws CLI from https://aws.amazon.com/cli/",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while reading or mutating IAM state.
#[derive(Debug, Error)]
pub enum Error {
    /// The named entity does not exist
    #[error("no such entity: {entity}")]
    NotFound {
        /// User name or resource identifier that was not found
        entity: String,
    },

    /// Credential report generation has not finished
    #[error("credential report is not ready")]
    ReportNotReady,

    /// Credential report did not become ready in time
    #[error("credential report not ready after {waited_secs}s ({attempts} polls)")]
    ReportTimeout {
        /// Seconds spent waiting
        waited_secs: u64,
        /// Number of polls performed
        attempts: u32,
    },

    /// Request throttled by AWS
    #[error("request throttled: {message}")]
    Throttled {
        /// Message reported by AWS
        message: String,
    },

    /// Permission denied
    #[error("access denied: {message}")]
    AccessDenied {
        /// Message reported by AWS
        message: String,
    },

    /// Entity still has dependents
    #[error("delete conflict: {message}")]
    Conflict {
        /// Message reported by AWS
        message: String,
    },

    /// Any other IAM API failure
    #[error("{operation} failed: {message}")]
    ApiCall {
        /// IAM operation name, e.g. `AttachUserPolicy`
        operation: String,
        /// Message reported by AWS (or by the CLI)
        message: String,
    },

    /// The aws CLI could not be found
    #[error("aws CLI not found. Install it from https://aws.amazon.com/cli/")]
    AwsCliNotFound,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credential report payload was not valid base64
    #[error("could not decode credential report: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Malformed data (credential report rows, timestamps)
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::ReportNotReady => ErrorCategory::NotReady,
            Error::ReportTimeout { .. } => ErrorCategory::Timeout,
            Error::Throttled { .. } => ErrorCategory::Throttled,
            Error::AccessDenied { .. } => ErrorCategory::AccessDenied,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::ApiCall { .. } => ErrorCategory::Api,
            Error::AwsCliNotFound => ErrorCategory::Setup,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error means the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Whether the failed call is worth polling again.
    pub fn is_pollable(&self) -> bool {
        self.category().is_pollable()
    }

    /// Create an error from aws CLI stderr.
    ///
    /// The CLI reports service errors as
    /// `An error occurred (Code) when calling the Op operation: message`;
    /// the code in parentheses drives the category.
    pub fn from_aws_output(operation: &str, stderr: &str, entity: Option<&str>) -> Self {
        let stderr = stderr.trim();
        let message = stderr
            .split_once("operation: ")
            .map(|(_, msg)| msg.trim())
            .unwrap_or(stderr)
            .to_string();

        match error_code(stderr) {
            Some("NoSuchEntity") => Error::NotFound {
                entity: entity.unwrap_or("unknown").to_string(),
            },
            Some("ReportInProgress" | "ReportNotPresent" | "ReportExpired") => {
                Error::ReportNotReady
            }
            Some("Throttling" | "ThrottlingException" | "RequestLimitExceeded") => {
                Error::Throttled { message }
            }
            Some("AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation") => {
                Error::AccessDenied { message }
            }
            Some("DeleteConflict") => Error::Conflict { message },
            _ => Error::ApiCall {
                operation: operation.to_string(),
                message,
            },
        }
    }
}

/// Extract the service error code from aws CLI stderr.
fn error_code(stderr: &str) -> Option<&str> {
    let rest = stderr.split_once("An error occurred (")?.1;
    rest.split_once(')').map(|(code, _)| code)
}

/// Result type for IAM operations.
pub type Result<T> = std::result::Result<T, Error>;
