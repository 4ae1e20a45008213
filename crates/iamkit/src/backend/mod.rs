//! Backend abstraction for IAM operations.
//!
//! The [`Backend`] trait mirrors the IAM API calls the reader and the
//! reconciler need, one method per call. Implementations:
//! - [`aws_cli::AwsCliBackend`]: real account, via the `aws` CLI
//! - [`memory::MemoryBackend`]: in-process IAM for tests and dry experiments

pub mod aws_cli;
pub mod memory;

use crate::error::Result;
use crate::types::{AccessKey, KeyStatus, PolicyRef, ReportState, UserRecord};
use chrono::{DateTime, Utc};

/// Backend trait for IAM operations.
///
/// Every method maps to exactly one IAM API call. Missing users surface as
/// [`crate::Error::NotFound`]; implementations never retry.
pub trait Backend: Send + Sync {
    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// `GetUser`
    fn get_user(&self, user_name: &str) -> Result<UserRecord>;

    /// `ListUsers`, all pages.
    fn list_users(&self) -> Result<Vec<UserRecord>>;

    /// `GetLoginProfile`, mapped to whether a profile exists.
    fn has_login_profile(&self, user_name: &str) -> Result<bool>;

    /// `ListMFADevices`, returning device serial numbers.
    fn list_mfa_devices(&self, user_name: &str) -> Result<Vec<String>>;

    /// `ListAccessKeys`. `last_used` is left empty.
    fn list_access_keys(&self, user_name: &str) -> Result<Vec<AccessKey>>;

    /// `GetAccessKeyLastUsed`
    fn access_key_last_used(&self, key_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// `ListGroupsForUser`, returning group names.
    fn list_groups_for_user(&self, user_name: &str) -> Result<Vec<String>>;

    /// `ListAttachedUserPolicies`
    fn list_attached_user_policies(&self, user_name: &str) -> Result<Vec<PolicyRef>>;

    /// `ListUserPolicies`, returning inline policy names.
    fn list_user_policies(&self, user_name: &str) -> Result<Vec<String>>;

    // ---------------------------------------------------------------------
    // Credential report
    // ---------------------------------------------------------------------

    /// `GenerateCredentialReport`
    fn generate_credential_report(&self) -> Result<ReportState>;

    /// `GetCredentialReport`, returning the decoded CSV.
    ///
    /// Returns [`crate::Error::ReportNotReady`] while generation is running.
    fn get_credential_report(&self) -> Result<String>;

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// `AddUserToGroup`
    fn add_user_to_group(&self, user_name: &str, group: &str) -> Result<()>;

    /// `RemoveUserFromGroup`
    fn remove_user_from_group(&self, user_name: &str, group: &str) -> Result<()>;

    /// `AttachUserPolicy`
    fn attach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()>;

    /// `DetachUserPolicy`
    fn detach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()>;

    /// `DeleteUserPolicy` (inline policy)
    fn delete_user_policy(&self, user_name: &str, policy_name: &str) -> Result<()>;

    /// `UpdateAccessKey`
    fn update_access_key(&self, user_name: &str, key_id: &str, status: KeyStatus) -> Result<()>;

    /// `DeleteAccessKey`
    fn delete_access_key(&self, user_name: &str, key_id: &str) -> Result<()>;

    /// `DeactivateMFADevice`
    fn deactivate_mfa_device(&self, user_name: &str, serial_number: &str) -> Result<()>;

    /// `DeleteLoginProfile`
    fn delete_login_profile(&self, user_name: &str) -> Result<()>;

    /// `DeleteUser`
    fn delete_user(&self, user_name: &str) -> Result<()>;

    /// Names of all users in the account.
    fn list_user_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_users()?
            .into_iter()
            .map(|u| u.user_name)
            .collect())
    }
}

/// Get the default backend (real aws CLI).
pub fn default_backend(options: aws_cli::AwsCliOptions) -> Result<aws_cli::AwsCliBackend> {
    aws_cli::AwsCliBackend::new(options)
}
