//! Real IAM backend using `aws iam` commands.
//!
//! Every call runs `aws iam <command> --output json` and deserializes the
//! response. Credentials, profiles and regions are resolved by the CLI
//! itself; this backend only forwards `--profile` / `--region`.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{AccessKey, KeyStatus, PolicyRef, ReportState, UserRecord};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::process::{Command, Output};

/// How to invoke the aws CLI.
#[derive(Debug, Clone, Default)]
pub struct AwsCliOptions {
    /// Explicit path to the `aws` executable
    pub cli_path: Option<String>,
    /// Named profile (`--profile`)
    pub profile: Option<String>,
    /// Region (`--region`)
    pub region: Option<String>,
}

/// Backend that executes real `aws iam` commands.
pub struct AwsCliBackend {
    /// Path to the aws executable
    aws_path: String,
    profile: Option<String>,
    region: Option<String>,
}

impl AwsCliBackend {
    /// Create a new AwsCliBackend.
    ///
    /// Returns an error if the aws CLI is not installed.
    pub fn new(options: AwsCliOptions) -> Result<Self> {
        let aws_path = match options.cli_path {
            Some(path) => path,
            None => find_aws()?,
        };
        log::debug!("Using aws CLI at {}", aws_path);

        Ok(Self {
            aws_path,
            profile: options.profile,
            region: options.region,
        })
    }

    /// Run `aws iam <command> <args>` and return raw output.
    fn run_aws(&self, command: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.aws_path);
        cmd.arg("iam").arg(command).args(args).args(["--output", "json"]);

        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }

        log::trace!("aws iam {} {}", command, args.join(" "));

        cmd.env("AWS_PAGER", "")
            .output()
            .map_err(|e| Error::ApiCall {
                operation: command.to_string(),
                message: format!("failed to execute aws: {}", e),
            })
    }

    /// Run a command, mapping a non-zero exit to a categorized error.
    fn run_checked(
        &self,
        operation: &str,
        command: &str,
        args: &[&str],
        entity: Option<&str>,
    ) -> Result<Vec<u8>> {
        let output = self.run_aws(command, args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_aws_output(operation, &stderr, entity));
        }

        Ok(output.stdout)
    }

    /// Run a read command and deserialize its JSON response.
    fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        command: &str,
        args: &[&str],
        entity: Option<&str>,
    ) -> Result<T> {
        let stdout = self.run_checked(operation, command, args, entity)?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    /// Run a mutation command whose output is empty.
    fn call_unit(
        &self,
        operation: &str,
        command: &str,
        args: &[&str],
        entity: Option<&str>,
    ) -> Result<()> {
        self.run_checked(operation, command, args, entity)?;
        Ok(())
    }
}

impl Backend for AwsCliBackend {
    fn get_user(&self, user_name: &str) -> Result<UserRecord> {
        let response: GetUserResponse =
            self.call("GetUser", "get-user", &["--user-name", user_name], Some(user_name))?;
        Ok(response.user.into())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>> {
        // The CLI follows pagination markers itself
        let response: ListUsersResponse = self.call("ListUsers", "list-users", &[], None)?;
        Ok(response.users.into_iter().map(Into::into).collect())
    }

    fn has_login_profile(&self, user_name: &str) -> Result<bool> {
        match self.run_checked(
            "GetLoginProfile",
            "get-login-profile",
            &["--user-name", user_name],
            Some(user_name),
        ) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_mfa_devices(&self, user_name: &str) -> Result<Vec<String>> {
        let response: ListMfaDevicesResponse = self.call(
            "ListMFADevices",
            "list-mfa-devices",
            &["--user-name", user_name],
            Some(user_name),
        )?;
        Ok(response
            .mfa_devices
            .into_iter()
            .map(|d| d.serial_number)
            .collect())
    }

    fn list_access_keys(&self, user_name: &str) -> Result<Vec<AccessKey>> {
        let response: ListAccessKeysResponse = self.call(
            "ListAccessKeys",
            "list-access-keys",
            &["--user-name", user_name],
            Some(user_name),
        )?;
        response
            .access_key_metadata
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    fn access_key_last_used(&self, key_id: &str) -> Result<Option<DateTime<Utc>>> {
        let response: AccessKeyLastUsedResponse = self.call(
            "GetAccessKeyLastUsed",
            "get-access-key-last-used",
            &["--access-key-id", key_id],
            Some(key_id),
        )?;
        Ok(response.access_key_last_used.last_used_date)
    }

    fn list_groups_for_user(&self, user_name: &str) -> Result<Vec<String>> {
        let response: ListGroupsResponse = self.call(
            "ListGroupsForUser",
            "list-groups-for-user",
            &["--user-name", user_name],
            Some(user_name),
        )?;
        Ok(response.groups.into_iter().map(|g| g.group_name).collect())
    }

    fn list_attached_user_policies(&self, user_name: &str) -> Result<Vec<PolicyRef>> {
        let response: ListAttachedPoliciesResponse = self.call(
            "ListAttachedUserPolicies",
            "list-attached-user-policies",
            &["--user-name", user_name],
            Some(user_name),
        )?;
        Ok(response
            .attached_policies
            .into_iter()
            .map(|p| PolicyRef::new(p.policy_name, p.policy_arn))
            .collect())
    }

    fn list_user_policies(&self, user_name: &str) -> Result<Vec<String>> {
        let response: ListUserPoliciesResponse = self.call(
            "ListUserPolicies",
            "list-user-policies",
            &["--user-name", user_name],
            Some(user_name),
        )?;
        Ok(response.policy_names)
    }

    fn generate_credential_report(&self) -> Result<ReportState> {
        let response: GenerateReportResponse = self.call(
            "GenerateCredentialReport",
            "generate-credential-report",
            &[],
            None,
        )?;
        ReportState::parse(&response.state)
            .ok_or_else(|| Error::Parse(format!("unknown report state '{}'", response.state)))
    }

    fn get_credential_report(&self) -> Result<String> {
        let response: GetReportResponse =
            self.call("GetCredentialReport", "get-credential-report", &[], None)?;
        decode_report(&response.content)
    }

    fn add_user_to_group(&self, user_name: &str, group: &str) -> Result<()> {
        self.call_unit(
            "AddUserToGroup",
            "add-user-to-group",
            &["--user-name", user_name, "--group-name", group],
            Some(group),
        )
    }

    fn remove_user_from_group(&self, user_name: &str, group: &str) -> Result<()> {
        self.call_unit(
            "RemoveUserFromGroup",
            "remove-user-from-group",
            &["--user-name", user_name, "--group-name", group],
            Some(group),
        )
    }

    fn attach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()> {
        self.call_unit(
            "AttachUserPolicy",
            "attach-user-policy",
            &["--user-name", user_name, "--policy-arn", policy_arn],
            Some(policy_arn),
        )
    }

    fn detach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()> {
        self.call_unit(
            "DetachUserPolicy",
            "detach-user-policy",
            &["--user-name", user_name, "--policy-arn", policy_arn],
            Some(policy_arn),
        )
    }

    fn delete_user_policy(&self, user_name: &str, policy_name: &str) -> Result<()> {
        self.call_unit(
            "DeleteUserPolicy",
            "delete-user-policy",
            &["--user-name", user_name, "--policy-name", policy_name],
            Some(policy_name),
        )
    }

    fn update_access_key(&self, user_name: &str, key_id: &str, status: KeyStatus) -> Result<()> {
        self.call_unit(
            "UpdateAccessKey",
            "update-access-key",
            &[
                "--user-name",
                user_name,
                "--access-key-id",
                key_id,
                "--status",
                status.as_str(),
            ],
            Some(key_id),
        )
    }

    fn delete_access_key(&self, user_name: &str, key_id: &str) -> Result<()> {
        self.call_unit(
            "DeleteAccessKey",
            "delete-access-key",
            &["--user-name", user_name, "--access-key-id", key_id],
            Some(key_id),
        )
    }

    fn deactivate_mfa_device(&self, user_name: &str, serial_number: &str) -> Result<()> {
        self.call_unit(
            "DeactivateMFADevice",
            "deactivate-mfa-device",
            &["--user-name", user_name, "--serial-number", serial_number],
            Some(serial_number),
        )
    }

    fn delete_login_profile(&self, user_name: &str) -> Result<()> {
        self.call_unit(
            "DeleteLoginProfile",
            "delete-login-profile",
            &["--user-name", user_name],
            Some(user_name),
        )
    }

    fn delete_user(&self, user_name: &str) -> Result<()> {
        self.call_unit(
            "DeleteUser",
            "delete-user",
            &["--user-name", user_name],
            Some(user_name),
        )
    }
}

/// Find the aws executable.
fn find_aws() -> Result<String> {
    which::which("aws")
        .map(|path| path.to_string_lossy().to_string())
        .map_err(|_| Error::AwsCliNotFound)
}

/// Decode the base64 `Content` field of `GetCredentialReport`.
fn decode_report(content: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(content.trim())?;
    String::from_utf8(bytes).map_err(|e| Error::Parse(format!("report is not UTF-8: {}", e)))
}

// ============================================================================
// Response shapes (aws CLI JSON output)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserJson {
    user_name: String,
    user_id: String,
    arn: String,
    create_date: DateTime<Utc>,
}

impl From<UserJson> for UserRecord {
    fn from(user: UserJson) -> Self {
        Self {
            user_name: user.user_name,
            user_id: user.user_id,
            arn: user.arn,
            created_at: user.create_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    user: UserJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListUsersResponse {
    #[serde(default)]
    users: Vec<UserJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MfaDeviceJson {
    serial_number: String,
}

#[derive(Debug, Deserialize)]
struct ListMfaDevicesResponse {
    #[serde(rename = "MFADevices", default)]
    mfa_devices: Vec<MfaDeviceJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKeyJson {
    access_key_id: String,
    status: String,
    #[serde(default)]
    create_date: Option<DateTime<Utc>>,
}

impl TryFrom<AccessKeyJson> for AccessKey {
    type Error = Error;

    fn try_from(key: AccessKeyJson) -> Result<Self> {
        let status = KeyStatus::parse(&key.status).ok_or_else(|| {
            Error::Parse(format!(
                "unknown status '{}' for key {}",
                key.status, key.access_key_id
            ))
        })?;
        Ok(Self {
            key_id: key.access_key_id,
            status,
            created_at: key.create_date,
            last_used: None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAccessKeysResponse {
    #[serde(default)]
    access_key_metadata: Vec<AccessKeyJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LastUsedJson {
    #[serde(default)]
    last_used_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKeyLastUsedResponse {
    access_key_last_used: LastUsedJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupJson {
    group_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListGroupsResponse {
    #[serde(default)]
    groups: Vec<GroupJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachedPolicyJson {
    policy_name: String,
    policy_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAttachedPoliciesResponse {
    #[serde(default)]
    attached_policies: Vec<AttachedPolicyJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListUserPoliciesResponse {
    #[serde(default)]
    policy_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateReportResponse {
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetReportResponse {
    content: String,
}
