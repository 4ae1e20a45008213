//! In-process IAM backend.
//!
//! Holds users, groups and a simulated credential report behind a mutex and
//! enforces the same preconditions IAM does: removing a membership that does
//! not exist is `NoSuchEntity`, deleting a user that still has keys, groups,
//! policies, MFA devices or a login profile is `DeleteConflict`. Every call is
//! recorded so tests can assert on ordering, and failures can be injected per
//! user and operation.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    AccessKey, CredentialActivity, KeyStatus, PolicyRef, ReportState, UserRecord,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

const AWS_MANAGED_PREFIX: &str = "arn:aws:iam::aws:policy/";

/// A user held by [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryUser {
    /// Identity
    pub record: UserRecord,
    /// Whether a login profile exists
    pub login_profile: bool,
    /// Assigned MFA device serials
    pub mfa_devices: Vec<String>,
    /// Group memberships
    pub groups: BTreeSet<String>,
    /// Attached managed policies
    pub policies: BTreeSet<PolicyRef>,
    /// Inline policy names
    pub inline_policies: BTreeSet<String>,
    /// Access keys
    pub access_keys: Vec<AccessKey>,
}

impl MemoryUser {
    /// A user with no dependents.
    pub fn new(user_name: &str) -> Self {
        Self {
            record: UserRecord {
                user_name: user_name.to_string(),
                user_id: format!("AIDA{}", user_name.to_uppercase()),
                arn: format!("arn:aws:iam::123456789012:user/{user_name}"),
                created_at: DateTime::<Utc>::UNIX_EPOCH,
            },
            login_profile: false,
            mfa_devices: Vec::new(),
            groups: BTreeSet::new(),
            policies: BTreeSet::new(),
            inline_policies: BTreeSet::new(),
            access_keys: Vec::new(),
        }
    }

    /// Add a group membership.
    pub fn group(mut self, group: &str) -> Self {
        self.groups.insert(group.to_string());
        self
    }

    /// Attach a managed policy. Bare names are treated as AWS managed policies.
    pub fn policy(mut self, policy: &str) -> Self {
        let arn = if policy.starts_with("arn:") {
            policy.to_string()
        } else {
            format!("{AWS_MANAGED_PREFIX}{policy}")
        };
        self.policies.insert(PolicyRef::from_arn(arn));
        self
    }

    /// Embed an inline policy.
    pub fn inline_policy(mut self, name: &str) -> Self {
        self.inline_policies.insert(name.to_string());
        self
    }

    /// Add an access key.
    pub fn access_key(mut self, key_id: &str, status: KeyStatus) -> Self {
        self.access_keys.push(AccessKey::new(key_id, status));
        self
    }

    /// Assign an MFA device.
    pub fn mfa_device(mut self, serial: &str) -> Self {
        self.mfa_devices.push(serial.to_string());
        self
    }

    /// Give the user a console password.
    pub fn login_profile(mut self) -> Self {
        self.login_profile = true;
        self
    }

    fn has_dependents(&self) -> bool {
        self.login_profile
            || !self.mfa_devices.is_empty()
            || !self.groups.is_empty()
            || !self.policies.is_empty()
            || !self.inline_policies.is_empty()
            || !self.access_keys.is_empty()
    }
}

#[derive(Debug, Default)]
struct ReportSim {
    generated: bool,
    pending_polls: u32,
    ready_after: u32,
    omitted: BTreeSet<String>,
    activity: HashMap<String, CredentialActivity>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<String, MemoryUser>,
    groups: BTreeSet<String>,
    key_usage: HashMap<String, DateTime<Utc>>,
    failures: BTreeSet<(String, String)>,
    calls: Vec<String>,
    report: ReportSim,
}

impl MemoryState {
    fn record(&mut self, operation: &str, args: &[&str]) {
        if args.is_empty() {
            self.calls.push(operation.to_string());
        } else {
            self.calls.push(format!("{} {}", operation, args.join(" ")));
        }
    }

    fn check_failure(&self, user_name: &str, operation: &str) -> Result<()> {
        if self
            .failures
            .contains(&(user_name.to_string(), operation.to_string()))
        {
            return Err(Error::ApiCall {
                operation: operation.to_string(),
                message: format!("injected failure for {user_name}"),
            });
        }
        Ok(())
    }

    /// Record the call, apply any injected failure, then borrow the user.
    fn begin(
        &mut self,
        operation: &str,
        user_name: &str,
        args: &[&str],
    ) -> Result<&mut MemoryUser> {
        let mut all_args = vec![user_name];
        all_args.extend_from_slice(args);
        self.record(operation, &all_args);
        self.check_failure(user_name, operation)?;
        self.users.get_mut(user_name).ok_or_else(|| not_found(user_name))
    }
}

fn not_found(entity: &str) -> Error {
    Error::NotFound {
        entity: entity.to_string(),
    }
}

/// In-memory IAM account.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// An empty account.
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self) -> &mut MemoryState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a user; its groups become known groups.
    pub fn with_user(mut self, user: MemoryUser) -> Self {
        let state = self.state_mut();
        state.groups.extend(user.groups.iter().cloned());
        state.users.insert(user.record.user_name.clone(), user);
        self
    }

    /// Declare a group that exists in the account.
    pub fn with_group(mut self, group: &str) -> Self {
        self.state_mut().groups.insert(group.to_string());
        self
    }

    /// Record when an access key was last used.
    pub fn with_key_usage(mut self, key_id: &str, last_used: DateTime<Utc>) -> Self {
        self.state_mut()
            .key_usage
            .insert(key_id.to_string(), last_used);
        self
    }

    /// Set the credential report row for a user.
    pub fn with_activity(mut self, user_name: &str, activity: CredentialActivity) -> Self {
        self.state_mut()
            .report
            .activity
            .insert(user_name.to_string(), activity);
        self
    }

    /// Make `operation` (IAM operation name) fail for `user_name`.
    pub fn fail_on(mut self, user_name: &str, operation: &str) -> Self {
        self.state_mut()
            .failures
            .insert((user_name.to_string(), operation.to_string()));
        self
    }

    /// Number of `GetCredentialReport` polls answered with "not ready".
    pub fn report_ready_after(mut self, polls: u32) -> Self {
        self.state_mut().report.ready_after = polls;
        self
    }

    /// Leave a user out of the credential report (stale report).
    pub fn omit_from_report(mut self, user_name: &str) -> Self {
        self.state_mut()
            .report
            .omitted
            .insert(user_name.to_string());
        self
    }

    /// Every call made so far, e.g. `AddUserToGroup alice Developers`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Current state of a user.
    pub fn user(&self, user_name: &str) -> Option<MemoryUser> {
        self.lock().users.get(user_name).cloned()
    }

    /// Whether the user exists.
    pub fn contains_user(&self, user_name: &str) -> bool {
        self.lock().users.contains_key(user_name)
    }
}

impl Backend for MemoryBackend {
    fn get_user(&self, user_name: &str) -> Result<UserRecord> {
        let mut state = self.lock();
        Ok(state.begin("GetUser", user_name, &[])?.record.clone())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut state = self.lock();
        state.record("ListUsers", &[]);
        Ok(state.users.values().map(|u| u.record.clone()).collect())
    }

    fn has_login_profile(&self, user_name: &str) -> Result<bool> {
        let mut state = self.lock();
        Ok(state.begin("GetLoginProfile", user_name, &[])?.login_profile)
    }

    fn list_mfa_devices(&self, user_name: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        Ok(state.begin("ListMFADevices", user_name, &[])?.mfa_devices.clone())
    }

    fn list_access_keys(&self, user_name: &str) -> Result<Vec<AccessKey>> {
        let mut state = self.lock();
        Ok(state.begin("ListAccessKeys", user_name, &[])?.access_keys.clone())
    }

    fn access_key_last_used(&self, key_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut state = self.lock();
        state.record("GetAccessKeyLastUsed", &[key_id]);
        let exists = state
            .users
            .values()
            .any(|u| u.access_keys.iter().any(|k| k.key_id == key_id));
        if !exists {
            return Err(not_found(key_id));
        }
        Ok(state.key_usage.get(key_id).copied())
    }

    fn list_groups_for_user(&self, user_name: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        let user = state.begin("ListGroupsForUser", user_name, &[])?;
        Ok(user.groups.iter().cloned().collect())
    }

    fn list_attached_user_policies(&self, user_name: &str) -> Result<Vec<PolicyRef>> {
        let mut state = self.lock();
        let user = state.begin("ListAttachedUserPolicies", user_name, &[])?;
        Ok(user.policies.iter().cloned().collect())
    }

    fn list_user_policies(&self, user_name: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        let user = state.begin("ListUserPolicies", user_name, &[])?;
        Ok(user.inline_policies.iter().cloned().collect())
    }

    fn generate_credential_report(&self) -> Result<ReportState> {
        let mut state = self.lock();
        state.record("GenerateCredentialReport", &[]);
        let report = &mut state.report;
        report.generated = true;
        report.pending_polls = report.ready_after;
        if report.pending_polls == 0 {
            Ok(ReportState::Complete)
        } else {
            Ok(ReportState::Started)
        }
    }

    fn get_credential_report(&self) -> Result<String> {
        let mut state = self.lock();
        state.record("GetCredentialReport", &[]);

        if !state.report.generated {
            return Err(Error::ReportNotReady);
        }
        if state.report.pending_polls > 0 {
            state.report.pending_polls -= 1;
            return Err(Error::ReportNotReady);
        }

        render_report(&state)
    }

    fn add_user_to_group(&self, user_name: &str, group: &str) -> Result<()> {
        let mut state = self.lock();
        let known = state.groups.contains(group);
        let user = state.begin("AddUserToGroup", user_name, &[group])?;
        if !known {
            return Err(not_found(group));
        }
        user.groups.insert(group.to_string());
        Ok(())
    }

    fn remove_user_from_group(&self, user_name: &str, group: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("RemoveUserFromGroup", user_name, &[group])?;
        if !user.groups.remove(group) {
            return Err(not_found(group));
        }
        Ok(())
    }

    fn attach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("AttachUserPolicy", user_name, &[policy_arn])?;
        user.policies.insert(PolicyRef::from_arn(policy_arn));
        Ok(())
    }

    fn detach_user_policy(&self, user_name: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("DetachUserPolicy", user_name, &[policy_arn])?;
        let before = user.policies.len();
        user.policies.retain(|p| p.arn != policy_arn);
        if user.policies.len() == before {
            return Err(not_found(policy_arn));
        }
        Ok(())
    }

    fn delete_user_policy(&self, user_name: &str, policy_name: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("DeleteUserPolicy", user_name, &[policy_name])?;
        if !user.inline_policies.remove(policy_name) {
            return Err(not_found(policy_name));
        }
        Ok(())
    }

    fn update_access_key(&self, user_name: &str, key_id: &str, status: KeyStatus) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("UpdateAccessKey", user_name, &[key_id, status.as_str()])?;
        let key = user
            .access_keys
            .iter_mut()
            .find(|k| k.key_id == key_id)
            .ok_or_else(|| not_found(key_id))?;
        key.status = status;
        Ok(())
    }

    fn delete_access_key(&self, user_name: &str, key_id: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("DeleteAccessKey", user_name, &[key_id])?;
        let before = user.access_keys.len();
        user.access_keys.retain(|k| k.key_id != key_id);
        if user.access_keys.len() == before {
            return Err(not_found(key_id));
        }
        Ok(())
    }

    fn deactivate_mfa_device(&self, user_name: &str, serial_number: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("DeactivateMFADevice", user_name, &[serial_number])?;
        let before = user.mfa_devices.len();
        user.mfa_devices.retain(|s| s != serial_number);
        if user.mfa_devices.len() == before {
            return Err(not_found(serial_number));
        }
        Ok(())
    }

    fn delete_login_profile(&self, user_name: &str) -> Result<()> {
        let mut state = self.lock();
        let user = state.begin("DeleteLoginProfile", user_name, &[])?;
        if !user.login_profile {
            return Err(not_found(user_name));
        }
        user.login_profile = false;
        Ok(())
    }

    fn delete_user(&self, user_name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.begin("DeleteUser", user_name, &[])?.has_dependents() {
            return Err(Error::Conflict {
                message: format!(
                    "Cannot delete entity {user_name}, must remove dependent resources first."
                ),
            });
        }
        state.users.remove(user_name);
        Ok(())
    }
}

const REPORT_HEADER: &str = "user,arn,user_creation_time,password_enabled,password_last_used,\
password_last_changed,password_next_rotation,mfa_active,access_key_1_active,\
access_key_1_last_rotated,access_key_1_last_used_date,access_key_1_last_used_region,\
access_key_1_last_used_service,access_key_2_active,access_key_2_last_rotated,\
access_key_2_last_used_date,access_key_2_last_used_region,access_key_2_last_used_service,\
cert_1_active,cert_1_last_rotated,cert_2_active,cert_2_last_rotated";

/// Render the credential report CSV the way IAM lays it out.
fn render_report(state: &MemoryState) -> Result<String> {
    fn time(value: Option<DateTime<Utc>>, missing: &str) -> String {
        value
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| missing.to_string())
    }

    fn flag(value: Option<bool>) -> &'static str {
        match value {
            Some(true) => "true",
            Some(false) => "false",
            None => "N/A",
        }
    }

    let failed = |e: csv::Error| Error::Parse(format!("could not render credential report: {e}"));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REPORT_HEADER.split(',')).map_err(failed)?;
    writer
        .write_record([
            "<root_account>",
            "arn:aws:iam::123456789012:root",
            "2020-01-01T00:00:00+00:00",
            "not_supported",
            "no_information",
            "not_supported",
            "not_supported",
            "true",
            "false",
            "N/A",
            "N/A",
            "N/A",
            "N/A",
            "false",
            "N/A",
            "N/A",
            "N/A",
            "N/A",
            "false",
            "N/A",
            "false",
            "N/A",
        ])
        .map_err(failed)?;

    for user in state.users.values() {
        let name = &user.record.user_name;
        if state.report.omitted.contains(name) {
            continue;
        }
        let activity = state.report.activity.get(name).cloned().unwrap_or_default();
        let key_active = |i: usize| user.access_keys.get(i).is_some_and(AccessKey::is_active);

        writer
            .write_record([
                name.clone(),
                user.record.arn.clone(),
                user.record.created_at.to_rfc3339(),
                flag(activity.password_enabled.or(Some(user.login_profile))).to_string(),
                time(activity.password_last_used, "no_information"),
                time(activity.password_last_changed, "N/A"),
                "N/A".to_string(),
                flag(activity.mfa_active.or(Some(!user.mfa_devices.is_empty()))).to_string(),
                key_active(0).to_string(),
                "N/A".to_string(),
                time(activity.access_key_1_last_used, "N/A"),
                "N/A".to_string(),
                "N/A".to_string(),
                key_active(1).to_string(),
                "N/A".to_string(),
                time(activity.access_key_2_last_used, "N/A"),
                "N/A".to_string(),
                "N/A".to_string(),
                "false".to_string(),
                "N/A".to_string(),
                "false".to_string(),
                "N/A".to_string(),
            ])
            .map_err(failed)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Parse(format!("could not render credential report: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Parse(format!("could not render credential report: {e}")))
}
