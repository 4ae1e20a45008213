//! Core types for IAM user state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Identity of an IAM user, as returned by `GetUser` and `ListUsers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User name (unique within the account)
    pub user_name: String,
    /// Stable IAM user id (`AIDA...`)
    pub user_id: String,
    /// User ARN
    pub arn: String,
    /// When the user was created
    pub created_at: DateTime<Utc>,
}

/// Status of an access key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyStatus {
    /// Key can be used to sign requests
    Active,
    /// Key exists but is rejected by AWS
    Inactive,
}

impl KeyStatus {
    /// The value IAM uses on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }

    /// Parse an IAM status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(Self::Active),
            "Inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access key metadata plus last-used time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    /// Access key id (`AKIA...`)
    pub key_id: String,
    /// Current status
    pub status: KeyStatus,
    /// When the key was created
    pub created_at: Option<DateTime<Utc>>,
    /// Last time the key signed a request, if ever
    pub last_used: Option<DateTime<Utc>>,
}

impl AccessKey {
    /// Create a key with no timestamps.
    pub fn new(key_id: impl Into<String>, status: KeyStatus) -> Self {
        Self {
            key_id: key_id.into(),
            status,
            created_at: None,
            last_used: None,
        }
    }

    /// Whether the key is active.
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

/// A managed policy attached to a user.
///
/// Ordered by name first so sets of policies list alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    /// Policy name, e.g. `ReadOnlyAccess`
    pub name: String,
    /// Policy ARN
    pub arn: String,
}

impl PolicyRef {
    /// Create a policy reference.
    pub fn new(name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
        }
    }

    /// Build a reference from an ARN, taking the name from its last path segment.
    pub fn from_arn(arn: impl Into<String>) -> Self {
        let arn = arn.into();
        let name = arn.rsplit('/').next().unwrap_or(&arn).to_string();
        Self { name, arn }
    }

    /// Whether `ident` names this policy, either by name or by ARN.
    pub fn matches(&self, ident: &str) -> bool {
        self.name == ident || self.arn == ident
    }
}

/// Account-wide credential report state after `GenerateCredentialReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    /// Generation was just requested
    Started,
    /// Generation is running
    InProgress,
    /// A report is available
    Complete,
}

impl ReportState {
    /// Parse the `State` field of `GenerateCredentialReport`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(Self::Started),
            "INPROGRESS" => Some(Self::InProgress),
            "COMPLETE" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Per-user row of the credential report.
///
/// `None` means unknown: the report said `N/A` / `no_information`, or the
/// user was not in the report at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialActivity {
    /// Whether the user has a console password
    pub password_enabled: Option<bool>,
    /// Last console sign-in
    pub password_last_used: Option<DateTime<Utc>>,
    /// Last password change
    pub password_last_changed: Option<DateTime<Utc>>,
    /// Whether an MFA device is active
    pub mfa_active: Option<bool>,
    /// Last use of the first access key
    pub access_key_1_last_used: Option<DateTime<Utc>>,
    /// Last use of the second access key
    pub access_key_2_last_used: Option<DateTime<Utc>>,
}

impl CredentialActivity {
    /// Activity with every field unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether nothing is known about this user's activity.
    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

/// Point-in-time view of one IAM user.
///
/// Captured fresh for every reconciliation and never mutated afterwards;
/// [`UserSnapshot::with_activity`] returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// User name
    pub user_name: String,
    /// Stable IAM user id
    pub user_id: String,
    /// User ARN
    pub arn: String,
    /// When the user was created
    pub created_at: DateTime<Utc>,
    /// Whether a login profile (console password) exists
    pub console_access: bool,
    /// Whether at least one MFA device is assigned
    pub mfa_enabled: bool,
    /// Serial numbers of assigned MFA devices
    pub mfa_devices: Vec<String>,
    /// Group memberships
    pub groups: BTreeSet<String>,
    /// Attached managed policies
    pub attached_policies: BTreeSet<PolicyRef>,
    /// Names of inline policies embedded in the user
    pub inline_policies: BTreeSet<String>,
    /// Access keys in the order IAM lists them
    pub access_keys: Vec<AccessKey>,
    /// Last console sign-in
    pub password_last_used: Option<DateTime<Utc>>,
    /// Credential report row joined into this snapshot, if any
    pub activity: Option<CredentialActivity>,
}

impl UserSnapshot {
    /// Snapshot of a user with no groups, policies, keys or login profile.
    pub fn empty(record: UserRecord) -> Self {
        Self {
            user_name: record.user_name,
            user_id: record.user_id,
            arn: record.arn,
            created_at: record.created_at,
            console_access: false,
            mfa_enabled: false,
            mfa_devices: Vec::new(),
            groups: BTreeSet::new(),
            attached_policies: BTreeSet::new(),
            inline_policies: BTreeSet::new(),
            access_keys: Vec::new(),
            password_last_used: None,
            activity: None,
        }
    }

    /// Whether the user belongs to `group`.
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Find an attached policy by name or ARN.
    pub fn find_policy(&self, ident: &str) -> Option<&PolicyRef> {
        self.attached_policies.iter().find(|p| p.matches(ident))
    }

    /// Keys that are currently active.
    pub fn active_keys(&self) -> impl Iterator<Item = &AccessKey> {
        self.access_keys.iter().filter(|k| k.is_active())
    }

    /// Whether anything still blocks `DeleteUser`.
    pub fn has_dependents(&self) -> bool {
        self.console_access
            || !self.mfa_devices.is_empty()
            || !self.groups.is_empty()
            || !self.attached_policies.is_empty()
            || !self.inline_policies.is_empty()
            || !self.access_keys.is_empty()
    }

    /// Keys in credential report slot order: oldest first, undated last.
    pub fn keys_by_slot(&self) -> Vec<&AccessKey> {
        self.slot_order()
            .into_iter()
            .map(|i| &self.access_keys[i])
            .collect()
    }

    fn slot_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.access_keys.len()).collect();
        order.sort_by_key(|&i| {
            let created = self.access_keys[i].created_at;
            (created.is_none(), created)
        });
        order
    }

    /// Join a credential report row into this snapshot.
    ///
    /// The report is authoritative for password activity. Key last-used
    /// times from the report only fill gaps left by `GetAccessKeyLastUsed`,
    /// matched to keys by slot rather than by listing order.
    pub fn with_activity(mut self, activity: &CredentialActivity) -> Self {
        self.password_last_used = activity.password_last_used;

        let report_keys = [activity.access_key_1_last_used, activity.access_key_2_last_used];
        for (index, reported) in self.slot_order().into_iter().zip(report_keys) {
            let key = &mut self.access_keys[index];
            if key.last_used.is_none() {
                key.last_used = reported;
            }
        }

        self.activity = Some(activity.clone());
        self
    }
}

/// Polling configuration for the credential report.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second poll
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between polls
    pub max_delay: Duration,
    /// Hard limit on total waiting time
    pub timeout: Duration,
    /// Hard limit on the number of polls
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
            max_polls: 30,
        }
    }
}

impl PollConfig {
    /// Create a poll config with custom settings.
    pub fn new(base_delay: Duration, backoff_factor: f64, timeout: Duration) -> Self {
        Self {
            base_delay,
            backoff_factor,
            timeout,
            ..Default::default()
        }
    }

    /// Calculate the delay after a given poll (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}
