//! Action Interpreter: turns an [`IntendedAction`] and a fresh
//! [`UserSnapshot`] into the minimal ordered [`MutationPlan`].

use crate::action::{ActionKind, IntendedAction};
use iamkit::{PolicyRef, UserSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Prefix for bare AWS managed policy names.
pub const AWS_MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";

/// One primitive IAM mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// `RemoveUserFromGroup`
    RemoveFromGroup { group: String },
    /// `AddUserToGroup`
    AddToGroup { group: String },
    /// `DetachUserPolicy`
    DetachPolicy { policy: PolicyRef },
    /// `AttachUserPolicy`
    AttachPolicy { policy: PolicyRef },
    /// `DeleteUserPolicy`
    DeleteInlinePolicy { name: String },
    /// `UpdateAccessKey` to `Inactive`
    DeactivateKey { key_id: String },
    /// `DeleteAccessKey`
    DeleteKey { key_id: String },
    /// `DeactivateMFADevice`
    DeactivateMfaDevice { serial: String },
    /// `DeleteLoginProfile`
    DeleteLoginProfile,
    /// `DeleteUser`
    DeleteUser { user_name: String },
}

impl Operation {
    /// Imperative form, used for dry runs and plan listings.
    pub fn intent(&self) -> String {
        match self {
            Self::RemoveFromGroup { group } => format!("remove from {group}"),
            Self::AddToGroup { group } => format!("add to {group}"),
            Self::DetachPolicy { policy } => format!("detach {}", policy.name),
            Self::AttachPolicy { policy } => format!("attach {}", policy.name),
            Self::DeleteInlinePolicy { name } => format!("delete inline policy {name}"),
            Self::DeactivateKey { key_id } => format!("deactivate key {key_id}"),
            Self::DeleteKey { key_id } => format!("delete key {key_id}"),
            Self::DeactivateMfaDevice { serial } => format!("deactivate MFA device {serial}"),
            Self::DeleteLoginProfile => "delete login profile".to_string(),
            Self::DeleteUser { user_name } => format!("delete user {user_name}"),
        }
    }

    /// Whether the operation takes something away from the user.
    pub fn is_removal(&self) -> bool {
        !matches!(self, Self::AddToGroup { .. } | Self::AttachPolicy { .. })
    }
}

/// Past-tense log line recorded once the call succeeded.
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveFromGroup { group } => write!(f, "removed from {group}"),
            Self::AddToGroup { group } => write!(f, "added to {group}"),
            Self::DetachPolicy { policy } => write!(f, "detached {}", policy.name),
            Self::AttachPolicy { policy } => write!(f, "attached {}", policy.name),
            Self::DeleteInlinePolicy { name } => write!(f, "deleted inline policy {name}"),
            Self::DeactivateKey { key_id } => write!(f, "deactivated key {key_id}"),
            Self::DeleteKey { key_id } => write!(f, "deleted key {key_id}"),
            Self::DeactivateMfaDevice { serial } => write!(f, "deactivated MFA device {serial}"),
            Self::DeleteLoginProfile => f.write_str("deleted login profile"),
            Self::DeleteUser { user_name } => write!(f, "deleted user {user_name}"),
        }
    }
}

/// Ordered operations for one user. Removals come before additions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPlan {
    /// Target user
    pub user_name: String,
    /// Requested action
    pub kind: ActionKind,
    /// Operations in execution order
    pub operations: Vec<Operation>,
    /// Non-fatal notes about the request
    pub warnings: Vec<String>,
}

impl MutationPlan {
    /// A plan with nothing to do.
    pub fn new(user_name: &str, kind: ActionKind) -> Self {
        Self {
            user_name: user_name.to_string(),
            kind,
            operations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Whether the user already matches the request.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}: {}", self.user_name, message);
        self.warnings.push(message);
    }
}

/// Options for interpreting actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Prefix turning a bare policy name into an ARN
    pub arn_prefix: String,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            arn_prefix: AWS_MANAGED_POLICY_PREFIX.to_string(),
        }
    }
}

impl PlanOptions {
    /// Resolve a policy target to a reference.
    pub fn resolve_policy(&self, target: &str) -> PolicyRef {
        if target.starts_with("arn:") {
            PolicyRef::from_arn(target)
        } else {
            PolicyRef::new(target, format!("{}{}", self.arn_prefix, target))
        }
    }
}

/// Compute the plan that brings `snapshot` to the state `action` asks for.
///
/// Operations already satisfied by the snapshot are left out, so
/// interpreting the same action against the post-apply state yields an
/// empty plan.
pub fn interpret(
    action: &IntendedAction,
    snapshot: &UserSnapshot,
    options: &PlanOptions,
) -> MutationPlan {
    let mut plan = MutationPlan::new(&action.user_name, action.kind);
    note_unused_lists(action, &mut plan);

    match action.kind {
        ActionKind::NoOp => {}
        ActionKind::AddGroup => {
            if require_targets(&action.new_groups, "NewGroups", &mut plan) {
                for group in &action.new_groups {
                    if !snapshot.has_group(group) {
                        plan.push(Operation::AddToGroup {
                            group: group.clone(),
                        });
                    }
                }
            }
        }
        ActionKind::RemoveGroup => {
            if require_targets(&action.new_groups, "NewGroups", &mut plan) {
                for group in &action.new_groups {
                    if snapshot.has_group(group) {
                        plan.push(Operation::RemoveFromGroup {
                            group: group.clone(),
                        });
                    }
                }
            }
        }
        ActionKind::ChangeGroups => {
            if require_targets(&action.new_groups, "NewGroups", &mut plan) {
                plan_change_groups(&action.new_groups, snapshot, &mut plan);
            }
        }
        ActionKind::AddPolicy => {
            if require_targets(&action.new_policies, "NewPolicies", &mut plan) {
                plan_add_policies(&action.new_policies, snapshot, options, &mut plan);
            }
        }
        ActionKind::RemovePolicy => {
            if require_targets(&action.new_policies, "NewPolicies", &mut plan) {
                plan_remove_policies(&action.new_policies, snapshot, &mut plan);
            }
        }
        ActionKind::Deactivate => {
            for key in snapshot.active_keys() {
                plan.push(Operation::DeactivateKey {
                    key_id: key.key_id.clone(),
                });
            }
        }
        ActionKind::Delete => plan_delete(snapshot, &mut plan),
    }

    log::debug!(
        "Planned {} for {}: {} operations",
        plan.kind,
        plan.user_name,
        plan.len()
    );
    plan
}

fn note_unused_lists(action: &IntendedAction, plan: &mut MutationPlan) {
    if !action.kind.uses_groups() && !action.new_groups.is_empty() {
        plan.warn(format!("NewGroups ignored for {}", action.kind));
    }
    if !action.kind.uses_policies() && !action.new_policies.is_empty() {
        plan.warn(format!("NewPolicies ignored for {}", action.kind));
    }
}

fn require_targets(targets: &[String], column: &str, plan: &mut MutationPlan) -> bool {
    if targets.is_empty() {
        plan.warn(format!("{} has no {}; nothing to do", plan.kind, column));
        return false;
    }
    true
}

/// Removals first so the user never holds the union of old and new groups.
fn plan_change_groups(targets: &[String], snapshot: &UserSnapshot, plan: &mut MutationPlan) {
    let wanted: BTreeSet<&str> = targets.iter().map(String::as_str).collect();

    for group in &snapshot.groups {
        if !wanted.contains(group.as_str()) {
            plan.push(Operation::RemoveFromGroup {
                group: group.clone(),
            });
        }
    }
    for group in targets {
        if !snapshot.has_group(group) {
            plan.push(Operation::AddToGroup {
                group: group.clone(),
            });
        }
    }
}

fn plan_add_policies(
    targets: &[String],
    snapshot: &UserSnapshot,
    options: &PlanOptions,
    plan: &mut MutationPlan,
) {
    let mut planned = BTreeSet::new();
    for target in targets {
        // Compare by ARN only: a customer policy can share a managed policy's name.
        let policy = options.resolve_policy(target);
        if snapshot.attached_policies.iter().any(|p| p.arn == policy.arn) {
            continue;
        }
        if planned.insert(policy.arn.clone()) {
            plan.push(Operation::AttachPolicy { policy });
        }
    }
}

fn plan_remove_policies(targets: &[String], snapshot: &UserSnapshot, plan: &mut MutationPlan) {
    let mut planned = BTreeSet::new();
    for target in targets {
        match snapshot.find_policy(target) {
            Some(attached) => {
                if planned.insert(attached.arn.clone()) {
                    plan.push(Operation::DetachPolicy {
                        policy: attached.clone(),
                    });
                }
            }
            None => log::debug!("{} is not attached to {}", target, snapshot.user_name),
        }
    }
}

/// IAM refuses `DeleteUser` while anything still hangs off the user, so
/// every dependent goes first and `DeleteUser` is always the last operation.
fn plan_delete(snapshot: &UserSnapshot, plan: &mut MutationPlan) {
    for policy in &snapshot.attached_policies {
        plan.push(Operation::DetachPolicy {
            policy: policy.clone(),
        });
    }
    for name in &snapshot.inline_policies {
        plan.push(Operation::DeleteInlinePolicy { name: name.clone() });
    }
    for group in &snapshot.groups {
        plan.push(Operation::RemoveFromGroup {
            group: group.clone(),
        });
    }
    for key in &snapshot.access_keys {
        plan.push(Operation::DeleteKey {
            key_id: key.key_id.clone(),
        });
    }
    for serial in &snapshot.mfa_devices {
        plan.push(Operation::DeactivateMfaDevice {
            serial: serial.clone(),
        });
    }
    if snapshot.console_access {
        plan.push(Operation::DeleteLoginProfile);
    }
    plan.push(Operation::DeleteUser {
        user_name: snapshot.user_name.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamkit::backend::memory::MemoryUser;
    use iamkit::{AccessKey, KeyStatus};

    fn snapshot(user_name: &str) -> UserSnapshot {
        UserSnapshot::empty(MemoryUser::new(user_name).record)
    }

    fn managed(name: &str) -> PolicyRef {
        PolicyRef::new(name, format!("{AWS_MANAGED_POLICY_PREFIX}{name}"))
    }

    fn lines(plan: &MutationPlan) -> Vec<String> {
        plan.operations.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_change_groups_removes_before_adding() {
        let mut alice = snapshot("alice");
        alice.groups.insert("Admins".to_string());
        let action =
            IntendedAction::new("alice", ActionKind::ChangeGroups).with_groups(&["Developers"]);

        let plan = interpret(&action, &alice, &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["removed from Admins", "added to Developers"]);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_change_groups_keeps_overlap() {
        let mut user = snapshot("dana");
        user.groups.extend(["Admins".to_string(), "Ops".to_string()]);
        let action =
            IntendedAction::new("dana", ActionKind::ChangeGroups).with_groups(&["Ops", "QA"]);

        let plan = interpret(&action, &user, &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["removed from Admins", "added to QA"]);
    }

    #[test]
    fn test_add_and_remove_group_skip_satisfied_targets() {
        let mut user = snapshot("erin");
        user.groups.insert("Ops".to_string());

        let add = IntendedAction::new("erin", ActionKind::AddGroup).with_groups(&["Ops", "QA"]);
        assert_eq!(
            lines(&interpret(&add, &user, &PlanOptions::default())),
            vec!["added to QA"]
        );

        let remove =
            IntendedAction::new("erin", ActionKind::RemoveGroup).with_groups(&["Ops", "QA"]);
        assert_eq!(
            lines(&interpret(&remove, &user, &PlanOptions::default())),
            vec!["removed from Ops"]
        );
    }

    #[test]
    fn test_add_policy_leaves_existing_untouched() {
        let mut bob = snapshot("bob");
        bob.attached_policies.insert(managed("ReadOnlyAccess"));
        let action =
            IntendedAction::new("bob", ActionKind::AddPolicy).with_policies(&["PowerUserAccess"]);

        let plan = interpret(&action, &bob, &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["attached PowerUserAccess"]);
        assert_eq!(
            plan.operations[0],
            Operation::AttachPolicy {
                policy: managed("PowerUserAccess")
            }
        );
    }

    #[test]
    fn test_add_policy_matches_by_arn_and_dedupes() {
        let mut bob = snapshot("bob");
        bob.attached_policies.insert(managed("ReadOnlyAccess"));
        let action = IntendedAction::new("bob", ActionKind::AddPolicy).with_policies(&[
            "arn:aws:iam::aws:policy/ReadOnlyAccess",
            "Billing",
            "arn:aws:iam::aws:policy/Billing",
        ]);

        let plan = interpret(&action, &bob, &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["attached Billing"]);
    }

    #[test]
    fn test_add_policy_ignores_same_named_customer_policy() {
        let mut bob = snapshot("bob");
        bob.attached_policies.insert(PolicyRef::from_arn(
            "arn:aws:iam::123456789012:policy/ReadOnlyAccess",
        ));
        let action =
            IntendedAction::new("bob", ActionKind::AddPolicy).with_policies(&["ReadOnlyAccess"]);

        let plan = interpret(&action, &bob, &PlanOptions::default());

        assert_eq!(
            plan.operations,
            vec![Operation::AttachPolicy {
                policy: managed("ReadOnlyAccess")
            }]
        );
    }

    #[test]
    fn test_custom_arn_prefix() {
        let options = PlanOptions {
            arn_prefix: "arn:aws:iam::123456789012:policy/".to_string(),
        };
        let action =
            IntendedAction::new("bob", ActionKind::AddPolicy).with_policies(&["deploy"]);

        let plan = interpret(&action, &snapshot("bob"), &options);

        assert_eq!(
            plan.operations,
            vec![Operation::AttachPolicy {
                policy: PolicyRef::new("deploy", "arn:aws:iam::123456789012:policy/deploy")
            }]
        );
    }

    #[test]
    fn test_remove_policy_uses_attached_arn() {
        let mut bob = snapshot("bob");
        let custom = PolicyRef::from_arn("arn:aws:iam::123456789012:policy/team/deploy");
        bob.attached_policies.insert(custom.clone());
        let action = IntendedAction::new("bob", ActionKind::RemovePolicy)
            .with_policies(&["deploy", "NotAttached"]);

        let plan = interpret(&action, &bob, &PlanOptions::default());

        assert_eq!(plan.operations, vec![Operation::DetachPolicy { policy: custom }]);
    }

    #[test]
    fn test_deactivate_skips_inactive_keys() {
        let mut user = snapshot("frank");
        user.access_keys = vec![
            AccessKey::new("AKIA1", KeyStatus::Active),
            AccessKey::new("AKIA2", KeyStatus::Inactive),
        ];
        let action = IntendedAction::new("frank", ActionKind::Deactivate);

        let plan = interpret(&action, &user, &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["deactivated key AKIA1"]);
    }

    #[test]
    fn test_delete_orders_dependents_before_user() {
        let mut user = snapshot("gina");
        user.attached_policies.insert(managed("ReadOnlyAccess"));
        user.inline_policies.insert("scratch".to_string());
        user.groups.insert("Ops".to_string());
        user.access_keys = vec![
            AccessKey::new("AKIA1", KeyStatus::Active),
            AccessKey::new("AKIA2", KeyStatus::Inactive),
        ];
        user.mfa_devices = vec!["arn:aws:iam::123456789012:mfa/gina".to_string()];
        user.console_access = true;

        let plan = interpret(
            &IntendedAction::new("gina", ActionKind::Delete),
            &user,
            &PlanOptions::default(),
        );

        assert_eq!(
            lines(&plan),
            vec![
                "detached ReadOnlyAccess",
                "deleted inline policy scratch",
                "removed from Ops",
                "deleted key AKIA1",
                "deleted key AKIA2",
                "deactivated MFA device arn:aws:iam::123456789012:mfa/gina",
                "deleted login profile",
                "deleted user gina",
            ]
        );
    }

    #[test]
    fn test_delete_without_dependents_is_just_delete_user() {
        let plan = interpret(
            &IntendedAction::new("hank", ActionKind::Delete),
            &snapshot("hank"),
            &PlanOptions::default(),
        );

        assert_eq!(
            plan.operations,
            vec![Operation::DeleteUser {
                user_name: "hank".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_targets_warn_instead_of_failing() {
        let mut user = snapshot("ivy");
        user.groups.insert("Ops".to_string());

        let plan = interpret(
            &IntendedAction::new("ivy", ActionKind::ChangeGroups),
            &user,
            &PlanOptions::default(),
        );

        assert!(plan.is_empty());
        assert_eq!(plan.warnings, vec!["change_groups has no NewGroups; nothing to do"]);
    }

    #[test]
    fn test_unused_list_is_ignored_with_warning() {
        let action = IntendedAction::new("jo", ActionKind::AddGroup)
            .with_groups(&["Ops"])
            .with_policies(&["ReadOnlyAccess"]);

        let plan = interpret(&action, &snapshot("jo"), &PlanOptions::default());

        assert_eq!(lines(&plan), vec!["added to Ops"]);
        assert_eq!(plan.warnings, vec!["NewPolicies ignored for add_group"]);
    }

    #[test]
    fn test_noop_plans_nothing() {
        let plan = interpret(
            &IntendedAction::new("kim", ActionKind::NoOp),
            &snapshot("kim"),
            &PlanOptions::default(),
        );
        assert!(plan.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_intent_lines() {
        assert_eq!(
            Operation::RemoveFromGroup {
                group: "Admins".to_string()
            }
            .intent(),
            "remove from Admins"
        );
        assert_eq!(Operation::DeleteLoginProfile.intent(), "delete login profile");
        assert!(!Operation::AddToGroup { group: "x".to_string() }.is_removal());
        assert!(Operation::DeleteLoginProfile.is_removal());
    }
}
