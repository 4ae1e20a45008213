//! Intended actions: the validated form of one edited record row.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Group and policy names: IAM's name alphabet, 1-128 characters.
static NAME_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[\w+=,.@-]{1,128}$").expect("NAME_REGEX is a valid regex pattern")
});

/// Managed policy ARN in any partition, AWS-managed or customer-managed.
static POLICY_ARN_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^arn:aws[\w-]*:iam::(\d{12}|aws):policy/([\w+=,.@-]+/)*[\w+=,.@-]{1,128}$")
        .expect("POLICY_ARN_REGEX is a valid regex pattern")
});

/// A row rejected before it reached IAM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The action column names no known action
    #[error("unrecognized action '{0}'")]
    UnknownAction(String),

    /// The user name column is blank
    #[error("user name is empty")]
    EmptyUserName,

    /// A group name IAM would reject
    #[error("invalid group name '{0}'")]
    InvalidGroupName(String),

    /// Neither a policy name nor a managed policy ARN
    #[error("invalid policy '{0}'")]
    InvalidPolicy(String),
}

/// The closed set of actions an operator can request for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Leave the user alone
    #[serde(rename = "noop")]
    NoOp,
    /// Add the user to the listed groups
    AddGroup,
    /// Remove the user from the listed groups
    RemoveGroup,
    /// Make the listed groups the user's exact membership
    ChangeGroups,
    /// Attach the listed managed policies
    AddPolicy,
    /// Detach the listed managed policies
    RemovePolicy,
    /// Deactivate every active access key
    Deactivate,
    /// Remove every dependent resource, then the user
    Delete,
}

impl ActionKind {
    /// Every kind, in the order they are documented.
    pub const ALL: [Self; 8] = [
        Self::NoOp,
        Self::AddGroup,
        Self::RemoveGroup,
        Self::ChangeGroups,
        Self::AddPolicy,
        Self::RemovePolicy,
        Self::Deactivate,
        Self::Delete,
    ];

    /// Canonical spelling used in records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::AddGroup => "add_group",
            Self::RemoveGroup => "remove_group",
            Self::ChangeGroups => "change_groups",
            Self::AddPolicy => "add_policy",
            Self::RemovePolicy => "remove_policy",
            Self::Deactivate => "deactivate",
            Self::Delete => "delete",
        }
    }

    /// Whether the kind reads `NewGroups`.
    pub fn uses_groups(&self) -> bool {
        matches!(self, Self::AddGroup | Self::RemoveGroup | Self::ChangeGroups)
    }

    /// Whether the kind reads `NewPolicies`.
    pub fn uses_policies(&self) -> bool {
        matches!(self, Self::AddPolicy | Self::RemovePolicy)
    }

    /// Whether the kind disables or removes credentials.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Deactivate | Self::Delete)
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "none" | "noop" | "no-op" => Ok(Self::NoOp),
            "add_group" => Ok(Self::AddGroup),
            "remove_group" => Ok(Self::RemoveGroup),
            "change_groups" => Ok(Self::ChangeGroups),
            "add_policy" => Ok(Self::AddPolicy),
            "remove_policy" => Ok(Self::RemovePolicy),
            "deactivate" => Ok(Self::Deactivate),
            "delete" => Ok(Self::Delete),
            _ => Err(ValidationError::UnknownAction(s.trim().to_string())),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the actions file, as edited by a human.
///
/// List columns accept a comma-joined string or a JSON array. Columns other
/// than these four are ignored, so an export can be edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionRow {
    /// Target user
    #[serde(default, deserialize_with = "text_field")]
    pub user_name: String,
    /// Requested action
    #[serde(default, deserialize_with = "text_field")]
    pub action: String,
    /// Comma-joined group names
    #[serde(default, deserialize_with = "list_field")]
    pub new_groups: String,
    /// Comma-joined policy names or ARNs
    #[serde(default, deserialize_with = "list_field")]
    pub new_policies: String,
}

impl ActionRow {
    /// A row with only the user and action filled in.
    pub fn new(user_name: &str, action: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            action: action.to_string(),
            ..Default::default()
        }
    }

    /// Set the group list.
    pub fn groups(mut self, groups: &str) -> Self {
        self.new_groups = groups.to_string();
        self
    }

    /// Set the policy list.
    pub fn policies(mut self, policies: &str) -> Self {
        self.new_policies = policies.to_string();
        self
    }

    /// Whether the action column is blank (the row was left untouched).
    pub fn is_blank(&self) -> bool {
        self.action.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListField {
    Text(String),
    Items(Vec<String>),
}

fn list_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<ListField>::deserialize(deserializer)? {
        None => String::new(),
        Some(ListField::Text(text)) => text,
        Some(ListField::Items(items)) => items.join(","),
    })
}

fn text_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A validated request to change one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntendedAction {
    /// Target user
    pub user_name: String,
    /// What to do
    pub kind: ActionKind,
    /// Group targets, deduplicated in first-seen order
    pub new_groups: Vec<String>,
    /// Policy targets (names or ARNs), deduplicated in first-seen order
    pub new_policies: Vec<String>,
}

impl IntendedAction {
    /// An action with no targets.
    pub fn new(user_name: &str, kind: ActionKind) -> Self {
        Self {
            user_name: user_name.to_string(),
            kind,
            new_groups: Vec::new(),
            new_policies: Vec::new(),
        }
    }

    /// Set group targets.
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.new_groups = dedupe(groups.iter().map(|g| (*g).to_string()));
        self
    }

    /// Set policy targets.
    pub fn with_policies(mut self, policies: &[&str]) -> Self {
        self.new_policies = dedupe(policies.iter().map(|p| (*p).to_string()));
        self
    }

    /// Validate a row.
    ///
    /// Every target is checked here, so a malformed row never gets as far as
    /// reading IAM state.
    pub fn parse(row: &ActionRow) -> Result<Self, ValidationError> {
        let user_name = row.user_name.trim();
        if user_name.is_empty() {
            return Err(ValidationError::EmptyUserName);
        }

        let kind: ActionKind = row.action.parse()?;

        let new_groups = split_list(&row.new_groups);
        if let Some(bad) = new_groups.iter().find(|g| !is_valid_name(g)) {
            return Err(ValidationError::InvalidGroupName(bad.clone()));
        }

        let new_policies = split_list(&row.new_policies);
        if let Some(bad) = new_policies.iter().find(|p| !is_valid_policy(p)) {
            return Err(ValidationError::InvalidPolicy(bad.clone()));
        }

        Ok(Self {
            user_name: user_name.to_string(),
            kind,
            new_groups,
            new_policies,
        })
    }
}

/// Split a comma-joined list: trim, drop empties, drop repeats.
pub fn split_list(value: &str) -> Vec<String> {
    dedupe(
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
    )
}

fn dedupe(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

fn is_valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

fn is_valid_policy(policy: &str) -> bool {
    if policy.starts_with("arn:") {
        POLICY_ARN_REGEX.is_match(policy)
    } else {
        is_valid_name(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_is_lenient() {
        assert_eq!(" Change_Groups ".parse::<ActionKind>(), Ok(ActionKind::ChangeGroups));
        assert_eq!("DELETE".parse::<ActionKind>(), Ok(ActionKind::Delete));
        for noop in ["", "none", "NoOp", "no-op"] {
            assert_eq!(noop.parse::<ActionKind>(), Ok(ActionKind::NoOp));
        }
    }

    #[test]
    fn test_kind_round_trips_through_as_str() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            "rename".parse::<ActionKind>(),
            Err(ValidationError::UnknownAction("rename".to_string()))
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" Admins, ,Developers,Admins,, Ops "),
            vec!["Admins", "Developers", "Ops"]
        );
        assert!(split_list("").is_empty());
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_parse_row() {
        let row = ActionRow::new(" alice ", "change_groups").groups("Developers, Ops");

        let action = IntendedAction::parse(&row).unwrap();

        assert_eq!(action.user_name, "alice");
        assert_eq!(action.kind, ActionKind::ChangeGroups);
        assert_eq!(action.new_groups, vec!["Developers", "Ops"]);
        assert!(action.new_policies.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_rows() {
        assert_eq!(
            IntendedAction::parse(&ActionRow::new("  ", "delete")),
            Err(ValidationError::EmptyUserName)
        );
        assert_eq!(
            IntendedAction::parse(&ActionRow::new("bob", "rename")),
            Err(ValidationError::UnknownAction("rename".to_string()))
        );
        assert_eq!(
            IntendedAction::parse(&ActionRow::new("bob", "add_group").groups("Dev Ops")),
            Err(ValidationError::InvalidGroupName("Dev Ops".to_string()))
        );
        assert_eq!(
            IntendedAction::parse(&ActionRow::new("bob", "add_policy").policies("arn:aws:s3:::bucket")),
            Err(ValidationError::InvalidPolicy("arn:aws:s3:::bucket".to_string()))
        );
    }

    #[test]
    fn test_policy_forms() {
        assert!(is_valid_policy("PowerUserAccess"));
        assert!(is_valid_policy("arn:aws:iam::aws:policy/ReadOnlyAccess"));
        assert!(is_valid_policy("arn:aws:iam::aws:policy/job-function/ViewOnlyAccess"));
        assert!(is_valid_policy("arn:aws-us-gov:iam::123456789012:policy/team/deploy"));
        assert!(!is_valid_policy("arn:aws:iam::123:policy/short-account"));
        assert!(!is_valid_policy("arn:aws:iam::aws:role/Admin"));
        assert!(!is_valid_policy(&"x".repeat(129)));
    }

    #[test]
    fn test_row_from_json_accepts_arrays_and_extra_columns() {
        let json = r#"{
            "UserName": "bob",
            "Action": "add_policy",
            "NewGroups": null,
            "NewPolicies": ["PowerUserAccess", "ReadOnlyAccess"],
            "ConsoleAccess": true
        }"#;

        let row: ActionRow = serde_json::from_str(json).unwrap();

        assert_eq!(row.new_groups, "");
        assert_eq!(row.new_policies, "PowerUserAccess,ReadOnlyAccess");
        assert!(!row.is_blank());
    }

    #[test]
    fn test_blank_row() {
        let row: ActionRow = serde_json::from_str(r#"{"UserName": "carol", "Action": null}"#).unwrap();
        assert!(row.is_blank());
    }
}
