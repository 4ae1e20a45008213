//! Record files exchanged with operators.
//!
//! Records are flat rows with PascalCase keys so they map one-to-one onto
//! spreadsheet columns. Files ending in `.csv` are read and written as CSV;
//! anything else is a JSON array. An export doubles as the actions template:
//! fill in `Action`, `NewGroups` and `NewPolicies` and feed it back to `plan`
//! or `apply`.

use anyhow::{Context, Result, bail};
use iamkit::UserSnapshot;
use reconcile::{ActionRow, ReconcileResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::ui::format_time;

/// File format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Csv,
}

impl Format {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

/// A record that can also be written as one flat CSV row.
pub trait Tabular: Serialize {
    /// One cell per column.
    type Row<'a>: Serialize
    where
        Self: 'a;

    fn row(&self) -> Self::Row<'_>;
}

/// One user in an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportRecord {
    pub user_name: String,
    pub user_id: String,
    pub arn: String,
    pub create_date: String,
    pub console_access: bool,
    #[serde(rename = "MFAEnabled")]
    pub mfa_enabled: bool,
    pub groups: String,
    pub attached_policies: String,
    pub inline_policies: String,
    pub access_keys: String,
    pub active_keys: usize,
    /// From the credential report; `None` when the report lacks the user
    pub password_enabled: Option<bool>,
    pub password_last_used: String,
    pub password_last_changed: String,
    pub last_console_login: String,
    #[serde(rename = "AccessKey1LastUsed")]
    pub access_key_1_last_used: String,
    #[serde(rename = "AccessKey2LastUsed")]
    pub access_key_2_last_used: String,
    pub action: String,
    pub new_groups: String,
    pub new_policies: String,
}

impl From<&UserSnapshot> for ExportRecord {
    fn from(snapshot: &UserSnapshot) -> Self {
        let keys = snapshot.keys_by_slot();
        let key_last_used =
            |slot: usize| format_time(keys.get(slot).and_then(|key| key.last_used));
        let activity = snapshot.activity.as_ref();

        Self {
            user_name: snapshot.user_name.clone(),
            user_id: snapshot.user_id.clone(),
            arn: snapshot.arn.clone(),
            create_date: format_time(Some(snapshot.created_at)),
            console_access: snapshot.console_access,
            mfa_enabled: snapshot.mfa_enabled,
            groups: join(snapshot.groups.iter().map(String::as_str)),
            attached_policies: join(snapshot.attached_policies.iter().map(|p| p.name.as_str())),
            inline_policies: join(snapshot.inline_policies.iter().map(String::as_str)),
            access_keys: join(snapshot.access_keys.iter().map(|k| k.key_id.as_str())),
            active_keys: snapshot.active_keys().count(),
            password_enabled: activity.and_then(|a| a.password_enabled),
            password_last_used: format_time(snapshot.password_last_used),
            password_last_changed: format_time(activity.and_then(|a| a.password_last_changed)),
            last_console_login: format_time(snapshot.password_last_used),
            access_key_1_last_used: key_last_used(0),
            access_key_2_last_used: key_last_used(1),
            action: String::new(),
            new_groups: String::new(),
            new_policies: String::new(),
        }
    }
}

impl Tabular for ExportRecord {
    type Row<'a> = &'a Self;

    fn row(&self) -> Self::Row<'_> {
        self
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(",")
}

/// One reconciled user in a results file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultRecord {
    pub user_name: String,
    pub action: String,
    pub succeeded: bool,
    pub applied_operations: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl From<&ReconcileResult> for ResultRecord {
    fn from(result: &ReconcileResult) -> Self {
        Self {
            user_name: result.user_name.clone(),
            action: result.action.clone(),
            succeeded: result.succeeded,
            applied_operations: result.applied_operations.clone(),
            warnings: result.warnings.clone(),
            error: result.error.as_ref().map(ToString::to_string),
        }
    }
}

/// [`ResultRecord`] with list columns joined into single cells.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultRow<'a> {
    user_name: &'a str,
    action: &'a str,
    succeeded: bool,
    applied_operations: String,
    warnings: String,
    error: Option<&'a str>,
}

impl Tabular for ResultRecord {
    type Row<'a> = ResultRow<'a>;

    fn row(&self) -> Self::Row<'_> {
        ResultRow {
            user_name: &self.user_name,
            action: &self.action,
            succeeded: self.succeeded,
            applied_operations: self.applied_operations.join("; "),
            warnings: self.warnings.join("; "),
            error: self.error.as_deref(),
        }
    }
}

/// Read an actions file (JSON array, or CSV by extension).
pub fn read_action_rows(path: &Path) -> Result<Vec<ActionRow>> {
    match Format::of(path) {
        Format::Json => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("{} is not a JSON array of action records", path.display()))
        }
        Format::Csv => read_action_csv(path),
    }
}

/// Columns are looked up by header, so an edited export with every column
/// still present reads as-is.
fn read_action_csv(path: &Path) -> Result<Vec<ActionRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Could not read {}", path.display()))?;

    let columns: HashMap<String, usize> = reader
        .headers()
        .with_context(|| format!("Could not read CSV headers from {}", path.display()))?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();
    if !columns.contains_key("UserName") {
        bail!("{} has no UserName column", path.display());
    }

    reader
        .records()
        .enumerate()
        .map(|(row, record)| {
            let record =
                record.with_context(|| format!("{}: bad CSV row {}", path.display(), row + 2))?;
            let field = |name: &str| {
                columns
                    .get(name)
                    .and_then(|&i| record.get(i))
                    .unwrap_or_default()
            };
            Ok(ActionRow::new(field("UserName"), field("Action"))
                .groups(field("NewGroups"))
                .policies(field("NewPolicies")))
        })
        .collect()
}

/// Write records to a file, or as JSON to stdout when `path` is `None`.
pub fn write_records<T: Tabular>(records: &[T], path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        let json = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
        let mut stdout = io::stdout().lock();
        return writeln!(stdout, "{json}").context("Failed to write to stdout");
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }

    match Format::of(path) {
        Format::Json => {
            let json =
                serde_json::to_string_pretty(records).context("Failed to serialize records")?;
            fs::write(path, json + "\n")
                .with_context(|| format!("Could not write {}", path.display()))
        }
        Format::Csv => {
            let mut writer = csv::Writer::from_path(path)
                .with_context(|| format!("Could not write {}", path.display()))?;
            for record in records {
                writer
                    .serialize(record.row())
                    .with_context(|| format!("Could not write {}", path.display()))?;
            }
            writer
                .flush()
                .with_context(|| format!("Could not write {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamkit::backend::memory::{MemoryBackend, MemoryUser};
    use iamkit::snapshot::read_snapshot;
    use chrono::{TimeZone, Utc};
    use iamkit::{CredentialActivity, KeyStatus};
    use reconcile::{ErrorDetail, ErrorKind};
    use tempfile::TempDir;

    #[test]
    fn test_export_record_from_snapshot() {
        let backend = MemoryBackend::new().with_user(
            MemoryUser::new("alice")
                .group("Developers")
                .group("Admins")
                .policy("ReadOnlyAccess")
                .access_key("AKIAALICE1", KeyStatus::Active)
                .access_key("AKIAALICE2", KeyStatus::Inactive)
                .login_profile(),
        );
        let snapshot = read_snapshot(&backend, "alice")
            .unwrap()
            .with_activity(&CredentialActivity::unknown());

        let record = ExportRecord::from(&snapshot);

        assert_eq!(record.user_name, "alice");
        assert_eq!(record.create_date, "1970-01-01T00:00:00Z");
        assert!(record.console_access);
        assert!(!record.mfa_enabled);
        assert_eq!(record.groups, "Admins,Developers");
        assert_eq!(record.attached_policies, "ReadOnlyAccess");
        assert_eq!(record.access_keys, "AKIAALICE1,AKIAALICE2");
        assert_eq!(record.active_keys, 1);
        assert_eq!(record.password_last_used, "N/A");
        assert_eq!(record.access_key_1_last_used, "N/A");
        assert!(record.action.is_empty());
    }

    #[test]
    fn test_export_record_carries_identity_and_password_activity() {
        let used = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let changed = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        let snapshot = UserSnapshot::empty(MemoryUser::new("alice").record).with_activity(
            &CredentialActivity {
                password_enabled: Some(true),
                password_last_used: Some(used),
                password_last_changed: Some(changed),
                ..CredentialActivity::unknown()
            },
        );

        let record = ExportRecord::from(&snapshot);

        assert_eq!(record.user_id, "AIDAALICE");
        assert_eq!(record.arn, "arn:aws:iam::123456789012:user/alice");
        assert_eq!(record.password_enabled, Some(true));
        assert_eq!(record.password_last_used, "2024-06-01T10:00:00Z");
        assert_eq!(record.last_console_login, "2024-06-01T10:00:00Z");
        assert_eq!(record.password_last_changed, "2024-01-15T09:30:00Z");

        let without_report = ExportRecord::from(&UserSnapshot::empty(MemoryUser::new("bob").record));
        assert_eq!(without_report.password_enabled, None);
        assert_eq!(without_report.password_last_changed, "N/A");
    }

    #[test]
    fn test_export_uses_spreadsheet_column_names() {
        let snapshot = UserSnapshot::empty(MemoryUser::new("bob").record);
        let value = serde_json::to_value(ExportRecord::from(&snapshot)).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "UserName",
            "UserId",
            "Arn",
            "CreateDate",
            "ConsoleAccess",
            "MFAEnabled",
            "Groups",
            "AttachedPolicies",
            "InlinePolicies",
            "AccessKeys",
            "ActiveKeys",
            "PasswordEnabled",
            "PasswordLastUsed",
            "PasswordLastChanged",
            "LastConsoleLogin",
            "AccessKey1LastUsed",
            "AccessKey2LastUsed",
            "Action",
            "NewGroups",
            "NewPolicies",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object.len(), 20);
    }

    #[test]
    fn test_edited_export_reads_as_actions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("users.json");
        let snapshot = UserSnapshot::empty(MemoryUser::new("bob").record);
        let mut record = ExportRecord::from(&snapshot);
        record.action = "add_policy".to_string();
        record.new_policies = "PowerUserAccess".to_string();
        write_records(&[record], Some(&path)).unwrap();

        let rows = read_action_rows(&path).unwrap();

        assert_eq!(
            rows,
            vec![ActionRow::new("bob", "add_policy").policies("PowerUserAccess")]
        );
    }

    #[test]
    fn test_csv_export_edit_apply_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("users.csv");
        let alice = UserSnapshot::empty(MemoryUser::new("alice").group("Admins").record);
        let bob = UserSnapshot::empty(MemoryUser::new("bob").record);
        let records = vec![ExportRecord::from(&alice), ExportRecord::from(&bob)];
        write_records(&records, Some(&path)).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("UserName,UserId,Arn,CreateDate,"));

        // Edit the sheet the way an operator would: fill in the action cells.
        let edited = written.replace(
            "user/bob,1970-01-01T00:00:00Z,false,false,,,,,0,,N/A,N/A,N/A,N/A,N/A,,,",
            "user/bob,1970-01-01T00:00:00Z,false,false,,,,,0,,N/A,N/A,N/A,N/A,N/A,change_groups,\"Developers, Ops\",",
        );
        assert_ne!(edited, written);
        fs::write(&path, edited).unwrap();

        let rows = read_action_rows(&path).unwrap();

        assert_eq!(
            rows,
            vec![
                ActionRow::new("alice", ""),
                ActionRow::new("bob", "change_groups").groups("Developers, Ops"),
            ]
        );
    }

    #[test]
    fn test_read_minimal_actions_csv() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("actions.CSV");
        fs::write(
            &path,
            "UserName,Action,NewPolicies\n alice , add_policy ,ReadOnlyAccess\nbob,delete,\n",
        )
        .unwrap();

        let rows = read_action_rows(&path).unwrap();

        assert_eq!(
            rows,
            vec![
                ActionRow::new("alice", "add_policy").policies("ReadOnlyAccess"),
                ActionRow::new("bob", "delete"),
            ]
        );
    }

    #[test]
    fn test_actions_csv_needs_user_column() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("actions.csv");
        fs::write(&path, "Name,Action\nalice,delete\n").unwrap();

        let err = read_action_rows(&path).unwrap_err();
        assert!(err.to_string().contains("no UserName column"));
    }

    #[test]
    fn test_results_csv_joins_lists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("results.csv");
        let mut result = ReconcileResult::success("alice", "change_groups");
        result.applied_operations.push("removed from Admins".to_string());
        result.applied_operations.push("added to Developers".to_string());

        write_records(&[ResultRecord::from(&result)], Some(&path)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["UserName", "Action", "Succeeded", "AppliedOperations", "Warnings", "Error"]
        );
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "true");
        assert_eq!(&row[3], "removed from Admins; added to Developers");
        assert_eq!(&row[5], "");
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(Format::of(Path::new("users.csv")), Format::Csv);
        assert_eq!(Format::of(Path::new("USERS.CSV")), Format::Csv);
        assert_eq!(Format::of(Path::new("users.json")), Format::Json);
        assert_eq!(Format::of(Path::new("users")), Format::Json);
    }

    #[test]
    fn test_read_invalid_actions_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("actions.json");
        fs::write(&path, r#"{"UserName": "alice"}"#).unwrap();

        let err = read_action_rows(&path).unwrap_err();
        assert!(err.to_string().contains("not a JSON array"));
    }

    #[test]
    fn test_result_record() {
        let mut result = ReconcileResult::success("alice", "change_groups");
        result.applied_operations.push("removed from Admins".to_string());
        result.fail(ErrorDetail::new(
            ErrorKind::ApiCall,
            "AddUserToGroup failed: denied",
        ));

        let record = ResultRecord::from(&result);

        assert!(!record.succeeded);
        assert_eq!(record.applied_operations, vec!["removed from Admins"]);
        assert_eq!(
            record.error.as_deref(),
            Some("ApiCall: AddUserToGroup failed: denied")
        );
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("results.json");
        let records: Vec<ResultRecord> = Vec::new();

        write_records(&records, Some(&path)).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
    }
}
