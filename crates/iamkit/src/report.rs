//! Credential Activity Aggregator.
//!
//! IAM builds the credential report asynchronously: `GenerateCredentialReport`
//! starts generation and `GetCredentialReport` answers "not ready" until it
//! is done. [`fetch_activity_report`] drives that protocol with bounded
//! polling and parses the CSV into per-user [`CredentialActivity`].

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::poll::{PollCallback, poll_until_ready};
use crate::types::{CredentialActivity, PollConfig, ReportState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Row name IAM uses for the account root.
const ROOT_ACCOUNT: &str = "<root_account>";

/// Parsed credential report, keyed by user name.
#[derive(Debug, Clone, Default)]
pub struct ActivityReport {
    entries: HashMap<String, CredentialActivity>,
}

impl ActivityReport {
    /// Parse the CSV body of a credential report.
    ///
    /// Columns are located by header name, so reordered or extra columns
    /// are tolerated. The root account row is skipped.
    pub fn parse_csv(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(Error::Parse("credential report is empty".to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let columns: HashMap<String, usize> = reader
            .headers()
            .map_err(|e| Error::Parse(format!("credential report header: {e}")))?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        let user_col = *columns
            .get("user")
            .ok_or_else(|| Error::Parse("credential report has no 'user' column".to_string()))?;

        let mut entries = HashMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| Error::Parse(format!("credential report row {}: {e}", row + 2)))?;
            let field = |name: &str| columns.get(name).and_then(|&i| record.get(i));

            let user = record.get(user_col).unwrap_or_default();
            if user.is_empty() {
                return Err(Error::Parse(format!(
                    "credential report row {} has no user",
                    row + 2
                )));
            }
            if user == ROOT_ACCOUNT {
                continue;
            }

            let activity = CredentialActivity {
                password_enabled: field("password_enabled").and_then(parse_flag),
                password_last_used: field("password_last_used").and_then(parse_time),
                password_last_changed: field("password_last_changed").and_then(parse_time),
                mfa_active: field("mfa_active").and_then(parse_flag),
                access_key_1_last_used: field("access_key_1_last_used_date").and_then(parse_time),
                access_key_2_last_used: field("access_key_2_last_used_date").and_then(parse_time),
            };
            entries.insert(user.to_string(), activity);
        }

        Ok(Self { entries })
    }

    /// Activity for `user_name`, or all-unknown when the report lacks the user.
    pub fn activity_for(&self, user_name: &str) -> CredentialActivity {
        match self.entries.get(user_name) {
            Some(activity) => activity.clone(),
            None => {
                log::debug!("{} not in credential report, activity unknown", user_name);
                CredentialActivity::unknown()
            }
        }
    }

    /// Whether the report has a row for `user_name`.
    pub fn contains(&self, user_name: &str) -> bool {
        self.entries.contains_key(user_name)
    }

    /// Number of user rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the report has no user rows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User names in the report, sorted.
    pub fn user_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Generate the credential report and wait for it.
///
/// Fails with [`Error::ReportTimeout`] when the report is still not ready
/// once the poll budget in `config` is spent.
pub fn fetch_activity_report(
    backend: &dyn Backend,
    config: &PollConfig,
    callback: Option<&dyn PollCallback>,
) -> Result<ActivityReport> {
    let state = backend.generate_credential_report()?;
    log::debug!("Credential report generation state: {:?}", state);
    if state != ReportState::Complete {
        log::info!("Waiting for credential report to generate...");
    }

    let csv = poll_until_ready(config, callback, || backend.get_credential_report())?;
    let report = ActivityReport::parse_csv(&csv)?;
    log::info!("Credential report retrieved ({} users)", report.len());
    Ok(report)
}

/// Parse a report timestamp; `N/A`, `no_information` and friends are unknown.
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if is_placeholder(value) {
        return None;
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("Ignoring unparseable report timestamp '{}': {}", value, e);
            None
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn is_placeholder(value: &str) -> bool {
    matches!(value, "" | "N/A" | "no_information" | "not_supported")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryUser};
    use chrono::TimeZone;
    use std::time::Duration;

    const SAMPLE: &str = "user,arn,user_creation_time,password_enabled,password_last_used,password_last_changed,mfa_active,access_key_1_last_used_date,access_key_2_last_used_date
<root_account>,arn:aws:iam::123456789012:root,2020-01-01T00:00:00+00:00,not_supported,2024-01-01T00:00:00+00:00,not_supported,true,N/A,N/A
alice,arn:aws:iam::123456789012:user/alice,2021-02-03T04:05:06+00:00,true,2024-06-01T10:00:00+00:00,2024-01-01T00:00:00+00:00,true,2024-06-02T11:00:00+00:00,N/A
bob,arn:aws:iam::123456789012:user/bob,2021-02-03T04:05:06+00:00,false,no_information,N/A,false,N/A,N/A";

    fn fast_poll() -> PollConfig {
        PollConfig {
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(2),
            timeout: Duration::from_secs(5),
            max_polls: 5,
        }
    }

    #[test]
    fn test_parse_sample_report() {
        let report = ActivityReport::parse_csv(SAMPLE).unwrap();

        assert_eq!(report.len(), 2);
        assert!(!report.contains(ROOT_ACCOUNT));

        let alice = report.activity_for("alice");
        assert_eq!(alice.password_enabled, Some(true));
        assert_eq!(
            alice.password_last_used,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(alice.mfa_active, Some(true));
        assert!(alice.access_key_1_last_used.is_some());
        assert!(alice.access_key_2_last_used.is_none());

        let bob = report.activity_for("bob");
        assert_eq!(bob.password_enabled, Some(false));
        assert!(bob.password_last_used.is_none());
        assert!(bob.password_last_changed.is_none());
    }

    #[test]
    fn test_absent_user_is_unknown() {
        let report = ActivityReport::parse_csv(SAMPLE).unwrap();
        assert!(report.activity_for("mallory").is_unknown());
    }

    #[test]
    fn test_parse_empty_report() {
        assert!(matches!(ActivityReport::parse_csv(""), Err(Error::Parse(_))));
        assert!(matches!(
            ActivityReport::parse_csv("arn,mfa_active\nx,true"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_parse_quoted_fields() {
        let csv = "user,arn,password_enabled,mfa_active\n\
                   \"carol\",\"arn:aws:iam::123456789012:user/ops,\n\"\"team\"\"/carol\",true,false\n\
                   dave,arn:aws:iam::123456789012:user/dave,false,true\n";

        let report = ActivityReport::parse_csv(csv).unwrap();

        assert_eq!(report.user_names(), vec!["carol", "dave"]);
        assert_eq!(report.activity_for("carol").password_enabled, Some(true));
        assert_eq!(report.activity_for("dave").mfa_active, Some(true));
    }

    #[test]
    fn test_fetch_waits_for_report() {
        let used = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let backend = MemoryBackend::new()
            .with_user(MemoryUser::new("alice").login_profile())
            .with_activity(
                "alice",
                CredentialActivity {
                    password_last_used: Some(used),
                    ..CredentialActivity::unknown()
                },
            )
            .report_ready_after(2);

        let report = fetch_activity_report(&backend, &fast_poll(), None).unwrap();

        let alice = report.activity_for("alice");
        assert_eq!(alice.password_last_used, Some(used));
        assert_eq!(alice.password_enabled, Some(true));
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|c| *c == "GetCredentialReport")
                .count(),
            3
        );
    }

    #[test]
    fn test_fetch_times_out() {
        let backend = MemoryBackend::new()
            .with_user(MemoryUser::new("alice"))
            .report_ready_after(100);

        let err = fetch_activity_report(&backend, &fast_poll(), None).unwrap_err();

        assert!(matches!(err, Error::ReportTimeout { attempts: 5, .. }));
    }

    #[test]
    fn test_stale_report_omits_user() {
        let backend = MemoryBackend::new()
            .with_user(MemoryUser::new("alice"))
            .with_user(MemoryUser::new("newbie"))
            .omit_from_report("newbie");

        let report = fetch_activity_report(&backend, &fast_poll(), None).unwrap();

        assert!(report.contains("alice"));
        assert!(!report.contains("newbie"));
        assert!(report.activity_for("newbie").is_unknown());
    }
}
