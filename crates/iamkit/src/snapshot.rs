//! IAM State Reader: materializes a [`UserSnapshot`] from live IAM.

use crate::backend::Backend;
use crate::error::Result;
use crate::types::UserSnapshot;

/// Read the current state of one user.
///
/// A user without login profile, keys, groups or policies yields an empty
/// snapshot. A user that does not exist yields [`crate::Error::NotFound`]
/// from the very first call; nothing after it runs.
pub fn read_snapshot(backend: &dyn Backend, user_name: &str) -> Result<UserSnapshot> {
    let record = backend.get_user(user_name)?;
    let mut snapshot = UserSnapshot::empty(record);

    snapshot.console_access = backend.has_login_profile(user_name)?;
    snapshot.mfa_devices = backend.list_mfa_devices(user_name)?;
    snapshot.mfa_enabled = !snapshot.mfa_devices.is_empty();

    let mut keys = backend.list_access_keys(user_name)?;
    for key in &mut keys {
        key.last_used = backend.access_key_last_used(&key.key_id)?;
    }
    snapshot.access_keys = keys;

    snapshot.groups = backend.list_groups_for_user(user_name)?.into_iter().collect();
    snapshot.attached_policies = backend
        .list_attached_user_policies(user_name)?
        .into_iter()
        .collect();
    snapshot.inline_policies = backend.list_user_policies(user_name)?.into_iter().collect();

    log::debug!(
        "Read {}: {} groups, {} policies, {} keys",
        user_name,
        snapshot.groups.len(),
        snapshot.attached_policies.len(),
        snapshot.access_keys.len()
    );

    Ok(snapshot)
}

/// Read a snapshot for every user in the account, in listing order.
pub fn read_all(backend: &dyn Backend) -> Result<Vec<UserSnapshot>> {
    backend
        .list_user_names()?
        .iter()
        .map(|name| read_snapshot(backend, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryUser};
    use crate::types::KeyStatus;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_read_full_user() {
        let used = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let backend = MemoryBackend::new()
            .with_user(
                MemoryUser::new("alice")
                    .group("Admins")
                    .group("Developers")
                    .policy("ReadOnlyAccess")
                    .inline_policy("s3-scratch")
                    .access_key("AKIAALICE1", KeyStatus::Active)
                    .access_key("AKIAALICE2", KeyStatus::Inactive)
                    .mfa_device("arn:aws:iam::123456789012:mfa/alice")
                    .login_profile(),
            )
            .with_key_usage("AKIAALICE1", used);

        let snapshot = read_snapshot(&backend, "alice").unwrap();

        assert!(snapshot.console_access);
        assert!(snapshot.mfa_enabled);
        assert!(snapshot.has_group("Admins"));
        assert!(snapshot.has_group("Developers"));
        assert!(snapshot.find_policy("ReadOnlyAccess").is_some());
        assert!(snapshot.inline_policies.contains("s3-scratch"));
        assert_eq!(snapshot.access_keys.len(), 2);
        assert_eq!(snapshot.access_keys[0].last_used, Some(used));
        assert_eq!(snapshot.access_keys[1].last_used, None);
        assert_eq!(snapshot.active_keys().count(), 1);
    }

    #[test]
    fn test_read_bare_user() {
        let backend = MemoryBackend::new().with_user(MemoryUser::new("carol"));

        let snapshot = read_snapshot(&backend, "carol").unwrap();

        assert!(!snapshot.console_access);
        assert!(!snapshot.mfa_enabled);
        assert!(snapshot.groups.is_empty());
        assert!(snapshot.attached_policies.is_empty());
        assert!(snapshot.access_keys.is_empty());
        assert!(!snapshot.has_dependents());
    }

    #[test]
    fn test_missing_user_propagates_not_found() {
        let backend = MemoryBackend::new();

        let err = read_snapshot(&backend, "ghost").unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(backend.calls(), vec!["GetUser ghost"]);
    }

    #[test]
    fn test_read_all_in_listing_order() {
        let backend = MemoryBackend::new()
            .with_user(MemoryUser::new("bob"))
            .with_user(MemoryUser::new("alice"));

        let names: Vec<_> = read_all(&backend)
            .unwrap()
            .into_iter()
            .map(|s| s.user_name)
            .collect();

        assert_eq!(names, vec!["alice", "bob"]);
    }
}
