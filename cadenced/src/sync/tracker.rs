//! Pure decisions over sync metadata.
//!
//! Conflict detection is deliberately coarse: a conflict is "the local copy
//! had pending or failed changes", judged from `sync_status` alone. Field
//! contents are never compared and the server copy always wins. Turning this
//! into a field-level or three-way merge would change observable behaviour.

use time::Date;

use super::status::{SyncMeta, SyncStatus};

pub fn is_upload_eligible(meta: &SyncMeta) -> bool {
    matches!(
        meta.sync_status,
        SyncStatus::NotSynced | SyncStatus::SyncFailed
    )
}

pub fn is_conflict(local: Option<&SyncMeta>) -> bool {
    local.is_some_and(|meta| meta.sync_status != SyncStatus::Synced)
}

/// Metadata for a record that the download phase is about to write.
pub fn server_wins(local: Option<&SyncMeta>, now: i64) -> SyncMeta {
    match local {
        Some(meta) => SyncMeta {
            sync_status: SyncStatus::Synced,
            last_modified: meta.last_modified,
            server_timestamp: Some(now),
            version: meta.version.saturating_add(1),
        },
        None => SyncMeta {
            sync_status: SyncStatus::Synced,
            last_modified: now,
            server_timestamp: Some(now),
            version: 1,
        },
    }
}

/// One-based plan week of a session; sessions before the plan start land in week 1.
pub fn week_number(plan_start: Date, session_date: Date) -> i64 {
    let days = (session_date - plan_start).whole_days();
    (days.div_euclid(7) + 1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn meta(status: SyncStatus, version: i64) -> SyncMeta {
        SyncMeta {
            sync_status: status,
            last_modified: 100,
            server_timestamp: None,
            version,
        }
    }

    #[test]
    fn only_unsynced_and_failed_records_are_eligible() {
        assert!(is_upload_eligible(&meta(SyncStatus::NotSynced, 1)));
        assert!(is_upload_eligible(&meta(SyncStatus::SyncFailed, 1)));
        assert!(!is_upload_eligible(&meta(SyncStatus::Synced, 1)));
        assert!(!is_upload_eligible(&meta(SyncStatus::Syncing, 1)));
    }

    #[test]
    fn conflict_requires_local_copy_with_pending_state() {
        assert!(!is_conflict(None));
        assert!(!is_conflict(Some(&meta(SyncStatus::Synced, 3))));
        assert!(is_conflict(Some(&meta(SyncStatus::NotSynced, 1))));
        assert!(is_conflict(Some(&meta(SyncStatus::SyncFailed, 1))));
        assert!(is_conflict(Some(&meta(SyncStatus::Syncing, 1))));
    }

    #[test]
    fn server_wins_bumps_existing_version() {
        let merged = server_wins(Some(&meta(SyncStatus::SyncFailed, 3)), 500);
        assert_eq!(merged.sync_status, SyncStatus::Synced);
        assert_eq!(merged.version, 4);
        assert_eq!(merged.server_timestamp, Some(500));
        assert_eq!(merged.last_modified, 100);
    }

    #[test]
    fn server_wins_inserts_first_version() {
        let merged = server_wins(None, 500);
        assert_eq!(merged.version, 1);
        assert_eq!(merged.last_modified, 500);
        assert_eq!(merged.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn week_number_counts_from_plan_start() {
        let start = date!(2024 - 01 - 01);
        assert_eq!(week_number(start, date!(2024 - 01 - 01)), 1);
        assert_eq!(week_number(start, date!(2024 - 01 - 07)), 1);
        assert_eq!(week_number(start, date!(2024 - 01 - 08)), 2);
        assert_eq!(week_number(start, date!(2024 - 02 - 12)), 7);
    }

    #[test]
    fn week_number_is_clamped_to_one() {
        let start = date!(2024 - 01 - 10);
        assert_eq!(week_number(start, date!(2024 - 01 - 09)), 1);
        assert_eq!(week_number(start, date!(2023 - 12 - 01)), 1);
    }
}
