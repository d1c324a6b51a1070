use std::sync::Arc;

use thiserror::Error;

use super::store::{LocalStore, StoreError};
use super::telemetry::{TelemetryError, TelemetryStore};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("telemetry read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a status screen shows about sync. `last_sync_time_millis` is `None`
/// until a pass completes without errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatusSummary {
    pub pending_count: i64,
    pub last_sync_time_millis: Option<i64>,
    pub last_conflict_count: i64,
    pub last_conflict_timestamp: Option<i64>,
}

pub async fn status_summary(
    store: &LocalStore,
    telemetry: &Arc<TelemetryStore>,
) -> Result<SyncStatusSummary, SummaryError> {
    let pending_count = store.count_pending_all().await?;
    let telemetry = Arc::clone(telemetry);
    let (last_sync_time_millis, last_conflict_count, last_conflict_timestamp) =
        tokio::task::spawn_blocking(move || -> Result<_, TelemetryError> {
            Ok((
                telemetry.last_sync_time_millis()?,
                telemetry.last_conflict_count()?,
                telemetry.last_conflict_timestamp()?,
            ))
        })
        .await??;
    Ok(SyncStatusSummary {
        pending_count,
        last_sync_time_millis,
        last_conflict_count,
        last_conflict_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::status::{SyncMeta, SyncStatus};
    use crate::sync::store::Race;
    use sqlx::SqlitePool;

    #[tokio::test]
    async fn combines_pending_counts_with_telemetry() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = LocalStore::from_pool(pool);
        store.init().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let telemetry =
            Arc::new(TelemetryStore::open(dir.path().join("t.bin"), &[3u8; 32]).unwrap());

        let empty = status_summary(&store, &telemetry).await.unwrap();
        assert_eq!(
            empty,
            SyncStatusSummary {
                pending_count: 0,
                last_sync_time_millis: None,
                last_conflict_count: 0,
                last_conflict_timestamp: None,
            }
        );

        for (id, status) in [("r1", SyncStatus::NotSynced), ("r2", SyncStatus::SyncFailed)] {
            store
                .upsert_race(&Race {
                    id: id.into(),
                    name: "Parkrun".into(),
                    race_date: "2024-06-01".into(),
                    distance_km: 5.0,
                    goal_time_secs: None,
                    meta: SyncMeta {
                        sync_status: status,
                        ..SyncMeta::new_local(1)
                    },
                })
                .await
                .unwrap();
        }
        telemetry.record_last_sync_time_at(42).unwrap();
        telemetry.record_conflicts_resolved_at(2, 43).unwrap();

        let summary = status_summary(&store, &telemetry).await.unwrap();
        assert_eq!(summary.pending_count, 2);
        assert_eq!(summary.last_sync_time_millis, Some(42));
        assert_eq!(summary.last_conflict_count, 2);
        assert_eq!(summary.last_conflict_timestamp, Some(43));
    }
}
