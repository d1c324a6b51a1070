use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::{ApiResult, PlanResponse};
use thiserror::Error;
use time::{Date, macros::format_description};
use tracing::{debug, error, info, warn};

use super::now_millis;
use super::remote::{RemoteApi, profile_request, race_request};
use super::scheduler::SyncWork;
use super::status::{EntityKind, SyncStatus};
use super::store::{LocalStore, Race, RunnerProfile, StoreError, TrainingPlan, TrainingSession};
use super::telemetry::{TelemetryError, TelemetryStore};
use super::tracker::{is_conflict, server_wins, week_number};

/// Notification default for a profile first seen through the download phase.
const DEFAULT_NOTIFICATIONS_ENABLED: bool = true;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid date in server payload: {0}")]
    Date(#[from] time::error::Parse),
}

/// Counters of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub uploaded: u32,
    pub upload_failed: u32,
    /// Sessions marked synced without a server call.
    pub assumed_synced: u32,
    pub downloaded: u32,
    pub conflicts: u32,
    pub has_errors: bool,
}

pub struct SyncExecutor {
    store: LocalStore,
    api: Arc<dyn RemoteApi>,
    telemetry: Arc<TelemetryStore>,
}

impl SyncExecutor {
    pub fn new(store: LocalStore, api: Arc<dyn RemoteApi>, telemetry: Arc<TelemetryStore>) -> Self {
        Self {
            store,
            api,
            telemetry,
        }
    }

    /// Uploads pending local records, then reconciles with the server copy.
    ///
    /// The download phase runs even when the upload phase aborted. Callers
    /// must not run two passes at once; the scheduler guarantees that.
    pub async fn run_pass(&self) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        if let Err(err) = self.upload_phase(&mut outcome).await {
            error!(error = %err, "upload phase aborted");
            outcome.has_errors = true;
            match self.store.reset_interrupted_uploads().await {
                Ok(0) => {}
                Ok(reset) => debug!(reset, "returned interrupted uploads to sync_failed"),
                Err(err) => warn!(error = %err, "could not reset interrupted uploads"),
            }
        }

        if let Err(err) = self.download_phase(&mut outcome).await {
            error!(error = %err, "download phase aborted");
            outcome.has_errors = true;
        }

        self.record_outcome(&outcome).await;
        info!(
            uploaded = outcome.uploaded,
            upload_failed = outcome.upload_failed,
            assumed_synced = outcome.assumed_synced,
            downloaded = outcome.downloaded,
            conflicts = outcome.conflicts,
            has_errors = outcome.has_errors,
            "sync pass finished"
        );
        outcome
    }

    async fn upload_phase(&self, outcome: &mut PassOutcome) -> Result<(), EngineError> {
        for profile in self.store.list_eligible_profiles().await? {
            self.store
                .set_sync_status(EntityKind::Profile, &profile.id, SyncStatus::Syncing)
                .await?;
            let result = self.api.save_profile(&profile_request(&profile)).await;
            self.settle_upload(EntityKind::Profile, &profile.id, result.failure_reason(), outcome)
                .await?;
        }

        for race in self.store.list_eligible_races().await? {
            self.store
                .set_sync_status(EntityKind::Race, &race.id, SyncStatus::Syncing)
                .await?;
            let result = self.api.create_race(&race_request(&race)).await;
            self.settle_upload(EntityKind::Race, &race.id, result.failure_reason(), outcome)
                .await?;
        }

        // The server has no session update endpoint yet.
        for session in self.store.list_eligible_sessions().await? {
            self.store
                .set_sync_status(EntityKind::Session, &session.id, SyncStatus::Syncing)
                .await?;
            if self
                .store
                .mark_synced(EntityKind::Session, &session.id, now_millis())
                .await?
            {
                outcome.assumed_synced += 1;
            }
        }

        Ok(())
    }

    async fn settle_upload(
        &self,
        kind: EntityKind,
        id: &str,
        failure: Option<String>,
        outcome: &mut PassOutcome,
    ) -> Result<(), EngineError> {
        match failure {
            None => {
                outcome.uploaded += 1;
                if self.store.mark_synced(kind, id, now_millis()).await? {
                    debug!(entity = kind.as_str(), id, "uploaded");
                } else {
                    debug!(entity = kind.as_str(), id, "edited during upload, left pending");
                }
            }
            Some(reason) => {
                self.store.mark_upload_failed(kind, id).await?;
                outcome.upload_failed += 1;
                warn!(entity = kind.as_str(), id, %reason, "upload failed");
            }
        }
        Ok(())
    }

    async fn download_phase(&self, outcome: &mut PassOutcome) -> Result<(), EngineError> {
        self.download_profile(outcome).await?;
        self.download_races(outcome).await?;
        self.download_plan(outcome).await?;
        Ok(())
    }

    async fn download_profile(&self, outcome: &mut PassOutcome) -> Result<(), EngineError> {
        let remote = match self.api.get_profile().await {
            ApiResult::Success(remote) => remote,
            result => {
                fetch_abandoned(EntityKind::Profile, &result, outcome);
                return Ok(());
            }
        };

        let local = self.store.get_profile(&remote.id).await?;
        let local_meta = local.as_ref().map(|profile| &profile.meta);
        note_download(is_conflict(local_meta), outcome);

        let (notifications_enabled, reminder_time) = match &local {
            Some(profile) => (profile.notifications_enabled, profile.reminder_time.clone()),
            None => (DEFAULT_NOTIFICATIONS_ENABLED, None),
        };
        let record = RunnerProfile {
            meta: server_wins(local_meta, now_millis()),
            id: remote.id,
            display_name: remote.display_name,
            birth_year: remote.birth_year,
            cycle_length_days: remote.cycle_length_days,
            period_length_days: remote.period_length_days,
            last_period_start: remote.last_period_start,
            weekly_distance_km: remote.weekly_distance_km,
            notifications_enabled,
            reminder_time,
        };
        self.store.upsert_profile(&record).await?;
        Ok(())
    }

    async fn download_races(&self, outcome: &mut PassOutcome) -> Result<(), EngineError> {
        let remote = match self.api.get_races().await {
            ApiResult::Success(remote) => remote,
            result => {
                fetch_abandoned(EntityKind::Race, &result, outcome);
                return Ok(());
            }
        };

        for race in remote {
            let local = self.store.get_race(&race.id).await?;
            let local_meta = local.as_ref().map(|race| &race.meta);
            note_download(is_conflict(local_meta), outcome);
            self.store
                .upsert_race(&Race {
                    meta: server_wins(local_meta, now_millis()),
                    id: race.id,
                    name: race.name,
                    race_date: race.race_date,
                    distance_km: race.distance_km,
                    goal_time_secs: race.goal_time_secs,
                })
                .await?;
        }
        Ok(())
    }

    async fn download_plan(&self, outcome: &mut PassOutcome) -> Result<(), EngineError> {
        let plan = match self.api.get_active_plan().await {
            ApiResult::Success(plan) => plan,
            result => {
                fetch_abandoned(EntityKind::Plan, &result, outcome);
                return Ok(());
            }
        };

        let sessions = session_weeks(&plan)?;

        let local = self.store.get_plan(&plan.id).await?;
        let local_meta = local.as_ref().map(|plan| &plan.meta);
        note_download(is_conflict(local_meta), outcome);
        self.store
            .upsert_plan(&TrainingPlan {
                meta: server_wins(local_meta, now_millis()),
                id: plan.id.clone(),
                race_id: plan.race_id.clone(),
                start_date: plan.start_date.clone(),
                end_date: plan.end_date.clone(),
                active: true,
            })
            .await?;

        for (session, week) in plan.sessions.iter().zip(sessions) {
            let local = self.store.get_session(&session.id).await?;
            let local_meta = local.as_ref().map(|session| &session.meta);
            note_download(is_conflict(local_meta), outcome);
            self.store
                .upsert_session(&TrainingSession {
                    meta: server_wins(local_meta, now_millis()),
                    id: session.id.clone(),
                    plan_id: plan.id.clone(),
                    session_date: session.session_date.clone(),
                    week_number: week,
                    session_type: session.session_type.clone(),
                    distance_km: session.distance_km,
                    duration_minutes: session.duration_minutes,
                    completed: session.completed,
                })
                .await?;
        }
        Ok(())
    }

    /// File writes end in `sync_all`, so they run off the async workers.
    async fn record_outcome(&self, outcome: &PassOutcome) {
        if outcome.has_errors {
            warn!("sync pass had errors, last sync time not recorded");
            return;
        }
        let telemetry = Arc::clone(&self.telemetry);
        let conflicts = outcome.conflicts;
        let written = tokio::task::spawn_blocking(move || -> Result<(), TelemetryError> {
            telemetry.record_last_sync_time()?;
            telemetry.record_conflicts_resolved(conflicts)
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to record sync telemetry"),
            Err(err) => warn!(error = %err, "telemetry write task failed"),
        }
    }
}

#[async_trait]
impl SyncWork for SyncExecutor {
    async fn run(&self) -> PassOutcome {
        self.run_pass().await
    }
}

fn note_download(conflict: bool, outcome: &mut PassOutcome) {
    outcome.downloaded += 1;
    if conflict {
        outcome.conflicts += 1;
    }
}

/// A 404 means the server holds nothing of this kind. Anything else skips
/// the step and marks the pass for retry.
fn fetch_abandoned<T>(kind: EntityKind, result: &ApiResult<T>, outcome: &mut PassOutcome) {
    if result.is_not_found() {
        debug!(entity = kind.as_str(), "nothing on the server");
        return;
    }
    outcome.has_errors = true;
    warn!(
        entity = kind.as_str(),
        reason = %result.failure_reason().unwrap_or_default(),
        "download step abandoned"
    );
}

/// Week numbers of every session, computed before anything is written so a
/// malformed date leaves the local plan untouched.
fn session_weeks(plan: &PlanResponse) -> Result<Vec<i64>, EngineError> {
    let start = parse_date(&plan.start_date)?;
    plan.sessions
        .iter()
        .map(|session| -> Result<i64, EngineError> {
            Ok(week_number(start, parse_date(&session.session_date)?))
        })
        .collect()
}

fn parse_date(value: &str) -> Result<Date, time::error::Parse> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
