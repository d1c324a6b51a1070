use std::{fs, path::Path};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions, sqlite::SqliteRow};
use thiserror::Error;

use super::now_millis;
use super::status::{EntityKind, SyncMeta, SyncStatus};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ELIGIBLE_FILTER: &str = "sync_status IN ('not_synced', 'sync_failed')";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sync status: {0}")]
    InvalidStatus(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub meta: SyncMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerProfile {
    pub id: String,
    pub display_name: String,
    pub birth_year: Option<i32>,
    pub cycle_length_days: i32,
    pub period_length_days: i32,
    pub last_period_start: Option<String>,
    pub weekly_distance_km: f64,
    /// Device-only preference, never sent to or received from the server.
    pub notifications_enabled: bool,
    /// Device-only preference, `HH:MM`.
    pub reminder_time: Option<String>,
    pub meta: SyncMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub race_date: String,
    pub distance_km: f64,
    pub goal_time_secs: Option<i64>,
    pub meta: SyncMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub id: String,
    pub race_id: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub active: bool,
    pub meta: SyncMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSession {
    pub id: String,
    pub plan_id: String,
    pub session_date: String,
    pub week_number: i64,
    pub session_type: String,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub completed: bool,
    pub meta: SyncMeta,
}

/// Local copy of the user's syncable records.
///
/// `save_local_*` is the path for user edits and always leaves the record
/// `NotSynced`. `upsert_*` writes the record exactly as given and is used by
/// the download phase.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn get_meta(&self, kind: EntityKind, id: &str) -> Result<Option<SyncMeta>, StoreError> {
        let sql = format!(
            "SELECT sync_status, last_modified, server_timestamp, version FROM {} WHERE id = ?1",
            kind.table()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(meta_from_row).transpose()
    }

    pub async fn set_sync_status(
        &self,
        kind: EntityKind,
        id: &str,
        status: SyncStatus,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE {} SET sync_status = ?1 WHERE id = ?2", kind.table());
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Settles a successful upload. Only a record still `Syncing` is touched;
    /// returns false when a local edit landed during the upload, which leaves
    /// the record pending for the next pass.
    pub async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        server_timestamp: i64,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET sync_status = ?1, server_timestamp = ?2 WHERE id = ?3 AND sync_status = ?4",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(SyncStatus::Synced.as_str())
            .bind(server_timestamp)
            .bind(id)
            .bind(SyncStatus::Syncing.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Settles a failed upload, with the same `Syncing` guard as `mark_synced`.
    pub async fn mark_upload_failed(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET sync_status = ?1 WHERE id = ?2 AND sync_status = ?3",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(SyncStatus::SyncFailed.as_str())
            .bind(id)
            .bind(SyncStatus::Syncing.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_pending(&self, kind: EntityKind) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS pending FROM {} WHERE {ELIGIBLE_FILTER}",
            kind.table()
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get("pending")?)
    }

    /// Pending records across the kinds a pass syncs. Accounts are excluded.
    pub async fn count_pending_all(&self) -> Result<i64, StoreError> {
        let mut total = 0;
        for kind in EntityKind::SYNCED {
            total += self.count_pending(kind).await?;
        }
        Ok(total)
    }

    /// Turns records stranded in `Syncing` into `SyncFailed` so the next
    /// pass picks them up again. Only valid while no pass is running.
    pub async fn reset_interrupted_uploads(&self) -> Result<u64, StoreError> {
        let mut reset = 0;
        for kind in EntityKind::ALL {
            let sql = format!(
                "UPDATE {} SET sync_status = ?1 WHERE sync_status = ?2",
                kind.table()
            );
            reset += sqlx::query(&sql)
                .bind(SyncStatus::SyncFailed.as_str())
                .bind(SyncStatus::Syncing.as_str())
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(reset)
    }

    async fn edited_meta(&self, kind: EntityKind, id: &str) -> Result<SyncMeta, StoreError> {
        let now = now_millis();
        Ok(self
            .get_meta(kind, id)
            .await?
            .map(|meta| meta.touched(now))
            .unwrap_or_else(|| SyncMeta::new_local(now)))
    }

    pub async fn save_local_account(&self, account: &Account) -> Result<Account, StoreError> {
        let record = Account {
            meta: self.edited_meta(EntityKind::Account, &account.id).await?,
            ..account.clone()
        };
        self.upsert_account(&record).await?;
        Ok(record)
    }

    pub async fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO accounts (id, email, display_name, sync_status, last_modified, server_timestamp, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                sync_status = excluded.sync_status,
                last_modified = excluded.last_modified,
                server_timestamp = excluded.server_timestamp,
                version = excluded.version",
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(account.meta.sync_status.as_str())
        .bind(account.meta.last_modified)
        .bind(account.meta.server_timestamp)
        .bind(account.meta.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, sync_status, last_modified, server_timestamp, version
             FROM accounts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Account {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            meta: meta_from_row(&row)?,
        }))
    }

    pub async fn save_local_profile(
        &self,
        profile: &RunnerProfile,
    ) -> Result<RunnerProfile, StoreError> {
        let record = RunnerProfile {
            meta: self.edited_meta(EntityKind::Profile, &profile.id).await?,
            ..profile.clone()
        };
        self.upsert_profile(&record).await?;
        Ok(record)
    }

    pub async fn upsert_profile(&self, profile: &RunnerProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runner_profiles (
                id, display_name, birth_year, cycle_length_days, period_length_days,
                last_period_start, weekly_distance_km, notifications_enabled, reminder_time,
                sync_status, last_modified, server_timestamp, version
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                birth_year = excluded.birth_year,
                cycle_length_days = excluded.cycle_length_days,
                period_length_days = excluded.period_length_days,
                last_period_start = excluded.last_period_start,
                weekly_distance_km = excluded.weekly_distance_km,
                notifications_enabled = excluded.notifications_enabled,
                reminder_time = excluded.reminder_time,
                sync_status = excluded.sync_status,
                last_modified = excluded.last_modified,
                server_timestamp = excluded.server_timestamp,
                version = excluded.version",
        )
        .bind(&profile.id)
        .bind(&profile.display_name)
        .bind(profile.birth_year)
        .bind(profile.cycle_length_days)
        .bind(profile.period_length_days)
        .bind(&profile.last_period_start)
        .bind(profile.weekly_distance_km)
        .bind(if profile.notifications_enabled { 1 } else { 0 })
        .bind(&profile.reminder_time)
        .bind(profile.meta.sync_status.as_str())
        .bind(profile.meta.last_modified)
        .bind(profile.meta.server_timestamp)
        .bind(profile.meta.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<RunnerProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, display_name, birth_year, cycle_length_days, period_length_days,
                    last_period_start, weekly_distance_km, notifications_enabled, reminder_time,
                    sync_status, last_modified, server_timestamp, version
             FROM runner_profiles WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn list_eligible_profiles(&self) -> Result<Vec<RunnerProfile>, StoreError> {
        let sql = format!(
            "SELECT id, display_name, birth_year, cycle_length_days, period_length_days,
                    last_period_start, weekly_distance_km, notifications_enabled, reminder_time,
                    sync_status, last_modified, server_timestamp, version
             FROM runner_profiles WHERE {ELIGIBLE_FILTER}
             ORDER BY last_modified ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(profile_from_row).collect()
    }

    pub async fn save_local_race(&self, race: &Race) -> Result<Race, StoreError> {
        let record = Race {
            meta: self.edited_meta(EntityKind::Race, &race.id).await?,
            ..race.clone()
        };
        self.upsert_race(&record).await?;
        Ok(record)
    }

    pub async fn upsert_race(&self, race: &Race) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO races (
                id, name, race_date, distance_km, goal_time_secs,
                sync_status, last_modified, server_timestamp, version
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                race_date = excluded.race_date,
                distance_km = excluded.distance_km,
                goal_time_secs = excluded.goal_time_secs,
                sync_status = excluded.sync_status,
                last_modified = excluded.last_modified,
                server_timestamp = excluded.server_timestamp,
                version = excluded.version",
        )
        .bind(&race.id)
        .bind(&race.name)
        .bind(&race.race_date)
        .bind(race.distance_km)
        .bind(race.goal_time_secs)
        .bind(race.meta.sync_status.as_str())
        .bind(race.meta.last_modified)
        .bind(race.meta.server_timestamp)
        .bind(race.meta.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_race(&self, id: &str) -> Result<Option<Race>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, race_date, distance_km, goal_time_secs,
                    sync_status, last_modified, server_timestamp, version
             FROM races WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(race_from_row).transpose()
    }

    pub async fn list_races(&self) -> Result<Vec<Race>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, race_date, distance_km, goal_time_secs,
                    sync_status, last_modified, server_timestamp, version
             FROM races ORDER BY race_date ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(race_from_row).collect()
    }

    pub async fn list_eligible_races(&self) -> Result<Vec<Race>, StoreError> {
        let sql = format!(
            "SELECT id, name, race_date, distance_km, goal_time_secs,
                    sync_status, last_modified, server_timestamp, version
             FROM races WHERE {ELIGIBLE_FILTER}
             ORDER BY last_modified ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(race_from_row).collect()
    }

    pub async fn upsert_plan(&self, plan: &TrainingPlan) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO training_plans (
                id, race_id, start_date, end_date, active,
                sync_status, last_modified, server_timestamp, version
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                race_id = excluded.race_id,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                active = excluded.active,
                sync_status = excluded.sync_status,
                last_modified = excluded.last_modified,
                server_timestamp = excluded.server_timestamp,
                version = excluded.version",
        )
        .bind(&plan.id)
        .bind(&plan.race_id)
        .bind(&plan.start_date)
        .bind(&plan.end_date)
        .bind(if plan.active { 1 } else { 0 })
        .bind(plan.meta.sync_status.as_str())
        .bind(plan.meta.last_modified)
        .bind(plan.meta.server_timestamp)
        .bind(plan.meta.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_plan(&self, id: &str) -> Result<Option<TrainingPlan>, StoreError> {
        let row = sqlx::query(
            "SELECT id, race_id, start_date, end_date, active,
                    sync_status, last_modified, server_timestamp, version
             FROM training_plans WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    pub async fn get_active_plan(&self) -> Result<Option<TrainingPlan>, StoreError> {
        let row = sqlx::query(
            "SELECT id, race_id, start_date, end_date, active,
                    sync_status, last_modified, server_timestamp, version
             FROM training_plans WHERE active = 1
             ORDER BY server_timestamp DESC, start_date DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    pub async fn save_local_session(
        &self,
        session: &TrainingSession,
    ) -> Result<TrainingSession, StoreError> {
        let record = TrainingSession {
            meta: self.edited_meta(EntityKind::Session, &session.id).await?,
            ..session.clone()
        };
        self.upsert_session(&record).await?;
        Ok(record)
    }

    pub async fn upsert_session(&self, session: &TrainingSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO training_sessions (
                id, plan_id, session_date, week_number, session_type, distance_km,
                duration_minutes, completed, sync_status, last_modified, server_timestamp, version
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                plan_id = excluded.plan_id,
                session_date = excluded.session_date,
                week_number = excluded.week_number,
                session_type = excluded.session_type,
                distance_km = excluded.distance_km,
                duration_minutes = excluded.duration_minutes,
                completed = excluded.completed,
                sync_status = excluded.sync_status,
                last_modified = excluded.last_modified,
                server_timestamp = excluded.server_timestamp,
                version = excluded.version",
        )
        .bind(&session.id)
        .bind(&session.plan_id)
        .bind(&session.session_date)
        .bind(session.week_number)
        .bind(&session.session_type)
        .bind(session.distance_km)
        .bind(session.duration_minutes)
        .bind(if session.completed { 1 } else { 0 })
        .bind(session.meta.sync_status.as_str())
        .bind(session.meta.last_modified)
        .bind(session.meta.server_timestamp)
        .bind(session.meta.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<TrainingSession>, StoreError> {
        let row = sqlx::query(
            "SELECT id, plan_id, session_date, week_number, session_type, distance_km,
                    duration_minutes, completed, sync_status, last_modified, server_timestamp, version
             FROM training_sessions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn list_sessions_for_plan(
        &self,
        plan_id: &str,
    ) -> Result<Vec<TrainingSession>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, plan_id, session_date, week_number, session_type, distance_km,
                    duration_minutes, completed, sync_status, last_modified, server_timestamp, version
             FROM training_sessions WHERE plan_id = ?1
             ORDER BY session_date ASC, id ASC",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    pub async fn list_eligible_sessions(&self) -> Result<Vec<TrainingSession>, StoreError> {
        let sql = format!(
            "SELECT id, plan_id, session_date, week_number, session_type, distance_km,
                    duration_minutes, completed, sync_status, last_modified, server_timestamp, version
             FROM training_sessions WHERE {ELIGIBLE_FILTER}
             ORDER BY last_modified ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(session_from_row).collect()
    }
}

fn meta_from_row(row: &SqliteRow) -> Result<SyncMeta, StoreError> {
    let status: String = row.try_get("sync_status")?;
    Ok(SyncMeta {
        sync_status: SyncStatus::parse(&status)?,
        last_modified: row.try_get("last_modified")?,
        server_timestamp: row.try_get("server_timestamp")?,
        version: row.try_get("version")?,
    })
}

fn profile_from_row(row: &SqliteRow) -> Result<RunnerProfile, StoreError> {
    let notifications_enabled: i64 = row.try_get("notifications_enabled")?;
    Ok(RunnerProfile {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        birth_year: row.try_get("birth_year")?,
        cycle_length_days: row.try_get("cycle_length_days")?,
        period_length_days: row.try_get("period_length_days")?,
        last_period_start: row.try_get("last_period_start")?,
        weekly_distance_km: row.try_get("weekly_distance_km")?,
        notifications_enabled: notifications_enabled != 0,
        reminder_time: row.try_get("reminder_time")?,
        meta: meta_from_row(row)?,
    })
}

fn race_from_row(row: &SqliteRow) -> Result<Race, StoreError> {
    Ok(Race {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        race_date: row.try_get("race_date")?,
        distance_km: row.try_get("distance_km")?,
        goal_time_secs: row.try_get("goal_time_secs")?,
        meta: meta_from_row(row)?,
    })
}

fn plan_from_row(row: &SqliteRow) -> Result<TrainingPlan, StoreError> {
    let active: i64 = row.try_get("active")?;
    Ok(TrainingPlan {
        id: row.try_get("id")?,
        race_id: row.try_get("race_id")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        active: active != 0,
        meta: meta_from_row(row)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<TrainingSession, StoreError> {
    let completed: i64 = row.try_get("completed")?;
    Ok(TrainingSession {
        id: row.try_get("id")?,
        plan_id: row.try_get("plan_id")?,
        session_date: row.try_get("session_date")?,
        week_number: row.try_get("week_number")?,
        session_type: row.try_get("session_type")?,
        distance_km: row.try_get("distance_km")?,
        duration_minutes: row.try_get("duration_minutes")?,
        completed: completed != 0,
        meta: meta_from_row(row)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
