use super::store::StoreError;

/// Lifecycle of a local record relative to the server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    NotSynced,
    Syncing,
    Synced,
    SyncFailed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not_synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::SyncFailed => "sync_failed",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "not_synced" => Ok(SyncStatus::NotSynced),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "sync_failed" => Ok(SyncStatus::SyncFailed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Metadata block carried by every syncable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMeta {
    pub sync_status: SyncStatus,
    /// Unix millis of the last local write.
    pub last_modified: i64,
    /// Unix millis of the last server acknowledgement.
    pub server_timestamp: Option<i64>,
    /// Audit counter, bumped on every download overwrite.
    pub version: i64,
}

impl SyncMeta {
    pub fn new_local(now: i64) -> Self {
        Self {
            sync_status: SyncStatus::NotSynced,
            last_modified: now,
            server_timestamp: None,
            version: 1,
        }
    }

    /// Metadata after a local edit: back to `NotSynced`, version untouched.
    pub fn touched(self, now: i64) -> Self {
        Self {
            sync_status: SyncStatus::NotSynced,
            last_modified: now,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Account,
    Profile,
    Race,
    Plan,
    Session,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Account,
        EntityKind::Profile,
        EntityKind::Race,
        EntityKind::Plan,
        EntityKind::Session,
    ];

    /// Kinds a sync pass moves between device and server. Accounts are owned
    /// by sign-in and never synced.
    pub const SYNCED: [EntityKind; 4] = [
        EntityKind::Profile,
        EntityKind::Race,
        EntityKind::Plan,
        EntityKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Profile => "profile",
            EntityKind::Race => "race",
            EntityKind::Plan => "plan",
            EntityKind::Session => "session",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            EntityKind::Account => "accounts",
            EntityKind::Profile => "runner_profiles",
            EntityKind::Race => "races",
            EntityKind::Plan => "training_plans",
            EntityKind::Session => "training_sessions",
        }
    }
}
