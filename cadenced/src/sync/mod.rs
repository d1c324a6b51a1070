pub mod executor;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod summary;
pub mod telemetry;
pub mod tracker;

use time::OffsetDateTime;

/// Wall-clock time as unix milliseconds, the unit every sync timestamp uses.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
