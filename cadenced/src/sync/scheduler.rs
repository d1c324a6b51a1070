use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use super::executor::PassOutcome;
use super::retry::RetryPolicy;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
const OFFLINE_POLL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unit of work the scheduler fires. It never sees entity data.
#[async_trait]
pub trait SyncWork: Send + Sync {
    async fn run(&self) -> PassOutcome;
}

/// Network constraint checked before any trigger fires.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_reachable(&self) -> bool {
        true
    }
}

/// Treats the network as available when a TCP connection to the API host
/// can be opened.
pub struct TcpReachability {
    host: String,
    port: u16,
}

impl TcpReachability {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn for_url(url: &Url) -> Option<Self> {
        Some(Self::new(url.host_str()?, url.port_or_known_default()?))
    }
}

#[async_trait]
impl Connectivity for TcpReachability {
    async fn is_reachable(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        matches!(tokio::time::timeout(PROBE_TIMEOUT, connect).await, Ok(Ok(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSlot {
    Periodic,
    Immediate,
}

impl TriggerSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSlot::Periodic => "periodic",
            TriggerSlot::Immediate => "immediate",
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    /// Next due time of the recurring trigger.
    periodic: Option<Instant>,
    /// Request id of the pending one-shot trigger.
    immediate: Option<u64>,
    next_request_id: u64,
}

/// Owns the two named trigger slots and runs passes one at a time.
pub struct SyncScheduler {
    work: Arc<dyn SyncWork>,
    connectivity: Arc<dyn Connectivity>,
    retry: RetryPolicy,
    interval: Duration,
    slots: Mutex<Slots>,
    running: tokio::sync::Mutex<()>,
    wake: Notify,
    stopped: AtomicBool,
}

impl SyncScheduler {
    pub fn new(
        work: Arc<dyn SyncWork>,
        connectivity: Arc<dyn Connectivity>,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            work,
            connectivity,
            retry,
            interval,
            slots: Mutex::new(Slots::default()),
            running: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Registers the periodic slot. Returns `false` if it was already registered.
    pub fn schedule_recurring(&self) -> bool {
        {
            let mut slots = self.slots();
            if slots.periodic.is_some() {
                return false;
            }
            slots.periodic = Some(Instant::now() + self.interval);
        }
        info!(interval_secs = self.interval.as_secs(), "periodic sync scheduled");
        self.wake.notify_one();
        true
    }

    /// Registers a one-shot trigger, replacing any pending one.
    pub fn request_immediate(&self) -> u64 {
        let (request_id, replaced) = {
            let mut slots = self.slots();
            slots.next_request_id += 1;
            let request_id = slots.next_request_id;
            (request_id, slots.immediate.replace(request_id))
        };
        match replaced {
            Some(previous) => debug!(request_id, previous, "immediate sync request replaced"),
            None => debug!(request_id, "immediate sync requested"),
        }
        self.wake.notify_one();
        request_id
    }

    /// Clears both slots. An in-flight pass, including its retries, still finishes.
    pub fn cancel_all(&self) {
        let mut slots = self.slots();
        slots.periodic = None;
        slots.immediate = None;
        drop(slots);
        self.wake.notify_one();
    }

    pub fn pending(&self) -> Vec<TriggerSlot> {
        let slots = self.slots();
        let mut pending = Vec::new();
        if slots.immediate.is_some() {
            pending.push(TriggerSlot::Immediate);
        }
        if slots.periodic.is_some() {
            pending.push(TriggerSlot::Periodic);
        }
        pending
    }

    /// Fires every trigger that is due, immediate first. Returns how many fired.
    pub async fn run_ready(&self) -> usize {
        if !self.has_ready(Instant::now()) {
            return 0;
        }
        if !self.connectivity.is_reachable().await {
            debug!("server unreachable, sync triggers stay pending");
            return 0;
        }

        let _guard = self.running.lock().await;
        let mut fired = 0;
        while let Some(slot) = self.take_ready(Instant::now()) {
            self.execute(slot).await;
            fired += 1;
        }
        fired
    }

    /// Long-lived trigger loop. Ends after [`SyncScheduler::shutdown`].
    pub async fn run(self: Arc<Self>) {
        while !self.stopped.load(Ordering::SeqCst) {
            let fired = self.run_ready().await;
            let delay = match self.next_delay(Instant::now()) {
                Some(delay) if delay.is_zero() && fired == 0 => Some(OFFLINE_POLL),
                other => other,
            };
            match delay {
                Some(delay) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
        debug!("sync scheduler stopped");
    }

    /// Cancels future work and waits for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel_all();
        let _guard = self.running.lock().await;
    }

    async fn execute(&self, slot: TriggerSlot) -> bool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self.work.run().await;
            if !outcome.has_errors {
                debug!(slot = slot.as_str(), attempts, "sync trigger succeeded");
                return true;
            }
            if !self.retry.should_retry(attempts) {
                error!(
                    slot = slot.as_str(),
                    attempts, "sync trigger failed permanently"
                );
                return false;
            }
            let delay = self.retry.delay_after(attempts);
            warn!(
                slot = slot.as_str(),
                attempts,
                retry_in_secs = delay.as_secs(),
                "sync pass had errors, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn has_ready(&self, now: Instant) -> bool {
        let slots = self.slots();
        slots.immediate.is_some() || slots.periodic.is_some_and(|due| due <= now)
    }

    fn take_ready(&self, now: Instant) -> Option<TriggerSlot> {
        let mut slots = self.slots();
        if slots.immediate.take().is_some() {
            return Some(TriggerSlot::Immediate);
        }
        match slots.periodic {
            Some(due) if due <= now => {
                slots.periodic = Some(now + self.interval);
                Some(TriggerSlot::Periodic)
            }
            _ => None,
        }
    }

    fn next_delay(&self, now: Instant) -> Option<Duration> {
        let slots = self.slots();
        if slots.immediate.is_some() {
            return Some(Duration::ZERO);
        }
        slots
            .periodic
            .map(|due| due.saturating_duration_since(now))
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
