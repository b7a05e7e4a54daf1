//! Batched synchronization with partial-failure recovery.
//!
//! The sync manager uploads queued records in per-kind batches, deletes
//! only the keys it snapshotted for an acknowledged batch, and retries the
//! rest whole on the next cycle (at-least-once delivery; the backend
//! deduplicates by record id). It also pulls remote commands and the
//! policy config, and runs the heartbeat.
//!
//! All of it runs on a dedicated [`SyncWorker`] thread fed over a bounded
//! channel, so a slow or timed-out request never stalls the scheduler
//! loop. Dropping a task on a full channel is safe: every record is
//! durably queued before a send is attempted.

pub mod backend;

pub use backend::{ApiError, Backend, BackendConfig, CommandKind, DeviceInfo, HttpBackend, RemoteCommand};

use crate::capabilities::DeviceCapabilities;
use crate::clock::SharedClock;
use crate::collector::types::{ActivityRecord, RecordPayload};
use crate::policy::PolicyConfig;
use crate::queue::LocalQueue;
use crate::state::{lock_state, SharedState};
use crate::stats::SharedStats;
use crate::store::{keys, Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sync manager errors.
#[derive(Debug)]
pub enum SyncError {
    /// Device registration has not completed yet.
    NotRegistered,
    Api(ApiError),
    Store(StoreError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotRegistered => write!(f, "device is not registered"),
            SyncError::Api(e) => write!(f, "{e}"),
            SyncError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        SyncError::Api(e)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

/// Capped exponential backoff over consecutive failed upload cycles.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    consecutive_failures: u32,
    next_attempt: Option<DateTime<Utc>>,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            consecutive_failures: 0,
            next_attempt: None,
        }
    }

    /// Whether a cycle may run at `now`.
    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt.map_or(true, |next| now >= next)
    }

    /// Whether a failed cycle has armed a delay.
    pub fn pending(&self) -> bool {
        self.next_attempt.is_some()
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_attempt = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_attempt = Some(now + self.delay());
    }

    /// Current delay: base * 2^(failures-1), capped.
    pub fn delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::zero();
        }
        let exp = self.consecutive_failures.saturating_sub(1).min(16);
        let millis = self
            .base
            .num_milliseconds()
            .saturating_mul(1i64 << exp);
        Duration::milliseconds(millis.min(self.cap.num_milliseconds()))
    }
}

/// Result of one upload cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// Cycle skipped because backoff has not elapsed.
    pub skipped: bool,
    pub batches_sent: u32,
    pub records_sent: u64,
    pub batches_failed: u32,
}

/// Host name used for both the generated device id and the registration
/// payload.
fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "device".to_string())
}

/// Drives upload, pull, urgent-send and heartbeat against the backend.
pub struct SyncManager {
    backend: Arc<dyn Backend>,
    store: Store,
    queue: LocalQueue,
    state: SharedState,
    clock: SharedClock,
    caps: Arc<dyn DeviceCapabilities>,
    stats: SharedStats,
    backoff: Mutex<Backoff>,
}

impl SyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Store,
        queue: LocalQueue,
        state: SharedState,
        clock: SharedClock,
        caps: Arc<dyn DeviceCapabilities>,
        stats: SharedStats,
        backoff: Backoff,
    ) -> Self {
        Self {
            backend,
            store,
            queue,
            state,
            clock,
            caps,
            stats,
            backoff: Mutex::new(backoff),
        }
    }

    fn backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stable device id, created and persisted on first use.
    pub fn device_id(&self) -> Result<String, SyncError> {
        self.device_id_with_host(&host_name())
    }

    fn device_id_with_host(&self, host: &str) -> Result<String, SyncError> {
        if let Some(id) = self.store.get::<String>(keys::DEVICE_ID)? {
            return Ok(id);
        }
        let id = format!("{host}-{}", &Uuid::new_v4().to_string()[..8]);
        self.store.put(keys::DEVICE_ID, &id)?;
        Ok(id)
    }

    fn child_id(&self) -> Result<String, SyncError> {
        self.store
            .get::<String>(keys::CHILD_ID)?
            .ok_or(SyncError::NotRegistered)
    }

    /// Register the device unless a `child_id` is already persisted.
    ///
    /// Registration failure is the one user-visible error in the agent; it
    /// is returned for the caller to surface and retry.
    pub fn ensure_registered(&self) -> Result<String, SyncError> {
        if let Some(id) = self.store.get::<String>(keys::CHILD_ID)? {
            return Ok(id);
        }
        let host = host_name();
        let info = DeviceInfo::new(self.device_id_with_host(&host)?, host);
        let child_id = self.backend.register_device(&info)?;
        self.store.put(keys::CHILD_ID, &child_id)?;
        self.store.put(keys::SETUP_COMPLETE, &true)?;
        info!(child_id = %child_id, "device registered");
        Ok(child_id)
    }

    /// One upload cycle: snapshot, upload per kind, delete exactly the
    /// snapshotted keys of each acknowledged batch.
    pub fn run_upload_cycle(&self) -> Result<UploadSummary, SyncError> {
        let now = self.clock.now();
        if !self.backoff().ready(now) {
            debug!("upload cycle skipped, backing off");
            return Ok(UploadSummary {
                skipped: true,
                ..Default::default()
            });
        }
        let child_id = self.child_id()?;

        // Snapshot once; records enqueued during the round trip are not in
        // it and therefore can never be deleted by this cycle.
        let snapshot = self.queue.snapshot()?;
        let mut summary = UploadSummary::default();

        for (kind, entries) in snapshot {
            let batch_keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
            let records: Vec<ActivityRecord> = entries.into_iter().map(|(_, r)| r).collect();

            match self.backend.upload_batch(&child_id, kind, &records) {
                Ok(accepted) => {
                    if accepted != records.len() {
                        warn!(
                            kind = %kind,
                            sent = records.len(),
                            accepted,
                            "backend accepted a partial batch"
                        );
                    }
                    self.queue.remove(&batch_keys)?;
                    self.stats.record_batch_uploaded(records.len() as u64);
                    summary.batches_sent += 1;
                    summary.records_sent += records.len() as u64;
                }
                Err(e) => {
                    // Keys stay queued; the whole batch retries next cycle.
                    warn!(kind = %kind, error = %e, "batch upload failed");
                    summary.batches_failed += 1;
                }
            }
        }

        if summary.batches_failed > 0 {
            self.backoff().record_failure(now);
        } else {
            self.backoff().record_success();
        }
        Ok(summary)
    }

    /// Best-effort immediate send for a freshly queued urgent record.
    ///
    /// On success the queue key is removed so the periodic batch does not
    /// resend it; on failure the record simply stays queued.
    pub fn send_urgent(&self, queue_key: &str, record: &ActivityRecord) {
        let child_id = match self.child_id() {
            Ok(id) => id,
            Err(_) => return,
        };
        let result = match &record.payload {
            RecordPayload::Alert(alert) => self.backend.send_alert(&child_id, alert),
            _ => self
                .backend
                .upload_batch(&child_id, record.kind(), std::slice::from_ref(record))
                .map(|_| ()),
        };
        match result {
            Ok(()) => {
                if let Err(e) = self.queue.remove(&[queue_key.to_string()]) {
                    warn!(error = %e, "failed to dequeue urgently sent record");
                }
                debug!(kind = %record.kind(), "urgent record sent immediately");
            }
            Err(e) => {
                debug!(kind = %record.kind(), error = %e, "urgent send failed, record stays queued");
            }
        }
    }

    /// One pull cycle: fetch pending commands, execute and confirm each,
    /// then replace the policy config and advance the `since` mark.
    ///
    /// The `since` mark moves only after every command has been confirmed,
    /// so a failure mid-cycle re-fetches the remainder next time.
    pub fn run_pull_cycle(&self) -> Result<PolicyConfig, SyncError> {
        let child_id = self.child_id()?;
        let device_id = self.device_id()?;
        let since: Option<DateTime<Utc>> = self.store.get(keys::UPDATES_SINCE)?;
        let now = self.clock.now();

        let commands = self.backend.fetch_updates(&device_id, since)?;
        if !commands.is_empty() {
            info!(count = commands.len(), "processing remote commands");
        }
        for command in &commands {
            self.execute_command(command);
            self.backend.confirm_command(&command.id)?;
            self.stats.record_command_executed();
        }

        let policy = self.backend.fetch_policy(&child_id)?;
        {
            let mut state = lock_state(&self.state);
            state.policy = policy.clone();
            state.persist_policy(&self.store)?;
        }
        self.store.put(keys::UPDATES_SINCE, &now)?;
        Ok(policy)
    }

    /// Execute a single remote command. Execution failures are logged and
    /// the command is still confirmed; the backend sees at-most-once
    /// execution per delivery attempt.
    fn execute_command(&self, command: &RemoteCommand) {
        debug!(id = %command.id, kind = ?command.kind, "executing command");
        match command.kind {
            CommandKind::BlockApp | CommandKind::UnblockApp => {
                let Some(package) = command.data.get("package").and_then(|v| v.as_str()) else {
                    warn!(id = %command.id, "command missing package field");
                    return;
                };
                let mut state = lock_state(&self.state);
                if command.kind == CommandKind::BlockApp {
                    state.policy.blocked_apps.insert(package.to_string());
                } else {
                    state.policy.blocked_apps.remove(package);
                }
                if let Err(e) = state.persist_policy(&self.store) {
                    warn!(error = %e, "failed to persist policy after command");
                }
            }
            CommandKind::EmergencyLocation => match self.caps.current_location() {
                Ok(fix) => {
                    let record =
                        ActivityRecord::new(RecordPayload::Location(fix), self.clock.now());
                    if let Err(e) = self.queue.enqueue(record, self.clock.now()) {
                        warn!(error = %e, "failed to queue emergency location");
                    }
                }
                Err(e) => warn!(error = %e, "emergency location unavailable"),
            },
            CommandKind::WipeDevice => {
                if let Err(e) = self.caps.wipe_device() {
                    warn!(error = %e, "device wipe failed");
                }
            }
            CommandKind::TakeScreenshot => {
                if let Err(e) = self.caps.take_screenshot() {
                    warn!(error = %e, "screenshot failed");
                }
            }
            CommandKind::UpdateSettings => {
                // The policy refresh at the end of the pull cycle picks up
                // the new settings.
                debug!(id = %command.id, "settings update requested");
            }
            CommandKind::Unknown => {
                warn!(id = %command.id, "ignoring unknown command kind");
            }
        }
    }

    /// Connectivity probe; persists the heartbeat timestamp on success.
    ///
    /// A healthy response while an upload backoff is armed means the
    /// network came back: the backoff is cleared so the next cycle runs
    /// immediately instead of waiting out the delay.
    pub fn heartbeat(&self) -> Result<bool, SyncError> {
        let alive = self.backend.health()?;
        if alive {
            self.store.put(keys::LAST_HEARTBEAT_AT, &self.clock.now())?;
            let mut backoff = self.backoff();
            if backoff.pending() {
                info!("connectivity restored, clearing upload backoff");
                backoff.record_success();
            }
        }
        Ok(alive)
    }
}

/// A unit of work for the sync worker thread.
#[derive(Debug)]
pub enum SyncTask {
    /// Run one batched upload cycle.
    Upload,
    /// Fetch remote commands and the current policy.
    Pull,
    /// Probe the backend; a healthy probe with anything queued triggers an
    /// opportunistic upload cycle.
    Heartbeat,
    /// Immediately send one freshly queued urgent record.
    Urgent {
        queue_key: String,
        record: ActivityRecord,
    },
    /// Drain and exit after a final flush.
    Shutdown,
}

/// Owns the [`SyncManager`] network calls on a dedicated thread.
///
/// The scheduler submits tasks without blocking; a full channel drops the
/// task, which is safe because the periodic tasks recur and urgent records
/// stay queued for the next batch.
pub struct SyncWorker {
    tx: Sender<SyncTask>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(manager: Arc<SyncManager>) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<SyncTask>(64);
        let handle = std::thread::spawn(move || {
            for task in rx.iter() {
                match task {
                    SyncTask::Upload => Self::upload(&manager),
                    SyncTask::Pull => {
                        if let Err(e) = manager.run_pull_cycle() {
                            warn!(error = %e, "pull cycle failed");
                        }
                    }
                    SyncTask::Heartbeat => match manager.heartbeat() {
                        Ok(true) => {
                            debug!("heartbeat ok");
                            // Opportunistic: use the confirmed connectivity
                            // right away.
                            match manager.queue.is_empty() {
                                Ok(false) => Self::upload(&manager),
                                Ok(true) => {}
                                Err(e) => warn!(error = %e, "queue depth check failed"),
                            }
                        }
                        Ok(false) => warn!("backend reported unhealthy"),
                        Err(e) => debug!(error = %e, "heartbeat failed"),
                    },
                    SyncTask::Urgent { queue_key, record } => {
                        manager.send_urgent(&queue_key, &record);
                    }
                    SyncTask::Shutdown => break,
                }
            }
            // Final flush on the way out; failures leave records queued
            // for the next run.
            if let Err(e) = manager.run_upload_cycle() {
                warn!(error = %e, "final upload failed, records remain queued");
            }
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }

    fn upload(manager: &SyncManager) {
        match manager.run_upload_cycle() {
            Ok(summary) if summary.batches_sent > 0 => {
                debug!(
                    batches = summary.batches_sent,
                    records = summary.records_sent,
                    "upload cycle complete"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "upload cycle failed"),
        }
    }

    /// Hand a task to the worker without blocking the caller.
    pub fn submit(&self, task: SyncTask) {
        if self.tx.try_send(task).is_err() {
            debug!("sync worker busy, task dropped");
        }
    }

    /// Drain queued tasks, flush the queue and stop the thread.
    pub fn join(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.tx.send(SyncTask::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sync worker thread panicked");
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.finish();
    }
}
