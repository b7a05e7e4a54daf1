//! End-to-end tests for the collect -> queue -> sync pipeline using an
//! in-process fake backend and injected capabilities.

use chrono::{DateTime, Duration, TimeZone, Utc};
use guardian_agent::analyzer::ContentAnalyzer;
use guardian_agent::capabilities::NoopCapabilities;
use guardian_agent::clock::{Clock, ManualClock};
use guardian_agent::collector::types::{
    ActivityRecord, AlertEvent, CapturedText, RecordKind, RecordPayload, TextChannel,
};
use guardian_agent::collector::{Collector, SocialCollector};
use guardian_agent::policy::PolicyConfig;
use guardian_agent::queue::LocalQueue;
use guardian_agent::state::AgentState;
use guardian_agent::stats::AgentStats;
use guardian_agent::store::{keys, Store};
use guardian_agent::sync::{
    ApiError, Backend, Backoff, DeviceInfo, RemoteCommand, SyncManager,
};
use std::sync::{Arc, Mutex};

/// Fake backend: records calls, fails on demand.
#[derive(Default)]
struct FakeBackend {
    uploads: Mutex<Vec<(RecordKind, Vec<ActivityRecord>)>>,
    alerts: Mutex<Vec<AlertEvent>>,
    commands: Mutex<Vec<RemoteCommand>>,
    confirmed: Mutex<Vec<String>>,
    policy: Mutex<PolicyConfig>,
    fail_uploads: Mutex<bool>,
}

impl Backend for FakeBackend {
    fn register_device(&self, _info: &DeviceInfo) -> Result<String, ApiError> {
        Ok("child-42".to_string())
    }

    fn upload_batch(
        &self,
        _child_id: &str,
        kind: RecordKind,
        records: &[ActivityRecord],
    ) -> Result<usize, ApiError> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(ApiError::Network("offline".into()));
        }
        self.uploads.lock().unwrap().push((kind, records.to_vec()));
        Ok(records.len())
    }

    fn send_alert(&self, _child_id: &str, alert: &AlertEvent) -> Result<(), ApiError> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(ApiError::Network("offline".into()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn fetch_updates(
        &self,
        _device_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteCommand>, ApiError> {
        Ok(std::mem::take(&mut *self.commands.lock().unwrap()))
    }

    fn confirm_command(&self, command_id: &str) -> Result<(), ApiError> {
        self.confirmed.lock().unwrap().push(command_id.to_string());
        Ok(())
    }

    fn fetch_policy(&self, _child_id: &str) -> Result<PolicyConfig, ApiError> {
        Ok(self.policy.lock().unwrap().clone())
    }

    fn health(&self) -> Result<bool, ApiError> {
        Ok(true)
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    caps: Arc<NoopCapabilities>,
    store: Store,
    queue: LocalQueue,
    clock: ManualClock,
    manager: SyncManager,
}

fn harness() -> Harness {
    let store = Store::open_in_memory().unwrap();
    let queue = LocalQueue::new(store.clone());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap());
    let backend = Arc::new(FakeBackend::default());
    let caps = Arc::new(NoopCapabilities::new());
    let state = AgentState::load(&store, clock.today()).unwrap().into_shared();

    let manager = SyncManager::new(
        backend.clone(),
        store.clone(),
        queue.clone(),
        state,
        Arc::new(clock.clone()),
        caps.clone(),
        Arc::new(AgentStats::new()),
        Backoff::new(Duration::seconds(60), Duration::minutes(15)),
    );
    Harness {
        backend,
        caps,
        store,
        queue,
        clock,
        manager,
    }
}

fn captured(text: &str, at: DateTime<Utc>) -> CapturedText {
    CapturedText {
        channel: TextChannel::Social,
        source_app: "com.example.chat".into(),
        sender: Some("friend".into()),
        text: text.into(),
        captured_at: at,
    }
}

#[test]
fn test_collect_enqueue_sync_roundtrip() {
    let h = harness();
    h.manager.ensure_registered().unwrap();

    // Two messages arrive on the platform text channel.
    let now = h.clock.now();
    h.caps.push_text(captured("see you after school", now));
    h.caps.push_text(captured("bring your homework", now));

    let mut collector = SocialCollector::new(std::time::Duration::from_secs(60));
    let records = collector.poll(h.caps.as_ref(), now).unwrap();
    assert_eq!(records.len(), 2);

    for record in &records {
        h.queue.enqueue(record.clone(), now).unwrap();
    }
    assert_eq!(h.queue.len().unwrap(), 2);

    let summary = h.manager.run_upload_cycle().unwrap();
    assert_eq!(summary.records_sent, 2);
    assert!(h.queue.is_empty().unwrap());

    let uploads = h.backend.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, RecordKind::Social);
}

#[test]
fn test_offline_records_survive_and_resend() {
    let h = harness();
    h.manager.ensure_registered().unwrap();
    *h.backend.fail_uploads.lock().unwrap() = true;

    let now = h.clock.now();
    h.caps.push_text(captured("first", now));
    let mut collector = SocialCollector::new(std::time::Duration::from_secs(60));
    for record in collector.poll(h.caps.as_ref(), now).unwrap() {
        h.queue.enqueue(record, now).unwrap();
    }

    let summary = h.manager.run_upload_cycle().unwrap();
    assert_eq!(summary.batches_failed, 1);
    assert_eq!(h.queue.len().unwrap(), 1);

    // A record captured while offline joins the retry.
    h.caps.push_text(captured("second", now));
    for record in collector.poll(h.caps.as_ref(), now).unwrap() {
        h.queue.enqueue(record, now).unwrap();
    }

    *h.backend.fail_uploads.lock().unwrap() = false;
    h.clock.advance(Duration::minutes(2));
    let summary = h.manager.run_upload_cycle().unwrap();
    assert_eq!(summary.records_sent, 2);
    assert!(h.queue.is_empty().unwrap());
}

#[test]
fn test_risky_text_produces_urgent_alert() {
    let h = harness();
    h.manager.ensure_registered().unwrap();

    let now = h.clock.now();
    let analyzer = ContentAnalyzer::new();
    let alert = analyzer
        .alert_for(&captured("I want to kill myself", now), now)
        .expect("high-risk text must raise an alert");

    let record = ActivityRecord::new(RecordPayload::Alert(alert), now);
    let key = h.queue.enqueue(record.clone(), now).unwrap();
    h.manager.send_urgent(&key, &record);

    // Sent the moment it was captured, nothing left for the batch cycle.
    assert_eq!(h.backend.alerts.lock().unwrap().len(), 1);
    assert!(h.queue.is_empty().unwrap());
}

#[test]
fn test_urgent_alert_falls_back_to_batch_when_offline() {
    let h = harness();
    h.manager.ensure_registered().unwrap();
    *h.backend.fail_uploads.lock().unwrap() = true;

    let now = h.clock.now();
    let analyzer = ContentAnalyzer::new();
    let alert = analyzer
        .alert_for(&captured("meet me alone, it's our secret", now), now)
        .unwrap();
    let record = ActivityRecord::new(RecordPayload::Alert(alert), now);
    let key = h.queue.enqueue(record.clone(), now).unwrap();
    h.manager.send_urgent(&key, &record);
    assert_eq!(h.queue.len().unwrap(), 1);

    *h.backend.fail_uploads.lock().unwrap() = false;
    h.clock.advance(Duration::minutes(2));
    let summary = h.manager.run_upload_cycle().unwrap();
    assert_eq!(summary.records_sent, 1);
    assert_eq!(h.backend.uploads.lock().unwrap()[0].0, RecordKind::Alert);
}

#[test]
fn test_pull_cycle_applies_remote_block_command() {
    let h = harness();
    h.manager.ensure_registered().unwrap();

    h.backend.commands.lock().unwrap().push(RemoteCommand {
        id: "cmd-1".into(),
        kind: guardian_agent::sync::CommandKind::BlockApp,
        data: serde_json::json!({"package": "com.example.game"}),
    });
    {
        let mut policy = h.backend.policy.lock().unwrap();
        policy.daily_limits.insert("com.example.video".into(), 30);
    }

    let policy = h.manager.run_pull_cycle().unwrap();
    assert_eq!(h.backend.confirmed.lock().unwrap().as_slice(), ["cmd-1"]);
    assert_eq!(policy.daily_limits.get("com.example.video"), Some(&30));

    // The persisted policy survives a restart.
    let stored: PolicyConfig = h.store.get(keys::POLICY_CONFIG).unwrap().unwrap();
    assert_eq!(stored.daily_limits.get("com.example.video"), Some(&30));

    // Commands already confirmed are not re-fetched next cycle.
    h.manager.run_pull_cycle().unwrap();
    assert_eq!(h.backend.confirmed.lock().unwrap().len(), 1);
}

#[test]
fn test_registration_persists_across_managers() {
    let h = harness();
    let child_id = h.manager.ensure_registered().unwrap();
    assert_eq!(child_id, "child-42");
    assert_eq!(
        h.store.get::<String>(keys::CHILD_ID).unwrap().as_deref(),
        Some("child-42")
    );
    assert_eq!(h.store.get::<bool>(keys::SETUP_COMPLETE).unwrap(), Some(true));

    let device_id = h.manager.device_id().unwrap();
    assert_eq!(h.manager.device_id().unwrap(), device_id);
}
