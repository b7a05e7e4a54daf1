//! Scheduler-loop timing: network round trips run on the sync worker
//! thread, so a slow or offline backend must not delay policy evaluation.

use chrono::{DateTime, Utc};
use guardian_agent::capabilities::{CapabilityError, DeviceCapabilities, NoopCapabilities};
use guardian_agent::clock::SystemClock;
use guardian_agent::collector::types::{
    ActivityRecord, AlertEvent, AppId, AppUsageSample, CallEntry, CapturedText, ContactEntry,
    ControlEvent, LocationFix, RecordKind, RecordPayload,
};
use guardian_agent::policy::PolicyConfig;
use guardian_agent::queue::LocalQueue;
use guardian_agent::store::{keys, Store};
use guardian_agent::sync::{ApiError, Backend, DeviceInfo, RemoteCommand};
use guardian_agent::{Agent, AgentConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that holds every upload for two seconds and then fails, the
/// shape of an unreachable server with a long request timeout.
#[derive(Default)]
struct StallingBackend {
    upload_attempts: AtomicU32,
}

impl Backend for StallingBackend {
    fn register_device(&self, _info: &DeviceInfo) -> Result<String, ApiError> {
        Ok("child-7".to_string())
    }

    fn upload_batch(
        &self,
        _child_id: &str,
        _kind: RecordKind,
        _records: &[ActivityRecord],
    ) -> Result<usize, ApiError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_secs(2));
        Err(ApiError::Network("request timed out".into()))
    }

    fn send_alert(&self, _child_id: &str, _alert: &AlertEvent) -> Result<(), ApiError> {
        std::thread::sleep(Duration::from_secs(2));
        Err(ApiError::Network("request timed out".into()))
    }

    fn fetch_updates(
        &self,
        _device_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteCommand>, ApiError> {
        Ok(Vec::new())
    }

    fn confirm_command(&self, _command_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    fn fetch_policy(&self, _child_id: &str) -> Result<PolicyConfig, ApiError> {
        Ok(PolicyConfig::default())
    }

    fn health(&self) -> Result<bool, ApiError> {
        Ok(true)
    }
}

/// Quiet capabilities that count foreground-app lookups, one per policy
/// evaluation.
struct CountingCaps {
    inner: NoopCapabilities,
    foreground_lookups: AtomicU32,
}

impl CountingCaps {
    fn new() -> Self {
        Self {
            inner: NoopCapabilities::new(),
            foreground_lookups: AtomicU32::new(0),
        }
    }

    fn lookups(&self) -> u32 {
        self.foreground_lookups.load(Ordering::SeqCst)
    }
}

impl DeviceCapabilities for CountingCaps {
    fn calls_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallEntry>, CapabilityError> {
        self.inner.calls_since(since)
    }

    fn current_location(&self) -> Result<LocationFix, CapabilityError> {
        self.inner.current_location()
    }

    fn app_usage_today(&self) -> Result<Vec<AppUsageSample>, CapabilityError> {
        self.inner.app_usage_today()
    }

    fn contacts(&self) -> Result<Vec<ContactEntry>, CapabilityError> {
        self.inner.contacts()
    }

    fn foreground_app(&self) -> Result<Option<AppId>, CapabilityError> {
        self.foreground_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Some("com.example.game".into()))
    }

    fn subscribe_captured_text(
        &self,
    ) -> Result<crossbeam_channel::Receiver<CapturedText>, CapabilityError> {
        self.inner.subscribe_captured_text()
    }

    fn set_icon_hidden(&self, hidden: bool) -> Result<(), CapabilityError> {
        self.inner.set_icon_hidden(hidden)
    }

    fn lock_device(&self) -> Result<(), CapabilityError> {
        self.inner.lock_device()
    }

    fn wipe_device(&self) -> Result<(), CapabilityError> {
        self.inner.wipe_device()
    }

    fn take_screenshot(&self) -> Result<(), CapabilityError> {
        self.inner.take_screenshot()
    }

    fn app_integrity_ok(&self) -> Result<bool, CapabilityError> {
        self.inner.app_integrity_ok()
    }

    fn debugger_attached(&self) -> Result<bool, CapabilityError> {
        self.inner.debugger_attached()
    }

    fn uninstall_requested(&self) -> Result<bool, CapabilityError> {
        self.inner.uninstall_requested()
    }

    fn device_rooted(&self) -> Result<bool, CapabilityError> {
        self.inner.device_rooted()
    }
}

fn quiet_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.backend_url = "https://dashboard.example.com/api".into();
    config.data_path =
        std::env::temp_dir().join(format!("guardian-scheduler-{}", uuid::Uuid::new_v4()));
    config.intervals.policy_tick_secs = 1;
    config.intervals.sync_secs = 1;
    // Keep everything else out of the way.
    config.intervals.calls_secs = 3600;
    config.intervals.location_secs = 3600;
    config.intervals.apps_secs = 3600;
    config.intervals.contacts_secs = 3600;
    config.intervals.social_flush_secs = 3600;
    config.intervals.pull_secs = 3600;
    config.intervals.heartbeat_secs = 3600;
    config.intervals.tamper_normal_secs = 3600;
    config.intervals.tamper_heightened_secs = 3600;
    config.backoff_base_secs = 1;
    config.backoff_cap_secs = 1;
    config
}

#[test]
fn test_policy_tick_keeps_pace_while_uploads_stall() {
    let store = Store::open_in_memory().unwrap();
    store.put(keys::CHILD_ID, &"child-7".to_string()).unwrap();

    // A record that keeps the upload path busy for the whole run.
    let queue = LocalQueue::new(store.clone());
    let now = Utc::now();
    queue
        .enqueue(
            ActivityRecord::new(
                RecordPayload::Control(ControlEvent {
                    app: "com.example.game".into(),
                    reason: "blocklist".into(),
                    occurred_at: now,
                }),
                now,
            ),
            now,
        )
        .unwrap();

    let backend = Arc::new(StallingBackend::default());
    let caps = Arc::new(CountingCaps::new());
    let mut agent = Agent::new(
        quiet_config(),
        store,
        backend.clone(),
        caps.clone(),
        Arc::new(SystemClock),
    )
    .unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let stopper = running.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(6));
        stopper.store(false, Ordering::SeqCst);
    });
    agent.run(running);
    agent.shutdown();

    // The upload path really was stalling in two-second requests.
    assert!(
        backend.upload_attempts.load(Ordering::SeqCst) >= 2,
        "expected repeated upload attempts, got {}",
        backend.upload_attempts.load(Ordering::SeqCst)
    );
    // Policy evaluation ran on its one-second period regardless. An
    // evaluation loop sharing the upload thread would manage two at most.
    assert!(
        caps.lookups() >= 4,
        "policy evaluations delayed by network traffic: only {} in 6s",
        caps.lookups()
    );
}
