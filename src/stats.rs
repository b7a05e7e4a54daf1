//! Session counters.
//!
//! Tracks what the agent has collected and shipped, without holding any
//! captured content. Persisted as JSON so `guardian-agent status` can show
//! cumulative numbers across sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Counters for the running agent.
#[derive(Debug)]
pub struct AgentStats {
    records_collected: AtomicU64,
    batches_uploaded: AtomicU64,
    records_uploaded: AtomicU64,
    alerts_raised: AtomicU64,
    tamper_events: AtomicU64,
    commands_executed: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            records_collected: AtomicU64::new(0),
            batches_uploaded: AtomicU64::new(0),
            records_uploaded: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            tamper_events: AtomicU64::new(0),
            commands_executed: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Stats that load from and save to the given JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);
        if let Err(e) = stats.load() {
            debug!(error = %e, "no previous stats loaded");
        }
        stats
    }

    pub fn record_collected(&self, count: u64) {
        self.records_collected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_uploaded(&self, records: u64) {
        self.batches_uploaded.fetch_add(1, Ordering::Relaxed);
        self.records_uploaded.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tamper_event(&self) {
        self.tamper_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_collected: self.records_collected.load(Ordering::Relaxed),
            batches_uploaded: self.batches_uploaded.load(Ordering::Relaxed),
            records_uploaded: self.records_uploaded.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            tamper_events: self.tamper_events.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            session_start: self.session_start,
        }
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&self.snapshot())
                .map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let snapshot: StatsSnapshot =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.records_collected
                    .store(snapshot.records_collected, Ordering::Relaxed);
                self.batches_uploaded
                    .store(snapshot.batches_uploaded, Ordering::Relaxed);
                self.records_uploaded
                    .store(snapshot.records_uploaded, Ordering::Relaxed);
                self.alerts_raised
                    .store(snapshot.alerts_raised, Ordering::Relaxed);
                self.tamper_events
                    .store(snapshot.tamper_events, Ordering::Relaxed);
                self.commands_executed
                    .store(snapshot.commands_executed, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared stats handle.
pub type SharedStats = Arc<AgentStats>;

/// Point-in-time snapshot of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub records_collected: u64,
    pub batches_uploaded: u64,
    pub records_uploaded: u64,
    pub alerts_raised: u64,
    pub tamper_events: u64,
    pub commands_executed: u64,
    pub session_start: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Human-readable session summary for the CLI.
    pub fn summary(&self) -> String {
        format!(
            "Session since {}: {} records collected, {} uploaded in {} batches, \
             {} alerts, {} tamper events, {} commands executed",
            self.session_start.format("%Y-%m-%d %H:%M:%S UTC"),
            self.records_collected,
            self.records_uploaded,
            self.batches_uploaded,
            self.alerts_raised,
            self.tamper_events,
            self.commands_executed,
        )
    }
}
