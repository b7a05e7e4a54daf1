//! Guardian Agent - on-device monitoring agent for family safety.
//!
//! The agent collects device activity (calls, location, app usage,
//! contacts, captured text), evaluates parental policy locally, scans
//! captured text for risk signals, watches for tampering, and syncs
//! everything to a monitoring backend with at-least-once delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Guardian Agent                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────┐          │
//! │  │ Collectors │──▶│   Local    │──▶│ Sync Manager │──▶ API   │
//! │  │ (periodic) │   │   Queue    │   │  (batched)   │          │
//! │  └────────────┘   └────────────┘   └──────────────┘          │
//! │        │               ▲                   │                 │
//! │        ▼               │                   ▼                 │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────┐          │
//! │  │  Analyzer  │   │   Tamper   │   │ Policy Engine│          │
//! │  │  (content) │   │  Detector  │   │  (2s tick)   │          │
//! │  └────────────┘   └────────────┘   └──────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Durability rule: every record is written to the local queue before any
//! network send, and queue entries are deleted only for batches the
//! backend acknowledged. Duplicates from retries are resolved server-side
//! by record id.
//!
//! Network calls run on a dedicated sync worker thread, so the scheduler
//! loop (and with it the policy tick) never waits on a round trip.

pub mod agent;
pub mod analyzer;
pub mod capabilities;
pub mod clock;
pub mod collector;
pub mod config;
pub mod policy;
pub mod queue;
pub mod state;
pub mod stats;
pub mod store;
pub mod sync;
pub mod tamper;

#[cfg(test)]
mod testutil;

// Re-export key types at crate root for convenience
pub use agent::{Agent, AgentError};
pub use analyzer::ContentAnalyzer;
pub use capabilities::{CapabilityError, DeviceCapabilities, NoopCapabilities};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collector::{ActivityRecord, Collector, RecordKind};
pub use config::{AgentConfig, ConfigError};
pub use policy::{Decision, PolicyConfig, PolicyEngine, TimeWindow, UsageTimer};
pub use queue::LocalQueue;
pub use state::{AgentState, SharedState};
pub use store::Store;
pub use sync::{Backend, BackendConfig, HttpBackend, SyncManager, SyncTask, SyncWorker};
pub use tamper::{MonitoringState, RecoveryPolicy, TamperDetector};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
