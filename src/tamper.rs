//! Tamper detection and defensive escalation.
//!
//! Periodic integrity sweeps probe the platform for signs the agent is
//! being disabled or inspected. Each finding maps to a fixed severity
//! (see [`TamperKind::severity`]) and drives a defensive action. A high or
//! critical finding switches the detector to heightened monitoring, which
//! shortens the sweep interval.

use crate::capabilities::DeviceCapabilities;
use crate::collector::types::{AlertEvent, AlertKind, Severity, TamperEvent, TamperKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Monitoring intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringState {
    Normal,
    Heightened,
}

/// When (if ever) to leave heightened monitoring.
///
/// The return path is deliberately explicit configuration: `Never` keeps
/// permanent vigilance after any high-severity finding, `AfterQuietSweeps`
/// drops back to normal once that many consecutive sweeps found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    Never,
    AfterQuietSweeps(u32),
}

/// Everything one sweep produced. The caller queues the events, sends the
/// alerts urgently, and reschedules using [`TamperDetector::check_interval`].
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub events: Vec<TamperEvent>,
    pub alerts: Vec<AlertEvent>,
}

/// Periodic integrity checker and defensive-action state machine.
pub struct TamperDetector {
    state: MonitoringState,
    recovery: RecoveryPolicy,
    quiet_sweeps: u32,
    normal_interval: Duration,
    heightened_interval: Duration,
}

impl TamperDetector {
    pub fn new(
        recovery: RecoveryPolicy,
        normal_interval: Duration,
        heightened_interval: Duration,
    ) -> Self {
        Self {
            state: MonitoringState::Normal,
            recovery,
            quiet_sweeps: 0,
            normal_interval,
            heightened_interval,
        }
    }

    pub fn state(&self) -> MonitoringState {
        self.state
    }

    /// Interval until the next sweep, shorter while heightened.
    pub fn check_interval(&self) -> Duration {
        match self.state {
            MonitoringState::Normal => self.normal_interval,
            MonitoringState::Heightened => self.heightened_interval,
        }
    }

    /// Run all integrity probes once.
    ///
    /// A failed probe is logged and does not halt the rest of the sweep.
    pub fn sweep(&mut self, caps: &dyn DeviceCapabilities, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        self.probe(
            caps.app_integrity_ok().map(|ok| !ok),
            TamperKind::AppModified,
            "app signature does not match expected value",
            caps,
            now,
            &mut outcome,
        );
        self.probe(
            caps.debugger_attached(),
            TamperKind::DebuggingDetected,
            "debugger attached to agent process",
            caps,
            now,
            &mut outcome,
        );
        self.probe(
            caps.uninstall_requested(),
            TamperKind::UninstallAttempt,
            "uninstall flow opened for agent package",
            caps,
            now,
            &mut outcome,
        );
        self.probe(
            caps.device_rooted(),
            TamperKind::RootDetected,
            "device is rooted",
            caps,
            now,
            &mut outcome,
        );

        if outcome.events.is_empty() {
            self.record_quiet_sweep();
        } else {
            self.quiet_sweeps = 0;
        }

        outcome
    }

    fn probe(
        &mut self,
        result: Result<bool, crate::capabilities::CapabilityError>,
        kind: TamperKind,
        detail: &str,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
        outcome: &mut SweepOutcome,
    ) {
        match result {
            Ok(true) => {
                let event = TamperEvent::new(kind, detail, now);
                self.dispatch(&event, caps, now, outcome);
                outcome.events.push(event);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(check = ?kind, error = %e, "tamper check failed");
            }
        }
    }

    /// Defensive action by severity.
    fn dispatch(
        &mut self,
        event: &TamperEvent,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
        outcome: &mut SweepOutcome,
    ) {
        match event.severity {
            Severity::Critical => {
                warn!(kind = ?event.kind, "critical tamper finding, locking device");
                if let Err(e) = caps.lock_device() {
                    error!(error = %e, "device lockdown failed");
                }
                outcome.alerts.push(AlertEvent {
                    kind: AlertKind::Tamper,
                    severity: Severity::Critical,
                    title: "Device integrity compromised".to_string(),
                    detail: event.detail.clone(),
                    matched_terms: Vec::new(),
                    created_at: now,
                });
                self.enter_heightened();
            }
            Severity::High => {
                warn!(kind = ?event.kind, "high tamper finding, strengthening concealment");
                if let Err(e) = caps.set_icon_hidden(true) {
                    error!(error = %e, "icon hiding failed");
                }
                self.enter_heightened();
            }
            Severity::Medium | Severity::Low => {
                info!(kind = ?event.kind, severity = %event.severity, "tamper finding logged");
            }
        }
    }

    fn enter_heightened(&mut self) {
        if self.state != MonitoringState::Heightened {
            info!("entering heightened monitoring");
        }
        self.state = MonitoringState::Heightened;
        self.quiet_sweeps = 0;
    }

    fn record_quiet_sweep(&mut self) {
        if self.state != MonitoringState::Heightened {
            return;
        }
        self.quiet_sweeps += 1;
        if let RecoveryPolicy::AfterQuietSweeps(required) = self.recovery {
            if self.quiet_sweeps >= required {
                info!(
                    quiet_sweeps = self.quiet_sweeps,
                    "returning to normal monitoring"
                );
                self.state = MonitoringState::Normal;
                self.quiet_sweeps = 0;
            }
        }
    }
}
