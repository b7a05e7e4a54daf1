//! Typed monitoring events produced by collectors.
//!
//! An [`ActivityRecord`] is immutable once created: a collector builds it,
//! the local queue holds it, and the sync manager deletes it only after the
//! backend has acknowledged the batch that contained it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application identifier (package / bundle id).
pub type AppId = String;

/// Classification of a captured record, used for batch grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Call,
    Location,
    AppUsage,
    Contact,
    Social,
    Notification,
    Alert,
    SecurityEvent,
    ControlEvent,
}

impl RecordKind {
    /// Path segment of the backend batch endpoint for this kind.
    pub fn endpoint(&self) -> &'static str {
        match self {
            RecordKind::Call => "calls",
            RecordKind::Location => "location",
            RecordKind::AppUsage => "apps",
            RecordKind::Contact => "contacts",
            RecordKind::Social => "social-media",
            RecordKind::Notification => "sms",
            RecordKind::Alert => "alerts",
            RecordKind::SecurityEvent => "security-events",
            RecordKind::ControlEvent => "control-events",
        }
    }

    /// Whether records of this kind also take the urgent send path.
    pub fn is_urgent(&self) -> bool {
        matches!(self, RecordKind::Alert | RecordKind::SecurityEvent)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// Call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// A single call log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEntry {
    pub direction: CallDirection,
    pub contact: String,
    pub number: String,
    pub duration_secs: u32,
    /// answered, missed or rejected
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

/// A GPS fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy_m: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub fixed_at: DateTime<Utc>,
}

/// Foreground usage sample for one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsageSample {
    pub app: AppId,
    pub name: String,
    pub foreground_ms: u64,
    pub launches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// An address book entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub name: String,
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// Where a captured text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextChannel {
    /// In-app social media content (accessibility capture).
    Social,
    /// Notification text (notification listener).
    Notification,
}

/// A piece of text captured from a social app or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedText {
    pub channel: TextChannel,
    pub source_app: AppId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

/// Severity attached to alerts and tamper events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Classification of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A risk keyword matched in captured text.
    ContentRisk,
    /// A bullying phrase matched in captured text.
    Bullying,
    /// Raised by the tamper detector for critical findings.
    Tamper,
}

/// High-urgency signal sent immediately in addition to normal queuing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    /// Terms that triggered a content alert, empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_terms: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Kinds of integrity violations the tamper detector reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperKind {
    AppModified,
    DebuggingDetected,
    UninstallAttempt,
    RootDetected,
}

impl TamperKind {
    /// Fixed severity table. Severity is a pure function of the kind.
    pub fn severity(&self) -> Severity {
        match self {
            TamperKind::AppModified => Severity::High,
            TamperKind::DebuggingDetected => Severity::Medium,
            TamperKind::UninstallAttempt => Severity::High,
            TamperKind::RootDetected => Severity::Critical,
        }
    }
}

/// A detected integrity/security violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperEvent {
    pub kind: TamperKind,
    pub severity: Severity,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

impl TamperEvent {
    pub fn new(kind: TamperKind, detail: impl Into<String>, detected_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            detail: detail.into(),
            detected_at,
        }
    }
}

/// A policy enforcement event (app block decision applied on device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub app: AppId,
    /// blocklist, time_restricted or limit_exceeded
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Typed payload of an activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordPayload {
    Call(CallEntry),
    Location(LocationFix),
    AppUsage(AppUsageSample),
    Contact(ContactEntry),
    Text(CapturedText),
    Alert(AlertEvent),
    Tamper(TamperEvent),
    Control(ControlEvent),
}

impl RecordPayload {
    /// The record kind this payload belongs to.
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::Call(_) => RecordKind::Call,
            RecordPayload::Location(_) => RecordKind::Location,
            RecordPayload::AppUsage(_) => RecordKind::AppUsage,
            RecordPayload::Contact(_) => RecordKind::Contact,
            RecordPayload::Text(t) => match t.channel {
                TextChannel::Social => RecordKind::Social,
                TextChannel::Notification => RecordKind::Notification,
            },
            RecordPayload::Alert(_) => RecordKind::Alert,
            RecordPayload::Tamper(_) => RecordKind::SecurityEvent,
            RecordPayload::Control(_) => RecordKind::ControlEvent,
        }
    }
}

/// One captured monitoring event, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Stable id used by the backend for deduplication on resend.
    pub id: Uuid,
    pub payload: RecordPayload,
    /// App the payload originated from, when meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_app: Option<AppId>,
    pub captured_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(payload: RecordPayload, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            source_app: None,
            captured_at,
        }
    }

    pub fn with_source(mut self, app: impl Into<AppId>) -> Self {
        self.source_app = Some(app.into());
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tamper_severity_table() {
        assert_eq!(TamperKind::AppModified.severity(), Severity::High);
        assert_eq!(TamperKind::DebuggingDetected.severity(), Severity::Medium);
        assert_eq!(TamperKind::UninstallAttempt.severity(), Severity::High);
        assert_eq!(TamperKind::RootDetected.severity(), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_text_channel_maps_to_kind() {
        let social = RecordPayload::Text(CapturedText {
            channel: TextChannel::Social,
            source_app: "com.example.chat".into(),
            sender: None,
            text: "hi".into(),
            captured_at: Utc::now(),
        });
        assert_eq!(social.kind(), RecordKind::Social);

        let notification = RecordPayload::Text(CapturedText {
            channel: TextChannel::Notification,
            source_app: "com.example.sms".into(),
            sender: Some("Mom".into()),
            text: "dinner".into(),
            captured_at: Utc::now(),
        });
        assert_eq!(notification.kind(), RecordKind::Notification);
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let record = ActivityRecord::new(
            RecordPayload::Call(CallEntry {
                direction: CallDirection::Incoming,
                contact: "Alice".into(),
                number: "+15550100".into(),
                duration_secs: 42,
                status: "answered".into(),
                occurred_at: Utc::now(),
            }),
            Utc::now(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.kind(), RecordKind::Call);
    }
}
