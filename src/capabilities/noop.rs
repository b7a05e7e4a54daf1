//! No-op capability backend.
//!
//! This exists so the agent (and binary) can compile and run on hosts with
//! no sensor access. Sensors report nothing, integrity probes report clean,
//! and admin actions succeed without doing anything.

use crate::capabilities::{CapabilityError, DeviceCapabilities};
use crate::collector::types::{
    AppId, AppUsageSample, CallEntry, CapturedText, ContactEntry, LocationFix,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};

/// A capability backend that never produces events.
pub struct NoopCapabilities {
    // Held so subscribers see an open-but-silent channel rather than a
    // disconnect.
    text_sender: Sender<CapturedText>,
    text_receiver: Receiver<CapturedText>,
}

impl NoopCapabilities {
    pub fn new() -> Self {
        let (text_sender, text_receiver) = bounded(1024);
        Self {
            text_sender,
            text_receiver,
        }
    }

    /// Inject a captured text, used by demos and tests.
    pub fn push_text(&self, text: CapturedText) {
        let _ = self.text_sender.try_send(text);
    }
}

impl Default for NoopCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCapabilities for NoopCapabilities {
    fn calls_since(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallEntry>, CapabilityError> {
        Ok(Vec::new())
    }

    fn current_location(&self) -> Result<LocationFix, CapabilityError> {
        Err(CapabilityError::Unsupported("location"))
    }

    fn app_usage_today(&self) -> Result<Vec<AppUsageSample>, CapabilityError> {
        Ok(Vec::new())
    }

    fn contacts(&self) -> Result<Vec<ContactEntry>, CapabilityError> {
        Ok(Vec::new())
    }

    fn foreground_app(&self) -> Result<Option<AppId>, CapabilityError> {
        Ok(None)
    }

    fn subscribe_captured_text(&self) -> Result<Receiver<CapturedText>, CapabilityError> {
        Ok(self.text_receiver.clone())
    }

    fn set_icon_hidden(&self, _hidden: bool) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn lock_device(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn wipe_device(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn take_screenshot(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported("screenshot"))
    }

    fn app_integrity_ok(&self) -> Result<bool, CapabilityError> {
        Ok(true)
    }

    fn debugger_attached(&self) -> Result<bool, CapabilityError> {
        Ok(false)
    }

    fn uninstall_requested(&self) -> Result<bool, CapabilityError> {
        Ok(false)
    }

    fn device_rooted(&self) -> Result<bool, CapabilityError> {
        Ok(false)
    }
}
