//! Shared test fixtures.

use crate::capabilities::{CapabilityError, DeviceCapabilities};
use crate::collector::types::{
    AppId, AppUsageSample, CallEntry, CapturedText, ContactEntry, LocationFix,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Builder for a scripted capability backend used in unit tests.
#[derive(Default)]
pub struct CapsBuilder {
    calls: Vec<CallEntry>,
    calls_error: Option<CapabilityError>,
    location: Option<LocationFix>,
    location_error: Option<CapabilityError>,
    app_usage: Vec<AppUsageSample>,
    contacts: Vec<ContactEntry>,
    foreground: Option<AppId>,
}

impl CapsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(mut self, calls: Vec<CallEntry>) -> Self {
        self.calls = calls;
        self
    }

    pub fn calls_error(mut self, error: CapabilityError) -> Self {
        self.calls_error = Some(error);
        self
    }

    pub fn location(mut self, fix: LocationFix) -> Self {
        self.location = Some(fix);
        self
    }

    pub fn location_error(mut self, error: CapabilityError) -> Self {
        self.location_error = Some(error);
        self
    }

    pub fn app_usage(mut self, samples: Vec<AppUsageSample>) -> Self {
        self.app_usage = samples;
        self
    }

    pub fn contacts(mut self, contacts: Vec<ContactEntry>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn foreground(mut self, app: &str) -> Self {
        self.foreground = Some(app.to_string());
        self
    }

    pub fn build(self) -> ScriptedCaps {
        let (text_sender, text_receiver) = bounded(1024);
        ScriptedCaps {
            calls: self.calls,
            calls_error: self.calls_error,
            location: self.location,
            location_error: self.location_error,
            app_usage: self.app_usage,
            contacts: self.contacts,
            foreground: self.foreground,
            text_sender,
            text_receiver,
        }
    }
}

/// Scripted capability backend.
pub struct ScriptedCaps {
    calls: Vec<CallEntry>,
    calls_error: Option<CapabilityError>,
    location: Option<LocationFix>,
    location_error: Option<CapabilityError>,
    app_usage: Vec<AppUsageSample>,
    contacts: Vec<ContactEntry>,
    foreground: Option<AppId>,
    text_sender: Sender<CapturedText>,
    text_receiver: Receiver<CapturedText>,
}

impl ScriptedCaps {
    /// Inject a captured text event.
    pub fn push_text(&self, text: CapturedText) {
        let _ = self.text_sender.try_send(text);
    }
}

impl DeviceCapabilities for ScriptedCaps {
    fn calls_since(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallEntry>, CapabilityError> {
        match &self.calls_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.calls.clone()),
        }
    }

    fn current_location(&self) -> Result<LocationFix, CapabilityError> {
        if let Some(e) = &self.location_error {
            return Err(e.clone());
        }
        self.location
            .clone()
            .ok_or(CapabilityError::Unsupported("location"))
    }

    fn app_usage_today(&self) -> Result<Vec<AppUsageSample>, CapabilityError> {
        Ok(self.app_usage.clone())
    }

    fn contacts(&self) -> Result<Vec<ContactEntry>, CapabilityError> {
        Ok(self.contacts.clone())
    }

    fn foreground_app(&self) -> Result<Option<AppId>, CapabilityError> {
        Ok(self.foreground.clone())
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
        Ok(())
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
