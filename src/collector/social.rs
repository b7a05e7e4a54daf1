//! Social media / notification text collector.
//!
//! Unlike the polling collectors, capture here is event-driven: the
//! platform pushes [`CapturedText`] events into a bounded channel as they
//! happen, and this collector drains the channel on its flush interval.
//! The channel itself is the dedup boundary; no marker is needed.

use crate::capabilities::DeviceCapabilities;
use crate::collector::types::{ActivityRecord, CapturedText, RecordPayload};
use crate::collector::{CollectError, Collector};
use crossbeam_channel::Receiver;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Drains captured social/notification text on a flush period.
pub struct SocialCollector {
    interval: Duration,
    receiver: Option<Receiver<CapturedText>>,
}

impl SocialCollector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            receiver: None,
        }
    }
}

impl Collector for SocialCollector {
    fn name(&self) -> &'static str {
        "social"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError> {
        // Subscribe lazily on the first cycle; the subscription lives for
        // the life of the collector.
        if self.receiver.is_none() {
            self.receiver = Some(caps.subscribe_captured_text()?);
        }
        let receiver = self.receiver.as_ref().expect("subscribed above");

        let mut records = Vec::new();
        while let Ok(text) = receiver.try_recv() {
            let source = text.source_app.clone();
            records.push(ActivityRecord::new(RecordPayload::Text(text), now).with_source(source));
        }
        Ok(records)
    }
}
