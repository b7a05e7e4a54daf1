//! Contact list collector.

use crate::capabilities::DeviceCapabilities;
use crate::collector::types::{ActivityRecord, ContactEntry, RecordPayload};
use crate::collector::{CollectError, Collector};
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

/// Syncs the address book, emitting only contacts not seen before.
///
/// The marker is a fingerprint set of name|number pairs, so edits to a
/// contact's number re-emit it.
pub struct ContactCollector {
    store: Store,
    interval: Duration,
}

impl ContactCollector {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self { store, interval }
    }

    fn marker_key() -> String {
        format!("{}contacts", keys::MARKER_PREFIX)
    }

    fn seen(&self) -> Result<BTreeSet<String>, CollectError> {
        Ok(self.store.get(&Self::marker_key())?.unwrap_or_default())
    }

    fn fingerprint(contact: &ContactEntry) -> String {
        format!("{}|{}", contact.name, contact.number)
    }
}

impl Collector for ContactCollector {
    fn name(&self) -> &'static str {
        "contacts"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError> {
        let seen = self.seen()?;
        let records = caps
            .contacts()?
            .into_iter()
            .filter(|c| !seen.contains(&Self::fingerprint(c)))
            .map(|c| ActivityRecord::new(RecordPayload::Contact(c), now))
            .collect();
        Ok(records)
    }

    fn acknowledge(&mut self, records: &[ActivityRecord]) -> Result<(), CollectError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut seen = self.seen()?;
        for record in records {
            if let RecordPayload::Contact(c) = &record.payload {
                seen.insert(Self::fingerprint(c));
            }
        }
        self.store.put(&Self::marker_key(), &seen)?;
        Ok(())
    }
}
