//! Call log collector.

use crate::capabilities::DeviceCapabilities;
use crate::collector::types::{ActivityRecord, RecordPayload};
use crate::collector::{CollectError, Collector};
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Polls the call log and emits entries newer than the persisted marker.
pub struct CallCollector {
    store: Store,
    interval: Duration,
}

impl CallCollector {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self { store, interval }
    }

    fn marker_key() -> String {
        format!("{}calls", keys::MARKER_PREFIX)
    }

    fn marker(&self) -> Result<Option<DateTime<Utc>>, CollectError> {
        Ok(self.store.get(&Self::marker_key())?)
    }
}

impl Collector for CallCollector {
    fn name(&self) -> &'static str {
        "calls"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError> {
        let since = self.marker()?;
        let entries = caps.calls_since(since)?;

        let records = entries
            .into_iter()
            // The platform may return entries at exactly the marker time;
            // only strictly newer ones are unseen.
            .filter(|e| since.map_or(true, |m| e.occurred_at > m))
            .map(|entry| ActivityRecord::new(RecordPayload::Call(entry), now))
            .collect();
        Ok(records)
    }

    fn acknowledge(&mut self, records: &[ActivityRecord]) -> Result<(), CollectError> {
        let newest = records
            .iter()
            .filter_map(|r| match &r.payload {
                RecordPayload::Call(c) => Some(c.occurred_at),
                _ => None,
            })
            .max();
        if let Some(ts) = newest {
            self.store.put(&Self::marker_key(), &ts)?;
        }
        Ok(())
    }
}
