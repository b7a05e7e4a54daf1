//! App usage collector.

use crate::capabilities::DeviceCapabilities;
use crate::collector::types::{ActivityRecord, AppId, RecordPayload};
use crate::collector::{CollectError, Collector};
use crate::store::{keys, Store};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-day marker recording the usage totals already reported per app.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppsMarker {
    date: NaiveDate,
    reported_ms: BTreeMap<AppId, u64>,
}

/// Polls daily per-app foreground totals and emits a sample for every app
/// whose numbers moved since the last acknowledged poll.
pub struct AppUsageCollector {
    store: Store,
    interval: Duration,
}

impl AppUsageCollector {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self { store, interval }
    }

    fn marker_key() -> String {
        format!("{}app_usage", keys::MARKER_PREFIX)
    }

    fn marker(&self, today: NaiveDate) -> Result<AppsMarker, CollectError> {
        let stored: Option<AppsMarker> = self.store.get(&Self::marker_key())?;
        Ok(match stored {
            // Usage stats are per local day; a stale marker is discarded.
            Some(m) if m.date == today => m,
            _ => AppsMarker {
                date: today,
                reported_ms: BTreeMap::new(),
            },
        })
    }
}

impl Collector for AppUsageCollector {
    fn name(&self) -> &'static str {
        "app_usage"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError> {
        let marker = self.marker(now.date_naive())?;
        let samples = caps.app_usage_today()?;

        let records = samples
            .into_iter()
            .filter(|s| {
                marker
                    .reported_ms
                    .get(&s.app)
                    .map_or(true, |&seen| s.foreground_ms > seen)
            })
            .map(|sample| {
                let app = sample.app.clone();
                ActivityRecord::new(RecordPayload::AppUsage(sample), now).with_source(app)
            })
            .collect();
        Ok(records)
    }

    fn acknowledge(&mut self, records: &[ActivityRecord]) -> Result<(), CollectError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let mut marker = self.marker(first.captured_at.date_naive())?;
        for record in records {
            if let RecordPayload::AppUsage(sample) = &record.payload {
                marker.reported_ms.insert(sample.app.clone(), sample.foreground_ms);
            }
        }
        self.store.put(&Self::marker_key(), &marker)?;
        Ok(())
    }
}
