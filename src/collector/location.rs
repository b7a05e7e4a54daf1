//! Location collector.

use crate::capabilities::{CapabilityError, DeviceCapabilities};
use crate::collector::types::{ActivityRecord, RecordPayload};
use crate::collector::{CollectError, Collector};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Samples the current GPS fix on a fixed period.
///
/// No dedup marker: every cycle that yields a fix emits one record. A
/// platform without location support is a permanent no-op.
pub struct LocationCollector {
    interval: Duration,
}

impl LocationCollector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Collector for LocationCollector {
    fn name(&self) -> &'static str {
        "location"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError> {
        match caps.current_location() {
            Ok(fix) => Ok(vec![ActivityRecord::new(RecordPayload::Location(fix), now)]),
            Err(CapabilityError::Unsupported(_)) => {
                debug!("location unsupported on this platform, skipping");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{LocationFix, RecordKind};
    use crate::testutil::CapsBuilder;

    #[test]
    fn test_emits_one_record_per_fix() {
        let caps = CapsBuilder::new()
            .location(LocationFix {
                latitude: 51.5,
                longitude: -0.12,
                accuracy_m: 8,
                address: Some("London".into()),
                fixed_at: Utc::now(),
            })
            .build();
        let mut collector = LocationCollector::new(Duration::from_secs(300));
        let records = collector.poll(&caps, Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), RecordKind::Location);
    }

    #[test]
    fn test_unsupported_platform_is_noop() {
        let caps = CapsBuilder::new().build();
        let mut collector = LocationCollector::new(Duration::from_secs(300));
        assert!(collector.poll(&caps, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_permission_denied_propagates() {
        let caps = CapsBuilder::new()
            .location_error(CapabilityError::PermissionDenied)
            .build();
        let mut collector = LocationCollector::new(Duration::from_secs(300));
        assert!(matches!(
            collector.poll(&caps, Utc::now()),
            Err(CollectError::PermissionDenied)
        ));
    }
}
