//! Activity collectors.
//!
//! Each collector runs on its own fixed period, reads one sensor through
//! [`DeviceCapabilities`](crate::capabilities::DeviceCapabilities), and
//! turns raw platform data into typed [`ActivityRecord`]s. Collectors
//! deduplicate against their own persisted "last seen" marker so a re-poll
//! never re-emits data the queue already committed.

pub mod apps;
pub mod calls;
pub mod contacts;
pub mod location;
pub mod social;
pub mod types;

pub use apps::AppUsageCollector;
pub use calls::CallCollector;
pub use contacts::ContactCollector;
pub use location::LocationCollector;
pub use social::SocialCollector;
pub use types::{ActivityRecord, RecordKind};

use crate::capabilities::{CapabilityError, DeviceCapabilities};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Collector errors.
#[derive(Debug)]
pub enum CollectError {
    /// The backing permission is not granted. The cycle is skipped and
    /// retried on the next period; never fatal.
    PermissionDenied,
    /// The platform capability failed for another reason.
    Capability(CapabilityError),
    /// Reading or writing the collector marker failed.
    Store(StoreError),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::PermissionDenied => write!(f, "permission denied"),
            CollectError::Capability(e) => write!(f, "capability error: {e}"),
            CollectError::Store(e) => write!(f, "marker store error: {e}"),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<CapabilityError> for CollectError {
    fn from(e: CapabilityError) -> Self {
        match e {
            CapabilityError::PermissionDenied => CollectError::PermissionDenied,
            other => CollectError::Capability(other),
        }
    }
}

impl From<StoreError> for CollectError {
    fn from(e: StoreError) -> Self {
        CollectError::Store(e)
    }
}

/// A periodic producer of activity records.
///
/// The scheduler calls [`poll`](Collector::poll), durably enqueues the
/// returned records, and only then calls
/// [`acknowledge`](Collector::acknowledge) so the dedup marker never runs
/// ahead of the queue. Zero returned records is a no-op cycle.
pub trait Collector: Send {
    /// Stable name, also used as the marker key suffix.
    fn name(&self) -> &'static str;

    /// Polling period.
    fn interval(&self) -> Duration;

    /// Read the sensor and build records for everything not yet seen.
    fn poll(
        &mut self,
        caps: &dyn DeviceCapabilities,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, CollectError>;

    /// Advance the persisted marker past the given records. Called after
    /// the records have been durably enqueued.
    fn acknowledge(&mut self, _records: &[ActivityRecord]) -> Result<(), CollectError> {
        Ok(())
    }
}
