//! Durable local queue of not-yet-acknowledged records.
//!
//! The queue is the crash-safety boundary: a record is committed here
//! before any network attempt, and its key is removed only after a sync
//! batch that explicitly listed that key succeeded. Queue-key deletion is
//! the sole source of truth for what still needs sending.

use crate::collector::types::{ActivityRecord, RecordKind};
use crate::store::{keys, Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A queued record together with its store key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub record: ActivityRecord,
    pub enqueued_at: DateTime<Utc>,
}

/// Snapshot of the queue at one instant, grouped by record kind.
///
/// Records enqueued after the snapshot is taken are not part of it and are
/// never deleted by the sync cycle that uploads it.
pub type QueueSnapshot = BTreeMap<RecordKind, Vec<(String, ActivityRecord)>>;

/// Durable holding area for records awaiting backend acknowledgement.
#[derive(Clone)]
pub struct LocalQueue {
    store: Store,
}

impl LocalQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Durably store a record. Returns the queue key.
    pub fn enqueue(&self, record: ActivityRecord, now: DateTime<Utc>) -> Result<String, StoreError> {
        let key = format!("{}{}/{}", keys::QUEUE_PREFIX, record.kind(), record.id);
        let entry = QueueEntry {
            record,
            enqueued_at: now,
        };
        self.store.put(&key, &entry)?;
        Ok(key)
    }

    /// Read the current queue contents grouped by kind.
    ///
    /// A stored entry that no longer parses is deleted and logged; it never
    /// blocks the rest of the batch.
    pub fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let mut grouped: QueueSnapshot = BTreeMap::new();
        for (key, json) in self.store.list_prefix(keys::QUEUE_PREFIX)? {
            match serde_json::from_str::<QueueEntry>(&json) {
                Ok(entry) => {
                    grouped
                        .entry(entry.record.kind())
                        .or_default()
                        .push((key, entry.record));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "dropping malformed queue entry");
                    self.store.delete(&key)?;
                }
            }
        }
        Ok(grouped)
    }

    /// Delete exactly the given keys in one transaction.
    pub fn remove(&self, queue_keys: &[String]) -> Result<(), StoreError> {
        self.store.delete_many(queue_keys)
    }

    /// Number of records currently queued.
    pub fn len(&self) -> Result<u64, StoreError> {
        self.store.count_prefix(keys::QUEUE_PREFIX)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{ControlEvent, LocationFix, RecordPayload};

    fn location_record() -> ActivityRecord {
        ActivityRecord::new(
            RecordPayload::Location(LocationFix {
                latitude: 40.7,
                longitude: -74.0,
                accuracy_m: 12,
                address: None,
                fixed_at: Utc::now(),
            }),
            Utc::now(),
        )
    }

    fn control_record() -> ActivityRecord {
        ActivityRecord::new(
            RecordPayload::Control(ControlEvent {
                app: "com.example.game".into(),
                reason: "blocklist".into(),
                occurred_at: Utc::now(),
            }),
            Utc::now(),
        )
    }

    #[test]
    fn test_enqueue_then_snapshot_groups_by_kind() {
        let queue = LocalQueue::new(Store::open_in_memory().unwrap());
        queue.enqueue(location_record(), Utc::now()).unwrap();
        queue.enqueue(location_record(), Utc::now()).unwrap();
        queue.enqueue(control_record(), Utc::now()).unwrap();

        let snapshot = queue.snapshot().unwrap();
        assert_eq!(snapshot[&RecordKind::Location].len(), 2);
        assert_eq!(snapshot[&RecordKind::ControlEvent].len(), 1);
    }

    #[test]
    fn test_removal_is_scoped_to_snapshot() {
        // Enqueue A and B, snapshot, then enqueue C "during the upload".
        // Deleting the snapshotted keys must leave C queued.
        let queue = LocalQueue::new(Store::open_in_memory().unwrap());
        queue.enqueue(location_record(), Utc::now()).unwrap();
        queue.enqueue(location_record(), Utc::now()).unwrap();

        let snapshot = queue.snapshot().unwrap();
        let snapshotted: Vec<String> = snapshot[&RecordKind::Location]
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(snapshotted.len(), 2);

        let late = queue.enqueue(location_record(), Utc::now()).unwrap();

        queue.remove(&snapshotted).unwrap();

        let remaining = queue.snapshot().unwrap();
        let keys: Vec<String> = remaining[&RecordKind::Location]
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec![late]);
    }

    #[test]
    fn test_malformed_entry_dropped_not_fatal() {
        let store = Store::open_in_memory().unwrap();
        let queue = LocalQueue::new(store.clone());
        queue.enqueue(location_record(), Utc::now()).unwrap();
        store
            .put_raw("queue/location/zzz-corrupt", "{not valid json")
            .unwrap();

        let snapshot = queue.snapshot().unwrap();
        assert_eq!(snapshot[&RecordKind::Location].len(), 1);

        // The corrupt entry is gone for good.
        assert!(store.get_raw("queue/location/zzz-corrupt").unwrap().is_none());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_empty_queue() {
        let queue = LocalQueue::new(Store::open_in_memory().unwrap());
        assert!(queue.is_empty().unwrap());
        assert!(queue.snapshot().unwrap().is_empty());
    }
}
