//! Per-topic current-state snapshots sent to a client immediately after it
//! subscribes, so a newly connected dashboard doesn't have to wait for the
//! next event to render anything.

use twinclaw_common::Topic;

pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self, topic: Topic) -> serde_json::Value;
}

/// A snapshot provider with nothing to report; useful in tests and for a
/// hub instance that only streams live events.
pub struct EmptySnapshots;

impl SnapshotProvider for EmptySnapshots {
    fn snapshot(&self, _topic: Topic) -> serde_json::Value {
        serde_json::json!({})
    }
}
