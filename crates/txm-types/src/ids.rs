//! Identifier types for managed transactions.
//!
//! Transaction ids are namespaced UUIDs (`<ns>/<uuid>`). Sequence ids are
//! lexicographically sortable and strictly increasing within the process,
//! which is what the pending-transaction scan paginates on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates a new namespaced transaction id of the form `<ns>/<uuid>`.
pub fn new_transaction_id(namespace: &str) -> String {
    format!("{}/{}", namespace, Uuid::new_v4())
}

/// A time-ordered, lexicographically sortable identifier.
///
/// Encodes a millisecond timestamp and a per-process counter as a fixed-width
/// hex string, so that string ordering equals allocation ordering. Two ids
/// allocated in the same process are never equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SequenceId(String);

/// Highest raw value handed out so far, so ids stay strictly increasing even
/// when the clock stalls or steps backwards.
static LAST_ALLOCATED: AtomicU64 = AtomicU64::new(0);

impl SequenceId {
    /// Allocates the next sequence id.
    pub fn new() -> Self {
        let candidate = (Utc::now().timestamp_millis() as u64) << 16;
        let mut last = LAST_ALLOCATED.load(Ordering::SeqCst);
        loop {
            let next = candidate.max(last + 1);
            match LAST_ALLOCATED.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return SequenceId(format!("{:016x}", next)),
                Err(observed) => last = observed,
            }
        }
    }

    /// Wraps an existing string form (e.g. read back from persistence).
    pub fn from_string(s: impl Into<String>) -> Self {
        SequenceId(s.into())
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_is_namespaced() {
        let id = new_transaction_id("ns1");
        let (ns, uuid_part) = id.split_once('/').unwrap();
        assert_eq!(ns, "ns1");
        assert!(Uuid::parse_str(uuid_part).is_ok());
    }

    #[test]
    fn test_sequence_ids_strictly_increase() {
        let mut previous = SequenceId::new();
        for _ in 0..1000 {
            let next = SequenceId::new();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_sequence_id_sorts_lexicographically() {
        let a = SequenceId::new();
        let b = SequenceId::new();
        // String ordering must agree with allocation ordering
        assert!(a.as_str() < b.as_str());
        assert_eq!(a.as_str().len(), b.as_str().len());
    }

    #[test]
    fn test_sequence_id_round_trips_through_string() {
        let a = SequenceId::new();
        let b = SequenceId::from_string(a.as_str());
        assert_eq!(a, b);
    }
}
