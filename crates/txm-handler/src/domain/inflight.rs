//! The bounded in-flight working set.
//!
//! Holds the transactions currently under reconciliation, in the order they
//! were loaded. Records join at the tail when the set is refilled from the
//! pending scan, and leave on the refill pass after they complete or are
//! removed.

use chrono::{DateTime, Utc};

use txm_types::{ManagedTransaction, SequenceId};

/// One transaction under active reconciliation.
#[derive(Debug)]
pub struct PendingState {
    pub mtx: ManagedTransaction,
    /// Set when the confirmations manager reported the required depth.
    pub confirmed: bool,
    /// Set when an API caller asked for deletion; actioned next pass.
    pub remove: bool,
    /// The hash last registered with the confirmations manager. Differs from
    /// `mtx.transaction_hash` briefly around a resubmission.
    pub tracking_transaction_hash: Option<String>,
    /// In-memory state differs from the persisted record.
    pub dirty: bool,
    /// Terminal state has been flushed; retire on the next refill.
    pub complete: bool,
    /// Deleted from persistence; drop without a write-back.
    pub deleted: bool,
    /// Submission attempts that failed with a retryable reason.
    pub submit_attempts: u32,
    /// Earliest time of the next submission attempt (backoff gate).
    pub next_submit_at: Option<DateTime<Utc>>,
}

impl PendingState {
    pub fn new(mtx: ManagedTransaction) -> Self {
        Self {
            mtx,
            confirmed: false,
            remove: false,
            tracking_transaction_hash: None,
            dirty: false,
            complete: false,
            deleted: false,
            submit_attempts: 0,
            next_submit_at: None,
        }
    }

    /// True once this record should leave the set on the next refill pass.
    pub fn retired(&self) -> bool {
        self.complete || self.deleted
    }
}

/// Ordered, bounded collection of [`PendingState`] records.
#[derive(Debug)]
pub struct InflightSet {
    records: Vec<PendingState>,
    max_in_flight: usize,
}

impl InflightSet {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            records: Vec::new(),
            max_in_flight,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many more records a refill may load.
    pub fn free_space(&self) -> usize {
        self.max_in_flight.saturating_sub(self.records.len())
    }

    /// The refill cursor: highest sequence id currently held.
    pub fn highest_sequence_id(&self) -> Option<&SequenceId> {
        self.records.iter().map(|r| &r.mtx.sequence_id).max()
    }

    /// Drops retired records, keeping insertion order for the rest.
    pub fn drop_retired(&mut self) {
        self.records.retain(|r| !r.retired());
    }

    /// Appends newly loaded transactions at the tail, skipping ids already
    /// held (a write can land between the flush and the re-scan). A record
    /// persisted with a pending deletion request resumes flagged for removal.
    pub fn join(&mut self, loaded: Vec<ManagedTransaction>) {
        for mtx in loaded {
            if self.records.len() >= self.max_in_flight {
                break;
            }
            if self.records.iter().any(|r| r.mtx.id == mtx.id) {
                continue;
            }
            let mut record = PendingState::new(mtx);
            record.remove = record.mtx.delete_requested.is_some();
            self.records.push(record);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingState> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingState> {
        self.records.iter_mut()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PendingState> {
        self.records.get_mut(index)
    }

    /// Finds the record for a transaction id.
    pub fn find_mut(&mut self, tx_id: &str) -> Option<&mut PendingState> {
        self.records.iter_mut().find(|r| r.mtx.id == tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txm_types::{new_transaction_id, TransactionHeaders, U256};

    fn create_test_tx(nonce: u64) -> ManagedTransaction {
        ManagedTransaction::new_pending(
            new_transaction_id("ns1"),
            TransactionHeaders {
                from: "0xaaaaa".to_string(),
                ..Default::default()
            },
            U256::from(nonce),
            None,
            String::new(),
        )
    }

    #[test]
    fn test_join_respects_capacity() {
        let mut set = InflightSet::new(2);
        set.join(vec![create_test_tx(1), create_test_tx(2), create_test_tx(3)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.free_space(), 0);
    }

    #[test]
    fn test_join_skips_duplicates() {
        let mut set = InflightSet::new(10);
        let tx = create_test_tx(1);
        set.join(vec![tx.clone()]);
        set.join(vec![tx, create_test_tx(2)]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_highest_sequence_id_is_refill_cursor() {
        let mut set = InflightSet::new(10);
        assert!(set.highest_sequence_id().is_none());

        let a = create_test_tx(1);
        let b = create_test_tx(2);
        let highest = b.sequence_id.clone();
        set.join(vec![a, b]);
        assert_eq!(set.highest_sequence_id(), Some(&highest));
    }

    #[test]
    fn test_drop_retired_keeps_order() {
        let mut set = InflightSet::new(10);
        set.join(vec![create_test_tx(1), create_test_tx(2), create_test_tx(3)]);
        let middle_id = set.iter().nth(1).unwrap().mtx.id.clone();
        set.find_mut(&middle_id).unwrap().complete = true;

        set.drop_retired();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().mtx.nonce, U256::from(1u64));
        assert_eq!(set.iter().nth(1).unwrap().mtx.nonce, U256::from(3u64));
    }

    #[test]
    fn test_deleted_records_are_retired() {
        let mut set = InflightSet::new(10);
        set.join(vec![create_test_tx(1)]);
        set.get_mut(0).unwrap().deleted = true;
        assert!(set.iter().next().unwrap().retired());
        set.drop_retired();
        assert!(set.is_empty());
    }
}
