//! Sub-status / action history tracking.
//!
//! Every managed transaction carries two views of its lifecycle:
//!
//! - `history`: a bounded list of sub-status periods, each holding the
//!   actions performed while in that sub-status. Repeat actions within a
//!   period increment a counter instead of appending rows. The list is FIFO
//!   evicted once it reaches `max_history_count`.
//! - `history_summary`: an unbounded set of cumulative counters, one per
//!   unique sub-status and one per unique `(sub-status, action)` pair, never
//!   evicted.
//!
//! The tracker never fails: values that cannot be represented as JSON are
//! stored in their string form.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use txm_types::{
    HistoryAction, HistoryEntry, HistorySummaryEntry, ManagedTransaction, TxAction, TxSubStatus,
};

/// Maintains `history` and `history_summary` on managed transactions.
#[derive(Debug, Clone)]
pub struct TxHistoryManager {
    max_history_count: usize,
}

/// Converts any serializable value to JSON, falling back to its `Debug`
/// string so history recording can never fail.
pub fn json_or_string<T: Serialize + std::fmt::Debug>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{value:?}")))
}

/// String form of an error, as a JSON value.
pub fn error_value(err: &dyn std::fmt::Display) -> Value {
    Value::String(err.to_string())
}

impl TxHistoryManager {
    pub fn new(max_history_count: usize) -> Self {
        Self { max_history_count }
    }

    /// The sub-status period currently in effect, if any.
    pub fn current_sub_status<'a>(&self, mtx: &'a ManagedTransaction) -> Option<&'a HistoryEntry> {
        mtx.history.last()
    }

    /// Opens a new sub-status period unless the given status is already the
    /// current one.
    pub fn set_sub_status(&self, mtx: &mut ManagedTransaction, status: TxSubStatus) {
        if self.max_history_count == 0 {
            return;
        }
        if let Some(tail) = mtx.history.last() {
            if tail.status == status {
                return;
            }
        }
        debug!(tx = %mtx.id, ?status, "transaction sub-status change");
        let now = Utc::now();
        mtx.history.push(HistoryEntry {
            status,
            time: now,
            actions: Vec::new(),
        });
        while mtx.history.len() > self.max_history_count {
            mtx.history.remove(0);
        }
        Self::bump_summary(mtx, Some(status), None);
    }

    /// Records an action in the current sub-status period, opening an
    /// implicit `Received` period when the history is empty.
    pub fn add_sub_status_action(
        &self,
        mtx: &mut ManagedTransaction,
        action: TxAction,
        info: Option<Value>,
        error: Option<Value>,
    ) {
        if self.max_history_count == 0 {
            return;
        }
        if mtx.history.is_empty() {
            self.set_sub_status(mtx, TxSubStatus::Received);
        }
        let now = Utc::now();
        let entry = mtx
            .history
            .last_mut()
            .expect("history non-empty after implicit sub-status");
        let status = entry.status;

        match entry.actions.iter_mut().find(|a| a.action == action) {
            Some(row) => {
                row.count += 1;
                row.last_occurrence = now;
                if info.is_some() {
                    row.last_info = info;
                }
                if error.is_some() {
                    row.last_error = error;
                    row.last_error_time = Some(now);
                }
            }
            None => {
                let last_error_time = error.as_ref().map(|_| now);
                entry.actions.push(HistoryAction {
                    action,
                    count: 1,
                    first_occurrence: now,
                    last_occurrence: now,
                    last_info: info,
                    last_error: error,
                    last_error_time,
                });
            }
        }
        Self::bump_summary(mtx, Some(status), Some(action));
    }

    /// Updates the cumulative summary counter for a status or a
    /// `(status, action)` pair.
    fn bump_summary(mtx: &mut ManagedTransaction, status: Option<TxSubStatus>, action: Option<TxAction>) {
        let now = Utc::now();
        match mtx
            .history_summary
            .iter_mut()
            .find(|e| e.status == status && e.action == action)
        {
            Some(entry) => {
                entry.count += 1;
                entry.last_occurrence = now;
            }
            None => mtx.history_summary.push(HistorySummaryEntry {
                status,
                action,
                count: 1,
                first_occurrence: now,
                last_occurrence: now,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txm_types::{new_transaction_id, TransactionHeaders, U256};

    fn create_test_tx() -> ManagedTransaction {
        ManagedTransaction::new_pending(
            new_transaction_id("ns1"),
            TransactionHeaders {
                from: "0xaaaaa".to_string(),
                ..Default::default()
            },
            U256::zero(),
            None,
            String::new(),
        )
    }

    #[test]
    fn test_repeat_sub_status_is_a_no_op() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();

        assert!(h.current_sub_status(&mtx).is_none());
        for _ in 0..100 {
            h.set_sub_status(&mut mtx, TxSubStatus::Received);
        }
        assert_eq!(mtx.history.len(), 1);
        assert_eq!(
            h.current_sub_status(&mtx).unwrap().status,
            TxSubStatus::Received
        );

        h.set_sub_status(&mut mtx, TxSubStatus::Tracking);
        assert_eq!(mtx.history.len(), 2);
    }

    #[test]
    fn test_history_is_bounded_summary_is_not() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();

        // Alternate between two statuses well past the cap
        for _ in 0..100 {
            h.set_sub_status(&mut mtx, TxSubStatus::Stale);
            h.set_sub_status(&mut mtx, TxSubStatus::Tracking);
        }
        assert_eq!(mtx.history.len(), 50);
        // Two unique statuses → two summary entries, with large counts
        assert_eq!(mtx.history_summary.len(), 2);
        assert!(mtx.history_summary.iter().all(|e| e.count == 100));
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let h = TxHistoryManager::new(2);
        let mut mtx = create_test_tx();
        h.set_sub_status(&mut mtx, TxSubStatus::Received);
        h.set_sub_status(&mut mtx, TxSubStatus::Tracking);
        h.set_sub_status(&mut mtx, TxSubStatus::Confirmed);
        assert_eq!(mtx.history.len(), 2);
        assert_eq!(mtx.history[0].status, TxSubStatus::Tracking);
        assert_eq!(mtx.history[1].status, TxSubStatus::Confirmed);
    }

    #[test]
    fn test_repeat_action_increments_count() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();
        h.set_sub_status(&mut mtx, TxSubStatus::Received);

        h.add_sub_status_action(&mut mtx, TxAction::AssignNonce, None, None);
        assert_eq!(mtx.history[0].actions.len(), 1);
        assert!(mtx.history[0].actions[0].last_error_time.is_none());

        h.add_sub_status_action(
            &mut mtx,
            TxAction::RetrieveGasPrice,
            None,
            Some(json!({"gasError": "Acme Gas Oracle RC=12345"})),
        );
        assert_eq!(mtx.history[0].actions.len(), 2);

        // Same action again: count increments, no new row
        h.add_sub_status_action(
            &mut mtx,
            TxAction::RetrieveGasPrice,
            Some(json!({"info": "helloworld"})),
            Some(json!({"error": "nogood"})),
        );
        assert_eq!(mtx.history[0].actions.len(), 2);
        let row = &mtx.history[0].actions[1];
        assert_eq!(row.action, TxAction::RetrieveGasPrice);
        assert_eq!(row.count, 2);
        assert_eq!(row.last_info, Some(json!({"info": "helloworld"})));
        assert_eq!(row.last_error, Some(json!({"error": "nogood"})));
        assert!(row.last_error_time.is_some());
    }

    #[test]
    fn test_action_with_no_new_error_keeps_last_error() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();
        h.set_sub_status(&mut mtx, TxSubStatus::Received);
        h.add_sub_status_action(
            &mut mtx,
            TxAction::SubmitTransaction,
            None,
            Some(json!("pop")),
        );
        h.add_sub_status_action(&mut mtx, TxAction::SubmitTransaction, None, None);
        let row = &mtx.history[0].actions[0];
        assert_eq!(row.count, 2);
        assert_eq!(row.last_error, Some(json!("pop")));
    }

    #[test]
    fn test_implicit_received_status() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();

        h.add_sub_status_action(&mut mtx, TxAction::SubmitTransaction, None, None);
        assert_eq!(mtx.history.len(), 1);
        assert_eq!(mtx.history[0].status, TxSubStatus::Received);
        assert_eq!(mtx.history[0].actions.len(), 1);
        assert_eq!(mtx.history[0].actions[0].action, TxAction::SubmitTransaction);
    }

    #[test]
    fn test_zero_cap_disables_both_lists() {
        let h = TxHistoryManager::new(0);
        let mut mtx = create_test_tx();
        h.set_sub_status(&mut mtx, TxSubStatus::Received);
        h.add_sub_status_action(&mut mtx, TxAction::SubmitTransaction, None, None);
        assert!(mtx.history.is_empty());
        assert!(mtx.history_summary.is_empty());
    }

    #[test]
    fn test_summary_tracks_unique_status_action_pairs() {
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();

        h.set_sub_status(&mut mtx, TxSubStatus::Received);
        h.add_sub_status_action(&mut mtx, TxAction::AssignNonce, None, None);
        h.add_sub_status_action(&mut mtx, TxAction::RetrieveGasPrice, None, None);
        h.add_sub_status_action(&mut mtx, TxAction::RetrieveGasPrice, None, None);
        h.add_sub_status_action(&mut mtx, TxAction::SubmitTransaction, None, None);
        // 1 status + 3 unique (status, action) pairs
        assert_eq!(mtx.history_summary.len(), 4);

        // Same action under a different status is a new pair
        h.set_sub_status(&mut mtx, TxSubStatus::Tracking);
        h.add_sub_status_action(&mut mtx, TxAction::SubmitTransaction, None, None);
        assert_eq!(mtx.history_summary.len(), 6);

        // Nothing new: counts move, the set does not grow
        h.set_sub_status(&mut mtx, TxSubStatus::Received);
        h.add_sub_status_action(&mut mtx, TxAction::AssignNonce, None, None);
        assert_eq!(mtx.history_summary.len(), 6);

        for entry in &mtx.history_summary {
            assert!(entry.count >= 1);
        }
        let gas_price = mtx
            .history_summary
            .iter()
            .find(|e| e.action == Some(TxAction::RetrieveGasPrice))
            .unwrap();
        assert_eq!(gas_price.count, 2);
    }

    #[test]
    fn test_many_unique_statuses_fill_summary() {
        // 100 distinct status periods with a cap of 50: history holds the
        // newest 50, the summary holds all of them. Two statuses alternating
        // produce distinct periods each time.
        let h = TxHistoryManager::new(50);
        let mut mtx = create_test_tx();
        let all = [
            TxSubStatus::Received,
            TxSubStatus::Tracking,
            TxSubStatus::Stale,
            TxSubStatus::Confirmed,
            TxSubStatus::Failed,
        ];
        for i in 0..100 {
            h.set_sub_status(&mut mtx, all[i % all.len()]);
        }
        assert_eq!(mtx.history.len(), 50);
        assert_eq!(mtx.history_summary.len(), all.len());
        let total: u32 = mtx.history_summary.iter().map(|e| e.count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_json_or_string_never_fails() {
        let val = json_or_string(&json!({"reason": "known_transaction"}));
        assert!(val.is_object());
        // A map with non-string keys is not valid JSON; falls back to string
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], "x");
        let val = json_or_string(&bad);
        assert!(val.is_string());
    }
}
