//! Programmable connector mock for tests.
//!
//! Responses are queued per operation and popped in order; an un-queued call
//! fails with an `unexpected call` error so tests notice missing
//! expectations. Requests are recorded for assertion.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use txm_types::ReceiptRecord;

use crate::api::*;

type Queued<T> = VecDeque<Result<T, ConnectorError>>;

#[derive(Default)]
struct Inner {
    next_nonce: Queued<NextNonceResponse>,
    prepare: Queued<TransactionPrepareResponse>,
    deploy_prepare: Queued<TransactionPrepareResponse>,
    send: Queued<TransactionSendResponse>,
    gas_price: Queued<GasPriceEstimateResponse>,
    receipt: Queued<Option<ReceiptRecord>>,

    next_nonce_requests: Vec<NextNonceRequest>,
    prepare_requests: Vec<TransactionPrepareRequest>,
    send_requests: Vec<TransactionSendRequest>,
    gas_price_calls: usize,
}

/// In-memory [`BlockchainConnector`] with queued responses.
#[derive(Default)]
pub struct MockConnector {
    inner: Mutex<Inner>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_next_nonce(&self, result: Result<NextNonceResponse, ConnectorError>) {
        self.inner.lock().next_nonce.push_back(result);
    }

    pub fn queue_prepare(&self, result: Result<TransactionPrepareResponse, ConnectorError>) {
        self.inner.lock().prepare.push_back(result);
    }

    pub fn queue_deploy_prepare(&self, result: Result<TransactionPrepareResponse, ConnectorError>) {
        self.inner.lock().deploy_prepare.push_back(result);
    }

    pub fn queue_send(&self, result: Result<TransactionSendResponse, ConnectorError>) {
        self.inner.lock().send.push_back(result);
    }

    /// Shorthand: the next send succeeds with the given hash.
    pub fn queue_send_hash(&self, hash: &str) {
        self.queue_send(Ok(TransactionSendResponse {
            transaction_hash: hash.to_string(),
        }));
    }

    pub fn queue_gas_price(&self, result: Result<GasPriceEstimateResponse, ConnectorError>) {
        self.inner.lock().gas_price.push_back(result);
    }

    pub fn queue_receipt(&self, result: Result<Option<ReceiptRecord>, ConnectorError>) {
        self.inner.lock().receipt.push_back(result);
    }

    /// Shorthand: queue a default prepare response (gas 100000, fixed data).
    pub fn queue_default_prepare(&self) {
        self.queue_prepare(Ok(TransactionPrepareResponse {
            gas: txm_types::U256::from(100_000u64),
            transaction_data: "0xabce1234".to_string(),
        }));
    }

    pub fn next_nonce_requests(&self) -> Vec<NextNonceRequest> {
        self.inner.lock().next_nonce_requests.clone()
    }

    pub fn prepare_requests(&self) -> Vec<TransactionPrepareRequest> {
        self.inner.lock().prepare_requests.clone()
    }

    pub fn send_requests(&self) -> Vec<TransactionSendRequest> {
        self.inner.lock().send_requests.clone()
    }

    pub fn gas_price_calls(&self) -> usize {
        self.inner.lock().gas_price_calls
    }

    fn pop<T>(queue: &mut Queued<T>, op: &str) -> Result<T, ConnectorError> {
        queue
            .pop_front()
            .unwrap_or_else(|| Err(ConnectorError::other(format!("unexpected call: {op}"))))
    }
}

#[async_trait]
impl BlockchainConnector for MockConnector {
    async fn next_nonce_for_signer(
        &self,
        req: NextNonceRequest,
    ) -> Result<NextNonceResponse, ConnectorError> {
        let mut inner = self.inner.lock();
        inner.next_nonce_requests.push(req);
        Self::pop(&mut inner.next_nonce, "next_nonce_for_signer")
    }

    async fn transaction_prepare(
        &self,
        req: TransactionPrepareRequest,
    ) -> Result<TransactionPrepareResponse, ConnectorError> {
        let mut inner = self.inner.lock();
        inner.prepare_requests.push(req);
        Self::pop(&mut inner.prepare, "transaction_prepare")
    }

    async fn deploy_contract_prepare(
        &self,
        _req: DeployContractPrepareRequest,
    ) -> Result<TransactionPrepareResponse, ConnectorError> {
        let mut inner = self.inner.lock();
        Self::pop(&mut inner.deploy_prepare, "deploy_contract_prepare")
    }

    async fn transaction_send(
        &self,
        req: TransactionSendRequest,
    ) -> Result<TransactionSendResponse, ConnectorError> {
        let mut inner = self.inner.lock();
        inner.send_requests.push(req);
        Self::pop(&mut inner.send, "transaction_send")
    }

    async fn gas_price_estimate(&self) -> Result<GasPriceEstimateResponse, ConnectorError> {
        let mut inner = self.inner.lock();
        inner.gas_price_calls += 1;
        if inner.gas_price.is_empty() {
            // Gas estimation has a sensible default so most tests need not
            // queue it explicitly.
            return Ok(GasPriceEstimateResponse {
                gas_price: json!("12345"),
            });
        }
        Self::pop(&mut inner.gas_price, "gas_price_estimate")
    }

    async fn transaction_receipt(
        &self,
        _req: TransactionReceiptRequest,
    ) -> Result<Option<ReceiptRecord>, ConnectorError> {
        let mut inner = self.inner.lock();
        if inner.receipt.is_empty() {
            return Ok(None);
        }
        Self::pop(&mut inner.receipt, "transaction_receipt")
    }

    async fn new_block_listener(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txm_types::{TransactionHeaders, U256};

    #[tokio::test]
    async fn test_queued_responses_pop_in_order() {
        let mock = MockConnector::new();
        mock.queue_send_hash("0xhash1");
        mock.queue_send_hash("0xhash2");

        let req = TransactionSendRequest {
            headers: TransactionHeaders {
                from: "0xaaaaa".to_string(),
                ..Default::default()
            },
            nonce: U256::from(1u64),
            gas_price: None,
            transaction_data: "0x".to_string(),
        };

        let first = mock.transaction_send(req.clone()).await.unwrap();
        let second = mock.transaction_send(req).await.unwrap();
        assert_eq!(first.transaction_hash, "0xhash1");
        assert_eq!(second.transaction_hash, "0xhash2");
        assert_eq!(mock.send_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unqueued_call_errors() {
        let mock = MockConnector::new();
        let err = mock
            .next_nonce_for_signer(NextNonceRequest {
                signer: "0xaaaaa".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected call"));
    }

    #[tokio::test]
    async fn test_gas_price_default() {
        let mock = MockConnector::new();
        let res = mock.gas_price_estimate().await.unwrap();
        assert_eq!(res.gas_price, json!("12345"));
        assert_eq!(mock.gas_price_calls(), 1);
    }
}
