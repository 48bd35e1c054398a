//! Order ledger: one record per order transaction.

use crate::error::StoreError;
use crate::store::OrderStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "startOrder")]
    StartOrder,
    #[serde(rename = "reuseOrder")]
    ReuseOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub tx_hash: String,
    pub chain_id: u64,
    #[serde(rename = "type")]
    pub kind: OrderType,
    pub timestamp: u64,
    pub consumer: String,
    pub payer: String,
    pub datatoken_address: String,
    pub nft_address: String,
    pub did: String,
    /// Set on reuse orders: the start order being reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_order_id: Option<String>,
}

/// Fields shared by start and reuse records.
#[derive(Debug, Clone)]
pub struct OrderFacts {
    pub tx_hash: String,
    pub chain_id: u64,
    pub timestamp: u64,
    pub payer: String,
    pub datatoken_address: String,
    pub nft_address: String,
    pub did: String,
}

#[derive(Clone)]
pub struct OrderLedger {
    store: Arc<dyn OrderStore>,
}

impl OrderLedger {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, record: OrderRecord) -> Result<(), StoreError> {
        self.store.put(record).await
    }

    pub async fn retrieve(&self, tx_hash: &str) -> Result<Option<OrderRecord>, StoreError> {
        self.store.get(tx_hash).await
    }

    pub async fn record_start(
        &self,
        facts: OrderFacts,
        consumer: String,
    ) -> Result<OrderRecord, StoreError> {
        let record = OrderRecord {
            tx_hash: facts.tx_hash,
            chain_id: facts.chain_id,
            kind: OrderType::StartOrder,
            timestamp: facts.timestamp,
            consumer,
            payer: facts.payer,
            datatoken_address: facts.datatoken_address,
            nft_address: facts.nft_address,
            did: facts.did,
            start_order_id: None,
        };
        self.create(record.clone()).await?;
        Ok(record)
    }

    /// Append a reuse record that inherits its consumer from the referenced start order.
    ///
    /// Returns `None` without writing when the start order is unknown.
    pub async fn record_reuse(
        &self,
        facts: OrderFacts,
        start_order_id: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let Some(start) = self.retrieve(start_order_id).await? else {
            return Ok(None);
        };
        let record = OrderRecord {
            tx_hash: facts.tx_hash,
            chain_id: facts.chain_id,
            kind: OrderType::ReuseOrder,
            timestamp: facts.timestamp,
            consumer: start.consumer,
            payer: facts.payer,
            datatoken_address: facts.datatoken_address,
            nft_address: facts.nft_address,
            did: facts.did,
            start_order_id: Some(start_order_id.to_string()),
        };
        self.create(record.clone()).await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn facts(tx: &str) -> OrderFacts {
        OrderFacts {
            tx_hash: tx.to_string(),
            chain_id: 1,
            timestamp: 1_700_000_000,
            payer: "0xPayer".into(),
            datatoken_address: "0xDT".into(),
            nft_address: "0xNFT".into(),
            did: "did:op:1".into(),
        }
    }

    #[tokio::test]
    async fn reuse_copies_consumer_from_start() {
        let ledger = OrderLedger::new(Arc::new(MemoryStore::default()));
        ledger
            .record_start(facts("0xAA"), "0xConsumer".into())
            .await
            .unwrap();

        let reuse = ledger
            .record_reuse(facts("0xbb"), "0xaa")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reuse.kind, OrderType::ReuseOrder);
        assert_eq!(reuse.consumer, "0xConsumer");
        assert_eq!(reuse.start_order_id.as_deref(), Some("0xaa"));
        assert!(ledger.retrieve("0xBB").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reuse_of_unknown_start_writes_nothing() {
        let ledger = OrderLedger::new(Arc::new(MemoryStore::default()));
        assert!(ledger
            .record_reuse(facts("0xbb"), "0xaa")
            .await
            .unwrap()
            .is_none());
        assert!(ledger.retrieve("0xbb").await.unwrap().is_none());
    }
}
