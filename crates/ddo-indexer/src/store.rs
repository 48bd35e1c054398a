//! Persistence seams: DDO documents, order records and per-chain checkpoints.
//!
//! Backends implement the three traits; [MemoryStore] implements all of them for tests and
//! single-process deployments. DDO writes are compare-and-swap on a store revision so that
//! concurrent writers cannot silently overwrite each other.

use crate::ddo::Ddo;
use crate::error::StoreError;
use crate::ledger::OrderRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub revision: u64,
    pub doc: T,
}

#[async_trait]
pub trait DdoStore: Send + Sync {
    async fn retrieve(&self, id: &str) -> Result<Option<Versioned<Ddo>>, StoreError>;

    /// Insert a new document. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, doc: Ddo) -> Result<Versioned<Ddo>, StoreError>;

    /// Replace a document if its revision is still `expected`; otherwise `Conflict`.
    async fn update(&self, doc: Ddo, expected: u64) -> Result<Versioned<Ddo>, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove every document of a chain; returns how many were removed.
    async fn delete_all_for_chain(&self, chain_id: u64) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert or replace the record keyed by its transaction hash.
    async fn put(&self, record: OrderRecord) -> Result<(), StoreError>;

    async fn get(&self, tx_hash: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// Remove every record of a chain; returns how many were removed.
    async fn delete_all_for_chain(&self, chain_id: u64) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait IndexStateStore: Send + Sync {
    async fn checkpoint(&self, chain_id: u64) -> Result<Option<u64>, StoreError>;

    /// Move the checkpoint forward; moving it backwards is a `Regression`.
    async fn advance(&self, chain_id: u64, block: u64) -> Result<(), StoreError>;

    /// Set the checkpoint unconditionally (reindex).
    async fn reset(&self, chain_id: u64, block: u64) -> Result<(), StoreError>;

    /// Node version that last started against this store.
    async fn version(&self) -> Result<Option<String>, StoreError>;

    async fn set_version(&self, version: &str) -> Result<(), StoreError>;
}

/// Store handles shared by the processors and the chain loops.
#[derive(Clone)]
pub struct Stores {
    pub ddo: Arc<dyn DdoStore>,
    pub orders: Arc<dyn OrderStore>,
    pub state: Arc<dyn IndexStateStore>,
}

impl Stores {
    /// All three stores backed by one fresh [MemoryStore].
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            ddo: store.clone(),
            orders: store.clone(),
            state: store,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    ddos: RwLock<HashMap<String, Versioned<Ddo>>>,
    orders: RwLock<HashMap<String, OrderRecord>>,
    checkpoints: RwLock<HashMap<u64, u64>>,
    version: RwLock<Option<String>>,
}

#[async_trait]
impl DdoStore for MemoryStore {
    async fn retrieve(&self, id: &str) -> Result<Option<Versioned<Ddo>>, StoreError> {
        Ok(self.ddos.read().await.get(id).cloned())
    }

    async fn create(&self, doc: Ddo) -> Result<Versioned<Ddo>, StoreError> {
        let mut ddos = self.ddos.write().await;
        if ddos.contains_key(&doc.id) {
            return Err(StoreError::AlreadyExists(doc.id));
        }
        let stored = Versioned { revision: 1, doc };
        ddos.insert(stored.doc.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, doc: Ddo, expected: u64) -> Result<Versioned<Ddo>, StoreError> {
        let mut ddos = self.ddos.write().await;
        let current = ddos
            .get_mut(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
        if current.revision != expected {
            return Err(StoreError::Conflict {
                id: doc.id,
                expected,
                found: current.revision,
            });
        }
        current.revision += 1;
        current.doc = doc;
        Ok(current.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.ddos.write().await.remove(id).is_some())
    }

    async fn delete_all_for_chain(&self, chain_id: u64) -> Result<usize, StoreError> {
        let mut ddos = self.ddos.write().await;
        let before = ddos.len();
        ddos.retain(|_, v| v.doc.chain_id != chain_id);
        Ok(before - ddos.len())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn put(&self, record: OrderRecord) -> Result<(), StoreError> {
        self.orders
            .write()
            .await
            .insert(record.tx_hash.to_lowercase(), record);
        Ok(())
    }

    async fn get(&self, tx_hash: &str) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.orders.read().await.get(&tx_hash.to_lowercase()).cloned())
    }

    async fn delete_all_for_chain(&self, chain_id: u64) -> Result<usize, StoreError> {
        let mut orders = self.orders.write().await;
        let before = orders.len();
        orders.retain(|_, r| r.chain_id != chain_id);
        Ok(before - orders.len())
    }
}

#[async_trait]
impl IndexStateStore for MemoryStore {
    async fn checkpoint(&self, chain_id: u64) -> Result<Option<u64>, StoreError> {
        Ok(self.checkpoints.read().await.get(&chain_id).copied())
    }

    async fn advance(&self, chain_id: u64, block: u64) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write().await;
        if let Some(&current) = checkpoints.get(&chain_id) {
            if block < current {
                return Err(StoreError::Regression {
                    chain_id,
                    current,
                    requested: block,
                });
            }
        }
        checkpoints.insert(chain_id, block);
        Ok(())
    }

    async fn reset(&self, chain_id: u64, block: u64) -> Result<(), StoreError> {
        self.checkpoints.write().await.insert(chain_id, block);
        Ok(())
    }

    async fn version(&self) -> Result<Option<String>, StoreError> {
        Ok(self.version.read().await.clone())
    }

    async fn set_version(&self, version: &str) -> Result<(), StoreError> {
        *self.version.write().await = Some(version.to_string());
        Ok(())
    }
}
