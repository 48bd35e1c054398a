//! One chain's crawl loop.
//!
//! Each tick drains the reindex queue, then indexes the next block range: logs are fetched with
//! bounded retry, sorted by `(block_number, log_index)`, routed, checked by the authorization gate
//! and dispatched to their processor. The checkpoint moves to the end of the range only after the
//! whole range was handled. A failed fetch leaves the checkpoint where it was and halves the chunk.

use crate::abi::RawLog;
use crate::auth::{AuthorizationGate, Verdict};
use crate::config::{AccessPolicy, NetworkConfig};
use crate::cursor::{BlockRange, Cursor};
use crate::ddo::Ddo;
use crate::error::IndexerError;
use crate::processors::{Decryptor, EventContext, ProcessorRegistry, ProcessorSettings};
use crate::purgatory::Purgatory;
use crate::reindex::{CommandStatus, JobTracker, ReindexQueue, ReindexTask};
use crate::retry::{retry, RetryPolicy};
use crate::router::{self, EventType};
use crate::rpc::{ChainClient, LogFilter};
use crate::store::Stores;
use alloy::primitives::B256;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;

/// Published after a processor persisted a DDO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    pub chain_id: u64,
    pub event_type: EventType,
    pub did: String,
    pub tx_hash: B256,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Indexed {
        range: BlockRange,
        logs: usize,
        persisted: usize,
    },
    /// Checkpoint already at `head`.
    CaughtUp { head: u64 },
}

/// Result of replaying one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxReplay {
    Replayed { logs: usize, persisted: usize },
    /// Receipt not available yet; try again next tick.
    ReceiptPending,
}

pub struct ChainIndexerBuilder {
    network: Option<NetworkConfig>,
    client: Option<Arc<dyn ChainClient>>,
    stores: Option<Stores>,
    validators: AccessPolicy,
    settings: ProcessorSettings,
    crawl_interval: Duration,
    queue: Option<Arc<ReindexQueue>>,
    jobs: Option<Arc<JobTracker>>,
    events: Option<broadcast::Sender<IndexedEvent>>,
}

impl ChainIndexerBuilder {
    pub fn new() -> Self {
        Self {
            network: None,
            client: None,
            stores: None,
            validators: AccessPolicy::default(),
            settings: ProcessorSettings::default(),
            crawl_interval: Duration::from_millis(crate::config::DEFAULT_CRAWL_INTERVAL_MS),
            queue: None,
            jobs: None,
            events: None,
        }
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Validator allow-list and access lists for the authorization gate.
    pub fn validators(mut self, policy: AccessPolicy) -> Self {
        self.validators = policy;
        self
    }

    pub fn publishers(mut self, policy: AccessPolicy) -> Self {
        self.settings.publishers = policy;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.settings.retry = policy;
        self
    }

    pub fn decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.settings.decryptor = decryptor;
        self
    }

    pub fn purgatory(mut self, purgatory: Arc<dyn Purgatory>) -> Self {
        self.settings.purgatory = purgatory;
        self
    }

    pub fn crawl_interval(mut self, interval: Duration) -> Self {
        self.crawl_interval = interval;
        self
    }

    pub fn queue(mut self, queue: Arc<ReindexQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn jobs(mut self, jobs: Arc<JobTracker>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn events(mut self, events: broadcast::Sender<IndexedEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ChainIndexer, IndexerError> {
        let network = self
            .network
            .ok_or_else(|| IndexerError::Config("network required".into()))?;
        let client = self
            .client
            .ok_or_else(|| IndexerError::Config("client required".into()))?;
        let stores = self
            .stores
            .ok_or_else(|| IndexerError::Config("stores required".into()))?;
        if network.chunk_size == 0 {
            return Err(IndexerError::Config(format!(
                "chain {}: chunkSize must be positive",
                network.chain_id
            )));
        }
        let mut settings = self.settings;
        settings.nft_factory = network.nft_factory;
        let gate = AuthorizationGate::new(network.chain_id, self.validators, settings.retry);
        let cursor = Cursor::new(network.crawl_start(), network.chunk_size);
        Ok(ChainIndexer {
            cursor,
            network,
            client,
            stores,
            gate,
            settings,
            registry: ProcessorRegistry::new(),
            crawl_interval: self.crawl_interval,
            queue: self.queue.unwrap_or_default(),
            jobs: self.jobs.unwrap_or_default(),
            events: self.events.unwrap_or_else(|| broadcast::channel(256).0),
        })
    }
}

impl Default for ChainIndexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential indexer for one chain.
pub struct ChainIndexer {
    network: NetworkConfig,
    client: Arc<dyn ChainClient>,
    stores: Stores,
    gate: AuthorizationGate,
    settings: ProcessorSettings,
    registry: ProcessorRegistry,
    cursor: Cursor,
    crawl_interval: Duration,
    queue: Arc<ReindexQueue>,
    jobs: Arc<JobTracker>,
    events: broadcast::Sender<IndexedEvent>,
}

impl ChainIndexer {
    pub fn builder() -> ChainIndexerBuilder {
        ChainIndexerBuilder::new()
    }

    pub fn chain_id(&self) -> u64 {
        self.network.chain_id
    }

    pub fn queue(&self) -> Arc<ReindexQueue> {
        Arc::clone(&self.queue)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexedEvent> {
        self.events.subscribe()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub(crate) fn set_decryptor(&mut self, decryptor: Arc<dyn Decryptor>) {
        self.settings.decryptor = decryptor;
    }

    pub(crate) fn set_purgatory(&mut self, purgatory: Arc<dyn Purgatory>) {
        self.settings.purgatory = purgatory;
    }

    /// Stored checkpoint, or the configured crawl start when none is stored yet.
    pub async fn checkpoint(&self) -> Result<u64, IndexerError> {
        Ok(self
            .stores
            .state
            .checkpoint(self.chain_id())
            .await?
            .unwrap_or_else(|| self.network.crawl_start()))
    }

    async fn head(&self) -> Result<u64, IndexerError> {
        let client = self.client.as_ref();
        retry(&self.settings.retry, "eth_blockNumber", || client.block_number()).await
    }

    /// Drain pending reindex work, then index at most one range.
    pub async fn tick(&mut self) -> Result<Tick, IndexerError> {
        self.drain_reindex().await;

        let chain_id = self.chain_id();
        let checkpoint = self.checkpoint().await?;
        self.cursor.sync(checkpoint);
        let head = self.head().await?;
        let Some(range) = self.cursor.next_range(head) else {
            tracing::debug!(chain_id, head, "caught up");
            return Ok(Tick::CaughtUp { head });
        };

        let filter = LogFilter {
            from_block: range.from,
            to_block: range.to,
            topics: router::topics(),
        };
        let client = self.client.as_ref();
        let fetched = retry(&self.settings.retry, "eth_getLogs", || client.get_logs(&filter)).await;
        let mut logs = match fetched {
            Ok(logs) => {
                self.cursor.record_success();
                logs
            }
            Err(e) => {
                self.cursor.shrink();
                tracing::warn!(
                    chain_id,
                    from = range.from,
                    to = range.to,
                    chunk = self.cursor.chunk_size(),
                    reason = %e,
                    "log fetch failed, checkpoint unchanged"
                );
                return Err(e);
            }
        };
        logs.sort_by_key(RawLog::position);

        let mut persisted = 0;
        for log in &logs {
            if self.process_log(log).await.is_some() {
                persisted += 1;
            }
        }

        self.stores.state.advance(chain_id, range.to).await?;
        self.cursor.advance(range.to);
        tracing::info!(
            chain_id,
            from = range.from,
            to = range.to,
            logs = logs.len(),
            persisted,
            "range indexed"
        );
        Ok(Tick::Indexed {
            range,
            logs: logs.len(),
            persisted,
        })
    }

    /// Route, gate and dispatch one log. Returns the persisted DDO, if any.
    pub async fn process_log(&self, log: &RawLog) -> Option<Ddo> {
        let chain_id = self.chain_id();
        let Some(event_type) = router::classify(log) else {
            tracing::debug!(chain_id, tx = %log.transaction_hash, log_index = log.log_index, "unrouted log ignored");
            return None;
        };
        match self.gate.authorize(log, event_type, self.client.as_ref()).await {
            Ok(Verdict::Rejected(reason)) => {
                tracing::info!(chain_id, event = %event_type, tx = %log.transaction_hash, reason = %reason, "event not authorized");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(chain_id, event = %event_type, tx = %log.transaction_hash, reason = %e, "authorization unavailable, event dropped");
                return None;
            }
        }

        let ctx = EventContext {
            log,
            event_type,
            chain_id,
            client: self.client.as_ref(),
            stores: &self.stores,
            settings: &self.settings,
        };
        let ddo = self.registry.dispatch(&ctx).await?;
        // No subscribers is fine.
        let _ = self.events.send(IndexedEvent {
            chain_id,
            event_type,
            did: ddo.id.clone(),
            tx_hash: log.transaction_hash,
        });
        Some(ddo)
    }

    async fn drain_reindex(&mut self) {
        for task in self.queue.drain() {
            self.jobs.update(&task, CommandStatus::Pending);
            let outcome = match &task {
                ReindexTask::Transaction {
                    tx_id, event_index, ..
                } => self.reindex_tx(*tx_id, *event_index).await,
                ReindexTask::Chain { from_block, .. } => self
                    .reindex_chain(*from_block)
                    .await
                    .map(|_| TxReplay::Replayed { logs: 0, persisted: 0 }),
            };
            match outcome {
                Ok(TxReplay::ReceiptPending) => {
                    tracing::info!(chain_id = self.chain_id(), task = ?task, "receipt not available, requeued");
                    self.queue.requeue(task);
                }
                Ok(TxReplay::Replayed { .. }) => self.jobs.update(&task, CommandStatus::Success),
                Err(e) => {
                    tracing::warn!(chain_id = self.chain_id(), task = ?task, reason = %e, "reindex failed");
                    self.jobs.update(&task, CommandStatus::Failure);
                }
            }
        }
    }

    /// Replay a transaction's logs (or only `logs[event_index]`) through the full pipeline.
    /// An index past the end of the receipt replays every log.
    pub async fn reindex_tx(
        &self,
        tx_id: B256,
        event_index: Option<u64>,
    ) -> Result<TxReplay, IndexerError> {
        let client = self.client.as_ref();
        let receipt = retry(&self.settings.retry, "eth_getTransactionReceipt", || {
            client.transaction_receipt(tx_id)
        })
        .await?;
        let Some(receipt) = receipt else {
            return Ok(TxReplay::ReceiptPending);
        };

        let selected = event_index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| receipt.logs.get(i));
        let logs: Vec<&RawLog> = match (event_index, selected) {
            (_, Some(log)) => vec![log],
            (Some(i), None) => {
                tracing::warn!(
                    chain_id = self.chain_id(),
                    tx = %tx_id,
                    event_index = i,
                    logs = receipt.logs.len(),
                    "event index out of range, replaying every log"
                );
                receipt.logs.iter().collect()
            }
            (None, None) => receipt.logs.iter().collect(),
        };

        let mut persisted = 0;
        for log in &logs {
            if self.process_log(log).await.is_some() {
                persisted += 1;
            }
        }
        tracing::info!(chain_id = self.chain_id(), tx = %tx_id, logs = logs.len(), persisted, "transaction reindexed");
        Ok(TxReplay::Replayed {
            logs: logs.len(),
            persisted,
        })
    }

    /// Rewind the checkpoint to `from_block` (or the crawl start) and drop the chain's DDOs
    /// and order records. Returns the new checkpoint; on failure the old checkpoint is restored.
    pub async fn reindex_chain(&self, from_block: Option<u64>) -> Result<u64, IndexerError> {
        let chain_id = self.chain_id();
        let target = from_block.unwrap_or_else(|| self.network.crawl_start());
        let head = self.head().await?;
        if target > head {
            return Err(IndexerError::Config(format!(
                "reindex block {target} is above chain {chain_id} head {head}"
            )));
        }
        let previous = self.checkpoint().await?;
        self.stores.state.reset(chain_id, target).await?;
        let removed = match self.clear_chain(chain_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(chain_id, checkpoint = previous, reason = %e, "chain reindex failed, restoring checkpoint");
                self.stores.state.reset(chain_id, previous).await?;
                return Err(e);
            }
        };
        tracing::info!(chain_id, checkpoint = target, removed, "chain reindex scheduled");
        Ok(target)
    }

    /// Drop the chain's DDOs and order records so the rescan counts every order once.
    async fn clear_chain(&self, chain_id: u64) -> Result<usize, IndexerError> {
        let removed = self.stores.ddo.delete_all_for_chain(chain_id).await?;
        let orders = self.stores.orders.delete_all_for_chain(chain_id).await?;
        tracing::debug!(chain_id, orders, "order records cleared");
        Ok(removed)
    }

    /// Tick until `shutdown` flips to true. Sleeps `crawl_interval` when caught up, plus jitter
    /// after an error; a queued reindex task wakes the loop early.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let chain_id = self.chain_id();
        tracing::info!(chain_id, network = %self.network.network, start = self.network.crawl_start(), "chain indexer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pause = match self.tick().await {
                Ok(Tick::Indexed { .. }) => continue,
                Ok(Tick::CaughtUp { .. }) => self.crawl_interval,
                Err(e) => {
                    tracing::warn!(chain_id, reason = %e, "tick failed");
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    self.crawl_interval + jitter
                }
            };
            let queue = Arc::clone(&self.queue);
            tokio::select! {
                _ = sleep(pause) => {}
                _ = queue.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(chain_id, "chain indexer stopped");
    }
}
