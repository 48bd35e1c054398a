//! Multi-chain indexer: owns one [ChainIndexer] per configured network and the admin surface.

use crate::chain::{ChainIndexer, IndexedEvent};
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::processors::Decryptor;
use crate::purgatory::{HttpPurgatory, Purgatory};
use crate::reindex::{AdminCommand, JobStatus, JobTracker, ReindexQueue};
use crate::rpc::{ChainClient, HttpChainClient};
use crate::store::Stores;
use futures_util::future::join_all;
use std::collections::HashMap;
use crate::version::{reindex_needed, MIN_REQUIRED_VERSION, NODE_VERSION};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

pub struct Indexer {
    stores: Stores,
    queues: HashMap<u64, Arc<ReindexQueue>>,
    /// Built chain loops; taken by [Indexer::run].
    chains: Mutex<Vec<ChainIndexer>>,
    jobs: Arc<JobTracker>,
    events: broadcast::Sender<IndexedEvent>,
    shutdown: watch::Sender<bool>,
}

impl Indexer {
    /// One HTTP JSON-RPC client per network (primary URL first, then fallbacks), plus the
    /// purgatory lists when their URLs are configured.
    pub fn new(config: IndexerConfig, stores: Stores) -> Result<Self, IndexerError> {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        for network in &config.networks {
            let client = HttpChainClient::new(network.rpc_urls())?;
            clients.insert(network.chain_id, Arc::new(client));
        }
        let purgatory = HttpPurgatory::new(
            config.asset_purgatory_url.clone(),
            config.account_purgatory_url.clone(),
        )?;
        let indexer = Self::with_clients(config, stores, clients)?;
        Ok(if purgatory.is_enabled() {
            indexer.with_purgatory(Arc::new(purgatory))
        } else {
            indexer
        })
    }

    /// Build with caller-supplied chain clients; every configured chain needs one.
    pub fn with_clients(
        config: IndexerConfig,
        stores: Stores,
        mut clients: HashMap<u64, Arc<dyn ChainClient>>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(1024);
        let (shutdown, _) = watch::channel(false);
        let jobs = Arc::new(JobTracker::new());

        let mut queues = HashMap::new();
        let mut chains = Vec::with_capacity(config.networks.len());
        for network in config.networks {
            let chain_id = network.chain_id;
            let client = clients
                .remove(&chain_id)
                .ok_or(IndexerError::UnknownChain(chain_id))?;
            let queue = Arc::new(ReindexQueue::new());
            let chain = ChainIndexer::builder()
                .network(network)
                .client(client)
                .stores(stores.clone())
                .validators(config.validators.clone())
                .publishers(config.publishers.clone())
                .retry(config.rpc_retry)
                .crawl_interval(config.crawl_interval)
                .queue(Arc::clone(&queue))
                .jobs(Arc::clone(&jobs))
                .events(events.clone())
                .build()?;
            queues.insert(chain_id, queue);
            chains.push(chain);
        }

        Ok(Self {
            stores,
            queues,
            chains: Mutex::new(chains),
            jobs,
            events,
            shutdown,
        })
    }

    /// Use `decryptor` for encrypted metadata on every chain. Only effective before [run](Self::run).
    pub fn with_decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        for chain in self.chains.get_mut().iter_mut() {
            chain.set_decryptor(Arc::clone(&decryptor));
        }
        self
    }

    /// Skip metadata listed by `purgatory` on every chain. Only effective before [run](Self::run).
    pub fn with_purgatory(mut self, purgatory: Arc<dyn Purgatory>) -> Self {
        for chain in self.chains.get_mut().iter_mut() {
            chain.set_purgatory(Arc::clone(&purgatory));
        }
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.queues.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexedEvent> {
        self.events.subscribe()
    }

    /// Queue an admin command on its chain and return the job that tracks it.
    pub fn submit(&self, command: AdminCommand) -> Result<JobStatus, IndexerError> {
        let chain_id = command.chain_id();
        let queue = self
            .queues
            .get(&chain_id)
            .ok_or(IndexerError::UnknownChain(chain_id))?;
        let task = command.into_task()?;
        let job = self.jobs.open(&task);
        if !queue.push(task) {
            tracing::debug!(chain_id, job_id = %job.job_id, "task already queued");
        }
        tracing::info!(chain_id, job_id = %job.job_id, command = %job.command, "admin command accepted");
        Ok(job)
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        self.jobs.all()
    }

    /// Reindex every chain from its crawl start when the stores were last written by a node
    /// older than [MIN_REQUIRED_VERSION] (or carry no version), then record this build's
    /// version. Returns whether a reindex ran.
    pub async fn check_version(&self) -> Result<bool, IndexerError> {
        let stored = self.stores.state.version().await?;
        if !reindex_needed(NODE_VERSION, stored.as_deref(), MIN_REQUIRED_VERSION)? {
            return Ok(false);
        }
        tracing::warn!(
            stored = stored.as_deref().unwrap_or("none"),
            current = NODE_VERSION,
            "stored data predates the minimum node version, reindexing every chain"
        );
        let chains = self.chains.lock().await;
        for chain in chains.iter() {
            chain.reindex_chain(None).await?;
        }
        self.stores.state.set_version(NODE_VERSION).await?;
        Ok(true)
    }

    /// Run every chain loop until [shutdown](Self::shutdown). Chains run concurrently; each loop
    /// is sequential. The version check runs first.
    pub async fn run(self: Arc<Self>) -> Result<(), IndexerError> {
        if let Err(e) = self.check_version().await {
            tracing::error!(reason = %e, "version check failed");
            return Err(e);
        }
        let chains = std::mem::take(&mut *self.chains.lock().await);
        if chains.is_empty() {
            return Err(IndexerError::Config("indexer is already running".into()));
        }
        let handles: Vec<_> = chains
            .into_iter()
            .map(|chain| {
                let shutdown = self.shutdown.subscribe();
                tokio::spawn(chain.run(shutdown))
            })
            .collect();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!(reason = %e, "chain loop panicked");
            }
        }
        Ok(())
    }

    /// Ask every chain loop to stop after its current tick.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
