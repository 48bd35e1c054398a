//! Multi-chain DDO indexer: follows data-asset contract events on EVM chains and keeps a store of
//! DDOs, pricing stats and orders in step with them.
//!
//! - **Indexer**: one sequential [ChainIndexer] loop per configured chain. Each loop polls
//!   `eth_getLogs` in block ranges, routes logs by signature, checks metadata transactions
//!   against the validator policy ([AuthorizationGate]) and dispatches them to processors.
//! - **Processors**: metadata upsert and state changes, orders, dispenser and fixed-rate exchange
//!   pricing. DDO writes go through [reconcile] with compare-and-swap retries.
//! - **Reindex**: admin commands ([AdminCommand]) replay a transaction or rewind a chain; each
//!   submission is tracked as a [JobStatus]. On startup, stores last written by a node older
//!   than [version::MIN_REQUIRED_VERSION] are rebuilt from each chain's crawl start.
//! - **Purgatory**: metadata for banned assets or publishers ([Purgatory]) is not indexed.

pub mod abi;
pub mod auth;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod cursor;
pub mod ddo;
pub mod did;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod processors;
pub mod purgatory;
pub mod reconcile;
pub mod reindex;
pub mod retry;
pub mod router;
pub mod rpc;
pub mod store;
pub mod version;

pub use abi::{RawLog, Receipt};
pub use auth::{AuthorizationGate, Verdict};
pub use chain::{ChainIndexer, ChainIndexerBuilder, IndexedEvent, Tick, TxReplay};
pub use config::{AccessPolicy, IndexerConfig, NetworkConfig};
pub use cursor::{BlockRange, Cursor};
pub use ddo::{Ddo, MetadataState, PriceEntry, PurgatoryState, StatsEntry};
pub use did::make_did;
pub use error::{IndexerError, StoreError};
pub use indexer::Indexer;
pub use ledger::{OrderLedger, OrderRecord, OrderType};
pub use processors::{DecryptRequest, Decryptor, NoDecryptor, ProcessorRegistry};
pub use purgatory::{HttpPurgatory, NoPurgatory, Purgatory, PurgatoryLists};
pub use reindex::{AdminCommand, CommandStatus, JobStatus, ReindexTask};
pub use retry::RetryPolicy;
pub use router::EventType;
pub use rpc::{ChainClient, HttpChainClient, LogFilter};
pub use store::{DdoStore, IndexStateStore, MemoryStore, OrderStore, Stores};
