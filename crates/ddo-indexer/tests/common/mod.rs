//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use ddo_indexer::abi::{
    IAccessList, IDispenser, IERC20Template, IERC721Template, IFixedRateExchange,
    MetadataCreated, MetadataUpdated,
};
use ddo_indexer::config::NetworkConfig;
use ddo_indexer::store::Versioned;
use ddo_indexer::{
    make_did, AccessPolicy, ChainClient, ChainIndexer, Ddo, DdoStore, IndexerError, LogFilter,
    MemoryStore, RawLog, Receipt, RetryPolicy, StoreError, Stores,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const CHAIN_ID: u64 = 8996;

pub fn nft() -> Address {
    Address::repeat_byte(0x11)
}
pub fn datatoken() -> Address {
    Address::repeat_byte(0x22)
}
pub fn publisher() -> Address {
    Address::repeat_byte(0x33)
}
pub fn dispenser() -> Address {
    Address::repeat_byte(0x44)
}
pub fn exchange() -> Address {
    Address::repeat_byte(0x55)
}
pub fn base_token() -> Address {
    Address::repeat_byte(0x66)
}
pub fn consumer() -> Address {
    Address::repeat_byte(0x77)
}
pub fn validator() -> Address {
    Address::repeat_byte(0x88)
}
pub fn access_list() -> Address {
    Address::repeat_byte(0x99)
}

pub fn tx(n: u8) -> B256 {
    B256::repeat_byte(n)
}

pub fn did() -> String {
    make_did(&nft(), CHAIN_ID)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ddo_indexer=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<RawLog>,
    receipts: HashMap<B256, Receipt>,
    calls: HashMap<(Address, Bytes), Bytes>,
    fail_get_logs: u32,
    get_logs_requests: Vec<(u64, u64)>,
}

/// Scripted chain: logs, receipts and eth_call results are set up by the test.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.set_head(head);
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Add a log to the chain and to its transaction's receipt.
    pub fn push_log(&self, log: RawLog) {
        let mut state = self.state.lock().unwrap();
        state
            .receipts
            .entry(log.transaction_hash)
            .or_insert_with(|| Receipt {
                transaction_hash: log.transaction_hash,
                block_number: log.block_number,
                from: publisher(),
                logs: Vec::new(),
            })
            .logs
            .push(log.clone());
        state.logs.push(log);
    }

    /// Make the next `n` eth_getLogs requests fail.
    pub fn fail_next_get_logs(&self, n: u32) {
        self.state.lock().unwrap().fail_get_logs = n;
    }

    pub fn get_logs_requests(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().get_logs_requests.clone()
    }

    /// Answer `call` on `to` with `returns`, the ABI-encoded return tuple.
    pub fn on_call<C: SolCall>(&self, to: Address, call: C, returns: Vec<u8>) {
        let key = (to, Bytes::from(call.abi_encode()));
        let value = Bytes::from(returns);
        self.state.lock().unwrap().calls.insert(key, value);
    }

    /// Datatoken view calls: owning NFT, name, symbol, no dispensers or exchanges yet.
    pub fn stub_datatoken(&self, dt: Address, nft: Address) {
        self.on_call(dt, IERC20Template::getERC721AddressCall {}, (nft,).abi_encode_params());
        self.on_call(dt, IERC20Template::nameCall {}, ("Datatoken 1".to_string(),).abi_encode_params());
        self.on_call(dt, IERC20Template::symbolCall {}, ("DT1".to_string(),).abi_encode_params());
        self.set_dispensers(dt, vec![]);
        self.on_call(
            dt,
            IERC20Template::getFixedRatesCall {},
            (Vec::<IERC20Template::FixedRate>::new(),).abi_encode_params(),
        );
    }

    pub fn set_dispensers(&self, dt: Address, dispensers: Vec<Address>) {
        self.on_call(dt, IERC20Template::getDispensersCall {}, (dispensers,).abi_encode_params());
    }

    pub fn set_dispenser_status(&self, dispenser: Address, dt: Address, active: bool) {
        self.on_call(
            dispenser,
            IDispenser::statusCall { datatoken: dt },
            (
                active,
                publisher(),
                true,
                U256::from(10u64),
                U256::from(10u64),
                U256::ZERO,
                Address::ZERO,
            )
                .abi_encode_params(),
        );
    }

    pub fn set_fixed_rates(&self, dt: Address, rates: Vec<(Address, B256)>) {
        let rates: Vec<IERC20Template::FixedRate> = rates
            .into_iter()
            .map(|(contract, id)| IERC20Template::FixedRate {
                contractAddress: contract,
                id,
            })
            .collect();
        self.on_call(dt, IERC20Template::getFixedRatesCall {}, (rates,).abi_encode_params());
    }

    pub fn set_exchange(&self, exchange: Address, id: B256, dt: Address, rate: U256, active: bool) {
        self.on_call(
            exchange,
            IFixedRateExchange::getExchangeCall { exchangeId: id },
            (
                publisher(),
                dt,
                U256::from(18u64),
                base_token(),
                U256::from(18u64),
                rate,
                active,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                false,
            )
                .abi_encode_params(),
        );
    }

    /// NFT view calls used when a DDO is published.
    pub fn stub_nft(&self, nft: Address) {
        self.on_call(nft, IERC20Template::nameCall {}, ("Data NFT".to_string(),).abi_encode_params());
        self.on_call(nft, IERC20Template::symbolCall {}, ("DN-1".to_string(),).abi_encode_params());
        self.on_call(
            nft,
            IERC721Template::tokenURICall { id: U256::from(1) },
            ("https://example.com/nft/1".to_string(),).abi_encode_params(),
        );
    }

    pub fn set_access_balance(&self, list: Address, account: Address, balance: u64) {
        self.on_call(list, IAccessList::balanceOfCall { owner: account }, (U256::from(balance),).abi_encode_params());
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let mut state = self.state.lock().unwrap();
        state
            .get_logs_requests
            .push((filter.from_block, filter.to_block));
        if state.fail_get_logs > 0 {
            state.fail_get_logs -= 1;
            return Err(IndexerError::Rpc("query returned more than 10000 results".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, IndexerError> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, IndexerError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&(to, data))
            .cloned()
            .ok_or_else(|| IndexerError::Rpc("execution reverted".into()))
    }
}

/// Build a log emitted by `address` from a typed event.
pub fn log_of<E: SolEvent>(address: Address, event: &E, block: u64, tx_hash: B256, log_index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number: block,
        transaction_hash: tx_hash,
        log_index,
    }
}

/// Published DDO for [nft] with one access service on `dt`.
pub fn ddo_json(dt: Address) -> Value {
    json!({
        "@context": ["https://w3id.org/did/v1"],
        "id": did(),
        "version": "4.1.0",
        "chainId": CHAIN_ID,
        "nftAddress": nft().to_checksum(None),
        "metadata": {
            "created": "2021-12-20T14:35:20Z",
            "updated": "2021-12-20T14:35:20Z",
            "type": "dataset",
            "name": "dataset-name",
            "description": "Ocean protocol test dataset description",
            "author": "oceanprotocol-team",
            "license": "MIT"
        },
        "services": [{
            "id": "svc-1",
            "type": "access",
            "files": "0x0123",
            "datatokenAddress": dt.to_checksum(None),
            "serviceEndpoint": "https://provider.example.com",
            "timeout": 0
        }]
    })
}

pub fn sha256(bytes: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(bytes))
}

pub fn metadata_created(doc: &Value, state: u8) -> MetadataCreated {
    let payload = serde_json::to_vec(doc).unwrap();
    MetadataCreated {
        createdBy: publisher(),
        state,
        decryptorUrl: "https://provider.example.com".into(),
        flags: Bytes::from(vec![0u8]),
        metaDataHash: sha256(&payload),
        data: Bytes::from(payload),
        timestamp: U256::from(1_700_000_000u64),
        blockNumber: U256::ZERO,
    }
}

pub fn metadata_updated(doc: &Value, state: u8) -> MetadataUpdated {
    let payload = serde_json::to_vec(doc).unwrap();
    MetadataUpdated {
        updatedBy: publisher(),
        state,
        decryptorUrl: "https://provider.example.com".into(),
        flags: Bytes::from(vec![0u8]),
        metaDataHash: sha256(&payload),
        data: Bytes::from(payload),
        timestamp: U256::from(1_700_000_100u64),
        blockNumber: U256::ZERO,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::ZERO)
}

pub fn network() -> NetworkConfig {
    let mut net = NetworkConfig::new(CHAIN_ID, "http://mock");
    net.chunk_size = 100;
    net
}

/// Chain indexer over `chain` with no validator policy.
pub fn chain_indexer(chain: Arc<MockChain>, stores: &Stores) -> ChainIndexer {
    chain_indexer_with(chain, stores, AccessPolicy::default())
}

pub fn chain_indexer_with(chain: Arc<MockChain>, stores: &Stores, validators: AccessPolicy) -> ChainIndexer {
    ChainIndexer::builder()
        .network(network())
        .client(chain)
        .stores(stores.clone())
        .validators(validators)
        .retry(fast_retry())
        .crawl_interval(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Standard fixture: NFT and datatoken view calls answered.
pub fn published_chain(head: u64) -> Arc<MockChain> {
    let chain = MockChain::new(head);
    chain.stub_nft(nft());
    chain.stub_datatoken(datatoken(), nft());
    chain
}

/// DDO store over a [MemoryStore] whose updates or chain deletes can be made to fail.
#[derive(Default)]
pub struct FlakyDdoStore {
    pub inner: MemoryStore,
    pub fail_updates: AtomicBool,
    pub fail_chain_delete: AtomicBool,
}

#[async_trait]
impl DdoStore for FlakyDdoStore {
    async fn retrieve(&self, id: &str) -> Result<Option<Versioned<Ddo>>, StoreError> {
        self.inner.retrieve(id).await
    }

    async fn create(&self, doc: Ddo) -> Result<Versioned<Ddo>, StoreError> {
        self.inner.create(doc).await
    }

    async fn update(&self, doc: Ddo, expected: u64) -> Result<Versioned<Ddo>, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("update refused".into()));
        }
        self.inner.update(doc, expected).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn delete_all_for_chain(&self, chain_id: u64) -> Result<usize, StoreError> {
        if self.fail_chain_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("delete refused".into()));
        }
        DdoStore::delete_all_for_chain(&self.inner, chain_id).await
    }
}

/// Stores whose DDO side is a [FlakyDdoStore]; orders and checkpoints stay in memory.
pub fn flaky_stores() -> (Stores, Arc<FlakyDdoStore>) {
    let ddo = Arc::new(FlakyDdoStore::default());
    let rest = Arc::new(MemoryStore::default());
    let stores = Stores {
        ddo: ddo.clone(),
        orders: rest.clone(),
        state: rest,
    };
    (stores, ddo)
}
