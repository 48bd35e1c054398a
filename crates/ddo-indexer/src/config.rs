//! Indexer configuration.
//!
//! Loaded from environment variables (`RPCS`, `INDEXER_INTERVAL`, `ALLOWED_VALIDATORS`,
//! `ALLOWED_VALIDATORS_LIST`, `AUTHORIZED_PUBLISHERS`, `AUTHORIZED_PUBLISHERS_LIST`,
//! `INDEXER_RPC_RETRIES`, `INDEXER_RPC_RETRY_DELAY`, `ASSET_PURGATORY_URL`,
//! `ACCOUNT_PURGATORY_URL`). JSON-valued variables are parsed with
//! serde; addresses are validated up front so a bad value fails at startup.

use crate::error::IndexerError;
use crate::retry::RetryPolicy;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: u64 = 1000;
pub const DEFAULT_CRAWL_INTERVAL_MS: u64 = 30_000;

/// Per-chain settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// Human-readable network name, used in logs.
    pub network: String,
    pub rpc_url: String,
    /// Tried in order when the primary RPC fails at the transport level.
    pub fallback_rpcs: Vec<String>,
    /// Max block range per eth_getLogs request.
    pub chunk_size: u64,
    pub start_block: u64,
    /// Block the data-asset contracts were deployed at; reindex resets to here.
    pub deployment_block: u64,
    /// When set, metadata events from NFTs not listed by this factory are ignored.
    pub nft_factory: Option<Address>,
}

impl NetworkConfig {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            network: chain_id.to_string(),
            rpc_url: rpc_url.into(),
            fallback_rpcs: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_block: 0,
            deployment_block: 0,
            nft_factory: None,
        }
    }

    /// First checkpoint for a chain with no stored progress.
    pub fn crawl_start(&self) -> u64 {
        self.start_block.max(self.deployment_block)
    }

    /// Primary URL followed by fallbacks.
    pub fn rpc_urls(&self) -> Vec<String> {
        std::iter::once(self.rpc_url.clone())
            .chain(self.fallback_rpcs.iter().cloned())
            .collect()
    }
}

/// An address allow-list plus per-chain access-list contracts.
///
/// Used for metadata validators and for publishers. An empty policy enforces nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub allowed: Vec<Address>,
    pub access_lists: HashMap<u64, Vec<Address>>,
}

impl AccessPolicy {
    pub fn is_enforced(&self, chain_id: u64) -> bool {
        !self.allowed.is_empty() || !self.access_lists_for(chain_id).is_empty()
    }

    pub fn access_lists_for(&self, chain_id: u64) -> &[Address] {
        self.access_lists
            .get(&chain_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn allows(&self, account: &Address) -> bool {
        self.allowed.is_empty() || self.allowed.contains(account)
    }
}

/// Indexer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub networks: Vec<NetworkConfig>,
    /// Validators whose `MetadataValidated` proof makes a metadata event acceptable.
    pub validators: AccessPolicy,
    /// Owners allowed to publish metadata.
    pub publishers: AccessPolicy,
    /// Sleep between polls once a chain is caught up.
    pub crawl_interval: Duration,
    pub rpc_retry: RetryPolicy,
    /// JSON list of `{did, reason}` entries whose assets are not indexed.
    pub asset_purgatory_url: Option<String>,
    /// JSON list of `{address, reason}` entries whose publications are not indexed.
    pub account_purgatory_url: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            validators: AccessPolicy::default(),
            publishers: AccessPolicy::default(),
            crawl_interval: Duration::from_millis(DEFAULT_CRAWL_INTERVAL_MS),
            rpc_retry: RetryPolicy::default(),
            asset_purgatory_url: None,
            account_purgatory_url: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RpcEntry {
    Url(String),
    Full(RpcEntryFull),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEntryFull {
    rpc: String,
    chain_id: Option<u64>,
    network: Option<String>,
    chunk_size: Option<u64>,
    start_block: Option<u64>,
    #[serde(rename = "fallbackRPCs", default)]
    fallback_rpcs: Vec<String>,
    deployment_block: Option<u64>,
    nft_factory: Option<String>,
}

impl IndexerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, IndexerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = IndexerConfig::default();

        let rpcs = lookup("RPCS").ok_or_else(|| IndexerError::Config("RPCS is not set".into()))?;
        config.networks = parse_networks(&rpcs)?;

        if let Some(ms) = lookup("INDEXER_INTERVAL") {
            config.crawl_interval = Duration::from_millis(parse_u64("INDEXER_INTERVAL", &ms)?);
        }
        if let Some(n) = lookup("INDEXER_RPC_RETRIES") {
            config.rpc_retry.max_attempts = parse_u64("INDEXER_RPC_RETRIES", &n)? as u32;
        }
        if let Some(ms) = lookup("INDEXER_RPC_RETRY_DELAY") {
            config.rpc_retry.delay = Duration::from_millis(parse_u64("INDEXER_RPC_RETRY_DELAY", &ms)?);
        }

        config.validators = AccessPolicy {
            allowed: lookup("ALLOWED_VALIDATORS")
                .map(|v| parse_address_array("ALLOWED_VALIDATORS", &v))
                .transpose()?
                .unwrap_or_default(),
            access_lists: lookup("ALLOWED_VALIDATORS_LIST")
                .map(|v| parse_access_lists("ALLOWED_VALIDATORS_LIST", &v))
                .transpose()?
                .unwrap_or_default(),
        };
        config.publishers = AccessPolicy {
            allowed: lookup("AUTHORIZED_PUBLISHERS")
                .map(|v| parse_address_array("AUTHORIZED_PUBLISHERS", &v))
                .transpose()?
                .unwrap_or_default(),
            access_lists: lookup("AUTHORIZED_PUBLISHERS_LIST")
                .map(|v| parse_access_lists("AUTHORIZED_PUBLISHERS_LIST", &v))
                .transpose()?
                .unwrap_or_default(),
        };

        config.asset_purgatory_url = lookup("ASSET_PURGATORY_URL").filter(|u| !u.trim().is_empty());
        config.account_purgatory_url =
            lookup("ACCOUNT_PURGATORY_URL").filter(|u| !u.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.networks.is_empty() {
            return Err(IndexerError::Config("no networks configured".into()));
        }
        if self.rpc_retry.max_attempts == 0 {
            return Err(IndexerError::Config("rpc retry attempts must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for net in &self.networks {
            if !seen.insert(net.chain_id) {
                return Err(IndexerError::Config(format!(
                    "chain {} configured twice",
                    net.chain_id
                )));
            }
            if net.rpc_url.trim().is_empty() {
                return Err(IndexerError::Config(format!(
                    "chain {} has an empty RPC URL",
                    net.chain_id
                )));
            }
            if net.chunk_size == 0 {
                return Err(IndexerError::Config(format!(
                    "chain {} has a zero chunk size",
                    net.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

fn parse_networks(raw: &str) -> Result<Vec<NetworkConfig>, IndexerError> {
    // BTreeMap keeps network order stable across runs.
    let entries: BTreeMap<String, RpcEntry> = serde_json::from_str(raw)
        .map_err(|e| IndexerError::Config(format!("RPCS is not valid JSON: {e}")))?;
    let mut networks = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let chain_id = parse_u64("RPCS chain id", &key)?;
        let net = match entry {
            RpcEntry::Url(url) => NetworkConfig::new(chain_id, url),
            RpcEntry::Full(full) => {
                if let Some(declared) = full.chain_id {
                    if declared != chain_id {
                        return Err(IndexerError::Config(format!(
                            "RPCS entry {key} declares chainId {declared}"
                        )));
                    }
                }
                let mut net = NetworkConfig::new(chain_id, full.rpc);
                if let Some(name) = full.network {
                    net.network = name;
                }
                net.fallback_rpcs = full.fallback_rpcs;
                net.chunk_size = full.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
                net.start_block = full.start_block.unwrap_or(0);
                net.deployment_block = full.deployment_block.unwrap_or(0);
                net.nft_factory = full
                    .nft_factory
                    .as_deref()
                    .map(|a| parse_address("nftFactory", a))
                    .transpose()?;
                net
            }
        };
        networks.push(net);
    }
    Ok(networks)
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, IndexerError> {
    raw.trim()
        .parse()
        .map_err(|e| IndexerError::Config(format!("{name}: invalid number {raw:?}: {e}")))
}

fn parse_address(name: &str, raw: &str) -> Result<Address, IndexerError> {
    Address::from_str(raw.trim())
        .map_err(|e| IndexerError::Config(format!("{name}: invalid address {raw:?}: {e}")))
}

fn parse_address_array(name: &str, raw: &str) -> Result<Vec<Address>, IndexerError> {
    let items: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| IndexerError::Config(format!("{name} is not a JSON array: {e}")))?;
    items.iter().map(|a| parse_address(name, a)).collect()
}

fn parse_access_lists(name: &str, raw: &str) -> Result<HashMap<u64, Vec<Address>>, IndexerError> {
    let items: HashMap<String, Vec<String>> = serde_json::from_str(raw)
        .map_err(|e| IndexerError::Config(format!("{name} is not a JSON object: {e}")))?;
    let mut out = HashMap::with_capacity(items.len());
    for (chain, addrs) in items {
        let chain_id = parse_u64(name, &chain)?;
        let parsed = addrs
            .iter()
            .map(|a| parse_address(name, a))
            .collect::<Result<Vec<_>, _>>()?;
        out.insert(chain_id, parsed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parses_plain_and_full_rpc_entries() {
        let cfg = IndexerConfig::from_lookup(lookup(&[
            (
                "RPCS",
                r#"{
                    "1": "http://mainnet",
                    "8996": {"rpc": "http://dev", "chainId": 8996, "network": "development",
                             "chunkSize": 100, "startBlock": 5, "deploymentBlock": 12,
                             "fallbackRPCs": ["http://dev2"]}
                }"#,
            ),
            ("INDEXER_INTERVAL", "500"),
        ]))
        .unwrap();

        assert_eq!(cfg.networks.len(), 2);
        let main = cfg.network(1).unwrap();
        assert_eq!(main.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(main.crawl_start(), 0);

        let dev = cfg.network(8996).unwrap();
        assert_eq!(dev.network, "development");
        assert_eq!(dev.chunk_size, 100);
        assert_eq!(dev.crawl_start(), 12);
        assert_eq!(dev.rpc_urls(), vec!["http://dev", "http://dev2"]);
        assert_eq!(cfg.crawl_interval, Duration::from_millis(500));
    }

    #[test]
    fn parses_validator_policy() {
        let cfg = IndexerConfig::from_lookup(lookup(&[
            ("RPCS", r#"{"8996": "http://dev"}"#),
            (
                "ALLOWED_VALIDATORS",
                r#"["0x00000000000000000000000000000000000000aa"]"#,
            ),
            (
                "ALLOWED_VALIDATORS_LIST",
                r#"{"8996": ["0x00000000000000000000000000000000000000bb"]}"#,
            ),
        ]))
        .unwrap();
        assert_eq!(cfg.validators.allowed.len(), 1);
        assert_eq!(cfg.validators.access_lists_for(8996).len(), 1);
        assert!(cfg.validators.access_lists_for(1).is_empty());
        assert!(cfg.validators.is_enforced(1));
        assert!(!cfg.publishers.is_enforced(8996));
    }

    #[test]
    fn purgatory_urls_are_optional() {
        let cfg = IndexerConfig::from_lookup(lookup(&[
            ("RPCS", r#"{"8996": "http://dev"}"#),
            ("ASSET_PURGATORY_URL", "http://lists/assets.json"),
            ("ACCOUNT_PURGATORY_URL", " "),
        ]))
        .unwrap();
        assert_eq!(cfg.asset_purgatory_url.as_deref(), Some("http://lists/assets.json"));
        assert_eq!(cfg.account_purgatory_url, None);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(IndexerConfig::from_lookup(lookup(&[])).is_err());
        assert!(IndexerConfig::from_lookup(lookup(&[("RPCS", "{}")])).is_err());
        assert!(IndexerConfig::from_lookup(lookup(&[("RPCS", r#"{"x": "http://a"}"#)])).is_err());
        assert!(IndexerConfig::from_lookup(lookup(&[
            ("RPCS", r#"{"1": "http://a"}"#),
            ("ALLOWED_VALIDATORS", r#"["not-an-address"]"#),
        ]))
        .is_err());
        assert!(IndexerConfig::from_lookup(lookup(&[(
            "RPCS",
            r#"{"1": {"rpc": "http://a", "chunkSize": 0}}"#
        )]))
        .is_err());
    }
}
