//! Chain access over JSON-RPC.
//!
//! [ChainClient] is the seam the indexer talks to; [HttpChainClient] implements it with
//! reqwest (eth_blockNumber, eth_getLogs, eth_getTransactionReceipt, eth_call) and falls back
//! to secondary RPC URLs on transport errors.

use crate::abi::{decode_log, decode_receipt, parse_hex_bytes, parse_hex_u64, RawLog, Receipt};
use crate::error::IndexerError;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Block range and topic0 set for eth_getLogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    /// Match any of these topic0 values; empty means no topic filter.
    pub topics: Vec<B256>,
}

impl LogFilter {
    fn to_json(&self) -> Value {
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        });
        if !self.topics.is_empty() {
            let any: Vec<String> = self.topics.iter().map(|t| t.to_string()).collect();
            filter["topics"] = json!([any]);
        }
        filter
    }

    /// Whether `log` passes the topic0 filter (block range is not checked).
    pub fn matches(&self, log: &RawLog) -> bool {
        self.topics.is_empty() || log.topic0().is_some_and(|t| self.topics.contains(t))
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, IndexerError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;

    /// `None` while the transaction is unknown or not yet mined.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, IndexerError>;

    /// eth_call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, IndexerError>;
}

/// JSON-RPC client over HTTP with ordered fallback URLs.
pub struct HttpChainClient {
    client: reqwest::Client,
    urls: Vec<String>,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(urls: Vec<String>) -> Result<Self, IndexerError> {
        if urls.is_empty() {
            return Err(IndexerError::Config("no RPC URL".into()));
        }
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            urls,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut last_err = None;
        for url in &self.urls {
            match http_json_rpc(&self.client, url, method, params.clone(), id).await {
                Ok(v) => return Ok(v),
                // Node-level errors are not fixed by another endpoint.
                Err(e @ IndexerError::Rpc(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(url = %url, method, reason = %e, "RPC endpoint failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| IndexerError::Config("no RPC URL".into())))
    }
}

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value, IndexerError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await?;
    let json: Value = resp.json().await?;
    if let Some(err) = json.get("error") {
        return Err(IndexerError::Rpc(err.to_string()));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| IndexerError::Decode("Missing result".into()))
}

fn decode_logs(result: &Value) -> Result<Vec<RawLog>, IndexerError> {
    result
        .as_array()
        .ok_or_else(|| IndexerError::Decode("getLogs not array".into()))?
        .iter()
        .map(decode_log)
        .collect()
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| IndexerError::Decode("blockNumber not string".into()))?;
        parse_hex_u64(s)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        match self.request("eth_getLogs", json!([filter.to_json()])).await {
            Ok(result) => decode_logs(&result),
            Err(IndexerError::Rpc(reason)) if !filter.topics.is_empty() => {
                // Some nodes reject OR-ed topic filters; fetch the range unfiltered instead.
                tracing::debug!(reason = %reason, "topic-filtered eth_getLogs rejected, filtering locally");
                let unfiltered = LogFilter {
                    topics: Vec::new(),
                    ..filter.clone()
                };
                let result = self
                    .request("eth_getLogs", json!([unfiltered.to_json()]))
                    .await?;
                Ok(decode_logs(&result)?
                    .into_iter()
                    .filter(|log| filter.matches(log))
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, IndexerError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        decode_receipt(&result).map(Some)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, IndexerError> {
        let params = json!([{
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(&data)),
        }, "latest"]);
        let result = self.request("eth_call", params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| IndexerError::Decode("eth_call result not string".into()))?;
        Ok(Bytes::from(parse_hex_bytes(s)?))
    }
}
