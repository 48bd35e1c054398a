//! Error types shared across the indexer.

use thiserror::Error;

/// Failures surfaced by chain access, decoding, persistence and configuration.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown chain {0}")]
    UnknownChain(u64),
    /// A chain object (receipt, contract state) that should exist was not found.
    #[error("missing: {0}")]
    Missing(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

impl From<alloy::sol_types::Error> for IndexerError {
    fn from(e: alloy::sol_types::Error) -> Self {
        IndexerError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Decode(e.to_string())
    }
}

/// Store-level failures. `Conflict` drives optimistic-concurrency retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("document {0} already exists")]
    AlreadyExists(String),
    #[error("revision conflict on {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },
    #[error("checkpoint for chain {chain_id} cannot move from {current} back to {requested}")]
    Regression {
        chain_id: u64,
        current: u64,
        requested: u64,
    },
    #[error("backend: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts() {
        let e: IndexerError = StoreError::NotFound("did:op:1".into()).into();
        assert!(matches!(e, IndexerError::Store(StoreError::NotFound(_))));
        assert_eq!(e.to_string(), "store error: document did:op:1 not found");
    }
}
