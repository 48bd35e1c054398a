//! ABI types and decoding for the data-asset contracts.
//!
//! Events and view functions are declared with `sol!`; raw logs and receipts are decoded
//! from the JSON-RPC shape returned by eth_getLogs / eth_getTransactionReceipt.

use crate::error::IndexerError;
use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::SolEvent;
use serde_json::Value;
use std::str::FromStr;

alloy::sol! {
    /// Emitted by an NFT when its metadata is first published.
    event MetadataCreated(
        address indexed createdBy,
        uint8 state,
        string decryptorUrl,
        bytes flags,
        bytes data,
        bytes32 metaDataHash,
        uint256 timestamp,
        uint256 blockNumber
    );

    event MetadataUpdated(
        address indexed updatedBy,
        uint8 state,
        string decryptorUrl,
        bytes flags,
        bytes data,
        bytes32 metaDataHash,
        uint256 timestamp,
        uint256 blockNumber
    );

    event MetadataState(address indexed updatedBy, uint8 state, uint256 timestamp, uint256 blockNumber);

    /// Proof emitted in the same transaction by each validator that signed the metadata.
    event MetadataValidated(address indexed validator, bytes32 metaDataHash);

    event OrderStarted(
        address indexed consumer,
        address payer,
        uint256 amount,
        uint256 serviceIndex,
        uint256 timestamp,
        address indexed publishMarketAddress,
        uint256 blockNumber
    );

    event OrderReused(bytes32 orderTxId, address caller, uint256 timestamp, uint256 number);

    event DispenserCreated(
        address indexed datatokenAddress,
        address indexed owner,
        uint256 maxTokens,
        uint256 maxBalance,
        address allowedSwapper
    );
    event DispenserActivated(address indexed datatokenAddress);
    event DispenserDeactivated(address indexed datatokenAddress);

    event ExchangeCreated(
        bytes32 indexed exchangeId,
        address indexed baseToken,
        address indexed datatoken,
        address exchangeOwner,
        uint256 fixedRate
    );
    event ExchangeActivated(bytes32 indexed exchangeId, address indexed exchangeOwner);
    event ExchangeDeactivated(bytes32 indexed exchangeId, address indexed exchangeOwner);
    event ExchangeRateChanged(bytes32 indexed exchangeId, address indexed exchangeOwner, uint256 newRate);

    interface IERC20Template {
        struct FixedRate {
            address contractAddress;
            bytes32 id;
        }

        function getERC721Address() external view returns (address);
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function getDispensers() external view returns (address[] memory);
        function getFixedRates() external view returns (FixedRate[] memory);
    }

    interface IERC721Template {
        function tokenURI(uint256 id) external view returns (string memory);
    }

    interface IDispenser {
        function status(address datatoken) external view returns (
            bool active,
            address owner,
            bool isMinter,
            uint256 maxTokens,
            uint256 maxBalance,
            uint256 balance,
            address allowedSwapper
        );
    }

    interface IFixedRateExchange {
        function getExchange(bytes32 exchangeId) external view returns (
            address exchangeOwner,
            address datatoken,
            uint256 dtDecimals,
            address baseToken,
            uint256 btDecimals,
            uint256 fixedRate,
            bool active,
            uint256 dtSupply,
            uint256 btSupply,
            uint256 dtBalance,
            uint256 btBalance,
            bool withMint
        );
    }

    interface IFactory {
        function erc721List(address nft) external view returns (address);
    }

    interface IAccessList {
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// A log as returned by eth_getLogs or inside a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Contract that emitted the log.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl RawLog {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// Decode into a typed event, validating topic0 against the event signature.
    pub fn decode<E: SolEvent>(&self) -> Result<E, IndexerError> {
        Ok(E::decode_raw_log(
            self.topics.iter().copied(),
            &self.data,
            true,
        )?)
    }

    /// Sort key for applying events in chain order.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// The parts of a transaction receipt the indexer uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub logs: Vec<RawLog>,
}

/// Decode a JSON-RPC log object.
pub fn decode_log(log: &Value) -> Result<RawLog, IndexerError> {
    let topics = log
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| IndexerError::Decode("Missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| IndexerError::Decode("topic not string".into()))
                .and_then(parse_b256)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawLog {
        address: parse_address(str_field(log, "address")?)?,
        topics,
        data: Bytes::from(parse_hex_bytes(str_field(log, "data")?)?),
        block_number: parse_hex_u64(str_field(log, "blockNumber")?)?,
        transaction_hash: parse_b256(str_field(log, "transactionHash")?)?,
        log_index: parse_hex_u64(str_field(log, "logIndex")?)?,
    })
}

/// Decode a JSON-RPC transaction receipt.
pub fn decode_receipt(receipt: &Value) -> Result<Receipt, IndexerError> {
    let logs = receipt
        .get("logs")
        .and_then(|l| l.as_array())
        .ok_or_else(|| IndexerError::Decode("Missing logs".into()))?
        .iter()
        .map(decode_log)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Receipt {
        transaction_hash: parse_b256(str_field(receipt, "transactionHash")?)?,
        block_number: parse_hex_u64(str_field(receipt, "blockNumber")?)?,
        from: parse_address(str_field(receipt, "from")?)?,
        logs,
    })
}

fn str_field<'a>(v: &'a Value, key: &str) -> Result<&'a str, IndexerError> {
    v.get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| IndexerError::Decode(format!("Missing {key}")))
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| IndexerError::Decode(format!("parse hex u64: {e}")))
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, IndexerError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| IndexerError::Decode(format!("parse hex bytes: {e}")))
}

pub(crate) fn parse_b256(s: &str) -> Result<B256, IndexerError> {
    B256::from_str(s).map_err(|e| IndexerError::Decode(format!("parse bytes32 {s:?}: {e}")))
}

fn parse_address(s: &str) -> Result<Address, IndexerError> {
    Address::from_str(s).map_err(|e| IndexerError::Decode(format!("parse address {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_log() -> Value {
        json!({
            "address": "0x00000000000000000000000000000000000000d7",
            "topics": [
                format!("{}", DispenserActivated::SIGNATURE_HASH),
                "0x00000000000000000000000000000000000000000000000000000000000000aa"
            ],
            "data": "0x",
            "blockNumber": "0x1a",
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "logIndex": "0x3"
        })
    }

    #[test]
    fn decodes_json_log_and_typed_event() {
        let log = decode_log(&json_log()).unwrap();
        assert_eq!(log.block_number, 26);
        assert_eq!(log.log_index, 3);
        assert_eq!(log.position(), (26, 3));
        assert_eq!(log.topic0(), Some(&DispenserActivated::SIGNATURE_HASH));

        let ev: DispenserActivated = log.decode().unwrap();
        assert_eq!(
            ev.datatokenAddress,
            Address::from_str("0x00000000000000000000000000000000000000aa").unwrap()
        );
        assert!(log.decode::<DispenserDeactivated>().is_err());
    }

    #[test]
    fn decodes_receipt() {
        let receipt = json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1a",
            "from": "0x00000000000000000000000000000000000000f1",
            "logs": [json_log()]
        });
        let r = decode_receipt(&receipt).unwrap();
        assert_eq!(r.logs.len(), 1);
        assert_eq!(r.block_number, 26);
    }

    #[test]
    fn rejects_pending_log() {
        let mut v = json_log();
        v["blockNumber"] = Value::Null;
        assert!(decode_log(&v).is_err());
    }
}
