//! DDO document model.
//!
//! Only the fields the indexer reads or writes are typed; everything else a publisher puts
//! in the document is carried through `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version marker of a tombstoned DDO.
pub const DEPRECATED_VERSION: &str = "deprecated";

/// NFT metadata lifecycle state (the `state` byte of the metadata events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetadataState {
    Active = 0,
    EndOfLife = 1,
    Deprecated = 2,
    Revoked = 3,
    OrderingDisabled = 4,
    Unlisted = 5,
}

impl MetadataState {
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0 => Some(MetadataState::Active),
            1 => Some(MetadataState::EndOfLife),
            2 => Some(MetadataState::Deprecated),
            3 => Some(MetadataState::Revoked),
            4 => Some(MetadataState::OrderingDisabled),
            5 => Some(MetadataState::Unlisted),
            _ => None,
        }
    }

    /// States that hide an asset and collapse its DDO to a tombstone.
    pub fn hides_asset(self) -> bool {
        matches!(self, MetadataState::Revoked | MetadataState::Deprecated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ddo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default)]
    pub nft_address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_metadata: Option<IndexedMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ddo {
    /// Minimal document kept for an asset that left the ACTIVE state for REVOKED/DEPRECATED.
    pub fn tombstone(id: &str, chain_id: u64, nft_address: &str, state: u8) -> Self {
        Self {
            id: id.to_string(),
            version: Some(DEPRECATED_VERSION.to_string()),
            chain_id,
            nft_address: nft_address.to_string(),
            services: Vec::new(),
            indexed_metadata: Some(IndexedMetadata {
                nft: Some(NftInfo::with_state(state)),
                ..Default::default()
            }),
            extra: Map::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.version.as_deref() == Some(DEPRECATED_VERSION)
    }

    /// Current NFT state, if indexed.
    pub fn nft_state(&self) -> Option<u8> {
        self.indexed_metadata
            .as_ref()
            .and_then(|m| m.nft.as_ref())
            .map(|n| n.state)
    }

    pub fn event(&self) -> Option<&EventInfo> {
        self.indexed_metadata.as_ref().and_then(|m| m.event.as_ref())
    }

    pub fn stats(&self) -> &[StatsEntry] {
        self.indexed_metadata
            .as_ref()
            .and_then(|m| m.stats.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    /// `access` or `compute`.
    #[serde(rename = "type")]
    pub kind: String,
    pub datatoken_address: String,
    #[serde(default)]
    pub timeout: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft: Option<NftInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<StatsEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purgatory: Option<PurgatoryState>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgatoryState {
    pub state: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftInfo {
    pub state: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Unix seconds of the publishing event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, rename = "tokenURI", skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

impl NftInfo {
    pub fn with_state(state: u8) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }
}

/// Transaction that produced the current document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub tx: String,
    pub from: String,
    pub contract: String,
    pub block: u64,
}

/// Per-datatoken order and pricing statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEntry {
    pub datatoken_address: String,
    pub name: String,
    pub symbol: String,
    pub service_id: String,
    pub orders: u64,
    pub prices: Vec<PriceEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceType {
    #[serde(rename = "fixedrate")]
    FixedRate,
    #[serde(rename = "dispenser")]
    Dispenser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
    #[serde(rename = "type")]
    pub kind: PriceType,
    /// Decimal string; "0" for dispensers.
    pub price: String,
    /// Dispenser or exchange contract.
    pub contract: String,
    /// Base token for fixed-rate, datatoken for dispensers.
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
}

impl PriceEntry {
    pub fn dispenser(contract: &str, datatoken: &str) -> Self {
        Self {
            kind: PriceType::Dispenser,
            price: "0".to_string(),
            contract: contract.to_string(),
            token: datatoken.to_string(),
            exchange_id: None,
        }
    }

    pub fn fixed_rate(contract: &str, base_token: &str, exchange_id: &str, price: String) -> Self {
        Self {
            kind: PriceType::FixedRate,
            price,
            contract: contract.to_string(),
            token: base_token.to_string(),
            exchange_id: Some(exchange_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "@context": ["https://w3id.org/did/v1"],
            "id": "did:op:abc",
            "version": "4.1.0",
            "chainId": 8996,
            "nftAddress": "0x0000000000000000000000000000000000000001",
            "metadata": {"name": "dataset", "type": "dataset"},
            "services": [{
                "id": "svc-1",
                "type": "access",
                "datatokenAddress": "0x0000000000000000000000000000000000000002",
                "timeout": 0,
                "serviceEndpoint": "https://provider"
            }]
        });
        let ddo: Ddo = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(ddo.services[0].kind, "access");
        assert!(ddo.extra.contains_key("metadata"));
        assert_eq!(serde_json::to_value(&ddo).unwrap(), raw);
    }

    #[test]
    fn tombstone_shape() {
        let t = Ddo::tombstone("did:op:abc", 8996, "0xNFT", MetadataState::Revoked as u8);
        assert!(t.is_tombstone());
        assert_eq!(t.nft_state(), Some(3));
        assert_eq!(
            serde_json::to_value(&t).unwrap(),
            json!({
                "id": "did:op:abc",
                "version": "deprecated",
                "chainId": 8996,
                "nftAddress": "0xNFT",
                "indexedMetadata": {"nft": {"state": 3}}
            })
        );
    }

    #[test]
    fn price_entry_serializes_type_tag() {
        let p = PriceEntry::dispenser("0xD", "0xT");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "dispenser");
        assert_eq!(v["price"], "0");
        assert!(v.get("exchangeId").is_none());
    }

    #[test]
    fn hiding_states() {
        assert!(MetadataState::Revoked.hides_asset());
        assert!(MetadataState::Deprecated.hides_asset());
        assert!(!MetadataState::EndOfLife.hides_asset());
        assert_eq!(MetadataState::from_u8(5), Some(MetadataState::Unlisted));
        assert_eq!(MetadataState::from_u8(9), None);
    }
}
