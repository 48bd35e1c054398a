//! Event routing: topic0 to [EventType].

use crate::abi::{
    DispenserActivated, DispenserCreated, DispenserDeactivated, ExchangeActivated,
    ExchangeCreated, ExchangeDeactivated, ExchangeRateChanged, MetadataCreated, MetadataState,
    MetadataUpdated, OrderReused, OrderStarted, RawLog,
};
use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use serde::Serialize;
use std::fmt;

/// Every contract event the indexer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    MetadataCreated,
    MetadataUpdated,
    MetadataState,
    OrderStarted,
    OrderReused,
    DispenserCreated,
    DispenserActivated,
    DispenserDeactivated,
    ExchangeCreated,
    ExchangeActivated,
    ExchangeDeactivated,
    ExchangeRateChanged,
}

/// Processor family an event type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Metadata,
    Order,
    Dispenser,
    Exchange,
}

/// Signature table, one row per event type.
const SIGNATURES: [(EventType, B256); 12] = [
    (EventType::MetadataCreated, MetadataCreated::SIGNATURE_HASH),
    (EventType::MetadataUpdated, MetadataUpdated::SIGNATURE_HASH),
    (EventType::MetadataState, MetadataState::SIGNATURE_HASH),
    (EventType::OrderStarted, OrderStarted::SIGNATURE_HASH),
    (EventType::OrderReused, OrderReused::SIGNATURE_HASH),
    (EventType::DispenserCreated, DispenserCreated::SIGNATURE_HASH),
    (EventType::DispenserActivated, DispenserActivated::SIGNATURE_HASH),
    (EventType::DispenserDeactivated, DispenserDeactivated::SIGNATURE_HASH),
    (EventType::ExchangeCreated, ExchangeCreated::SIGNATURE_HASH),
    (EventType::ExchangeActivated, ExchangeActivated::SIGNATURE_HASH),
    (EventType::ExchangeDeactivated, ExchangeDeactivated::SIGNATURE_HASH),
    (EventType::ExchangeRateChanged, ExchangeRateChanged::SIGNATURE_HASH),
];

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::MetadataCreated,
        EventType::MetadataUpdated,
        EventType::MetadataState,
        EventType::OrderStarted,
        EventType::OrderReused,
        EventType::DispenserCreated,
        EventType::DispenserActivated,
        EventType::DispenserDeactivated,
        EventType::ExchangeCreated,
        EventType::ExchangeActivated,
        EventType::ExchangeDeactivated,
        EventType::ExchangeRateChanged,
    ];

    pub fn family(self) -> Family {
        match self {
            EventType::MetadataCreated | EventType::MetadataUpdated | EventType::MetadataState => {
                Family::Metadata
            }
            EventType::OrderStarted | EventType::OrderReused => Family::Order,
            EventType::DispenserCreated
            | EventType::DispenserActivated
            | EventType::DispenserDeactivated => Family::Dispenser,
            EventType::ExchangeCreated
            | EventType::ExchangeActivated
            | EventType::ExchangeDeactivated
            | EventType::ExchangeRateChanged => Family::Exchange,
        }
    }

    pub fn signature_hash(self) -> B256 {
        SIGNATURES
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, h)| *h)
            .unwrap_or_default()
    }

    /// Metadata events are subject to the validator check.
    pub fn requires_validation(self) -> bool {
        self.family() == Family::Metadata
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Classify a topic0; unknown signatures yield None.
pub fn event_type_for(topic0: &B256) -> Option<EventType> {
    SIGNATURES
        .iter()
        .find(|(_, h)| h == topic0)
        .map(|(t, _)| *t)
}

/// Classify a log by its first topic. Logs without topics are ignored.
pub fn classify(log: &RawLog) -> Option<EventType> {
    log.topic0().and_then(event_type_for)
}

/// All routed topic0 values, for the eth_getLogs filter.
pub fn topics() -> Vec<B256> {
    SIGNATURES.iter().map(|(_, h)| *h).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes};
    use sha3::{Digest, Keccak256};

    fn log_with_topics(topics: Vec<B256>) -> RawLog {
        RawLog {
            address: Address::ZERO,
            topics,
            data: Bytes::new(),
            block_number: 1,
            transaction_hash: B256::ZERO,
            log_index: 0,
        }
    }

    #[test]
    fn signature_hashes_match_canonical_signatures() {
        let canonical = [
            (
                EventType::MetadataCreated,
                "MetadataCreated(address,uint8,string,bytes,bytes,bytes32,uint256,uint256)",
            ),
            (
                EventType::MetadataState,
                "MetadataState(address,uint8,uint256,uint256)",
            ),
            (
                EventType::OrderStarted,
                "OrderStarted(address,address,uint256,uint256,uint256,address,uint256)",
            ),
            (
                EventType::OrderReused,
                "OrderReused(bytes32,address,uint256,uint256)",
            ),
            (
                EventType::DispenserDeactivated,
                "DispenserDeactivated(address)",
            ),
            (
                EventType::ExchangeRateChanged,
                "ExchangeRateChanged(bytes32,address,uint256)",
            ),
        ];
        for (ty, sig) in canonical {
            let expected = B256::from_slice(&Keccak256::digest(sig.as_bytes()));
            assert_eq!(ty.signature_hash(), expected, "{sig}");
        }
    }

    #[test]
    fn every_type_routes_to_itself() {
        for ty in EventType::ALL {
            let log = log_with_topics(vec![ty.signature_hash()]);
            assert_eq!(classify(&log), Some(ty));
        }
        assert_eq!(topics().len(), EventType::ALL.len());
    }

    #[test]
    fn unknown_or_missing_topic_is_ignored() {
        assert_eq!(classify(&log_with_topics(vec![])), None);
        assert_eq!(classify(&log_with_topics(vec![B256::repeat_byte(0x42)])), None);
    }

    #[test]
    fn families() {
        assert!(EventType::MetadataState.requires_validation());
        assert!(!EventType::OrderStarted.requires_validation());
        assert_eq!(EventType::ExchangeRateChanged.family(), Family::Exchange);
        assert_eq!(EventType::DispenserCreated.family(), Family::Dispenser);
    }
}
