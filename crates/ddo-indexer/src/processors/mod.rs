//! Event processors and their dispatch table.
//!
//! Each [EventType] maps to one handler. A handler receives an [EventContext] (the log, the
//! chain, the chain client, the stores and per-chain settings) and returns the persisted DDO,
//! or `None` when the event was skipped. [ProcessorRegistry::dispatch] turns handler errors
//! into a logged drop so one bad event never aborts a batch.

pub mod metadata;
pub mod order;
pub mod pricing;

use crate::abi::RawLog;
use crate::config::AccessPolicy;
use crate::contracts::ChainReader;
use crate::ddo::{Ddo, PriceEntry, StatsEntry};
use crate::did::make_did;
use crate::error::IndexerError;
use crate::ledger::OrderLedger;
use crate::purgatory::{NoPurgatory, Purgatory};
use crate::reconcile::{
    find_or_create_stats_entry, find_service_by_datatoken, find_stats_entry, Change,
};
use crate::retry::RetryPolicy;
use crate::router::EventType;
use crate::rpc::ChainClient;
use crate::store::Stores;
use alloy::primitives::{Address, U256};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;

pub use metadata::{DecryptRequest, Decryptor, NoDecryptor};

/// Per-chain knobs shared by every handler.
#[derive(Clone)]
pub struct ProcessorSettings {
    pub retry: RetryPolicy,
    /// Only index NFTs deployed by this factory, when set.
    pub nft_factory: Option<Address>,
    pub publishers: AccessPolicy,
    pub decryptor: Arc<dyn Decryptor>,
    pub purgatory: Arc<dyn Purgatory>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            nft_factory: None,
            publishers: AccessPolicy::default(),
            decryptor: Arc::new(NoDecryptor),
            purgatory: Arc::new(NoPurgatory),
        }
    }
}

/// Everything a handler may touch while processing one log.
pub struct EventContext<'a> {
    pub log: &'a RawLog,
    pub event_type: EventType,
    pub chain_id: u64,
    pub client: &'a dyn ChainClient,
    pub stores: &'a Stores,
    pub settings: &'a ProcessorSettings,
}

impl<'a> EventContext<'a> {
    pub fn reader(&self) -> ChainReader<'a> {
        ChainReader::new(self.client, self.settings.retry)
    }

    pub fn ledger(&self) -> OrderLedger {
        OrderLedger::new(self.stores.orders.clone())
    }

    /// Optimistic-concurrency attempts for DDO writes.
    pub fn write_attempts(&self) -> u32 {
        self.settings.retry.max_attempts
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Option<Ddo>, IndexerError>>;
pub type Handler = for<'a> fn(&'a EventContext<'a>) -> HandlerFuture<'a>;

fn metadata_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    metadata::process_publish(ctx).boxed()
}

fn metadata_state_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    metadata::process_state(ctx).boxed()
}

fn order_started_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    order::process_started(ctx).boxed()
}

fn order_reused_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    order::process_reused(ctx).boxed()
}

fn dispenser_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    pricing::process_dispenser(ctx).boxed()
}

fn exchange_handler<'a>(ctx: &'a EventContext<'a>) -> HandlerFuture<'a> {
    pricing::process_exchange(ctx).boxed()
}

/// Tagged dispatch table from event type to handler.
pub struct ProcessorRegistry {
    handlers: HashMap<EventType, Handler>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<EventType, Handler> = HashMap::new();
        handlers.insert(EventType::MetadataCreated, metadata_handler);
        handlers.insert(EventType::MetadataUpdated, metadata_handler);
        handlers.insert(EventType::MetadataState, metadata_state_handler);
        handlers.insert(EventType::OrderStarted, order_started_handler);
        handlers.insert(EventType::OrderReused, order_reused_handler);
        for ty in [
            EventType::DispenserCreated,
            EventType::DispenserActivated,
            EventType::DispenserDeactivated,
        ] {
            handlers.insert(ty, dispenser_handler);
        }
        for ty in [
            EventType::ExchangeCreated,
            EventType::ExchangeActivated,
            EventType::ExchangeDeactivated,
            EventType::ExchangeRateChanged,
        ] {
            handlers.insert(ty, exchange_handler);
        }
        Self { handlers }
    }

    pub fn handler(&self, event_type: EventType) -> Option<Handler> {
        self.handlers.get(&event_type).copied()
    }

    /// Run the handler for `ctx.event_type`. Failures are logged and reported as `None`.
    pub async fn dispatch(&self, ctx: &EventContext<'_>) -> Option<Ddo> {
        let handler = self.handler(ctx.event_type)?;
        match handler(ctx).await {
            Ok(ddo) => ddo,
            Err(e) => {
                tracing::warn!(
                    chain_id = ctx.chain_id,
                    event = %ctx.event_type,
                    tx = %ctx.log.transaction_hash,
                    log_index = ctx.log.log_index,
                    reason = %e,
                    "event dropped"
                );
                None
            }
        }
    }
}

/// Saturating U256 -> u64 for timestamps and indices.
pub(crate) fn to_u64(v: U256) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// On-chain facts used to synthesize a missing stats entry.
#[derive(Debug, Clone)]
pub(crate) struct StatsSeed {
    pub name: String,
    pub symbol: String,
    pub prices: Vec<PriceEntry>,
}

impl StatsSeed {
    fn into_entry(self, datatoken: &str, service_id: String) -> StatsEntry {
        StatsEntry {
            datatoken_address: datatoken.to_string(),
            name: self.name,
            symbol: self.symbol,
            service_id,
            orders: 0,
            prices: self.prices,
        }
    }
}

/// NFT and DID owning a datatoken.
pub(crate) async fn resolve_datatoken(
    ctx: &EventContext<'_>,
    datatoken: Address,
) -> Result<(Address, String), IndexerError> {
    let nft = ctx.reader().datatoken_nft(datatoken).await?;
    Ok((nft, make_did(&nft, ctx.chain_id)))
}

/// Current DDO for a secondary (order/pricing) event, or `None` when it should be skipped.
pub(crate) async fn load_target(ctx: &EventContext<'_>, did: &str) -> Result<Option<Ddo>, IndexerError> {
    let Some(current) = ctx.stores.ddo.retrieve(did).await? else {
        tracing::info!(chain_id = ctx.chain_id, did, event = %ctx.event_type, "DDO does not exist, skipping");
        return Ok(None);
    };
    if current.doc.is_tombstone() {
        tracing::info!(chain_id = ctx.chain_id, did, event = %ctx.event_type, "DDO is deprecated, skipping");
        return Ok(None);
    }
    Ok(Some(current.doc))
}

/// How a handler's stats change will find its entry.
pub(crate) enum StatsPlan {
    Existing,
    /// Entry is missing; synthesize it from the seed.
    Synthesize(StatsSeed),
}

/// Decide up front whether the datatoken's stats entry exists, and if not, whether it can be
/// synthesized (the DDO needs a service for the datatoken). `None` means drop the event.
pub(crate) async fn plan_stats(
    ctx: &EventContext<'_>,
    target: &Ddo,
    datatoken: Address,
    service_index: Option<usize>,
) -> Result<Option<StatsPlan>, IndexerError> {
    let dt = datatoken.to_checksum(None);
    if target
        .stats()
        .iter()
        .any(|s| s.datatoken_address.eq_ignore_ascii_case(&dt))
    {
        return Ok(Some(StatsPlan::Existing));
    }
    if service_for(target, &dt, service_index).is_none() {
        tracing::info!(
            chain_id = ctx.chain_id,
            did = %target.id,
            datatoken = %dt,
            "DDO has no service for datatoken, skipping"
        );
        return Ok(None);
    }
    let reader = ctx.reader();
    let seed = StatsSeed {
        name: reader.token_name(datatoken).await?,
        symbol: reader.token_symbol(datatoken).await?,
        prices: reader.prices(datatoken).await?,
    };
    Ok(Some(StatsPlan::Synthesize(seed)))
}

fn service_for(ddo: &Ddo, datatoken: &str, service_index: Option<usize>) -> Option<String> {
    service_index
        .and_then(|i| ddo.services.get(i))
        .filter(|s| s.datatoken_address.eq_ignore_ascii_case(datatoken))
        .or_else(|| find_service_by_datatoken(ddo, datatoken))
        .map(|s| s.id.clone())
}

/// Apply `f` to the datatoken's stats entry, synthesizing it from the plan when absent.
///
/// A synthesized entry is always persisted; otherwise `f` decides.
pub(crate) fn with_stats_entry<F>(
    ddo: &mut Ddo,
    datatoken: &str,
    plan: &StatsPlan,
    service_index: Option<usize>,
    f: F,
) -> Change
where
    F: FnOnce(&mut StatsEntry) -> Change,
{
    if ddo.is_tombstone() {
        return Change::Skip;
    }
    if let Some(entry) = find_stats_entry(ddo, datatoken) {
        return f(entry);
    }
    let StatsPlan::Synthesize(seed) = plan else {
        // Entry disappeared between planning and writing.
        tracing::debug!(did = %ddo.id, datatoken, "stats entry vanished, skipping");
        return Change::Skip;
    };
    let Some(service_id) = service_for(ddo, datatoken, service_index) else {
        return Change::Skip;
    };
    let entry = find_or_create_stats_entry(ddo, datatoken, || {
        seed.clone().into_entry(datatoken, service_id)
    });
    f(entry);
    Change::Persist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddo::Service;
    use serde_json::Map;

    fn ddo_with_service(datatoken: &str) -> Ddo {
        Ddo {
            id: "did:op:x".into(),
            version: None,
            chain_id: 1,
            nft_address: "0xNFT".into(),
            services: vec![Service {
                id: "svc".into(),
                kind: "access".into(),
                datatoken_address: datatoken.into(),
                timeout: 0,
                extra: Map::new(),
            }],
            indexed_metadata: None,
            extra: Map::new(),
        }
    }

    fn seed() -> StatsPlan {
        StatsPlan::Synthesize(StatsSeed {
            name: "Token".into(),
            symbol: "TKN".into(),
            prices: vec![],
        })
    }

    #[test]
    fn every_event_type_has_a_handler() {
        let registry = ProcessorRegistry::new();
        for ty in EventType::ALL {
            assert!(registry.handler(ty).is_some(), "{ty}");
        }
    }

    #[test]
    fn synthesizes_missing_entry_once() {
        let mut d = ddo_with_service("0xDT");
        let change = with_stats_entry(&mut d, "0xdt", &seed(), None, |e| {
            e.orders += 1;
            Change::Skip
        });
        // Synthesis forces a write even if the closure declines.
        assert_eq!(change, Change::Persist);
        assert_eq!(d.stats()[0].service_id, "svc");
        assert_eq!(d.stats()[0].orders, 1);

        with_stats_entry(&mut d, "0xDT", &seed(), None, |e| {
            e.orders += 1;
            Change::Persist
        });
        assert_eq!(d.stats().len(), 1);
        assert_eq!(d.stats()[0].orders, 2);
    }

    #[test]
    fn existing_plan_without_entry_skips() {
        let mut d = ddo_with_service("0xDT");
        let change = with_stats_entry(&mut d, "0xDT", &StatsPlan::Existing, None, |_| Change::Persist);
        assert_eq!(change, Change::Skip);
    }

    #[test]
    fn service_index_must_match_datatoken() {
        let d = ddo_with_service("0xDT");
        assert_eq!(service_for(&d, "0xdt", Some(0)).as_deref(), Some("svc"));
        assert_eq!(service_for(&d, "0xdt", Some(7)).as_deref(), Some("svc"));
        assert_eq!(service_for(&d, "0xother", Some(0)), None);
    }
}
