//! DDO reconciliation: shared helpers the processors use to edit `indexedMetadata` and to
//! persist the result.
//!
//! Every write goes through [mutate] or [upsert], which read the current revision, apply the
//! change and compare-and-swap it back, re-reading and re-applying on a revision conflict.

use crate::ddo::{Ddo, IndexedMetadata, PriceEntry, PriceType, Service, StatsEntry};
use crate::error::{IndexerError, StoreError};
use crate::store::DdoStore;

/// Outcome of a mutation closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Persist,
    Skip,
}

/// Identifies a price within a stats entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceKey<'a> {
    /// Dispenser contract address.
    Dispenser(&'a str),
    /// Fixed-rate exchange id.
    FixedRate(&'a str),
}

impl<'a> PriceKey<'a> {
    pub fn of(entry: &'a PriceEntry) -> Option<Self> {
        match entry.kind {
            PriceType::Dispenser => Some(PriceKey::Dispenser(&entry.contract)),
            PriceType::FixedRate => entry.exchange_id.as_deref().map(PriceKey::FixedRate),
        }
    }

    fn matches(&self, entry: &PriceEntry) -> bool {
        match (self, entry.kind) {
            (PriceKey::Dispenser(contract), PriceType::Dispenser) => {
                same_hex(contract, &entry.contract)
            }
            (PriceKey::FixedRate(id), PriceType::FixedRate) => entry
                .exchange_id
                .as_deref()
                .is_some_and(|e| same_hex(id, e)),
            _ => false,
        }
    }
}

/// Addresses and hashes compare case-insensitively (checksum vs lowercase).
pub fn same_hex(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Make sure `indexedMetadata` and its `stats` array exist.
pub fn ensure_indexed_metadata_shape(ddo: &mut Ddo) -> &mut IndexedMetadata {
    let meta = ddo
        .indexed_metadata
        .get_or_insert_with(IndexedMetadata::default);
    meta.stats.get_or_insert_with(Vec::new);
    meta
}

pub fn stats_mut(ddo: &mut Ddo) -> &mut Vec<StatsEntry> {
    ensure_indexed_metadata_shape(ddo)
        .stats
        .get_or_insert_with(Vec::new)
}

pub fn find_stats_entry<'a>(ddo: &'a mut Ddo, datatoken: &str) -> Option<&'a mut StatsEntry> {
    stats_mut(ddo)
        .iter_mut()
        .find(|s| same_hex(&s.datatoken_address, datatoken))
}

/// Return the datatoken's stats entry, appending `make()` if there is none.
pub fn find_or_create_stats_entry<'a, F>(
    ddo: &'a mut Ddo,
    datatoken: &str,
    make: F,
) -> &'a mut StatsEntry
where
    F: FnOnce() -> StatsEntry,
{
    let stats = stats_mut(ddo);
    let idx = match stats
        .iter()
        .position(|s| same_hex(&s.datatoken_address, datatoken))
    {
        Some(i) => i,
        None => {
            stats.push(make());
            stats.len() - 1
        }
    };
    &mut stats[idx]
}

pub fn find_service_by_datatoken<'a>(ddo: &'a Ddo, datatoken: &str) -> Option<&'a Service> {
    ddo.services
        .iter()
        .find(|s| same_hex(&s.datatoken_address, datatoken))
}

pub fn find_price_entry(prices: &[PriceEntry], key: &PriceKey<'_>) -> Option<usize> {
    prices.iter().position(|p| key.matches(p))
}

/// Append a price unless one with the same key exists. Returns whether it was added.
pub fn insert_price(entry: &mut StatsEntry, price: PriceEntry) -> bool {
    let exists = PriceKey::of(&price)
        .map(|k| find_price_entry(&entry.prices, &k).is_some())
        .unwrap_or(false);
    if exists {
        return false;
    }
    entry.prices.push(price);
    true
}

pub fn remove_price(entry: &mut StatsEntry, key: &PriceKey<'_>) -> bool {
    let before = entry.prices.len();
    entry.prices.retain(|p| !key.matches(p));
    entry.prices.len() != before
}

/// Overwrite the price of a matching entry. Returns false when no entry matches.
pub fn set_price(entry: &mut StatsEntry, key: &PriceKey<'_>, price: String) -> bool {
    match find_price_entry(&entry.prices, key) {
        Some(i) => {
            entry.prices[i].price = price;
            true
        }
        None => false,
    }
}

/// Load `did`, apply `apply`, and write it back with optimistic concurrency.
///
/// Returns the stored document, or `None` when the DDO does not exist or `apply` chose
/// [Change::Skip].
pub async fn mutate<F>(
    store: &dyn DdoStore,
    did: &str,
    attempts: u32,
    mut apply: F,
) -> Result<Option<Ddo>, IndexerError>
where
    F: FnMut(&mut Ddo) -> Change + Send,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let Some(current) = store.retrieve(did).await? else {
            tracing::debug!(did, "DDO not found");
            return Ok(None);
        };
        let mut doc = current.doc;
        if apply(&mut doc) == Change::Skip {
            return Ok(None);
        }
        match store.update(doc, current.revision).await {
            Ok(stored) => return Ok(Some(stored.doc)),
            Err(StoreError::Conflict { .. }) if attempt < attempts => {
                tracing::debug!(did, attempt, "revision conflict, re-applying");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Create or fully replace a DDO body, keeping the stored pricing stats.
pub async fn upsert(store: &dyn DdoStore, doc: Ddo, attempts: u32) -> Result<Ddo, IndexerError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match store.retrieve(&doc.id).await? {
            None => store.create(doc.clone()).await,
            Some(current) => {
                let mut next = doc.clone();
                carry_stats(&current.doc, &mut next);
                store.update(next, current.revision).await
            }
        };
        match result {
            Ok(stored) => return Ok(stored.doc),
            Err(StoreError::Conflict { .. } | StoreError::AlreadyExists(_)) if attempt < attempts => {
                tracing::debug!(did = %doc.id, attempt, "concurrent write, retrying upsert");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn carry_stats(previous: &Ddo, next: &mut Ddo) {
    let previous_stats = previous.stats();
    if previous_stats.is_empty() {
        ensure_indexed_metadata_shape(next);
        return;
    }
    ensure_indexed_metadata_shape(next).stats = Some(previous_stats.to_vec());
}
