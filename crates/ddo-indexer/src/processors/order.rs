//! OrderStarted / OrderReused: order counters on the DDO and ledger records.
//!
//! The ledger record is the marker that an order transaction has been counted: a transaction
//! already in the ledger is not counted again, and the record is only written once the
//! counter update on the DDO has been stored.

use super::{
    load_target, plan_stats, resolve_datatoken, to_u64, with_stats_entry, EventContext, StatsPlan,
};
use crate::abi::{OrderReused, OrderStarted};
use crate::ddo::Ddo;
use crate::error::IndexerError;
use crate::ledger::OrderFacts;
use crate::reconcile::{self, Change};

/// True when the transaction already has a ledger record.
async fn already_counted(ctx: &EventContext<'_>, tx_hash: &str) -> Result<bool, IndexerError> {
    if ctx.ledger().retrieve(tx_hash).await?.is_none() {
        return Ok(false);
    }
    tracing::debug!(chain_id = ctx.chain_id, tx = %tx_hash, "order already recorded, skipping");
    Ok(true)
}

async fn count_order(
    ctx: &EventContext<'_>,
    did: &str,
    dt: &str,
    plan: &StatsPlan,
    service_index: Option<usize>,
) -> Result<Option<Ddo>, IndexerError> {
    reconcile::mutate(ctx.stores.ddo.as_ref(), did, ctx.write_attempts(), |ddo| {
        with_stats_entry(ddo, dt, plan, service_index, |entry| {
            entry.orders += 1;
            Change::Persist
        })
    })
    .await
}

pub async fn process_started(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let ev: OrderStarted = ctx.log.decode()?;
    let tx_hash = ctx.log.transaction_hash.to_string();
    if already_counted(ctx, &tx_hash).await? {
        return Ok(None);
    }
    let datatoken = ctx.log.address;
    let (nft, did) = resolve_datatoken(ctx, datatoken).await?;
    let Some(target) = load_target(ctx, &did).await? else {
        return Ok(None);
    };
    let service_index = usize::try_from(to_u64(ev.serviceIndex)).ok();
    let Some(plan) = plan_stats(ctx, &target, datatoken, service_index).await? else {
        return Ok(None);
    };

    let dt = datatoken.to_checksum(None);
    let Some(saved) = count_order(ctx, &did, &dt, &plan, service_index).await? else {
        return Ok(None);
    };

    let record = ctx
        .ledger()
        .record_start(
            OrderFacts {
                tx_hash,
                chain_id: ctx.chain_id,
                timestamp: to_u64(ev.timestamp),
                payer: ev.payer.to_checksum(None),
                datatoken_address: dt,
                nft_address: nft.to_checksum(None),
                did: did.clone(),
            },
            ev.consumer.to_checksum(None),
        )
        .await?;
    tracing::info!(chain_id = ctx.chain_id, did = %did, tx = %record.tx_hash, "start order recorded");
    Ok(Some(saved))
}

pub async fn process_reused(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let ev: OrderReused = ctx.log.decode()?;
    let tx_hash = ctx.log.transaction_hash.to_string();
    if already_counted(ctx, &tx_hash).await? {
        return Ok(None);
    }
    let datatoken = ctx.log.address;
    let (nft, did) = resolve_datatoken(ctx, datatoken).await?;
    let Some(target) = load_target(ctx, &did).await? else {
        return Ok(None);
    };
    let Some(plan) = plan_stats(ctx, &target, datatoken, None).await? else {
        return Ok(None);
    };

    let dt = datatoken.to_checksum(None);
    let Some(saved) = count_order(ctx, &did, &dt, &plan, None).await? else {
        return Ok(None);
    };

    let start_order_id = ev.orderTxId.to_string();
    let facts = OrderFacts {
        tx_hash,
        chain_id: ctx.chain_id,
        timestamp: to_u64(ev.timestamp),
        payer: ev.caller.to_checksum(None),
        datatoken_address: dt,
        nft_address: nft.to_checksum(None),
        did: did.clone(),
    };
    match ctx.ledger().record_reuse(facts, &start_order_id).await? {
        Some(record) => {
            tracing::info!(chain_id = ctx.chain_id, did = %did, tx = %record.tx_hash, "reuse order recorded")
        }
        None => tracing::warn!(
            chain_id = ctx.chain_id,
            did = %did,
            start_order = %start_order_id,
            "start order not in ledger, reuse not recorded"
        ),
    }
    Ok(Some(saved))
}
