//! Dispenser and fixed-rate exchange events: maintain the price list of a datatoken's stats.

use super::{load_target, plan_stats, resolve_datatoken, with_stats_entry, EventContext};
use crate::abi::{
    DispenserActivated, DispenserCreated, DispenserDeactivated, ExchangeActivated,
    ExchangeCreated, ExchangeDeactivated, ExchangeRateChanged,
};
use crate::ddo::{Ddo, PriceEntry};
use crate::error::IndexerError;
use crate::reconcile::{self, insert_price, remove_price, set_price, Change, PriceKey};
use crate::router::EventType;
use alloy::primitives::utils::format_ether;

fn changed(did_change: bool) -> Change {
    if did_change {
        Change::Persist
    } else {
        Change::Skip
    }
}

pub async fn process_dispenser(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let datatoken = match ctx.event_type {
        EventType::DispenserCreated => ctx.log.decode::<DispenserCreated>()?.datatokenAddress,
        EventType::DispenserActivated => ctx.log.decode::<DispenserActivated>()?.datatokenAddress,
        EventType::DispenserDeactivated => {
            ctx.log.decode::<DispenserDeactivated>()?.datatokenAddress
        }
        other => {
            return Err(IndexerError::Decode(format!("{other} is not a dispenser event")))
        }
    };
    let activate = ctx.event_type != EventType::DispenserDeactivated;

    let (_, did) = resolve_datatoken(ctx, datatoken).await?;
    let Some(target) = load_target(ctx, &did).await? else {
        return Ok(None);
    };
    let Some(plan) = plan_stats(ctx, &target, datatoken, None).await? else {
        return Ok(None);
    };

    let dt = datatoken.to_checksum(None);
    let contract = ctx.log.address.to_checksum(None);
    let saved = reconcile::mutate(ctx.stores.ddo.as_ref(), &did, ctx.write_attempts(), |ddo| {
        with_stats_entry(ddo, &dt, &plan, None, |entry| {
            if activate {
                changed(insert_price(entry, PriceEntry::dispenser(&contract, &dt)))
            } else {
                changed(remove_price(entry, &PriceKey::Dispenser(&contract)))
            }
        })
    })
    .await?;
    if saved.is_some() {
        tracing::info!(chain_id = ctx.chain_id, did = %did, dispenser = %contract, activate, "dispenser price updated");
    }
    Ok(saved)
}

pub async fn process_exchange(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let (exchange_id, new_rate) = match ctx.event_type {
        EventType::ExchangeCreated => (ctx.log.decode::<ExchangeCreated>()?.exchangeId, None),
        EventType::ExchangeActivated => (ctx.log.decode::<ExchangeActivated>()?.exchangeId, None),
        EventType::ExchangeDeactivated => {
            (ctx.log.decode::<ExchangeDeactivated>()?.exchangeId, None)
        }
        EventType::ExchangeRateChanged => {
            let ev = ctx.log.decode::<ExchangeRateChanged>()?;
            (ev.exchangeId, Some(ev.newRate))
        }
        other => {
            return Err(IndexerError::Decode(format!("{other} is not an exchange event")))
        }
    };
    let exchange = ctx.log.address;
    let info = ctx.reader().exchange(exchange, exchange_id).await?;

    let (_, did) = resolve_datatoken(ctx, info.datatoken).await?;
    let Some(target) = load_target(ctx, &did).await? else {
        return Ok(None);
    };
    let Some(plan) = plan_stats(ctx, &target, info.datatoken, None).await? else {
        return Ok(None);
    };

    let dt = info.datatoken.to_checksum(None);
    let contract = exchange.to_checksum(None);
    let base_token = info.base_token.to_checksum(None);
    let id = exchange_id.to_string();
    let event_type = ctx.event_type;
    let saved = reconcile::mutate(ctx.stores.ddo.as_ref(), &did, ctx.write_attempts(), |ddo| {
        with_stats_entry(ddo, &dt, &plan, None, |entry| match event_type {
            EventType::ExchangeDeactivated => changed(remove_price(entry, &PriceKey::FixedRate(&id))),
            EventType::ExchangeRateChanged => {
                let rate = new_rate.unwrap_or(info.fixed_rate);
                let updated = set_price(entry, &PriceKey::FixedRate(&id), format_ether(rate));
                if !updated {
                    tracing::info!(exchange_id = %id, "rate change for an exchange not in the DDO prices");
                }
                changed(updated)
            }
            _ => changed(insert_price(
                entry,
                PriceEntry::fixed_rate(&contract, &base_token, &id, format_ether(info.fixed_rate)),
            )),
        })
    })
    .await?;
    if saved.is_some() {
        tracing::info!(chain_id = ctx.chain_id, did = %did, exchange_id = %id, event = %event_type, "fixed-rate price updated");
    }
    Ok(saved)
}
