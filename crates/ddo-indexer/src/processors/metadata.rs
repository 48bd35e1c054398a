//! MetadataCreated / MetadataUpdated / MetadataState processing.

use super::{to_u64, EventContext};
use crate::abi::{MetadataCreated, MetadataState as MetadataStateEvent, MetadataUpdated};
use crate::ddo::{Ddo, EventInfo, MetadataState, NftInfo, PurgatoryState};
use crate::did::make_did;
use crate::error::IndexerError;
use crate::purgatory::in_purgatory;
use crate::reconcile::{self, ensure_indexed_metadata_shape, Change};
use crate::router::EventType;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Flag bit marking a payload that must be decrypted by the publisher's provider.
pub const FLAG_ENCRYPTED: u8 = 0x02;

/// What a remote decryptor needs to return the plaintext DDO.
#[derive(Debug, Clone)]
pub struct DecryptRequest {
    pub decryptor_url: String,
    pub chain_id: u64,
    pub nft_address: Address,
    pub transaction_hash: B256,
    pub flags: u8,
    pub payload: Bytes,
}

/// Resolves encrypted metadata payloads.
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>, IndexerError>;
}

/// Rejects every encrypted payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecryptor;

#[async_trait]
impl Decryptor for NoDecryptor {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>, IndexerError> {
        Err(IndexerError::Decrypt(format!(
            "no decryptor configured for {}",
            request.decryptor_url
        )))
    }
}

/// Fields shared by MetadataCreated and MetadataUpdated.
struct Publish {
    owner: Address,
    state: u8,
    decryptor_url: String,
    flags: u8,
    data: Bytes,
    metadata_hash: B256,
    timestamp: u64,
}

impl From<MetadataCreated> for Publish {
    fn from(ev: MetadataCreated) -> Self {
        Self {
            owner: ev.createdBy,
            state: ev.state,
            decryptor_url: ev.decryptorUrl,
            flags: ev.flags.first().copied().unwrap_or(0),
            data: ev.data,
            metadata_hash: ev.metaDataHash,
            timestamp: to_u64(ev.timestamp),
        }
    }
}

impl From<MetadataUpdated> for Publish {
    fn from(ev: MetadataUpdated) -> Self {
        Self {
            owner: ev.updatedBy,
            state: ev.state,
            decryptor_url: ev.decryptorUrl,
            flags: ev.flags.first().copied().unwrap_or(0),
            data: ev.data,
            metadata_hash: ev.metaDataHash,
            timestamp: to_u64(ev.timestamp),
        }
    }
}

pub fn payload_hash(payload: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(payload))
}

async fn publisher_allowed(ctx: &EventContext<'_>, owner: Address) -> Result<bool, IndexerError> {
    let policy = &ctx.settings.publishers;
    if !policy.allows(&owner) {
        return Ok(false);
    }
    let lists = policy.access_lists_for(ctx.chain_id);
    if lists.is_empty() {
        return Ok(true);
    }
    ctx.reader().holds_any_access(lists, owner).await
}

async fn payload_bytes(ctx: &EventContext<'_>, publish: &Publish) -> Result<Vec<u8>, IndexerError> {
    if publish.flags & FLAG_ENCRYPTED == 0 {
        return Ok(publish.data.to_vec());
    }
    let request = DecryptRequest {
        decryptor_url: publish.decryptor_url.clone(),
        chain_id: ctx.chain_id,
        nft_address: ctx.log.address,
        transaction_hash: ctx.log.transaction_hash,
        flags: publish.flags,
        payload: publish.data.clone(),
    };
    ctx.settings.decryptor.decrypt(&request).await
}

/// Full-document upsert for MetadataCreated / MetadataUpdated.
pub async fn process_publish(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let nft = ctx.log.address;
    let chain_id = ctx.chain_id;

    if let Some(factory) = ctx.settings.nft_factory {
        if !ctx.reader().deployed_by_factory(factory, nft).await? {
            tracing::info!(chain_id, nft = %nft, "NFT not deployed by the configured factory, skipping");
            return Ok(None);
        }
    }

    let publish: Publish = match ctx.event_type {
        EventType::MetadataCreated => ctx.log.decode::<MetadataCreated>()?.into(),
        EventType::MetadataUpdated => ctx.log.decode::<MetadataUpdated>()?.into(),
        other => {
            return Err(IndexerError::Decode(format!(
                "{other} is not a metadata publish event"
            )))
        }
    };

    let payload = payload_bytes(ctx, &publish).await?;
    if payload_hash(&payload) != publish.metadata_hash {
        tracing::warn!(chain_id, nft = %nft, "metadata hash mismatch, skipping");
        return Ok(None);
    }
    let mut ddo: Ddo = serde_json::from_slice(&payload)?;
    ddo.indexed_metadata = None;

    let did = make_did(&nft, chain_id);
    if ddo.id != did {
        tracing::warn!(chain_id, expected = %did, found = %ddo.id, "DID does not match NFT, skipping");
        return Ok(None);
    }
    if !publisher_allowed(ctx, publish.owner).await? {
        tracing::info!(chain_id, did = %did, owner = %publish.owner, "publisher not authorized, skipping");
        return Ok(None);
    }

    let owner = publish.owner.to_checksum(None);
    if in_purgatory(ctx.settings.purgatory.as_ref(), &did, &owner).await {
        tracing::info!(chain_id, did = %did, owner = %owner, "asset in purgatory, skipping");
        return Ok(None);
    }

    let previous = ctx.stores.ddo.retrieve(&did).await?.map(|v| v.doc);
    match (ctx.event_type, previous.as_ref()) {
        (EventType::MetadataCreated, Some(prev))
            if prev.nft_state() == Some(MetadataState::Active as u8) =>
        {
            tracing::info!(chain_id, did = %did, "DDO already active, skipping create");
            return Ok(None);
        }
        (EventType::MetadataUpdated, None) => {
            tracing::info!(chain_id, did = %did, "update for unknown DDO, skipping");
            return Ok(None);
        }
        (EventType::MetadataUpdated, Some(prev)) => {
            if let Some(event) = prev.event() {
                let same_tx = event
                    .tx
                    .eq_ignore_ascii_case(&ctx.log.transaction_hash.to_string());
                if same_tx || event.block == ctx.log.block_number {
                    tracing::info!(chain_id, did = %did, "update already applied, skipping");
                    return Ok(None);
                }
            }
        }
        _ => {}
    }

    let reader = ctx.reader();
    let nft_name = match reader.token_name(nft).await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::debug!(nft = %nft, reason = %e, "NFT name unavailable");
            None
        }
    };
    let nft_symbol = match reader.token_symbol(nft).await {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::debug!(nft = %nft, reason = %e, "NFT symbol unavailable");
            None
        }
    };
    let token_uri = match reader.nft_token_uri(nft).await {
        Ok(u) => Some(u),
        Err(e) => {
            tracing::debug!(nft = %nft, reason = %e, "NFT tokenURI unavailable");
            None
        }
    };

    let nft_checksum = nft.to_checksum(None);
    let created = previous
        .as_ref()
        .filter(|p| !p.is_tombstone())
        .and_then(|p| p.indexed_metadata.as_ref())
        .and_then(|m| m.nft.as_ref())
        .and_then(|n| n.created)
        .unwrap_or(publish.timestamp);

    ddo.chain_id = chain_id;
    ddo.nft_address = nft_checksum.clone();
    let meta = ensure_indexed_metadata_shape(&mut ddo);
    meta.nft = Some(NftInfo {
        state: publish.state,
        address: Some(nft_checksum.clone()),
        name: nft_name,
        symbol: nft_symbol,
        owner: Some(owner.clone()),
        created: Some(created),
        token_uri,
    });
    meta.purgatory = Some(PurgatoryState { state: false });
    meta.event = Some(EventInfo {
        tx: ctx.log.transaction_hash.to_string(),
        from: owner,
        contract: nft_checksum,
        block: ctx.log.block_number,
    });

    let saved = reconcile::upsert(ctx.stores.ddo.as_ref(), ddo, ctx.write_attempts()).await?;
    tracing::info!(chain_id, did = %saved.id, event = %ctx.event_type, "DDO saved");
    Ok(Some(saved))
}

/// NFT state change: tombstone on ACTIVE -> REVOKED/DEPRECATED, in-place update otherwise.
pub async fn process_state(ctx: &EventContext<'_>) -> Result<Option<Ddo>, IndexerError> {
    let ev: MetadataStateEvent = ctx.log.decode()?;
    let chain_id = ctx.chain_id;
    let did = make_did(&ctx.log.address, chain_id);
    let new_state = ev.state;

    let saved = reconcile::mutate(ctx.stores.ddo.as_ref(), &did, ctx.write_attempts(), |ddo| {
        let current = ddo.nft_state();
        if current == Some(new_state) {
            return Change::Skip;
        }
        let hides = MetadataState::from_u8(new_state).is_some_and(MetadataState::hides_asset);
        if current == Some(MetadataState::Active as u8) && hides {
            *ddo = Ddo::tombstone(&ddo.id, chain_id, &ddo.nft_address, new_state);
            return Change::Persist;
        }
        ensure_indexed_metadata_shape(ddo)
            .nft
            .get_or_insert_with(NftInfo::default)
            .state = new_state;
        Change::Persist
    })
    .await?;

    match &saved {
        Some(ddo) if ddo.is_tombstone() => {
            tracing::info!(chain_id, did = %did, state = new_state, "DDO deprecated")
        }
        Some(_) => tracing::info!(chain_id, did = %did, state = new_state, "DDO state updated"),
        None => tracing::debug!(chain_id, did = %did, state = new_state, "state change not applied"),
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_hash_is_sha256() {
        assert_eq!(
            payload_hash(b"").to_string(),
            "0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn no_decryptor_rejects() {
        let req = DecryptRequest {
            decryptor_url: "https://provider".into(),
            chain_id: 1,
            nft_address: Address::ZERO,
            transaction_hash: B256::ZERO,
            flags: FLAG_ENCRYPTED,
            payload: Bytes::new(),
        };
        assert!(matches!(
            NoDecryptor.decrypt(&req).await,
            Err(IndexerError::Decrypt(_))
        ));
    }
}
