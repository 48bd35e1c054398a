//! Purgatory: published lists of banned assets and accounts.
//!
//! Metadata for a listed DID, or published by a listed owner, is not indexed. Every DDO that is
//! indexed carries `indexedMetadata.purgatory.state = false`.

use crate::error::IndexerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedAsset {
    pub did: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedAccount {
    pub address: String,
    #[serde(default)]
    pub reason: String,
}

#[async_trait]
pub trait Purgatory: Send + Sync {
    /// A disabled purgatory bans nothing.
    fn is_enabled(&self) -> bool;

    async fn is_banned_asset(&self, did: &str) -> bool;

    async fn is_banned_account(&self, account: &str) -> bool;
}

/// Whether a DDO with `did`, published by `owner`, is in purgatory.
pub async fn in_purgatory(purgatory: &dyn Purgatory, did: &str, owner: &str) -> bool {
    purgatory.is_enabled()
        && (purgatory.is_banned_asset(did).await || purgatory.is_banned_account(owner).await)
}

/// No lists configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPurgatory;

#[async_trait]
impl Purgatory for NoPurgatory {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn is_banned_asset(&self, _did: &str) -> bool {
        false
    }

    async fn is_banned_account(&self, _account: &str) -> bool {
        false
    }
}

/// Fixed in-memory lists. DIDs match exactly, account addresses ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgatoryLists {
    pub assets: Vec<BannedAsset>,
    pub accounts: Vec<BannedAccount>,
}

impl PurgatoryLists {
    pub fn bans_asset(&self, did: &str) -> bool {
        self.assets.iter().any(|a| a.did == did)
    }

    pub fn bans_account(&self, account: &str) -> bool {
        self.accounts
            .iter()
            .any(|a| a.address.eq_ignore_ascii_case(account))
    }
}

#[async_trait]
impl Purgatory for PurgatoryLists {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn is_banned_asset(&self, did: &str) -> bool {
        self.bans_asset(did)
    }

    async fn is_banned_account(&self, account: &str) -> bool {
        self.bans_account(account)
    }
}

/// Lists fetched over HTTP (`ASSET_PURGATORY_URL`, `ACCOUNT_PURGATORY_URL`).
///
/// The lists are loaded on first use and kept until [refresh](Self::refresh). A failed fetch
/// keeps the previous list.
pub struct HttpPurgatory {
    client: reqwest::Client,
    asset_url: Option<String>,
    account_url: Option<String>,
    lists: RwLock<Option<PurgatoryLists>>,
}

impl HttpPurgatory {
    pub fn new(asset_url: Option<String>, account_url: Option<String>) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            asset_url,
            account_url,
            lists: RwLock::new(None),
        })
    }

    /// Re-fetch both lists.
    pub async fn refresh(&self) -> PurgatoryLists {
        let mut lists = self.lists.write().await;
        let mut next = lists.clone().unwrap_or_default();
        if let Some(url) = &self.asset_url {
            match self.fetch::<BannedAsset>(url).await {
                Ok(assets) => next.assets = assets,
                Err(e) => tracing::error!(url = %url, reason = %e, "asset purgatory list unavailable"),
            }
        }
        if let Some(url) = &self.account_url {
            match self.fetch::<BannedAccount>(url).await {
                Ok(accounts) => next.accounts = accounts,
                Err(e) => tracing::error!(url = %url, reason = %e, "account purgatory list unavailable"),
            }
        }
        tracing::info!(
            assets = next.assets.len(),
            accounts = next.accounts.len(),
            "purgatory lists loaded"
        );
        *lists = Some(next.clone());
        next
    }

    async fn current(&self) -> PurgatoryLists {
        if let Some(lists) = self.lists.read().await.as_ref() {
            return lists.clone();
        }
        self.refresh().await
    }

    async fn fetch<T>(&self, url: &str) -> Result<Vec<T>, IndexerError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(parse_entries(body))
    }
}

/// Keep the well-formed entries of a JSON array; anything else reads as an empty list.
fn parse_entries<T>(body: serde_json::Value) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    match body {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Purgatory for HttpPurgatory {
    fn is_enabled(&self) -> bool {
        self.asset_url.is_some() || self.account_url.is_some()
    }

    async fn is_banned_asset(&self, did: &str) -> bool {
        self.current().await.bans_asset(did)
    }

    async fn is_banned_account(&self, account: &str) -> bool {
        self.current().await.bans_account(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lists() -> PurgatoryLists {
        PurgatoryLists {
            assets: vec![BannedAsset {
                did: "did:op:abc".into(),
                reason: "spam".into(),
            }],
            accounts: vec![BannedAccount {
                address: "0x00000000000000000000000000000000000000AA".into(),
                reason: String::new(),
            }],
        }
    }

    #[test]
    fn accounts_ignore_case_but_dids_do_not() {
        let l = lists();
        assert!(l.bans_account("0x00000000000000000000000000000000000000aa"));
        assert!(l.bans_asset("did:op:abc"));
        assert!(!l.bans_asset("did:op:ABC"));
    }

    #[tokio::test]
    async fn disabled_purgatory_bans_nothing() {
        assert!(!in_purgatory(&NoPurgatory, "did:op:abc", "0x00").await);
        assert!(in_purgatory(&lists(), "did:op:abc", "0x00").await);
        assert!(in_purgatory(&lists(), "did:op:other", "0x00000000000000000000000000000000000000aa").await);
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let assets: Vec<BannedAsset> = parse_entries(json!([
            {"did": "did:op:1", "reason": "x"},
            {"reason": "no did"},
            null,
            {"did": "did:op:2"}
        ]));
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[1].did, "did:op:2");
        assert!(parse_entries::<BannedAccount>(json!({"address": "0x1"})).is_empty());
    }

    #[tokio::test]
    async fn unset_urls_disable_http_purgatory() {
        let p = HttpPurgatory::new(None, None).unwrap();
        assert!(!p.is_enabled());
        assert!(!in_purgatory(&p, "did:op:abc", "0x00").await);
    }
}
