//! Authorization gate for metadata events.
//!
//! A metadata transaction is accepted when it carries a `MetadataValidated` proof from a
//! validator that is in the configured allow-list and, if the chain has access lists, holds a
//! token on one of them. With nothing configured the gate does not apply.

use crate::abi::{MetadataValidated, RawLog, Receipt};
use crate::config::AccessPolicy;
use crate::contracts::ChainReader;
use crate::error::IndexerError;
use crate::retry::{retry, RetryPolicy};
use crate::router::EventType;
use crate::rpc::ChainClient;
use alloy::primitives::Address;
use alloy::sol_types::SolEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(String),
    /// The event type is not gated or no policy is configured.
    NotApplicable,
}

impl Verdict {
    pub fn allows(&self) -> bool {
        !matches!(self, Verdict::Rejected(_))
    }
}

/// Validators that signed the transaction, in receipt order.
pub fn extract_validators(receipt: &Receipt) -> Vec<Address> {
    receipt
        .logs
        .iter()
        .filter(|log| log.topic0() == Some(&MetadataValidated::SIGNATURE_HASH))
        .filter_map(|log| log.decode::<MetadataValidated>().ok())
        .map(|ev| ev.validator)
        .collect()
}

/// Pure decision over the proof set.
///
/// `holders` are the validators that hold a token on one of the chain's access lists; pass
/// `None` when the chain has no access list.
pub fn evaluate(validators: &[Address], allow_list: &[Address], holders: Option<&[Address]>) -> Verdict {
    if validators.is_empty() {
        return Verdict::Rejected("no MetadataValidated proof in transaction".into());
    }
    if !allow_list.is_empty() && !validators.iter().any(|v| allow_list.contains(v)) {
        return Verdict::Rejected("no proof from an allowed validator".into());
    }
    if let Some(holders) = holders {
        if !validators.iter().any(|v| holders.contains(v)) {
            return Verdict::Rejected("no validator holds an access-list token".into());
        }
    }
    Verdict::Accepted
}

/// Per-chain gate built from the validator policy.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    chain_id: u64,
    policy: AccessPolicy,
    retry: RetryPolicy,
}

impl AuthorizationGate {
    pub fn new(chain_id: u64, policy: AccessPolicy, retry: RetryPolicy) -> Self {
        Self {
            chain_id,
            policy,
            retry,
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.policy.is_enforced(self.chain_id)
    }

    /// Check one routed log. Errors mean the receipt or an access-list read could not be
    /// obtained after retries; the caller drops the event.
    pub async fn authorize(
        &self,
        log: &RawLog,
        event_type: EventType,
        client: &dyn ChainClient,
    ) -> Result<Verdict, IndexerError> {
        if !event_type.requires_validation() || !self.is_enforced() {
            return Ok(Verdict::NotApplicable);
        }
        let tx = log.transaction_hash;
        let receipt = retry(&self.retry, "eth_getTransactionReceipt", || async move {
            client
                .transaction_receipt(tx)
                .await?
                .ok_or_else(|| IndexerError::Missing(format!("receipt for {tx}")))
        })
        .await?;

        let validators = extract_validators(&receipt);
        let lists = self.policy.access_lists_for(self.chain_id);
        let holders = if lists.is_empty() {
            None
        } else {
            let reader = ChainReader::new(client, self.retry);
            let mut holders = Vec::new();
            for v in &validators {
                if reader.holds_any_access(lists, *v).await? {
                    holders.push(*v);
                }
            }
            Some(holders)
        };
        Ok(evaluate(
            &validators,
            &self.policy.allowed,
            holders.as_deref(),
        ))
    }
}
