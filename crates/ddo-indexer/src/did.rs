//! DID derivation.

use alloy::primitives::Address;
use sha2::{Digest, Sha256};

pub const DID_PREFIX: &str = "did:op:";

/// `did:op:` + hex(sha256(checksumAddress(nft) + decimal(chainId))).
pub fn make_did(nft_address: &Address, chain_id: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nft_address.to_checksum(None).as_bytes());
    hasher.update(chain_id.to_string().as_bytes());
    format!("{DID_PREFIX}{}", hex::encode(hasher.finalize()))
}
