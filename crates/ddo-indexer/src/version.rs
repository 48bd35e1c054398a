//! Node version bookkeeping.
//!
//! Documents written by a node older than [MIN_REQUIRED_VERSION] are not trusted: on startup
//! every chain is reindexed from its crawl start and the running version is stored.

use crate::error::IndexerError;
use std::cmp::Ordering;

/// Version of this build.
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest stored version whose documents are kept across a restart.
pub const MIN_REQUIRED_VERSION: &str = "0.1.0";

/// Compare dotted versions numerically, part by part. Missing or non-numeric parts count as 0
/// and any pre-release or build suffix is ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split(['-', '+'])
            .next()
            .unwrap_or_default()
            .split('.')
            .map(|p| p.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Whether the stores must be rebuilt before indexing with `current`.
///
/// Fails when `current` itself is below `min`: such a build would write documents it
/// refuses to read back.
pub fn reindex_needed(current: &str, stored: Option<&str>, min: &str) -> Result<bool, IndexerError> {
    if compare_versions(current, min).is_lt() {
        return Err(IndexerError::Config(format!(
            "node version {current} is below the minimum {min}"
        )));
    }
    Ok(match stored {
        None => true,
        Some(stored) => compare_versions(stored, min).is_lt(),
    })
}
