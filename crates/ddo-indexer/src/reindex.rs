//! Reindex tasks, the per-chain queue they wait in, and the job records returned to callers.
//!
//! Admin commands are turned into [ReindexTask]s and queued on the chain's [ReindexQueue]; the
//! chain loop drains the queue at the top of each tick. Each submission gets a [JobStatus] that
//! moves from `Delivered` to `Pending` when the loop picks the task up, and to `Success` or
//! `Failure` when it finishes. Jobs are matched to tasks by `(command, hash)`, so duplicate
//! submissions of one task all resolve together.

use crate::error::IndexerError;
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

pub const REINDEX_TX: &str = "reindexTx";
pub const REINDEX_CHAIN: &str = "reindexChain";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReindexTask {
    /// Replay one transaction, or only `logs[event_index]` of its receipt.
    Transaction {
        chain_id: u64,
        tx_id: B256,
        event_index: Option<u64>,
    },
    /// Rewind the chain's checkpoint and rebuild its DDOs.
    Chain { chain_id: u64, from_block: Option<u64> },
}

impl ReindexTask {
    pub fn chain_id(&self) -> u64 {
        match self {
            ReindexTask::Transaction { chain_id, .. } | ReindexTask::Chain { chain_id, .. } => {
                *chain_id
            }
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            ReindexTask::Transaction { .. } => REINDEX_TX,
            ReindexTask::Chain { .. } => REINDEX_CHAIN,
        }
    }

    /// sha256 over the task's key: chain id and tx hash for a transaction, chain id for a chain.
    pub fn job_hash(&self) -> String {
        let key = match self {
            ReindexTask::Transaction { chain_id, tx_id, .. } => format!("{chain_id}{tx_id}"),
            ReindexTask::Chain { chain_id, .. } => chain_id.to_string(),
        };
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

/// Admin command as received from an operator surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum AdminCommand {
    #[serde(rename = "reindexTx", rename_all = "camelCase")]
    ReindexTx {
        tx_id: String,
        chain_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_index: Option<u64>,
    },
    #[serde(rename = "reindexChain", rename_all = "camelCase")]
    ReindexChain {
        chain_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block: Option<u64>,
    },
}

impl AdminCommand {
    pub fn chain_id(&self) -> u64 {
        match self {
            AdminCommand::ReindexTx { chain_id, .. } | AdminCommand::ReindexChain { chain_id, .. } => {
                *chain_id
            }
        }
    }

    pub fn into_task(self) -> Result<ReindexTask, IndexerError> {
        Ok(match self {
            AdminCommand::ReindexTx {
                tx_id,
                chain_id,
                event_index,
            } => {
                let tx_id = tx_id
                    .parse::<B256>()
                    .map_err(|e| IndexerError::Decode(format!("txId {tx_id}: {e}")))?;
                ReindexTask::Transaction {
                    chain_id,
                    tx_id,
                    event_index,
                }
            }
            AdminCommand::ReindexChain { chain_id, block } => ReindexTask::Chain {
                chain_id,
                from_block: block,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Delivered,
    Pending,
    Success,
    Failure,
}

impl CommandStatus {
    pub fn is_final(self) -> bool {
        matches!(self, CommandStatus::Success | CommandStatus::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub command: String,
    /// Submission time, unix milliseconds.
    pub timestamp: u64,
    pub status: CommandStatus,
    pub hash: String,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Finished jobs kept for status queries before the oldest are dropped.
pub const DEFAULT_FINISHED_JOBS: usize = 1024;

/// Job records for every submitted admin command.
///
/// Unfinished jobs are always kept; finished ones are pruned oldest first past the retention.
#[derive(Debug)]
pub struct JobTracker {
    jobs: Mutex<Vec<JobStatus>>,
    seq: AtomicU64,
    retain_finished: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_JOBS)
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            retain_finished,
        }
    }

    /// Record a new `Delivered` job for `task`.
    pub fn open(&self, task: &ReindexTask) -> JobStatus {
        let timestamp = now_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let job = JobStatus {
            job_id: format!("{}_{timestamp}_{seq}", task.command()),
            command: task.command().to_string(),
            timestamp,
            status: CommandStatus::Delivered,
            hash: task.job_hash(),
        };
        lock(&self.jobs).push(job.clone());
        job
    }

    /// Move every unfinished job of `task` to `status`.
    pub fn update(&self, task: &ReindexTask, status: CommandStatus) {
        let command = task.command();
        let hash = task.job_hash();
        for job in lock(&self.jobs).iter_mut() {
            if job.command == command && job.hash == hash && !job.status.is_final() {
                job.status = status;
            }
        }
        if status.is_final() {
            self.prune();
        }
    }

    fn prune(&self) {
        let mut jobs = lock(&self.jobs);
        let finished = jobs.iter().filter(|j| j.status.is_final()).count();
        let mut excess = finished.saturating_sub(self.retain_finished);
        if excess == 0 {
            return;
        }
        jobs.retain(|j| {
            if excess > 0 && j.status.is_final() {
                excess -= 1;
                return false;
            }
            true
        });
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        lock(&self.jobs).iter().find(|j| j.job_id == job_id).cloned()
    }

    pub fn all(&self) -> Vec<JobStatus> {
        lock(&self.jobs).clone()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<ReindexTask>,
    queued: HashSet<ReindexTask>,
}

/// FIFO of reindex tasks for one chain, deduplicated on the task itself.
#[derive(Debug, Default)]
pub struct ReindexQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl ReindexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task; returns false if an identical task is already waiting.
    pub fn push(&self, task: ReindexTask) -> bool {
        let mut state = lock(&self.state);
        if !state.queued.insert(task.clone()) {
            return false;
        }
        state.tasks.push_back(task);
        drop(state);
        self.wake.notify_one();
        true
    }

    /// Resolves after the next successful [push](Self::push).
    pub async fn notified(&self) {
        self.wake.notified().await
    }

    /// Put a task back for the next tick without waking the loop.
    pub fn requeue(&self, task: ReindexTask) {
        let mut state = lock(&self.state);
        if state.queued.insert(task.clone()) {
            state.tasks.push_back(task);
        }
    }

    /// Take every waiting task in submission order.
    pub fn drain(&self) -> Vec<ReindexTask> {
        let mut state = lock(&self.state);
        state.queued.clear();
        state.tasks.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> Vec<ReindexTask> {
        lock(&self.state).tasks.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tx_task(b: u8) -> ReindexTask {
        ReindexTask::Transaction {
            chain_id: 1,
            tx_id: B256::repeat_byte(b),
            event_index: None,
        }
    }

    #[test]
    fn queue_dedups_until_drained() {
        let q = ReindexQueue::new();
        assert!(q.push(tx_task(1)));
        assert!(!q.push(tx_task(1)));
        assert!(q.push(tx_task(2)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.drain(), vec![tx_task(1), tx_task(2)]);
        assert!(q.is_empty());
        assert!(q.push(tx_task(1)));
    }

    #[test]
    fn parses_admin_commands() {
        let tx: AdminCommand = serde_json::from_value(json!({
            "command": "reindexTx",
            "txId": format!("{}", B256::repeat_byte(0xab)),
            "chainId": 8996,
            "eventIndex": 2
        }))
        .unwrap();
        assert_eq!(
            tx.clone().into_task().unwrap(),
            ReindexTask::Transaction {
                chain_id: 8996,
                tx_id: B256::repeat_byte(0xab),
                event_index: Some(2)
            }
        );
        assert_eq!(tx.chain_id(), 8996);

        let chain: AdminCommand =
            serde_json::from_value(json!({ "command": "reindexChain", "chainId": 1 })).unwrap();
        assert_eq!(
            chain.into_task().unwrap(),
            ReindexTask::Chain {
                chain_id: 1,
                from_block: None
            }
        );

        let bad = AdminCommand::ReindexTx {
            tx_id: "0x1234".into(),
            chain_id: 1,
            event_index: None,
        };
        assert!(matches!(bad.into_task(), Err(IndexerError::Decode(_))));
    }

    #[test]
    fn jobs_follow_their_task() {
        let tracker = JobTracker::new();
        let task = tx_task(3);
        let a = tracker.open(&task);
        let b = tracker.open(&task);
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.status, CommandStatus::Delivered);
        assert_eq!(a.hash, task.job_hash());

        tracker.update(&task, CommandStatus::Pending);
        tracker.update(&task, CommandStatus::Success);
        assert_eq!(tracker.get(&a.job_id).unwrap().status, CommandStatus::Success);
        assert_eq!(tracker.get(&b.job_id).unwrap().status, CommandStatus::Success);

        // A finished job is not reopened by a later run of the same task.
        tracker.update(&task, CommandStatus::Failure);
        assert_eq!(tracker.get(&a.job_id).unwrap().status, CommandStatus::Success);
    }

    #[test]
    fn finished_jobs_are_pruned_oldest_first() {
        let tracker = JobTracker::with_retention(2);
        let waiting = tracker.open(&tx_task(9));
        let done: Vec<_> = (1..=3)
            .map(|b| {
                let job = tracker.open(&tx_task(b));
                tracker.update(&tx_task(b), CommandStatus::Success);
                job
            })
            .collect();

        assert!(tracker.get(&done[0].job_id).is_none());
        assert!(tracker.get(&done[1].job_id).is_some());
        assert!(tracker.get(&done[2].job_id).is_some());
        // Open jobs survive regardless of age.
        assert_eq!(
            tracker.get(&waiting.job_id).unwrap().status,
            CommandStatus::Delivered
        );
        assert_eq!(tracker.all().len(), 3);
    }

    #[test]
    fn status_serializes_upper_case() {
        let job = JobStatus {
            job_id: "reindexChain_1_0".into(),
            command: REINDEX_CHAIN.into(),
            timestamp: 1,
            status: CommandStatus::Pending,
            hash: "h".into(),
        };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["status"], "PENDING");
        assert_eq!(v["jobId"], "reindexChain_1_0");
    }
}
