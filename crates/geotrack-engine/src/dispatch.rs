//! # Shard Dispatcher
//!
//! Fans accepted samples out to a fixed set of evaluation workers. Each
//! agent is pinned to shard `agent_id % shard_count`, so one agent's
//! samples are evaluated sequentially in arrival order while different
//! shards run in parallel.
//!
//! Queues are bounded. A full queue rejects the dispatch instead of
//! blocking the ingest path; the sample is already persisted and the
//! caller records the skipped evaluation.

use std::sync::Arc;

use geotrack_core::{AgentId, LocationSample};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::detector::ViolationDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("shard {0} queue is full")]
    QueueFull(usize),
    #[error("dispatcher is shut down")]
    Closed,
}

#[derive(Debug)]
pub struct ShardDispatcher {
    senders: RwLock<Vec<mpsc::Sender<LocationSample>>>,
    shard_count: usize,
    /// Samples queued or being evaluated.
    pending: Arc<watch::Sender<usize>>,
}

impl ShardDispatcher {
    /// Spawn `shard_count` workers with bounded queues of `capacity`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        detector: Arc<ViolationDetector>,
        shard_count: usize,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let shard_count = shard_count.max(1);
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let mut senders = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_shard(
                shard,
                rx,
                Arc::clone(&detector),
                Arc::clone(&pending),
            )));
        }
        let dispatcher = Self {
            senders: RwLock::new(senders),
            shard_count,
            pending,
        };
        (dispatcher, handles)
    }

    pub fn shard_for(&self, agent_id: AgentId) -> usize {
        (agent_id.as_uuid().as_u128() % self.shard_count as u128) as usize
    }

    /// Queue a sample for evaluation without waiting.
    pub fn dispatch(&self, sample: LocationSample) -> Result<(), DispatchError> {
        let shard = self.shard_for(sample.agent_id);
        let senders = self.senders.read();
        let tx = senders.get(shard).ok_or(DispatchError::Closed)?;
        self.pending.send_modify(|n| *n += 1);
        match tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(DispatchError::QueueFull(shard)),
                    mpsc::error::TrySendError::Closed(_) => Err(DispatchError::Closed),
                }
            }
        }
    }

    /// Samples queued or in evaluation.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every queued sample has been evaluated.
    pub async fn quiesce(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting samples. Workers drain their queues and exit.
    pub fn close(&self) {
        self.senders.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.senders.read().is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

async fn run_shard(
    shard: usize,
    mut rx: mpsc::Receiver<LocationSample>,
    detector: Arc<ViolationDetector>,
    pending: Arc<watch::Sender<usize>>,
) {
    tracing::debug!(shard, "evaluation worker started");
    while let Some(sample) = rx.recv().await {
        match detector.evaluate(&sample).await {
            Ok(outcome) => tracing::debug!(
                shard,
                agent_id = %outcome.agent_id,
                sample_id = %outcome.sample_id,
                result = ?outcome.result,
                consecutive_outside = outcome.consecutive_outside,
                "sample evaluated"
            ),
            Err(err) => tracing::error!(
                shard,
                agent_id = %sample.agent_id,
                sample_id = %sample.id,
                error = %err,
                "sample evaluation failed"
            ),
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    tracing::debug!(shard, "evaluation worker stopped");
}
