//! The submission pipeline that turns individual `AsrRecord`s into closed,
//! anchored Merkle batches (§5.2, §5.3).
//!
//! Batch lifecycle: `Open` (accepting records) -> `Closed` (root computed,
//! not yet submitted) -> `Submitted` (handed to the anchor sink) ->
//! `Confirmed` | `Failed`. A batch closes when it reaches `BATCH_MAX`
//! records or `BATCH_MAX_AGE` has elapsed since its first record, whichever
//! comes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::anchor::{AnchorFailure, AnchorSink};
use crate::identity::AgentId;
use crate::metadata::MetadataValue;

use super::merkle::MerkleBatch;
use super::record::{AsrAction, AsrError, AsrRecord};
use super::store::AsrStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Open,
    Closed,
    Submitted,
    Confirmed,
    Failed,
}

pub struct BatchHandle {
    pub batch: MerkleBatch,
    pub status: BatchStatus,
    pub tx_id: Option<String>,
}

struct OpenBatch {
    records: Vec<AsrRecord>,
    opened_at: Instant,
}

impl OpenBatch {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            opened_at: Instant::now(),
        }
    }
}

/// Coordinates record submission, store persistence, and batch closing.
/// Holds no global state — a caller constructs one explicitly per context
/// (§9) and shares it behind an `Arc`.
pub struct AsrPipeline<S: AsrStore, A: AnchorSink> {
    store: Arc<S>,
    anchor: Arc<A>,
    batch_max: usize,
    batch_max_age: Duration,
    open_batch: Mutex<OpenBatch>,
}

impl<S: AsrStore, A: AnchorSink> AsrPipeline<S, A> {
    pub fn new(store: Arc<S>, anchor: Arc<A>, batch_max: usize, batch_max_age: Duration) -> Self {
        Self {
            store,
            anchor,
            batch_max,
            batch_max_age,
            open_batch: Mutex::new(OpenBatch::new()),
        }
    }

    /// Sign, persist, and enqueue a new record for batching. Returns the
    /// record so callers can log its `asr_id`.
    pub async fn submit(
        &self,
        agent_id: AgentId,
        action: AsrAction,
        threat_level: u32,
        pqc_status: impl Into<String>,
        metadata: MetadataValue,
    ) -> Result<AsrRecord, AsrError> {
        let timestamp = self.store.assign_timestamp(agent_id);
        let record = AsrRecord::new(timestamp, agent_id, action, threat_level, pqc_status, metadata);
        self.store.append(record.clone())?;

        let mut open = self.open_batch.lock().await;
        open.records.push(record.clone());
        info!(asr_id = %record.asr_id, agent = %agent_id, "asr record queued for batching");
        Ok(record)
    }

    /// Close the current batch if it has met either closing trigger.
    /// Returns `None` if the batch is still open.
    pub async fn maybe_close_batch(&self) -> Option<MerkleBatch> {
        let mut open = self.open_batch.lock().await;
        let should_close = !open.records.is_empty()
            && (open.records.len() >= self.batch_max || open.opened_at.elapsed() >= self.batch_max_age);
        if !should_close {
            return None;
        }
        let closing = std::mem::replace(&mut *open, OpenBatch::new());
        Some(MerkleBatch::build(&closing.records))
    }

    /// Force-close whatever is currently open, regardless of size or age
    /// (used on shutdown so no records are left unanchored).
    pub async fn force_close_batch(&self) -> Option<MerkleBatch> {
        let mut open = self.open_batch.lock().await;
        if open.records.is_empty() {
            return None;
        }
        let closing = std::mem::replace(&mut *open, OpenBatch::new());
        Some(MerkleBatch::build(&closing.records))
    }

    /// Submit a closed batch's root to the anchor sink, returning its
    /// transaction id on success.
    pub async fn anchor_batch(&self, batch: &MerkleBatch) -> Result<String, AnchorFailure> {
        match self.anchor.submit(&batch.root).await {
            Ok(receipt) => {
                info!(tx_id = %receipt.tx_id, leaves = batch.leaf_count(), "batch anchored");
                Ok(receipt.tx_id)
            }
            Err(e) => {
                error!(error = %e, "batch anchoring failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::NoopAnchorSink;
    use crate::asr::store::InMemoryAsrStore;

    fn agent() -> AgentId {
        AgentId::from_bytes([4u8; 20])
    }

    #[tokio::test]
    async fn batch_closes_at_max_size() {
        let pipeline = AsrPipeline::new(
            Arc::new(InMemoryAsrStore::new()),
            Arc::new(NoopAnchorSink),
            3,
            Duration::from_secs(3600),
        );
        for _ in 0..3 {
            pipeline
                .submit(agent(), AsrAction::Encrypted, 0, "active", MetadataValue::map())
                .await
                .unwrap();
        }
        let batch = pipeline.maybe_close_batch().await.unwrap();
        assert_eq!(batch.leaf_count(), 3);
    }

    #[tokio::test]
    async fn batch_does_not_close_before_threshold() {
        let pipeline = AsrPipeline::new(
            Arc::new(InMemoryAsrStore::new()),
            Arc::new(NoopAnchorSink),
            5,
            Duration::from_secs(3600),
        );
        pipeline
            .submit(agent(), AsrAction::Encrypted, 0, "active", MetadataValue::map())
            .await
            .unwrap();
        assert!(pipeline.maybe_close_batch().await.is_none());
    }

    #[tokio::test]
    async fn force_close_flushes_partial_batch() {
        let pipeline = AsrPipeline::new(
            Arc::new(InMemoryAsrStore::new()),
            Arc::new(NoopAnchorSink),
            50,
            Duration::from_secs(3600),
        );
        pipeline
            .submit(agent(), AsrAction::Encrypted, 0, "active", MetadataValue::map())
            .await
            .unwrap();
        let batch = pipeline.force_close_batch().await.unwrap();
        assert_eq!(batch.leaf_count(), 1);
        assert!(pipeline.force_close_batch().await.is_none());
    }

    #[tokio::test]
    async fn anchoring_a_closed_batch_returns_tx_id() {
        let pipeline = AsrPipeline::new(
            Arc::new(InMemoryAsrStore::new()),
            Arc::new(NoopAnchorSink),
            1,
            Duration::from_secs(3600),
        );
        pipeline
            .submit(agent(), AsrAction::Encrypted, 0, "active", MetadataValue::map())
            .await
            .unwrap();
        let batch = pipeline.maybe_close_batch().await.unwrap();
        let tx_id = pipeline.anchor_batch(&batch).await.unwrap();
        assert!(tx_id.starts_with("noop:"));
    }
}
