// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped batch writer.

use crate::store::{Store, StoreResult, WriteBatch, WriteOp, HARD_BATCH_LIMIT};

/// Totals reported by [`BatchWriter::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub writes: usize,
}

/// Accumulates writes and commits whenever `cap` of them are pending.
///
/// Never holds more than `cap` uncommitted writes.
pub struct BatchWriter<'a> {
    store: &'a dyn Store,
    cap: usize,
    batch: WriteBatch,
    stats: BatchStats,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn Store, cap: usize) -> Self {
        Self {
            store,
            cap: cap.clamp(1, HARD_BATCH_LIMIT),
            batch: WriteBatch::new(),
            stats: BatchStats::default(),
        }
    }

    pub async fn push(&mut self, op: WriteOp) -> StoreResult<()> {
        self.batch.push(op);
        if self.batch.len() >= self.cap {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit whatever is pending.
    pub async fn flush(&mut self) -> StoreResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        let writes = batch.len();
        commit_with_retry(self.store, batch).await?;
        self.stats.batches += 1;
        self.stats.writes += writes;
        Ok(())
    }

    pub async fn finish(mut self) -> StoreResult<BatchStats> {
        self.flush().await?;
        Ok(self.stats)
    }
}

/// Commit a batch, retrying once on a transient store error.
///
/// Only used for batches whose ops are idempotent (deletes and full-record puts).
pub async fn commit_with_retry(store: &dyn Store, batch: WriteBatch) -> StoreResult<()> {
    match store.commit(batch.clone()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_transient() => {
            tracing::warn!(writes = batch.len(), err = %e, "batch commit failed, retrying once");
            store.commit(batch).await
        }
        Err(e) => Err(e),
    }
}
