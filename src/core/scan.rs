use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::archive::{ArchivedMessage, ChatTarget};
use crate::core::classify::{classify, Classification};
use crate::core::fetcher::{BatchFetcher, BATCH_SIZE};
use crate::core::progress::{ProgressSink, ProgressUpdate};
use crate::core::store::{DedupStore, Destination};

/// Per-disposition tallies for one run. Every id in the scanned range lands
/// in exactly one of these (whole-batch fetch failures count each id under
/// `errors`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounters {
    pub saved: u64,
    pub duplicate: u64,
    pub deleted: u64,
    pub no_media: u64,
    pub unsupported: u64,
    pub errors: u64,
}

impl ScanCounters {
    pub fn skipped(&self) -> u64 {
        self.deleted + self.no_media + self.unsupported
    }

    pub fn total(&self) -> u64 {
        self.saved + self.duplicate + self.skipped() + self.errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub outcome: ScanOutcome,
    pub counters: ScanCounters,
    pub scanned: i64,
    pub end_id: i64,
    pub elapsed: Duration,
}

/// One confirmed indexing run. Owns the cursor, the counters and the
/// cancellation token for its whole lifetime; nothing else mutates them.
///
/// Ids are scanned strictly ascending, one batch fully processed before the
/// next fetch. Cancellation is checked before every fetch and again before
/// every message, so at most one in-flight batch completes after the token
/// fires.
pub struct ScanJob {
    chat: ChatTarget,
    destination: Destination,
    cursor: i64,
    end_id: i64,
    counters: ScanCounters,
    cancel: CancellationToken,
    fetcher: BatchFetcher,
    store: Arc<dyn DedupStore>,
    sink: Box<dyn ProgressSink>,
}

impl ScanJob {
    /// `offset` is the exclusive lower bound: scanning starts at `offset + 1`
    /// and runs through `end_id` inclusive.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat: ChatTarget,
        destination: Destination,
        offset: i64,
        end_id: i64,
        cancel: CancellationToken,
        fetcher: BatchFetcher,
        store: Arc<dyn DedupStore>,
        sink: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            chat,
            destination,
            cursor: offset + 1,
            end_id,
            counters: ScanCounters::default(),
            cancel,
            fetcher,
            store,
            sink,
        }
    }

    /// Runs the job to termination. `Ok` covers both Completed and Cancelled;
    /// `Err` is the fatal path (the summary sink itself failed) and leaves
    /// the range unfinished.
    pub async fn run(mut self) -> Result<ScanSummary> {
        let started = Instant::now();
        info!(
            "indexing {} into {}: ids {}..={}",
            self.chat,
            self.destination.label(),
            self.cursor,
            self.end_id
        );

        while self.cursor <= self.end_id {
            if self.cancel.is_cancelled() {
                return self.finish(ScanOutcome::Cancelled, started).await;
            }

            let batch_end = (self.cursor + BATCH_SIZE as i64 - 1).min(self.end_id);
            let ids: Vec<i64> = (self.cursor..=batch_end).collect();

            let batch = match self.fetcher.fetch_batch(&self.chat, &ids).await {
                Ok(batch) => batch,
                Err(e) => {
                    // Whole batch counts as errors; the cursor still advances
                    // so the scan can never wedge on one bad range.
                    warn!(
                        "batch {}..={} failed ({} ids -> errors): {}",
                        self.cursor,
                        batch_end,
                        ids.len(),
                        e
                    );
                    self.counters.errors += ids.len() as u64;
                    self.cursor += BATCH_SIZE as i64;
                    continue;
                }
            };

            let mut interrupted = false;
            for message in &batch {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                self.process(message.as_ref()).await;
            }
            self.cursor += BATCH_SIZE as i64;

            if interrupted {
                return self.finish(ScanOutcome::Cancelled, started).await;
            }

            let update = ProgressUpdate {
                counters: self.counters,
                scanned: self.scanned(),
                end_id: self.end_id,
                elapsed: started.elapsed(),
            };
            self.sink.update(&update).await?;
        }

        self.finish(ScanOutcome::Completed, started).await
    }

    fn scanned(&self) -> i64 {
        (self.cursor - 1).min(self.end_id).max(0)
    }

    async fn process(&mut self, message: Option<&ArchivedMessage>) {
        match classify(message) {
            Classification::Deleted => self.counters.deleted += 1,
            Classification::NoMedia => self.counters.no_media += 1,
            Classification::Unsupported => self.counters.unsupported += 1,
            Classification::Indexable {
                unique_key,
                content_ref,
            } => {
                match self
                    .store
                    .insert_if_absent(self.destination, &unique_key, &content_ref)
                    .await
                {
                    Ok(true) => self.counters.saved += 1,
                    Ok(false) => self.counters.duplicate += 1,
                    Err(e) => {
                        warn!("store insert failed for key {}: {}", unique_key, e);
                        self.counters.errors += 1;
                    }
                }
            }
        }
    }

    async fn finish(mut self, outcome: ScanOutcome, started: Instant) -> Result<ScanSummary> {
        let summary = ScanSummary {
            outcome,
            counters: self.counters,
            scanned: self.scanned(),
            end_id: self.end_id,
            elapsed: started.elapsed(),
        };
        info!(
            "scan {:?}: scanned {}/{} saved={} duplicate={} skipped={} errors={} in {:?}",
            summary.outcome,
            summary.scanned,
            summary.end_id,
            summary.counters.saved,
            summary.counters.duplicate,
            summary.counters.skipped(),
            summary.counters.errors,
            summary.elapsed
        );
        self.sink.finish(&summary).await?;
        Ok(summary)
    }
}
