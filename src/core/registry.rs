use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::archive::ChatTarget;

/// How long an operator has to answer each conversation step.
pub const PENDING_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStep {
    AwaitSource,
    AwaitOffset,
    AwaitConfirm,
}

/// Result of looking up an operator's conversation state. `Expired` is
/// reported exactly once per descriptor: the entry is removed on the spot,
/// so the caller can tell the operator their session timed out without
/// nagging on every later message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingLookup {
    Step(PendingStep),
    Expired,
    Absent,
}

/// Unconfirmed job parameters for one operator. Overwritten wholesale when
/// the operator starts over with `/index`.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub step: PendingStep,
    pub chat: Option<ChatTarget>,
    pub end_id: i64,
    pub offset: i64,
    updated_at: Instant,
}

impl PendingJob {
    fn fresh() -> Self {
        Self {
            step: PendingStep::AwaitSource,
            chat: None,
            end_id: 0,
            offset: 0,
            updated_at: Instant::now(),
        }
    }
}

/// Owns everything that outlives a single conversation turn: the pending
/// descriptors, the system-wide single-flight gate and the per-operator
/// cancellation tokens. One instance, shared behind an `Arc`.
pub struct JobRegistry {
    pending: Mutex<HashMap<i64, PendingJob>>,
    gate: Arc<Mutex<()>>,
    cancels: Mutex<HashMap<i64, CancellationToken>>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_ttl(PENDING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            gate: Arc::new(Mutex::new(())),
            cancels: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// True while a confirmed job holds the gate.
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Acquire the single-flight gate without waiting. The returned guard is
    /// held for the whole run and released on drop, whatever the outcome.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        self.gate.clone().try_lock_owned().ok()
    }

    /// Start a new pending descriptor for this operator, discarding any
    /// previous one, and sweep expired entries from other operators.
    pub async fn begin_pending(&self, operator: i64) {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, job| job.updated_at.elapsed() < self.ttl);
        pending.insert(operator, PendingJob::fresh());
    }

    /// Current step for the operator, distinguishing "session timed out" from
    /// "nothing pending" so the front-end can inform the operator.
    pub async fn pending_step(&self, operator: i64) -> PendingLookup {
        let mut pending = self.pending.lock().await;
        match pending.get(&operator) {
            Some(job) if job.updated_at.elapsed() < self.ttl => PendingLookup::Step(job.step),
            Some(_) => {
                debug!("pending descriptor for {} expired", operator);
                pending.remove(&operator);
                PendingLookup::Expired
            }
            None => PendingLookup::Absent,
        }
    }

    pub async fn set_source(&self, operator: i64, chat: ChatTarget, end_id: i64) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(&operator) {
            Some(job) if job.step == PendingStep::AwaitSource => {
                job.chat = Some(chat);
                job.end_id = end_id;
                job.step = PendingStep::AwaitOffset;
                job.updated_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub async fn set_offset(&self, operator: i64, offset: i64) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(&operator) {
            Some(job) if job.step == PendingStep::AwaitOffset => {
                job.offset = offset;
                job.step = PendingStep::AwaitConfirm;
                job.updated_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Consume a fully-parameterized descriptor at confirmation time.
    pub async fn take_confirmed(&self, operator: i64) -> Option<PendingJob> {
        let mut pending = self.pending.lock().await;
        match pending.get(&operator) {
            Some(job)
                if job.step == PendingStep::AwaitConfirm
                    && job.updated_at.elapsed() < self.ttl =>
            {
                pending.remove(&operator)
            }
            Some(_) => {
                pending.remove(&operator);
                None
            }
            None => None,
        }
    }

    pub async fn drop_pending(&self, operator: i64) {
        self.pending.lock().await.remove(&operator);
    }

    /// Mint a fresh cancellation token for a confirmed job, replacing any
    /// stale one so a cancel from a previous run can never leak forward.
    pub async fn job_token(&self, operator: i64) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancels.lock().await.insert(operator, token.clone());
        token
    }

    /// Request cancellation of the operator's running job, if any, and drop
    /// any pending descriptor. Idempotent; a no-op after completion.
    pub async fn cancel(&self, operator: i64) {
        self.pending.lock().await.remove(&operator);
        if let Some(token) = self.cancels.lock().await.get(&operator) {
            token.cancel();
        }
    }

    /// Forget the job token once the run has terminated.
    pub async fn clear_token(&self, operator: i64) {
        self.cancels.lock().await.remove(&operator);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
