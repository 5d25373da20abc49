use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::archive::{ArchiveError, ArchivedMessage, ChatTarget, MessageArchive};

/// Upper bound on ids per archive request.
pub const BATCH_SIZE: usize = 20;

/// Fetches message batches, absorbing exactly one rate-limit round per batch:
/// sleep for the duration the archive asked for, then retry the identical id
/// list once. A second failure, or any other error, fails the whole batch.
pub struct BatchFetcher {
    archive: Arc<dyn MessageArchive>,
}

impl BatchFetcher {
    pub fn new(archive: Arc<dyn MessageArchive>) -> Self {
        Self { archive }
    }

    pub async fn fetch_batch(
        &self,
        chat: &ChatTarget,
        ids: &[i64],
    ) -> Result<Vec<Option<ArchivedMessage>>, ArchiveError> {
        debug_assert!(ids.len() <= BATCH_SIZE);

        match self.archive.messages(chat, ids).await {
            Ok(batch) => Ok(batch),
            Err(ArchiveError::RateLimited(wait)) => {
                info!("rate limited on batch starting at {:?}, sleeping {:?}", ids.first(), wait);
                tokio::time::sleep(clamp_wait(wait)).await;
                self.archive.messages(chat, ids).await
            }
            Err(e) => {
                warn!("batch fetch failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Clamp a rate-limit wait so a hostile or confused gateway cannot park the
/// job for hours.
pub fn clamp_wait(wait: Duration) -> Duration {
    const MAX_WAIT: Duration = Duration::from_secs(300);
    wait.min(MAX_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedArchive {
        // One entry per expected call; pops from the front.
        responses: Mutex<Vec<Result<Vec<Option<ArchivedMessage>>, ArchiveError>>>,
        calls: Mutex<Vec<Vec<i64>>>,
    }

    #[async_trait]
    impl MessageArchive for ScriptedArchive {
        async fn messages(
            &self,
            _chat: &ChatTarget,
            ids: &[i64],
        ) -> Result<Vec<Option<ArchivedMessage>>, ArchiveError> {
            self.calls.lock().unwrap().push(ids.to_vec());
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn empty_batch(n: usize) -> Vec<Option<ArchivedMessage>> {
        (0..n).map(|_| None).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_sleeps_then_retries_same_ids_once() {
        let archive = Arc::new(ScriptedArchive {
            responses: Mutex::new(vec![
                Err(ArchiveError::RateLimited(Duration::from_secs(5))),
                Ok(empty_batch(3)),
            ]),
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(archive.clone());

        let ids = vec![1, 2, 3];
        let started = tokio::time::Instant::now();
        let out = fetcher
            .fetch_batch(&ChatTarget::Id(-100), &ids)
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(5));
        let calls = archive.calls.lock().unwrap();
        assert_eq!(calls.len(), 2, "exactly one retry");
        assert_eq!(calls[0], ids);
        assert_eq!(calls[1], ids, "retry must reuse the identical id list");
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_fails_the_batch() {
        let archive = Arc::new(ScriptedArchive {
            responses: Mutex::new(vec![
                Err(ArchiveError::RateLimited(Duration::from_secs(1))),
                Err(ArchiveError::RateLimited(Duration::from_secs(1))),
            ]),
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(archive.clone());

        let err = fetcher
            .fetch_batch(&ChatTarget::Id(-100), &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::RateLimited(_)));
        assert_eq!(archive.calls.lock().unwrap().len(), 2, "no third attempt");
    }

    #[tokio::test]
    async fn non_rate_limit_error_fails_without_retry() {
        let archive = Arc::new(ScriptedArchive {
            responses: Mutex::new(vec![Err(ArchiveError::Status(500))]),
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(archive.clone());

        let err = fetcher
            .fetch_batch(&ChatTarget::Id(-100), &[1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Status(500)));
        assert_eq!(archive.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn clamp_wait_caps_absurd_durations() {
        assert_eq!(clamp_wait(Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(
            clamp_wait(Duration::from_secs(86_400)),
            Duration::from_secs(300)
        );
    }
}
