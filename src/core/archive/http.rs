use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ArchiveError, ArchivedMessage, ChatTarget, MessageArchive};

/// Wait applied when the gateway rate-limits us without saying for how long.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// `MessageArchive` backed by an MTProto gateway sidecar speaking JSON over
/// HTTP. The bot never talks MTProto itself; the gateway owns the Telegram
/// session.
pub struct HttpArchive {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<Option<ArchivedMessage>>,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<u64>,
}

impl HttpArchive {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chat_param(chat: &ChatTarget) -> serde_json::Value {
        match chat {
            ChatTarget::Id(id) => json!(id),
            ChatTarget::Username(name) => json!(name),
        }
    }
}

#[async_trait]
impl MessageArchive for HttpArchive {
    async fn messages(
        &self,
        chat: &ChatTarget,
        ids: &[i64],
    ) -> Result<Vec<Option<ArchivedMessage>>, ArchiveError> {
        let url = format!("{}/messages", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "chat": Self::chat_param(chat), "ids": ids }))
            .send()
            .await?;

        let status = res.status();
        if status.as_u16() == 429 {
            let header_wait = res
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let wait = match header_wait {
                Some(secs) => Some(secs),
                None => res
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after),
            };
            let wait = wait.map(Duration::from_secs).unwrap_or(DEFAULT_RETRY_AFTER);
            debug!("archive gateway rate limit, retry after {:?}", wait);
            return Err(ArchiveError::RateLimited(wait));
        }
        if !status.is_success() {
            return Err(ArchiveError::Status(status.as_u16()));
        }

        let body: MessagesResponse = res
            .json()
            .await
            .map_err(|e| ArchiveError::Malformed(e.to_string()))?;

        if body.messages.len() != ids.len() {
            return Err(ArchiveError::Malformed(format!(
                "requested {} ids, gateway returned {} slots",
                ids.len(),
                body.messages.len()
            )));
        }
        Ok(body.messages)
    }
}
