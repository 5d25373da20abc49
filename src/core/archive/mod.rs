pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// A channel as addressed against the archive gateway: private channels by
/// their `-100…` numeric id, public ones by username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Id(i64),
    Username(String),
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTarget::Id(id) => write!(f, "{}", id),
            ChatTarget::Username(name) => write!(f, "@{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Document,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub file_ref: Option<String>,
}

/// One message as returned by the archive. A deleted or never-existing id
/// comes back as a `None` slot in the batch, not as an `ArchivedMessage`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchivedMessage {
    pub id: i64,
    #[serde(default)]
    pub media: Option<MediaAttachment>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("rate limited by archive, retry after {0:?}")]
    RateLimited(Duration),
    #[error("archive gateway returned HTTP {0}")]
    Status(u16),
    #[error("archive gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed archive response: {0}")]
    Malformed(String),
}

/// Read access to the remote message archive. Implementations return exactly
/// one slot per requested id, in request order.
#[async_trait]
pub trait MessageArchive: Send + Sync {
    async fn messages(
        &self,
        chat: &ChatTarget,
        ids: &[i64],
    ) -> Result<Vec<Option<ArchivedMessage>>, ArchiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_deserializes_known_and_unknown() {
        let v: MediaKind = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(v, MediaKind::Video);
        let d: MediaKind = serde_json::from_str("\"document\"").unwrap();
        assert_eq!(d, MediaKind::Document);
        let o: MediaKind = serde_json::from_str("\"sticker\"").unwrap();
        assert_eq!(o, MediaKind::Other);
    }

    #[test]
    fn chat_target_display() {
        assert_eq!(ChatTarget::Id(-1001234).to_string(), "-1001234");
        assert_eq!(
            ChatTarget::Username("somechannel".into()).to_string(),
            "@somechannel"
        );
    }

    #[test]
    fn archived_message_tolerates_missing_media_fields() {
        let m: ArchivedMessage =
            serde_json::from_str(r#"{"id": 7, "media": {"kind": "video"}}"#).unwrap();
        let media = m.media.unwrap();
        assert_eq!(media.kind, MediaKind::Video);
        assert!(media.unique_id.is_none());
        assert!(media.file_ref.is_none());
    }
}
