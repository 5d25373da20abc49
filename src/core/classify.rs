use crate::core::archive::{ArchivedMessage, MediaKind};

/// Disposition of a single scanned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Absent from the archive (deleted or never existed).
    Deleted,
    /// Exists but carries no media attachment.
    NoMedia,
    /// Attachment kind outside the indexed set, or its identifiers could not
    /// be extracted.
    Unsupported,
    /// Supported media with both identifiers present.
    Indexable {
        unique_key: String,
        content_ref: String,
    },
}

/// Classify one slot of a fetched batch. Rules apply in order; the function
/// is total and never panics, so a bad message can only ever cost one
/// counter tick, never the batch.
pub fn classify(message: Option<&ArchivedMessage>) -> Classification {
    let Some(message) = message else {
        return Classification::Deleted;
    };
    let Some(media) = &message.media else {
        return Classification::NoMedia;
    };
    match media.kind {
        MediaKind::Video | MediaKind::Document => {}
        MediaKind::Other => return Classification::Unsupported,
    }
    match (&media.unique_id, &media.file_ref) {
        (Some(unique_key), Some(content_ref)) => Classification::Indexable {
            unique_key: unique_key.clone(),
            content_ref: content_ref.clone(),
        },
        // Kind matched but extraction failed; treat like an unknown kind.
        _ => Classification::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::MediaAttachment;

    fn msg(media: Option<MediaAttachment>) -> ArchivedMessage {
        ArchivedMessage { id: 1, media }
    }

    fn attachment(kind: MediaKind, uid: Option<&str>, fref: Option<&str>) -> MediaAttachment {
        MediaAttachment {
            kind,
            unique_id: uid.map(String::from),
            file_ref: fref.map(String::from),
        }
    }

    #[test]
    fn absent_message_is_deleted() {
        assert_eq!(classify(None), Classification::Deleted);
    }

    #[test]
    fn message_without_attachment_is_no_media() {
        assert_eq!(classify(Some(&msg(None))), Classification::NoMedia);
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let m = msg(Some(attachment(MediaKind::Other, Some("u"), Some("r"))));
        assert_eq!(classify(Some(&m)), Classification::Unsupported);
    }

    #[test]
    fn video_with_identifiers_is_indexable() {
        let m = msg(Some(attachment(MediaKind::Video, Some("uniq"), Some("ref"))));
        assert_eq!(
            classify(Some(&m)),
            Classification::Indexable {
                unique_key: "uniq".into(),
                content_ref: "ref".into(),
            }
        );
    }

    #[test]
    fn document_with_identifiers_is_indexable() {
        let m = msg(Some(attachment(MediaKind::Document, Some("u"), Some("r"))));
        assert!(matches!(
            classify(Some(&m)),
            Classification::Indexable { .. }
        ));
    }

    #[test]
    fn supported_kind_with_missing_identifiers_falls_back_to_unsupported() {
        let missing_ref = msg(Some(attachment(MediaKind::Video, Some("u"), None)));
        assert_eq!(classify(Some(&missing_ref)), Classification::Unsupported);

        let missing_key = msg(Some(attachment(MediaKind::Document, None, Some("r"))));
        assert_eq!(classify(Some(&missing_key)), Classification::Unsupported);
    }
}
