//! Body normalization: oversize-text splitting and attachment validation.

use tracing::warn;

use super::attachment::{DataSourceFactory, SendableAttachment};
use super::OutgoingError;
use crate::types::{BodyRange, MessageBody};

/// Inline body limit in UTF-8 bytes. Longer bodies travel as an attachment.
pub const DEFAULT_OVERSIZE_TEXT_THRESHOLD: usize = 2 * 1024;

/// Content type of the oversize-text companion attachment.
pub const OVERSIZE_TEXT_CONTENT_TYPE: &str = "text/x-oversize-plain";

/// Filename given to the oversize-text companion attachment.
pub const OVERSIZE_TEXT_FILENAME: &str = "oversize-text.txt";

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Inline text, cut to the threshold when the body was oversize.
    pub truncated_text: Option<String>,
    /// Body ranges, present iff `truncated_text` is present.
    ///
    /// These are the original ranges and are not clamped to the truncated text.
    pub body_ranges: Option<Vec<BodyRange>>,
    /// Caller attachments in order, then the oversize-text companion if any.
    pub attachments: Vec<SendableAttachment>,
    /// Whether the last attachment is the oversize-text companion.
    pub has_oversize_text: bool,
}

/// Normalize a composed body and its attachments.
///
/// Bodies whose UTF-8 length reaches `threshold` keep a prefix of at most
/// `threshold` bytes inline and gain a companion attachment carrying the full
/// text. If that attachment cannot be built the message continues without it.
///
/// # Errors
///
/// Returns [`OutgoingError::ContractViolation`] if any attachment is in an
/// error state or has no content type.
pub async fn normalize(
    body: Option<&MessageBody>,
    mut attachments: Vec<SendableAttachment>,
    threshold: usize,
    data_sources: &dyn DataSourceFactory,
) -> Result<NormalizedContent, OutgoingError> {
    for attachment in &attachments {
        attachment.validate()?;
    }

    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return Ok(NormalizedContent {
            truncated_text: None,
            body_ranges: None,
            attachments,
            has_oversize_text: false,
        });
    };

    if body.text.len() < threshold {
        return Ok(NormalizedContent {
            truncated_text: Some(body.text.clone()),
            body_ranges: Some(body.ranges.clone()),
            attachments,
            has_oversize_text: false,
        });
    }

    let truncated = truncate_to_byte_limit(&body.text, threshold).to_owned();
    let has_oversize_text = match data_sources.oversize_text(&body.text).await {
        Ok(source) => {
            attachments.push(
                SendableAttachment::new(source, OVERSIZE_TEXT_CONTENT_TYPE)
                    .with_filename(OVERSIZE_TEXT_FILENAME),
            );
            true
        }
        Err(err) => {
            warn!(
                error = %err,
                text_bytes = body.text.len(),
                "couldn't build oversize text attachment; sending truncated body only"
            );
            false
        }
    };

    Ok(NormalizedContent {
        truncated_text: Some(truncated),
        body_ranges: Some(body.ranges.clone()),
        attachments,
        has_oversize_text,
    })
}

/// Longest prefix of `text` that fits in `limit` bytes without splitting a
/// character.
pub fn truncate_to_byte_limit(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    text.get(..end).unwrap_or_default()
}
