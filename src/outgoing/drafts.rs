//! Quote and link-preview drafts carried by an unprepared message.

use url::Url;

use super::attachment::SendableAttachment;
use super::OutgoingError;
use crate::types::MessageBody;

/// A reply quote as composed, before it is resolved against storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedReplyDraft {
    /// Timestamp of the quoted message.
    pub original_timestamp: u64,
    /// Author of the quoted message.
    pub original_author: String,
    /// Quoted text, if any.
    pub body: Option<MessageBody>,
    /// Row id of the quoted message when it is known locally.
    pub original_message_id: Option<i64>,
}

/// A link preview as composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreviewDraft {
    url: Url,
    /// Page title.
    pub title: Option<String>,
    /// Page description.
    pub description: Option<String>,
    /// Preview image.
    pub image: Option<SendableAttachment>,
}

impl LinkPreviewDraft {
    /// Create a draft for `url`, which must be an absolute `https` URL.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::InvalidLinkPreview`] if the URL does not
    /// parse or is not `https`.
    pub fn new(url: &str, title: Option<String>) -> Result<Self, OutgoingError> {
        let url =
            Url::parse(url).map_err(|e| OutgoingError::InvalidLinkPreview(format!("{url}: {e}")))?;
        if url.scheme() != "https" {
            return Err(OutgoingError::InvalidLinkPreview(format!(
                "only https previews are allowed, got {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            title,
            description: None,
            image: None,
        })
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the preview image.
    pub fn with_image(mut self, image: SendableAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// The previewed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Check the preview image, if any, is usable.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::ContractViolation`] for a broken image.
    pub fn validate(&self) -> Result<(), OutgoingError> {
        match &self.image {
            Some(image) => image.validate(),
            None => Ok(()),
        }
    }
}
