//! Read-phase entry point: turns a draft into an [`UnpreparedOutgoingMessage`].

use std::sync::Arc;

use tracing::debug;

use super::assembler::{assemble, AssemblyRequest};
use super::attachment::{DataSourceFactory, SendableAttachment};
use super::content::normalize;
use super::disappearing::DisappearingMessagesStore;
use super::drafts::{LinkPreviewDraft, QuotedReplyDraft};
use super::edits::EditManager;
use super::roles::classify;
use super::unprepared::UnpreparedOutgoingMessage;
use super::OutgoingError;
use crate::store::messages;
use crate::store::threads;
use crate::store::ReadTransaction;
use crate::types::{MessageBody, ThreadId};

/// Everything the user composed for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Destination thread.
    pub thread_id: ThreadId,
    /// Body text and annotations.
    pub body: Option<MessageBody>,
    /// Attachments in display order.
    pub attachments: Vec<SendableAttachment>,
    /// Reply quote.
    pub quoted_reply: Option<QuotedReplyDraft>,
    /// Link preview.
    pub link_preview: Option<LinkPreviewDraft>,
    /// Row id of the message this draft edits.
    pub edit_target: Option<i64>,
}

impl MessageDraft {
    /// A plain text draft.
    pub fn text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self {
            thread_id,
            body: Some(MessageBody::new(text)),
            attachments: Vec::new(),
            quoted_reply: None,
            link_preview: None,
            edit_target: None,
        }
    }
}

/// Composes drafts under a read transaction.
pub struct OutgoingComposer {
    disappearing: Arc<dyn DisappearingMessagesStore>,
    edits: Arc<dyn EditManager>,
    data_sources: Arc<dyn DataSourceFactory>,
    oversize_text_threshold: usize,
}

impl std::fmt::Debug for OutgoingComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingComposer")
            .field("oversize_text_threshold", &self.oversize_text_threshold)
            .finish_non_exhaustive()
    }
}

impl OutgoingComposer {
    /// Create a composer over the given collaborators.
    pub fn new(
        disappearing: Arc<dyn DisappearingMessagesStore>,
        edits: Arc<dyn EditManager>,
        data_sources: Arc<dyn DataSourceFactory>,
        oversize_text_threshold: usize,
    ) -> Self {
        Self {
            disappearing,
            edits,
            data_sources,
            oversize_text_threshold,
        }
    }

    /// Inline body limit in bytes.
    pub fn oversize_text_threshold(&self) -> usize {
        self.oversize_text_threshold
    }

    /// Build the staged message for `draft`. Nothing is written.
    ///
    /// Resolves the thread, its disappearing-message timer and the edit
    /// target, then runs normalization, classification and assembly.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::ThreadNotFound`] or
    /// [`OutgoingError::EditTargetNotFound`] for dangling references,
    /// [`OutgoingError::ContractViolation`] for inconsistent content, or
    /// [`OutgoingError::EditNotAllowed`] for a refused edit.
    pub async fn compose(
        &self,
        draft: MessageDraft,
        read: &mut ReadTransaction,
    ) -> Result<UnpreparedOutgoingMessage, OutgoingError> {
        let MessageDraft {
            thread_id,
            body,
            attachments,
            quoted_reply,
            link_preview,
            edit_target,
        } = draft;

        let thread = threads::fetch_thread(read.conn(), &thread_id)
            .await?
            .ok_or(OutgoingError::ThreadNotFound(thread_id))?;

        let expires_in_seconds = self
            .disappearing
            .duration_seconds(&thread.id, read.conn())
            .await?;

        let edit_target = match edit_target {
            Some(id) => Some(
                messages::fetch_message(read.conn(), id)
                    .await?
                    .ok_or(OutgoingError::EditTargetNotFound(id))?,
            ),
            None => None,
        };

        if let Some(preview) = &link_preview {
            preview.validate()?;
        }

        let normalized = normalize(
            body.as_ref(),
            attachments,
            self.oversize_text_threshold,
            self.data_sources.as_ref(),
        )
        .await?;
        let flags = classify(&normalized.attachments)?;

        let assembled = assemble(
            AssemblyRequest {
                thread: &thread,
                normalized,
                flags,
                edit_target: edit_target.as_ref(),
                expires_in_seconds,
            },
            self.edits.as_ref(),
            read.conn(),
        )
        .await?;

        debug!(
            thread_id = %thread.id,
            unique_id = %assembled.message.unique_id,
            attachments = assembled.unsaved_attachment_infos.len(),
            expires_in_seconds,
            is_edit = assembled.message.is_edit(),
            "outgoing message composed"
        );

        Ok(UnpreparedOutgoingMessage::new(
            assembled.message,
            assembled.unsaved_attachment_infos,
            quoted_reply,
            link_preview,
        ))
    }
}
