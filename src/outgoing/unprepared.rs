//! The unprepared staging value and its one-shot preparation.

use tracing::debug;

use super::attachment::{SpoolFile, UnsavedAttachmentInfo};
use super::drafts::{LinkPreviewDraft, QuotedReplyDraft};
use super::message::OutgoingMessage;
use super::OutgoingError;
use crate::store::messages::{self, NewAttachmentRow, NewMessageRow, NewQuote};
use crate::store::WriteTransaction;
use crate::types::AttachmentRole;

/// An assembled message whose attachments, quote and link preview have not
/// been written yet.
///
/// Built once under a read transaction and consumed by [`prepare`](Self::prepare)
/// under a write transaction. Preparing takes `self` by value, so a staged
/// message cannot be prepared twice:
///
/// ```compile_fail
/// # async fn demo(
/// #     unprepared: courier::outgoing::UnpreparedOutgoingMessage,
/// #     tx: &mut courier::store::WriteTransaction,
/// # ) {
/// let _ = unprepared.prepare(tx).await;
/// let _ = unprepared.prepare(tx).await;
/// # }
/// ```
#[derive(Debug)]
pub struct UnpreparedOutgoingMessage {
    message: OutgoingMessage,
    unsaved_attachment_infos: Vec<UnsavedAttachmentInfo>,
    quoted_reply: Option<QuotedReplyDraft>,
    link_preview: Option<LinkPreviewDraft>,
}

/// A persisted message ready for the send job queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOutgoingMessage {
    /// Row id of the persisted message.
    pub message_id: i64,
    /// The message as persisted.
    pub message: OutgoingMessage,
    /// Row ids of the body and oversize-text attachments, in order.
    pub attachment_ids: Vec<i64>,
    /// Row id of the link preview, if any.
    pub link_preview_id: Option<i64>,
}

impl UnpreparedOutgoingMessage {
    /// Stage `message` with its unsaved payloads.
    pub fn new(
        message: OutgoingMessage,
        unsaved_attachment_infos: Vec<UnsavedAttachmentInfo>,
        quoted_reply: Option<QuotedReplyDraft>,
        link_preview: Option<LinkPreviewDraft>,
    ) -> Self {
        Self {
            message,
            unsaved_attachment_infos,
            quoted_reply,
            link_preview,
        }
    }

    /// The staged message.
    pub fn message(&self) -> &OutgoingMessage {
        &self.message
    }

    /// Attachments waiting to be written.
    pub fn unsaved_attachment_infos(&self) -> &[UnsavedAttachmentInfo] {
        &self.unsaved_attachment_infos
    }

    /// The quote draft, if any.
    pub fn quoted_reply(&self) -> Option<&QuotedReplyDraft> {
        self.quoted_reply.as_ref()
    }

    /// The link-preview draft, if any.
    pub fn link_preview(&self) -> Option<&LinkPreviewDraft> {
        self.link_preview.as_ref()
    }

    /// Persist the message row, its attachments, quote and link preview.
    ///
    /// Everything is written through `tx`; on error the caller drops the
    /// transaction and nothing is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::AlreadyPrepared`] if this message identity is
    /// already persisted, [`OutgoingError::EditTargetNotFound`] if an edit's
    /// original vanished, [`OutgoingError::EditNotAllowed`] if another revision
    /// of the same original committed first, [`OutgoingError::AttachmentData`] if a payload
    /// cannot be read, or a store error.
    pub async fn prepare(
        self,
        tx: &mut WriteTransaction,
    ) -> Result<PreparedOutgoingMessage, OutgoingError> {
        let Self {
            message,
            unsaved_attachment_infos,
            quoted_reply,
            link_preview,
        } = self;
        let conn = tx.conn();

        if messages::message_exists(conn, &message.unique_id).await? {
            return Err(OutgoingError::AlreadyPrepared(message.unique_id));
        }

        if let Some(target) = &message.edit_target {
            if messages::fetch_message(conn, target.message_id)
                .await?
                .is_none()
            {
                return Err(OutgoingError::EditTargetNotFound(target.message_id));
            }
            // Another edit of the same original may have committed since compose.
            let existing = messages::count_revisions(conn, target.message_id).await?;
            if existing >= target.revision {
                return Err(OutgoingError::EditNotAllowed(format!(
                    "message {} gained revision {existing} after this edit was composed",
                    target.message_id
                )));
            }
        }

        // Quotes keep their text even when the original is gone locally.
        let quoted_message_id = match quoted_reply.as_ref().and_then(|q| q.original_message_id) {
            Some(id) => {
                let found = messages::fetch_message(conn, id).await?.map(|m| m.id);
                if found.is_none() {
                    debug!(quoted_message_id = id, "quoted message not found locally");
                }
                found
            }
            None => None,
        };
        let quote = quoted_reply.as_ref().map(|q| NewQuote {
            timestamp: q.original_timestamp,
            author: &q.original_author,
            body: q.body.as_ref().map(|b| b.text.as_str()),
            message_id: quoted_message_id,
        });

        let message_id = messages::insert_message(
            conn,
            &NewMessageRow {
                unique_id: message.unique_id,
                thread_id: &message.thread_id,
                timestamp: message.timestamp,
                body: message.body.as_deref(),
                body_ranges: &message.body_ranges,
                expires_in_seconds: message.expires_in_seconds,
                is_voice_message: message.is_voice_message,
                is_view_once: message.is_view_once,
                edit_target_id: message.edit_target.as_ref().map(|t| t.message_id),
                quote,
            },
        )
        .await?;

        let mut attachment_ids = Vec::with_capacity(unsaved_attachment_infos.len());
        let mut ordinal: u32 = 0;
        for info in &unsaved_attachment_infos {
            let data = info.data_source.read_bytes().await?;
            let id = messages::insert_attachment(
                conn,
                &NewAttachmentRow {
                    message_id,
                    ordinal,
                    role: info.role,
                    content_type: &info.content_type,
                    source_filename: info.source_filename.as_deref(),
                    caption: info.caption.as_deref(),
                    rendering: info.rendering,
                    is_view_once: info.is_view_once,
                    data: &data,
                },
            )
            .await?;
            attachment_ids.push(id);
            ordinal = ordinal.saturating_add(1);
        }

        let link_preview_id = match &link_preview {
            Some(preview) => {
                let image_attachment_id = match &preview.image {
                    Some(image) => {
                        let data = image.data_source.read_bytes().await?;
                        Some(
                            messages::insert_attachment(
                                conn,
                                &NewAttachmentRow {
                                    message_id,
                                    ordinal,
                                    role: AttachmentRole::LinkPreview,
                                    content_type: &image.content_type,
                                    source_filename: image.source_filename.as_deref(),
                                    caption: None,
                                    rendering: image.rendering,
                                    is_view_once: false,
                                    data: &data,
                                },
                            )
                            .await?,
                        )
                    }
                    None => None,
                };
                Some(
                    messages::insert_link_preview(
                        conn,
                        message_id,
                        preview.url().as_str(),
                        preview.title.as_deref(),
                        preview.description.as_deref(),
                        image_attachment_id,
                    )
                    .await?,
                )
            }
            None => None,
        };

        // Spooled payloads now live in the attachment rows. The handles are
        // released after commit, or with the transaction if it rolls back.
        let spooled: Vec<SpoolFile> = unsaved_attachment_infos
            .iter()
            .map(|info| &info.data_source)
            .chain(
                link_preview
                    .as_ref()
                    .and_then(|p| p.image.as_ref())
                    .map(|image| &image.data_source),
            )
            .filter_map(|source| source.spool_file().cloned())
            .collect();
        if !spooled.is_empty() {
            tx.add_completion(move || drop(spooled));
        }

        debug!(
            message_id,
            unique_id = %message.unique_id,
            attachments = attachment_ids.len(),
            has_link_preview = link_preview_id.is_some(),
            is_edit = message.is_edit(),
            "outgoing message prepared"
        );

        Ok(PreparedOutgoingMessage {
            message_id,
            message,
            attachment_ids,
            link_preview_id,
        })
    }
}
