//! Assembly of the outgoing record from normalized content.

use sqlx::SqliteConnection;

use super::attachment::{SendableAttachment, UnsavedAttachmentInfo};
use super::content::NormalizedContent;
use super::edits::EditManager;
use super::message::{OutgoingEditConfig, OutgoingMessage, OutgoingMessageConfig};
use super::roles::AttachmentRoleFlags;
use super::OutgoingError;
use crate::store::messages::StoredMessage;
use crate::store::threads::ThreadRecord;
use crate::types::AttachmentRole;

/// Inputs to [`assemble`].
#[derive(Debug)]
pub struct AssemblyRequest<'a> {
    /// Thread the message goes to.
    pub thread: &'a ThreadRecord,
    /// Normalized body and attachments.
    pub normalized: NormalizedContent,
    /// Media-role flags of `normalized.attachments`.
    pub flags: AttachmentRoleFlags,
    /// Message being revised, for an edit.
    pub edit_target: Option<&'a StoredMessage>,
    /// Disappearing-message timer resolved for the thread.
    pub expires_in_seconds: u32,
}

/// An assembled message and its attachments, ready for staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// The outgoing record.
    pub message: OutgoingMessage,
    /// Attachments to write when the message is prepared.
    pub unsaved_attachment_infos: Vec<UnsavedAttachmentInfo>,
}

/// Build the outgoing record: a new message, or an edit revision of
/// `edit_target` through `edits`.
///
/// # Errors
///
/// Returns [`OutgoingError::ContractViolation`] for inconsistent options, or
/// whatever `edits` reports for a refused edit.
pub async fn assemble(
    request: AssemblyRequest<'_>,
    edits: &dyn EditManager,
    conn: &mut SqliteConnection,
) -> Result<AssembledMessage, OutgoingError> {
    let AssemblyRequest {
        thread,
        normalized,
        flags,
        edit_target,
        expires_in_seconds,
    } = request;

    let body_ranges = normalized.body_ranges.unwrap_or_default();
    let message = match edit_target {
        None => OutgoingMessage::from_config(
            thread.id.clone(),
            OutgoingMessageConfig {
                body: normalized.truncated_text,
                body_ranges,
                expires_in_seconds,
                is_voice_message: flags.is_voice_message,
                is_view_once: flags.is_view_once_message,
                edit_target: None,
                timestamp: None,
            },
        )?,
        Some(target) => {
            edits
                .create_outgoing_edit_message(
                    target,
                    thread,
                    conn,
                    OutgoingEditConfig {
                        body: normalized.truncated_text,
                        body_ranges,
                        expires_in_seconds,
                    },
                )
                .await?
        }
    };

    let unsaved_attachment_infos =
        build_attachment_infos(normalized.attachments, normalized.has_oversize_text);

    Ok(AssembledMessage {
        message,
        unsaved_attachment_infos,
    })
}

fn build_attachment_infos(
    attachments: Vec<SendableAttachment>,
    has_oversize_text: bool,
) -> Vec<UnsavedAttachmentInfo> {
    let last = attachments.len().saturating_sub(1);
    attachments
        .into_iter()
        .enumerate()
        .map(|(index, attachment)| {
            let role = if has_oversize_text && index == last {
                AttachmentRole::OversizeText
            } else {
                AttachmentRole::Body
            };
            UnsavedAttachmentInfo::from_sendable(attachment, role)
        })
        .collect()
}
