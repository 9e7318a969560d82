//! Voice and view-once classification of a message's attachments.

use super::attachment::SendableAttachment;
use super::OutgoingError;

/// Media-role flags derived from the attachment list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentRoleFlags {
    /// Exactly one attachment and it is a voice note.
    pub is_voice_message: bool,
    /// The single attachment disappears after first view.
    pub is_view_once_message: bool,
}

/// Classify `attachments` by first match.
///
/// Scans in order. The first view-once attachment marks the message
/// view-once and stops the scan; failing that, the first borderless
/// attachment stops it. Either match requires the message to carry exactly
/// one attachment.
///
/// # Errors
///
/// Returns [`OutgoingError::ContractViolation`] if a view-once or borderless
/// attachment shares the message with other attachments.
pub fn classify(attachments: &[SendableAttachment]) -> Result<AttachmentRoleFlags, OutgoingError> {
    let is_voice_message = match attachments {
        [only] => only.is_voice_message(),
        _ => false,
    };

    let mut is_view_once_message = false;
    for attachment in attachments {
        if attachment.is_view_once {
            require_single(attachments, "view-once")?;
            is_view_once_message = true;
            break;
        }
        if attachment.is_borderless() {
            require_single(attachments, "borderless")?;
            break;
        }
    }

    Ok(AttachmentRoleFlags {
        is_voice_message,
        is_view_once_message,
    })
}

fn require_single(attachments: &[SendableAttachment], kind: &str) -> Result<(), OutgoingError> {
    if attachments.len() == 1 {
        return Ok(());
    }
    Err(OutgoingError::ContractViolation(format!(
        "{kind} attachment must be the only attachment, found {}",
        attachments.len()
    )))
}
