//! Message, attachment and link-preview rows.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::trace;
use uuid::Uuid;

use super::StoreError;
use crate::types::{AttachmentRole, BodyRange, RenderingFlag, ThreadId};

/// Row type returned by SQLite queries for messages.
type MessageRow = (
    i64,
    String,
    String,
    i64,
    Option<String>,
    String,
    i64,
    bool,
    bool,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
);

/// Row type returned by SQLite queries for attachments.
type AttachmentRow = (
    i64,
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    bool,
    Vec<u8>,
);

const MESSAGE_COLUMNS: &str = "id, unique_id, thread_id, timestamp, body, body_ranges, \
     expires_in_seconds, is_voice_message, is_view_once, edit_target_id, \
     quote_timestamp, quote_author, quote_body, status";

/// Delivery state of a stored outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Persisted and queued, not yet handed to the transport.
    Sending,
    /// The transport accepted the message.
    Sent,
    /// The send job gave up.
    Failed,
}

impl MessageStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Quote columns stored alongside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredQuote {
    /// Timestamp of the quoted message.
    pub timestamp: u64,
    /// Author of the quoted message.
    pub author: String,
    /// Quoted text, if any.
    pub body: Option<String>,
}

/// A persisted outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Database row id.
    pub id: i64,
    /// Stable identity assigned at composition time.
    pub unique_id: Uuid,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Send timestamp in milliseconds.
    pub timestamp: u64,
    /// Inline body text.
    pub body: Option<String>,
    /// Body annotations.
    pub body_ranges: Vec<BodyRange>,
    /// Disappearing-message timer.
    pub expires_in_seconds: u32,
    /// Whether this is a voice note.
    pub is_voice_message: bool,
    /// Whether this is a view-once message.
    pub is_view_once: bool,
    /// Row id of the message this one revises.
    pub edit_target_id: Option<i64>,
    /// Quoted reply, if any.
    pub quote: Option<StoredQuote>,
    /// Delivery state.
    pub status: MessageStatus,
}

/// Parameters for inserting a message row.
#[derive(Debug, Clone)]
pub struct NewMessageRow<'a> {
    /// Stable identity of the message.
    pub unique_id: Uuid,
    /// Owning thread.
    pub thread_id: &'a ThreadId,
    /// Send timestamp in milliseconds.
    pub timestamp: u64,
    /// Inline body text.
    pub body: Option<&'a str>,
    /// Body annotations.
    pub body_ranges: &'a [BodyRange],
    /// Disappearing-message timer.
    pub expires_in_seconds: u32,
    /// Whether this is a voice note.
    pub is_voice_message: bool,
    /// Whether this is a view-once message.
    pub is_view_once: bool,
    /// Row id of the message this one revises.
    pub edit_target_id: Option<i64>,
    /// Quoted reply columns.
    pub quote: Option<NewQuote<'a>>,
}

/// Quote columns for [`NewMessageRow`].
#[derive(Debug, Clone)]
pub struct NewQuote<'a> {
    /// Timestamp of the quoted message.
    pub timestamp: u64,
    /// Author of the quoted message.
    pub author: &'a str,
    /// Quoted text.
    pub body: Option<&'a str>,
    /// Row id of the quoted message if it exists locally.
    pub message_id: Option<i64>,
}

/// Parameters for inserting an attachment row.
#[derive(Debug, Clone)]
pub struct NewAttachmentRow<'a> {
    /// Owning message row id.
    pub message_id: i64,
    /// Position within the message.
    pub ordinal: u32,
    /// Why the attachment belongs to the message.
    pub role: AttachmentRole,
    /// MIME type.
    pub content_type: &'a str,
    /// Original filename.
    pub source_filename: Option<&'a str>,
    /// Caption text.
    pub caption: Option<&'a str>,
    /// Presentation flag.
    pub rendering: RenderingFlag,
    /// Whether the attachment disappears after first view.
    pub is_view_once: bool,
    /// Attachment payload.
    pub data: &'a [u8],
}

/// A persisted attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// Database row id.
    pub id: i64,
    /// Owning message row id.
    pub message_id: i64,
    /// Position within the message.
    pub ordinal: u32,
    /// Why the attachment belongs to the message.
    pub role: AttachmentRole,
    /// MIME type.
    pub content_type: String,
    /// Original filename.
    pub source_filename: Option<String>,
    /// Caption text.
    pub caption: Option<String>,
    /// Presentation flag.
    pub rendering: RenderingFlag,
    /// Whether the attachment disappears after first view.
    pub is_view_once: bool,
    /// Attachment payload.
    pub data: Vec<u8>,
}

/// A persisted link preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLinkPreview {
    /// Database row id.
    pub id: i64,
    /// Owning message row id.
    pub message_id: i64,
    /// Previewed URL.
    pub url: String,
    /// Page title.
    pub title: Option<String>,
    /// Page description.
    pub description: Option<String>,
    /// Row id of the preview image attachment.
    pub image_attachment_id: Option<i64>,
}

fn to_i64(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt {
        field,
        value: value.to_string(),
    })
}

fn to_u64(value: i64, field: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        field,
        value: value.to_string(),
    })
}

fn to_u32(value: i64, field: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        field,
        value: value.to_string(),
    })
}

/// Insert a message row and return its row id.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure, including a
/// duplicate `unique_id`.
pub async fn insert_message(
    conn: &mut SqliteConnection,
    row: &NewMessageRow<'_>,
) -> Result<i64, StoreError> {
    let ranges_json = serde_json::to_string(row.body_ranges)?;
    let (quote_timestamp, quote_author, quote_body, quote_message_id) = match &row.quote {
        Some(q) => (
            Some(to_i64(q.timestamp, "quote_timestamp")?),
            Some(q.author),
            q.body,
            q.message_id,
        ),
        None => (None, None, None, None),
    };

    let result = sqlx::query(
        "INSERT INTO messages (unique_id, thread_id, timestamp, body, body_ranges, \
         expires_in_seconds, is_voice_message, is_view_once, edit_target_id, \
         quote_timestamp, quote_author, quote_body, quote_message_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(row.unique_id.to_string())
    .bind(row.thread_id.as_str())
    .bind(to_i64(row.timestamp, "timestamp")?)
    .bind(row.body)
    .bind(ranges_json)
    .bind(i64::from(row.expires_in_seconds))
    .bind(row.is_voice_message)
    .bind(row.is_view_once)
    .bind(row.edit_target_id)
    .bind(quote_timestamp)
    .bind(quote_author)
    .bind(quote_body)
    .bind(quote_message_id)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    trace!(message_id = id, unique_id = %row.unique_id, "message row inserted");
    Ok(id)
}

/// Returns `true` if a message with this identity is already persisted.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn message_exists(
    conn: &mut SqliteConnection,
    unique_id: &Uuid,
) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM messages WHERE unique_id = ?1")
        .bind(unique_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Look up a message by row id.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] if a column cannot be decoded.
pub async fn fetch_message(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<StoredMessage>, StoreError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row: Option<MessageRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(decode_message).transpose()
}

/// Look up a message by its stable identity.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] if a column cannot be decoded.
pub async fn fetch_message_by_unique_id(
    conn: &mut SqliteConnection,
    unique_id: &Uuid,
) -> Result<Option<StoredMessage>, StoreError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE unique_id = ?1");
    let row: Option<MessageRow> = sqlx::query_as(&sql)
        .bind(unique_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(decode_message).transpose()
}

/// Messages in a thread, oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] if a column cannot be decoded.
pub async fn list_thread_messages(
    conn: &mut SqliteConnection,
    thread_id: &ThreadId,
    limit: usize,
) -> Result<Vec<StoredMessage>, StoreError> {
    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ?1 \
         ORDER BY timestamp ASC, id ASC LIMIT ?2"
    );
    let rows: Vec<MessageRow> = sqlx::query_as(&sql)
        .bind(thread_id.as_str())
        .bind(limit_i64)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(decode_message).collect()
}

/// Number of edit revisions already recorded against `target_id`.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn count_revisions(
    conn: &mut SqliteConnection,
    target_id: i64,
) -> Result<u32, StoreError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM messages WHERE edit_target_id = ?1")
            .bind(target_id)
            .fetch_one(&mut *conn)
            .await?;
    to_u32(count, "revision_count")
}

/// Update the delivery state of a message.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: MessageStatus,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE messages SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    trace!(message_id = id, status = status.as_str(), "message status updated");
    Ok(())
}

/// Insert an attachment row and return its row id.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn insert_attachment(
    conn: &mut SqliteConnection,
    row: &NewAttachmentRow<'_>,
) -> Result<i64, StoreError> {
    let byte_count = i64::try_from(row.data.len()).unwrap_or(i64::MAX);
    let result = sqlx::query(
        "INSERT INTO attachments (message_id, ordinal, role, content_type, source_filename, \
         caption, rendering, is_view_once, byte_count, data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(row.message_id)
    .bind(i64::from(row.ordinal))
    .bind(row.role.as_str())
    .bind(row.content_type)
    .bind(row.source_filename)
    .bind(row.caption)
    .bind(row.rendering.as_str())
    .bind(row.is_view_once)
    .bind(byte_count)
    .bind(row.data)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    trace!(
        attachment_id = id,
        message_id = row.message_id,
        role = row.role.as_str(),
        byte_count,
        "attachment row inserted"
    );
    Ok(id)
}

/// Attachments of a message in ordinal order.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] if a column cannot be decoded.
pub async fn fetch_attachments(
    conn: &mut SqliteConnection,
    message_id: i64,
) -> Result<Vec<StoredAttachment>, StoreError> {
    let rows: Vec<AttachmentRow> = sqlx::query_as(
        "SELECT id, message_id, ordinal, role, content_type, source_filename, caption, \
         rendering, is_view_once, data \
         FROM attachments WHERE message_id = ?1 ORDER BY ordinal ASC, id ASC",
    )
    .bind(message_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(
            |(
                id,
                message_id,
                ordinal,
                role,
                content_type,
                source_filename,
                caption,
                rendering,
                is_view_once,
                data,
            )| {
                Ok(StoredAttachment {
                    id,
                    message_id,
                    ordinal: to_u32(ordinal, "ordinal")?,
                    role: AttachmentRole::parse(&role).ok_or(StoreError::Corrupt {
                        field: "role",
                        value: role.clone(),
                    })?,
                    content_type,
                    source_filename,
                    caption,
                    rendering: RenderingFlag::parse(&rendering).ok_or(StoreError::Corrupt {
                        field: "rendering",
                        value: rendering.clone(),
                    })?,
                    is_view_once,
                    data,
                })
            },
        )
        .collect()
}

/// Insert a link-preview row and return its row id.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn insert_link_preview(
    conn: &mut SqliteConnection,
    message_id: i64,
    url: &str,
    title: Option<&str>,
    description: Option<&str>,
    image_attachment_id: Option<i64>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO link_previews (message_id, url, title, description, image_attachment_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(message_id)
    .bind(url)
    .bind(title)
    .bind(description)
    .bind(image_attachment_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// The link preview attached to a message, if any.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn fetch_link_preview(
    conn: &mut SqliteConnection,
    message_id: i64,
) -> Result<Option<StoredLinkPreview>, StoreError> {
    let row: Option<(i64, i64, String, Option<String>, Option<String>, Option<i64>)> =
        sqlx::query_as(
            "SELECT id, message_id, url, title, description, image_attachment_id \
             FROM link_previews WHERE message_id = ?1",
        )
        .bind(message_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(
        |(id, message_id, url, title, description, image_attachment_id)| StoredLinkPreview {
            id,
            message_id,
            url,
            title,
            description,
            image_attachment_id,
        },
    ))
}

fn decode_message(row: MessageRow) -> Result<StoredMessage, StoreError> {
    let (
        id,
        unique_id,
        thread_id,
        timestamp,
        body,
        body_ranges,
        expires_in_seconds,
        is_voice_message,
        is_view_once,
        edit_target_id,
        quote_timestamp,
        quote_author,
        quote_body,
        status,
    ) = row;

    let unique_id = Uuid::parse_str(&unique_id).map_err(|_| StoreError::Corrupt {
        field: "unique_id",
        value: unique_id.clone(),
    })?;

    let quote = match (quote_timestamp, quote_author) {
        (Some(ts), Some(author)) => Some(StoredQuote {
            timestamp: to_u64(ts, "quote_timestamp")?,
            author,
            body: quote_body,
        }),
        _ => None,
    };

    Ok(StoredMessage {
        id,
        unique_id,
        thread_id: ThreadId::new(thread_id),
        timestamp: to_u64(timestamp, "timestamp")?,
        body,
        body_ranges: serde_json::from_str(&body_ranges)?,
        expires_in_seconds: to_u32(expires_in_seconds, "expires_in_seconds")?,
        is_voice_message,
        is_view_once,
        edit_target_id,
        quote,
        status: MessageStatus::parse(&status)?,
    })
}
