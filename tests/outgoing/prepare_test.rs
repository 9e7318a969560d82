//! Tests for `src/outgoing/unprepared.rs`: the one-shot prepare step.

use std::sync::Arc;

use courier::outgoing::drafts::{LinkPreviewDraft, QuotedReplyDraft};
use courier::outgoing::{
    DataSource, OutgoingError, OutgoingMessage, OutgoingMessageConfig, PreparedOutgoingMessage,
    SendableAttachment, UnpreparedOutgoingMessage, UnsavedAttachmentInfo,
};
use courier::store::messages;
use courier::store::{Store, StoreError};
use courier::types::{AttachmentRole, MessageBody, ThreadId};

use crate::support;

fn text_message(thread: &ThreadId, body: &str) -> OutgoingMessage {
    OutgoingMessage::from_config(
        thread.clone(),
        OutgoingMessageConfig {
            body: Some(body.to_owned()),
            ..OutgoingMessageConfig::default()
        },
    )
    .expect("message should build")
}

/// Prepare inside a committed write and hand back the outcome.
async fn prepare(
    store: &Store,
    unprepared: UnpreparedOutgoingMessage,
) -> Result<PreparedOutgoingMessage, OutgoingError> {
    store
        .write(move |mut tx| {
            Box::pin(async move {
                let outcome = unprepared.prepare(&mut tx).await;
                Ok((tx, outcome))
            })
        })
        .await
        .expect("write should commit")
}

#[tokio::test]
async fn prepare_persists_message_attachments_quote_and_preview() {
    let (_dir, store) = support::open_store().await;
    let thread = support::create_thread(&store, "full", None).await;

    let attachments = vec![
        UnsavedAttachmentInfo::from_sendable(
            SendableAttachment::new(DataSource::Memory(vec![1, 2, 3]), "image/png")
                .with_filename("cat.png"),
            AttachmentRole::Body,
        ),
        UnsavedAttachmentInfo::from_sendable(
            SendableAttachment::new(DataSource::from_text("the full text"), "text/x-oversize-plain"),
            AttachmentRole::OversizeText,
        ),
    ];
    let quote = QuotedReplyDraft {
        original_timestamp: 1_000,
        original_author: "alice".to_owned(),
        body: Some(MessageBody::new("original words")),
        original_message_id: None,
    };
    let preview = LinkPreviewDraft::new("https://example.com/a", Some("A".to_owned()))
        .expect("https url should be accepted")
        .with_description("about a")
        .with_image(SendableAttachment::new(DataSource::Memory(vec![7; 4]), "image/jpeg"));

    let unprepared = UnpreparedOutgoingMessage::new(
        text_message(&thread.id, "see this"),
        attachments,
        Some(quote),
        Some(preview),
    );
    let unique_id = unprepared.message().unique_id;
    let prepared = prepare(&store, unprepared).await.expect("prepare should succeed");

    assert_eq!(prepared.attachment_ids.len(), 2);
    assert!(prepared.link_preview_id.is_some());

    let mut read = store.read().await.expect("read should open");
    let stored = messages::fetch_message_by_unique_id(read.conn(), &unique_id)
        .await
        .expect("lookup should succeed")
        .expect("message should exist");
    assert_eq!(stored.id, prepared.message_id);
    assert_eq!(stored.body.as_deref(), Some("see this"));
    assert_eq!(stored.status, messages::MessageStatus::Sending);
    let quote = stored.quote.expect("quote should be stored");
    assert_eq!(quote.author, "alice");
    assert_eq!(quote.body.as_deref(), Some("original words"));

    let rows = messages::fetch_attachments(read.conn(), stored.id)
        .await
        .expect("attachments should load");
    let roles: Vec<AttachmentRole> = rows.iter().map(|a| a.role).collect();
    assert_eq!(
        roles,
        vec![
            AttachmentRole::Body,
            AttachmentRole::OversizeText,
            AttachmentRole::LinkPreview
        ]
    );
    assert_eq!(rows.first().map(|a| a.data.clone()), Some(vec![1, 2, 3]));

    let link = messages::fetch_link_preview(read.conn(), stored.id)
        .await
        .expect("preview should load")
        .expect("preview should exist");
    assert_eq!(link.url, "https://example.com/a");
    assert_eq!(link.description.as_deref(), Some("about a"));
    assert_eq!(link.image_attachment_id, rows.last().map(|a| a.id));
    read.close().await.expect("read should close");

    store.shutdown().await;
}

#[tokio::test]
async fn second_prepare_of_same_identity_is_rejected() {
    let (_dir, store) = support::open_store().await;
    let thread = support::create_thread(&store, "twice", None).await;

    let message = text_message(&thread.id, "once only");
    let first = UnpreparedOutgoingMessage::new(message.clone(), Vec::new(), None, None);
    let second = UnpreparedOutgoingMessage::new(message.clone(), Vec::new(), None, None);

    prepare(&store, first).await.expect("first prepare should succeed");
    let result = prepare(&store, second).await;
    assert!(matches!(result, Err(OutgoingError::AlreadyPrepared(id)) if id == message.unique_id));
    assert_eq!(support::count_rows(&store, "messages").await, 1);

    store.shutdown().await;
}

#[tokio::test]
async fn quote_of_unknown_message_keeps_text_but_drops_link() {
    let (_dir, store) = support::open_store().await;
    let thread = support::create_thread(&store, "quotes", None).await;

    let quote = QuotedReplyDraft {
        original_timestamp: 5,
        original_author: "bob".to_owned(),
        body: Some(MessageBody::new("gone now")),
        original_message_id: Some(9_999),
    };
    let unprepared = UnpreparedOutgoingMessage::new(
        text_message(&thread.id, "replying"),
        Vec::new(),
        Some(quote),
        None,
    );
    let prepared = prepare(&store, unprepared).await.expect("prepare should succeed");

    let row: (Option<i64>, Option<String>) =
        sqlx::query_as("SELECT quote_message_id, quote_body FROM messages WHERE id = ?1")
            .bind(prepared.message_id)
            .fetch_one(store.pool())
            .await
            .expect("row should load");
    assert_eq!(row.0, None);
    assert_eq!(row.1.as_deref(), Some("gone now"));

    store.shutdown().await;
}

#[tokio::test]
async fn unreadable_attachment_rolls_everything_back() {
    let (dir, store) = support::open_store().await;
    let thread = support::create_thread(&store, "broken", None).await;

    let missing = dir.path().join("does-not-exist.bin");
    let unprepared = UnpreparedOutgoingMessage::new(
        text_message(&thread.id, "with file"),
        vec![UnsavedAttachmentInfo::from_sendable(
            SendableAttachment::new(DataSource::File(missing), "application/octet-stream"),
            AttachmentRole::Body,
        )],
        None,
        None,
    );

    let result = store
        .write(move |mut tx| {
            Box::pin(async move {
                unprepared
                    .prepare(&mut tx)
                    .await
                    .map_err(|e| StoreError::Abandoned(e.to_string()))?;
                Ok((tx, ()))
            })
        })
        .await;
    assert!(matches!(result, Err(StoreError::Abandoned(_))));
    assert_eq!(support::count_rows(&store, "messages").await, 0);
    assert_eq!(support::count_rows(&store, "attachments").await, 0);

    store.shutdown().await;
}

#[tokio::test]
async fn prepared_store_is_shared_across_tasks() {
    let (_dir, store) = support::open_store().await;
    let thread = support::create_thread(&store, "parallel", None).await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&store);
        let message = text_message(&thread.id, &format!("message {n}"));
        handles.push(tokio::spawn(async move {
            prepare(&store, UnpreparedOutgoingMessage::new(message, Vec::new(), None, None)).await
        }));
    }
    for handle in handles {
        handle
            .await
            .expect("task should join")
            .expect("prepare should succeed");
    }
    assert_eq!(support::count_rows(&store, "messages").await, 8);

    store.shutdown().await;
}
