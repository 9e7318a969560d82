//! Tests for `src/outgoing/composer.rs`: the read phase.

use std::sync::Arc;

use courier::outgoing::drafts::LinkPreviewDraft;
use courier::outgoing::intents::NoopIntentDonor;
use courier::outgoing::{DataSource, MessageDraft, OutgoingError, SendableAttachment};
use courier::types::{AttachmentRole, MessageBody, RenderingFlag, ThreadId};

use crate::support;

#[tokio::test]
async fn hello_in_plain_thread() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "plain", None).await;

    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "hello"))
        .await
        .expect("should compose");

    let message = unprepared.message();
    assert_eq!(message.body.as_deref(), Some("hello"));
    assert_eq!(message.thread_id, thread.id);
    assert_eq!(message.expires_in_seconds, 0);
    assert!(!message.is_voice_message);
    assert!(!message.is_view_once);
    assert!(!message.is_edit());
    assert!(unprepared.unsaved_attachment_infos().is_empty());

    ctx.shutdown().await;
}

#[tokio::test]
async fn expiry_comes_from_thread_configuration() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "ephemeral", Some(3_600)).await;

    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "soon gone"))
        .await
        .expect("should compose");
    assert_eq!(unprepared.message().expires_in_seconds, 3_600);

    ctx.shutdown().await;
}

#[tokio::test]
async fn composing_writes_nothing() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "quiet", None).await;

    let _unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "draft only"))
        .await
        .expect("should compose");

    assert_eq!(support::count_rows(&ctx.store, "messages").await, 0);
    assert_eq!(support::count_rows(&ctx.store, "send_jobs").await, 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn unknown_thread_is_reported() {
    let (_dir, ctx) = support::open_context().await;

    let result = ctx
        .compose(MessageDraft::text(ThreadId::new("missing"), "hello"))
        .await;
    assert!(matches!(result, Err(OutgoingError::ThreadNotFound(id)) if id.as_str() == "missing"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn unknown_edit_target_is_reported() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "edits", None).await;

    let mut draft = MessageDraft::text(thread.id.clone(), "fix");
    draft.edit_target = Some(4_242);
    let result = ctx.compose(draft).await;
    assert!(matches!(result, Err(OutgoingError::EditTargetNotFound(4_242))));

    ctx.shutdown().await;
}

#[tokio::test]
async fn oversize_companion_gets_its_own_role() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut config = support::test_config(dir.path());
    config.outgoing.oversize_text_threshold = 16;
    let ctx = support::context_with(config, Arc::new(NoopIntentDonor)).await;
    let thread = support::create_thread(&ctx.store, "long", None).await;

    let mut draft = MessageDraft::text(thread.id.clone(), "w".repeat(40));
    draft.attachments = vec![SendableAttachment::new(
        DataSource::Memory(vec![9; 8]),
        "image/png",
    )];
    let unprepared = ctx.compose(draft).await.expect("should compose");

    assert_eq!(unprepared.message().body.as_deref().map(str::len), Some(16));
    let roles: Vec<AttachmentRole> = unprepared
        .unsaved_attachment_infos()
        .iter()
        .map(|info| info.role)
        .collect();
    assert_eq!(roles, vec![AttachmentRole::Body, AttachmentRole::OversizeText]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn voice_note_sets_message_flag() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "voice", None).await;

    let draft = MessageDraft {
        thread_id: thread.id.clone(),
        body: None,
        attachments: vec![
            SendableAttachment::new(DataSource::Memory(vec![1; 32]), "audio/aac")
                .with_rendering(RenderingFlag::VoiceMessage),
        ],
        quoted_reply: None,
        link_preview: None,
        edit_target: None,
    };
    let unprepared = ctx.compose(draft).await.expect("should compose");

    assert!(unprepared.message().is_voice_message);
    assert!(unprepared.message().body.is_none());
    assert_eq!(unprepared.unsaved_attachment_infos().len(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn broken_link_preview_image_is_rejected() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "links", None).await;

    let mut image = SendableAttachment::new(DataSource::Memory(vec![0]), "image/png");
    image.error = Some("thumbnail failed".to_owned());
    let preview = LinkPreviewDraft::new("https://example.com/post", Some("Post".to_owned()))
        .expect("https url should be accepted")
        .with_image(image);

    let mut draft = MessageDraft::text(thread.id.clone(), "look https://example.com/post");
    draft.link_preview = Some(preview);
    let result = ctx.compose(draft).await;
    assert!(matches!(result, Err(OutgoingError::ContractViolation(_))));

    ctx.shutdown().await;
}

#[tokio::test]
async fn body_ranges_travel_with_the_message() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "styled", None).await;

    let ranges = vec![courier::types::BodyRange::style(
        0,
        4,
        courier::types::BodyRangeStyle::Bold,
    )];
    let mut draft = MessageDraft::text(thread.id.clone(), "");
    draft.body = Some(MessageBody::with_ranges("bold move", ranges.clone()));
    let unprepared = ctx.compose(draft).await.expect("should compose");
    assert_eq!(unprepared.message().body_ranges, ranges);

    ctx.shutdown().await;
}
