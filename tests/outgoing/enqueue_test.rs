//! Tests for `src/outgoing/enqueue.rs`: durable enqueue and its milestones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use courier::jobs::{self, JobStatus};
use courier::outgoing::intents::IntentDonor;
use courier::outgoing::{
    DataSource, MessageDraft, OutgoingMessage, SendableAttachment, UnpreparedOutgoingMessage,
    UnsavedAttachmentInfo,
};
use courier::store::messages::{self, MessageStatus};
use courier::store::threads::ThreadRecord;
use courier::types::AttachmentRole;

use crate::support::{self, ScriptedTransport};

#[derive(Default)]
struct RecordingDonor {
    calls: AtomicUsize,
    titles: Mutex<Vec<String>>,
}

impl IntentDonor for RecordingDonor {
    fn donate(&self, _message: &OutgoingMessage, thread: &ThreadRecord) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.titles
            .lock()
            .expect("lock should not be poisoned")
            .push(thread.title.clone());
    }
}

#[tokio::test]
async fn persisted_resolves_with_message_and_pending_job() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "queue", None).await;

    let sending = ctx
        .send(MessageDraft::text(thread.id.clone(), "hello"))
        .await
        .expect("enqueue should succeed");
    let unique_id = sending.message.unique_id;
    let persisted = support::recv(sending.persisted)
        .await
        .expect("message should persist");

    let mut read = ctx.store.read().await.expect("read should open");
    let stored = messages::fetch_message_by_unique_id(read.conn(), &unique_id)
        .await
        .expect("lookup should succeed")
        .expect("message should exist");
    assert_eq!(stored.id, persisted.message_id);
    assert_eq!(stored.status, MessageStatus::Sending);

    let job = jobs::job_for_message(read.conn(), persisted.message_id)
        .await
        .expect("lookup should succeed")
        .expect("job should exist");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    read.close().await.expect("read should close");

    ctx.shutdown().await;
}

#[tokio::test]
async fn failed_preparation_leaves_nothing_behind() {
    let (dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "broken", None).await;

    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "with a missing file"))
        .await
        .expect("should compose");
    let broken = UnpreparedOutgoingMessage::new(
        unprepared.message().clone(),
        vec![UnsavedAttachmentInfo::from_sendable(
            SendableAttachment::new(
                DataSource::File(dir.path().join("gone.bin")),
                "application/octet-stream",
            ),
            AttachmentRole::Body,
        )],
        None,
        None,
    );

    let sending = ctx.enqueue(broken).await.expect("scheduling should succeed");
    assert!(support::recv(sending.persisted).await.is_none());
    assert!(support::recv(sending.sent).await.is_none());

    assert_eq!(support::count_rows(&ctx.store, "messages").await, 0);
    assert_eq!(support::count_rows(&ctx.store, "send_jobs").await, 0);
    assert_eq!(ctx.telemetry.abandoned_count(), 1);
    assert_eq!(ctx.telemetry.in_flight(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn same_identity_is_queued_once() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "dupes", None).await;

    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "only once"))
        .await
        .expect("should compose");
    let copy = UnpreparedOutgoingMessage::new(unprepared.message().clone(), Vec::new(), None, None);

    let first = ctx.enqueue(unprepared).await.expect("first enqueue");
    let second = ctx.enqueue(copy).await.expect("second enqueue");

    assert!(support::recv(first.persisted).await.is_some());
    assert!(support::recv(second.persisted).await.is_none());
    assert_eq!(support::count_rows(&ctx.store, "messages").await, 1);
    assert_eq!(support::count_rows(&ctx.store, "send_jobs").await, 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn sent_resolves_after_runner_marks_message_sent() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "delivered", None).await;
    let transport = ScriptedTransport::accepting();
    let runner = ctx.job_runner(transport.clone());

    let sending = ctx
        .send(MessageDraft::text(thread.id.clone(), "ship it"))
        .await
        .expect("enqueue should succeed");
    let persisted = support::recv(sending.persisted)
        .await
        .expect("message should persist");

    let attempted = runner.run_once().await.expect("runner pass should succeed");
    assert_eq!(attempted, 1);
    assert!(support::recv(sending.sent).await.is_some());
    assert_eq!(transport.attempted(), vec![persisted.message_id]);
    assert_eq!(ctx.telemetry.completed_count(), 1);
    assert_eq!(ctx.telemetry.in_flight(), 0);

    let mut read = ctx.store.read().await.expect("read should open");
    let stored = messages::fetch_message(read.conn(), persisted.message_id)
        .await
        .expect("lookup should succeed")
        .expect("message should exist");
    assert_eq!(stored.status, MessageStatus::Sent);
    read.close().await.expect("read should close");

    ctx.shutdown().await;
}

#[tokio::test]
async fn intent_is_donated_once_per_enqueue() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let donor = Arc::new(RecordingDonor::default());
    let ctx = support::context_with(support::test_config(dir.path()), donor.clone()).await;
    let thread = support::create_thread(&ctx.store, "Family", None).await;

    let sending = ctx
        .send(MessageDraft::text(thread.id.clone(), "dinner?"))
        .await
        .expect("enqueue should succeed");
    support::recv(sending.persisted)
        .await
        .expect("message should persist");

    assert_eq!(donor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *donor.titles.lock().expect("lock should not be poisoned"),
        vec!["Family".to_owned()]
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn enqueue_after_shutdown_is_an_error() {
    let (_dir, ctx) = support::open_context().await;
    let thread = support::create_thread(&ctx.store, "late", None).await;
    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "too late"))
        .await
        .expect("should compose");

    ctx.shutdown().await;
    assert!(ctx.enqueue(unprepared).await.is_err());
}

fn spool_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn spooled_text_is_removed_once_persisted() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let spool = dir.path().join("spool");
    let mut config = support::test_config(dir.path());
    config.outgoing.spool_dir = Some(spool.clone());
    let ctx = support::context_with(config, Arc::new(courier::outgoing::intents::NoopIntentDonor))
        .await;
    let thread = support::create_thread(&ctx.store, "long", None).await;

    let text = "w".repeat(5_000);
    for _ in 0..3 {
        let sending = ctx
            .send(MessageDraft::text(thread.id.clone(), text.clone()))
            .await
            .expect("enqueue should succeed");
        let persisted = support::recv(sending.persisted)
            .await
            .expect("message should persist");
        assert_eq!(persisted.attachment_ids.len(), 1);
        assert_eq!(spool_entries(&spool), 0);
    }

    let (stored,): (Vec<u8>,) = sqlx::query_as("SELECT data FROM attachments LIMIT 1")
        .fetch_one(ctx.store.pool())
        .await
        .expect("attachment should exist");
    assert_eq!(stored, text.into_bytes());

    ctx.shutdown().await;
}

#[tokio::test]
async fn spooled_text_is_removed_when_composition_fails() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let spool = dir.path().join("spool");
    let mut config = support::test_config(dir.path());
    config.outgoing.spool_dir = Some(spool.clone());
    let ctx = support::context_with(config, Arc::new(courier::outgoing::intents::NoopIntentDonor))
        .await;
    let thread = support::create_thread(&ctx.store, "rejected", None).await;

    // View-once needs a single attachment; the oversize companion makes two.
    let mut draft = MessageDraft::text(thread.id.clone(), "v".repeat(5_000));
    draft.attachments = vec![
        SendableAttachment::new(DataSource::Memory(vec![1; 4]), "image/jpeg").view_once(),
    ];
    assert!(ctx.compose(draft).await.is_err());
    assert_eq!(spool_entries(&spool), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn spooled_text_is_removed_when_preparation_rolls_back() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let spool = dir.path().join("spool");
    let mut config = support::test_config(dir.path());
    config.outgoing.spool_dir = Some(spool.clone());
    let ctx = support::context_with(config, Arc::new(courier::outgoing::intents::NoopIntentDonor))
        .await;
    let thread = support::create_thread(&ctx.store, "rollback", None).await;

    let unprepared = ctx
        .compose(MessageDraft::text(thread.id.clone(), "r".repeat(5_000)))
        .await
        .expect("should compose");
    assert_eq!(spool_entries(&spool), 1);

    let mut infos = unprepared.unsaved_attachment_infos().to_vec();
    infos.push(UnsavedAttachmentInfo::from_sendable(
        SendableAttachment::new(
            DataSource::File(dir.path().join("gone.bin")),
            "application/octet-stream",
        ),
        AttachmentRole::Body,
    ));
    let broken = UnpreparedOutgoingMessage::new(unprepared.message().clone(), infos, None, None);
    drop(unprepared);
    assert_eq!(spool_entries(&spool), 1);

    let sending = ctx.enqueue(broken).await.expect("scheduling should succeed");
    assert!(support::recv(sending.persisted).await.is_none());
    assert_eq!(spool_entries(&spool), 0);
    assert_eq!(support::count_rows(&ctx.store, "messages").await, 0);

    ctx.shutdown().await;
}
