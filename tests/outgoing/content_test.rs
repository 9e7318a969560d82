//! Tests for `src/outgoing/content.rs`: oversize-text splitting and validation.

use async_trait::async_trait;
use courier::outgoing::attachment::{
    DataSourceError, DataSourceFactory, FileDataSourceFactory, MemoryDataSourceFactory,
};
use courier::outgoing::content::{normalize, OVERSIZE_TEXT_CONTENT_TYPE, OVERSIZE_TEXT_FILENAME};
use courier::outgoing::{DataSource, OutgoingError, SendableAttachment};
use courier::types::{BodyRange, BodyRangeStyle, MessageBody};

struct BrokenFactory;

#[async_trait]
impl DataSourceFactory for BrokenFactory {
    async fn oversize_text(&self, _text: &str) -> Result<DataSource, DataSourceError> {
        Err(DataSourceError::Unavailable("disk full".to_owned()))
    }
}

fn image() -> SendableAttachment {
    SendableAttachment::new(DataSource::Memory(vec![1, 2, 3]), "image/png")
}

#[tokio::test]
async fn short_body_passes_through() {
    let body = MessageBody::new("hello");
    let normalized = normalize(Some(&body), vec![image()], 64, &MemoryDataSourceFactory)
        .await
        .expect("should normalize");

    assert_eq!(normalized.truncated_text.as_deref(), Some("hello"));
    assert_eq!(normalized.body_ranges, Some(Vec::new()));
    assert_eq!(normalized.attachments, vec![image()]);
    assert!(!normalized.has_oversize_text);
}

#[tokio::test]
async fn oversize_body_is_split_into_companion_attachment() {
    let text = "a".repeat(200_000);
    let body = MessageBody::new(text.clone());
    let normalized = normalize(Some(&body), vec![image()], 64_000, &MemoryDataSourceFactory)
        .await
        .expect("should normalize");

    let inline = normalized.truncated_text.expect("inline text should remain");
    assert_eq!(inline.len(), 64_000);
    assert!(text.starts_with(&inline));

    assert!(normalized.has_oversize_text);
    assert_eq!(normalized.attachments.len(), 2);
    let companion = normalized
        .attachments
        .last()
        .expect("companion should be appended last");
    assert_eq!(companion.content_type, OVERSIZE_TEXT_CONTENT_TYPE);
    assert_eq!(companion.source_filename.as_deref(), Some(OVERSIZE_TEXT_FILENAME));

    let payload = companion
        .data_source
        .read_bytes()
        .await
        .expect("payload should load");
    assert_eq!(payload.len(), 200_000);
    assert_eq!(payload, text.into_bytes());
}

#[tokio::test]
async fn truncation_lands_on_a_scalar_boundary() {
    // 100 two-byte scalars; a 63-byte cut would split one.
    let text = "é".repeat(100);
    let body = MessageBody::new(text.clone());
    let normalized = normalize(Some(&body), Vec::new(), 63, &MemoryDataSourceFactory)
        .await
        .expect("should normalize");

    let inline = normalized.truncated_text.expect("inline text should remain");
    assert_eq!(inline.len(), 62);
    assert!(text.is_char_boundary(inline.len()));
    assert_eq!(normalized.attachments.len(), 1);
}

#[tokio::test]
async fn ranges_are_not_clamped_to_truncated_text() {
    // A range past the cut keeps its original offsets and now points beyond
    // the inline text. Consumers must tolerate this.
    let text = "x".repeat(100);
    let past_cut = BodyRange::style(90, 5, BodyRangeStyle::Bold);
    let body = MessageBody::with_ranges(text, vec![past_cut.clone()]);
    let normalized = normalize(Some(&body), Vec::new(), 10, &MemoryDataSourceFactory)
        .await
        .expect("should normalize");

    let inline_len = normalized
        .truncated_text
        .as_ref()
        .map(String::len)
        .unwrap_or_default();
    assert_eq!(inline_len, 10);
    assert_eq!(normalized.body_ranges, Some(vec![past_cut.clone()]));
    assert!(past_cut.end() > inline_len);
}

#[tokio::test]
async fn empty_body_yields_no_text_and_no_ranges() {
    let body = MessageBody::new("");
    for candidate in [None, Some(&body)] {
        let normalized = normalize(candidate, vec![image()], 64, &MemoryDataSourceFactory)
            .await
            .expect("should normalize");
        assert!(normalized.truncated_text.is_none());
        assert!(normalized.body_ranges.is_none());
        assert_eq!(normalized.attachments.len(), 1);
        assert!(!normalized.has_oversize_text);
    }
}

#[tokio::test]
async fn attachment_in_error_state_is_rejected() {
    let mut broken = image();
    broken.error = Some("decode failed".to_owned());
    let result = normalize(None, vec![image(), broken], 64, &MemoryDataSourceFactory).await;
    assert!(matches!(result, Err(OutgoingError::ContractViolation(_))));
}

#[tokio::test]
async fn attachment_without_content_type_is_rejected() {
    let untyped = SendableAttachment::new(DataSource::Memory(Vec::new()), "  ");
    let result = normalize(None, vec![untyped], 64, &MemoryDataSourceFactory).await;
    assert!(matches!(result, Err(OutgoingError::ContractViolation(_))));
}

#[tokio::test]
async fn factory_failure_degrades_to_truncated_body() {
    let body = MessageBody::new("y".repeat(50));
    let normalized = normalize(Some(&body), vec![image()], 20, &BrokenFactory)
        .await
        .expect("should still normalize");

    assert_eq!(normalized.truncated_text.as_deref().map(str::len), Some(20));
    assert!(!normalized.has_oversize_text);
    assert_eq!(normalized.attachments, vec![image()]);
}

#[tokio::test]
async fn file_factory_spools_full_text() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let factory = FileDataSourceFactory::new(dir.path().join("spool"));
    let body = MessageBody::new("z".repeat(300));
    let normalized = normalize(Some(&body), Vec::new(), 100, &factory)
        .await
        .expect("should normalize");

    let companion = normalized
        .attachments
        .first()
        .expect("companion should be present");
    let spooled = companion
        .data_source
        .spool_file()
        .expect("companion should be spooled")
        .path()
        .to_path_buf();
    assert!(spooled.starts_with(dir.path().join("spool")));
    let payload = companion
        .data_source
        .read_bytes()
        .await
        .expect("spooled file should be readable");
    assert_eq!(payload.len(), 300);

    drop(normalized);
    assert!(!spooled.exists());
}
