//! Attachment descriptors: what the caller hands in ([`SendableAttachment`])
//! and what the unprepared message carries until preparation
//! ([`UnsavedAttachmentInfo`]).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempPath;
use tracing::trace;

use super::OutgoingError;
use crate::types::{AttachmentRole, RenderingFlag};

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Bytes held in memory.
    Memory(Vec<u8>),
    /// Bytes read from a caller-owned file when the message is prepared.
    File(PathBuf),
    /// Bytes read from a spooled file this crate generated and owns.
    Spooled(SpoolFile),
}

impl DataSource {
    /// An in-memory source holding the UTF-8 bytes of `text`.
    pub fn from_text(text: &str) -> Self {
        Self::Memory(text.as_bytes().to_vec())
    }

    /// Load the payload.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file-backed source cannot be read.
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Memory(bytes) => Ok(bytes.clone()),
            Self::File(path) => tokio::fs::read(path).await,
            Self::Spooled(file) => tokio::fs::read(file.path()).await,
        }
    }

    /// The owned spool file behind this source, if any.
    pub fn spool_file(&self) -> Option<&SpoolFile> {
        match self {
            Self::Spooled(file) => Some(file),
            Self::Memory(_) | Self::File(_) => None,
        }
    }
}

/// A spooled payload file. The file is removed when the last handle drops.
#[derive(Debug, Clone)]
pub struct SpoolFile(Arc<TempPath>);

impl SpoolFile {
    fn new(path: TempPath) -> Self {
        Self(Arc::new(path))
    }

    /// Location of the spooled payload.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl PartialEq for SpoolFile {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for SpoolFile {}

/// Errors building a data source.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// Writing the backing file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The factory cannot produce sources right now.
    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// Builds data sources for generated attachments (the oversize-text companion).
#[async_trait]
pub trait DataSourceFactory: Send + Sync {
    /// A source whose payload is the UTF-8 bytes of `text`.
    ///
    /// # Errors
    ///
    /// Returns a [`DataSourceError`] if the source cannot be created.
    async fn oversize_text(&self, text: &str) -> Result<DataSource, DataSourceError>;
}

/// Keeps generated payloads in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDataSourceFactory;

#[async_trait]
impl DataSourceFactory for MemoryDataSourceFactory {
    async fn oversize_text(&self, text: &str) -> Result<DataSource, DataSourceError> {
        Ok(DataSource::from_text(text))
    }
}

/// Spools generated payloads to files in a directory.
///
/// Each spooled file is owned by the [`DataSource::Spooled`] it backs and is
/// deleted once the message is persisted or abandoned.
#[derive(Debug, Clone)]
pub struct FileDataSourceFactory {
    dir: PathBuf,
}

impl FileDataSourceFactory {
    /// Spool into `dir`, which is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DataSourceFactory for FileDataSourceFactory {
    async fn oversize_text(&self, text: &str) -> Result<DataSource, DataSourceError> {
        let dir = self.dir.clone();
        let payload = text.as_bytes().to_vec();
        let path = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("oversize-")
                .suffix(".txt")
                .tempfile_in(&dir)?;
            file.write_all(&payload)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|e| DataSourceError::Unavailable(format!("spool task failed: {e}")))??;
        trace!(path = %path.display(), bytes = text.len(), "oversize text spooled");
        Ok(DataSource::Spooled(SpoolFile::new(path)))
    }
}

/// An attachment as handed in by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendableAttachment {
    /// Payload source.
    pub data_source: DataSource,
    /// MIME type. Must be non-empty.
    pub content_type: String,
    /// Original filename.
    pub source_filename: Option<String>,
    /// Caption text.
    pub caption: Option<String>,
    /// Presentation flag.
    pub rendering: RenderingFlag,
    /// Whether the attachment disappears after first view.
    pub is_view_once: bool,
    /// Set when the attachment failed to load upstream.
    pub error: Option<String>,
}

impl SendableAttachment {
    /// A regular attachment with default presentation.
    pub fn new(data_source: DataSource, content_type: impl Into<String>) -> Self {
        Self {
            data_source,
            content_type: content_type.into(),
            source_filename: None,
            caption: None,
            rendering: RenderingFlag::Default,
            is_view_once: false,
            error: None,
        }
    }

    /// Set the original filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = Some(filename.into());
        self
    }

    /// Set the presentation flag.
    pub fn with_rendering(mut self, rendering: RenderingFlag) -> Self {
        self.rendering = rendering;
        self
    }

    /// Mark as view-once.
    pub fn view_once(mut self) -> Self {
        self.is_view_once = true;
        self
    }

    /// Returns `true` for a recorded voice note.
    pub fn is_voice_message(&self) -> bool {
        self.rendering == RenderingFlag::VoiceMessage
    }

    /// Returns `true` for chrome-less attachments such as stickers.
    pub fn is_borderless(&self) -> bool {
        self.rendering == RenderingFlag::Borderless
    }

    /// Check the attachment is usable: no error state, non-empty content type.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::ContractViolation`] describing the defect.
    pub fn validate(&self) -> Result<(), OutgoingError> {
        if let Some(err) = &self.error {
            return Err(OutgoingError::ContractViolation(format!(
                "attachment is in an error state: {err}"
            )));
        }
        if self.content_type.trim().is_empty() {
            return Err(OutgoingError::ContractViolation(
                "attachment has an empty content type".to_owned(),
            ));
        }
        Ok(())
    }
}

/// An attachment waiting to be written by the prepare step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedAttachmentInfo {
    /// Payload source.
    pub data_source: DataSource,
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
    /// Why the attachment belongs to the message.
    pub role: AttachmentRole,
}

impl UnsavedAttachmentInfo {
    /// Build the unsaved descriptor for a validated attachment.
    pub fn from_sendable(attachment: SendableAttachment, role: AttachmentRole) -> Self {
        Self {
            data_source: attachment.data_source,
            content_type: attachment.content_type,
            source_filename: attachment.source_filename,
            caption: attachment.caption,
            rendering: attachment.rendering,
            is_view_once: attachment.is_view_once,
            role,
        }
    }
}
