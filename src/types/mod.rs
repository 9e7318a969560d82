//! Shared domain types: thread identifiers, message bodies, body ranges and
//! attachment presentation flags.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Wrap an existing thread identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random thread identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as stored in SQLite.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message text plus its style and mention annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Body text.
    pub text: String,
    /// Annotations over UTF-8 byte offsets of `text`.
    #[serde(default)]
    pub ranges: Vec<BodyRange>,
}

impl MessageBody {
    /// A plain body without annotations.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ranges: Vec::new(),
        }
    }

    /// A body carrying style or mention annotations.
    pub fn with_ranges(text: impl Into<String>, ranges: Vec<BodyRange>) -> Self {
        Self {
            text: text.into(),
            ranges,
        }
    }

    /// Returns `true` if the body has no text.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A single annotation over a span of the body text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRange {
    /// Byte offset of the first annotated byte.
    pub start: usize,
    /// Number of annotated bytes.
    pub length: usize,
    /// What the annotation means.
    pub kind: BodyRangeKind,
}

impl BodyRange {
    /// A style annotation.
    pub fn style(start: usize, length: usize, style: BodyRangeStyle) -> Self {
        Self {
            start,
            length,
            kind: BodyRangeKind::Style(style),
        }
    }

    /// A mention of another account.
    pub fn mention(start: usize, length: usize, account: Uuid) -> Self {
        Self {
            start,
            length,
            kind: BodyRangeKind::Mention(account),
        }
    }

    /// Exclusive end offset of the range.
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }
}

/// Meaning of a [`BodyRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum BodyRangeKind {
    /// Text style.
    Style(BodyRangeStyle),
    /// Mention of the account with this identifier.
    Mention(Uuid),
}

/// Supported text styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyRangeStyle {
    /// Bold text.
    Bold,
    /// Italic text.
    Italic,
    /// Hidden until tapped.
    Spoiler,
    /// Struck-through text.
    Strikethrough,
    /// Fixed-width text.
    Monospace,
}

/// How an attachment is presented to the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingFlag {
    /// Regular media with surrounding chrome.
    #[default]
    Default,
    /// A recorded voice note.
    VoiceMessage,
    /// Rendered without surrounding chrome (stickers and similar).
    Borderless,
    /// Short looping video.
    ShouldLoop,
}

impl RenderingFlag {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::VoiceMessage => "voice_message",
            Self::Borderless => "borderless",
            Self::ShouldLoop => "should_loop",
        }
    }

    /// Parse from a SQLite text value. Returns `None` if unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "voice_message" => Some(Self::VoiceMessage),
            "borderless" => Some(Self::Borderless),
            "should_loop" => Some(Self::ShouldLoop),
            _ => None,
        }
    }
}

/// Why an attachment row belongs to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentRole {
    /// Media the user attached.
    Body,
    /// Full text of a body that exceeded the inline threshold.
    OversizeText,
    /// Image shown in a link preview.
    LinkPreview,
}

impl AttachmentRole {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::OversizeText => "oversize_text",
            Self::LinkPreview => "link_preview",
        }
    }

    /// Parse from a SQLite text value. Returns `None` if unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "body" => Some(Self::Body),
            "oversize_text" => Some(Self::OversizeText),
            "link_preview" => Some(Self::LinkPreview),
            _ => None,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
