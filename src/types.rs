//! Core types for graph-chat-export

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How a content reference was discovered in a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Structured attachment object with content type `reference`
    StructuredAttachment,
    /// Inline image served from the message's hostedContents endpoint
    HostedInlineImage,
    /// Document URL found by scanning the message markup
    HeuristicUrlMatch,
}

impl SourceKind {
    /// Stable lowercase label used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::StructuredAttachment => "structured_attachment",
            SourceKind::HostedInlineImage => "hosted_inline_image",
            SourceKind::HeuristicUrlMatch => "heuristic_url_match",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized description of a potential file to download
///
/// Created only by the extractor and never mutated afterwards; a failed
/// resolution is reported alongside the reference, not recorded in it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    /// How the reference was discovered
    pub source_kind: SourceKind,
    /// URL as found in the message
    pub raw_url: String,
    /// Best-effort file name (a label, not a statement about the content type)
    pub suggested_name: String,
    /// MIME type hint, when the message declares one
    pub mime_hint: Option<String>,
    /// Size hint in bytes, when the message declares one
    pub size_hint: Option<u64>,
    /// ID of the message the reference came from
    pub origin_message_id: String,
    /// ID of the chat the message belongs to
    pub origin_chat_id: String,
}

/// Retrieval technique tried by the resolver, in priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Graph `shares` API with an encoded sharing URL
    SharedItem,
    /// The raw URL with the caller's bearer token
    DirectUrl,
    /// Graph `me/drive/root:{path}:/content` lookup
    DrivePath,
}

impl Strategy {
    /// 1-based priority ordinal
    pub fn ordinal(&self) -> u8 {
        match self {
            Strategy::SharedItem => 1,
            Strategy::DirectUrl => 2,
            Strategy::DrivePath => 3,
        }
    }

    /// Stable lowercase label used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SharedItem => "shared_item",
            Strategy::DirectUrl => "direct_url",
            Strategy::DrivePath => "drive_path",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.ordinal(), self.as_str())
    }
}

/// Result of one strategy attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// HTTP 200 with a body; content was handed to the caller
    Success,
    /// The server answered with a non-200 status
    Status(u16),
    /// Transport or protocol error before a usable response
    Error(String),
}

impl AttemptOutcome {
    /// Whether the attempt produced content
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// One strategy tried while resolving a content reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    /// Strategy that was tried
    pub strategy: Strategy,
    /// URL the strategy requested
    pub url: String,
    /// What happened
    pub outcome: AttemptOutcome,
}

/// A content reference persisted to disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializedFile {
    /// Final path on disk
    pub path: PathBuf,
    /// Number of bytes written
    pub byte_count: u64,
    /// The reference the content was resolved from
    pub source_reference: ContentReference,
}

/// Attachment counters for one chat or a whole run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentTally {
    /// Files written to disk
    pub saved: usize,
    /// References that could not be resolved or written
    pub failed: usize,
}

impl AttachmentTally {
    /// Add another tally into this one
    pub fn absorb(&mut self, other: AttachmentTally) {
        self.saved += other.saved;
        self.failed += other.failed;
    }
}

/// Final report of an export run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Chats whose messages were traversed
    pub chats_exported: usize,
    /// Chats whose message listing failed part-way or entirely
    pub chats_failed: usize,
    /// Total messages exported
    pub messages: usize,
    /// Messages per chat type (`oneOnOne`, `group`, `meeting`, ...)
    pub messages_by_chat_type: BTreeMap<String, usize>,
    /// Attachment counters
    pub attachments: AttachmentTally,
    /// Number of 429 responses that were waited out
    pub rate_limit_waits: u64,
    /// Number of token refreshes triggered by 401 responses
    pub token_refreshes: u64,
    /// Path of the JSON export, when messages were written
    pub export_file: Option<PathBuf>,
    /// Whether the run stopped early because of cancellation
    pub cancelled: bool,
    /// Wall-clock duration of the run
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Event emitted during an export run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Authenticated user confirmed
    Connected {
        /// Display name of the signed-in user
        display_name: String,
        /// User principal name
        user_principal_name: String,
    },

    /// Chat listing finished
    ChatsListed {
        /// Number of chats that will be traversed
        count: usize,
    },

    /// Starting to traverse a chat
    ChatStarted {
        /// Chat ID
        chat_id: String,
        /// Human-readable chat label
        display: String,
        /// 1-based position in the run
        index: usize,
        /// Number of chats in the run
        total: usize,
    },

    /// Messages of a chat were fetched
    MessagesFetched {
        /// Chat ID
        chat_id: String,
        /// Messages fetched for this chat
        count: usize,
        /// Messages fetched so far in the run
        running_total: usize,
    },

    /// An attachment was written to disk
    AttachmentSaved {
        /// Chat ID
        chat_id: String,
        /// Final path on disk
        path: PathBuf,
        /// Bytes written
        byte_count: u64,
        /// How the attachment was discovered
        source_kind: SourceKind,
    },

    /// An attachment could not be retrieved or written
    AttachmentFailed {
        /// Chat ID
        chat_id: String,
        /// Suggested file name of the reference
        name: String,
        /// Machine-readable error code
        code: String,
        /// Human-readable error message
        error: String,
        /// Strategy attempts, when resolution was the failing step
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attempts: Vec<ResolutionAttempt>,
    },

    /// A chat could not be traversed completely
    ChatFailed {
        /// Chat ID
        chat_id: String,
        /// Error message
        error: String,
    },

    /// Chat traversal finished
    ChatFinished {
        /// Chat ID
        chat_id: String,
        /// Messages exported for this chat
        messages: usize,
        /// Attachment counters for this chat
        attachments: AttachmentTally,
    },

    /// The run finished (possibly cancelled)
    ExportComplete {
        /// Final report
        summary: ExportSummary,
    },
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
