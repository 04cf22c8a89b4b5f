//! Domain model shared across the engine.
//!
//! Rows mirror the relational schema: a [`Story`] scopes its [`Message`]s to
//! an owner and names the handler that can render them; a [`Memory`] is a
//! normalized fact with an embedding and a lifecycle. All timestamps are UTC.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::llm::Embedding;

/// Role of a persisted conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// A turn authored by the user.
    Query,
    /// A turn authored by the assistant.
    Response,
}

impl ContentKind {
    /// Persisted `content_type` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Response => "response",
        }
    }
}

/// Scoping container mapping messages to their owner and rendering handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Store-assigned identity.
    pub id: i64,
    /// Owner of every message (and derived memory) under this story.
    pub user_id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Name of the registered handler that renders this story's messages.
    pub handler: String,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    pub updated_at: OffsetDateTime,
}

/// A persisted conversation turn, input to extraction.
///
/// `content` is opaque JSON whose shape only the story's handler knows; it is
/// parsed at the rendering boundary, never here. The `extracted` flag flips
/// to `true` exactly once, atomically with the memory mutations derived from
/// the batch that consumed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identity.
    pub id: i64,
    /// Parent story.
    pub story_id: i64,
    /// Whether this turn was a query or a response.
    pub kind: ContentKind,
    /// Handler-defined payload.
    pub content: Value,
    /// Whether a committed extraction has consumed this message.
    pub extracted: bool,
    /// Creation timestamp; extraction processes messages in this order.
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    pub updated_at: OffsetDateTime,
}

/// A pending message joined to its story's handler name, as loaded by
/// [`TurnStore::load_pending`](crate::store::TurnStore::load_pending).
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// The unprocessed message.
    pub message: Message,
    /// Handler name from the parent story.
    pub handler: String,
}

/// The last action that produced a memory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryAction {
    /// The row was inserted as a brand-new memory.
    Add,
    /// The row's content was rewritten by a later extraction.
    Update,
    /// The row was removed through an outer surface.
    Delete,
}

impl MemoryAction {
    /// Persisted `action` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a persisted `action` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADD" => Some(Self::Add),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A durable, semantically addressable fact owned by one user.
///
/// The embedding is always the embedding of `content` as of the last write;
/// on update, `prev_content` holds the replaced content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Store-assigned identity.
    pub id: i64,
    /// Owner.
    pub user_id: String,
    /// Normalized declarative statement.
    pub content: String,
    /// Content before the most recent update, if any.
    pub prev_content: Option<String>,
    /// Free-form tag assigned at extraction time.
    pub category: String,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Last action that produced this row.
    pub action: MemoryAction,
    /// Embedding of `content`, fixed dimension per store configuration.
    pub embedding: Embedding,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    pub updated_at: OffsetDateTime,
}

/// Counts returned by one extraction run.
///
/// `messages_extracted` reflects the entire consumed batch regardless of how
/// many decisions were dropped along the way; a run that found nothing
/// pending returns all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Facts returned by the fact-retrieval completion.
    pub facts_extracted: usize,
    /// Memories inserted by the commit.
    pub memories_added: usize,
    /// Memories rewritten by the commit.
    pub memories_updated: usize,
    /// Messages consumed (and flagged extracted) by the run.
    pub messages_extracted: usize,
}

impl ExtractionStats {
    /// `true` when the run touched nothing at all.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.facts_extracted == 0
            && self.memories_added == 0
            && self.memories_updated == 0
            && self.messages_extracted == 0
    }
}
