//! Storage trait seams.
//!
//! Three traits split the persistence surface the engine consumes:
//!
//! - [`MemoryStore`] — owner-scoped vector search and memory row mutation.
//! - [`TurnStore`] — story/message persistence and the pending-batch load.
//! - [`ExtractionStore`] — both, plus [`commit_extraction`]
//!   (the single all-or-nothing transaction of an extraction run).
//!
//! Similarity everywhere is `1 − cosine_distance`. Search results strictly
//! exceed the requested minimum and come back sorted descending; an empty
//! result is a valid success, distinct from failure.
//!
//! [`commit_extraction`]: ExtractionStore::commit_extraction

use core::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::llm::Embedding;
use crate::types::{ContentKind, Memory, MemoryAction, Message, PendingMessage, Story};

/// Parameters for a top-K similarity search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Maximum number of results per query.
    pub top_k: usize,
    /// Exclusive lower bound on similarity; results must strictly exceed it.
    pub min_similarity: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.0,
        }
    }
}

/// A memory scored against a query embedding.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The matched memory.
    pub memory: Memory,
    /// Cosine similarity to the query, in `(min_similarity, 1]`.
    pub similarity: f32,
}

/// Fields for inserting a new memory row.
#[derive(Debug, Clone)]
pub struct NewMemory {
    /// Owner.
    pub user_id: String,
    /// Normalized statement.
    pub content: String,
    /// Embedding of `content`.
    pub embedding: Embedding,
    /// Free-form tag.
    pub category: String,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Action recorded on the row, normally [`MemoryAction::Add`].
    pub action: MemoryAction,
}

/// Field replacement applied to an existing memory row.
#[derive(Debug, Clone)]
pub struct MemoryPatch {
    /// New content.
    pub content: String,
    /// Explicit previous-content value to record.
    pub prev_content: Option<String>,
    /// Embedding of the new content.
    pub embedding: Embedding,
    /// Action recorded on the row.
    pub action: MemoryAction,
}

/// One write of an extraction commit.
#[derive(Debug, Clone)]
pub enum MemoryWrite {
    /// Insert a brand-new memory.
    Add(NewMemory),
    /// Rewrite an existing memory's content.
    ///
    /// The store derives `prev_content` from the row's content as read
    /// inside the transaction and records [`MemoryAction::Update`].
    Update {
        /// Target memory id.
        id: i64,
        /// New content.
        content: String,
        /// Embedding of the new content.
        embedding: Embedding,
    },
}

/// Row counts of a committed extraction transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Committed {
    /// Memories inserted.
    pub added: usize,
    /// Memories rewritten.
    pub updated: usize,
    /// Messages flagged extracted.
    pub messages_marked: usize,
}

/// Owner-scoped vector store over memories.
pub trait MemoryStore: Send + Sync {
    /// Appends a new memory.
    ///
    /// # Errors
    /// Fails on dimension mismatch or backend failure.
    fn insert(&self, memory: NewMemory) -> impl Future<Output = crate::Result<Memory>> + Send;

    /// Replaces fields on an existing memory.
    ///
    /// # Errors
    /// Fails when the row does not exist, on dimension mismatch, or on
    /// backend failure.
    fn update(
        &self,
        id: i64,
        patch: MemoryPatch,
    ) -> impl Future<Output = crate::Result<Memory>> + Send;

    /// Returns up to `top_k` memories owned by `user_id` whose similarity to
    /// the query strictly exceeds `min_similarity`, sorted descending.
    ///
    /// # Errors
    /// Fails on dimension mismatch or backend failure; an empty result is a
    /// success.
    fn search(
        &self,
        user_id: &str,
        embedding: &[f32],
        params: SearchParams,
    ) -> impl Future<Output = crate::Result<Vec<ScoredMemory>>> + Send;

    /// Fans [`search`](Self::search) out over several queries.
    ///
    /// The i-th inner list corresponds to the i-th query; inner lists are
    /// independent (no deduplication across queries). Backends should run
    /// the queries concurrently where they can; the default implementation
    /// is sequential.
    ///
    /// # Errors
    /// Fails if any individual query fails.
    fn bulk_search(
        &self,
        user_id: &str,
        embeddings: &[Embedding],
        params: SearchParams,
    ) -> impl Future<Output = crate::Result<Vec<Vec<ScoredMemory>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(embeddings.len());
            for embedding in embeddings {
                results.push(self.search(user_id, embedding, params).await?);
            }
            Ok(results)
        }
    }
}

/// Story and message persistence.
pub trait TurnStore: Send + Sync {
    /// Creates a story scoping future messages to `user_id` and `handler`.
    ///
    /// # Errors
    /// Fails on backend failure.
    fn create_story(
        &self,
        user_id: &str,
        name: Option<&str>,
        handler: &str,
    ) -> impl Future<Output = crate::Result<Story>> + Send;

    /// Appends a conversation turn to a story.
    ///
    /// # Errors
    /// Fails when the story does not exist or on backend failure.
    fn append_message(
        &self,
        story_id: i64,
        kind: ContentKind,
        content: Value,
    ) -> impl Future<Output = crate::Result<Message>> + Send;

    /// Loads every unextracted message belonging to `user_id`'s stories,
    /// joined to its story's handler name, ordered by `created_at` ascending.
    ///
    /// # Errors
    /// Fails on backend failure; no pending messages is a success.
    fn load_pending(
        &self,
        user_id: &str,
    ) -> impl Future<Output = crate::Result<Vec<PendingMessage>>> + Send;
}

/// Combined storage surface for the extraction pipeline.
pub trait ExtractionStore: MemoryStore + TurnStore {
    /// Applies an extraction's decisions and marks the consumed batch in a
    /// single all-or-nothing transaction: either every write lands and every
    /// message is flagged extracted, or nothing changes.
    ///
    /// # Errors
    /// Fails (with no partial effects) when any write targets a missing row,
    /// on dimension mismatch, or on backend failure.
    fn commit_extraction(
        &self,
        user_id: &str,
        writes: Vec<MemoryWrite>,
        message_ids: &[i64],
    ) -> impl Future<Output = crate::Result<Committed>> + Send;
}

macro_rules! impl_store_wrappers {
    ($($name:ident),*) => {
        $(
            impl<S: MemoryStore> MemoryStore for $name<S> {
                fn insert(
                    &self,
                    memory: NewMemory,
                ) -> impl Future<Output = crate::Result<Memory>> + Send {
                    S::insert(self, memory)
                }

                fn update(
                    &self,
                    id: i64,
                    patch: MemoryPatch,
                ) -> impl Future<Output = crate::Result<Memory>> + Send {
                    S::update(self, id, patch)
                }

                fn search(
                    &self,
                    user_id: &str,
                    embedding: &[f32],
                    params: SearchParams,
                ) -> impl Future<Output = crate::Result<Vec<ScoredMemory>>> + Send {
                    S::search(self, user_id, embedding, params)
                }

                fn bulk_search(
                    &self,
                    user_id: &str,
                    embeddings: &[Embedding],
                    params: SearchParams,
                ) -> impl Future<Output = crate::Result<Vec<Vec<ScoredMemory>>>> + Send {
                    S::bulk_search(self, user_id, embeddings, params)
                }
            }

            impl<S: TurnStore> TurnStore for $name<S> {
                fn create_story(
                    &self,
                    user_id: &str,
                    name: Option<&str>,
                    handler: &str,
                ) -> impl Future<Output = crate::Result<Story>> + Send {
                    S::create_story(self, user_id, name, handler)
                }

                fn append_message(
                    &self,
                    story_id: i64,
                    kind: ContentKind,
                    content: Value,
                ) -> impl Future<Output = crate::Result<Message>> + Send {
                    S::append_message(self, story_id, kind, content)
                }

                fn load_pending(
                    &self,
                    user_id: &str,
                ) -> impl Future<Output = crate::Result<Vec<PendingMessage>>> + Send {
                    S::load_pending(self, user_id)
                }
            }

            impl<S: ExtractionStore> ExtractionStore for $name<S> {
                fn commit_extraction(
                    &self,
                    user_id: &str,
                    writes: Vec<MemoryWrite>,
                    message_ids: &[i64],
                ) -> impl Future<Output = crate::Result<Committed>> + Send {
                    S::commit_extraction(self, user_id, writes, message_ids)
                }
            }
        )*
    };
}

impl_store_wrappers!(Arc);
