//! In-process reference implementation of the store traits.
//!
//! [`InMemoryStore`] keeps stories, messages, and memories in one
//! `RwLock`-guarded state with a per-owner HNSW index. The extraction commit
//! validates every write before applying any, so a failed commit leaves the
//! state untouched, the in-process equivalent of a rolled-back transaction.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use mnemo_core::{
    Committed, ContentKind, Embedding, ExtractionStore, Memory, MemoryPatch, MemoryStore,
    MemoryWrite, Message, NewMemory, PendingMessage, ScoredMemory, SearchParams, Story, TurnStore,
};

use crate::error::{Result, StoreError};
use crate::index::UserIndex;

struct State {
    stories: BTreeMap<i64, Story>,
    messages: BTreeMap<i64, Message>,
    memories: BTreeMap<i64, Memory>,
    indexes: HashMap<String, UserIndex>,
    next_story_id: i64,
    next_message_id: i64,
    next_memory_id: i64,
}

impl State {
    fn new() -> Self {
        Self {
            stories: BTreeMap::new(),
            messages: BTreeMap::new(),
            memories: BTreeMap::new(),
            indexes: HashMap::new(),
            next_story_id: 1,
            next_message_id: 1,
            next_memory_id: 1,
        }
    }

    fn insert_memory(&mut self, new: NewMemory) -> Memory {
        let now = OffsetDateTime::now_utc();
        let id = self.next_memory_id;
        self.next_memory_id += 1;

        let memory = Memory {
            id,
            user_id: new.user_id,
            content: new.content,
            prev_content: None,
            category: new.category,
            importance: new.importance,
            confidence: new.confidence,
            action: new.action,
            embedding: new.embedding,
            created_at: now,
            updated_at: now,
        };

        self.indexes
            .entry(memory.user_id.clone())
            .or_insert_with(UserIndex::new)
            .upsert(id, memory.embedding.clone());
        self.memories.insert(id, memory.clone());
        memory
    }

    fn patch_memory(&mut self, id: i64, patch: MemoryPatch) -> Result<Memory> {
        let memory = self
            .memories
            .get_mut(&id)
            .ok_or(StoreError::MemoryNotFound(id))?;

        memory.content = patch.content;
        memory.prev_content = patch.prev_content;
        memory.embedding = patch.embedding;
        memory.action = patch.action;
        memory.updated_at = OffsetDateTime::now_utc();

        let memory = memory.clone();
        self.indexes
            .entry(memory.user_id.clone())
            .or_insert_with(UserIndex::new)
            .upsert(id, memory.embedding.clone());
        Ok(memory)
    }

    /// The UPDATE half of an extraction commit: derives `prev_content` from
    /// the row's current content.
    fn rewrite_memory(&mut self, id: i64, content: String, embedding: Embedding) -> Result<Memory> {
        let current = self
            .memories
            .get(&id)
            .ok_or(StoreError::MemoryNotFound(id))?
            .content
            .clone();
        self.patch_memory(
            id,
            MemoryPatch {
                content,
                prev_content: Some(current),
                embedding,
                action: mnemo_core::MemoryAction::Update,
            },
        )
    }

    fn search(
        &mut self,
        user_id: &str,
        embedding: &[f32],
        params: SearchParams,
    ) -> Vec<ScoredMemory> {
        let hits = match self.indexes.get_mut(user_id) {
            Some(index) => index.search(embedding, params.top_k, params.min_similarity),
            None => return Vec::new(),
        };

        hits.into_iter()
            .filter_map(|(id, similarity)| {
                self.memories.get(&id).map(|memory| ScoredMemory {
                    memory: memory.clone(),
                    similarity,
                })
            })
            .collect()
    }
}

/// Thread-safe in-memory store with per-owner vector indexes.
pub struct InMemoryStore {
    dimension: usize,
    state: RwLock<State>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("InMemoryStore")
            .field("dimension", &self.dimension)
            .field("stories", &state.stories.len())
            .field("messages", &state.messages.len())
            .field("memories", &state.memories.len())
            .finish()
    }
}

impl InMemoryStore {
    /// Creates an empty store sized to the embedding dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(State::new()),
        }
    }

    /// Configured embedding dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fetches a memory row by id.
    #[must_use]
    pub fn memory(&self, id: i64) -> Option<Memory> {
        self.state.read().memories.get(&id).cloned()
    }

    /// Returns every memory owned by `user_id`, oldest first.
    #[must_use]
    pub fn memories_for(&self, user_id: &str) -> Vec<Memory> {
        self.state
            .read()
            .memories
            .values()
            .filter(|memory| memory.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Fetches a message row by id.
    #[must_use]
    pub fn message(&self, id: i64) -> Option<Message> {
        self.state.read().messages.get(&id).cloned()
    }

    fn check_dim(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            })
        }
    }
}

impl MemoryStore for InMemoryStore {
    async fn insert(&self, memory: NewMemory) -> mnemo_core::Result<Memory> {
        self.check_dim(&memory.embedding)?;
        Ok(self.state.write().insert_memory(memory))
    }

    async fn update(&self, id: i64, patch: MemoryPatch) -> mnemo_core::Result<Memory> {
        self.check_dim(&patch.embedding)?;
        Ok(self.state.write().patch_memory(id, patch)?)
    }

    async fn search(
        &self,
        user_id: &str,
        embedding: &[f32],
        params: SearchParams,
    ) -> mnemo_core::Result<Vec<ScoredMemory>> {
        self.check_dim(embedding)?;
        Ok(self.state.write().search(user_id, embedding, params))
    }

    async fn bulk_search(
        &self,
        user_id: &str,
        embeddings: &[Embedding],
        params: SearchParams,
    ) -> mnemo_core::Result<Vec<Vec<ScoredMemory>>> {
        for embedding in embeddings {
            self.check_dim(embedding)?;
        }

        // One lock acquisition for the whole fan-out; output order matches
        // input order.
        let mut state = self.state.write();
        Ok(embeddings
            .iter()
            .map(|embedding| state.search(user_id, embedding, params))
            .collect())
    }
}

impl TurnStore for InMemoryStore {
    async fn create_story(
        &self,
        user_id: &str,
        name: Option<&str>,
        handler: &str,
    ) -> mnemo_core::Result<Story> {
        let mut state = self.state.write();
        let now = OffsetDateTime::now_utc();
        let id = state.next_story_id;
        state.next_story_id += 1;

        let story = Story {
            id,
            user_id: user_id.to_owned(),
            name: name.map(ToOwned::to_owned),
            handler: handler.to_owned(),
            created_at: now,
            updated_at: now,
        };
        state.stories.insert(id, story.clone());
        Ok(story)
    }

    async fn append_message(
        &self,
        story_id: i64,
        kind: ContentKind,
        content: Value,
    ) -> mnemo_core::Result<Message> {
        let mut state = self.state.write();
        if !state.stories.contains_key(&story_id) {
            return Err(StoreError::StoryNotFound(story_id).into());
        }

        let now = OffsetDateTime::now_utc();
        let id = state.next_message_id;
        state.next_message_id += 1;

        let message = Message {
            id,
            story_id,
            kind,
            content,
            extracted: false,
            created_at: now,
            updated_at: now,
        };
        state.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn load_pending(&self, user_id: &str) -> mnemo_core::Result<Vec<PendingMessage>> {
        let state = self.state.read();

        let mut pending: Vec<PendingMessage> = state
            .messages
            .values()
            .filter(|message| !message.extracted)
            .filter_map(|message| {
                let story = state.stories.get(&message.story_id)?;
                (story.user_id == user_id).then(|| PendingMessage {
                    message: message.clone(),
                    handler: story.handler.clone(),
                })
            })
            .collect();

        pending.sort_by(|a, b| {
            (a.message.created_at, a.message.id).cmp(&(b.message.created_at, b.message.id))
        });
        Ok(pending)
    }
}

impl ExtractionStore for InMemoryStore {
    async fn commit_extraction(
        &self,
        user_id: &str,
        writes: Vec<MemoryWrite>,
        message_ids: &[i64],
    ) -> mnemo_core::Result<Committed> {
        let mut state = self.state.write();

        // Validate everything up front so a bad write leaves nothing behind.
        for write in &writes {
            match write {
                MemoryWrite::Add(new) => self.check_dim(&new.embedding)?,
                MemoryWrite::Update { id, embedding, .. } => {
                    self.check_dim(embedding)?;
                    let target = state
                        .memories
                        .get(id)
                        .ok_or(StoreError::MemoryNotFound(*id))?;
                    if target.user_id != user_id {
                        return Err(StoreError::MemoryNotFound(*id).into());
                    }
                }
            }
        }
        for id in message_ids {
            if !state.messages.contains_key(id) {
                return Err(StoreError::MessageNotFound(*id).into());
            }
        }

        let mut committed = Committed::default();
        for write in writes {
            match write {
                MemoryWrite::Add(new) => {
                    state.insert_memory(new);
                    committed.added += 1;
                }
                MemoryWrite::Update {
                    id,
                    content,
                    embedding,
                } => {
                    state.rewrite_memory(id, content, embedding)?;
                    committed.updated += 1;
                }
            }
        }

        let now = OffsetDateTime::now_utc();
        for id in message_ids {
            if let Some(message) = state.messages.get_mut(id) {
                message.extracted = true;
                message.updated_at = now;
                committed.messages_marked += 1;
            }
        }

        debug!(
            user_id,
            added = committed.added,
            updated = committed.updated,
            messages = committed.messages_marked,
            "extraction committed"
        );
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::MemoryAction;
    use serde_json::json;

    fn new_memory(user_id: &str, content: &str, embedding: Vec<f32>) -> NewMemory {
        NewMemory {
            user_id: user_id.to_owned(),
            content: content.to_owned(),
            embedding,
            category: "personal".to_owned(),
            importance: 0.8,
            confidence: 0.9,
            action: MemoryAction::Add,
        }
    }

    /// Unit vector in 4 dimensions parameterized by an angle.
    fn unit(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin(), 0.0, 0.0]
    }

    #[tokio::test]
    async fn insert_and_search() {
        let store = InMemoryStore::new(4);
        store
            .insert(new_memory("u1", "likes tea", unit(0.0)))
            .await
            .unwrap();
        store
            .insert(new_memory("u1", "likes hiking", unit(1.2)))
            .await
            .unwrap();

        let results = store
            .search(
                "u1",
                &unit(0.1),
                SearchParams {
                    top_k: 2,
                    min_similarity: 0.5,
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.content, "likes tea");
        assert!(results[0].similarity > 0.5);
    }

    #[tokio::test]
    async fn search_is_scoped_to_owner() {
        let store = InMemoryStore::new(4);
        store
            .insert(new_memory("u1", "u1 fact", unit(0.0)))
            .await
            .unwrap();
        store
            .insert(new_memory("u2", "u2 fact", unit(0.0)))
            .await
            .unwrap();

        let results = store
            .search("u2", &unit(0.0), SearchParams::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.user_id, "u2");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryStore::new(4);
        let err = store
            .insert(new_memory("u1", "short vector", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));

        let err = store
            .search("u1", &[1.0, 0.0], SearchParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn top_k_zero_and_exact_threshold() {
        let store = InMemoryStore::new(4);
        store
            .insert(new_memory("u1", "fact", unit(0.0)))
            .await
            .unwrap();

        let none = store
            .search(
                "u1",
                &unit(0.0),
                SearchParams {
                    top_k: 0,
                    min_similarity: 0.0,
                },
            )
            .await
            .unwrap();
        assert!(none.is_empty());

        // min_similarity is an exclusive bound: 1.0 admits nothing, even an
        // exact match.
        let none = store
            .search(
                "u1",
                &unit(0.0),
                SearchParams {
                    top_k: 5,
                    min_similarity: 1.0,
                },
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn bulk_search_fan_out() {
        let store = InMemoryStore::new(4);
        for i in 0..50 {
            #[allow(clippy::cast_precision_loss)]
            let angle = i as f32 * 0.12;
            store
                .insert(new_memory("u1", &format!("fact {i}"), unit(angle)))
                .await
                .unwrap();
        }

        let queries: Vec<Vec<f32>> = (0..10)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let angle = i as f32 * 0.6;
                unit(angle)
            })
            .collect();

        let lists = store
            .bulk_search(
                "u1",
                &queries,
                SearchParams {
                    top_k: 5,
                    min_similarity: 0.3,
                },
            )
            .await
            .unwrap();

        assert_eq!(lists.len(), 10);
        for list in &lists {
            assert!(list.len() <= 5);
            for hit in list {
                assert!(hit.similarity > 0.3);
            }
            for window in list.windows(2) {
                assert!(window[0].similarity >= window[1].similarity);
            }
        }
    }

    #[tokio::test]
    async fn update_records_patch() {
        let store = InMemoryStore::new(4);
        let memory = store
            .insert(new_memory("u1", "lives in Portland", unit(0.0)))
            .await
            .unwrap();

        let updated = store
            .update(
                memory.id,
                MemoryPatch {
                    content: "lives in Seattle".to_owned(),
                    prev_content: Some("lives in Portland".to_owned()),
                    embedding: unit(0.4),
                    action: MemoryAction::Update,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.content, "lives in Seattle");
        assert_eq!(updated.prev_content.as_deref(), Some("lives in Portland"));
        assert_eq!(updated.action, MemoryAction::Update);
    }

    #[tokio::test]
    async fn load_pending_orders_and_filters() {
        let store = InMemoryStore::new(4);
        let story = store.create_story("u1", None, "chat").await.unwrap();
        let other = store.create_story("u2", None, "chat").await.unwrap();

        let first = store
            .append_message(story.id, ContentKind::Query, json!({"question": "a"}))
            .await
            .unwrap();
        let second = store
            .append_message(story.id, ContentKind::Response, json!({"answer": "b"}))
            .await
            .unwrap();
        store
            .append_message(other.id, ContentKind::Query, json!({"question": "other"}))
            .await
            .unwrap();

        let pending = store.load_pending("u1").await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message.id, first.id);
        assert_eq!(pending[1].message.id, second.id);
        assert_eq!(pending[0].handler, "chat");

        store
            .commit_extraction("u1", Vec::new(), &[first.id, second.id])
            .await
            .unwrap();
        assert!(store.load_pending("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_writes_and_marks_messages() {
        let store = InMemoryStore::new(4);
        let story = store.create_story("u1", None, "chat").await.unwrap();
        let message = store
            .append_message(story.id, ContentKind::Query, json!({"question": "q"}))
            .await
            .unwrap();
        let existing = store
            .insert(new_memory("u1", "lives in Portland", unit(0.0)))
            .await
            .unwrap();

        let committed = store
            .commit_extraction(
                "u1",
                vec![
                    MemoryWrite::Add(new_memory("u1", "prefers jasmine tea", unit(1.0))),
                    MemoryWrite::Update {
                        id: existing.id,
                        content: "lives in Seattle".to_owned(),
                        embedding: unit(0.4),
                    },
                ],
                &[message.id],
            )
            .await
            .unwrap();

        assert_eq!(
            committed,
            Committed {
                added: 1,
                updated: 1,
                messages_marked: 1,
            }
        );

        let updated = store.memory(existing.id).unwrap();
        assert_eq!(updated.content, "lives in Seattle");
        assert_eq!(updated.prev_content.as_deref(), Some("lives in Portland"));
        assert_eq!(updated.action, MemoryAction::Update);
        assert!(store.message(message.id).unwrap().extracted);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_trace() {
        let store = InMemoryStore::new(4);
        let story = store.create_story("u1", None, "chat").await.unwrap();
        let message = store
            .append_message(story.id, ContentKind::Query, json!({"question": "q"}))
            .await
            .unwrap();

        // The second write targets a missing memory, so the whole commit
        // must be rejected: no insert, no flag flip.
        let err = store
            .commit_extraction(
                "u1",
                vec![
                    MemoryWrite::Add(new_memory("u1", "orphaned add", unit(0.0))),
                    MemoryWrite::Update {
                        id: 999,
                        content: "ghost".to_owned(),
                        embedding: unit(0.1),
                    },
                ],
                &[message.id],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("memory not found"));

        assert!(store.memories_for("u1").is_empty());
        assert!(!store.message(message.id).unwrap().extracted);
    }

    #[tokio::test]
    async fn commit_rejects_cross_user_update() {
        let store = InMemoryStore::new(4);
        let foreign = store
            .insert(new_memory("u2", "not yours", unit(0.0)))
            .await
            .unwrap();

        let err = store
            .commit_extraction(
                "u1",
                vec![MemoryWrite::Update {
                    id: foreign.id,
                    content: "hijacked".to_owned(),
                    embedding: unit(0.1),
                }],
                &[],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("memory not found"));
        assert_eq!(store.memory(foreign.id).unwrap().content, "not yours");
    }
}
