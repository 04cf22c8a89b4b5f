//! Prompt memory recall.
//!
//! The read-side path from a free-text cue to a formatted prompt section:
//! embed the cue, top-K search the caller's memories, and render one memory
//! per line. Handlers are forbidden from touching the store directly: every
//! recall goes through this single formatting contract, so the model sees
//! consistent memory sections regardless of the calling handler.
//!
//! Recall never propagates failures into a handler: errors are logged and
//! absorbed into a stable sentinel string.

use tracing::warn;

use mnemo_core::{EmbeddingModel, MemoryStore, ScoredMemory, SearchParams};

/// Returned when the search yields nothing.
pub const NO_MEMORIES: &str = "(No relevant memories found)";

/// Returned when embedding or search fails.
pub const UNAVAILABLE: &str = "(Unable to load memories)";

/// Parameters for a recall lookup.
#[derive(Debug, Clone, Copy)]
pub struct RecallParams {
    /// Maximum memories in the section.
    pub top_k: usize,
    /// Similarity floor for inclusion.
    pub min_similarity: f32,
}

impl Default for RecallParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.3,
        }
    }
}

/// Read-side recall over a memory store and an embedding model.
#[derive(Debug)]
pub struct Recall<S, E> {
    store: S,
    embedder: E,
    params: RecallParams,
}

impl<S, E> Recall<S, E>
where
    S: MemoryStore,
    E: EmbeddingModel,
{
    /// Creates a recall path with default parameters.
    #[must_use]
    pub fn new(store: S, embedder: E) -> Self {
        Self {
            store,
            embedder,
            params: RecallParams::default(),
        }
    }

    /// Overrides the recall parameters.
    #[must_use]
    pub fn with_params(mut self, params: RecallParams) -> Self {
        self.params = params;
        self
    }

    /// Returns the user's memories relevant to `cue`, formatted for a prompt
    /// section. Never fails: errors log and resolve to [`UNAVAILABLE`], an
    /// empty search to [`NO_MEMORIES`].
    pub async fn recall(&self, user_id: &str, cue: &str) -> String {
        match self.lookup(user_id, cue).await {
            Ok(hits) if hits.is_empty() => NO_MEMORIES.to_owned(),
            Ok(hits) => format_section(&hits),
            Err(err) => {
                warn!(user_id, error = %err, "memory recall failed");
                UNAVAILABLE.to_owned()
            }
        }
    }

    async fn lookup(&self, user_id: &str, cue: &str) -> mnemo_core::Result<Vec<ScoredMemory>> {
        let embedding = self.embedder.embed(cue).await?;
        self.store
            .search(
                user_id,
                &embedding,
                SearchParams {
                    top_k: self.params.top_k,
                    min_similarity: self.params.min_similarity,
                },
            )
            .await
    }
}

fn format_section(hits: &[ScoredMemory]) -> String {
    hits.iter()
        .map(|hit| {
            let memory = &hit.memory;
            let mut meta = Vec::with_capacity(3);
            if !memory.category.is_empty() {
                meta.push(memory.category.clone());
            }
            meta.push(format!("importance {:.2}", memory.importance));
            meta.push(format!("confidence {:.2}", memory.confidence));
            format!("- {} [{}]", memory.content, meta.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
