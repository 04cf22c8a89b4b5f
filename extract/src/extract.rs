//! The staged extraction pipeline.
//!
//! [`Extractor::extract`] turns a user's pending messages into committed
//! memory decisions in six strictly ordered stages:
//!
//! 1. Load the pending batch (messages joined to their handler names).
//! 2. Render the conversation through the handlers and retrieve normalized
//!    facts from the completion model.
//! 3. Batch-embed the fact texts.
//! 4. Bulk-search existing memories to build the unified-id resolution
//!    context.
//! 5. Ask the completion model for ADD/UPDATE decisions and build the
//!    decision plan, re-embedding only rewritten texts.
//! 6. Commit every decision and flag every consumed message in one
//!    transaction.
//!
//! Failures in stages 1–5 abort with no side effects; a stage-6 failure
//! rolls back. Marked messages are never reloaded, so a successful re-run
//! over the same batch is a no-op.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use mnemo_core::{
    CompletionModel, EmbeddingModel, ExtractionRunner, ExtractionStats, ExtractionStore,
    HandlerRegistry, PendingMessage, SearchParams,
};

use crate::error::{ExtractError, Result};
use crate::plan::{DecisionPlan, Origin, PlannedAdd, PlannedUpdate, ResolutionContext};
use crate::prompts;
use crate::schema::{DecisionEvent, DecisionSheet, Fact, FactSheet};

/// Tunables for the resolution stage.
#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    /// Similar memories fetched per fact when building the resolution
    /// context.
    pub resolution_top_k: usize,
    /// Similarity floor for resolution candidates.
    pub resolution_min_similarity: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            resolution_top_k: 3,
            resolution_min_similarity: 0.7,
        }
    }
}

impl ExtractorConfig {
    /// Overrides the resolution candidate count.
    #[must_use]
    pub const fn with_resolution_top_k(mut self, top_k: usize) -> Self {
        self.resolution_top_k = top_k;
        self
    }

    /// Overrides the resolution similarity floor.
    #[must_use]
    pub const fn with_resolution_min_similarity(mut self, min_similarity: f32) -> Self {
        self.resolution_min_similarity = min_similarity;
        self
    }
}

/// The extraction pipeline over a store, a completion model, and an
/// embedding model.
pub struct Extractor<S, L, E> {
    store: S,
    completion: L,
    embedder: E,
    handlers: Arc<HandlerRegistry>,
    config: ExtractorConfig,
}

impl<S, L, E> std::fmt::Debug for Extractor<S, L, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, L, E> Extractor<S, L, E>
where
    S: ExtractionStore,
    L: CompletionModel,
    E: EmbeddingModel,
{
    /// Creates a pipeline with the default configuration.
    #[must_use]
    pub fn new(store: S, completion: L, embedder: E, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            completion,
            embedder,
            handlers,
            config: ExtractorConfig::default(),
        }
    }

    /// Overrides the pipeline configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Runs one extraction for `user_id`.
    ///
    /// # Errors
    /// Surfaces completion, embedding, and store failures, plus
    /// [`ExtractError::UnknownHandler`] when a story names an unregistered
    /// handler. A failed run leaves the pending batch untouched.
    pub async fn extract(&self, user_id: &str) -> Result<ExtractionStats> {
        self.run(user_id).await
    }

    async fn run(&self, user_id: &str) -> Result<ExtractionStats> {
        // Stage 1: load the pending batch.
        let pending = self
            .store
            .load_pending(user_id)
            .await
            .map_err(ExtractError::Store)?;
        if pending.is_empty() {
            debug!(user_id, "no pending messages");
            return Ok(ExtractionStats::default());
        }
        let message_ids: Vec<i64> = pending.iter().map(|p| p.message.id).collect();

        // Stage 2: render and retrieve facts.
        let conversation = self.render_conversation(&pending)?;
        let facts = self.retrieve_facts(&conversation).await?;
        debug!(
            user_id,
            messages = message_ids.len(),
            facts = facts.len(),
            "facts retrieved"
        );

        if facts.is_empty() {
            // Nothing to resolve; still mark the batch so it is not
            // reprocessed.
            self.store
                .commit_extraction(user_id, Vec::new(), &message_ids)
                .await
                .map_err(ExtractError::Store)?;
            return Ok(ExtractionStats {
                messages_extracted: message_ids.len(),
                ..ExtractionStats::default()
            });
        }

        // Stage 3: embed the fact texts, order-aligned.
        let texts: Vec<String> = facts.iter().map(|fact| fact.text.clone()).collect();
        let fact_embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(ExtractError::Embedding)?;
        if fact_embeddings.len() != facts.len() {
            return Err(ExtractError::Embedding(anyhow::anyhow!(
                "expected {} embeddings, got {}",
                facts.len(),
                fact_embeddings.len()
            )));
        }

        // Stage 4: build the resolution context.
        let hits = self
            .store
            .bulk_search(
                user_id,
                &fact_embeddings,
                SearchParams {
                    top_k: self.config.resolution_top_k,
                    min_similarity: self.config.resolution_min_similarity,
                },
            )
            .await
            .map_err(ExtractError::Store)?;
        let context = ResolutionContext::build(hits, &texts);

        // Stage 5: decide ADD vs UPDATE and build the plan.
        let sheet: DecisionSheet = self
            .completion
            .complete(&prompts::memory_update(
                context.memory_lines(),
                context.fact_lines(),
            ))
            .await
            .map_err(ExtractError::Completion)?;
        let plan = self
            .build_plan(sheet, &context, &facts, &fact_embeddings)
            .await?;

        // Stage 6: apply everything in one transaction.
        let writes = plan
            .into_writes(user_id)
            .map_err(ExtractError::Embedding)?;
        let committed = self
            .store
            .commit_extraction(user_id, writes, &message_ids)
            .await
            .map_err(ExtractError::Store)?;

        let stats = ExtractionStats {
            facts_extracted: facts.len(),
            memories_added: committed.added,
            memories_updated: committed.updated,
            messages_extracted: message_ids.len(),
        };
        info!(
            user_id,
            facts = stats.facts_extracted,
            added = stats.memories_added,
            updated = stats.memories_updated,
            messages = stats.messages_extracted,
            "extraction finished"
        );
        Ok(stats)
    }

    /// Renders the batch to a conversation, one line per message, joined by
    /// blank lines. Messages whose content fails the handler's schema are
    /// dropped from the rendering but stay in the batch so stage 6 marks
    /// them.
    fn render_conversation(&self, pending: &[PendingMessage]) -> Result<String> {
        let mut lines = Vec::with_capacity(pending.len());
        for item in pending {
            let handler =
                self.handlers
                    .get(&item.handler)
                    .ok_or_else(|| ExtractError::UnknownHandler {
                        name: item.handler.clone(),
                    })?;
            match handler.message_to_string(&item.message) {
                Ok(line) => lines.push(line),
                Err(err) => {
                    warn!(
                        message_id = item.message.id,
                        handler = %item.handler,
                        error = %err,
                        "message content failed handler schema; dropped from rendering"
                    );
                }
            }
        }
        Ok(lines.join("\n\n"))
    }

    async fn retrieve_facts(&self, conversation: &str) -> Result<Vec<Fact>> {
        if conversation.is_empty() {
            return Ok(Vec::new());
        }

        let today = OffsetDateTime::now_utc().date();
        let sheet: FactSheet = self
            .completion
            .complete(&prompts::fact_retrieval(conversation, today))
            .await
            .map_err(ExtractError::Completion)?;

        Ok(sheet
            .facts
            .into_iter()
            .filter(|fact| !fact.text.trim().is_empty())
            .collect())
    }

    /// Resolves the decision sheet against the unified namespace.
    ///
    /// Decisions referencing unknown ids and decisions with empty text are
    /// skipped; a skipped decision never fails the run. ADD decisions whose
    /// text matches the source fact reuse the stage-3 embedding, everything
    /// else is batch-embedded once at the end.
    async fn build_plan(
        &self,
        sheet: DecisionSheet,
        context: &ResolutionContext,
        facts: &[Fact],
        fact_embeddings: &[Vec<f32>],
    ) -> Result<DecisionPlan> {
        let mut plan = DecisionPlan::new();

        for decision in sheet.memory {
            let text = decision.text.trim();
            if text.is_empty() {
                debug!(id = %decision.id, "decision with empty text skipped");
                continue;
            }

            match (context.origin(&decision.id), decision.event) {
                (Some(Origin::Fact(idx)), DecisionEvent::Add) => {
                    let fact = &facts[idx];
                    if text == fact.text {
                        plan.seed(text, fact_embeddings[idx].clone());
                    }
                    plan.push_add(PlannedAdd {
                        text: text.to_owned(),
                        category: fact.category.clone(),
                        importance: fact.importance,
                        confidence: fact.confidence,
                    });
                }
                (Some(Origin::Memory(pos)), DecisionEvent::Update) => {
                    plan.push_update(PlannedUpdate {
                        target: context.memory(pos).id,
                        text: text.to_owned(),
                    });
                }
                _ => {
                    debug!(
                        id = %decision.id,
                        event = ?decision.event,
                        "decision references unknown unified id; skipped"
                    );
                }
            }
        }

        let queued = plan.pending_texts().to_vec();
        if !queued.is_empty() {
            let vectors = self
                .embedder
                .embed_batch(&queued)
                .await
                .map_err(ExtractError::Embedding)?;
            plan.attach(vectors).map_err(ExtractError::Embedding)?;
        }

        Ok(plan)
    }
}

impl<S, L, E> ExtractionRunner for Extractor<S, L, E>
where
    S: ExtractionStore,
    L: CompletionModel,
    E: EmbeddingModel,
{
    async fn extract(&self, user_id: &str) -> mnemo_core::Result<ExtractionStats> {
        Ok(self.run(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use schemars::JsonSchema;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};

    use mnemo_core::{
        ChatHandler, ContentKind, Embedding, MemoryAction, MemoryStore, NewMemory, TurnStore,
    };
    use mnemo_store::InMemoryStore;

    const DIM: usize = 4;

    /// Completion model that replays queued JSON payloads and records every
    /// prompt it sees. Running out of responses is an error, so a test fails
    /// loudly if the pipeline makes an unexpected call.
    struct ScriptedCompletion {
        responses: Mutex<VecDeque<Value>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl CompletionModel for ScriptedCompletion {
        async fn complete<T>(&self, prompt: &str) -> mnemo_core::Result<T>
        where
            T: JsonSchema + DeserializeOwned + 'static,
        {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            let value = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted response left"))?;
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Deterministic embedder with optional per-text overrides.
    struct KeyedEmbedder {
        overrides: HashMap<String, Embedding>,
        calls: AtomicUsize,
    }

    impl KeyedEmbedder {
        fn new() -> Self {
            Self {
                overrides: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_override(mut self, text: &str, embedding: Embedding) -> Self {
            self.overrides.insert(text.to_owned(), embedding);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn vector_for(text: &str) -> Embedding {
            let seed: u32 = text.bytes().map(u32::from).sum();
            #[allow(clippy::cast_precision_loss)]
            let angle = (seed % 628) as f32 / 100.0;
            vec![angle.cos(), angle.sin(), 0.0, 0.0]
        }
    }

    impl EmbeddingModel for KeyedEmbedder {
        fn dim(&self) -> usize {
            DIM
        }

        async fn embed(&self, text: &str) -> mnemo_core::Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .overrides
                .get(text)
                .cloned()
                .unwrap_or_else(|| Self::vector_for(text)))
        }
    }

    fn unit(angle: f32) -> Embedding {
        vec![angle.cos(), angle.sin(), 0.0, 0.0]
    }

    fn registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(ChatHandler));
        Arc::new(registry)
    }

    fn fact(text: &str) -> Value {
        json!({"text": text, "category": "personal", "importance": 0.8, "confidence": 0.9})
    }

    async fn seed_turn(store: &InMemoryStore, user: &str, question: &str, answer: &str) -> Vec<i64> {
        let story = store.create_story(user, None, "chat").await.unwrap();
        let q = store
            .append_message(story.id, ContentKind::Query, json!({"question": question}))
            .await
            .unwrap();
        let a = store
            .append_message(story.id, ContentKind::Response, json!({"answer": answer}))
            .await
            .unwrap();
        vec![q.id, a.id]
    }

    #[tokio::test]
    async fn cold_start_extracts_and_commits() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let ids = seed_turn(
            &store,
            "u1",
            "I live in Portland, Oregon and prefer jasmine tea.",
            "Noted!",
        )
        .await;

        let completion = Arc::new(ScriptedCompletion::new(vec![
            json!({"facts": [
                fact("Lives in Portland, Oregon"),
                fact("Prefers jasmine tea"),
            ]}),
            json!({"memory": [
                {"id": "1", "event": "ADD", "text": "Lives in Portland, Oregon"},
                {"id": "2", "event": "ADD", "text": "Prefers jasmine tea"},
            ]}),
        ]));

        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            KeyedEmbedder::new(),
            registry(),
        );

        let stats = extractor.extract("u1").await.unwrap();
        assert_eq!(stats.facts_extracted, 2);
        assert_eq!(stats.memories_added, 2);
        assert_eq!(stats.memories_updated, 0);
        assert_eq!(stats.messages_extracted, 2);

        let memories = store.memories_for("u1");
        assert_eq!(memories.len(), 2);
        assert!(memories
            .iter()
            .any(|m| m.content == "Lives in Portland, Oregon"));
        assert!(memories.iter().all(|m| m.action == MemoryAction::Add));
        for id in ids {
            assert!(store.message(id).unwrap().extracted);
        }

        // The fact prompt saw the rendered conversation.
        let prompts = completion.prompts();
        assert!(prompts[0].contains("User: I live in Portland, Oregon and prefer jasmine tea."));
        assert!(prompts[0].contains("Assistant: Noted!"));
        assert!(prompts[1].contains("1. Lives in Portland, Oregon"));
    }

    #[tokio::test]
    async fn rerun_on_extracted_batch_is_noop() {
        let store = Arc::new(InMemoryStore::new(DIM));
        seed_turn(&store, "u1", "I like chess.", "Great.").await;

        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::new(ScriptedCompletion::new(vec![
                json!({"facts": [fact("Likes chess")]}),
                json!({"memory": [{"id": "1", "event": "ADD", "text": "Likes chess"}]}),
            ])),
            KeyedEmbedder::new(),
            registry(),
        );

        extractor.extract("u1").await.unwrap();

        // The second run must not touch the model: the script is exhausted,
        // so any call would fail the test.
        let stats = extractor.extract("u1").await.unwrap();
        assert!(stats.is_noop());
        assert_eq!(store.memories_for("u1").len(), 1);
    }

    #[tokio::test]
    async fn correction_updates_existing_memory() {
        let store = Arc::new(InMemoryStore::new(DIM));
        store
            .insert(NewMemory {
                user_id: "u1".to_owned(),
                content: "Lives in Portland, Oregon".to_owned(),
                embedding: unit(0.0),
                category: "personal".to_owned(),
                importance: 0.9,
                confidence: 0.9,
                action: MemoryAction::Add,
            })
            .await
            .unwrap();
        seed_turn(
            &store,
            "u1",
            "Correction: I moved to Seattle last week.",
            "Got it.",
        )
        .await;

        let completion = Arc::new(ScriptedCompletion::new(vec![
            json!({"facts": [fact("Moved to Seattle last week")]}),
            // "1" is the existing memory's unified id; "2" is the fact's.
            json!({"memory": [{"id": "1", "event": "UPDATE", "text": "Lives in Seattle"}]}),
        ]));
        let embedder =
            KeyedEmbedder::new().with_override("Moved to Seattle last week", unit(0.05));

        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            embedder,
            registry(),
        );

        let stats = extractor.extract("u1").await.unwrap();
        assert_eq!(stats.memories_added, 0);
        assert_eq!(stats.memories_updated, 1);

        let memories = store.memories_for("u1");
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "Lives in Seattle");
        assert_eq!(
            memories[0].prev_content.as_deref(),
            Some("Lives in Portland, Oregon")
        );
        assert_eq!(memories[0].action, MemoryAction::Update);

        // The decision prompt listed the existing memory under id 1.
        assert!(completion.prompts()[1].contains("1. Lives in Portland, Oregon"));
    }

    #[tokio::test]
    async fn empty_fact_sheet_still_marks_messages() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let ids = seed_turn(&store, "u1", "hi", "hello").await;

        let completion = Arc::new(ScriptedCompletion::new(vec![json!({"facts": []})]));
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            KeyedEmbedder::new(),
            registry(),
        );

        let stats = extractor.extract("u1").await.unwrap();
        assert_eq!(stats.facts_extracted, 0);
        assert_eq!(stats.messages_extracted, 2);
        for id in ids {
            assert!(store.message(id).unwrap().extracted);
        }
        // Only the fact-retrieval call happened.
        assert_eq!(completion.prompts().len(), 1);
    }

    #[tokio::test]
    async fn unknown_handler_aborts_without_side_effects() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let story = store.create_story("u1", None, "ghost").await.unwrap();
        let message = store
            .append_message(story.id, ContentKind::Query, json!({"question": "q"}))
            .await
            .unwrap();

        let completion = Arc::new(ScriptedCompletion::new(Vec::new()));
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            KeyedEmbedder::new(),
            registry(),
        );

        let err = extractor.extract("u1").await.unwrap_err();
        assert!(matches!(err, ExtractError::UnknownHandler { ref name } if name == "ghost"));

        // Nothing was marked and no model call happened.
        assert!(!store.message(message.id).unwrap().extracted);
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_drops_line_but_marks_message() {
        let store = Arc::new(InMemoryStore::new(DIM));
        let story = store.create_story("u1", None, "chat").await.unwrap();
        let bad = store
            .append_message(story.id, ContentKind::Query, json!({"wrong": "shape"}))
            .await
            .unwrap();
        let good = store
            .append_message(
                story.id,
                ContentKind::Query,
                json!({"question": "I collect stamps."}),
            )
            .await
            .unwrap();

        let completion = Arc::new(ScriptedCompletion::new(vec![
            json!({"facts": [fact("Collects stamps")]}),
            json!({"memory": [{"id": "1", "event": "ADD", "text": "Collects stamps"}]}),
        ]));
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            KeyedEmbedder::new(),
            registry(),
        );

        let stats = extractor.extract("u1").await.unwrap();
        assert_eq!(stats.messages_extracted, 2);

        let prompts = completion.prompts();
        assert!(prompts[0].contains("I collect stamps."));
        assert!(!prompts[0].contains("wrong"));

        // Both messages are consumed, including the undecodable one.
        assert!(store.message(bad.id).unwrap().extracted);
        assert!(store.message(good.id).unwrap().extracted);
    }

    #[tokio::test]
    async fn unknown_decision_ids_are_skipped() {
        let store = Arc::new(InMemoryStore::new(DIM));
        seed_turn(&store, "u1", "I play violin.", "Nice.").await;

        let completion = Arc::new(ScriptedCompletion::new(vec![
            // The whitespace-only fact is dropped before embedding.
            json!({"facts": [fact("Plays violin"), fact("   ")]}),
            json!({"memory": [
                {"id": "99", "event": "ADD", "text": "Plays violin"},
                {"id": "not-a-number", "event": "UPDATE", "text": "Ghost"},
                {"id": "1", "event": "ADD", "text": ""},
            ]}),
        ]));
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            KeyedEmbedder::new(),
            registry(),
        );

        let stats = extractor.extract("u1").await.unwrap();
        assert_eq!(stats.facts_extracted, 1);
        assert_eq!(stats.memories_added, 0);
        assert_eq!(stats.memories_updated, 0);
        assert_eq!(stats.messages_extracted, 2);
        assert!(store.memories_for("u1").is_empty());
    }

    #[tokio::test]
    async fn rewritten_add_is_reembedded() {
        let store = Arc::new(InMemoryStore::new(DIM));
        seed_turn(&store, "u1", "I started running.", "Cool.").await;

        let completion = Arc::new(ScriptedCompletion::new(vec![
            json!({"facts": [fact("Started running")]}),
            json!({"memory": [{"id": "1", "event": "ADD", "text": "Runs regularly"}]}),
        ]));
        let embedder = Arc::new(KeyedEmbedder::new());
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            Arc::clone(&embedder),
            registry(),
        );

        extractor.extract("u1").await.unwrap();

        // One call for the fact text, one for the rewritten text.
        assert_eq!(embedder.calls(), 2);

        let memories = store.memories_for("u1");
        assert_eq!(memories[0].content, "Runs regularly");
        assert_eq!(memories[0].embedding, KeyedEmbedder::vector_for("Runs regularly"));
    }

    #[tokio::test]
    async fn unchanged_add_reuses_fact_embedding() {
        let store = Arc::new(InMemoryStore::new(DIM));
        seed_turn(&store, "u1", "I started running.", "Cool.").await;

        let completion = Arc::new(ScriptedCompletion::new(vec![
            json!({"facts": [fact("Started running")]}),
            json!({"memory": [{"id": "1", "event": "ADD", "text": "Started running"}]}),
        ]));
        let embedder = Arc::new(KeyedEmbedder::new());
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            Arc::clone(&embedder),
            registry(),
        );

        extractor.extract("u1").await.unwrap();

        // Only the stage-3 embedding; the ADD reused it.
        assert_eq!(embedder.calls(), 1);
    }
}
