//! # mnemo
//!
//! Conversational memory engine: ingest per-user conversation turns,
//! distill them into durable, semantically addressable memories, and reuse
//! those memories to enrich future prompts.
//!
//! This façade re-exports the whole workspace. The moving parts:
//!
//! - [`HandlerRegistry`] + [`Handler`] — render opaque message payloads into
//!   prompt lines, keyed by the handler name on each story.
//! - [`store::InMemoryStore`] (or `store::PgStore` with the `postgres`
//!   feature) — owner-scoped vector store over memories plus story/message
//!   persistence and the atomic extraction commit.
//! - [`extract::Extractor`] — the staged pipeline: load pending turns,
//!   retrieve normalized facts, resolve them against existing memories by
//!   cosine similarity, and commit ADD/UPDATE decisions transactionally.
//! - [`scheduler::ExtractionScheduler`] — per-user debounced job queue with
//!   a bounded worker pool, retry backoff, and a global rate limit.
//! - [`extract::Recall`] — the read side: free-text cue to a formatted
//!   prompt section, never failing into the caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mnemo::{ChatHandler, CompletionModel, EmbeddingModel, HandlerRegistry, SchedulerProfile};
//! use mnemo::extract::Extractor;
//! use mnemo::scheduler::ExtractionScheduler;
//! use mnemo::store::InMemoryStore;
//!
//! async fn wire<L, E>(completion: L, embedder: E)
//! where
//!     L: CompletionModel + 'static,
//!     E: EmbeddingModel + 'static,
//! {
//!     let store = Arc::new(InMemoryStore::new(embedder.dim()));
//!
//!     let mut handlers = HandlerRegistry::new();
//!     handlers.register(Arc::new(ChatHandler));
//!
//!     let extractor = Extractor::new(
//!         Arc::clone(&store),
//!         completion,
//!         embedder,
//!         Arc::new(handlers),
//!     );
//!     let scheduler = ExtractionScheduler::start(extractor, SchedulerProfile::production());
//!
//!     // After a handler persists a turn:
//!     scheduler.schedule("user-1").unwrap();
//! }
//! ```

pub use mnemo_core::*;

pub use mnemo_extract as extract;
pub use mnemo_scheduler as scheduler;
pub use mnemo_store as store;
