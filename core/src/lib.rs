//! # mnemo-core
//!
//! Trait seams and domain model for the mnemo conversational memory engine.
//!
//! The engine distills conversation turns into durable, semantically
//! addressable memories. This crate hosts everything the other workspace
//! crates agree on:
//!
//! - [`CompletionModel`] and [`EmbeddingModel`] — the two operations the
//!   engine needs from a language-model provider: structured-output
//!   completion against a JSON schema, and fixed-dimension text embedding.
//! - [`MemoryStore`], [`TurnStore`], and [`ExtractionStore`] — the storage
//!   seams: owner-scoped vector search over memories, story/message
//!   persistence, and the all-or-nothing extraction commit.
//! - [`ExtractionRunner`] — the seam between the scheduler's workers and the
//!   extraction pipeline.
//! - [`Handler`] and [`HandlerRegistry`] — how opaque message payloads are
//!   rendered into prompt lines, keyed by the handler name stored on each
//!   story.
//! - The domain model: [`Story`], [`Message`], [`Memory`], and friends.
//!
//! Provider crates (or test mocks) implement the model traits; storage
//! backends implement the store traits; the `mnemo-extract` and
//! `mnemo-scheduler` crates consume them.

/// Engine configuration and scheduler operational profiles.
pub mod config;
/// Story handler contract and registry.
pub mod handler;
/// Language-model trait seams: completion and embedding.
pub mod llm;
/// Seam between the scheduler and the extraction pipeline.
pub mod runner;
/// Storage trait seams.
pub mod store;
/// Domain model shared across the engine.
pub mod types;

#[doc(inline)]
pub use config::{EngineConfig, RateLimit, SchedulerProfile};
#[doc(inline)]
pub use handler::{ChatHandler, Handler, HandlerRegistry};
#[doc(inline)]
pub use llm::{CompletionModel, Embedding, EmbeddingModel};
#[doc(inline)]
pub use runner::ExtractionRunner;
#[doc(inline)]
pub use store::{
    Committed, ExtractionStore, MemoryPatch, MemoryStore, MemoryWrite, NewMemory, ScoredMemory,
    SearchParams, TurnStore,
};
#[doc(inline)]
pub use types::{
    ContentKind, ExtractionStats, Memory, MemoryAction, Message, PendingMessage, Story,
};

/// Result type used throughout the crate's trait seams.
pub type Result<T> = anyhow::Result<T>;

pub use anyhow::Error;
