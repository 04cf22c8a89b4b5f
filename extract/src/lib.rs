//! Staged fact-extraction pipeline and prompt memory recall.
//!
//! The write side of the memory engine: [`Extractor`] consumes a user's
//! pending conversation turns, asks the completion model for normalized
//! facts, resolves each fact against existing memories by vector similarity,
//! and commits ADD/UPDATE decisions in a single transaction. The read side,
//! [`Recall`], turns a free-text cue into a formatted prompt section.
//!
//! Both sides are generic over the trait seams in `mnemo-core`, so any
//! store backend and model provider plug in unchanged.

mod error;
mod extract;
mod plan;
mod prompts;
mod recall;
/// Structured-output schemas for the pipeline's LLM calls.
pub mod schema;

pub use error::{ExtractError, Result};
pub use extract::{Extractor, ExtractorConfig};
pub use recall::{Recall, RecallParams, NO_MEMORIES, UNAVAILABLE};
pub use schema::{DecisionEvent, DecisionSheet, Fact, FactSheet, MemoryDecision};
