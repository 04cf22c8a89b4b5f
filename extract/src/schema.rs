//! Structured-output schemas for the two pipeline completions.
//!
//! Both calls go through [`CompletionModel::complete`], so the LLM either
//! returns a value conforming to these shapes or the stage fails.
//!
//! [`CompletionModel::complete`]: mnemo_core::CompletionModel::complete

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One normalized declarative statement extracted from a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Fact {
    /// The statement, in first person or about the user.
    pub text: String,
    /// Free-form category tag, e.g. `personal` or `preference`.
    pub category: String,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Payload of the fact-retrieval completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FactSheet {
    /// Extracted facts; empty when the conversation held nothing memorable.
    pub facts: Vec<Fact>,
}

/// Verdict for one new fact in the unified id namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionEvent {
    /// The fact is a brand-new memory.
    Add,
    /// The fact refines an existing memory.
    Update,
}

/// One decision emitted by the memory-update completion.
///
/// For `ADD`, `id` is the unified id of the source fact; for `UPDATE`, it is
/// the unified id of the existing memory being refined. `text` may restate
/// the fact or merge it with the targeted memory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MemoryDecision {
    /// Unified-namespace id the decision refers to.
    pub id: String,
    /// Whether to add a new memory or update an existing one.
    pub event: DecisionEvent,
    /// Final memory text.
    pub text: String,
}

/// Payload of the memory-update completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DecisionSheet {
    /// Decisions, applied in emission order.
    pub memory: Vec<MemoryDecision>,
}
