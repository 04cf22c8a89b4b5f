//! Story handler contract and registry.
//!
//! Every story names a handler; the handler is the only code that knows the
//! shape of that story's message payloads. During extraction the engine asks
//! the handler to render each stored message into a single prompt line.
//! Rendering is a pure function of the message: a payload that fails the
//! handler's schema is an error, and the caller drops that line (the message
//! is still marked extracted later so it never stalls the queue).

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::types::{ContentKind, Message};

/// Renders a story's stored messages into prompt lines.
pub trait Handler: Send + Sync {
    /// Registry key; also the value persisted on story rows.
    fn name(&self) -> &str;

    /// Renders a stored message to one line of the form `User: …` or
    /// `Assistant: …`.
    ///
    /// # Errors
    /// Fails when the payload does not match this handler's content schema.
    fn message_to_string(&self, message: &Message) -> crate::Result<String>;
}

/// Write-once, read-many map from handler name to handler.
///
/// Populate with explicit [`register`](Self::register) calls during startup,
/// then share as `Arc<HandlerRegistry>`; lookups never mutate.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its own name, replacing any previous
    /// registration with that name.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name().to_owned(), handler);
    }

    /// Looks a handler up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// `true` if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Question {
    question: String,
}

#[derive(Debug, Deserialize)]
struct Answer {
    answer: String,
}

/// Reference handler for plain question/answer chat stories.
///
/// Query payloads are `{"question": "…"}`, response payloads
/// `{"answer": "…"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatHandler;

impl Handler for ChatHandler {
    fn name(&self) -> &str {
        "chat"
    }

    fn message_to_string(&self, message: &Message) -> crate::Result<String> {
        match message.kind {
            ContentKind::Query => {
                let Question { question } = serde_json::from_value(message.content.clone())?;
                Ok(format!("User: {question}"))
            }
            ContentKind::Response => {
                let Answer { answer } = serde_json::from_value(message.content.clone())?;
                Ok(format!("Assistant: {answer}"))
            }
        }
    }
}
