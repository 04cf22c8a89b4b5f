//! Shared mocks for the end-to-end scenarios.

// Not every scenario binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use mnemo::{ChatHandler, CompletionModel, Embedding, EmbeddingModel, HandlerRegistry};

/// Embedding dimension used across the scenarios.
pub const DIM: usize = 8;

/// Completion model that replays queued JSON payloads in order and records
/// every prompt. Exhausting the script makes further calls fail, so an
/// unexpected extra LLM round trip fails the test loudly.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Value>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl CompletionModel for ScriptedCompletion {
    async fn complete<T>(&self, prompt: &str) -> mnemo::Result<T>
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

/// Deterministic embedder: every text maps to a stable unit vector, with
/// optional per-text overrides for steering similarity in a scenario.
pub struct KeyedEmbedder {
    overrides: HashMap<String, Embedding>,
    calls: AtomicUsize,
}

impl KeyedEmbedder {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_override(mut self, text: &str, embedding: Embedding) -> Self {
        self.overrides.insert(text.to_owned(), embedding);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The deterministic vector for a text (without overrides).
    pub fn vector_for(text: &str) -> Embedding {
        let seed: u32 = text.bytes().map(u32::from).sum();
        #[allow(clippy::cast_precision_loss)]
        let angle = (seed % 628) as f32 / 100.0;
        let mut vector = vec![0.0; DIM];
        vector[0] = angle.cos();
        vector[1] = angle.sin();
        vector
    }
}

impl EmbeddingModel for KeyedEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> mnemo::Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .overrides
            .get(text)
            .cloned()
            .unwrap_or_else(|| Self::vector_for(text)))
    }
}

/// Unit vector in the scenario dimension, parameterized by an angle.
pub fn unit(angle: f32) -> Embedding {
    let mut vector = vec![0.0; DIM];
    vector[0] = angle.cos();
    vector[1] = angle.sin();
    vector
}

/// Registry with the reference chat handler.
pub fn chat_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(ChatHandler));
    Arc::new(registry)
}
