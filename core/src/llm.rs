//! Language-model trait seams.
//!
//! The engine needs exactly two operations from a language-model provider:
//! a structured-output completion that conforms to a JSON schema, and text
//! embedding with a fixed dimension. Both are expressed as traits returning
//! `impl Future` so implementations stay runtime-agnostic and allocation is
//! left to the provider.
//!
//! Implementations may batch or cache internally and may retry best-effort,
//! as long as the per-call contract holds: a completion either parses into
//! the requested schema or fails (no partial output), and batch embedding
//! preserves input order.

use core::future::Future;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// A dense vector representation of a text.
pub type Embedding = Vec<f32>;

/// Structured-output completion against a response schema.
pub trait CompletionModel: Send + Sync {
    /// Runs a completion whose output must conform to `T`'s JSON schema.
    ///
    /// # Errors
    /// Fails on transport errors and on output that does not deserialize
    /// into `T`. There is no partial parsing: a malformed response is an
    /// error, never a truncated value.
    fn complete<T>(&self, prompt: &str) -> impl Future<Output = crate::Result<T>> + Send
    where
        T: JsonSchema + DeserializeOwned + 'static;
}

/// Converts text to fixed-dimension vectors.
pub trait EmbeddingModel: Send + Sync {
    /// Dimension of every vector returned by this model.
    ///
    /// Must match the dimension the memory store was configured with.
    fn dim(&self) -> usize;

    /// Embeds a single text.
    ///
    /// # Errors
    /// Surfaces provider transport failures.
    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send;

    /// Embeds a batch of texts, preserving input order.
    ///
    /// The default implementation loops over [`embed`](Self::embed);
    /// providers with a native batch endpoint should override it.
    ///
    /// # Errors
    /// Surfaces provider transport failures.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = crate::Result<Vec<Embedding>>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }
}

macro_rules! impl_model_wrappers {
    ($($name:ident),*) => {
        $(
            impl<M: CompletionModel> CompletionModel for $name<M> {
                fn complete<T>(&self, prompt: &str) -> impl Future<Output = crate::Result<T>> + Send
                where
                    T: JsonSchema + DeserializeOwned + 'static,
                {
                    M::complete(self, prompt)
                }
            }

            impl<M: EmbeddingModel> EmbeddingModel for $name<M> {
                fn dim(&self) -> usize {
                    M::dim(self)
                }

                fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send {
                    M::embed(self, text)
                }

                fn embed_batch(
                    &self,
                    texts: &[String],
                ) -> impl Future<Output = crate::Result<Vec<Embedding>>> + Send {
                    M::embed_batch(self, texts)
                }
            }
        )*
    };
}

impl_model_wrappers!(Arc, Box);

impl<M: CompletionModel> CompletionModel for &M {
    fn complete<T>(&self, prompt: &str) -> impl Future<Output = crate::Result<T>> + Send
    where
        T: JsonSchema + DeserializeOwned + 'static,
    {
        M::complete(self, prompt)
    }
}

impl<M: EmbeddingModel> EmbeddingModel for &M {
    fn dim(&self) -> usize {
        M::dim(self)
    }

    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send {
        M::embed(self, text)
    }

    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = crate::Result<Vec<Embedding>>> + Send {
        M::embed_batch(self, texts)
    }
}
