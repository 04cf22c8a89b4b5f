//! Unified-id resolution context and the decision plan.
//!
//! During resolution, existing memory candidates and freshly extracted facts
//! share one string-id namespace (`"1"`, `"2"`, …) so the decision model can
//! reference either uniformly. [`ResolutionContext`] owns that namespace;
//! [`DecisionPlan`] accumulates the resolved decisions plus a
//! text-to-embedding map sized to exactly the texts the plan references.

use std::collections::{HashMap, HashSet};

use mnemo_core::{Embedding, Memory, MemoryAction, MemoryWrite, NewMemory, ScoredMemory};

/// Origin of a unified id: an existing memory candidate or a new fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Position into [`ResolutionContext::memories`].
    Memory(usize),
    /// Index into the run's fact list.
    Fact(usize),
}

/// The single namespace a decision run uses to reference memories and facts.
pub(crate) struct ResolutionContext {
    memories: Vec<Memory>,
    origins: HashMap<String, Origin>,
    memory_lines: Vec<(String, String)>,
    fact_lines: Vec<(String, String)>,
}

impl ResolutionContext {
    /// Builds the namespace from the bulk-search hits and the fact texts.
    ///
    /// Hits are flattened in query order and deduplicated by memory id,
    /// first occurrence winning; unique memories take ids `"1"…"n"`, facts
    /// continue from `"n+1"`.
    pub(crate) fn build(hits: Vec<Vec<ScoredMemory>>, fact_texts: &[String]) -> Self {
        let mut memories: Vec<Memory> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        for hit in hits.into_iter().flatten() {
            if seen.insert(hit.memory.id) {
                memories.push(hit.memory);
            }
        }

        let mut origins = HashMap::new();
        let mut memory_lines = Vec::with_capacity(memories.len());
        for (pos, memory) in memories.iter().enumerate() {
            let id = (pos + 1).to_string();
            origins.insert(id.clone(), Origin::Memory(pos));
            memory_lines.push((id, memory.content.clone()));
        }

        let offset = memories.len() + 1;
        let mut fact_lines = Vec::with_capacity(fact_texts.len());
        for (idx, text) in fact_texts.iter().enumerate() {
            let id = (offset + idx).to_string();
            origins.insert(id.clone(), Origin::Fact(idx));
            fact_lines.push((id, text.clone()));
        }

        Self {
            memories,
            origins,
            memory_lines,
            fact_lines,
        }
    }

    pub(crate) fn origin(&self, id: &str) -> Option<Origin> {
        self.origins.get(id).copied()
    }

    pub(crate) fn memory(&self, pos: usize) -> &Memory {
        &self.memories[pos]
    }

    pub(crate) fn memory_lines(&self) -> &[(String, String)] {
        &self.memory_lines
    }

    pub(crate) fn fact_lines(&self) -> &[(String, String)] {
        &self.fact_lines
    }
}

/// An insert planned from an ADD decision, carrying the source fact's
/// metadata.
#[derive(Debug, Clone)]
pub(crate) struct PlannedAdd {
    pub text: String,
    pub category: String,
    pub importance: f32,
    pub confidence: f32,
}

/// A rewrite planned from an UPDATE decision.
#[derive(Debug, Clone)]
pub(crate) struct PlannedUpdate {
    pub target: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
enum Planned {
    Add(PlannedAdd),
    Update(PlannedUpdate),
}

/// Resolved decisions plus the embeddings their texts reference.
///
/// Texts whose embedding is already known (unchanged fact texts) are seeded;
/// the rest queue for one batch-embedding call, after which
/// [`into_writes`](Self::into_writes) materializes the store writes in
/// decision order.
#[derive(Default)]
pub(crate) struct DecisionPlan {
    planned: Vec<Planned>,
    embeddings: HashMap<String, Embedding>,
    pending: Vec<String>,
}

impl DecisionPlan {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a known text embedding for reuse.
    pub(crate) fn seed(&mut self, text: &str, embedding: Embedding) {
        self.embeddings.insert(text.to_owned(), embedding);
    }

    /// Ensures `text` will have an embedding, queueing it if unknown.
    /// Identical rewrites share a single queued entry.
    fn require(&mut self, text: &str) {
        if !self.embeddings.contains_key(text) && !self.pending.iter().any(|t| t == text) {
            self.pending.push(text.to_owned());
        }
    }

    pub(crate) fn push_add(&mut self, add: PlannedAdd) {
        self.require(&add.text);
        self.planned.push(Planned::Add(add));
    }

    pub(crate) fn push_update(&mut self, update: PlannedUpdate) {
        self.require(&update.text);
        self.planned.push(Planned::Update(update));
    }

    /// Texts still needing an embedding, in queue order.
    pub(crate) fn pending_texts(&self) -> &[String] {
        &self.pending
    }

    /// Attaches the batch-embedding results for the queued texts.
    pub(crate) fn attach(&mut self, vectors: Vec<Embedding>) -> anyhow::Result<()> {
        anyhow::ensure!(
            vectors.len() == self.pending.len(),
            "expected {} embeddings, got {}",
            self.pending.len(),
            vectors.len()
        );
        for (text, vector) in self.pending.drain(..).zip(vectors) {
            self.embeddings.insert(text, vector);
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    /// Materializes the store writes in decision order.
    pub(crate) fn into_writes(self, user_id: &str) -> anyhow::Result<Vec<MemoryWrite>> {
        let embeddings = self.embeddings;
        self.planned
            .into_iter()
            .map(|planned| {
                let text = match &planned {
                    Planned::Add(add) => &add.text,
                    Planned::Update(update) => &update.text,
                };
                let embedding = embeddings
                    .get(text)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no embedding for decided text: {text}"))?;

                Ok(match planned {
                    Planned::Add(add) => MemoryWrite::Add(NewMemory {
                        user_id: user_id.to_owned(),
                        content: add.text,
                        embedding,
                        category: add.category,
                        importance: add.importance,
                        confidence: add.confidence,
                        action: MemoryAction::Add,
                    }),
                    Planned::Update(update) => MemoryWrite::Update {
                        id: update.target,
                        content: update.text,
                        embedding,
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::MemoryAction;
    use time::OffsetDateTime;

    fn memory(id: i64, content: &str) -> Memory {
        let now = OffsetDateTime::now_utc();
        Memory {
            id,
            user_id: "u1".to_owned(),
            content: content.to_owned(),
            prev_content: None,
            category: "personal".to_owned(),
            importance: 0.5,
            confidence: 0.5,
            action: MemoryAction::Add,
            embedding: vec![1.0, 0.0],
            created_at: now,
            updated_at: now,
        }
    }

    fn scored(id: i64, content: &str) -> ScoredMemory {
        ScoredMemory {
            memory: memory(id, content),
            similarity: 0.9,
        }
    }

    #[test]
    fn unified_ids_dedup_first_occurrence() {
        let hits = vec![
            vec![scored(10, "a"), scored(20, "b")],
            vec![scored(20, "b"), scored(30, "c")],
        ];
        let facts = vec!["new fact".to_owned()];

        let context = ResolutionContext::build(hits, &facts);

        assert_eq!(
            context.memory_lines(),
            &[
                ("1".to_owned(), "a".to_owned()),
                ("2".to_owned(), "b".to_owned()),
                ("3".to_owned(), "c".to_owned()),
            ]
        );
        assert_eq!(
            context.fact_lines(),
            &[("4".to_owned(), "new fact".to_owned())]
        );
        assert_eq!(context.origin("2"), Some(Origin::Memory(1)));
        assert_eq!(context.origin("4"), Some(Origin::Fact(0)));
        assert_eq!(context.origin("5"), None);
        assert_eq!(context.memory(1).id, 20);
    }

    #[test]
    fn fact_ids_start_after_memories() {
        let context = ResolutionContext::build(Vec::new(), &["only fact".to_owned()]);
        assert!(context.memory_lines().is_empty());
        assert_eq!(context.fact_lines()[0].0, "1");
    }

    #[test]
    fn plan_reuses_seeded_embeddings() {
        let mut plan = DecisionPlan::new();
        plan.seed("unchanged", vec![0.1, 0.2]);
        plan.push_add(PlannedAdd {
            text: "unchanged".to_owned(),
            category: "personal".to_owned(),
            importance: 0.5,
            confidence: 0.5,
        });
        plan.push_update(PlannedUpdate {
            target: 7,
            text: "rewritten".to_owned(),
        });
        plan.push_add(PlannedAdd {
            text: "rewritten".to_owned(),
            category: "personal".to_owned(),
            importance: 0.5,
            confidence: 0.5,
        });

        // Only the rewritten text needs embedding, and only once.
        assert_eq!(plan.pending_texts(), &["rewritten".to_owned()]);

        plan.attach(vec![vec![0.9, 0.9]]).unwrap();
        let writes = plan.into_writes("u1").unwrap();
        assert_eq!(writes.len(), 3);
        match &writes[1] {
            MemoryWrite::Update { id, embedding, .. } => {
                assert_eq!(*id, 7);
                assert_eq!(embedding, &vec![0.9, 0.9]);
            }
            MemoryWrite::Add(_) => panic!("expected update in decision order"),
        }
    }

    #[test]
    fn attach_rejects_length_mismatch() {
        let mut plan = DecisionPlan::new();
        plan.push_add(PlannedAdd {
            text: "needs embedding".to_owned(),
            category: String::new(),
            importance: 0.0,
            confidence: 0.0,
        });
        assert!(plan.attach(Vec::new()).is_err());
    }
}
