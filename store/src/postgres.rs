//! pgvector-backed store.
//!
//! Maps the store traits onto Postgres with the `vector` extension: cosine
//! search goes through the `<=>` operator (similarity = `1 − distance`),
//! bulk fan-out runs the per-query searches concurrently on the pool, and
//! the extraction commit is one database transaction. The schema lives in
//! `migrations/0001_init.sql`.

use futures::future::try_join_all;
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;

use mnemo_core::{
    Committed, ContentKind, Embedding, ExtractionStore, Memory, MemoryAction, MemoryPatch,
    MemoryStore, MemoryWrite, Message, NewMemory, PendingMessage, ScoredMemory, SearchParams,
    Story, TurnStore,
};

use crate::error::{Result, StoreError};

const MEMORY_COLUMNS: &str = "id, user_id, content, previous_content, category, importance, \
     confidence, action, embedding, created_at, updated_at";

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn memory_from_row(row: &PgRow) -> Result<Memory> {
    let id: i32 = row.try_get("id").map_err(db_err)?;
    let action: Option<String> = row.try_get("action").map_err(db_err)?;
    let action = action
        .as_deref()
        .and_then(MemoryAction::parse)
        .ok_or_else(|| StoreError::Database(format!("invalid action on memory {id}")))?;
    let embedding: Vector = row.try_get("embedding").map_err(db_err)?;

    Ok(Memory {
        id: i64::from(id),
        user_id: row.try_get("user_id").map_err(db_err)?,
        content: row
            .try_get::<Option<String>, _>("content")
            .map_err(db_err)?
            .unwrap_or_default(),
        prev_content: row.try_get("previous_content").map_err(db_err)?,
        category: row
            .try_get::<Option<String>, _>("category")
            .map_err(db_err)?
            .unwrap_or_default(),
        importance: row
            .try_get::<Option<f32>, _>("importance")
            .map_err(db_err)?
            .unwrap_or_default(),
        confidence: row
            .try_get::<Option<f32>, _>("confidence")
            .map_err(db_err)?
            .unwrap_or_default(),
        action,
        embedding: embedding.to_vec(),
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let id: i32 = row.try_get("id").map_err(db_err)?;
    let story_id: i32 = row.try_get("story_id").map_err(db_err)?;
    let content_type: String = row.try_get("content_type").map_err(db_err)?;
    let kind = match content_type.as_str() {
        "query" => ContentKind::Query,
        "response" => ContentKind::Response,
        other => {
            return Err(StoreError::Database(format!(
                "invalid content_type on message {id}: {other}"
            )));
        }
    };

    Ok(Message {
        id: i64::from(id),
        story_id: i64::from(story_id),
        kind,
        content: row.try_get("content").map_err(db_err)?,
        extracted: row.try_get("extracted").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn story_from_row(row: &PgRow) -> Result<Story> {
    let id: i32 = row.try_get("id").map_err(db_err)?;
    Ok(Story {
        id: i64::from(id),
        user_id: row.try_get("user_id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        handler: row
            .try_get::<Option<String>, _>("handler")
            .map_err(db_err)?
            .unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn as_i32(id: i64) -> Result<i32> {
    i32::try_from(id).map_err(|_| StoreError::MemoryNotFound(id))
}

/// Store backed by Postgres with the pgvector extension.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    dimension: usize,
}

impl PgStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Connects to the database and wraps the pool.
    ///
    /// # Errors
    /// Fails when the connection cannot be established.
    pub async fn connect(url: &str, dimension: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(db_err)?;
        Ok(Self::new(pool, dimension))
    }

    /// Configured embedding dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn check_dim(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            })
        }
    }
}

impl MemoryStore for PgStore {
    async fn insert(&self, memory: NewMemory) -> mnemo_core::Result<Memory> {
        self.check_dim(&memory.embedding)?;

        let sql = format!(
            "INSERT INTO memory (user_id, content, category, importance, confidence, action, embedding) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {MEMORY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&memory.user_id)
            .bind(&memory.content)
            .bind(&memory.category)
            .bind(memory.importance)
            .bind(memory.confidence)
            .bind(memory.action.as_str())
            .bind(Vector::from(memory.embedding))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(memory_from_row(&row)?)
    }

    async fn update(&self, id: i64, patch: MemoryPatch) -> mnemo_core::Result<Memory> {
        self.check_dim(&patch.embedding)?;

        let sql = format!(
            "UPDATE memory SET content = $2, previous_content = $3, embedding = $4, \
             action = $5, updated_at = now() WHERE id = $1 RETURNING {MEMORY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(as_i32(id)?)
            .bind(&patch.content)
            .bind(&patch.prev_content)
            .bind(Vector::from(patch.embedding))
            .bind(patch.action.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::MemoryNotFound(id))?;

        Ok(memory_from_row(&row)?)
    }

    async fn search(
        &self,
        user_id: &str,
        embedding: &[f32],
        params: SearchParams,
    ) -> mnemo_core::Result<Vec<ScoredMemory>> {
        self.check_dim(embedding)?;

        let sql = format!(
            "SELECT {MEMORY_COLUMNS}, 1 - (embedding <=> $2) AS similarity FROM memory \
             WHERE user_id = $1 AND 1 - (embedding <=> $2) > $3 \
             ORDER BY embedding <=> $2 LIMIT $4"
        );
        let limit = i64::try_from(params.top_k).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(Vector::from(embedding.to_vec()))
            .bind(f64::from(params.min_similarity))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let similarity: f64 = row.try_get("similarity").map_err(db_err)?;
            #[allow(clippy::cast_possible_truncation)]
            results.push(ScoredMemory {
                memory: memory_from_row(row)?,
                similarity: similarity as f32,
            });
        }
        Ok(results)
    }

    async fn bulk_search(
        &self,
        user_id: &str,
        embeddings: &[Embedding],
        params: SearchParams,
    ) -> mnemo_core::Result<Vec<Vec<ScoredMemory>>> {
        // Concurrent fan-out on the pool; try_join_all preserves input order.
        try_join_all(
            embeddings
                .iter()
                .map(|embedding| self.search(user_id, embedding, params)),
        )
        .await
    }
}

impl TurnStore for PgStore {
    async fn create_story(
        &self,
        user_id: &str,
        name: Option<&str>,
        handler: &str,
    ) -> mnemo_core::Result<Story> {
        let row = sqlx::query(
            "INSERT INTO story (user_id, name, handler) VALUES ($1, $2, $3) \
             RETURNING id, user_id, name, handler, created_at, updated_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(handler)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(story_from_row(&row)?)
    }

    async fn append_message(
        &self,
        story_id: i64,
        kind: ContentKind,
        content: Value,
    ) -> mnemo_core::Result<Message> {
        let story_id = i32::try_from(story_id).map_err(|_| StoreError::StoryNotFound(story_id))?;
        let row = sqlx::query(
            "INSERT INTO message (story_id, content_type, content) VALUES ($1, $2, $3) \
             RETURNING id, story_id, content_type, content, extracted, created_at, updated_at",
        )
        .bind(story_id)
        .bind(kind.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(message_from_row(&row)?)
    }

    async fn load_pending(&self, user_id: &str) -> mnemo_core::Result<Vec<PendingMessage>> {
        let rows = sqlx::query(
            "SELECT m.id, m.story_id, m.content_type, m.content, m.extracted, \
                    m.created_at, m.updated_at, s.handler \
             FROM message m JOIN story s ON s.id = m.story_id \
             WHERE s.user_id = $1 AND m.extracted = FALSE \
             ORDER BY m.created_at ASC, m.id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            let handler: Option<String> = row.try_get("handler").map_err(db_err)?;
            pending.push(PendingMessage {
                message: message_from_row(row)?,
                handler: handler.unwrap_or_default(),
            });
        }
        Ok(pending)
    }
}

impl ExtractionStore for PgStore {
    async fn commit_extraction(
        &self,
        user_id: &str,
        writes: Vec<MemoryWrite>,
        message_ids: &[i64],
    ) -> mnemo_core::Result<Committed> {
        for write in &writes {
            match write {
                MemoryWrite::Add(new) => self.check_dim(&new.embedding)?,
                MemoryWrite::Update { embedding, .. } => self.check_dim(embedding)?,
            }
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut committed = Committed::default();

        for write in writes {
            match write {
                MemoryWrite::Add(new) => {
                    sqlx::query(
                        "INSERT INTO memory (user_id, content, category, importance, \
                         confidence, action, embedding) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    )
                    .bind(&new.user_id)
                    .bind(&new.content)
                    .bind(&new.category)
                    .bind(new.importance)
                    .bind(new.confidence)
                    .bind(new.action.as_str())
                    .bind(Vector::from(new.embedding))
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                    committed.added += 1;
                }
                MemoryWrite::Update {
                    id,
                    content,
                    embedding,
                } => {
                    let result = sqlx::query(
                        "UPDATE memory SET previous_content = content, content = $2, \
                         embedding = $3, action = 'UPDATE', updated_at = now() \
                         WHERE id = $1 AND user_id = $4",
                    )
                    .bind(as_i32(id)?)
                    .bind(&content)
                    .bind(Vector::from(embedding))
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                    if result.rows_affected() != 1 {
                        // Dropping the transaction rolls everything back.
                        return Err(StoreError::MemoryNotFound(id).into());
                    }
                    committed.updated += 1;
                }
            }
        }

        if !message_ids.is_empty() {
            let ids: Vec<i32> = message_ids
                .iter()
                .map(|&id| i32::try_from(id).map_err(|_| StoreError::MessageNotFound(id)))
                .collect::<Result<_>>()?;
            let result = sqlx::query(
                "UPDATE message SET extracted = TRUE, updated_at = now() WHERE id = ANY($1)",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            let marked = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
            if marked != message_ids.len() {
                return Err(StoreError::Database(format!(
                    "expected to mark {} messages, matched {marked}",
                    message_ids.len()
                ))
                .into());
            }
            committed.messages_marked = marked;
        }

        tx.commit().await.map_err(db_err)?;

        debug!(
            user_id,
            added = committed.added,
            updated = committed.updated,
            messages = committed.messages_marked,
            "extraction committed"
        );
        Ok(committed)
    }
}
