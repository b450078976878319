//! Checkpoint Store: durable TurnState snapshots keyed by session id.
//!
//! `PgCheckpointStore` is the production backend: any process can load what
//! any other process saved. `MemoryCheckpointStore` is the explicit degraded
//! mode used when Postgres is not configured or unreachable at startup; it
//! only ever sees its own process's sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::create_pool;
use crate::errors::AppError;
use crate::interview::turn_state::TurnState;
use crate::models::checkpoint::CheckpointRow;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS interview_checkpoints (
    session_id TEXT PRIMARY KEY,
    state JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Whether saved state survives this process.
    fn is_durable(&self) -> bool;

    /// Prepares the backend (creates tables). Called once at startup.
    async fn init(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, AppError>;

    /// Replaces the session's snapshot.
    async fn save(&self, session_id: &str, state: &TurnState) -> Result<(), AppError>;

    /// Removes the session's snapshot. Deleting a missing session is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), AppError>;

    /// Releases backend resources. Called once after the server stops.
    async fn shutdown(&self) {}
}

/// Rejects snapshots whose topic mirror disagrees with the queue.
fn ensure_consistent(session_id: &str, state: &TurnState) -> Result<(), AppError> {
    if state.is_consistent() {
        Ok(())
    } else {
        Err(AppError::Internal(anyhow::anyhow!(
            "Inconsistent turn state for session {session_id}: topic '{}' vs queue head {:?}",
            state.current_task_topic,
            state.task_queue.front().map(|t| &t.topic)
        )))
    }
}

/// Opens the durable store, or falls back to memory with a warning.
pub async fn open_store(database_url: Option<&str>) -> Arc<dyn CheckpointStore> {
    let Some(url) = database_url else {
        warn!("DATABASE_URL not set: interview state is in-memory and will not survive restarts or span instances");
        return Arc::new(MemoryCheckpointStore::new());
    };

    let store = match create_pool(url).await {
        Ok(pool) => PgCheckpointStore::new(pool, url),
        Err(e) => {
            warn!("Failed to connect checkpoint database ({e}): falling back to in-memory interview state");
            return Arc::new(MemoryCheckpointStore::new());
        }
    };

    match store.init().await {
        Ok(()) => Arc::new(store),
        Err(e) => {
            warn!("Failed to prepare checkpoint table ({e}): falling back to in-memory interview state");
            store.shutdown().await;
            Arc::new(MemoryCheckpointStore::new())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

pub struct PgCheckpointStore {
    pool: PgPool,
    /// Kept so deletes can use a connection outside the pool.
    database_url: String,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool, database_url: impl Into<String>) -> Self {
        Self {
            pool,
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn is_durable(&self) -> bool {
        true
    }

    async fn init(&self) -> Result<(), AppError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        info!("Checkpoint table ready");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, AppError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT session_id, state, updated_at FROM interview_checkpoints WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        debug!(
            "Loaded checkpoint for session {} (saved {})",
            row.session_id, row.updated_at
        );
        let state: TurnState = serde_json::from_value(row.state).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Corrupt checkpoint for session {session_id}: {e}"
            ))
        })?;
        ensure_consistent(session_id, &state)?;
        Ok(Some(state))
    }

    async fn save(&self, session_id: &str, state: &TurnState) -> Result<(), AppError> {
        ensure_consistent(session_id, state)?;
        let value = serde_json::to_value(state)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize turn state: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO interview_checkpoints (session_id, state)
            VALUES ($1, $2)
            ON CONFLICT (session_id)
            DO UPDATE SET state = EXCLUDED.state, updated_at = now()
            "#,
        )
        .bind(session_id)
        .bind(&value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), AppError> {
        // A dedicated connection so teardown never queues behind turn traffic.
        let mut conn = PgConnection::connect(&self.database_url).await?;
        let result = sqlx::query("DELETE FROM interview_checkpoints WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut conn)
            .await?;
        info!(
            "Deleted {} checkpoint row(s) for session {session_id}",
            result.rows_affected()
        );
        conn.close().await?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.close().await;
        info!("Checkpoint pool closed");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (degraded mode and tests)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, TurnState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn is_durable(&self) -> bool {
        false
    }

    async fn load(&self, session_id: &str) -> Result<Option<TurnState>, AppError> {
        Ok(self.states.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &TurnState) -> Result<(), AppError> {
        ensure_consistent(session_id, state)?;
        self.states
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), AppError> {
        self.states.write().await.remove(session_id);
        Ok(())
    }
}
