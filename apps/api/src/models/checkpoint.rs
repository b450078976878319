use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

/// One row of `interview_checkpoints`. `state` holds a serialized `TurnState`.
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub session_id: String,
    pub state: Value,
    pub updated_at: DateTime<Utc>,
}
