use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::interview::engine::{Transcript, TurnOutcome};
use crate::interview::feedback::{GrammarFeedback, ScoreFeedback};
use crate::interview::service::{ScoreQuery, TeardownReport};
use crate::interview::turn_state::{Role, START_TRIGGER};
use crate::state::AppState;

/// Header carrying the caller's model credential. Used for one request only.
pub const API_KEY_HEADER: &str = "x-openai-key";

fn api_key(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("Missing {API_KEY_HEADER} header")))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub finished: bool,
    pub total_round: u32,
    pub task_topic: String,
    pub task_instruction: String,
}

impl From<TurnOutcome> for ChatResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            response: outcome.reply,
            finished: outcome.finished,
            total_round: outcome.total_round,
            task_topic: outcome.current_topic,
            task_instruction: outcome.current_instruction,
        }
    }
}

#[derive(Serialize)]
pub struct HistoryMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
    pub total_round: u32,
}

impl From<Transcript> for HistoryResponse {
    fn from(transcript: Transcript) -> Self {
        Self {
            messages: transcript
                .messages
                .into_iter()
                .map(|m| HistoryMessage {
                    role: match m.role {
                        Role::User => "user",
                        Role::Interviewer => "interviewer",
                    },
                    content: m.text,
                })
                .collect(),
            total_round: transcript.total_round,
        }
    }
}

#[derive(Deserialize)]
pub struct GrammarRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct ScoreRequest {
    pub session_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub task_topic: String,
    #[serde(default)]
    pub task_instruction: String,
}

/// POST /api/chat/:session_id/start
pub async fn handle_start(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, AppError> {
    let key = api_key(&headers)?;
    let outcome = state.service.advance(&session_id, START_TRIGGER, &key).await?;
    Ok(Json(outcome.into()))
}

/// POST /api/chat/:session_id
pub async fn handle_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let key = api_key(&headers)?;
    let outcome = state.service.advance(&session_id, &req.message, &key).await?;
    Ok(Json(outcome.into()))
}

/// GET /api/chat/:session_id/history
pub async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let transcript = state.service.history(&session_id).await?;
    Ok(Json(transcript.into()))
}

/// DELETE /api/chat/:session_id
pub async fn handle_teardown(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<TeardownReport> {
    Json(state.service.teardown(&session_id).await)
}

/// POST /api/feedback/grammar
pub async fn handle_grammar(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrammarRequest>,
) -> Result<Json<GrammarFeedback>, AppError> {
    let key = api_key(&headers)?;
    Ok(Json(state.service.grammar(&req.text, &key).await?))
}

/// POST /api/feedback/score
pub async fn handle_score(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScoreRequest>,
) -> Result<Json<ScoreFeedback>, AppError> {
    let key = api_key(&headers)?;
    let query = ScoreQuery {
        question: req.question,
        answer: req.answer,
        task_topic: req.task_topic,
        task_instruction: req.task_instruction,
    };
    Ok(Json(state.service.score(&req.session_id, &query, &key).await?))
}
