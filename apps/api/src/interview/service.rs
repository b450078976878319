//! Inbound boundary of the interview core.
//!
//! Resolves session context and the per-call model credential, then hands
//! off to the engine. Side effects outside the checkpoint (marking the
//! session completed, evicting cached context) are best effort and only
//! logged on failure.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::interview::context::{ContextProvider, SessionConfig};
use crate::interview::engine::{InterviewEngine, Transcript, TurnOutcome};
use crate::interview::feedback::{FeedbackGenerator, GrammarFeedback, ScoreFeedback, ScoreInput};

/// What `teardown` managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub checkpoint_deleted: bool,
    pub context_evicted: bool,
}

/// A scored answer. Topic fields are optional and default to the session's active topic.
#[derive(Debug, Clone, Default)]
pub struct ScoreQuery {
    pub question: String,
    pub answer: String,
    pub task_topic: String,
    pub task_instruction: String,
}

pub struct InterviewService {
    engine: InterviewEngine,
    context: Arc<dyn ContextProvider>,
    feedback: FeedbackGenerator,
}

impl InterviewService {
    pub fn new(
        engine: InterviewEngine,
        context: Arc<dyn ContextProvider>,
        feedback: FeedbackGenerator,
    ) -> Self {
        Self {
            engine,
            context,
            feedback,
        }
    }

    pub fn engine(&self) -> &InterviewEngine {
        &self.engine
    }

    async fn session_config(&self, session_id: &str, api_key: &str) -> Result<SessionConfig, AppError> {
        let context = self.context.session_context(session_id).await?;
        Ok(SessionConfig {
            context,
            api_key: api_key.to_string(),
        })
    }

    pub async fn advance(
        &self,
        session_id: &str,
        message: &str,
        api_key: &str,
    ) -> Result<TurnOutcome, AppError> {
        let config = self.session_config(session_id, api_key).await?;
        let outcome = self.engine.advance(session_id, message, &config).await?;

        if outcome.finished {
            if let Err(e) = self.context.mark_completed(session_id).await {
                warn!("Session {session_id}: failed to mark completed: {e}");
            }
        }
        Ok(outcome)
    }

    pub async fn history(&self, session_id: &str) -> Result<Transcript, AppError> {
        self.engine.history(session_id).await
    }

    /// Removes every trace of the session from this core. Idempotent, never fails.
    pub async fn teardown(&self, session_id: &str) -> TeardownReport {
        let checkpoint_deleted = self.engine.teardown(session_id).await;
        let context_evicted = match self.context.evict(session_id).await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!("Session {session_id}: context eviction failed: {e}");
                false
            }
        };
        info!(
            "Session {session_id} torn down (checkpoint_deleted={checkpoint_deleted}, context_evicted={context_evicted})"
        );
        TeardownReport {
            checkpoint_deleted,
            context_evicted,
        }
    }

    pub async fn grammar(&self, text: &str, api_key: &str) -> Result<GrammarFeedback, AppError> {
        self.feedback.grammar(text, api_key).await
    }

    pub async fn score(
        &self,
        session_id: &str,
        query: &ScoreQuery,
        api_key: &str,
    ) -> Result<ScoreFeedback, AppError> {
        let context = self.context.session_context(session_id).await?;

        let (topic, instruction) = if query.task_topic.trim().is_empty() {
            match self.engine.snapshot(session_id).await? {
                Some(state) => (state.current_task_topic, state.current_task_instruction),
                None => (String::new(), String::new()),
            }
        } else {
            (query.task_topic.clone(), query.task_instruction.clone())
        };

        self.feedback
            .score(
                ScoreInput {
                    context: &context,
                    topic: &topic,
                    instruction: &instruction,
                    question: &query.question,
                    answer: &query.answer,
                },
                api_key,
            )
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by service and router tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::interview::checkpoint::MemoryCheckpointStore;
    use crate::interview::context::SessionContext;
    use crate::interview::engine::EngineSettings;
    use crate::interview::judgment::LlmJudgment;
    use crate::llm_client::{CompletionRequest, LanguageModel, LlmError};

    /// Fixed context; records completion marks and evictions.
    #[derive(Default)]
    pub struct FakeDirectory {
        pub missing: bool,
        pub completed: Mutex<Vec<String>>,
        pub evicted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContextProvider for FakeDirectory {
        async fn session_context(&self, session_id: &str) -> Result<SessionContext, AppError> {
            if self.missing {
                return Err(AppError::NotFound(format!("Session {session_id} not found")));
            }
            Ok(SessionContext {
                name: "Ada".into(),
                company_name: "Globex".into(),
                ..Default::default()
            })
        }

        async fn evict(&self, session_id: &str) -> Result<bool, AppError> {
            self.evicted.lock().unwrap().push(session_id.to_string());
            Ok(true)
        }

        async fn mark_completed(&self, session_id: &str) -> Result<(), AppError> {
            self.completed.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    /// Model that replays raw completions in order and records the keys it was given.
    #[derive(Default)]
    pub struct ReplayModel {
        pub outputs: Mutex<VecDeque<String>>,
        pub keys: Mutex<Vec<String>>,
    }

    impl ReplayModel {
        pub fn with(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
                keys: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ReplayModel {
        async fn complete(
            &self,
            _request: &CompletionRequest,
            api_key: &str,
        ) -> Result<String, LlmError> {
            self.keys.lock().unwrap().push(api_key.to_string());
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyContent)
        }
    }

    pub fn service(model: Arc<ReplayModel>, directory: Arc<FakeDirectory>) -> InterviewService {
        let engine = InterviewEngine::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(LlmJudgment::new(model.clone())),
            EngineSettings {
                max_round: 20,
                enforce_round_limit: false,
            },
        );
        InterviewService::new(engine, directory, FeedbackGenerator::new(model))
    }
}
