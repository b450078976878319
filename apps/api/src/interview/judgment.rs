//! LLM Judgment Adapter: every model decision the interview engine needs.
//!
//! Each operation is three separate steps:
//! 1. build: turn typed inputs into a `CompletionRequest` (pure)
//! 2. invoke: one call through the `LanguageModel` seam
//! 3. validate: parse and check the output against its schema (pure)
//!
//! Failures are surfaced, never defaulted: transport problems become
//! `AppError::Llm`, unusable output becomes `AppError::LlmValidation`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::AppError;
use crate::interview::context::SessionConfig;
use crate::interview::pacing::PacingDirective;
use crate::interview::prompts::{
    type_focus, PLAN_PROMPT_TEMPLATE, PLAN_SYSTEM, PROGRESS_PROMPT_TEMPLATE, PROGRESS_SYSTEM,
    RESPOND_PROMPT_TEMPLATE, RESPOND_SYSTEM_TEMPLATE,
};
use crate::interview::turn_state::{
    without_leading_trigger, InterviewTask, Message, Role, TopicDecision, END_TOPIC,
};
use crate::llm_client::prompts::{fill_template, JSON_ONLY_SYSTEM, STAY_IN_ROLE_INSTRUCTION};
use crate::llm_client::{
    parse_json_output, ChatMessage, CompletionRequest, LanguageModel, LlmError,
    CONVERSATION_MODEL, PLANNING_MODEL,
};

// ────────────────────────────────────────────────────────────────────────────
// Inputs and outputs
// ────────────────────────────────────────────────────────────────────────────

/// Inputs for topic planning: the full candidate/job context.
pub struct PlanRequest<'a> {
    pub config: &'a SessionConfig,
}

/// Inputs for judging the active topic after a candidate answer.
pub struct ProgressRequest<'a> {
    pub config: &'a SessionConfig,
    pub topic: &'a str,
    pub instruction: &'a str,
    pub topic_count: u32,
    pub completed_topics: &'a [String],
    pub last_question: &'a str,
    pub last_user_reply: &'a str,
    pub pacing: PacingDirective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// First interviewer utterance of the session.
    Start,
    Ongoing,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Start => "START",
            ResponseType::Ongoing => "Ongoing",
        }
    }
}

/// Inputs for the interviewer's next utterance.
pub struct UtteranceRequest<'a> {
    pub config: &'a SessionConfig,
    /// Conversation so far, excluding the message being answered.
    pub history: &'a [Message],
    pub user_reply: &'a str,
    pub topic: &'a str,
    pub instruction: &'a str,
    pub response_type: ResponseType,
}

/// Structured verdict on the active topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicJudgment {
    #[serde(alias = "rationale", default)]
    pub reasoning: String,
    pub decision: TopicDecision,
    #[serde(alias = "follow_up", default)]
    pub response_instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterviewPlan {
    task_queue: Vec<InterviewTask>,
}

// ────────────────────────────────────────────────────────────────────────────
// Adapter trait
// ────────────────────────────────────────────────────────────────────────────

/// The three model decisions the progression engine depends on.
#[async_trait]
pub trait JudgmentAdapter: Send + Sync {
    async fn plan_topics(&self, request: PlanRequest<'_>) -> Result<Vec<InterviewTask>, AppError>;

    async fn judge_topic_progress(
        &self,
        request: ProgressRequest<'_>,
    ) -> Result<TopicJudgment, AppError>;

    async fn generate_utterance(&self, request: UtteranceRequest<'_>) -> Result<String, AppError>;
}

/// `JudgmentAdapter` backed by a chat-completions model.
#[derive(Clone)]
pub struct LlmJudgment {
    model: Arc<dyn LanguageModel>,
}

impl LlmJudgment {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    async fn invoke(
        &self,
        step: &str,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<String, AppError> {
        self.model
            .complete(request, api_key)
            .await
            .map_err(|e| map_llm_error(step, e))
    }
}

#[async_trait]
impl JudgmentAdapter for LlmJudgment {
    async fn plan_topics(&self, request: PlanRequest<'_>) -> Result<Vec<InterviewTask>, AppError> {
        let completion = build_plan_request(&request);
        let raw = self
            .invoke("planning", &completion, &request.config.api_key)
            .await?;
        let tasks = validate_plan(&raw)?;
        info!(
            "Planned {} topics: {:?}",
            tasks.len(),
            tasks.iter().map(|t| t.topic.as_str()).collect::<Vec<_>>()
        );
        Ok(tasks)
    }

    async fn judge_topic_progress(
        &self,
        request: ProgressRequest<'_>,
    ) -> Result<TopicJudgment, AppError> {
        let completion = build_progress_request(&request);
        let raw = self
            .invoke("progress judgment", &completion, &request.config.api_key)
            .await?;
        let judgment = validate_judgment(&raw)?;
        debug!(
            "Topic '{}' judged {:?}: {}",
            request.topic, judgment.decision, judgment.reasoning
        );
        Ok(judgment)
    }

    async fn generate_utterance(&self, request: UtteranceRequest<'_>) -> Result<String, AppError> {
        let completion = build_utterance_request(&request);
        let raw = self
            .invoke("utterance", &completion, &request.config.api_key)
            .await?;
        validate_utterance(&raw)
    }
}

pub(crate) fn map_llm_error(step: &str, error: LlmError) -> AppError {
    if error.is_output_error() {
        AppError::LlmValidation(format!("{step}: {error}"))
    } else {
        AppError::Llm(format!("{step} call failed: {error}"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Build
// ────────────────────────────────────────────────────────────────────────────

fn json_system(system: &str) -> String {
    format!("{system}\n\n{JSON_ONLY_SYSTEM}")
}

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "None"
    } else {
        value
    }
}

pub fn build_plan_request(request: &PlanRequest<'_>) -> CompletionRequest {
    let ctx = &request.config.context;
    let skills = serde_json::to_string(&ctx.skills).unwrap_or_default();
    let selected = if ctx.selected_topics.is_empty() {
        "None".to_string()
    } else {
        ctx.selected_topics.join("; ")
    };

    let prompt = fill_template(
        PLAN_PROMPT_TEMPLATE,
        &[
            ("interview_type", ctx.interview_type.as_str()),
            ("type_focus", type_focus(ctx.interview_type)),
            ("name", ctx.name.as_str()),
            ("location", or_none(&ctx.location)),
            ("professional_summary", or_none(&ctx.professional_summary)),
            ("work_experience", ctx.work_experience.to_string().as_str()),
            ("projects", ctx.projects.to_string().as_str()),
            ("education", ctx.education.to_string().as_str()),
            ("skills", skills.as_str()),
            ("interview_hooks", ctx.interview_hooks.to_string().as_str()),
            ("company_name", ctx.company_or_default()),
            ("job_title", or_none(&ctx.job_title)),
            ("job_description", or_none(&ctx.job_description)),
            ("industry", or_none(&ctx.industry)),
            ("job_grade", or_none(&ctx.job_grade)),
            ("technical_level", or_none(&ctx.technical_level)),
            ("additional_notes", or_none(&ctx.additional_notes)),
            ("selected_topics", selected.as_str()),
        ],
    );

    CompletionRequest {
        model: PLANNING_MODEL,
        temperature: 0.0,
        system: json_system(PLAN_SYSTEM),
        messages: vec![ChatMessage::user(prompt)],
        json_output: true,
    }
}

pub fn build_progress_request(request: &ProgressRequest<'_>) -> CompletionRequest {
    let ctx = &request.config.context;
    let completed = if request.completed_topics.is_empty() {
        "None".to_string()
    } else {
        request.completed_topics.join(", ")
    };
    let topic_count = request.topic_count.to_string();

    let prompt = fill_template(
        PROGRESS_PROMPT_TEMPLATE,
        &[
            ("interview_type", ctx.interview_type.as_str()),
            ("company_name", ctx.company_or_default()),
            ("job_title", or_none(&ctx.job_title)),
            ("job_description", or_none(&ctx.job_description)),
            ("name", ctx.name.as_str()),
            ("professional_summary", or_none(&ctx.professional_summary)),
            ("work_experience", ctx.work_experience_summary().as_str()),
            ("education", ctx.education_summary().as_str()),
            ("additional_notes", or_none(&ctx.additional_notes)),
            ("current_task_topic", request.topic),
            ("current_topic_instruction", request.instruction),
            ("curr_topic_count", topic_count.as_str()),
            ("completed_topics", completed.as_str()),
            ("pacing", request.pacing.instruction()),
            ("last_question", or_none(request.last_question)),
            ("last_user_reply", request.last_user_reply),
        ],
    );

    CompletionRequest {
        model: CONVERSATION_MODEL,
        temperature: 0.5,
        system: json_system(PROGRESS_SYSTEM),
        messages: vec![ChatMessage::user(prompt)],
        json_output: true,
    }
}

pub fn build_utterance_request(request: &UtteranceRequest<'_>) -> CompletionRequest {
    let ctx = &request.config.context;
    let system = fill_template(
        RESPOND_SYSTEM_TEMPLATE,
        &[
            ("interviewer_name", ctx.interviewer_name.as_str()),
            ("name", ctx.name.as_str()),
            ("company_name", ctx.company_or_default()),
            ("professional_summary", or_none(&ctx.professional_summary)),
            ("stay_in_role", STAY_IN_ROLE_INSTRUCTION),
        ],
    );

    let mut messages: Vec<ChatMessage> = without_leading_trigger(request.history)
        .map(|m| match m.role {
            Role::User => ChatMessage::user(m.text.clone()),
            Role::Interviewer => ChatMessage::assistant(m.text.clone()),
        })
        .collect();

    messages.push(ChatMessage::user(fill_template(
        RESPOND_PROMPT_TEMPLATE,
        &[
            ("response_type", request.response_type.as_str()),
            ("topic", request.topic),
            ("instruction", request.instruction),
            ("user_reply", request.user_reply),
        ],
    )));

    CompletionRequest {
        model: CONVERSATION_MODEL,
        temperature: 0.5,
        system,
        messages,
        json_output: false,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validate
// ────────────────────────────────────────────────────────────────────────────

/// Parses a plan. An empty plan is valid; malformed tasks are not.
pub fn validate_plan(raw: &str) -> Result<Vec<InterviewTask>, AppError> {
    let plan: InterviewPlan =
        parse_json_output(raw).map_err(|e| map_llm_error("planning", e))?;

    plan.task_queue
        .into_iter()
        .enumerate()
        .map(|(i, task)| {
            let topic = task.topic.trim().to_string();
            let instruction = task.instruction.trim().to_string();
            if topic.is_empty() {
                return Err(AppError::LlmValidation(format!(
                    "planning: task {i} has an empty topic"
                )));
            }
            if topic.eq_ignore_ascii_case(END_TOPIC) {
                return Err(AppError::LlmValidation(format!(
                    "planning: task {i} uses the reserved topic '{END_TOPIC}'"
                )));
            }
            Ok(InterviewTask { topic, instruction })
        })
        .collect()
}

pub fn validate_judgment(raw: &str) -> Result<TopicJudgment, AppError> {
    let mut judgment: TopicJudgment =
        parse_json_output(raw).map_err(|e| map_llm_error("progress judgment", e))?;
    judgment.response_instruction = judgment
        .response_instruction
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(judgment)
}

pub fn validate_utterance(raw: &str) -> Result<String, AppError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::LlmValidation(
            "utterance: model returned an empty reply".to_string(),
        ));
    }
    Ok(text.to_string())
}
