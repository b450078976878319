//! Answer feedback: grammar correction and a 1–10 score with a better version.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::interview::context::SessionContext;
use crate::interview::judgment::map_llm_error;
use crate::interview::prompts::{
    GRAMMAR_PROMPT_TEMPLATE, GRAMMAR_SYSTEM, SCORE_PROMPT_TEMPLATE, SCORE_SYSTEM,
};
use crate::llm_client::prompts::{fill_template, JSON_ONLY_SYSTEM};
use crate::llm_client::{
    parse_json_output, ChatMessage, CompletionRequest, LanguageModel, CONVERSATION_MODEL,
};

const DEFAULT_TOPIC: &str = "General Question";
const DEFAULT_INSTRUCTION: &str = "Evaluate the candidate's response";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarFeedback {
    pub corrected_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreFeedback {
    #[serde(default)]
    pub reasoning: String,
    pub score: u8,
    pub better_version: String,
}

/// Everything the score prompt needs about one answered question.
pub struct ScoreInput<'a> {
    pub context: &'a SessionContext,
    pub topic: &'a str,
    pub instruction: &'a str,
    pub question: &'a str,
    pub answer: &'a str,
}

#[derive(Clone)]
pub struct FeedbackGenerator {
    model: Arc<dyn LanguageModel>,
}

impl FeedbackGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn grammar(&self, text: &str, api_key: &str) -> Result<GrammarFeedback, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("Text must not be empty".to_string()));
        }
        let request = build_grammar_request(text);
        let raw = self
            .model
            .complete(&request, api_key)
            .await
            .map_err(|e| map_llm_error("grammar", e))?;
        validate_grammar(&raw)
    }

    pub async fn score(
        &self,
        input: ScoreInput<'_>,
        api_key: &str,
    ) -> Result<ScoreFeedback, AppError> {
        if input.answer.trim().is_empty() {
            return Err(AppError::Validation("Answer must not be empty".to_string()));
        }
        let request = build_score_request(&input);
        let raw = self
            .model
            .complete(&request, api_key)
            .await
            .map_err(|e| map_llm_error("score", e))?;
        let feedback = validate_score(&raw)?;
        debug!("Scored answer on '{}': {}/10", input.topic, feedback.score);
        Ok(feedback)
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

pub fn build_grammar_request(text: &str) -> CompletionRequest {
    CompletionRequest {
        model: CONVERSATION_MODEL,
        temperature: 0.0,
        system: format!("{GRAMMAR_SYSTEM}\n\n{JSON_ONLY_SYSTEM}"),
        messages: vec![ChatMessage::user(fill_template(
            GRAMMAR_PROMPT_TEMPLATE,
            &[("text", text)],
        ))],
        json_output: true,
    }
}

pub fn build_score_request(input: &ScoreInput<'_>) -> CompletionRequest {
    let ctx = input.context;
    let education = ctx.education_summary();
    let work_experience = ctx.work_experience_summary();

    let prompt = fill_template(
        SCORE_PROMPT_TEMPLATE,
        &[
            ("interview_type", ctx.interview_type.as_str()),
            ("name", ctx.name.as_str()),
            ("education", education.as_str()),
            ("work_experience", work_experience.as_str()),
            ("professional_summary", ctx.professional_summary.as_str()),
            ("company_name", ctx.company_name.as_str()),
            ("job_description", or_default(&ctx.job_description, "Not provided")),
            ("additional_notes", ctx.additional_notes.as_str()),
            ("current_task_topic", or_default(input.topic, DEFAULT_TOPIC)),
            (
                "current_topic_instruction",
                or_default(input.instruction, DEFAULT_INSTRUCTION),
            ),
            ("last_question", input.question),
            ("last_user_reply", input.answer),
        ],
    );

    CompletionRequest {
        model: CONVERSATION_MODEL,
        temperature: 0.2,
        system: format!("{SCORE_SYSTEM}\n\n{JSON_ONLY_SYSTEM}"),
        messages: vec![ChatMessage::user(prompt)],
        json_output: true,
    }
}

pub fn validate_grammar(raw: &str) -> Result<GrammarFeedback, AppError> {
    let mut feedback: GrammarFeedback =
        parse_json_output(raw).map_err(|e| map_llm_error("grammar", e))?;
    feedback.corrected_version = feedback.corrected_version.trim().to_string();
    if feedback.corrected_version.is_empty() {
        return Err(AppError::LlmValidation(
            "grammar: corrected_version is empty".to_string(),
        ));
    }
    Ok(feedback)
}

pub fn validate_score(raw: &str) -> Result<ScoreFeedback, AppError> {
    let feedback: ScoreFeedback =
        parse_json_output(raw).map_err(|e| map_llm_error("score", e))?;
    if !(1..=10).contains(&feedback.score) {
        return Err(AppError::LlmValidation(format!(
            "score: {} is outside 1..=10",
            feedback.score
        )));
    }
    if feedback.better_version.trim().is_empty() {
        return Err(AppError::LlmValidation(
            "score: better_version is empty".to_string(),
        ));
    }
    Ok(feedback)
}
