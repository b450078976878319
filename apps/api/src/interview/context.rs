//! Session context: the candidate/job facts every prompt is conditioned on.
//!
//! The interview core only reads context. It comes from the external
//! session directory (sessions, résumés and applications tables behind
//! PostgREST) and may be cached in Redis. Nothing here is persisted by the
//! engine.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::directory::{ApplicationRow, ResumeRow, SessionRow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    #[default]
    Recruiter,
    Technical,
    Behavioral,
    HiringManager,
}

impl InterviewType {
    /// Unknown labels fall back to a recruiter screen.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("technical") => InterviewType::Technical,
            Some("behavioral") => InterviewType::Behavioral,
            Some("hiring_manager") => InterviewType::HiringManager,
            _ => InterviewType::Recruiter,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterviewType::Recruiter => "recruiter",
            InterviewType::Technical => "technical",
            InterviewType::Behavioral => "behavioral",
            InterviewType::HiringManager => "hiring_manager",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    pub hard_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub languages: Vec<String>,
}

/// Flattened candidate, job and session facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    pub interview_type: InterviewType,
    // Résumé
    pub name: String,
    pub location: String,
    pub professional_summary: String,
    pub work_experience: Value,
    pub projects: Value,
    pub education: Value,
    pub skills: Skills,
    pub interview_hooks: Value,
    // Application
    pub company_name: String,
    pub job_title: String,
    pub job_description: String,
    pub industry: String,
    pub job_grade: String,
    // Session
    pub interviewer_name: String,
    pub additional_notes: String,
    pub technical_level: String,
    pub selected_topics: Vec<String>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            interview_type: InterviewType::default(),
            name: "Candidate".to_string(),
            location: String::new(),
            professional_summary: String::new(),
            work_experience: json!([]),
            projects: json!([]),
            education: json!([]),
            skills: Skills::default(),
            interview_hooks: json!([]),
            company_name: String::new(),
            job_title: String::new(),
            job_description: String::new(),
            industry: String::new(),
            job_grade: String::new(),
            interviewer_name: "Interviewer".to_string(),
            additional_notes: String::new(),
            technical_level: String::new(),
            selected_topics: Vec::new(),
        }
    }
}

impl SessionContext {
    /// Builds the flattened context from the three directory rows.
    pub fn from_rows(session: SessionRow, resume: ResumeRow, application: ApplicationRow) -> Self {
        let basic = resume.basic_info.unwrap_or_default();
        Self {
            interview_type: InterviewType::from_label(session.interview_type.as_deref()),
            name: non_empty(basic.name).unwrap_or_else(|| "Candidate".to_string()),
            location: basic.location.unwrap_or_default(),
            professional_summary: resume.professional_summary.unwrap_or_default(),
            work_experience: array_or_empty(resume.work_experience),
            projects: array_or_empty(resume.projects),
            education: array_or_empty(resume.education),
            skills: Skills {
                hard_skills: basic.hard_skills,
                soft_skills: basic.soft_skills,
                languages: basic.languages,
            },
            interview_hooks: array_or_empty(resume.interview_hooks),
            company_name: application.company_name.unwrap_or_default(),
            job_title: application.job_title.unwrap_or_default(),
            job_description: application.job_description.unwrap_or_default(),
            industry: application.industry.unwrap_or_default(),
            job_grade: application.job_grade.unwrap_or_default(),
            interviewer_name: non_empty(session.interviewer_name)
                .unwrap_or_else(|| "Interviewer".to_string()),
            additional_notes: session.additional_notes.unwrap_or_default(),
            technical_level: session.technical_level.unwrap_or_default(),
            selected_topics: session.must_ask_questions.unwrap_or_default(),
        }
    }

    /// Company name for prompts that need one even when the application omits it.
    pub fn company_or_default(&self) -> &str {
        if self.company_name.trim().is_empty() {
            "our company"
        } else {
            &self.company_name
        }
    }

    /// Education entries as one readable line.
    pub fn education_summary(&self) -> String {
        summarize_entries(&self.education, |entry| {
            let degree = str_field(entry, "degree");
            let major = str_field(entry, "major");
            let school = str_field(entry, "school");
            format!("{degree} in {major} from {school}").trim().to_string()
        })
    }

    /// Work experience entries as one readable line.
    pub fn work_experience_summary(&self) -> String {
        summarize_entries(&self.work_experience, |entry| {
            let role = str_field(entry, "role");
            let company = str_field(entry, "company");
            let details = str_field(entry, "responsibilities_and_achievements");
            format!("{role} at {company}: {details}")
        })
    }
}

/// Everything one turn needs besides the durable state.
/// Built fresh for each request and dropped with it.
#[derive(Clone)]
pub struct SessionConfig {
    pub context: SessionContext,
    pub api_key: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("context", &self.context)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn array_or_empty(value: Value) -> Value {
    if value.is_array() {
        value
    } else {
        json!([])
    }
}

fn str_field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn summarize_entries(entries: &Value, render: impl Fn(&Value) -> String) -> String {
    let parts: Vec<String> = entries
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|e| e.is_object())
                .map(&render)
                .collect()
        })
        .unwrap_or_default();
    if parts.is_empty() {
        "Not provided".to_string()
    } else {
        parts.join("; ")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Provider trait
// ────────────────────────────────────────────────────────────────────────────

/// Read access to the external session directory.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn session_context(&self, session_id: &str) -> Result<SessionContext, AppError>;

    /// Drops any cached context for the session. Returns whether something was cached.
    async fn evict(&self, session_id: &str) -> Result<bool, AppError>;

    /// Flags the session as finished in the directory.
    async fn mark_completed(&self, session_id: &str) -> Result<(), AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Supabase (PostgREST) provider
// ────────────────────────────────────────────────────────────────────────────

pub struct SupabaseContextProvider {
    client: Client,
    rest_url: String,
    anon_key: String,
}

impl SupabaseContextProvider {
    pub fn new(rest_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("Failed to build HTTP client"),
            rest_url: rest_url.into(),
            anon_key: anon_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{table}", self.rest_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// Fetches the first row of `table` matching `params`.
    async fn fetch_first<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<T, AppError> {
        let response = self
            .request(reqwest::Method::GET, table)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{table} lookup failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "{table} lookup returned {status}: {body}"
            )));
        }

        let rows: Vec<T> = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("{table} lookup returned bad JSON: {e}")))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("{table} row not found")))
    }
}

#[async_trait]
impl ContextProvider for SupabaseContextProvider {
    async fn session_context(&self, session_id: &str) -> Result<SessionContext, AppError> {
        // The session row names the user and application, so it must come first.
        let session: SessionRow = self
            .fetch_first("sessions", &[("id", format!("eq.{session_id}"))])
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::NotFound(format!("Session {session_id} not found")),
                other => other,
            })?;

        let resume_params = [
            ("user_id", format!("eq.{}", session.user_id)),
            ("limit", "1".to_string()),
        ];
        let application_params = [("id", format!("eq.{}", session.application_id))];

        let (resume, application) = tokio::try_join!(
            self.fetch_first::<ResumeRow>("resumes", &resume_params),
            self.fetch_first::<ApplicationRow>("applications", &application_params),
        )?;

        debug!(
            "Assembled context for session {session_id} (type={:?})",
            session.interview_type
        );
        Ok(SessionContext::from_rows(session, resume, application))
    }

    async fn evict(&self, _session_id: &str) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn mark_completed(&self, session_id: &str) -> Result<(), AppError> {
        let response = self
            .request(reqwest::Method::PATCH, "sessions")
            .query(&[("id", format!("eq.{session_id}"))])
            .json(&json!({ "status": "completed" }))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("session update failed: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                info!("Marked session {session_id} as completed");
                Ok(())
            }
            status => Err(AppError::Upstream(format!(
                "session update returned {status}"
            ))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis cache
// ────────────────────────────────────────────────────────────────────────────

/// Redis-backed context cache shared by every process serving the API.
#[derive(Clone)]
pub struct RedisContextCache {
    client: redis::Client,
    ttl_secs: u64,
}

impl RedisContextCache {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    fn key(session_id: &str) -> String {
        format!("interview:context:{session_id}")
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Corrupt cached context for {session_id}: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub async fn put(&self, session_id: &str, context: &SessionContext) -> Result<(), AppError> {
        let raw = serde_json::to_string(context)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize context: {e}")))?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(Self::key(session_id))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, session_id: &str) -> Result<bool, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

/// Read-through cache in front of another provider.
///
/// Cache read/write failures degrade to a direct lookup. Eviction failures
/// are returned so teardown can report them.
pub struct CachedContextProvider<P> {
    inner: P,
    cache: Option<RedisContextCache>,
}

impl<P: ContextProvider> CachedContextProvider<P> {
    pub fn new(inner: P, cache: Option<RedisContextCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<P: ContextProvider> ContextProvider for CachedContextProvider<P> {
    async fn session_context(&self, session_id: &str) -> Result<SessionContext, AppError> {
        let Some(cache) = &self.cache else {
            return self.inner.session_context(session_id).await;
        };

        match cache.get(session_id).await {
            Ok(Some(context)) => {
                debug!("Context cache hit for session {session_id}");
                return Ok(context);
            }
            Ok(None) => {}
            Err(e) => warn!("Context cache read failed for session {session_id}: {e}"),
        }

        let context = self.inner.session_context(session_id).await?;
        if let Err(e) = cache.put(session_id, &context).await {
            warn!("Context cache write failed for session {session_id}: {e}");
        }
        Ok(context)
    }

    async fn evict(&self, session_id: &str) -> Result<bool, AppError> {
        let inner = self.inner.evict(session_id).await?;
        match &self.cache {
            Some(cache) => Ok(cache.remove(session_id).await? || inner),
            None => Ok(inner),
        }
    }

    async fn mark_completed(&self, session_id: &str) -> Result<(), AppError> {
        self.inner.mark_completed(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::directory::BasicInfo;

    fn rows() -> (SessionRow, ResumeRow, ApplicationRow) {
        let session = SessionRow {
            id: "s1".into(),
            user_id: "u1".into(),
            application_id: "a1".into(),
            interview_type: Some("hiring_manager".into()),
            interviewer_name: Some("  ".into()),
            must_ask_questions: Some(vec!["Why us?".into()]),
            ..Default::default()
        };
        let resume = ResumeRow {
            basic_info: Some(BasicInfo {
                name: Some("Ada".into()),
                hard_skills: vec!["Rust".into()],
                ..Default::default()
            }),
            work_experience: json!([{
                "company": "Acme",
                "role": "Engineer",
                "responsibilities_and_achievements": "Built the billing pipeline"
            }]),
            education: json!({"not": "an array"}),
            ..Default::default()
        };
        let application = ApplicationRow {
            company_name: Some("Globex".into()),
            job_title: Some("Staff Engineer".into()),
            ..Default::default()
        };
        (session, resume, application)
    }

    #[test]
    fn test_from_rows_flattens_and_defaults() {
        let (s, r, a) = rows();
        let ctx = SessionContext::from_rows(s, r, a);
        assert_eq!(ctx.interview_type, InterviewType::HiringManager);
        assert_eq!(ctx.name, "Ada");
        assert_eq!(ctx.interviewer_name, "Interviewer");
        assert_eq!(ctx.skills.hard_skills, vec!["Rust".to_string()]);
        assert_eq!(ctx.education, json!([]));
        assert_eq!(ctx.selected_topics, vec!["Why us?".to_string()]);
        assert_eq!(ctx.company_or_default(), "Globex");
    }

    #[test]
    fn test_summaries() {
        let (s, r, a) = rows();
        let ctx = SessionContext::from_rows(s, r, a);
        assert_eq!(
            ctx.work_experience_summary(),
            "Engineer at Acme: Built the billing pipeline"
        );
        assert_eq!(ctx.education_summary(), "Not provided");
    }

    #[test]
    fn test_unknown_interview_type_is_recruiter() {
        assert_eq!(InterviewType::from_label(Some("panel")), InterviewType::Recruiter);
        assert_eq!(InterviewType::from_label(None), InterviewType::Recruiter);
        assert_eq!(InterviewType::Behavioral.as_str(), "behavioral");
    }

    #[test]
    fn test_context_cache_round_trip_through_json() {
        let (s, r, a) = rows();
        let ctx = SessionContext::from_rows(s, r, a);
        let raw = serde_json::to_string(&ctx).unwrap();
        let back: SessionContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn test_session_config_debug_redacts_key() {
        let config = SessionConfig {
            context: SessionContext::default(),
            api_key: "sk-secret".into(),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_cached_provider_without_cache_delegates() {
        struct Fixed;

        #[async_trait]
        impl ContextProvider for Fixed {
            async fn session_context(&self, _: &str) -> Result<SessionContext, AppError> {
                Ok(SessionContext {
                    company_name: "Initech".into(),
                    ..Default::default()
                })
            }
            async fn evict(&self, _: &str) -> Result<bool, AppError> {
                Ok(false)
            }
            async fn mark_completed(&self, _: &str) -> Result<(), AppError> {
                Ok(())
            }
        }

        let provider = CachedContextProvider::new(Fixed, None);
        let ctx = provider.session_context("s1").await.unwrap();
        assert_eq!(ctx.company_name, "Initech");
        assert!(!provider.evict("s1").await.unwrap());
    }
}
