//! Progression State Machine: one inbound message in, one interviewer reply out.
//!
//! Flow per turn: lock session → load TurnState → route on stage →
//!       PLANNING (plan topics) | ACTIVE (judge topic, advance queue) →
//!       respond (utterance or closing message) → save → unlock.
//!
//! A turn commits fully or not at all: every fallible step runs before the
//! single `save`, so a failed LLM call leaves the stored state untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::interview::checkpoint::CheckpointStore;
use crate::interview::context::SessionConfig;
use crate::interview::judgment::{
    JudgmentAdapter, PlanRequest, ProgressRequest, ResponseType, UtteranceRequest,
};
use crate::interview::pacing::pacing;
use crate::interview::turn_state::{Message, Stage, TurnState, CLOSING_MESSAGE};

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Round budget fixed into every new TurnState.
    pub max_round: u32,
    /// Force the terminal transition once the budget is spent.
    pub enforce_round_limit: bool,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    pub finished: bool,
    pub total_round: u32,
    pub current_topic: String,
    pub current_instruction: String,
}

impl TurnOutcome {
    fn from_state(reply: String, state: &TurnState) -> Self {
        Self {
            reply,
            finished: state.is_ended(),
            total_round: state.total_round,
            current_topic: state.current_task_topic.clone(),
            current_instruction: state.current_task_instruction.clone(),
        }
    }
}

/// Externally visible transcript of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub messages: Vec<Message>,
    pub total_round: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Per-session single flight
// ────────────────────────────────────────────────────────────────────────────

/// One async mutex per session id. Held across load → compute → save.
#[derive(Default)]
struct SessionLocks {
    slots: Mutex<HashMap<String, LockSlot>>,
}

struct LockSlot {
    lock: Arc<AsyncMutex<()>>,
    /// Turns holding or waiting on `lock`.
    users: usize,
}

/// Exclusive access to one session. Dropping it, even mid-await, gives the slot back.
struct SessionLease<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.session_id);
    }
}

impl SessionLocks {
    async fn acquire(&self, session_id: &str) -> SessionLease<'_> {
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots
                .entry(session_id.to_string())
                .or_insert_with(|| LockSlot {
                    lock: Arc::new(AsyncMutex::new(())),
                    users: 0,
                });
            slot.users += 1;
            slot.lock.clone()
        };

        // Registered before waiting so a cancelled wait still releases the slot.
        let mut lease = SessionLease {
            locks: self,
            session_id: session_id.to_string(),
            guard: None,
        };
        lease.guard = Some(lock.lock_owned().await);
        lease
    }

    /// Removes the slot once no turn holds or waits on it.
    fn release(&self, session_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(session_id) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(session_id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

pub struct InterviewEngine {
    store: Arc<dyn CheckpointStore>,
    judge: Arc<dyn JudgmentAdapter>,
    settings: EngineSettings,
    locks: SessionLocks,
}

impl InterviewEngine {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        judge: Arc<dyn JudgmentAdapter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            judge,
            settings,
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Processes one user message and returns the interviewer's reply.
    pub async fn advance(
        &self,
        session_id: &str,
        user_message: &str,
        config: &SessionConfig,
    ) -> Result<TurnOutcome, AppError> {
        if user_message.trim().is_empty() {
            return Err(AppError::Validation("Message must not be empty".to_string()));
        }

        let _lease = self.locks.acquire(session_id).await;
        self.run_turn(session_id, user_message, config).await
    }

    async fn run_turn(
        &self,
        session_id: &str,
        user_message: &str,
        config: &SessionConfig,
    ) -> Result<TurnOutcome, AppError> {
        let mut state = self
            .store
            .load(session_id)
            .await?
            .unwrap_or_else(|| TurnState::new(self.settings.max_round));

        let stage = state.stage();
        if stage == Stage::Ended {
            info!("Session {session_id}: message after end, replying with closing message");
            return Ok(TurnOutcome::from_state(CLOSING_MESSAGE.to_string(), &state));
        }

        state.push_user(user_message);

        match stage {
            Stage::Planning => self.plan(session_id, &mut state, config).await?,
            Stage::Active => self.update(session_id, &mut state, config).await?,
            Stage::Ended => {}
        }

        let reply = self.respond(&mut state, config).await?;

        self.store.save(session_id, &state).await?;

        info!(
            "Session {session_id}: {stage:?} turn done (round {}/{}, topic '{}', {} queued)",
            state.total_round,
            state.max_round,
            state.current_task_topic,
            state.task_queue.len()
        );

        Ok(TurnOutcome::from_state(reply, &state))
    }

    /// PLANNING → ACTIVE.
    async fn plan(
        &self,
        session_id: &str,
        state: &mut TurnState,
        config: &SessionConfig,
    ) -> Result<(), AppError> {
        let tasks = self.judge.plan_topics(PlanRequest { config }).await?;
        if tasks.is_empty() {
            warn!("Session {session_id}: planning returned no topics");
        }
        state.apply_plan(tasks);
        Ok(())
    }

    /// ACTIVE: judge the active topic and move the queue.
    async fn update(
        &self,
        session_id: &str,
        state: &mut TurnState,
        config: &SessionConfig,
    ) -> Result<(), AppError> {
        if self.settings.enforce_round_limit && state.total_round >= state.max_round {
            warn!(
                "Session {session_id}: round budget {} spent, ending interview",
                state.max_round
            );
            state.force_end();
            return Ok(());
        }

        let directive = pacing(state.total_round, state.max_round, state.task_queue.len());
        let judgment = self
            .judge
            .judge_topic_progress(ProgressRequest {
                config,
                topic: &state.current_task_topic,
                instruction: &state.current_task_instruction,
                topic_count: state.current_topic_count,
                completed_topics: &state.completed_topics,
                last_question: state.last_question(),
                last_user_reply: state.last_user_reply(),
                pacing: directive,
            })
            .await?;

        info!(
            "Session {session_id}: topic '{}' → {:?} ({directive:?})",
            state.current_task_topic, judgment.decision
        );
        state.apply_decision(judgment.decision, judgment.response_instruction.as_deref());
        Ok(())
    }

    /// Appends the interviewer's reply and returns its text.
    async fn respond(
        &self,
        state: &mut TurnState,
        config: &SessionConfig,
    ) -> Result<String, AppError> {
        if state.needs_closing() {
            state.record_closing();
            return Ok(CLOSING_MESSAGE.to_string());
        }

        let response_type = if state.total_round == 0 {
            ResponseType::Start
        } else {
            ResponseType::Ongoing
        };
        let reply = self
            .judge
            .generate_utterance(UtteranceRequest {
                config,
                history: state.prior_history(),
                user_reply: state.last_user_reply(),
                topic: &state.current_task_topic,
                instruction: &state.current_task_instruction,
                response_type,
            })
            .await?;

        state.record_reply(reply.clone());
        Ok(reply)
    }

    /// Visible transcript. Unknown sessions read as empty.
    pub async fn history(&self, session_id: &str) -> Result<Transcript, AppError> {
        let Some(state) = self.store.load(session_id).await? else {
            return Ok(Transcript::default());
        };
        Ok(Transcript {
            messages: state.visible_messages().cloned().collect(),
            total_round: state.total_round,
        })
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<Option<TurnState>, AppError> {
        self.store.load(session_id).await
    }

    /// Deletes the session's checkpoint and confirms it is gone.
    ///
    /// Never fails: problems are logged and reported as `false`.
    pub async fn teardown(&self, session_id: &str) -> bool {
        let lease = self.locks.acquire(session_id).await;

        let deleted = match self.store.delete(session_id).await {
            Ok(()) => match self.store.load(session_id).await {
                Ok(None) => true,
                Ok(Some(_)) => {
                    error!("Session {session_id}: checkpoint still present after delete");
                    false
                }
                Err(e) => {
                    warn!("Session {session_id}: could not verify checkpoint delete: {e}");
                    false
                }
            },
            Err(e) => {
                error!("Session {session_id}: checkpoint delete failed: {e}");
                false
            }
        };

        drop(lease);

        if deleted {
            info!("Session {session_id}: checkpoint removed");
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::checkpoint::MemoryCheckpointStore;
    use crate::interview::context::SessionContext;
    use crate::interview::judgment::TopicJudgment;
    use crate::interview::turn_state::{
        InterviewTask, Role, TopicDecision, END_TOPIC, START_TRIGGER,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn task(topic: &str) -> InterviewTask {
        InterviewTask {
            topic: topic.to_string(),
            instruction: format!("Cover {topic}"),
        }
    }

    fn judgment(decision: TopicDecision, follow_up: Option<&str>) -> TopicJudgment {
        TopicJudgment {
            reasoning: String::new(),
            decision,
            response_instruction: follow_up.map(str::to_string),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            context: SessionContext::default(),
            api_key: "sk-test".into(),
        }
    }

    /// Plays back scripted plans, judgments and utterances.
    #[derive(Default)]
    struct ScriptedJudge {
        plans: Mutex<VecDeque<Result<Vec<InterviewTask>, AppError>>>,
        judgments: Mutex<VecDeque<Result<TopicJudgment, AppError>>>,
        utterances: Mutex<VecDeque<Result<String, AppError>>>,
        response_types: Mutex<Vec<ResponseType>>,
        judged_topics: Mutex<Vec<String>>,
    }

    impl ScriptedJudge {
        fn plan(self, tasks: Vec<InterviewTask>) -> Self {
            self.plans.lock().unwrap().push_back(Ok(tasks));
            self
        }

        fn judge(self, result: Result<TopicJudgment, AppError>) -> Self {
            self.judgments.lock().unwrap().push_back(result);
            self
        }

        fn say(self, result: Result<String, AppError>) -> Self {
            self.utterances.lock().unwrap().push_back(result);
            self
        }

        fn judgment_calls(&self) -> usize {
            self.judged_topics.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JudgmentAdapter for ScriptedJudge {
        async fn plan_topics(
            &self,
            _request: PlanRequest<'_>,
        ) -> Result<Vec<InterviewTask>, AppError> {
            self.plans
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected plan_topics call")
        }

        async fn judge_topic_progress(
            &self,
            request: ProgressRequest<'_>,
        ) -> Result<TopicJudgment, AppError> {
            self.judged_topics
                .lock()
                .unwrap()
                .push(request.topic.to_string());
            self.judgments
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected judge_topic_progress call")
        }

        async fn generate_utterance(
            &self,
            request: UtteranceRequest<'_>,
        ) -> Result<String, AppError> {
            self.response_types
                .lock()
                .unwrap()
                .push(request.response_type);
            self.utterances
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected generate_utterance call")
        }
    }

    fn build(
        judge: ScriptedJudge,
        settings: EngineSettings,
    ) -> (InterviewEngine, Arc<ScriptedJudge>) {
        let judge = Arc::new(judge);
        let engine = InterviewEngine::new(
            Arc::new(MemoryCheckpointStore::new()),
            judge.clone(),
            settings,
        );
        (engine, judge)
    }

    fn advisory() -> EngineSettings {
        EngineSettings {
            max_round: 20,
            enforce_round_limit: false,
        }
    }

    #[tokio::test]
    async fn test_first_turn_plans_and_opens() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro"), task("Salary")])
            .say(Ok("Welcome! Tell me about yourself.".into()));
        let (engine, judge) = build(judge, advisory());

        let out = engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        assert_eq!(out.reply, "Welcome! Tell me about yourself.");
        assert!(!out.finished);
        assert_eq!(out.total_round, 1);
        assert_eq!(out.current_topic, "Intro");
        assert_eq!(*judge.response_types.lock().unwrap(), vec![ResponseType::Start]);

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.current_topic_count, 0);
        assert_eq!(state.task_queue.len(), 2);
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_empty_plan_emits_closing_without_counting_round() {
        let judge = ScriptedJudge::default().plan(vec![]);
        let (engine, _) = build(judge, advisory());

        let out = engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        assert_eq!(out.reply, CLOSING_MESSAGE);
        assert_eq!(out.total_round, 0);
        assert_eq!(out.current_topic, "");
        assert!(!out.finished);

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.stage(), Stage::Planning);
    }

    #[tokio::test]
    async fn test_empty_plan_replans_on_next_turn() {
        let judge = ScriptedJudge::default()
            .plan(vec![])
            .plan(vec![task("Intro")])
            .say(Ok("Hello again.".into()));
        let (engine, _) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let out = engine.advance("s1", "Hello?", &config()).await.unwrap();
        assert_eq!(out.reply, "Hello again.");
        assert_eq!(out.total_round, 1);
        assert_eq!(out.current_topic, "Intro");
    }

    #[tokio::test]
    async fn test_single_topic_complete_ends_with_closing() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("Tell me about yourself.".into()))
            .judge(Ok(judgment(TopicDecision::Complete, None)));
        let (engine, _) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let out = engine
            .advance("s1", "I'm a backend engineer.", &config())
            .await
            .unwrap();

        assert_eq!(out.reply, CLOSING_MESSAGE);
        assert!(out.finished);
        assert_eq!(out.total_round, 1);
        assert_eq!(out.current_topic, END_TOPIC);

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert!(state.task_queue.is_empty());
        assert_eq!(state.completed_topics, vec!["Intro".to_string()]);
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn test_message_after_end_has_no_side_effects() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("Hi.".into()))
            .judge(Ok(judgment(TopicDecision::Pass, None)));
        let (engine, judge) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        engine.advance("s1", "No thanks", &config()).await.unwrap();
        let before = engine.snapshot("s1").await.unwrap().unwrap();

        let out = engine.advance("s1", "Anything else?", &config()).await.unwrap();
        assert_eq!(out.reply, CLOSING_MESSAGE);
        assert!(out.finished);
        assert_eq!(judge.judgment_calls(), 1);
        assert_eq!(engine.snapshot("s1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_incomplete_keeps_topic_and_counts_rounds() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro"), task("Salary")])
            .say(Ok("Tell me about yourself.".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, Some("Ask about team size"))))
            .say(Ok("How big was the team?".into()))
            .judge(Ok(judgment(TopicDecision::Complete, None)))
            .say(Ok("What salary range are you targeting?".into()));
        let (engine, judge) = build(judge, advisory());

        let mut rounds = Vec::new();
        for msg in [START_TRIGGER, "I led a migration.", "Eight people."] {
            rounds.push(engine.advance("s1", msg, &config()).await.unwrap());
        }

        assert_eq!(
            rounds.iter().map(|o| o.total_round).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rounds[1].current_topic, "Intro");
        assert!(rounds[1].current_instruction.ends_with("\nAsk about team size"));
        assert_eq!(rounds[2].current_topic, "Salary");
        assert_eq!(
            *judge.judged_topics.lock().unwrap(),
            vec!["Intro".to_string(), "Intro".to_string()]
        );

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.current_topic_count, 1);
        assert_eq!(state.messages.len(), 6);
    }

    #[tokio::test]
    async fn test_topics_are_only_consumed() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("A"), task("B"), task("C")])
            .say(Ok("q1".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, None)))
            .say(Ok("q2".into()))
            .judge(Ok(judgment(TopicDecision::Complete, None)))
            .say(Ok("q3".into()))
            .judge(Ok(judgment(TopicDecision::Pass, None)))
            .say(Ok("q4".into()))
            .judge(Ok(judgment(TopicDecision::Complete, None)));
        let (engine, _) = build(judge, advisory());

        let mut last_total = usize::MAX;
        for msg in [START_TRIGGER, "a1", "a2", "a3", "a4"] {
            engine.advance("s1", msg, &config()).await.unwrap();
            let state = engine.snapshot("s1").await.unwrap().unwrap();
            assert!(state.is_consistent());
            let total = state.completed_topics.len() + state.task_queue.len();
            assert!(total <= last_total);
            last_total = total;
        }

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert!(state.is_ended());
        assert_eq!(state.completed_topics, vec!["A", "B", "C"]);
        assert_eq!(state.total_round, 4);
    }

    #[tokio::test]
    async fn test_failed_judgment_does_not_save() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("Tell me about yourself.".into()))
            .judge(Err(AppError::LlmValidation("bad json".into())));
        let (engine, _) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let before = engine.snapshot("s1").await.unwrap().unwrap();

        let err = engine.advance("s1", "Hello", &config()).await.unwrap_err();
        assert!(matches!(err, AppError::LlmValidation(_)));
        assert_eq!(engine.snapshot("s1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_utterance_on_first_turn_leaves_no_state() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Err(AppError::Llm("timeout".into())));
        let (engine, _) = build(judge, advisory());

        assert!(engine.advance("s1", START_TRIGGER, &config()).await.is_err());
        assert!(engine.snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enforced_round_limit_ends_without_judgment() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro"), task("Salary")])
            .say(Ok("Tell me about yourself.".into()));
        let settings = EngineSettings {
            max_round: 1,
            enforce_round_limit: true,
        };
        let (engine, judge) = build(judge, settings);

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let out = engine.advance("s1", "Sure.", &config()).await.unwrap();

        assert!(out.finished);
        assert_eq!(out.reply, CLOSING_MESSAGE);
        assert_eq!(judge.judgment_calls(), 0);
        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.completed_topics.len(), 2);
    }

    #[tokio::test]
    async fn test_advisory_round_limit_keeps_judging() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("q1".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, None)))
            .say(Ok("q2".into()));
        let settings = EngineSettings {
            max_round: 1,
            enforce_round_limit: false,
        };
        let (engine, judge) = build(judge, settings);

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let out = engine.advance("s1", "a1", &config()).await.unwrap();
        assert_eq!(out.total_round, 2);
        assert!(!out.finished);
        assert_eq!(judge.judgment_calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let (engine, _) = build(ScriptedJudge::default(), advisory());
        let err = engine.advance("s1", "   ", &config()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_history_hides_start_and_defaults_to_empty() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("Welcome!".into()));
        let (engine, _) = build(judge, advisory());

        assert_eq!(engine.history("s1").await.unwrap(), Transcript::default());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        let transcript = engine.history("s1").await.unwrap();
        assert_eq!(transcript.total_round, 1);
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].role, Role::Interviewer);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro")])
            .say(Ok("Welcome!".into()));
        let (engine, _) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        assert!(engine.teardown("s1").await);
        assert!(engine.teardown("s1").await);
        assert!(engine.snapshot("s1").await.unwrap().is_none());
        assert_eq!(engine.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session_are_serialized() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro"), task("Salary")])
            .say(Ok("q1".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, None)))
            .say(Ok("q2".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, None)))
            .say(Ok("q3".into()));
        let (engine, judge) = build(judge, advisory());
        let engine = Arc::new(engine);

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();

        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|msg| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.advance("s1", msg, &config()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = engine.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.total_round, 3);
        assert_eq!(state.messages.len(), 6);
        assert_eq!(state.current_topic_count, 2);
        assert_eq!(judge.judgment_calls(), 2);
        assert_eq!(engine.locks.len(), 0);
    }

    /// Never answers, like a model call that hangs until the client gives up.
    struct StalledJudge;

    #[async_trait]
    impl JudgmentAdapter for StalledJudge {
        async fn plan_topics(
            &self,
            _request: PlanRequest<'_>,
        ) -> Result<Vec<InterviewTask>, AppError> {
            std::future::pending().await
        }

        async fn judge_topic_progress(
            &self,
            _request: ProgressRequest<'_>,
        ) -> Result<TopicJudgment, AppError> {
            std::future::pending().await
        }

        async fn generate_utterance(
            &self,
            _request: UtteranceRequest<'_>,
        ) -> Result<String, AppError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_turns_release_session_locks() {
        let engine = InterviewEngine::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(StalledJudge),
            advisory(),
        );

        for i in 0..50 {
            let session_id = format!("s{i}");
            let result = tokio::time::timeout(
                Duration::from_millis(1),
                engine.advance(&session_id, START_TRIGGER, &config()),
            )
            .await;
            assert!(result.is_err());
        }

        assert_eq!(engine.locks.len(), 0);
        assert!(engine.snapshot("s0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_wait_for_busy_session_releases_lock() {
        let (engine, _) = build(ScriptedJudge::default(), advisory());

        let held = engine.locks.acquire("s1").await;
        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            engine.advance("s1", START_TRIGGER, &config()),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(engine.locks.len(), 1);

        drop(held);
        assert_eq!(engine.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_typed_start_mid_interview_stays_in_history() {
        let judge = ScriptedJudge::default()
            .plan(vec![task("Intro"), task("Salary")])
            .say(Ok("Ready when you are.".into()))
            .judge(Ok(judgment(TopicDecision::Incomplete, None)))
            .say(Ok("Go ahead.".into()));
        let (engine, _) = build(judge, advisory());

        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();
        engine.advance("s1", START_TRIGGER, &config()).await.unwrap();

        let transcript = engine.history("s1").await.unwrap();
        let texts: Vec<&str> = transcript.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Ready when you are.", START_TRIGGER, "Go ahead."]);
        assert_eq!(transcript.messages[1].role, Role::User);
    }
}
