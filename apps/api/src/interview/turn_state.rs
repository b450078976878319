//! Turn State: the durable record of one interview's progress.
//!
//! One `TurnState` exists per session. It is created on the first message,
//! mutated once per turn by the engine, checkpointed after every successful
//! turn and deleted on teardown.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sentinel topic written once the task queue has been drained.
pub const END_TOPIC: &str = "end";
/// Instruction paired with [`END_TOPIC`].
pub const END_INSTRUCTION: &str = "ending this interview";
/// Synthetic first user message that kicks off an interview. Hidden from history.
pub const START_TRIGGER: &str = "START";
/// Fixed courtesy reply once there is nothing left to ask.
pub const CLOSING_MESSAGE: &str =
    "Thank you so much for your time today. We will be in touch soon!";
pub const DEFAULT_MAX_ROUND: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Interviewer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn interviewer(text: impl Into<String>) -> Self {
        Self {
            role: Role::Interviewer,
            text: text.into(),
        }
    }

    pub fn is_start_trigger(&self) -> bool {
        self.role == Role::User && self.text == START_TRIGGER
    }
}

/// One planned discussion segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewTask {
    /// Short title, e.g. "Intro", "Visa Status", "Project Alpha".
    pub topic: String,
    /// Internal guidance for the interviewer. Never shown to the candidate.
    pub instruction: String,
}

/// The per-turn verdict on the active topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicDecision {
    Complete,
    Incomplete,
    Pass,
}

/// Where an interview stands. Derived from a `TurnState`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No usable plan yet: the next turn plans topics.
    Planning,
    /// A topic is active: the next turn judges it.
    Active,
    /// The queue was drained on an earlier turn.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub messages: Vec<Message>,
    pub total_round: u32,
    pub max_round: u32,
    pub task_queue: VecDeque<InterviewTask>,
    pub current_task_topic: String,
    pub current_task_instruction: String,
    pub current_topic_count: u32,
    pub completed_topics: Vec<String>,
}

impl TurnState {
    pub fn new(max_round: u32) -> Self {
        Self {
            messages: Vec::new(),
            total_round: 0,
            max_round,
            task_queue: VecDeque::new(),
            current_task_topic: String::new(),
            current_task_instruction: String::new(),
            current_topic_count: 0,
            completed_topics: Vec::new(),
        }
    }

    /// Router: decides which transition the next turn takes.
    pub fn stage(&self) -> Stage {
        if self.is_ended() {
            Stage::Ended
        } else if self.total_round == 0 && !self.has_plan() {
            Stage::Planning
        } else {
            Stage::Active
        }
    }

    pub fn is_ended(&self) -> bool {
        self.current_task_topic == END_TOPIC
    }

    /// A plan exists once planning produced at least one task.
    pub fn has_plan(&self) -> bool {
        !self.task_queue.is_empty() || !self.completed_topics.is_empty() || self.is_ended()
    }

    /// The respond step emits the closing message instead of calling the model.
    pub fn needs_closing(&self) -> bool {
        self.current_task_topic.is_empty() || self.is_ended()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Installs a freshly planned queue (PLANNING → ACTIVE).
    pub fn apply_plan(&mut self, tasks: Vec<InterviewTask>) {
        self.task_queue = tasks.into();
        self.completed_topics.clear();
        self.current_topic_count = 0;
        match self.task_queue.front() {
            Some(first) => {
                self.current_task_topic = first.topic.clone();
                self.current_task_instruction = first.instruction.clone();
            }
            None => {
                self.current_task_topic.clear();
                self.current_task_instruction.clear();
            }
        }
    }

    /// Applies a topic verdict to the active topic.
    ///
    /// INCOMPLETE keeps the topic and accumulates the follow-up instruction.
    /// COMPLETE and PASS retire the head task and promote the next one, or
    /// end the interview when the retired task was the last.
    pub fn apply_decision(&mut self, decision: TopicDecision, follow_up: Option<&str>) {
        match decision {
            TopicDecision::Incomplete => {
                if let Some(extra) = follow_up.map(str::trim).filter(|s| !s.is_empty()) {
                    if !self.current_task_instruction.is_empty() {
                        self.current_task_instruction.push('\n');
                    }
                    self.current_task_instruction.push_str(extra);
                }
                self.current_topic_count += 1;
            }
            TopicDecision::Complete | TopicDecision::Pass => self.advance_topic(),
        }
    }

    /// Retires the head task unconditionally.
    pub fn advance_topic(&mut self) {
        if let Some(done) = self.task_queue.pop_front() {
            self.completed_topics.push(done.topic);
        }
        match self.task_queue.front() {
            Some(next) => {
                self.current_task_topic = next.topic.clone();
                self.current_task_instruction = next.instruction.clone();
            }
            None => self.mark_ended(),
        }
        self.current_topic_count = 1;
    }

    /// Drains the remaining queue and moves to the terminal topic.
    pub fn force_end(&mut self) {
        while !self.task_queue.is_empty() {
            self.advance_topic();
        }
        self.mark_ended();
        self.current_topic_count = 1;
    }

    fn mark_ended(&mut self) {
        self.current_task_topic = END_TOPIC.to_string();
        self.current_task_instruction = END_INSTRUCTION.to_string();
    }

    /// Records a substantive interviewer reply. Counts as one round.
    pub fn record_reply(&mut self, text: impl Into<String>) {
        self.messages.push(Message::interviewer(text));
        self.total_round += 1;
    }

    /// Records the courtesy closing message. Does not count as a round.
    pub fn record_closing(&mut self) {
        self.messages.push(Message::interviewer(CLOSING_MESSAGE));
    }

    /// Latest user utterance, the one this turn answers.
    pub fn last_user_reply(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
            .unwrap_or_default()
    }

    /// The interviewer utterance the latest user message responds to.
    pub fn last_question(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .skip_while(|m| m.role == Role::User)
            .find(|m| m.role == Role::Interviewer)
            .map(|m| m.text.as_str())
            .unwrap_or_default()
    }

    /// Conversation up to, but excluding, the just-received user message.
    pub fn prior_history(&self) -> &[Message] {
        match self.messages.last() {
            Some(last) if last.role == Role::User => &self.messages[..self.messages.len() - 1],
            _ => &self.messages,
        }
    }

    /// Messages shown to clients: the leading START trigger is internal.
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        without_leading_trigger(&self.messages)
    }

    /// True when the topic mirror agrees with the queue head.
    pub fn is_consistent(&self) -> bool {
        match self.task_queue.front() {
            Some(head) => !self.is_ended() && self.current_task_topic == head.topic,
            None => self.current_task_topic.is_empty() || self.is_ended(),
        }
    }
}

/// Skips the synthetic START trigger when it opens the conversation.
/// A candidate typing "START" later is an ordinary message.
pub fn without_leading_trigger(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages
        .iter()
        .enumerate()
        .filter(|(i, m)| !(*i == 0 && m.is_start_trigger()))
        .map(|(_, m)| m)
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROUND)
    }
}
