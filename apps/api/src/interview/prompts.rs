// All LLM prompt templates for the interview module.
// Placeholders are `{name}` and are filled by `llm_client::prompts::fill_template`.

use crate::interview::context::InterviewType;

/// System prompt for topic planning.
pub const PLAN_SYSTEM: &str = "You are an experienced interview designer. \
    You turn a candidate's résumé and a job description into an ordered interview plan.";

/// Planning prompt.
/// Replace: {interview_type}, {type_focus}, {name}, {location}, {professional_summary},
///          {work_experience}, {projects}, {education}, {skills}, {interview_hooks},
///          {company_name}, {job_title}, {job_description}, {industry}, {job_grade},
///          {technical_level}, {additional_notes}, {selected_topics}
pub const PLAN_PROMPT_TEMPLATE: &str = r#"Design a {interview_type} interview.

FOCUS FOR THIS INTERVIEW TYPE:
{type_focus}

CANDIDATE
Name: {name}
Location: {location}
Summary: {professional_summary}
Work experience: {work_experience}
Projects: {projects}
Education: {education}
Skills: {skills}
Interview hooks: {interview_hooks}

ROLE
Company: {company_name}
Title: {job_title}
Industry: {industry}
Grade: {job_grade}
Description: {job_description}

SESSION
Technical level: {technical_level}
Notes from the candidate: {additional_notes}
Topics the candidate asked to cover (MUST appear in the plan): {selected_topics}

Return a JSON object with this EXACT schema:
{
  "task_queue": [
    {"topic": "Intro", "instruction": "Greet the candidate and ask for a two-minute walkthrough of their background."}
  ]
}

RULES:
1. Order tasks the way a real interviewer would run the conversation, opening with an intro
2. `topic` is a short title; `instruction` is a specific internal note for the interviewer
3. Reference concrete résumé details in instructions (projects, numbers, technologies)
4. Keep the plan achievable in roughly 15 to 20 question/answer rounds
5. Never use "end" as a topic name"#;

/// Interview-type specific guidance injected into the planning prompt.
pub fn type_focus(interview_type: InterviewType) -> &'static str {
    match interview_type {
        InterviewType::Recruiter => {
            "Screening call: motivation, background fit, logistics (location, visa, availability), \
             compensation expectations, and questions about the company."
        }
        InterviewType::Technical => {
            "Technical deep dive: probe the technologies and systems on the résumé, design \
             trade-offs, debugging stories, and fundamentals matched to the stated technical level."
        }
        InterviewType::Behavioral => {
            "Behavioral interview: STAR-style questions on collaboration, conflict, ownership, \
             failure and growth, grounded in the candidate's actual experience."
        }
        InterviewType::HiringManager => {
            "Hiring manager conversation: scope of past ownership, impact, working style, \
             team fit, and how the candidate would approach the first months in the role."
        }
    }
}

/// System prompt for the per-turn progress judgment.
pub const PROGRESS_SYSTEM: &str = "You are the silent manager of a live interview. \
    After every candidate answer you decide whether the current topic is covered.";

/// Progress judgment prompt.
/// Replace: {interview_type}, {company_name}, {job_title}, {job_description}, {name},
///          {professional_summary}, {work_experience}, {education}, {additional_notes},
///          {current_task_topic}, {current_topic_instruction}, {curr_topic_count},
///          {completed_topics}, {pacing}, {last_question}, {last_user_reply}
pub const PROGRESS_PROMPT_TEMPLATE: &str = r#"Interview type: {interview_type}
Company: {company_name}
Role: {job_title}
Job description: {job_description}

Candidate: {name}
Summary: {professional_summary}
Work experience: {work_experience}
Education: {education}
Candidate notes: {additional_notes}

CURRENT TOPIC: {current_task_topic}
TOPIC INSTRUCTION:
{current_topic_instruction}
Turns already spent on this topic: {curr_topic_count}
Topics already completed: {completed_topics}

PACING: {pacing}

LAST QUESTION: {last_question}
CANDIDATE ANSWER: {last_user_reply}

DECISION LOGIC:
- COMPLETE: the answer covers what the topic instruction asks for
- INCOMPLETE: a specific, valuable follow-up is still needed on this topic
- PASS: the topic cannot progress (candidate declined, already covered in a completed topic, or pacing demands moving on)

Return a JSON object with this EXACT schema:
{
  "reasoning": "step-by-step analysis against the decision logic",
  "decision": "COMPLETE" | "INCOMPLETE" | "PASS",
  "response_instruction": "internal instruction for the next follow-up, or null unless INCOMPLETE"
}"#;

/// System prompt for the interviewer's spoken reply.
/// Replace: {interviewer_name}, {company_name}, {name}, {professional_summary}, {stay_in_role}
pub const RESPOND_SYSTEM_TEMPLATE: &str = r#"You are {interviewer_name}, interviewing {name} for {company_name}.
Candidate summary: {professional_summary}

Speak naturally and concisely, one question at a time, as a human interviewer would.
{stay_in_role}"#;

/// Final user turn for the interviewer's reply.
/// Replace: {response_type}, {topic}, {instruction}, {user_reply}
pub const RESPOND_PROMPT_TEMPLATE: &str = r#"RESPONSE TYPE: {response_type}
(START means this is the opening of the interview: greet the candidate and open the first topic.
Ongoing means react briefly to the candidate's answer, then continue.)

CURRENT TOPIC: {topic}
INTERNAL INSTRUCTION: {instruction}

CANDIDATE JUST SAID:
{user_reply}

Write only the interviewer's next utterance."#;

/// System prompt for grammar correction.
pub const GRAMMAR_SYSTEM: &str = "You are a careful English editor for interview answers. \
    Fix grammar, word choice and fluency without changing the meaning or adding content.";

/// Grammar prompt. Replace: {text}
pub const GRAMMAR_PROMPT_TEMPLATE: &str = r#"ANSWER:
{text}

Return a JSON object with this EXACT schema:
{
  "corrected_version": "the corrected answer"
}"#;

/// System prompt for answer scoring.
pub const SCORE_SYSTEM: &str = "You are an interview coach. \
    You score a candidate's answer and show a stronger version grounded in their real background.";

/// Score prompt.
/// Replace: {interview_type}, {name}, {education}, {work_experience}, {professional_summary},
///          {company_name}, {job_description}, {additional_notes}, {current_task_topic},
///          {current_topic_instruction}, {last_question}, {last_user_reply}
pub const SCORE_PROMPT_TEMPLATE: &str = r#"Interview type: {interview_type}
Company: {company_name}
Job description: {job_description}

Candidate: {name}
Education: {education}
Work experience: {work_experience}
Summary: {professional_summary}
Candidate notes: {additional_notes}

Topic: {current_task_topic}
Topic intent: {current_topic_instruction}

QUESTION: {last_question}
ANSWER: {last_user_reply}

Return a JSON object with this EXACT schema:
{
  "reasoning": "detailed analysis of the answer",
  "score": 1-10,
  "better_version": "an improved answer using only facts from the candidate's background"
}"#;
