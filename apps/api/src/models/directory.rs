//! Rows read from the external session directory (PostgREST).
//!
//! Every field is defaulted: the directory is owned by another service and
//! rows written by older clients routinely omit columns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub interview_type: Option<String>,
    pub status: Option<String>,
    pub interviewer_name: Option<String>,
    pub additional_notes: Option<String>,
    pub technical_level: Option<String>,
    pub must_ask_questions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicInfo {
    pub name: Option<String>,
    pub location: Option<String>,
    pub hard_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeRow {
    pub id: String,
    pub user_id: String,
    pub basic_info: Option<BasicInfo>,
    pub professional_summary: Option<String>,
    pub work_experience: Value,
    pub projects: Value,
    pub education: Value,
    pub interview_hooks: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationRow {
    pub id: String,
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub job_description: Option<String>,
    pub industry: Option<String>,
    pub job_grade: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_row_tolerates_missing_and_null_columns() {
        let row: SessionRow = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "user_id": "u1",
            "application_id": "a1",
            "type": "technical",
            "interviewer_name": null
        }))
        .unwrap();
        assert_eq!(row.interview_type.as_deref(), Some("technical"));
        assert!(row.interviewer_name.is_none());
        assert!(row.must_ask_questions.is_none());
    }

    #[test]
    fn test_resume_row_keeps_structured_sections() {
        let row: ResumeRow = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "basic_info": {"name": "Ada", "hard_skills": ["Rust"]},
            "work_experience": [{"company": "Acme", "role": "Engineer"}]
        }))
        .unwrap();
        assert_eq!(row.basic_info.unwrap().hard_skills, vec!["Rust".to_string()]);
        assert_eq!(row.work_experience[0]["company"], "Acme");
        assert!(row.projects.is_null());
    }
}
