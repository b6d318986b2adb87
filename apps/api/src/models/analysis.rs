use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Longest resume text kept on an analysis row.
pub const MAX_STORED_RESUME_CHARS: usize = 5000;

/// An AI resume analysis produced by a Gmail scan, ready to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResumeAnalysis {
    pub recruiter_id: Uuid,
    pub integration_id: Uuid,
    pub job_id: Option<Uuid>,
    pub candidate_email: String,
    pub resume_text: String,
    pub score: f64,
    pub ats_score: f64,
    pub readability_score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Value,
    pub keyword_matches: Vec<String>,
    pub missing_keywords: Vec<String>,
    /// source, email id, subject, filename and date of the originating email
    pub metadata: Value,
}

/// Truncates on a char boundary.
pub fn truncate_resume_text(text: &str) -> String {
    text.chars().take(MAX_STORED_RESUME_CHARS).collect()
}
