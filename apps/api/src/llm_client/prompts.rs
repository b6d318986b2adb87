// Prompt text for resume scoring. Placeholders are replaced in
// `build_resume_score_prompt` before sending.

/// System instruction that enforces JSON-only output.
pub const RESUME_SCORE_SYSTEM: &str = "You are an expert resume analyzer and technical recruiter. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Scoring prompt. Replace `{job_title}`, `{job_description}` and `{resume_text}`.
pub const RESUME_SCORE_PROMPT_TEMPLATE: &str = r#"Analyze the candidate resume below against the target job and score it.

TARGET JOB:
- Role: {job_title}
- Description:
{job_description}

Return a JSON object with this EXACT schema (no extra fields):
{
  "score": 0,
  "ats_score": 0,
  "readability_score": 0,
  "keyword_match": 0,
  "strengths": ["strength 1", "strength 2", "strength 3", "strength 4"],
  "weaknesses": ["weakness 1", "weakness 2", "weakness 3", "weakness 4"],
  "suggestions": [
    {
      "category": "category name",
      "issue": "specific issue",
      "fix": "actionable recommendation",
      "priority": "high"
    }
  ],
  "keyword_matches": ["keyword present in both resume and job"],
  "missing_keywords": ["job keyword absent from the resume"]
}

Scoring rules (every score is an integer from 0 to 100):
- score: overall fit of the candidate for the target role
- ats_score: how well the resume survives an Applicant Tracking System, including keywords from the job description
- readability_score: how easy the resume is to read and scan
- keyword_match: share of the job's relevant keywords present in the resume

Provide at least 4 strengths relevant to the role, at least 4 weaknesses
(missing skills or experience from the job requirements first) and at least 5
suggestions. priority is one of "high", "medium" or "low".

RESUME:
{resume_text}"#;

pub fn build_resume_score_prompt(resume_text: &str, job_title: &str, job_description: &str) -> String {
    let description = if job_description.trim().is_empty() {
        "(not provided)"
    } else {
        job_description
    };
    fill_placeholders(
        RESUME_SCORE_PROMPT_TEMPLATE,
        &[
            ("job_title", job_title),
            ("job_description", description),
            ("resume_text", resume_text),
        ],
    )
}

/// Substitutes `{name}` placeholders in one pass over the template, so values
/// that themselves contain placeholder text are inserted verbatim.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
