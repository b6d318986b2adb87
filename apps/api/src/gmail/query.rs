use chrono::{DateTime, Utc};

/// Attachment extensions the search asks Gmail for.
pub const RESUME_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];

/// Filename fragments that mark an attachment as a resume.
const RESUME_NAME_HINTS: [&str; 3] = ["resume", "cv", "curriculum"];

/// Parameters of one resume search over a mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeSearch {
    /// Matched against message subjects, any one is enough.
    pub keywords: Vec<String>,
    /// Only messages newer than this day.
    pub after: Option<DateTime<Utc>>,
    pub max_results: u32,
}

impl ResumeSearch {
    /// Gmail search expression, e.g.
    /// `has:attachment after:2024/03/01 (subject:(Rust) OR subject:(Backend)) (filename:pdf OR ...)`.
    pub fn query(&self) -> String {
        let mut parts = vec!["has:attachment".to_string()];

        if let Some(after) = self.after {
            parts.push(format!("after:{}", after.format("%Y/%m/%d")));
        }

        let subjects: Vec<String> = self
            .keywords
            .iter()
            .map(|kw| kw.trim())
            .filter(|kw| !kw.is_empty())
            .map(|kw| format!("subject:({kw})"))
            .collect();
        if !subjects.is_empty() {
            parts.push(format!("({})", subjects.join(" OR ")));
        }

        let filenames: Vec<String> = RESUME_EXTENSIONS
            .iter()
            .map(|ext| format!("filename:{ext}"))
            .collect();
        parts.push(format!("({})", filenames.join(" OR ")));

        parts.join(" ")
    }
}

pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// True for pdf/doc/docx attachments whose name mentions resume, cv or curriculum.
pub fn is_resume_file(filename: &str) -> bool {
    let Some(ext) = file_extension(filename) else {
        return false;
    };
    if !RESUME_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }
    let lower = filename.to_ascii_lowercase();
    RESUME_NAME_HINTS.iter().any(|hint| lower.contains(hint))
}
