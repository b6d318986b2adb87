use chrono::{DateTime, Utc};

use crate::models::job::JobRow;

const LISTED_JOB_TITLES: usize = 3;
const RESULTS_PATH: &str = "/zume/resume/analyze";

/// Summary email sent to the recruiter after a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanNotification {
    pub subject: String,
    pub html: String,
}

impl ScanNotification {
    pub fn new(
        analyzed: u32,
        jobs: &[JobRow],
        frontend_url: &str,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let results_url = format!("{}{RESULTS_PATH}", frontend_url.trim_end_matches('/'));
        let html = format!(
            r#"<html>
<body>
    <h2>Gmail Resume Scan Complete</h2>
    <p>Your scheduled email scan has been completed.</p>
    <h3>Scan Summary:</h3>
    <ul>
        <li><strong>CVs Analyzed:</strong> {analyzed}</li>
        <li><strong>Jobs:</strong> {jobs}</li>
        <li><strong>Scan Time:</strong> {time}</li>
    </ul>
    <p>
        <a href="{results_url}"
           style="background-color: #4F46E5; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px; display: inline-block;">
            View Analysis Results
        </a>
    </p>
    <p>Thank you for using Zume!</p>
</body>
</html>"#,
            jobs = job_summary(jobs),
            time = finished_at.format("%Y-%m-%d %H:%M UTC"),
        );
        Self {
            subject: format!("Resume Scan Complete - {analyzed} CVs Analyzed"),
            html,
        }
    }
}

/// First three job titles, then "and N more".
fn job_summary(jobs: &[JobRow]) -> String {
    let mut summary = jobs
        .iter()
        .take(LISTED_JOB_TITLES)
        .map(|j| j.title.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if jobs.len() > LISTED_JOB_TITLES {
        summary.push_str(&format!(" and {} more", jobs.len() - LISTED_JOB_TITLES));
    }
    summary
}
