use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gmail::{ResumeAttachment, ResumeSearch};
use crate::llm_client::{JobContext, ResumeScore};
use crate::models::analysis::{truncate_resume_text, NewResumeAnalysis};
use crate::models::integration::GmailIntegrationRow;
use crate::models::job::JobRow;
use crate::scan::keywords::scan_keywords;
use crate::scan::notification::ScanNotification;
use crate::scan::{MailSource, ResumeScorer, ScanError, ScanReport, ScanStore, ScanWorkflow};

/// Access tokens expiring within this window are refreshed before scanning.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

pub struct EmailScanWorkflow {
    store: Arc<dyn ScanStore>,
    mail: Arc<dyn MailSource>,
    scorer: Arc<dyn ResumeScorer>,
    frontend_url: String,
    max_results: u32,
}

impl EmailScanWorkflow {
    pub fn new(
        store: Arc<dyn ScanStore>,
        mail: Arc<dyn MailSource>,
        scorer: Arc<dyn ResumeScorer>,
        frontend_url: String,
        max_results: u32,
    ) -> Self {
        Self {
            store,
            mail,
            scorer,
            frontend_url,
            max_results,
        }
    }

    async fn scan(
        &self,
        integration: &GmailIntegrationRow,
        job_ids: Option<Vec<Uuid>>,
    ) -> Result<ScanReport, ScanError> {
        let id = integration.id;
        let access_token = self.access_token(integration).await?;

        let jobs = self.jobs(integration, job_ids).await?;
        if jobs.is_empty() {
            warn!("No jobs found for scanning (integration {id})");
            self.store
                .record_success(id, Utc::now(), 0)
                .await
                .map_err(ScanError::Store)?;
            return Ok(ScanReport {
                integration_id: id,
                found: 0,
                analyzed: 0,
            });
        }

        let keywords = scan_keywords(&jobs, &integration.keywords);
        info!("Scanning with keywords: {keywords:?}");
        let search = ResumeSearch {
            keywords,
            after: integration.last_scan_at,
            max_results: self.max_results,
        };
        let resumes = self
            .mail
            .fetch_resumes(&access_token, &search)
            .await
            .map_err(ScanError::Mail)?;
        info!("Found {} resumes to analyze", resumes.len());

        // Every resume is scored against the first job.
        let target = &jobs[0];
        let context = JobContext {
            title: target.title.clone(),
            description: target.description.clone(),
        };
        let mut analyzed = 0u32;
        for resume in &resumes {
            match self.analyze(integration, target, &context, resume).await {
                Ok(()) => {
                    analyzed += 1;
                    info!("Analyzed resume from {}", resume.from);
                }
                Err(e) => error!("Error analyzing resume from {}: {e:#}", resume.from),
            }
        }

        self.store
            .record_success(id, Utc::now(), analyzed)
            .await
            .map_err(ScanError::Store)?;
        info!("Email scan completed. Analyzed {analyzed} resumes.");

        if integration.send_notifications {
            self.notify(integration, &access_token, analyzed, &jobs).await;
        }

        Ok(ScanReport {
            integration_id: id,
            found: resumes.len() as u32,
            analyzed,
        })
    }

    /// A usable access token, refreshed and persisted when missing or about
    /// to expire.
    async fn access_token(&self, integration: &GmailIntegrationRow) -> Result<String, ScanError> {
        let refresh_token = integration
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ScanError::MissingRefreshToken(integration.id))?;

        let skew = chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS);
        match &integration.access_token {
            Some(token) if !integration.access_token_stale(Utc::now(), skew) => Ok(token.clone()),
            _ => {
                let fresh = self
                    .mail
                    .refresh_access_token(refresh_token)
                    .await
                    .map_err(ScanError::Mail)?;
                self.store
                    .save_access_token(integration.id, &fresh)
                    .await
                    .map_err(ScanError::Store)?;
                Ok(fresh.token)
            }
        }
    }

    /// Explicit job ids, else the integration's configured jobs, else every
    /// open job of the recruiter.
    async fn jobs(
        &self,
        integration: &GmailIntegrationRow,
        job_ids: Option<Vec<Uuid>>,
    ) -> Result<Vec<JobRow>, ScanError> {
        let jobs = match job_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => self.store.jobs_by_ids(&ids).await,
            None if !integration.job_ids.is_empty() => {
                self.store.jobs_by_ids(&integration.job_ids).await
            }
            None => self.store.open_jobs(integration.recruiter_id).await,
        };
        jobs.map_err(ScanError::Store)
    }

    async fn analyze(
        &self,
        integration: &GmailIntegrationRow,
        job: &JobRow,
        context: &JobContext,
        resume: &ResumeAttachment,
    ) -> anyhow::Result<()> {
        let score = self.scorer.score(&resume.content, context).await?;
        let analysis = analysis_row(integration, job, resume, score);
        self.store.insert_analysis(&analysis).await
    }

    async fn notify(
        &self,
        integration: &GmailIntegrationRow,
        access_token: &str,
        analyzed: u32,
        jobs: &[JobRow],
    ) {
        let recipient = integration.notification_recipient();
        let notification = ScanNotification::new(analyzed, jobs, &self.frontend_url, Utc::now());
        let sent = self
            .mail
            .send_html(
                access_token,
                &integration.email,
                recipient,
                &notification.subject,
                &notification.html,
            )
            .await;
        match sent {
            Ok(()) => info!("Notification email sent to {recipient}"),
            Err(e) => error!("Error sending notification email: {e:#}"),
        }
    }
}

fn analysis_row(
    integration: &GmailIntegrationRow,
    job: &JobRow,
    resume: &ResumeAttachment,
    score: ResumeScore,
) -> NewResumeAnalysis {
    NewResumeAnalysis {
        recruiter_id: integration.recruiter_id,
        integration_id: integration.id,
        job_id: Some(job.id),
        candidate_email: resume.from.clone(),
        resume_text: truncate_resume_text(&resume.content),
        score: score.score,
        ats_score: score.ats_score,
        readability_score: score.readability_score,
        strengths: score.strengths,
        weaknesses: score.weaknesses,
        suggestions: serde_json::to_value(&score.suggestions).unwrap_or_default(),
        keyword_matches: score.keyword_matches,
        missing_keywords: score.missing_keywords,
        metadata: json!({
            "source": "gmail",
            "email_id": resume.email_id,
            "subject": resume.subject,
            "filename": resume.filename,
            "date": resume.date,
        }),
    }
}

#[async_trait]
impl ScanWorkflow for EmailScanWorkflow {
    async fn run(
        &self,
        integration_id: Uuid,
        job_ids: Option<Vec<Uuid>>,
    ) -> Result<ScanReport, ScanError> {
        info!("Starting email scan for integration {integration_id}");

        let integration = match self.store.integration(integration_id).await {
            Ok(Some(integration)) => integration,
            Ok(None) => {
                error!("Integration {integration_id} not found");
                return Err(ScanError::IntegrationNotFound(integration_id));
            }
            Err(e) => return Err(ScanError::Store(e)),
        };

        self.store
            .mark_running(integration_id)
            .await
            .map_err(ScanError::Store)?;

        let result = self.scan(&integration, job_ids).await;
        if let Err(e) = &result {
            error!("Error in email scan for {integration_id}: {e}");
            if let Err(save_error) = self
                .store
                .record_failure(integration_id, Utc::now(), &e.to_string())
                .await
            {
                error!("Error saving error status: {save_error:#}");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::AccessToken;
    use crate::llm_client::Suggestion;
    use crate::models::analysis::MAX_STORED_RESUME_CHARS;
    use crate::models::integration::fixtures;
    use crate::scan::keywords::fixtures::job;
    use chrono::{DateTime, TimeZone};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum StatusEvent {
        Running,
        Success(u32),
        Failure(String),
    }

    #[derive(Default)]
    struct FakeStore {
        integration: Mutex<Option<GmailIntegrationRow>>,
        jobs: Mutex<Vec<JobRow>>,
        analyses: Mutex<Vec<NewResumeAnalysis>>,
        events: Mutex<Vec<StatusEvent>>,
        saved_tokens: Mutex<Vec<AccessToken>>,
    }

    impl FakeStore {
        fn with(integration: GmailIntegrationRow, jobs: Vec<JobRow>) -> Self {
            let store = Self::default();
            *store.integration.lock().unwrap() = Some(integration);
            *store.jobs.lock().unwrap() = jobs;
            store
        }

        fn events(&self) -> Vec<StatusEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScanStore for FakeStore {
        async fn integration(&self, id: Uuid) -> anyhow::Result<Option<GmailIntegrationRow>> {
            Ok(self
                .integration
                .lock()
                .unwrap()
                .clone()
                .filter(|i| i.id == id))
        }

        async fn mark_running(&self, _id: Uuid) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(StatusEvent::Running);
            Ok(())
        }

        async fn save_access_token(&self, _id: Uuid, token: &AccessToken) -> anyhow::Result<()> {
            self.saved_tokens.lock().unwrap().push(token.clone());
            Ok(())
        }

        async fn jobs_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<JobRow>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| ids.contains(&j.id))
                .cloned()
                .collect())
        }

        async fn open_jobs(&self, recruiter_id: Uuid) -> anyhow::Result<Vec<JobRow>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.recruiter_id == recruiter_id && j.status != "closed")
                .cloned()
                .collect())
        }

        async fn insert_analysis(&self, analysis: &NewResumeAnalysis) -> anyhow::Result<()> {
            self.analyses.lock().unwrap().push(analysis.clone());
            Ok(())
        }

        async fn record_success(
            &self,
            _id: Uuid,
            _finished_at: DateTime<Utc>,
            analyzed: u32,
        ) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(StatusEvent::Success(analyzed));
            Ok(())
        }

        async fn record_failure(
            &self,
            _id: Uuid,
            _finished_at: DateTime<Utc>,
            error: &str,
        ) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(StatusEvent::Failure(error.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMail {
        resumes: Vec<ResumeAttachment>,
        fail_fetch: bool,
        fail_send: bool,
        searches: Mutex<Vec<(String, ResumeSearch)>>,
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl MailSource for FakeMail {
        async fn refresh_access_token(&self, refresh_token: &str) -> anyhow::Result<AccessToken> {
            Ok(AccessToken {
                token: format!("fresh-for-{refresh_token}"),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            })
        }

        async fn fetch_resumes(
            &self,
            access_token: &str,
            search: &ResumeSearch,
        ) -> anyhow::Result<Vec<ResumeAttachment>> {
            self.searches
                .lock()
                .unwrap()
                .push((access_token.to_string(), search.clone()));
            if self.fail_fetch {
                anyhow::bail!("Gmail API returned an error status: 401 Unauthorized");
            }
            Ok(self.resumes.clone())
        }

        async fn send_html(
            &self,
            _access_token: &str,
            from: &str,
            to: &str,
            subject: &str,
            _html: &str,
        ) -> anyhow::Result<()> {
            if self.fail_send {
                anyhow::bail!("send failed");
            }
            self.sent
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    /// Scores everything 80 except resumes containing "corrupt".
    struct FakeScorer;

    #[async_trait]
    impl ResumeScorer for FakeScorer {
        async fn score(&self, resume_text: &str, job: &JobContext) -> anyhow::Result<ResumeScore> {
            if resume_text.contains("corrupt") {
                anyhow::bail!("LLM returned empty content");
            }
            Ok(ResumeScore {
                score: 80.0,
                ats_score: 75.0,
                readability_score: 90.0,
                keyword_match: 60.0,
                strengths: vec![format!("Relevant to {}", job.title)],
                weaknesses: vec![],
                suggestions: vec![Suggestion {
                    category: "Skills".to_string(),
                    issue: "No cloud experience".to_string(),
                    fix: "Add AWS projects".to_string(),
                    priority: "high".to_string(),
                }],
                keyword_matches: vec!["Rust".to_string()],
                missing_keywords: vec!["AWS".to_string()],
            })
        }
    }

    fn resume(from: &str, content: &str) -> ResumeAttachment {
        ResumeAttachment {
            email_id: format!("msg-{from}"),
            subject: "Application: Backend Engineer".to_string(),
            from: from.to_string(),
            date: "Mon, 4 Mar 2024 09:12:00 +0000".to_string(),
            filename: "resume.pdf".to_string(),
            content: content.to_string(),
            mime_type: "application/pdf".to_string(),
        }
    }

    fn workflow(store: Arc<FakeStore>, mail: Arc<FakeMail>) -> EmailScanWorkflow {
        EmailScanWorkflow::new(
            store,
            mail,
            Arc::new(FakeScorer),
            "http://localhost:3000".to_string(),
            50,
        )
    }

    #[tokio::test]
    async fn test_scan_scores_resumes_and_records_success() {
        let mut integration = fixtures::integration();
        integration.keywords = vec!["Kubernetes".to_string()];
        integration.last_scan_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let backend = job(integration.recruiter_id, "Backend Engineer", "");
        let backend_id = backend.id;
        let store = Arc::new(FakeStore::with(integration.clone(), vec![backend]));
        let mail = Arc::new(FakeMail {
            resumes: vec![
                resume("jane@example.com", &"x".repeat(MAX_STORED_RESUME_CHARS + 100)),
                resume("bob@example.com", "corrupt"),
            ],
            ..Default::default()
        });

        let report = workflow(store.clone(), mail.clone())
            .run(integration.id, None)
            .await
            .unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.analyzed, 1);
        assert_eq!(
            store.events(),
            vec![StatusEvent::Running, StatusEvent::Success(1)]
        );

        let searches = mail.searches.lock().unwrap();
        let (token, search) = &searches[0];
        assert_eq!(token, "ya29.token");
        assert_eq!(search.keywords, vec!["Backend Engineer", "Kubernetes"]);
        assert_eq!(search.after, integration.last_scan_at);
        assert_eq!(search.max_results, 50);

        let analyses = store.analyses.lock().unwrap();
        assert_eq!(analyses.len(), 1);
        let analysis = &analyses[0];
        assert_eq!(analysis.candidate_email, "jane@example.com");
        assert_eq!(analysis.job_id, Some(backend_id));
        assert_eq!(analysis.resume_text.len(), MAX_STORED_RESUME_CHARS);
        assert_eq!(analysis.metadata["source"], "gmail");
        assert_eq!(analysis.metadata["email_id"], "msg-jane@example.com");
        assert_eq!(analysis.suggestions[0]["priority"], "high");
        assert_eq!(analysis.missing_keywords, vec!["AWS"]);

        let sent = mail.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![(
                "recruiter@example.com".to_string(),
                "recruiter@example.com".to_string(),
                "Resume Scan Complete - 1 CVs Analyzed".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_unknown_integration_records_nothing() {
        let store = Arc::new(FakeStore::default());
        let mail = Arc::new(FakeMail::default());
        let missing = Uuid::new_v4();

        let result = workflow(store.clone(), mail).run(missing, None).await;

        assert!(matches!(result, Err(ScanError::IntegrationNotFound(id)) if id == missing));
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_records_error() {
        let mut integration = fixtures::integration();
        integration.refresh_token = None;
        let store = Arc::new(FakeStore::with(integration.clone(), vec![]));
        let mail = Arc::new(FakeMail::default());

        let result = workflow(store.clone(), mail.clone())
            .run(integration.id, None)
            .await;

        assert!(matches!(result, Err(ScanError::MissingRefreshToken(_))));
        let events = store.events();
        assert_eq!(events[0], StatusEvent::Running);
        assert!(matches!(&events[1], StatusEvent::Failure(msg) if msg.contains("refresh token")));
        assert!(mail.searches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_access_token_is_refreshed_and_saved() {
        let mut integration = fixtures::integration();
        integration.token_expiry = Some(Utc::now() - chrono::Duration::minutes(5));
        let jobs = vec![job(integration.recruiter_id, "Backend Engineer", "")];
        let store = Arc::new(FakeStore::with(integration.clone(), jobs));
        let mail = Arc::new(FakeMail::default());

        workflow(store.clone(), mail.clone())
            .run(integration.id, None)
            .await
            .unwrap();

        let saved = store.saved_tokens.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].token, "fresh-for-1//refresh");
        assert_eq!(mail.searches.lock().unwrap()[0].0, "fresh-for-1//refresh");
    }

    #[tokio::test]
    async fn test_no_jobs_succeeds_without_searching() {
        let integration = fixtures::integration();
        let mut closed = job(integration.recruiter_id, "Old Role", "");
        closed.status = "closed".to_string();
        let store = Arc::new(FakeStore::with(integration.clone(), vec![closed]));
        let mail = Arc::new(FakeMail::default());

        let report = workflow(store.clone(), mail.clone())
            .run(integration.id, None)
            .await
            .unwrap();

        assert_eq!(report.analyzed, 0);
        assert_eq!(
            store.events(),
            vec![StatusEvent::Running, StatusEvent::Success(0)]
        );
        assert!(mail.searches.lock().unwrap().is_empty());
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_selection_precedence() {
        let mut integration = fixtures::integration();
        let recruiter = integration.recruiter_id;
        let configured = job(recruiter, "Configured Role", "");
        let explicit = job(recruiter, "Explicit Role", "");
        let other_open = job(recruiter, "Other Role", "");
        integration.job_ids = vec![configured.id];
        let explicit_id = explicit.id;
        let store = Arc::new(FakeStore::with(
            integration.clone(),
            vec![configured, explicit, other_open],
        ));
        let mail = Arc::new(FakeMail::default());
        let workflow = workflow(store, mail.clone());

        workflow
            .run(integration.id, Some(vec![explicit_id]))
            .await
            .unwrap();
        workflow.run(integration.id, None).await.unwrap();

        let searches = mail.searches.lock().unwrap();
        assert_eq!(searches[0].1.keywords, vec!["Explicit Role"]);
        assert_eq!(searches[1].1.keywords, vec!["Configured Role"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_records_error() {
        let integration = fixtures::integration();
        let jobs = vec![job(integration.recruiter_id, "Backend Engineer", "")];
        let store = Arc::new(FakeStore::with(integration.clone(), jobs));
        let mail = Arc::new(FakeMail {
            fail_fetch: true,
            ..Default::default()
        });

        let result = workflow(store.clone(), mail).run(integration.id, None).await;

        assert!(matches!(result, Err(ScanError::Mail(_))));
        assert!(matches!(
            &store.events()[1],
            StatusEvent::Failure(msg) if msg.contains("401")
        ));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_scan() {
        let mut integration = fixtures::integration();
        integration.notification_email = Some("hiring@example.com".to_string());
        let jobs = vec![job(integration.recruiter_id, "Backend Engineer", "")];
        let store = Arc::new(FakeStore::with(integration.clone(), jobs));
        let mail = Arc::new(FakeMail {
            resumes: vec![resume("jane@example.com", "Rust engineer")],
            fail_send: true,
            ..Default::default()
        });

        let report = workflow(store.clone(), mail)
            .run(integration.id, None)
            .await
            .unwrap();

        assert_eq!(report.analyzed, 1);
        assert_eq!(
            store.events(),
            vec![StatusEvent::Running, StatusEvent::Success(1)]
        );
    }

    #[tokio::test]
    async fn test_notifications_disabled() {
        let mut integration = fixtures::integration();
        integration.send_notifications = false;
        let jobs = vec![job(integration.recruiter_id, "Backend Engineer", "")];
        let store = Arc::new(FakeStore::with(integration.clone(), jobs));
        let mail = Arc::new(FakeMail::default());

        workflow(store, mail.clone())
            .run(integration.id, None)
            .await
            .unwrap();

        assert!(mail.sent.lock().unwrap().is_empty());
    }
}
