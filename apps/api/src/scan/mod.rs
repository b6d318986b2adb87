//! Email scan: finds resume attachments in a recruiter's mailbox and scores
//! each one against the recruiter's jobs.
//!
//! `EmailScanWorkflow` talks to the outside world only through the three
//! seams below, so the scheduler and the HTTP handlers can drive it without
//! knowing about Postgres, Gmail or Gemini.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod keywords;
pub mod notification;
pub mod workflow;

pub use workflow::EmailScanWorkflow;

use crate::gmail::{AccessToken, ResumeAttachment, ResumeSearch};
use crate::llm_client::{JobContext, ResumeScore};
use crate::models::analysis::NewResumeAnalysis;
use crate::models::integration::GmailIntegrationRow;
use crate::models::job::JobRow;

/// Outcome of one completed scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub integration_id: Uuid,
    /// Resume attachments found in the mailbox.
    pub found: u32,
    /// Resumes scored and stored.
    pub analyzed: u32,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("integration {0} not found")]
    IntegrationNotFound(Uuid),

    #[error("integration {0} has no refresh token")]
    MissingRefreshToken(Uuid),

    #[error("storage error: {0:#}")]
    Store(anyhow::Error),

    #[error("mail error: {0:#}")]
    Mail(anyhow::Error),
}

/// Runs one scan for an integration. `job_ids` overrides the jobs the
/// integration is configured for.
#[async_trait]
pub trait ScanWorkflow: Send + Sync {
    async fn run(
        &self,
        integration_id: Uuid,
        job_ids: Option<Vec<Uuid>>,
    ) -> Result<ScanReport, ScanError>;
}

/// Persistence used by a scan.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn integration(&self, id: Uuid) -> anyhow::Result<Option<GmailIntegrationRow>>;

    async fn mark_running(&self, id: Uuid) -> anyhow::Result<()>;

    async fn save_access_token(&self, id: Uuid, token: &AccessToken) -> anyhow::Result<()>;

    async fn jobs_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<JobRow>>;

    /// Every job of the recruiter that is not closed.
    async fn open_jobs(&self, recruiter_id: Uuid) -> anyhow::Result<Vec<JobRow>>;

    async fn insert_analysis(&self, analysis: &NewResumeAnalysis) -> anyhow::Result<()>;

    async fn record_success(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        analyzed: u32,
    ) -> anyhow::Result<()>;

    async fn record_failure(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()>;
}

/// The mailbox a scan reads resumes from and sends its summary through.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn refresh_access_token(&self, refresh_token: &str) -> anyhow::Result<AccessToken>;

    async fn fetch_resumes(
        &self,
        access_token: &str,
        search: &ResumeSearch,
    ) -> anyhow::Result<Vec<ResumeAttachment>>;

    async fn send_html(
        &self,
        access_token: &str,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResumeScorer: Send + Sync {
    async fn score(&self, resume_text: &str, job: &JobContext) -> anyhow::Result<ResumeScore>;
}
