use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::gmail::{AccessToken, OAuthTokens};
use crate::models::analysis::NewResumeAnalysis;
use crate::models::integration::{
    GmailIntegrationRow, IntegrationConfigUpdate, SCAN_STATUS_ERROR, SCAN_STATUS_RUNNING,
    SCAN_STATUS_SUCCESS,
};
use crate::models::job::JobRow;
use crate::scan::ScanStore;
use crate::scheduler::{ScheduleRecord, ScheduleSource};

pub async fn find_by_recruiter(
    pool: &PgPool,
    recruiter_id: Uuid,
) -> Result<Option<GmailIntegrationRow>, sqlx::Error> {
    sqlx::query_as::<_, GmailIntegrationRow>(
        "SELECT * FROM gmail_integrations WHERE recruiter_id = $1",
    )
    .bind(recruiter_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<GmailIntegrationRow>, sqlx::Error> {
    sqlx::query_as::<_, GmailIntegrationRow>("SELECT * FROM gmail_integrations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Creates the recruiter's integration or reconnects the existing one. A
/// grant without a refresh token keeps the stored one.
pub async fn upsert_connection(
    pool: &PgPool,
    recruiter_id: Uuid,
    email: &str,
    tokens: &OAuthTokens,
) -> Result<GmailIntegrationRow, sqlx::Error> {
    sqlx::query_as::<_, GmailIntegrationRow>(
        r#"
        INSERT INTO gmail_integrations
            (recruiter_id, email, access_token, refresh_token, token_expiry, is_active)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        ON CONFLICT (recruiter_id) DO UPDATE SET
            email = EXCLUDED.email,
            access_token = EXCLUDED.access_token,
            refresh_token = COALESCE(EXCLUDED.refresh_token, gmail_integrations.refresh_token),
            token_expiry = EXCLUDED.token_expiry,
            is_active = TRUE,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(recruiter_id)
    .bind(email)
    .bind(&tokens.access.token)
    .bind(&tokens.refresh_token)
    .bind(tokens.access.expires_at)
    .fetch_one(pool)
    .await
}

pub async fn update_config(
    pool: &PgPool,
    recruiter_id: Uuid,
    update: &IntegrationConfigUpdate,
) -> Result<Option<GmailIntegrationRow>, sqlx::Error> {
    sqlx::query_as::<_, GmailIntegrationRow>(
        r#"
        UPDATE gmail_integrations SET
            scan_schedule = COALESCE($2, scan_schedule),
            scan_time = COALESCE($3, scan_time),
            is_active = COALESCE($4, is_active),
            job_ids = COALESCE($5, job_ids),
            keywords = COALESCE($6, keywords),
            send_notifications = COALESCE($7, send_notifications),
            notification_email = COALESCE($8, notification_email),
            updated_at = NOW()
        WHERE recruiter_id = $1
        RETURNING *
        "#,
    )
    .bind(recruiter_id)
    .bind(update.scan_schedule.as_deref().map(str::to_ascii_lowercase))
    .bind(&update.scan_time)
    .bind(update.is_active)
    .bind(&update.job_ids)
    .bind(&update.keywords)
    .bind(update.send_notifications)
    .bind(&update.notification_email)
    .fetch_optional(pool)
    .await
}

/// Deletes the recruiter's integration, returning its id.
pub async fn delete_by_recruiter(
    pool: &PgPool,
    recruiter_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar("DELETE FROM gmail_integrations WHERE recruiter_id = $1 RETURNING id")
        .bind(recruiter_id)
        .fetch_optional(pool)
        .await
}

/// Schedule fields of every integration that can be scanned unattended.
pub async fn active_schedules(pool: &PgPool) -> Result<Vec<ScheduleRecord>, sqlx::Error> {
    let rows: Vec<(Uuid, String, String, String)> = sqlx::query_as(
        r#"
        SELECT id, email, scan_schedule, scan_time
        FROM gmail_integrations
        WHERE is_active = TRUE AND refresh_token IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(integration_id, email, scan_schedule, scan_time)| ScheduleRecord {
                integration_id,
                email,
                scan_schedule,
                scan_time,
            },
        )
        .collect())
}

/// Postgres-backed storage for scans and the scheduler.
#[derive(Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleSource for PgScanStore {
    async fn active_schedules(&self) -> anyhow::Result<Vec<ScheduleRecord>> {
        Ok(active_schedules(&self.pool).await?)
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn integration(&self, id: Uuid) -> anyhow::Result<Option<GmailIntegrationRow>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn mark_running(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE gmail_integrations SET last_scan_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(SCAN_STATUS_RUNNING)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_access_token(&self, id: Uuid, token: &AccessToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE gmail_integrations
            SET access_token = $2, token_expiry = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&token.token)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn jobs_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<JobRow>> {
        Ok(sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE id = ANY($1) ORDER BY created_at",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn open_jobs(&self, recruiter_id: Uuid) -> anyhow::Result<Vec<JobRow>> {
        Ok(sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE recruiter_id = $1 AND status <> 'closed' ORDER BY created_at",
        )
        .bind(recruiter_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_analysis(&self, analysis: &NewResumeAnalysis) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_analyses
                (recruiter_id, integration_id, job_id, candidate_email, resume_text,
                 score, ats_score, readability_score, strengths, weaknesses,
                 suggestions, keyword_matches, missing_keywords, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(analysis.recruiter_id)
        .bind(analysis.integration_id)
        .bind(analysis.job_id)
        .bind(&analysis.candidate_email)
        .bind(&analysis.resume_text)
        .bind(analysis.score)
        .bind(analysis.ats_score)
        .bind(analysis.readability_score)
        .bind(&analysis.strengths)
        .bind(&analysis.weaknesses)
        .bind(&analysis.suggestions)
        .bind(&analysis.keyword_matches)
        .bind(&analysis.missing_keywords)
        .bind(&analysis.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_success(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        analyzed: u32,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE gmail_integrations
            SET last_scan_status = $2, last_scan_at = $3, last_scan_count = $4,
                last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SCAN_STATUS_SUCCESS)
        .bind(finished_at)
        .bind(i32::try_from(analyzed).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE gmail_integrations
            SET last_scan_status = $2, last_scan_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(SCAN_STATUS_ERROR)
        .bind(finished_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
