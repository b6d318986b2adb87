use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const SCAN_STATUS_RUNNING: &str = "running";
pub const SCAN_STATUS_SUCCESS: &str = "success";
pub const SCAN_STATUS_ERROR: &str = "error";

/// A recruiter's connected Gmail account, its scanning configuration and the
/// outcome of the last scan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GmailIntegrationRow {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    /// hourly | daily | weekly
    pub scan_schedule: String,
    /// HH:MM, used by daily and weekly schedules
    pub scan_time: String,
    pub is_active: bool,
    /// Jobs to scan for; empty means every open job of the recruiter.
    pub job_ids: Vec<Uuid>,
    pub keywords: Vec<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_status: Option<String>,
    pub last_scan_count: i32,
    pub last_error: Option<String>,
    pub send_notifications: bool,
    pub notification_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GmailIntegrationRow {
    /// True when there is no access token or it expires within `skew`.
    pub fn access_token_stale(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        match (&self.access_token, self.token_expiry) {
            (None, _) => true,
            (Some(_), Some(expiry)) => expiry - skew <= now,
            (Some(_), None) => false,
        }
    }

    pub fn notification_recipient(&self) -> &str {
        self.notification_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.email)
    }
}

/// Partial update of an integration's scanning configuration. Absent fields
/// are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationConfigUpdate {
    pub scan_schedule: Option<String>,
    pub scan_time: Option<String>,
    pub is_active: Option<bool>,
    pub job_ids: Option<Vec<Uuid>>,
    pub keywords: Option<Vec<String>>,
    pub send_notifications: Option<bool>,
    pub notification_email: Option<String>,
}
