use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::integrations::repository;
use crate::models::integration::{GmailIntegrationRow, IntegrationConfigUpdate};
use crate::scheduler::{ScanTime, ScheduleKind};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RecruiterQuery {
    pub recruiter_id: Uuid,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanNowRequest {
    #[serde(default)]
    pub job_ids: Option<Vec<Uuid>>,
}

/// `{"status": "success", "message"?: ..., "data"?: ...}`
#[derive(Serialize)]
pub struct ApiResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    fn data(data: Value) -> Json<Self> {
        Json(Self {
            status: "success",
            message: None,
            data: Some(data),
        })
    }

    fn message(message: &str, data: Option<Value>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: Some(message.to_string()),
            data,
        })
    }
}

fn not_connected() -> AppError {
    AppError::NotFound("No Gmail integration found".to_string())
}

/// GET /api/v1/gmail/status
pub async fn handle_status(
    State(state): State<AppState>,
    Query(params): Query<RecruiterQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    let integration = repository::find_by_recruiter(&state.db, params.recruiter_id).await?;

    let data = match integration {
        None => json!({
            "connected": false,
            "email": null,
            "is_active": false,
        }),
        Some(integration) => {
            let next_scan_at = state.scheduler.next_fire(integration.id);
            json!({
                "connected": true,
                "email": integration.email,
                "is_active": integration.is_active,
                "scan_schedule": integration.scan_schedule,
                "scan_time": integration.scan_time,
                "job_ids": integration.job_ids,
                "keywords": integration.keywords,
                "last_scan_at": integration.last_scan_at,
                "last_scan_status": integration.last_scan_status,
                "last_scan_count": integration.last_scan_count,
                "last_error": integration.last_error,
                "send_notifications": integration.send_notifications,
                "notification_email": integration.notification_email,
                "next_scan_at": next_scan_at,
            })
        }
    };
    Ok(ApiResponse::data(data))
}

/// POST /api/v1/gmail/connect
pub async fn handle_connect(
    State(state): State<AppState>,
    Query(params): Query<RecruiterQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    let oauth_state = format!("{}:{}", Uuid::new_v4().simple(), params.recruiter_id);
    let auth_url = state.gmail.authorization_url(&oauth_state)?;
    Ok(ApiResponse::data(json!({
        "auth_url": auth_url,
        "state": oauth_state,
    })))
}

/// GET /api/v1/gmail/callback
pub async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    let recruiter_id = recruiter_from_state(&params.state)?;

    let tokens = state
        .gmail
        .exchange_code(&params.code)
        .await
        .map_err(|e| AppError::Gmail(format!("{e:#}")))?;
    let email = state
        .gmail
        .profile_email(&tokens.access.token)
        .await
        .map_err(|e| AppError::Gmail(format!("{e:#}")))?;

    let integration =
        repository::upsert_connection(&state.db, recruiter_id, &email, &tokens).await?;
    info!("Gmail connected successfully for recruiter {recruiter_id}");
    refresh_scheduler(&state).await;

    Ok(ApiResponse::message(
        "Gmail connected successfully",
        Some(json!({
            "email": integration.email,
            "connected": true,
        })),
    ))
}

/// PUT /api/v1/gmail/config
pub async fn handle_update_config(
    State(state): State<AppState>,
    Query(params): Query<RecruiterQuery>,
    Json(update): Json<IntegrationConfigUpdate>,
) -> Result<Json<ApiResponse>, AppError> {
    let existing = repository::find_by_recruiter(&state.db, params.recruiter_id)
        .await?
        .ok_or_else(not_connected)?;
    validate_schedule(&existing, &update)?;

    let integration = repository::update_config(&state.db, params.recruiter_id, &update)
        .await?
        .ok_or_else(not_connected)?;
    refresh_scheduler(&state).await;

    Ok(ApiResponse::message(
        "Configuration updated successfully",
        Some(json!({
            "scan_schedule": integration.scan_schedule,
            "scan_time": integration.scan_time,
            "is_active": integration.is_active,
            "job_ids": integration.job_ids,
            "keywords": integration.keywords,
            "next_scan_at": state.scheduler.next_fire(integration.id),
        })),
    ))
}

/// POST /api/v1/gmail/disconnect
pub async fn handle_disconnect(
    State(state): State<AppState>,
    Query(params): Query<RecruiterQuery>,
) -> Result<Json<ApiResponse>, AppError> {
    let integration_id = repository::delete_by_recruiter(&state.db, params.recruiter_id)
        .await?
        .ok_or_else(not_connected)?;
    state.scheduler.remove(integration_id);
    info!("Gmail disconnected for recruiter {}", params.recruiter_id);

    Ok(ApiResponse::message("Gmail disconnected successfully", None))
}

/// POST /api/v1/gmail/scan-now
pub async fn handle_scan_now(
    State(state): State<AppState>,
    Query(params): Query<RecruiterQuery>,
    Json(req): Json<ScanNowRequest>,
) -> Result<Json<ApiResponse>, AppError> {
    let integration = repository::find_by_recruiter(&state.db, params.recruiter_id)
        .await?
        .ok_or_else(not_connected)?;
    if integration.refresh_token.as_deref().map_or(true, str::is_empty) {
        return Err(AppError::Validation(
            "No refresh token available. Please reconnect Gmail.".to_string(),
        ));
    }

    let job_ids = manual_scan_jobs(&integration, req.job_ids);
    if !state.scheduler.trigger_now(integration.id, job_ids) {
        return Err(AppError::Conflict(
            "A scan is already running for this integration".to_string(),
        ));
    }

    Ok(ApiResponse::message(
        "Scan initiated. You will receive an email notification when complete.",
        Some(json!({ "scan_initiated_at": Utc::now() })),
    ))
}

/// The OAuth state is `<random>:<recruiter_id>`.
fn recruiter_from_state(state: &str) -> Result<Uuid, AppError> {
    state
        .rsplit_once(':')
        .and_then(|(_, recruiter)| recruiter.parse().ok())
        .ok_or_else(|| AppError::Validation("Invalid state parameter".to_string()))
}

/// Rejects updates whose resulting schedule the scheduler could not run.
fn validate_schedule(
    existing: &GmailIntegrationRow,
    update: &IntegrationConfigUpdate,
) -> Result<(), AppError> {
    if let Some(scan_time) = &update.scan_time {
        scan_time
            .parse::<ScanTime>()
            .map_err(|e| AppError::Validation(e.to_string()))?;
    }
    let schedule = update
        .scan_schedule
        .as_deref()
        .unwrap_or(&existing.scan_schedule);
    let scan_time = update.scan_time.as_deref().unwrap_or(&existing.scan_time);
    ScheduleKind::parse(schedule, scan_time)
        .map(|_| ())
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// Explicit job ids, else the integration's configured ones, else `None` so
/// the scan falls back to every open job.
fn manual_scan_jobs(
    integration: &GmailIntegrationRow,
    requested: Option<Vec<Uuid>>,
) -> Option<Vec<Uuid>> {
    requested
        .filter(|ids| !ids.is_empty())
        .or_else(|| Some(integration.job_ids.clone()).filter(|ids| !ids.is_empty()))
}

async fn refresh_scheduler(state: &AppState) {
    if let Err(e) = state.scheduler.refresh().await {
        error!("Failed to refresh scan scheduler: {e:#}");
    }
}
