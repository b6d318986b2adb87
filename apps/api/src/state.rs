use sqlx::PgPool;

use crate::gmail::GmailClient;
use crate::scheduler::ScanScheduler;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub gmail: GmailClient,
    /// Owns the recurring scan triggers; handlers refresh it after integration changes.
    pub scheduler: ScanScheduler,
}
