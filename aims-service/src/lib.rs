pub mod app;
pub mod audit_handlers;
pub mod item_handlers;
pub mod order_flow;
pub mod purchase_request_handlers;
pub mod replenishment_handlers;
pub mod sales_order_handlers;
pub mod stock;
pub mod stock_handlers;

use std::sync::Arc;

use common_audit::{AuditInput, AuditRecorder};
use common_http_errors::ApiError;
use common_observability::ServiceMetrics;
use sqlx::PgPool;

pub const SERVICE_NAME: &str = "aims-service";

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub audit: Arc<AuditRecorder>,
    pub metrics: Arc<ServiceMetrics>,
}

/// Map database failures onto the API taxonomy. Unique violations surface as
/// duplicate-key conflicts (the insert is the arbiter for business numbers),
/// lock-wait timeouts as concurrency conflicts; everything else is opaque.
pub(crate) fn db_error(err: sqlx::Error) -> ApiError {
    if let Some(db) = err.as_database_error() {
        match db.code().as_deref() {
            Some("23505") => {
                let message = match db.constraint() {
                    Some(constraint) => format!("duplicate value for {constraint}"),
                    None => "duplicate value".to_string(),
                };
                return ApiError::duplicate_key(message);
            }
            Some("55P03") => return ApiError::ConcurrencyConflict { trace_id: None },
            Some("23503") => return ApiError::not_found("reference_not_found"),
            _ => {}
        }
    }
    ApiError::internal(err, None)
}

/// Audit persistence is fire-and-forget: a failed insert is counted and
/// logged, never surfaced to the caller.
pub(crate) async fn emit_audit(state: &AppState, input: AuditInput) {
    if state.audit.record(input).await.is_err() {
        state.metrics.audit_emit_failures.inc();
    }
}
