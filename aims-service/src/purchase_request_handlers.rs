use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use common_audit::{AuditAction, AuditInput};
use common_context::{CallerContext, CallerCtxExtractor};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{query_as, PgPool};
use uuid::Uuid;

use crate::order_flow::{
    ensure_items_active, latest_number, run_transition, validate_lines, validate_number,
    LatestNumber, OrderKind, StockEffect, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED,
};
use crate::{db_error, emit_audit, AppState};

const KIND: OrderKind = OrderKind::PurchaseRequest;

const PR_COLUMNS: &str = "id, pr_number, request_date, notes, status, requested_by, \
     requested_by_name, approved_by, approved_by_name, approved_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseRequestRecord {
    pub id: Uuid,
    pub pr_number: String,
    pub request_date: NaiveDate,
    pub notes: Option<String>,
    pub status: String,
    pub requested_by: Option<Uuid>,
    pub requested_by_name: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_by_name: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PurchaseRequestLineView {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct PurchaseRequestView {
    #[serde(flatten)]
    pub header: PurchaseRequestRecord,
    pub items: Vec<PurchaseRequestLineView>,
}

#[derive(Debug, Deserialize)]
pub struct NewPurchaseRequestLine {
    pub item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct NewPurchaseRequest {
    pub pr_number: String,
    pub request_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<NewPurchaseRequestLine>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdatePurchaseRequest {
    pub request_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

fn header_snapshot(record: &PurchaseRequestRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

async fn fetch_view(db: &PgPool, request_id: Uuid) -> Result<PurchaseRequestView, ApiError> {
    let header_sql = format!("SELECT {PR_COLUMNS} FROM purchase_requests WHERE id = $1");
    let header = query_as::<_, PurchaseRequestRecord>(&header_sql)
        .bind(request_id)
        .fetch_optional(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    let items = query_as::<_, PurchaseRequestLineView>(
        "SELECT l.id, l.item_id, i.name AS item_name, l.quantity \
         FROM purchase_request_items l JOIN items i ON i.id = l.item_id \
         WHERE l.request_id = $1 ORDER BY l.item_id ASC",
    )
    .bind(request_id)
    .fetch_all(db)
    .await
    .map_err(db_error)?;
    Ok(PurchaseRequestView { header, items })
}

pub async fn create_purchase_request(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<NewPurchaseRequest>,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    validate_number(&payload.pr_number, "pr_number")?;
    let pairs: Vec<(Uuid, i32)> = payload
        .items
        .iter()
        .map(|line| (line.item_id, line.quantity))
        .collect();
    validate_lines(&pairs)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let insert_sql = format!(
        "INSERT INTO purchase_requests \
         (id, pr_number, request_date, notes, requested_by, requested_by_name) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {PR_COLUMNS}"
    );
    let header = query_as::<_, PurchaseRequestRecord>(&insert_sql)
        .bind(Uuid::new_v4())
        .bind(payload.pr_number.trim())
        .bind(payload.request_date)
        .bind(&payload.notes)
        .bind(ctx.actor.id)
        .bind(&ctx.actor.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    ensure_items_active(&mut tx, &pairs).await?;
    for line in &payload.items {
        sqlx::query(
            "INSERT INTO purchase_request_items (id, request_id, item_id, quantity) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(header.id)
        .bind(line.item_id)
        .bind(line.quantity)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;

    tracing::info!(request_id = %header.id, pr_number = %header.pr_number, "purchase request created");
    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Created,
            entity: Some((KIND.entity_kind(), header.id)),
            old_values: None,
            new_values: header_snapshot(&header),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(fetch_view(&state.db, header.id).await?))
}

pub async fn list_purchase_requests(
    State(state): State<AppState>,
) -> Result<Json<Vec<PurchaseRequestRecord>>, ApiError> {
    let sql = format!(
        "SELECT {PR_COLUMNS} FROM purchase_requests ORDER BY created_at DESC LIMIT 200"
    );
    let records = query_as::<_, PurchaseRequestRecord>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    Ok(Json(records))
}

pub async fn get_purchase_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    Ok(Json(fetch_view(&state.db, request_id).await?))
}

pub async fn update_purchase_request(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpdatePurchaseRequest>,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let select_sql = format!("SELECT {PR_COLUMNS} FROM purchase_requests WHERE id = $1 FOR UPDATE");
    let old = query_as::<_, PurchaseRequestRecord>(&select_sql)
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    if old.status != STATUS_PENDING {
        return Err(ApiError::invalid_state(format!(
            "purchase request {} is {}, not pending",
            old.pr_number, old.status
        )));
    }

    let update_sql = format!(
        "UPDATE purchase_requests SET \
         request_date = COALESCE($2, request_date), \
         notes = COALESCE($3, notes), \
         updated_at = now() \
         WHERE id = $1 RETURNING {PR_COLUMNS}"
    );
    let updated = query_as::<_, PurchaseRequestRecord>(&update_sql)
        .bind(request_id)
        .bind(payload.request_date)
        .bind(&payload.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Updated,
            entity: Some((KIND.entity_kind(), request_id)),
            old_values: header_snapshot(&old),
            new_values: header_snapshot(&updated),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(fetch_view(&state.db, request_id).await?))
}

/// Approval and rejection share everything but the target status; neither
/// touches stock.
async fn transition(
    state: AppState,
    ctx: CallerContext,
    request_id: Uuid,
    target_status: &'static str,
    action: AuditAction,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    let timer = state.metrics.transition_duration_seconds.start_timer();
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let outcome = run_transition(&mut tx, KIND, request_id, target_status, StockEffect::None).await?;
    sqlx::query(
        "UPDATE purchase_requests SET approved_by = $2, approved_by_name = $3, \
         approved_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(request_id)
    .bind(ctx.actor.id)
    .bind(&ctx.actor.name)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;
    tx.commit().await.map_err(db_error)?;
    drop(timer);

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[KIND.metric_label(), target_status])
        .inc();
    tracing::info!(request_id = %request_id, pr_number = %outcome.number, status = target_status, "purchase request transition");

    let view = fetch_view(&state.db, request_id).await?;
    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action,
            entity: Some((KIND.entity_kind(), request_id)),
            old_values: Some(json!({
                "status": STATUS_PENDING,
                "approved_by": null,
                "approved_by_name": null,
                "approved_at": null,
            })),
            new_values: Some(json!({
                "status": view.header.status,
                "approved_by": view.header.approved_by,
                "approved_by_name": view.header.approved_by_name,
                "approved_at": view.header.approved_at,
            })),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(view))
}

pub async fn approve_purchase_request(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(request_id): Path<Uuid>,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    transition(state, ctx, request_id, STATUS_APPROVED, AuditAction::Approved).await
}

pub async fn reject_purchase_request(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(request_id): Path<Uuid>,
) -> Result<Json<PurchaseRequestView>, ApiError> {
    transition(state, ctx, request_id, STATUS_REJECTED, AuditAction::Rejected).await
}

pub async fn latest_purchase_request_number(
    State(state): State<AppState>,
) -> Result<Json<LatestNumber>, ApiError> {
    Ok(Json(latest_number(&state.db, KIND).await?))
}
