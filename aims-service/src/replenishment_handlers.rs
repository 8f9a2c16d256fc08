use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use common_audit::{AuditAction, AuditInput, EntityKind};
use common_context::{CallerContext, CallerCtxExtractor};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{query_as, PgPool};
use uuid::Uuid;

use crate::order_flow::{
    compute_totals, ensure_items_active, latest_number, run_transition, validate_lines,
    validate_number, LatestNumber, OrderKind, StockEffect, STATUS_APPROVED, STATUS_CANCELLED,
    STATUS_PENDING,
};
use crate::stock::RecordedMovement;
use crate::{db_error, emit_audit, AppState};

const KIND: OrderKind = OrderKind::Replenishment;

const RO_COLUMNS: &str =
    "id, po_number, supplier_id, order_date, status, total_cents, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReplenishmentOrderRecord {
    pub id: Uuid,
    pub po_number: String,
    pub supplier_id: Option<Uuid>,
    pub order_date: NaiveDate,
    pub status: String,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReplenishmentLineView {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub quantity: i32,
    pub unit_cost_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct ReplenishmentOrderView {
    #[serde(flatten)]
    pub header: ReplenishmentOrderRecord,
    pub items: Vec<ReplenishmentLineView>,
}

#[derive(Debug, Deserialize)]
pub struct NewReplenishmentLine {
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_cost_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct NewReplenishmentOrder {
    pub po_number: String,
    #[serde(default)]
    pub supplier_id: Option<Uuid>,
    pub order_date: NaiveDate,
    #[serde(default)]
    pub items: Vec<NewReplenishmentLine>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateReplenishmentOrder {
    pub supplier_id: Option<Uuid>,
    pub order_date: Option<NaiveDate>,
}

fn header_snapshot(record: &ReplenishmentOrderRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

async fn fetch_view(db: &PgPool, order_id: Uuid) -> Result<ReplenishmentOrderView, ApiError> {
    let header_sql = format!("SELECT {RO_COLUMNS} FROM replenishment_orders WHERE id = $1");
    let header = query_as::<_, ReplenishmentOrderRecord>(&header_sql)
        .bind(order_id)
        .fetch_optional(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    let items = query_as::<_, ReplenishmentLineView>(
        "SELECT l.id, l.item_id, i.name AS item_name, l.quantity, l.unit_cost_cents, l.subtotal_cents \
         FROM replenishment_order_items l JOIN items i ON i.id = l.item_id \
         WHERE l.order_id = $1 ORDER BY l.item_id ASC",
    )
    .bind(order_id)
    .fetch_all(db)
    .await
    .map_err(db_error)?;
    Ok(ReplenishmentOrderView { header, items })
}

pub async fn create_replenishment_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<NewReplenishmentOrder>,
) -> Result<Json<ReplenishmentOrderView>, ApiError> {
    validate_number(&payload.po_number, "po_number")?;
    let pairs: Vec<(Uuid, i32)> = payload
        .items
        .iter()
        .map(|line| (line.item_id, line.quantity))
        .collect();
    validate_lines(&pairs)?;
    for line in &payload.items {
        if line.unit_cost_cents < 0 {
            return Err(ApiError::validation_msg(
                "invalid_amount",
                Some("unit_cost_cents"),
                format!("unit cost for item {} must not be negative", line.item_id),
            ));
        }
    }
    // The header total is derived from the lines; client-sent totals have no
    // say in it.
    let cents: Vec<(i32, i64)> = payload
        .items
        .iter()
        .map(|line| (line.quantity, line.unit_cost_cents))
        .collect();
    let (subtotals, total) = compute_totals(&cents)
        .ok_or_else(|| ApiError::validation("amount_overflow", Some("unit_cost_cents")))?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let insert_sql = format!(
        "INSERT INTO replenishment_orders (id, po_number, supplier_id, order_date, total_cents) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {RO_COLUMNS}"
    );
    let header = query_as::<_, ReplenishmentOrderRecord>(&insert_sql)
        .bind(Uuid::new_v4())
        .bind(payload.po_number.trim())
        .bind(payload.supplier_id)
        .bind(payload.order_date)
        .bind(total)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    ensure_items_active(&mut tx, &pairs).await?;
    for (line, subtotal) in payload.items.iter().zip(subtotals) {
        sqlx::query(
            "INSERT INTO replenishment_order_items \
             (id, order_id, item_id, quantity, unit_cost_cents, subtotal_cents) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(header.id)
        .bind(line.item_id)
        .bind(line.quantity)
        .bind(line.unit_cost_cents)
        .bind(subtotal)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;

    tracing::info!(order_id = %header.id, po_number = %header.po_number, total_cents = total, "replenishment order created");
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

pub async fn list_replenishment_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReplenishmentOrderRecord>>, ApiError> {
    let sql = format!(
        "SELECT {RO_COLUMNS} FROM replenishment_orders ORDER BY created_at DESC LIMIT 200"
    );
    let records = query_as::<_, ReplenishmentOrderRecord>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    Ok(Json(records))
}

pub async fn get_replenishment_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ReplenishmentOrderView>, ApiError> {
    Ok(Json(fetch_view(&state.db, order_id).await?))
}

pub async fn update_replenishment_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateReplenishmentOrder>,
) -> Result<Json<ReplenishmentOrderView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let select_sql =
        format!("SELECT {RO_COLUMNS} FROM replenishment_orders WHERE id = $1 FOR UPDATE");
    let old = query_as::<_, ReplenishmentOrderRecord>(&select_sql)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    if old.status != STATUS_PENDING {
        return Err(ApiError::invalid_state(format!(
            "replenishment order {} is {}, not pending",
            old.po_number, old.status
        )));
    }

    let update_sql = format!(
        "UPDATE replenishment_orders SET \
         supplier_id = COALESCE($2, supplier_id), \
         order_date = COALESCE($3, order_date), \
         updated_at = now() \
         WHERE id = $1 RETURNING {RO_COLUMNS}"
    );
    let updated = query_as::<_, ReplenishmentOrderRecord>(&update_sql)
        .bind(order_id)
        .bind(payload.supplier_id)
        .bind(payload.order_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Updated,
            entity: Some((KIND.entity_kind(), order_id)),
            old_values: header_snapshot(&old),
            new_values: header_snapshot(&updated),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(fetch_view(&state.db, order_id).await?))
}

async fn audit_stock_in(state: &AppState, ctx: &CallerContext, recorded: &RecordedMovement) {
    emit_audit(
        state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::StockIn,
            entity: Some((EntityKind::Item, recorded.movement.item_id)),
            old_values: Some(json!({ "current_stock": recorded.stock_before })),
            new_values: Some(json!({ "current_stock": recorded.stock_after })),
            module: None,
            description: Some(format!(
                "stock_in x{} ({})",
                recorded.movement.quantity,
                recorded.movement.reference.as_deref().unwrap_or(""),
            )),
            meta: ctx.request_meta(),
        },
    )
    .await;
}

/// Approval is the terminal-producing transition: one IN movement per line,
/// all inside the same transaction as the status flip.
pub async fn approve_replenishment_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ReplenishmentOrderView>, ApiError> {
    let timer = state.metrics.transition_duration_seconds.start_timer();
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let outcome =
        run_transition(&mut tx, KIND, order_id, STATUS_APPROVED, StockEffect::StockIn).await?;
    tx.commit().await.map_err(db_error)?;
    drop(timer);

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[KIND.metric_label(), STATUS_APPROVED])
        .inc();
    for _ in &outcome.movements {
        state
            .metrics
            .stock_movements_total
            .with_label_values(&["IN"])
            .inc();
    }
    tracing::info!(
        order_id = %order_id,
        po_number = %outcome.number,
        movements = outcome.movements.len(),
        "replenishment order approved"
    );

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Approved,
            entity: Some((KIND.entity_kind(), order_id)),
            old_values: Some(json!({ "status": STATUS_PENDING })),
            new_values: Some(json!({ "status": STATUS_APPROVED })),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;
    for recorded in &outcome.movements {
        audit_stock_in(&state, &ctx, recorded).await;
    }

    Ok(Json(fetch_view(&state.db, order_id).await?))
}

pub async fn cancel_replenishment_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ReplenishmentOrderView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let outcome =
        run_transition(&mut tx, KIND, order_id, STATUS_CANCELLED, StockEffect::None).await?;
    tx.commit().await.map_err(db_error)?;

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[KIND.metric_label(), STATUS_CANCELLED])
        .inc();
    tracing::info!(order_id = %order_id, po_number = %outcome.number, "replenishment order cancelled");

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Cancelled,
            entity: Some((KIND.entity_kind(), order_id)),
            old_values: Some(json!({ "status": STATUS_PENDING })),
            new_values: Some(json!({ "status": STATUS_CANCELLED })),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(fetch_view(&state.db, order_id).await?))
}

pub async fn latest_replenishment_order_number(
    State(state): State<AppState>,
) -> Result<Json<LatestNumber>, ApiError> {
    Ok(Json(latest_number(&state.db, KIND).await?))
}
