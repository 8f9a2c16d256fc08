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
    validate_number, LatestNumber, OrderKind, StockEffect, STATUS_CANCELLED, STATUS_FULFILLED,
    STATUS_PENDING,
};
use crate::stock::RecordedMovement;
use crate::{db_error, emit_audit, AppState};

const KIND: OrderKind = OrderKind::SalesOrder;

const SO_COLUMNS: &str =
    "id, so_number, customer_id, order_date, status, total_cents, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SalesOrderRecord {
    pub id: Uuid,
    pub so_number: String,
    pub customer_id: Option<Uuid>,
    pub order_date: NaiveDate,
    pub status: String,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SalesOrderLineView {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct SalesOrderView {
    #[serde(flatten)]
    pub header: SalesOrderRecord,
    pub items: Vec<SalesOrderLineView>,
}

#[derive(Debug, Deserialize)]
pub struct NewSalesOrderLine {
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct NewSalesOrder {
    pub so_number: String,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub order_date: NaiveDate,
    #[serde(default)]
    pub items: Vec<NewSalesOrderLine>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateSalesOrder {
    pub customer_id: Option<Uuid>,
    pub order_date: Option<NaiveDate>,
}

fn header_snapshot(record: &SalesOrderRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

async fn fetch_view(db: &PgPool, order_id: Uuid) -> Result<SalesOrderView, ApiError> {
    let header_sql = format!("SELECT {SO_COLUMNS} FROM sales_orders WHERE id = $1");
    let header = query_as::<_, SalesOrderRecord>(&header_sql)
        .bind(order_id)
        .fetch_optional(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    let items = query_as::<_, SalesOrderLineView>(
        "SELECT l.id, l.item_id, i.name AS item_name, l.quantity, l.unit_price_cents, l.subtotal_cents \
         FROM sales_order_items l JOIN items i ON i.id = l.item_id \
         WHERE l.order_id = $1 ORDER BY l.item_id ASC",
    )
    .bind(order_id)
    .fetch_all(db)
    .await
    .map_err(db_error)?;
    Ok(SalesOrderView { header, items })
}

pub async fn create_sales_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<NewSalesOrder>,
) -> Result<Json<SalesOrderView>, ApiError> {
    validate_number(&payload.so_number, "so_number")?;
    let pairs: Vec<(Uuid, i32)> = payload
        .items
        .iter()
        .map(|line| (line.item_id, line.quantity))
        .collect();
    validate_lines(&pairs)?;
    for line in &payload.items {
        if line.unit_price_cents < 0 {
            return Err(ApiError::validation_msg(
                "invalid_amount",
                Some("unit_price_cents"),
                format!("unit price for item {} must not be negative", line.item_id),
            ));
        }
    }
    let cents: Vec<(i32, i64)> = payload
        .items
        .iter()
        .map(|line| (line.quantity, line.unit_price_cents))
        .collect();
    let (subtotals, total) = compute_totals(&cents)
        .ok_or_else(|| ApiError::validation("amount_overflow", Some("unit_price_cents")))?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let insert_sql = format!(
        "INSERT INTO sales_orders (id, so_number, customer_id, order_date, total_cents) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {SO_COLUMNS}"
    );
    let header = query_as::<_, SalesOrderRecord>(&insert_sql)
        .bind(Uuid::new_v4())
        .bind(payload.so_number.trim())
        .bind(payload.customer_id)
        .bind(payload.order_date)
        .bind(total)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    ensure_items_active(&mut tx, &pairs).await?;
    for (line, subtotal) in payload.items.iter().zip(subtotals) {
        sqlx::query(
            "INSERT INTO sales_order_items \
             (id, order_id, item_id, quantity, unit_price_cents, subtotal_cents) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(header.id)
        .bind(line.item_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(subtotal)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;

    tracing::info!(order_id = %header.id, so_number = %header.so_number, total_cents = total, "sales order created");
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

pub async fn list_sales_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<SalesOrderRecord>>, ApiError> {
    let sql = format!("SELECT {SO_COLUMNS} FROM sales_orders ORDER BY created_at DESC LIMIT 200");
    let records = query_as::<_, SalesOrderRecord>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    Ok(Json(records))
}

pub async fn get_sales_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<SalesOrderView>, ApiError> {
    Ok(Json(fetch_view(&state.db, order_id).await?))
}

pub async fn update_sales_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateSalesOrder>,
) -> Result<Json<SalesOrderView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let select_sql = format!("SELECT {SO_COLUMNS} FROM sales_orders WHERE id = $1 FOR UPDATE");
    let old = query_as::<_, SalesOrderRecord>(&select_sql)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(KIND.not_found_code()))?;
    if old.status != STATUS_PENDING {
        return Err(ApiError::invalid_state(format!(
            "sales order {} is {}, not pending",
            old.so_number, old.status
        )));
    }

    let update_sql = format!(
        "UPDATE sales_orders SET \
         customer_id = COALESCE($2, customer_id), \
         order_date = COALESCE($3, order_date), \
         updated_at = now() \
         WHERE id = $1 RETURNING {SO_COLUMNS}"
    );
    let updated = query_as::<_, SalesOrderRecord>(&update_sql)
        .bind(order_id)
        .bind(payload.customer_id)
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

async fn audit_stock_out(state: &AppState, ctx: &CallerContext, recorded: &RecordedMovement) {
    emit_audit(
        state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::StockOut,
            entity: Some((EntityKind::Item, recorded.movement.item_id)),
            old_values: Some(json!({ "current_stock": recorded.stock_before })),
            new_values: Some(json!({ "current_stock": recorded.stock_after })),
            module: None,
            description: Some(format!(
                "stock_out x{} ({})",
                recorded.movement.quantity,
                recorded.movement.reference.as_deref().unwrap_or(""),
            )),
            meta: ctx.request_meta(),
        },
    )
    .await;
}

/// Fulfillment decrements stock, so every line is checked against current
/// stock under the item row locks before any movement is written. A single
/// failing line aborts the whole transition.
pub async fn fulfill_sales_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<SalesOrderView>, ApiError> {
    let timer = state.metrics.transition_duration_seconds.start_timer();
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let outcome = match run_transition(
        &mut tx,
        KIND,
        order_id,
        STATUS_FULFILLED,
        StockEffect::StockOutChecked,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, ApiError::InsufficientStock { .. }) {
                state.metrics.insufficient_stock_rejections.inc();
            }
            return Err(e);
        }
    };
    tx.commit().await.map_err(db_error)?;
    drop(timer);

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[KIND.metric_label(), STATUS_FULFILLED])
        .inc();
    for _ in &outcome.movements {
        state
            .metrics
            .stock_movements_total
            .with_label_values(&["OUT"])
            .inc();
    }
    tracing::info!(
        order_id = %order_id,
        so_number = %outcome.number,
        movements = outcome.movements.len(),
        "sales order fulfilled"
    );

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Fulfilled,
            entity: Some((KIND.entity_kind(), order_id)),
            old_values: Some(json!({ "status": STATUS_PENDING })),
            new_values: Some(json!({ "status": STATUS_FULFILLED })),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;
    for recorded in &outcome.movements {
        audit_stock_out(&state, &ctx, recorded).await;
    }

    Ok(Json(fetch_view(&state.db, order_id).await?))
}

pub async fn cancel_sales_order(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<SalesOrderView>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let outcome =
        run_transition(&mut tx, KIND, order_id, STATUS_CANCELLED, StockEffect::None).await?;
    tx.commit().await.map_err(db_error)?;

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[KIND.metric_label(), STATUS_CANCELLED])
        .inc();
    tracing::info!(order_id = %order_id, so_number = %outcome.number, "sales order cancelled");

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

pub async fn latest_sales_order_number(
    State(state): State<AppState>,
) -> Result<Json<LatestNumber>, ApiError> {
    Ok(Json(latest_number(&state.db, KIND).await?))
}
