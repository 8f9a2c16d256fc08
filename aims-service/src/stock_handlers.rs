use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common_audit::{AuditAction, AuditInput, EntityKind};
use common_context::{CallerContext, CallerCtxExtractor};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::item_handlers::ITEM_STATUS_DELETED;
use crate::stock::{lock_item, record_movement, Direction, RecordedMovement, StockMovement};
use crate::{db_error, emit_audit, AppState};

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub item_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub movement: StockMovement,
    pub current_stock: i32,
}

/// Movement row joined with the item's display name.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MovementView {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub direction: String,
    pub quantity: i32,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MovementQuery {
    pub item_id: Option<Uuid>,
    pub direction: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MovementListResponse {
    pub movements: Vec<MovementView>,
    /// True when the store was unreachable and the result is an empty
    /// placeholder rather than the actual journal contents.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct MovementShowResponse {
    pub movement: Option<MovementView>,
    pub degraded: bool,
}

async fn audit_movement(
    state: &AppState,
    ctx: &CallerContext,
    recorded: &RecordedMovement,
    action: AuditAction,
) {
    emit_audit(
        state,
        AuditInput {
            actor: ctx.actor.clone(),
            action,
            entity: Some((EntityKind::Item, recorded.movement.item_id)),
            old_values: Some(json!({ "current_stock": recorded.stock_before })),
            new_values: Some(json!({ "current_stock": recorded.stock_after })),
            module: None,
            description: Some(format!(
                "{} x{} ({})",
                action.as_str(),
                recorded.movement.quantity,
                recorded.movement.reference.as_deref().unwrap_or("manual"),
            )),
            meta: ctx.request_meta(),
        },
    )
    .await;
}

pub async fn stock_in(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<StockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    if payload.quantity <= 0 {
        return Err(ApiError::validation("invalid_quantity", Some("quantity")));
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;
    let recorded = record_movement(
        &mut tx,
        payload.item_id,
        Direction::In,
        payload.quantity,
        payload.reference.as_deref(),
        payload.note.as_deref(),
    )
    .await?;
    tx.commit().await.map_err(db_error)?;

    state
        .metrics
        .stock_movements_total
        .with_label_values(&["IN"])
        .inc();
    tracing::info!(
        item_id = %payload.item_id,
        quantity = payload.quantity,
        stock = recorded.stock_after,
        "stock in"
    );
    audit_movement(&state, &ctx, &recorded, AuditAction::StockIn).await;

    Ok(Json(StockResponse {
        current_stock: recorded.stock_after,
        movement: recorded.movement,
    }))
}

pub async fn stock_out(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<StockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    if payload.quantity <= 0 {
        return Err(ApiError::validation("invalid_quantity", Some("quantity")));
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;

    // Sufficiency check under the item row lock; the journal trusts it.
    let locked = lock_item(&mut tx, payload.item_id).await?;
    if locked.status == ITEM_STATUS_DELETED {
        return Err(ApiError::invalid_state("item is deleted"));
    }
    if payload.quantity > locked.current_stock {
        state.metrics.insufficient_stock_rejections.inc();
        return Err(ApiError::insufficient_stock(
            payload.item_id,
            format!(
                "requested {}, available {}",
                payload.quantity, locked.current_stock
            ),
        ));
    }

    let recorded = record_movement(
        &mut tx,
        payload.item_id,
        Direction::Out,
        payload.quantity,
        payload.reference.as_deref(),
        payload.note.as_deref(),
    )
    .await?;
    tx.commit().await.map_err(db_error)?;

    state
        .metrics
        .stock_movements_total
        .with_label_values(&["OUT"])
        .inc();
    tracing::info!(
        item_id = %payload.item_id,
        quantity = payload.quantity,
        stock = recorded.stock_after,
        "stock out"
    );
    audit_movement(&state, &ctx, &recorded, AuditAction::StockOut).await;

    Ok(Json(StockResponse {
        current_stock: recorded.stock_after,
        movement: recorded.movement,
    }))
}

const MOVEMENT_SELECT: &str = "SELECT m.id, m.item_id, i.name AS item_name, m.direction, \
     m.quantity, m.reference, m.note, m.created_at \
     FROM stock_movements m JOIN items i ON i.id = m.item_id";

/// Journal read path. This feeds dashboards, so an unreachable store returns
/// an empty degraded payload instead of an error.
pub async fn list_movements(
    State(state): State<AppState>,
    Query(query): Query<MovementQuery>,
) -> Result<Json<MovementListResponse>, ApiError> {
    let direction = match &query.direction {
        Some(raw) => Some(
            Direction::parse(raw)
                .ok_or_else(|| ApiError::validation("invalid_direction", Some("direction")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("{MOVEMENT_SELECT} WHERE 1 = 1"));
    if let Some(item_id) = query.item_id {
        builder.push(" AND m.item_id = ");
        builder.push_bind(item_id);
    }
    if let Some(direction) = direction {
        builder.push(" AND m.direction = ");
        builder.push_bind(direction.as_str());
    }
    if let Some(from) = query.from {
        builder.push(" AND m.created_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = query.to {
        builder.push(" AND m.created_at <= ");
        builder.push_bind(to);
    }
    builder.push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ");
    builder.push_bind(limit);

    match builder
        .build_query_as::<MovementView>()
        .fetch_all(&state.db)
        .await
    {
        Ok(movements) => Ok(Json(MovementListResponse {
            movements,
            degraded: false,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "movement list degraded: store unavailable");
            Ok(Json(MovementListResponse {
                movements: Vec::new(),
                degraded: true,
            }))
        }
    }
}

pub async fn get_movement(
    State(state): State<AppState>,
    Path(movement_id): Path<Uuid>,
) -> Result<Json<MovementShowResponse>, ApiError> {
    let sql = format!("{MOVEMENT_SELECT} WHERE m.id = $1");
    match sqlx::query_as::<_, MovementView>(&sql)
        .bind(movement_id)
        .fetch_optional(&state.db)
        .await
    {
        Ok(Some(movement)) => Ok(Json(MovementShowResponse {
            movement: Some(movement),
            degraded: false,
        })),
        Ok(None) => Err(ApiError::not_found("movement_not_found")),
        Err(e) => {
            tracing::warn!(error = %e, movement_id = %movement_id, "movement show degraded: store unavailable");
            Ok(Json(MovementShowResponse {
                movement: None,
                degraded: true,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_select_resolves_item_name() {
        assert!(MOVEMENT_SELECT.contains("i.name AS item_name"));
        assert!(MOVEMENT_SELECT.contains("JOIN items i ON i.id = m.item_id"));
    }
}
