use axum::extract::{Path, Query, State};
use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use common_audit::{AuditAction, AuditInput, EntityKind};
use common_context::CallerCtxExtractor;
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::query_as;
use uuid::Uuid;

use crate::stock::{record_movement, Direction};
use crate::{db_error, emit_audit, AppState};

pub const ITEM_STATUS_ACTIVE: &str = "active";
pub const ITEM_STATUS_INACTIVE: &str = "inactive";
pub const ITEM_STATUS_DELETED: &str = "deleted";

/// Reference string stamped on the seed movement of a newly registered item.
pub const OPENING_REFERENCE: &str = "OPENING";

const ITEM_COLUMNS: &str = "id, sku, name, item_type, category, brand, unit, \
     cost_cents, price_cents, current_stock, minimum_stock, maximum_stock, \
     reorder_quantity, status, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ItemRecord {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub item_type: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub unit: Option<String>,
    pub cost_cents: i64,
    pub price_cents: i64,
    pub current_stock: i32,
    pub minimum_stock: i32,
    pub maximum_stock: i32,
    pub reorder_quantity: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cost_cents: i64,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub opening_stock: i32,
    #[serde(default)]
    pub minimum_stock: i32,
    #[serde(default)]
    pub maximum_stock: i32,
    #[serde(default)]
    pub reorder_quantity: i32,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateItem {
    pub name: Option<String>,
    pub item_type: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub unit: Option<String>,
    pub cost_cents: Option<i64>,
    pub price_cents: Option<i64>,
    pub minimum_stock: Option<i32>,
    pub maximum_stock: Option<i32>,
    pub reorder_quantity: Option<i32>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ItemListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemListResponse {
    pub items: Vec<ItemRecord>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

fn validate_new_item(payload: &NewItem) -> Result<(), ApiError> {
    if payload.sku.trim().is_empty() {
        return Err(ApiError::validation("missing_sku", Some("sku")));
    }
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("missing_name", Some("name")));
    }
    for (value, field) in [
        (payload.opening_stock, "opening_stock"),
        (payload.minimum_stock, "minimum_stock"),
        (payload.maximum_stock, "maximum_stock"),
        (payload.reorder_quantity, "reorder_quantity"),
    ] {
        if value < 0 {
            return Err(ApiError::validation_msg(
                "invalid_quantity",
                Some(field),
                format!("{field} must not be negative"),
            ));
        }
    }
    if payload.cost_cents < 0 || payload.price_cents < 0 {
        return Err(ApiError::validation("invalid_amount", Some("cost_cents")));
    }
    Ok(())
}

fn validate_update(payload: &UpdateItem) -> Result<(), ApiError> {
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("missing_name", Some("name")));
        }
    }
    for (value, field) in [
        (payload.minimum_stock, "minimum_stock"),
        (payload.maximum_stock, "maximum_stock"),
        (payload.reorder_quantity, "reorder_quantity"),
    ] {
        if value.is_some_and(|v| v < 0) {
            return Err(ApiError::validation_msg(
                "invalid_quantity",
                None,
                format!("{field} must not be negative"),
            ));
        }
    }
    if payload.cost_cents.is_some_and(|v| v < 0) || payload.price_cents.is_some_and(|v| v < 0) {
        return Err(ApiError::validation("invalid_amount", None));
    }
    if let Some(status) = &payload.status {
        if status != ITEM_STATUS_ACTIVE && status != ITEM_STATUS_INACTIVE {
            return Err(ApiError::validation_msg(
                "invalid_status",
                Some("status"),
                "status must be active or inactive",
            ));
        }
    }
    Ok(())
}

fn item_snapshot(record: &ItemRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

pub async fn create_item(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Json(payload): Json<NewItem>,
) -> Result<Json<ItemRecord>, ApiError> {
    validate_new_item(&payload)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let insert_sql = format!(
        "INSERT INTO items \
         (id, sku, name, item_type, category, brand, unit, cost_cents, price_cents, \
          minimum_stock, maximum_stock, reorder_quantity) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {ITEM_COLUMNS}"
    );
    let mut record = query_as::<_, ItemRecord>(&insert_sql)
        .bind(Uuid::new_v4())
        .bind(payload.sku.trim())
        .bind(payload.name.trim())
        .bind(&payload.item_type)
        .bind(&payload.category)
        .bind(&payload.brand)
        .bind(&payload.unit)
        .bind(payload.cost_cents)
        .bind(payload.price_cents)
        .bind(payload.minimum_stock)
        .bind(payload.maximum_stock)
        .bind(payload.reorder_quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    // Seed opening stock through the journal so the ledger equals the
    // movement sum from the item's first moment.
    let seed = if payload.opening_stock > 0 {
        let recorded = record_movement(
            &mut tx,
            record.id,
            Direction::In,
            payload.opening_stock,
            Some(OPENING_REFERENCE),
            None,
        )
        .await?;
        record.current_stock = recorded.stock_after;
        Some(recorded)
    } else {
        None
    };

    tx.commit().await.map_err(db_error)?;

    tracing::info!(item_id = %record.id, sku = %record.sku, "item created");
    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Created,
            entity: Some((EntityKind::Item, record.id)),
            old_values: None,
            new_values: item_snapshot(&record),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;
    if let Some(recorded) = seed {
        state
            .metrics
            .stock_movements_total
            .with_label_values(&["IN"])
            .inc();
        emit_audit(
            &state,
            AuditInput {
                actor: ctx.actor.clone(),
                action: AuditAction::StockIn,
                entity: Some((EntityKind::Item, record.id)),
                old_values: Some(json!({ "current_stock": recorded.stock_before })),
                new_values: Some(json!({ "current_stock": recorded.stock_after })),
                module: None,
                description: Some(format!(
                    "stock_in {} x{} ({})",
                    record.sku, recorded.movement.quantity, OPENING_REFERENCE
                )),
                meta: ctx.request_meta(),
            },
        )
        .await;
    }

    Ok(Json(record))
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> Result<Json<ItemListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 200);
    let offset = (page - 1) * per_page;

    let (items, total) = match &query.status {
        Some(status) => {
            if ![ITEM_STATUS_ACTIVE, ITEM_STATUS_INACTIVE, ITEM_STATUS_DELETED]
                .contains(&status.as_str())
            {
                return Err(ApiError::validation("invalid_status", Some("status")));
            }
            let list_sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE status = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            );
            let items = query_as::<_, ItemRecord>(&list_sql)
                .bind(status)
                .bind(per_page)
                .bind(offset)
                .fetch_all(&state.db)
                .await
                .map_err(db_error)?;
            let total =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE status = $1")
                    .bind(status)
                    .fetch_one(&state.db)
                    .await
                    .map_err(db_error)?;
            (items, total)
        }
        None => {
            // Deleted items stay out of default listings.
            let list_sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE status <> 'deleted' \
                 ORDER BY created_at DESC LIMIT $1 OFFSET $2"
            );
            let items = query_as::<_, ItemRecord>(&list_sql)
                .bind(per_page)
                .bind(offset)
                .fetch_all(&state.db)
                .await
                .map_err(db_error)?;
            let total = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM items WHERE status <> 'deleted'",
            )
            .fetch_one(&state.db)
            .await
            .map_err(db_error)?;
            (items, total)
        }
    };

    Ok(Json(ItemListResponse {
        items,
        total,
        page,
        per_page,
    }))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ItemRecord>, ApiError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1");
    query_as::<_, ItemRecord>(&sql)
        .bind(item_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("item_not_found"))
}

pub async fn update_item(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItem>,
) -> Result<Json<ItemRecord>, ApiError> {
    validate_update(&payload)?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    let select_sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE");
    let old = query_as::<_, ItemRecord>(&select_sql)
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("item_not_found"))?;
    if old.status == ITEM_STATUS_DELETED {
        return Err(ApiError::invalid_state("item is deleted"));
    }

    let update_sql = format!(
        "UPDATE items SET \
         name = COALESCE($2, name), \
         item_type = COALESCE($3, item_type), \
         category = COALESCE($4, category), \
         brand = COALESCE($5, brand), \
         unit = COALESCE($6, unit), \
         cost_cents = COALESCE($7, cost_cents), \
         price_cents = COALESCE($8, price_cents), \
         minimum_stock = COALESCE($9, minimum_stock), \
         maximum_stock = COALESCE($10, maximum_stock), \
         reorder_quantity = COALESCE($11, reorder_quantity), \
         status = COALESCE($12, status), \
         updated_at = now() \
         WHERE id = $1 \
         RETURNING {ITEM_COLUMNS}"
    );
    let updated = query_as::<_, ItemRecord>(&update_sql)
        .bind(item_id)
        .bind(payload.name.as_ref().map(|s| s.trim().to_string()))
        .bind(&payload.item_type)
        .bind(&payload.category)
        .bind(&payload.brand)
        .bind(&payload.unit)
        .bind(payload.cost_cents)
        .bind(payload.price_cents)
        .bind(payload.minimum_stock)
        .bind(payload.maximum_stock)
        .bind(payload.reorder_quantity)
        .bind(&payload.status)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Updated,
            entity: Some((EntityKind::Item, item_id)),
            old_values: item_snapshot(&old),
            new_values: item_snapshot(&updated),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(Json(updated))
}

pub async fn delete_item(
    State(state): State<AppState>,
    CallerCtxExtractor(ctx): CallerCtxExtractor,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let select_sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE");
    let old = query_as::<_, ItemRecord>(&select_sql)
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("item_not_found"))?;
    if old.status == ITEM_STATUS_DELETED {
        return Err(ApiError::invalid_state("item is already deleted"));
    }

    // Soft delete: movements and order lines keep referencing the row.
    let update_sql = format!(
        "UPDATE items SET status = 'deleted', updated_at = now() \
         WHERE id = $1 RETURNING {ITEM_COLUMNS}"
    );
    let deleted = query_as::<_, ItemRecord>(&update_sql)
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    tracing::info!(item_id = %item_id, sku = %deleted.sku, "item soft-deleted");
    emit_audit(
        &state,
        AuditInput {
            actor: ctx.actor.clone(),
            action: AuditAction::Deleted,
            entity: Some((EntityKind::Item, item_id)),
            old_values: item_snapshot(&old),
            new_values: item_snapshot(&deleted),
            module: None,
            description: None,
            meta: ctx.request_meta(),
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn low_stock_items(
    State(state): State<AppState>,
) -> Result<Json<Vec<ItemRecord>>, ApiError> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items \
         WHERE status = 'active' AND current_stock <= minimum_stock \
         ORDER BY current_stock ASC, sku ASC"
    );
    let items = query_as::<_, ItemRecord>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item() -> NewItem {
        NewItem {
            sku: "SKU-1".into(),
            name: "Bolt".into(),
            item_type: None,
            category: None,
            brand: None,
            unit: None,
            cost_cents: 100,
            price_cents: 250,
            opening_stock: 0,
            minimum_stock: 0,
            maximum_stock: 0,
            reorder_quantity: 0,
        }
    }

    #[test]
    fn create_rejects_blank_sku_and_name() {
        let mut payload = new_item();
        payload.sku = "  ".into();
        assert!(validate_new_item(&payload).is_err());

        let mut payload = new_item();
        payload.name = String::new();
        assert!(validate_new_item(&payload).is_err());
    }

    #[test]
    fn create_rejects_negative_stock_controls() {
        let mut payload = new_item();
        payload.opening_stock = -1;
        let err = validate_new_item(&payload).unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");

        let mut payload = new_item();
        payload.reorder_quantity = -3;
        assert!(validate_new_item(&payload).is_err());
    }

    #[test]
    fn update_rejects_deleted_status_value() {
        let payload = UpdateItem {
            status: Some("deleted".into()),
            ..Default::default()
        };
        let err = validate_update(&payload).unwrap_err();
        assert_eq!(err.code(), "invalid_status");
    }

    #[test]
    fn update_accepts_partial_payload() {
        let payload = UpdateItem {
            minimum_stock: Some(3),
            ..Default::default()
        };
        assert!(validate_update(&payload).is_ok());
    }
}
