use chrono::{DateTime, Utc};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db_error;
use crate::item_handlers::ITEM_STATUS_DELETED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "IN" => Some(Direction::In),
            "OUT" => Some(Direction::Out),
            _ => None,
        }
    }

    pub fn signed(self, quantity: i32) -> i32 {
        match self {
            Direction::In => quantity,
            Direction::Out => -quantity,
        }
    }
}

/// Immutable journal row. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    pub direction: String,
    pub quantity: i32,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A movement together with the ledger values around it, for audit snapshots.
#[derive(Debug, Clone)]
pub struct RecordedMovement {
    pub movement: StockMovement,
    pub stock_before: i32,
    pub stock_after: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LockedItem {
    pub status: String,
    pub current_stock: i32,
}

pub(crate) const LOCK_ITEM_SQL: &str =
    "SELECT status, current_stock FROM items WHERE id = $1 FOR UPDATE";

pub(crate) const APPLY_DELTA_SQL: &str = "UPDATE items \
     SET current_stock = current_stock + $2, updated_at = now() \
     WHERE id = $1 AND current_stock + $2 >= 0 \
     RETURNING current_stock";

pub(crate) const INSERT_MOVEMENT_SQL: &str = "INSERT INTO stock_movements \
     (id, item_id, direction, quantity, reference, note) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     RETURNING id, item_id, direction, quantity, reference, note, created_at";

/// Take the exclusive row lock on an item. All stock reads that precede a
/// write must go through this so concurrent movements serialize per item.
pub(crate) async fn lock_item(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
) -> Result<LockedItem, ApiError> {
    sqlx::query_as::<_, LockedItem>(LOCK_ITEM_SQL)
        .bind(item_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("item_not_found"))
}

/// Append one movement and apply its signed delta to the item ledger, inside
/// the caller's transaction.
///
/// Sufficiency policy stays with the caller: a stock-decrementing workflow
/// checks availability under the item lock before calling in. The ledger
/// update here still refuses to drive `current_stock` negative, so a racing
/// or unchecked OUT rolls back with `InsufficientStock` instead of
/// underflowing.
pub(crate) async fn record_movement(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    direction: Direction,
    quantity: i32,
    reference: Option<&str>,
    note: Option<&str>,
) -> Result<RecordedMovement, ApiError> {
    if quantity <= 0 {
        return Err(ApiError::validation("invalid_quantity", Some("quantity")));
    }

    let locked = lock_item(tx, item_id).await?;
    if locked.status == ITEM_STATUS_DELETED {
        return Err(ApiError::invalid_state(format!(
            "item {item_id} is deleted"
        )));
    }

    let delta = direction.signed(quantity);
    let stock_after = sqlx::query_scalar::<_, i32>(APPLY_DELTA_SQL)
        .bind(item_id)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            ApiError::insufficient_stock(
                item_id,
                format!(
                    "movement of {quantity} exceeds available stock {}",
                    locked.current_stock
                ),
            )
        })?;

    let movement = sqlx::query_as::<_, StockMovement>(INSERT_MOVEMENT_SQL)
        .bind(Uuid::new_v4())
        .bind(item_id)
        .bind(direction.as_str())
        .bind(quantity)
        .bind(reference)
        .bind(note)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error)?;

    Ok(RecordedMovement {
        movement,
        stock_before: stock_after - delta,
        stock_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips() {
        assert_eq!(Direction::parse("IN"), Some(Direction::In));
        assert_eq!(Direction::parse("OUT"), Some(Direction::Out));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::In.as_str(), "IN");
    }

    #[test]
    fn signed_delta_follows_direction() {
        assert_eq!(Direction::In.signed(5), 5);
        assert_eq!(Direction::Out.signed(5), -5);
    }

    #[test]
    fn ledger_update_refuses_negative_stock() {
        assert!(APPLY_DELTA_SQL.contains("current_stock + $2 >= 0"));
    }

    #[test]
    fn item_lock_is_exclusive() {
        assert!(LOCK_ITEM_SQL.ends_with("FOR UPDATE"));
    }
}
