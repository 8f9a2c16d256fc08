use std::collections::{BTreeMap, BTreeSet};

use common_audit::EntityKind;
use common_http_errors::ApiError;
use common_money::{line_subtotal, order_total, Money};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::item_handlers::ITEM_STATUS_DELETED;
use crate::stock::{lock_item, record_movement, Direction, RecordedMovement};
use crate::db_error;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";
pub const STATUS_FULFILLED: &str = "fulfilled";
pub const STATUS_CANCELLED: &str = "cancelled";
/// Legacy terminal value kept in the replenishment status set; no exposed
/// transition produces it.
pub const STATUS_RECEIVED: &str = "received";

/// The three order workflows share one state machine; only naming and the
/// stock effect of the terminal transition differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    PurchaseRequest,
    Replenishment,
    SalesOrder,
}

impl OrderKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            OrderKind::PurchaseRequest => "purchase_requests",
            OrderKind::Replenishment => "replenishment_orders",
            OrderKind::SalesOrder => "sales_orders",
        }
    }

    pub(crate) fn line_table(self) -> &'static str {
        match self {
            OrderKind::PurchaseRequest => "purchase_request_items",
            OrderKind::Replenishment => "replenishment_order_items",
            OrderKind::SalesOrder => "sales_order_items",
        }
    }

    pub(crate) fn line_fk(self) -> &'static str {
        match self {
            OrderKind::PurchaseRequest => "request_id",
            OrderKind::Replenishment | OrderKind::SalesOrder => "order_id",
        }
    }

    pub(crate) fn number_column(self) -> &'static str {
        match self {
            OrderKind::PurchaseRequest => "pr_number",
            OrderKind::Replenishment => "po_number",
            OrderKind::SalesOrder => "so_number",
        }
    }

    pub(crate) fn not_found_code(self) -> &'static str {
        match self {
            OrderKind::PurchaseRequest => "purchase_request_not_found",
            OrderKind::Replenishment => "replenishment_order_not_found",
            OrderKind::SalesOrder => "sales_order_not_found",
        }
    }

    pub(crate) fn entity_kind(self) -> EntityKind {
        match self {
            OrderKind::PurchaseRequest => EntityKind::PurchaseRequest,
            OrderKind::Replenishment => EntityKind::ReplenishmentOrder,
            OrderKind::SalesOrder => EntityKind::SalesOrder,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        self.entity_kind().label()
    }

    pub(crate) fn metric_label(self) -> &'static str {
        self.entity_kind().as_str()
    }
}

/// Stock effect of a terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StockEffect {
    /// Status flip only (purchase requests, rejections, cancellations).
    None,
    /// One IN movement per line (replenishment approval).
    StockIn,
    /// One OUT movement per line after a per-item sufficiency check under
    /// the item row locks (sales fulfillment).
    StockOutChecked,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub(crate) struct FlowLine {
    pub item_id: Uuid,
    pub quantity: i32,
}

pub(crate) struct TransitionOutcome {
    pub number: String,
    pub movements: Vec<RecordedMovement>,
}

pub(crate) fn validate_number(number: &str, field: &'static str) -> Result<(), ApiError> {
    if number.trim().is_empty() {
        return Err(ApiError::validation("missing_number", Some(field)));
    }
    Ok(())
}

pub(crate) fn validate_lines(pairs: &[(Uuid, i32)]) -> Result<(), ApiError> {
    if pairs.is_empty() {
        return Err(ApiError::validation("empty_lines", Some("items")));
    }
    for (item_id, quantity) in pairs {
        if *quantity <= 0 {
            return Err(ApiError::validation_msg(
                "invalid_quantity",
                Some("quantity"),
                format!("quantity for item {item_id} must be positive"),
            ));
        }
    }
    Ok(())
}

/// Every referenced item must exist and not be soft-deleted.
pub(crate) async fn ensure_items_active(
    tx: &mut Transaction<'_, Postgres>,
    pairs: &[(Uuid, i32)],
) -> Result<(), ApiError> {
    let seen: BTreeSet<Uuid> = pairs.iter().map(|(item_id, _)| *item_id).collect();
    for item_id in &seen {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("item_not_found"))?;
        if status == ITEM_STATUS_DELETED {
            return Err(ApiError::invalid_state(format!("item {item_id} is deleted")));
        }
    }
    Ok(())
}

/// Line subtotals and the derived header total, all in cents.
pub fn compute_totals(lines: &[(i32, i64)]) -> Option<(Vec<i64>, i64)> {
    let mut subtotals = Vec::with_capacity(lines.len());
    for (quantity, unit_cents) in lines {
        subtotals.push(line_subtotal(Money::from_cents(*unit_cents), *quantity)?.cents());
    }
    let total = order_total(subtotals.iter().map(|c| Money::from_cents(*c)))?.cents();
    Some((subtotals, total))
}

/// Run a terminal transition as one atomic unit inside the caller's
/// transaction: lock the header, re-check it is still pending, apply the
/// per-line stock effect, flip the status. Any error rolls everything back
/// together, so partial application is never observable.
pub(crate) async fn run_transition(
    tx: &mut Transaction<'_, Postgres>,
    kind: OrderKind,
    order_id: Uuid,
    target_status: &'static str,
    effect: StockEffect,
) -> Result<TransitionOutcome, ApiError> {
    let header_sql = format!(
        "SELECT {number}, status FROM {table} WHERE id = $1 FOR UPDATE",
        number = kind.number_column(),
        table = kind.table(),
    );
    let header = sqlx::query(&header_sql)
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found(kind.not_found_code()))?;
    let number: String = header.get(kind.number_column());
    let status: String = header.get("status");
    if status != STATUS_PENDING {
        return Err(ApiError::invalid_state(format!(
            "{} {number} is {status}, not pending",
            kind.label()
        )));
    }

    // Ascending item-id order keeps lock acquisition stable across
    // concurrent transitions touching overlapping item sets.
    let lines_sql = format!(
        "SELECT item_id, quantity FROM {line_table} WHERE {fk} = $1 ORDER BY item_id ASC",
        line_table = kind.line_table(),
        fk = kind.line_fk(),
    );
    let lines: Vec<FlowLine> = sqlx::query_as(&lines_sql)
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error)?;

    let mut movements = Vec::new();
    match effect {
        StockEffect::None => {}
        StockEffect::StockIn => {
            for line in &lines {
                movements.push(
                    record_movement(
                        tx,
                        line.item_id,
                        Direction::In,
                        line.quantity,
                        Some(&number),
                        None,
                    )
                    .await?,
                );
            }
        }
        StockEffect::StockOutChecked => {
            let mut required: BTreeMap<Uuid, i64> = BTreeMap::new();
            for line in &lines {
                *required.entry(line.item_id).or_insert(0) += i64::from(line.quantity);
            }
            for (item_id, quantity) in &required {
                let locked = lock_item(tx, *item_id).await?;
                if locked.status == ITEM_STATUS_DELETED {
                    return Err(ApiError::invalid_state(format!(
                        "item {item_id} is deleted"
                    )));
                }
                if *quantity > i64::from(locked.current_stock) {
                    return Err(ApiError::insufficient_stock(
                        *item_id,
                        format!(
                            "requested {quantity}, available {}",
                            locked.current_stock
                        ),
                    ));
                }
            }
            for line in &lines {
                movements.push(
                    record_movement(
                        tx,
                        line.item_id,
                        Direction::Out,
                        line.quantity,
                        Some(&number),
                        None,
                    )
                    .await?,
                );
            }
        }
    }

    let update_sql = format!(
        "UPDATE {table} SET status = $2, updated_at = now() WHERE id = $1",
        table = kind.table(),
    );
    sqlx::query(&update_sql)
        .bind(order_id)
        .bind(target_status)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;

    Ok(TransitionOutcome { number, movements })
}

#[derive(Debug, Serialize)]
pub struct LatestNumber {
    pub number: Option<String>,
    pub suffix: Option<i64>,
}

/// Numeric suffix of a business number, e.g. "PO-2026-0042" -> 42.
pub fn number_suffix(number: &str) -> Option<i64> {
    let trimmed = number.trim();
    let mut start = trimmed.len();
    for (i, c) in trimmed.char_indices().rev() {
        if c.is_ascii_digit() {
            start = i;
        } else {
            break;
        }
    }
    let digits = &trimmed[start..];
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok()
}

/// Most recently created order number for client-side next-number
/// suggestions. Advisory only; uniqueness is enforced at insert.
pub(crate) async fn latest_number(db: &PgPool, kind: OrderKind) -> Result<LatestNumber, ApiError> {
    let sql = format!(
        "SELECT {number} FROM {table} ORDER BY created_at DESC, id DESC LIMIT 1",
        number = kind.number_column(),
        table = kind.table(),
    );
    let number = sqlx::query_scalar::<_, String>(&sql)
        .fetch_optional(db)
        .await
        .map_err(db_error)?;
    let suffix = number.as_deref().and_then(number_suffix);
    Ok(LatestNumber { number, suffix })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_suffix_parses_trailing_digits() {
        assert_eq!(number_suffix("PO-2026-0042"), Some(42));
        assert_eq!(number_suffix("SO/991"), Some(991));
        assert_eq!(number_suffix("7"), Some(7));
    }

    #[test]
    fn number_suffix_handles_missing_or_bad_suffix() {
        assert_eq!(number_suffix("DRAFT"), None);
        assert_eq!(number_suffix(""), None);
        // longer than i64: parse failure, not a panic
        assert_eq!(number_suffix("PO-99999999999999999999999"), None);
    }

    #[test]
    fn validate_lines_rejects_empty_and_nonpositive() {
        assert_eq!(
            validate_lines(&[]).unwrap_err().code(),
            "empty_lines"
        );
        let item = Uuid::new_v4();
        assert_eq!(
            validate_lines(&[(item, 0)]).unwrap_err().code(),
            "invalid_quantity"
        );
        assert!(validate_lines(&[(item, 3)]).is_ok());
    }

    #[test]
    fn totals_match_line_sums() {
        // (qty 5 @ $10.00) + (qty 2 @ $7.00) => $64.00
        let (subtotals, total) = compute_totals(&[(5, 1000), (2, 700)]).unwrap();
        assert_eq!(subtotals, vec![5000, 1400]);
        assert_eq!(total, 6400);
    }

    #[test]
    fn totals_overflow_is_none() {
        assert!(compute_totals(&[(2, i64::MAX)]).is_none());
    }

    #[test]
    fn workflow_table_metadata_is_consistent() {
        for kind in [
            OrderKind::PurchaseRequest,
            OrderKind::Replenishment,
            OrderKind::SalesOrder,
        ] {
            assert!(kind.line_table().starts_with(kind.table().trim_end_matches('s')));
            assert!(kind.number_column().ends_with("_number"));
        }
    }
}
