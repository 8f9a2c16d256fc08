//! Creation-time validation across the three order workflows. Header and
//! lines are checked before anything is persisted, so these run without a
//! reachable database.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{post_json, send, unreachable_router};
use uuid::Uuid;

#[tokio::test]
async fn sales_order_without_lines_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({
        "so_number": "SO-1001",
        "order_date": "2026-08-05",
        "items": [],
    });
    let (status, json) = send(&app, post_json("/sales-orders", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "empty_lines");
    assert_eq!(json["field"], "items");
}

#[tokio::test]
async fn sales_order_with_zero_quantity_line_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({
        "so_number": "SO-1002",
        "order_date": "2026-08-05",
        "items": [{"item_id": Uuid::new_v4(), "quantity": 0, "unit_price_cents": 100}],
    });
    let (status, json) = send(&app, post_json("/sales-orders", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_quantity");
}

#[tokio::test]
async fn replenishment_order_with_negative_unit_cost_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({
        "po_number": "PO-2001",
        "order_date": "2026-08-05",
        "items": [{"item_id": Uuid::new_v4(), "quantity": 2, "unit_cost_cents": -700}],
    });
    let (status, json) = send(&app, post_json("/replenishment-orders", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_amount");
}

#[tokio::test]
async fn replenishment_order_total_overflow_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({
        "po_number": "PO-2002",
        "order_date": "2026-08-05",
        "items": [{"item_id": Uuid::new_v4(), "quantity": 2, "unit_cost_cents": i64::MAX}],
    });
    let (status, json) = send(&app, post_json("/replenishment-orders", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "amount_overflow");
}

#[tokio::test]
async fn purchase_request_with_blank_number_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({
        "pr_number": "  ",
        "request_date": "2026-08-05",
        "items": [{"item_id": Uuid::new_v4(), "quantity": 1}],
    });
    let (status, json) = send(&app, post_json("/purchase-requests", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "missing_number");
    assert_eq!(json["field"], "pr_number");
}

#[tokio::test]
async fn order_transitions_require_actor_attribution() {
    let app = unreachable_router();
    let body = json!({});
    let uri = format!("/sales-orders/{}/fulfill", Uuid::new_v4());
    let (status, json) = send(&app, post_json(&uri, None, &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "missing_actor");
}
