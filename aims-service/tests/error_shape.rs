//! Error-shape tests for the request validation layer. None of these reach
//! the database: the extractor or the handler's validation rejects first.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{get, post_json, send, unreachable_router};
use uuid::Uuid;

#[tokio::test]
async fn mutating_route_without_actor_header_is_rejected() {
    let app = unreachable_router();
    let body = json!({"sku": "SKU-1", "name": "Bolt"});
    let (status, json) = send(&app, post_json("/items", None, &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "missing_actor");
}

#[tokio::test]
async fn create_item_with_blank_sku_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({"sku": "   ", "name": "Bolt"});
    let (status, json) = send(&app, post_json("/items", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "missing_sku");
    assert_eq!(json["field"], "sku");
}

#[tokio::test]
async fn create_item_with_negative_opening_stock_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({"sku": "SKU-1", "name": "Bolt", "opening_stock": -4});
    let (status, json) = send(&app, post_json("/items", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_quantity");
    assert_eq!(json["field"], "opening_stock");
}

#[tokio::test]
async fn stock_in_zero_quantity_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({"item_id": Uuid::new_v4(), "quantity": 0});
    let (status, json) = send(&app, post_json("/stock/in", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_quantity");
}

#[tokio::test]
async fn stock_out_negative_quantity_is_rejected() {
    let app = unreachable_router();
    let actor = Uuid::new_v4();
    let body = json!({"item_id": Uuid::new_v4(), "quantity": -3});
    let (status, json) = send(&app, post_json("/stock/out", Some(actor), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_quantity");
}

#[tokio::test]
async fn movement_list_degrades_when_store_unreachable() {
    let app = unreachable_router();
    let (status, json) = send(&app, get("/stock/movements")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["degraded"], true);
    assert_eq!(json["movements"], serde_json::json!([]));
}

#[tokio::test]
async fn movement_list_rejects_unknown_direction() {
    let app = unreachable_router();
    let (status, json) = send(&app, get("/stock/movements?direction=SIDEWAYS")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_direction");
}

#[tokio::test]
async fn audit_list_rejects_unknown_entity_kind() {
    let app = unreachable_router();
    let (status, json) = send(&app, get("/audit/logs?entity_kind=warehouse")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_entity_kind");
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let app = unreachable_router();
    let (status, _) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
}
