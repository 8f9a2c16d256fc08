use axum::response::IntoResponse;
use common_http_errors::ApiError;
use http_body_util::BodyExt; // for collect()
use uuid::Uuid;

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn validation_maps_to_400_with_field() {
    let resp = ApiError::validation("invalid_quantity", Some("quantity")).into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.headers().get("X-Error-Code").unwrap(),
        "invalid_quantity"
    );
    let json = body_json(resp).await;
    assert_eq!(json["code"], "invalid_quantity");
    assert_eq!(json["field"], "quantity");
}

#[tokio::test]
async fn insufficient_stock_maps_to_409_and_names_item() {
    let item = Uuid::new_v4();
    let resp = ApiError::insufficient_stock(item, "requested 5, available 3").into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::CONFLICT);
    assert_eq!(
        resp.headers().get("X-Error-Code").unwrap(),
        "insufficient_stock"
    );
    let json = body_json(resp).await;
    assert_eq!(json["item_id"], item.to_string());
    assert_eq!(json["message"], "requested 5, available 3");
}

#[tokio::test]
async fn invalid_state_and_duplicate_key_map_to_409() {
    let resp = ApiError::invalid_state("order is not pending").into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::CONFLICT);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_state");

    let resp = ApiError::duplicate_key("po_number already exists").into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::CONFLICT);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "duplicate_key");
}

#[tokio::test]
async fn internal_leaks_no_detail() {
    let resp = ApiError::internal("connection refused (with secrets)", None).into_response();
    assert_eq!(
        resp.status(),
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    );
    let json = body_json(resp).await;
    assert_eq!(json["code"], "internal_error");
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn not_found_maps_to_404() {
    let resp = ApiError::not_found("item_not_found").into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "item_not_found");
}
