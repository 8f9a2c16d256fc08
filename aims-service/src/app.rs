use axum::extract::{Request, State};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::audit_handlers::list_audit_logs;
use crate::item_handlers::{
    create_item, delete_item, get_item, list_items, low_stock_items, update_item,
};
use crate::purchase_request_handlers::{
    approve_purchase_request, create_purchase_request, get_purchase_request,
    latest_purchase_request_number, list_purchase_requests, reject_purchase_request,
    update_purchase_request,
};
use crate::replenishment_handlers::{
    approve_replenishment_order, cancel_replenishment_order, create_replenishment_order,
    get_replenishment_order, latest_replenishment_order_number, list_replenishment_orders,
    update_replenishment_order,
};
use crate::sales_order_handlers::{
    cancel_sales_order, create_sales_order, fulfill_sales_order, get_sales_order,
    latest_sales_order_number, list_sales_orders, update_sales_order,
};
use crate::stock_handlers::{get_movement, list_movements, stock_in, stock_out};
use crate::{AppState, SERVICE_NAME};

pub async fn health() -> &'static str {
    "ok"
}

/// Counts error responses by the X-Error-Code header the error type stamps.
pub async fn http_error_metrics(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        state
            .metrics
            .http_errors_total
            .with_label_values(&[SERVICE_NAME, code, status.as_str()])
            .inc();
    }
    resp
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:3001",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-user-name"),
            HeaderName::from_static("x-user-role"),
            HeaderName::from_static("x-trace-id"),
        ]);

    Router::new()
        .route("/healthz", get(health))
        .route("/items", post(create_item).get(list_items))
        .route("/items/low-stock", get(low_stock_items))
        .route(
            "/items/:id",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route("/stock/in", post(stock_in))
        .route("/stock/out", post(stock_out))
        .route("/stock/movements", get(list_movements))
        .route("/stock/movements/:id", get(get_movement))
        .route(
            "/purchase-requests",
            post(create_purchase_request).get(list_purchase_requests),
        )
        .route(
            "/purchase-requests/latest-number",
            get(latest_purchase_request_number),
        )
        .route(
            "/purchase-requests/:id",
            get(get_purchase_request).put(update_purchase_request),
        )
        .route(
            "/purchase-requests/:id/approve",
            post(approve_purchase_request),
        )
        .route(
            "/purchase-requests/:id/reject",
            post(reject_purchase_request),
        )
        .route(
            "/replenishment-orders",
            post(create_replenishment_order).get(list_replenishment_orders),
        )
        .route(
            "/replenishment-orders/latest-number",
            get(latest_replenishment_order_number),
        )
        .route(
            "/replenishment-orders/:id",
            get(get_replenishment_order).put(update_replenishment_order),
        )
        .route(
            "/replenishment-orders/:id/approve",
            post(approve_replenishment_order),
        )
        .route(
            "/replenishment-orders/:id/cancel",
            post(cancel_replenishment_order),
        )
        .route(
            "/sales-orders",
            post(create_sales_order).get(list_sales_orders),
        )
        .route("/sales-orders/latest-number", get(latest_sales_order_number))
        .route(
            "/sales-orders/:id",
            get(get_sales_order).put(update_sales_order),
        )
        .route("/sales-orders/:id/fulfill", post(fulfill_sales_order))
        .route("/sales-orders/:id/cancel", post(cancel_sales_order))
        .route("/audit/logs", get(list_audit_logs))
        .route("/internal/metrics", get(metrics))
        .route("/metrics", get(metrics))
        .with_state(state.clone())
        .layer(cors)
        .layer(middleware::from_fn_with_state(state, http_error_metrics))
}
