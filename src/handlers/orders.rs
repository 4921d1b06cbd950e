use crate::handlers::common::{
    map_service_error, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Customer-facing order endpoints.
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/history", get(order_history))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/items/:item_id/cancel", post(cancel_item))
        .route("/:id/return", post(request_return))
        .route("/:id/payment/retry", post(retry_payment))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
struct CancelRequest {
    #[validate(length(max = 500))]
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct ReturnRequest {
    #[validate(length(min = 1, max = 500))]
    reason: String,
}

/// List the customer's orders, newest first
async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .orders
        .list_for_customer(user.customer_id, page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

/// Get one of the customer's orders with its items
async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_for_customer(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({
        "order": order,
        "items": items,
    })))
}

/// Status history for one of the customer's orders
async fn order_history(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    // Ownership check rides on the scoped fetch.
    state
        .services
        .orders
        .get_for_customer(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    let history = state
        .services
        .orders
        .history(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(history))
}

/// Cancel a whole pre-shipment order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    responses(
        (status = 200, description = "Order cancelled, stock restored, refund credited when paid"),
        (status = 400, description = "Order is past the cancellation window")
    )
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .cancel_order(Some(user.customer_id), id, payload.reason)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Cancel a single line of a pre-shipment order
async fn cancel_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let item = state
        .services
        .orders
        .cancel_item(user.customer_id, id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(item))
}

/// Request a return for a delivered order
async fn request_return(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .request_return(user.customer_id, id, payload.reason)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Retry a failed online payment with a fresh gateway order
async fn retry_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .payments
        .retry(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}
