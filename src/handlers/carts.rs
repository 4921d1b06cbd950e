use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input,
};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Cart endpoints, all scoped to the authenticated customer's single cart.
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item))
        .route("/items/:item_id", delete(remove_item))
        .route("/clear", post(clear_cart))
        .route("/coupon", post(apply_coupon))
        .route("/coupon", delete(remove_coupon))
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    variant_id: Uuid,
    #[validate(range(min = 1, max = 10))]
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateItemRequest {
    #[validate(range(min = 0, max = 10))]
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 32))]
    code: String,
}

/// Get the customer's cart with items and totals
async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .get_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Add a variant to the cart, accumulating quantity
async fn add_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .carts
        .add_item(user.customer_id, payload.variant_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Set a cart line's quantity; zero removes the line
async fn update_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .carts
        .update_item_quantity(user.customer_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Remove a cart line
async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .remove_item(user.customer_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Empty the cart
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .carts
        .clear_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

/// Apply a coupon code to the cart
async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .carts
        .apply_coupon(user.customer_id, &payload.code)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Remove the applied coupon
async fn remove_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .remove_coupon(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}
