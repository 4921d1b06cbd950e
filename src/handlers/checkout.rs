use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    services::checkout::{CheckoutOutcome, PlaceOrderInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use std::sync::Arc;

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/place-order", post(place_order))
}

/// Place an order from the customer's cart
///
/// Returns 201 with the order when the cart passed revalidation, or 200
/// with adjustment notices when the cart changed and has to be reviewed.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/place-order",
    responses(
        (status = 201, description = "Order placed"),
        (status = 200, description = "Cart adjusted, order not placed"),
        (status = 422, description = "Insufficient stock"),
        (status = 402, description = "Insufficient wallet balance")
    )
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<PlaceOrderInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .checkout
        .place_order(user.customer_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(match &outcome {
        CheckoutOutcome::Placed { .. } => created_response(outcome),
        CheckoutOutcome::Adjusted { .. } => success_response(outcome),
    })
}
