use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{errors::ApiError, services::payments::PaymentCallback, AppState};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Gateway callback endpoints. These are hit by the paying client after
/// the hosted payment flow, so they carry the gateway's signature instead
/// of a bearer token.
pub fn payments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify", post(verify_payment))
        .route("/failed", post(payment_failed))
}

#[derive(Debug, Deserialize, Validate)]
struct FailedRequest {
    #[validate(length(min = 1, max = 128))]
    gateway_order_id: String,
}

/// Verify a completed online payment
///
/// A bad signature is rejected with 401 and leaves the order untouched.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    responses(
        (status = 200, description = "Payment verified, order processing"),
        (status = 401, description = "Signature mismatch, nothing changed")
    )
)]
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentCallback>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .payments
        .confirm(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Record a failed online payment attempt
async fn payment_failed(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FailedRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .payments
        .mark_failed(&payload.gateway_order_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}
