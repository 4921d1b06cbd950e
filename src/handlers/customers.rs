use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    services::customers::{LoginInput, RegisterInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Registration and login are open; profile and verification require a
/// token.
pub fn customers_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(profile))
        .route("/verify", post(verify))
}

/// Register a new account, optionally with a referral code
#[utoipa::path(
    post,
    path = "/api/v1/customers/register",
    responses(
        (status = 201, description = "Account created"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let customer = state
        .services
        .customers
        .register(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(customer))
}

/// Log in and receive a bearer token
async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .customers
        .login(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(outcome))
}

/// The authenticated customer's profile
async fn profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let customer = state
        .services
        .customers
        .get(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(customer))
}

/// Mark the account verified, releasing referral credits the first time
async fn verify(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let customer = state
        .services
        .customers
        .verify(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(customer))
}
