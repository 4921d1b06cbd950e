use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response,
};
use crate::{
    auth::AuthenticatedUser, errors::ApiError, services::addresses::AddressInput, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn addresses_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_addresses))
        .route("/", post(create_address))
        .route("/:id", get(get_address))
        .route("/:id", put(update_address))
        .route("/:id", delete(delete_address))
        .route("/:id/default", post(set_default))
}

async fn list_addresses(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let addresses = state
        .services
        .addresses
        .list(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(addresses))
}

async fn create_address(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<AddressInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .create(user.customer_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(address))
}

async fn get_address(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .get(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(address))
}

async fn update_address(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .update(user.customer_id, id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(address))
}

async fn delete_address(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .addresses
        .delete(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

async fn set_default(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .set_default(user.customer_id, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(address))
}
