use crate::handlers::common::{map_service_error, no_content_response, success_response};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn wishlist_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_wishlist))
        .route("/:product_id", post(add_to_wishlist))
        .route("/:product_id", delete(remove_from_wishlist))
}

async fn list_wishlist(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let products = state
        .services
        .wishlists
        .list(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(products))
}

async fn add_to_wishlist(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .wishlists
        .add(user.customer_id, product_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

async fn remove_from_wishlist(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .wishlists
        .remove(user.customer_id, product_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
