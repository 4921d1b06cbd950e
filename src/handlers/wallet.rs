use crate::handlers::common::{
    map_service_error, success_response, PaginatedResponse, PaginationParams,
};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use std::sync::Arc;

pub fn wallet_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_wallet))
        .route("/transactions", get(list_transactions))
}

/// Current wallet balance
async fn get_wallet(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let wallet = state
        .services
        .wallets
        .get_wallet(user.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(wallet))
}

/// Paginated wallet ledger, newest first
async fn list_transactions(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .wallets
        .list_transactions(user.customer_id, page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}
