use crate::handlers::common::{
    map_service_error, success_response, PaginatedResponse, PaginationParams,
};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Storefront catalog endpoints, no auth required.
pub fn products_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

pub fn categories_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_categories))
}

#[derive(Debug, Deserialize)]
struct ProductListQuery {
    category_id: Option<Uuid>,
    search: Option<String>,
}

/// List visible products with optional category and search filters
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(PaginationParams),
    responses((status = 200, description = "Paginated product list"))
)]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductListQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .catalog
        .list_products(query.category_id, query.search, page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

/// Get one product with its variants
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    responses(
        (status = 200, description = "Product with variants"),
        (status = 404, description = "Product not found")
    )
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (product, variants) = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({
        "product": product,
        "variants": variants,
    })))
}

/// List visible categories
async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let categories = state
        .services
        .catalog
        .list_categories(false)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(categories))
}
