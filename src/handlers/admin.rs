use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
    PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AdminUser,
    entities::OrderStatus,
    errors::ApiError,
    services::{
        catalog::{CreateCategoryInput, CreateProductInput, UpdateProductInput},
        coupons::CreateCouponInput,
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Back-office surface. Every route requires an admin token.
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        // catalog
        .route("/categories", post(create_category))
        .route("/categories", get(list_categories))
        .route("/categories/:id/listing", put(set_category_listed))
        .route("/categories/:id", delete(delete_category))
        .route("/products", post(create_product))
        .route("/products", get(list_products))
        .route("/products/:id", put(update_product))
        .route("/products/:id", delete(delete_product))
        .route("/variants/:id/stock", put(set_variant_stock))
        .route("/variants/:id/pricing", put(update_variant_pricing))
        // coupons
        .route("/coupons", post(create_coupon))
        .route("/coupons", get(list_coupons))
        .route("/coupons/:id/active", put(set_coupon_active))
        .route("/coupons/:id", delete(delete_coupon))
        // orders
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/return/approve", post(approve_return))
        .route("/orders/:id/return/reject", post(reject_return))
        // customers and wallets
        .route("/customers", get(list_customers))
        .route("/customers/:id/block", put(set_customer_blocked))
        .route("/customers/:id/wallet/adjust", post(adjust_wallet))
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(payload): Json<CreateCategoryInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let category = state
        .services
        .catalog
        .create_category(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(category))
}

async fn list_categories(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let categories = state
        .services
        .catalog
        .list_categories(true)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(categories))
}

#[derive(Debug, Deserialize)]
struct ListedRequest {
    is_listed: bool,
}

async fn set_category_listed(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ListedRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let category = state
        .services
        .catalog
        .set_category_listed(id, payload.is_listed)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(category))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_category(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(product))
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .catalog
        .list_products_admin(page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .update_product(id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_product(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

#[derive(Debug, Deserialize, Validate)]
struct StockRequest {
    #[validate(range(min = 0))]
    stock_quantity: i32,
}

async fn set_variant_stock(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StockRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let variant = state
        .services
        .catalog
        .set_variant_stock(id, payload.stock_quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(variant))
}

#[derive(Debug, Deserialize)]
struct PricingRequest {
    price: Decimal,
    sale_price: Option<Decimal>,
}

async fn update_variant_pricing(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PricingRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let variant = state
        .services
        .catalog
        .update_variant_pricing(id, payload.price, payload.sale_price)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(variant))
}

async fn create_coupon(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .create_coupon(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(coupon))
}

async fn list_coupons(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .coupons
        .list_coupons(page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    is_active: bool,
}

async fn set_coupon_active(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActiveRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .set_active(id, payload.is_active)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(coupon))
}

async fn delete_coupon(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .coupons
        .delete_coupon(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

#[derive(Debug, Deserialize)]
struct OrderListQuery {
    status: Option<OrderStatus>,
    placed_after: Option<DateTime<Utc>>,
    placed_before: Option<DateTime<Utc>>,
}

/// Order listing with status and placement-date filters
async fn list_orders(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<OrderListQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .orders
        .admin_list(
            query.status,
            query.placed_after,
            query.placed_before,
            page.page,
            page.per_page,
        )
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get(id)
        .await
        .map_err(map_service_error)?;
    let history = state
        .services
        .orders
        .history(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(serde_json::json!({
        "order": order,
        "items": items,
        "history": history,
    })))
}

#[derive(Debug, Deserialize, Validate)]
struct StatusRequest {
    status: OrderStatus,
    #[validate(length(max = 500))]
    description: Option<String>,
}

/// Move an order along the fulfillment chain
async fn update_order_status(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .update_status(id, payload.status, payload.description)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

async fn approve_return(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .returns
        .approve(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, Validate)]
struct RejectRequest {
    #[validate(length(max = 500))]
    note: Option<String>,
}

async fn reject_return(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .returns
        .reject(id, payload.note)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

async fn list_customers(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (items, total) = state
        .services
        .customers
        .list(page.page, page.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        items,
        page.page,
        page.per_page,
        total,
    )))
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    is_blocked: bool,
}

async fn set_customer_blocked(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<BlockRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let customer = state
        .services
        .customers
        .set_blocked(id, payload.is_blocked)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(customer))
}

#[derive(Debug, Deserialize, Validate)]
struct WalletAdjustRequest {
    amount: Decimal,
    #[validate(length(min = 1, max = 200))]
    description: String,
}

/// Credit or debit a customer's wallet manually
async fn adjust_wallet(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<WalletAdjustRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let entry = state
        .services
        .wallets
        .admin_adjust(id, payload.amount, &payload.description)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(entry))
}
