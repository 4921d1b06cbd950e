use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront and Back-Office API

Catalog browsing, per-customer carts with coupons, checkout with live stock
revalidation, order lifecycle with returns, and a wallet ledger for refunds
and referral credits.

## Authentication

Customer and admin routes take a JWT in the Authorization header:

```
Authorization: Bearer <token>
```

Payment callback routes are authenticated by the gateway's HMAC signature
instead.

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20,
max 100).
"#,
        contact(name = "Storefront API team")
    ),
    paths(
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::checkout::place_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::payments::verify_payment,
        crate::handlers::customers::register,
    ),
    components(schemas(crate::errors::ErrorResponse)),
    tags(
        (name = "products", description = "Storefront catalog"),
        (name = "cart", description = "Cart and coupons"),
        (name = "checkout", description = "Order placement"),
        (name = "orders", description = "Order lifecycle and returns"),
        (name = "payments", description = "Gateway callbacks"),
        (name = "wallet", description = "Store credit ledger"),
        (name = "admin", description = "Back-office management")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the generated document at
/// `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
