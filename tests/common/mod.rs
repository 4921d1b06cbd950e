#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use sha2::Sha256;
use storefront_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{
        coupon::CouponType, AddressModel, CouponModel, CustomerModel, OrderItemModel, OrderModel,
        PaymentMethod, ProductModel, TransactionSource,
    },
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        addresses::AddressInput,
        catalog::{CreateCategoryInput, CreateProductInput, CreateVariantInput},
        checkout::{CheckoutOutcome, PlaceOrderInput},
        coupons::CreateCouponInput,
        customers::RegisterInput,
        payments::{MockGateway, PaymentGateway},
    },
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const GATEWAY_SECRET: &str = "test_gateway_callback_secret";

/// Test harness: the full service graph wired onto an in-memory SQLite
/// database with a canned payment gateway.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

pub async fn spawn_app() -> TestApp {
    let mut cfg = AppConfig::new(
        "sqlite::memory:",
        "test_secret_key_for_testing_purposes_32ch",
    );
    cfg.gateway.key_secret = GATEWAY_SECRET.to_string();
    cfg.referral_signup_bonus = 5.0;
    cfg.referral_reward = 10.0;

    let pool = db::establish_connection(&cfg)
        .await
        .expect("failed to open test database");
    db::init_schema(&pool).await.expect("failed to create schema");

    let db = Arc::new(pool);
    let config = Arc::new(cfg);
    let (tx, rx) = mpsc::channel(256);
    let event_task = tokio::spawn(events::process_events(rx));
    let event_sender = EventSender::new(tx);
    let auth = Arc::new(AuthService::new(
        &config.jwt_secret,
        config.jwt_expiration_secs,
    ));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway::new());
    let services = AppServices::new(db.clone(), config.clone(), event_sender, gateway, auth);

    TestApp {
        db,
        config,
        services,
        _event_task: event_task,
    }
}

/// Registers and verifies a customer.
pub async fn seed_customer(app: &TestApp, email: &str) -> CustomerModel {
    let customer = app
        .services
        .customers
        .register(RegisterInput {
            email: email.to_string(),
            name: "Test Shopper".to_string(),
            password: "a-long-enough-password".to_string(),
            phone: None,
            referral_code: None,
        })
        .await
        .expect("registration should succeed");
    app.services
        .customers
        .verify(customer.id)
        .await
        .expect("verification should succeed")
}

pub async fn seed_address(app: &TestApp, customer_id: Uuid) -> AddressModel {
    app.services
        .addresses
        .create(
            customer_id,
            AddressInput {
                full_name: "Test Shopper".into(),
                phone: "9876543210".into(),
                line1: "12 Harbour Street".into(),
                line2: None,
                city: "Springfield".into(),
                state: "IL".into(),
                postal_code: "62701".into(),
                country: "US".into(),
                is_default: true,
            },
        )
        .await
        .expect("address creation should succeed")
}

/// One product with a single variant; returns the product and the variant id.
pub async fn seed_product(
    app: &TestApp,
    name: &str,
    price: Decimal,
    stock: i32,
) -> (ProductModel, Uuid) {
    let category = app
        .services
        .catalog
        .create_category(CreateCategoryInput {
            name: format!("category-{}", Uuid::new_v4()),
            description: None,
        })
        .await
        .expect("category creation should succeed");
    let product = app
        .services
        .catalog
        .create_product(CreateProductInput {
            category_id: category.id,
            name: name.to_string(),
            description: None,
            offer_percent: None,
            images: None,
            variants: vec![CreateVariantInput {
                size: "M".into(),
                price,
                sale_price: None,
                stock_quantity: stock,
            }],
        })
        .await
        .expect("product creation should succeed");
    let (_, variants) = app
        .services
        .catalog
        .get_product(product.id)
        .await
        .expect("product should be readable");
    (product, variants[0].id)
}

pub async fn seed_percent_coupon(
    app: &TestApp,
    code: &str,
    percent: Decimal,
    min_cart_value: Option<Decimal>,
    usage_limit: Option<i32>,
) -> CouponModel {
    app.services
        .coupons
        .create_coupon(CreateCouponInput {
            code: code.to_string(),
            discount_type: CouponType::Percentage,
            value: percent,
            min_cart_value,
            max_discount: None,
            usage_limit,
            expires_at: Utc::now() + Duration::days(30),
        })
        .await
        .expect("coupon creation should succeed")
}

pub async fn fund_wallet(app: &TestApp, customer_id: Uuid, amount: Decimal) {
    app.services
        .wallets
        .credit(
            &*app.db,
            customer_id,
            amount,
            TransactionSource::AdminCredit,
            None,
            "test funding",
        )
        .await
        .expect("wallet funding should succeed");
}

pub async fn wallet_balance(app: &TestApp, customer_id: Uuid) -> Decimal {
    app.services
        .wallets
        .get_wallet(customer_id)
        .await
        .expect("wallet should exist")
        .balance
}

pub async fn variant_stock(app: &TestApp, variant_id: Uuid) -> i32 {
    app.services
        .catalog
        .get_variant(variant_id)
        .await
        .expect("variant should exist")
        .stock_quantity
}

/// Places an order, panicking on an adjusted-cart outcome.
pub async fn place_order(
    app: &TestApp,
    customer_id: Uuid,
    address_id: Uuid,
    payment_method: PaymentMethod,
) -> (OrderModel, Vec<OrderItemModel>) {
    match app
        .services
        .checkout
        .place_order(
            customer_id,
            PlaceOrderInput {
                address_id,
                payment_method,
            },
        )
        .await
        .expect("checkout should succeed")
    {
        CheckoutOutcome::Placed { order, items } => (order, items),
        CheckoutOutcome::Adjusted { notices } => panic!("cart was adjusted: {:?}", notices),
    }
}

/// Signs a payment callback the way the gateway would.
pub fn sign_callback(gateway_order_id: &str, payment_id: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(GATEWAY_SECRET.as_bytes()).expect("hmac accepts any key");
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
