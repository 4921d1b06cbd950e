mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::payments::PaymentCallback,
};
use uuid::Uuid;

use common::*;

async fn online_order(app: &TestApp, email: &str, price: rust_decimal::Decimal, stock: i32) -> (Uuid, Uuid, String) {
    let customer = seed_customer(app, email).await;
    let address = seed_address(app, customer.id).await;
    let (_, variant_id) = seed_product(app, "Headphones", price, stock).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let (order, _) = place_order(app, customer.id, address.id, PaymentMethod::Online).await;
    let gateway_order_id = order.gateway_order_id.clone().expect("gateway order id");
    (order.id, variant_id, gateway_order_id)
}

#[tokio::test]
async fn a_bad_signature_changes_nothing() {
    let app = spawn_app().await;
    let (order_id, variant_id, gateway_order_id) =
        online_order(&app, "badsig@example.com", dec!(80), 4).await;

    let err = app
        .services
        .payments
        .confirm(PaymentCallback {
            gateway_order_id: gateway_order_id.clone(),
            payment_id: "pay_1".into(),
            signature: "forged".into(),
        })
        .await
        .expect_err("forged callbacks must be refused");
    assert_matches!(err, ServiceError::InvalidSignature);

    let (order, _) = app.services.orders.get(order_id).await.expect("order");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(variant_stock(&app, variant_id).await, 4);
    let cart = app
        .services
        .carts
        .get_cart(order.customer_id)
        .await
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn a_valid_signature_settles_the_order() {
    let app = spawn_app().await;
    let (order_id, variant_id, gateway_order_id) =
        online_order(&app, "goodsig@example.com", dec!(80), 4).await;

    let order = app
        .services
        .payments
        .confirm(PaymentCallback {
            gateway_order_id: gateway_order_id.clone(),
            payment_id: "pay_1".into(),
            signature: sign_callback(&gateway_order_id, "pay_1"),
        })
        .await
        .expect("verified callback should settle");

    assert_eq!(order.id, order_id);
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    // Stock is taken and the cart consumed only now.
    assert_eq!(variant_stock(&app, variant_id).await, 3);
    let cart = app
        .services
        .carts
        .get_cart(order.customer_id)
        .await
        .expect("cart");
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn redelivered_callbacks_are_idempotent() {
    let app = spawn_app().await;
    let (_, variant_id, gateway_order_id) =
        online_order(&app, "redeliver@example.com", dec!(80), 4).await;

    let callback = || PaymentCallback {
        gateway_order_id: gateway_order_id.clone(),
        payment_id: "pay_1".into(),
        signature: sign_callback(&gateway_order_id, "pay_1"),
    };
    app.services
        .payments
        .confirm(callback())
        .await
        .expect("first delivery");
    let order = app
        .services
        .payments
        .confirm(callback())
        .await
        .expect("second delivery is a no-op");

    assert_eq!(order.payment_status, PaymentStatus::Completed);
    // Stock was only decremented once.
    assert_eq!(variant_stock(&app, variant_id).await, 3);
}

#[tokio::test]
async fn failed_payment_parks_the_order_until_retry() {
    let app = spawn_app().await;
    let (order_id, _, gateway_order_id) =
        online_order(&app, "failed@example.com", dec!(80), 4).await;

    let order = app
        .services
        .payments
        .mark_failed(&gateway_order_id)
        .await
        .expect("failure report");
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);

    let order = app
        .services
        .payments
        .retry(order.customer_id, order_id)
        .await
        .expect("retry should mint a fresh gateway order");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_attempts, 2);
    let new_gateway_order_id = order.gateway_order_id.expect("gateway order id");
    assert_ne!(new_gateway_order_id, gateway_order_id);

    // The fresh gateway order settles like any other.
    let order = app
        .services
        .payments
        .confirm(PaymentCallback {
            gateway_order_id: new_gateway_order_id.clone(),
            payment_id: "pay_2".into(),
            signature: sign_callback(&new_gateway_order_id, "pay_2"),
        })
        .await
        .expect("settle after retry");
    assert_eq!(order.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn retries_are_bounded_by_the_attempt_ceiling() {
    let app = spawn_app().await;
    let (order_id, _, mut gateway_order_id) =
        online_order(&app, "exhausted@example.com", dec!(80), 4).await;

    // Attempt 1 came from checkout; burn through the remaining two.
    for _ in 0..2 {
        app.services
            .payments
            .mark_failed(&gateway_order_id)
            .await
            .expect("failure report");
        let (order, _) = app.services.orders.get(order_id).await.expect("order");
        let order = app
            .services
            .payments
            .retry(order.customer_id, order_id)
            .await
            .expect("retry under the ceiling");
        gateway_order_id = order.gateway_order_id.expect("gateway order id");
    }

    app.services
        .payments
        .mark_failed(&gateway_order_id)
        .await
        .expect("final failure");
    let (order, _) = app.services.orders.get(order_id).await.expect("order");
    assert_eq!(order.payment_attempts, 3);
    let err = app
        .services
        .payments
        .retry(order.customer_id, order_id)
        .await
        .expect_err("the ceiling is the ceiling");
    assert_matches!(err, ServiceError::PaymentFailed(_));
}

#[tokio::test]
async fn confirmation_fails_when_stock_sold_out_in_the_meantime() {
    let app = spawn_app().await;
    let (order_id, variant_id, gateway_order_id) =
        online_order(&app, "soldout@example.com", dec!(80), 1).await;

    // The last unit goes to someone else while the customer is paying.
    app.services
        .catalog
        .set_variant_stock(variant_id, 0)
        .await
        .expect("stock change");

    let err = app
        .services
        .payments
        .confirm(PaymentCallback {
            gateway_order_id: gateway_order_id.clone(),
            payment_id: "pay_1".into(),
            signature: sign_callback(&gateway_order_id, "pay_1"),
        })
        .await
        .expect_err("cannot settle without stock");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The order is left pending for support to resolve.
    let (order, _) = app.services.orders.get(order_id).await.expect("order");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn unknown_gateway_orders_are_not_found() {
    let app = spawn_app().await;
    let err = app
        .services
        .payments
        .confirm(PaymentCallback {
            gateway_order_id: "gw_order_999".into(),
            payment_id: "pay_1".into(),
            signature: sign_callback("gw_order_999", "pay_1"),
        })
        .await
        .expect_err("no such gateway order");
    assert_matches!(err, ServiceError::NotFound(_));
}
