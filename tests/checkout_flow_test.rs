mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::checkout::{CheckoutOutcome, PlaceOrderInput},
};

use common::*;

#[tokio::test]
async fn cod_checkout_takes_stock_and_clears_the_cart() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "cod@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Linen Shirt", dec!(30), 5).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 2)
        .await
        .expect("add to cart");

    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.subtotal, dec!(60));
    // Subtotal clears the free-shipping threshold.
    assert_eq!(order.shipping_total, dec!(0));
    assert_eq!(order.final_amount, dec!(60));
    assert!(order.order_code.starts_with("ORD"));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);

    assert_eq!(variant_stock(&app, variant_id).await, 3);
    let cart = app.services.carts.get_cart(customer.id).await.expect("cart");
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.total, dec!(0));
}

#[tokio::test]
async fn small_orders_pay_flat_rate_shipping() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "shipping@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Socks", dec!(8), 10).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 2)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    assert_eq!(order.subtotal, dec!(16));
    assert_eq!(order.shipping_total, dec!(10));
    assert_eq!(order.final_amount, dec!(26));
}

#[tokio::test]
async fn wallet_checkout_debits_and_starts_processing() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "wallet@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Wool Coat", dec!(30), 5).await;
    fund_wallet(&app, customer.id, dec!(100)).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 2)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;

    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(40));
    assert_eq!(variant_stock(&app, variant_id).await, 3);
}

#[tokio::test]
async fn wallet_checkout_with_short_balance_changes_nothing() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "broke@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Overcoat", dec!(60), 5).await;
    fund_wallet(&app, customer.id, dec!(50)).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let err = app
        .services
        .checkout
        .place_order(
            customer.id,
            PlaceOrderInput {
                address_id: address.id,
                payment_method: PaymentMethod::Wallet,
            },
        )
        .await
        .expect_err("debit should be refused");
    assert_matches!(err, ServiceError::InsufficientBalance(_));

    // The whole transaction rolled back: balance, stock and cart untouched.
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(50));
    assert_eq!(variant_stock(&app, variant_id).await, 5);
    let cart = app.services.carts.get_cart(customer.id).await.expect("cart");
    assert_eq!(cart.items.len(), 1);
    let (orders, _) = app
        .services
        .orders
        .list_for_customer(customer.id, 1, 20)
        .await
        .expect("order list");
    assert!(orders.is_empty());
}

#[tokio::test]
async fn online_checkout_holds_no_stock_until_payment_verifies() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "online@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Sneakers", dec!(80), 4).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Online).await;

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.gateway_order_id.is_some());
    assert_eq!(order.payment_attempts, 1);

    // Stock and cart are only touched by the verified callback.
    assert_eq!(variant_stock(&app, variant_id).await, 4);
    let cart = app.services.carts.get_cart(customer.id).await.expect("cart");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn empty_cart_checkout_is_rejected() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "empty@example.com").await;
    let address = seed_address(&app, customer.id).await;

    let err = app
        .services
        .checkout
        .place_order(
            customer.id,
            PlaceOrderInput {
                address_id: address.id,
                payment_method: PaymentMethod::Cod,
            },
        )
        .await
        .expect_err("empty cart cannot check out");
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn stock_drop_adjusts_the_cart_instead_of_placing() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "raced@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Limited Print", dec!(40), 5).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 3)
        .await
        .expect("add to cart");

    // Someone buys it out from under the cart.
    app.services
        .catalog
        .set_variant_stock(variant_id, 1)
        .await
        .expect("restock");

    let outcome = app
        .services
        .checkout
        .place_order(
            customer.id,
            PlaceOrderInput {
                address_id: address.id,
                payment_method: PaymentMethod::Cod,
            },
        )
        .await
        .expect("checkout should report the adjustment");
    let notices = match outcome {
        CheckoutOutcome::Adjusted { notices } => notices,
        CheckoutOutcome::Placed { .. } => panic!("a changed cart must not be ordered"),
    };
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("quantity reduced to 1"));

    // The corrected quantity is persisted, so a second attempt succeeds.
    let cart = app.services.carts.get_cart(customer.id).await.expect("cart");
    assert_eq!(cart.items[0].quantity, 1);
    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    assert_eq!(order.subtotal, dec!(40));
}

#[tokio::test]
async fn price_change_is_reported_before_placing() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "reprice@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Desk Lamp", dec!(25), 5).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    app.services
        .catalog
        .update_variant_pricing(variant_id, dec!(35), None)
        .await
        .expect("reprice");

    let outcome = app
        .services
        .checkout
        .place_order(
            customer.id,
            PlaceOrderInput {
                address_id: address.id,
                payment_method: PaymentMethod::Cod,
            },
        )
        .await
        .expect("checkout should report the price change");
    assert_matches!(outcome, CheckoutOutcome::Adjusted { .. });

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    assert_eq!(order.subtotal, dec!(35));
}

#[tokio::test]
async fn checkout_rejects_an_address_of_another_customer() {
    let app = spawn_app().await;
    let alice = seed_customer(&app, "alice@example.com").await;
    let mallory = seed_customer(&app, "mallory@example.com").await;
    let alice_address = seed_address(&app, alice.id).await;
    let (_, variant_id) = seed_product(&app, "Notebook", dec!(12), 5).await;

    app.services
        .carts
        .add_item(mallory.id, variant_id, 1)
        .await
        .expect("add to cart");

    let err = app
        .services
        .checkout
        .place_order(
            mallory.id,
            PlaceOrderInput {
                address_id: alice_address.id,
                payment_method: PaymentMethod::Cod,
            },
        )
        .await
        .expect_err("foreign address must not be usable");
    assert_matches!(err, ServiceError::NotFound(_));
}
