mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
};
use uuid::Uuid;

use common::*;

async fn walk_to_delivered(app: &TestApp, order_id: Uuid) {
    for status in [
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        app.services
            .orders
            .update_status(order_id, status, None)
            .await
            .expect("forward transition should succeed");
    }
}

#[tokio::test]
async fn cod_order_walks_the_chain_and_collects_on_delivery() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "chain@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Teapot", dec!(30), 5).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 2)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    app.services
        .orders
        .update_status(order.id, OrderStatus::Processing, None)
        .await
        .expect("pending to processing");
    walk_to_delivered(&app, order.id).await;

    let (order, items) = app.services.orders.get(order.id).await.expect("order");
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert!(items.iter().all(|i| i.status == OrderStatus::Delivered));

    let history = app.services.orders.history(order.id).await.expect("history");
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].status, OrderStatus::Pending);
    assert_eq!(history[4].status, OrderStatus::Delivered);
}

#[tokio::test]
async fn skipping_states_is_rejected() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "skip@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Kettle", dec!(30), 5).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    let err = app
        .services
        .orders
        .update_status(order.id, OrderStatus::Delivered, None)
        .await
        .expect_err("pending cannot jump to delivered");
    assert_matches!(err, ServiceError::InvalidStatusTransition { .. });
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_and_restores_stock() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "cancel@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Armchair", dec!(60), 3).await;
    fund_wallet(&app, customer.id, dec!(60)).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(0));
    assert_eq!(variant_stock(&app, variant_id).await, 2);

    let cancelled = app
        .services
        .orders
        .cancel_order(Some(customer.id), order.id, Some("changed my mind".into()))
        .await
        .expect("cancellation should succeed");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed my mind"));
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(60));
    assert_eq!(variant_stock(&app, variant_id).await, 3);
}

#[tokio::test]
async fn cancellation_window_closes_when_the_order_ships() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "late@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Bookshelf", dec!(90), 2).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    app.services
        .orders
        .update_status(order.id, OrderStatus::Processing, None)
        .await
        .expect("to processing");
    app.services
        .orders
        .update_status(order.id, OrderStatus::Shipped, None)
        .await
        .expect("to shipped");

    let err = app
        .services
        .orders
        .cancel_order(Some(customer.id), order.id, None)
        .await
        .expect_err("shipped orders cannot be cancelled");
    assert_matches!(err, ServiceError::InvalidStatusTransition { .. });
}

#[tokio::test]
async fn cancelling_one_item_refunds_its_share_of_the_discount() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "partial@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, mug_variant) = seed_product(&app, "Mug", dec!(10), 5).await;
    let (_, vase_variant) = seed_product(&app, "Vase", dec!(20), 5).await;
    seed_percent_coupon(&app, "TEN", dec!(10), None, None).await;
    fund_wallet(&app, customer.id, dec!(37)).await;

    app.services
        .carts
        .add_item(customer.id, mug_variant, 1)
        .await
        .expect("add mug");
    app.services
        .carts
        .add_item(customer.id, vase_variant, 1)
        .await
        .expect("add vase");
    app.services
        .carts
        .apply_coupon(customer.id, "ten")
        .await
        .expect("apply coupon");

    // Subtotal 30, discount 3, shipping 10: wallet pays 37.
    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    assert_eq!(order.final_amount, dec!(37));
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(0));

    let vase_line = items
        .iter()
        .find(|i| i.product_name == "Vase")
        .expect("vase line");
    assert_eq!(vase_line.discount_share, dec!(2.00));

    let cancelled = app
        .services
        .orders
        .cancel_item(customer.id, order.id, vase_line.id)
        .await
        .expect("item cancellation should succeed");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    // Refund is the line total minus its prorated coupon share.
    assert_eq!(cancelled.refunded_amount, dec!(18.00));
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(18.00));
    assert_eq!(variant_stock(&app, vase_variant).await, 5);

    let (order, _) = app.services.orders.get(order.id).await.expect("order");
    assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(order.subtotal, dec!(10.00));
    assert_eq!(order.final_amount, dec!(19.00));
}

#[tokio::test]
async fn a_second_item_cancel_on_the_same_paid_order_still_refunds() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "twice@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, plate_variant) = seed_product(&app, "Plate", dec!(10), 3).await;
    let (_, bowl_variant) = seed_product(&app, "Bowl", dec!(20), 3).await;
    let (_, jug_variant) = seed_product(&app, "Jug", dec!(30), 3).await;
    fund_wallet(&app, customer.id, dec!(60)).await;

    for variant in [plate_variant, bowl_variant, jug_variant] {
        app.services
            .carts
            .add_item(customer.id, variant, 1)
            .await
            .expect("add to cart");
    }

    // Subtotal 60 clears the free-shipping threshold: wallet pays 60.
    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(0));

    let line = |name: &str| {
        items
            .iter()
            .find(|i| i.product_name == name)
            .expect("order line")
            .id
    };

    let plate = app
        .services
        .orders
        .cancel_item(customer.id, order.id, line("Plate"))
        .await
        .expect("first item cancellation");
    assert_eq!(plate.refunded_amount, dec!(10));
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(10));

    // The order is now partially refunded, which must not stop the next
    // line from being refunded and restocked.
    let bowl = app
        .services
        .orders
        .cancel_item(customer.id, order.id, line("Bowl"))
        .await
        .expect("second item cancellation");
    assert_eq!(bowl.refunded_amount, dec!(20));
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(30));
    assert_eq!(variant_stock(&app, bowl_variant).await, 3);

    let (order, _) = app.services.orders.get(order.id).await.expect("order");
    assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(order.final_amount, dec!(30));
}

#[tokio::test]
async fn full_cancel_after_a_partial_refund_credits_the_remainder() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "remainder@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, plate_variant) = seed_product(&app, "Plate", dec!(10), 3).await;
    let (_, bowl_variant) = seed_product(&app, "Bowl", dec!(20), 3).await;
    let (_, jug_variant) = seed_product(&app, "Jug", dec!(30), 3).await;
    fund_wallet(&app, customer.id, dec!(60)).await;

    for variant in [plate_variant, bowl_variant, jug_variant] {
        app.services
            .carts
            .add_item(customer.id, variant, 1)
            .await
            .expect("add to cart");
    }

    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    let plate_line = items
        .iter()
        .find(|i| i.product_name == "Plate")
        .expect("plate line");
    app.services
        .orders
        .cancel_item(customer.id, order.id, plate_line.id)
        .await
        .expect("item cancellation");
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(10));

    let cancelled = app
        .services
        .orders
        .cancel_order(Some(customer.id), order.id, None)
        .await
        .expect("whole-order cancellation");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    // The outstanding 50 comes back and the payment settles as refunded,
    // not cancelled: money did move on this order.
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(60));
    assert_eq!(variant_stock(&app, bowl_variant).await, 3);
    assert_eq!(variant_stock(&app, jug_variant).await, 3);
}

#[tokio::test]
async fn cancelling_the_last_line_cancels_the_whole_order() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "lastline@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Clock", dec!(55), 4).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    let item = app
        .services
        .orders
        .cancel_item(customer.id, order.id, items[0].id)
        .await
        .expect("last-line cancellation should succeed");
    assert_eq!(item.status, OrderStatus::Cancelled);

    let (order, _) = app.services.orders.get(order.id).await.expect("order");
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(variant_stock(&app, variant_id).await, 4);
}

#[tokio::test]
async fn item_cancel_that_breaks_the_coupon_minimum_is_refused() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "couponmin@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, small_variant) = seed_product(&app, "Coaster", dec!(10), 5).await;
    let (_, large_variant) = seed_product(&app, "Tray", dec!(20), 5).await;
    seed_percent_coupon(&app, "MIN25", dec!(10), Some(dec!(25)), None).await;

    app.services
        .carts
        .add_item(customer.id, small_variant, 1)
        .await
        .expect("add coaster");
    app.services
        .carts
        .add_item(customer.id, large_variant, 1)
        .await
        .expect("add tray");
    app.services
        .carts
        .apply_coupon(customer.id, "MIN25")
        .await
        .expect("apply coupon");

    let (order, items) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    let tray_line = items
        .iter()
        .find(|i| i.product_name == "Tray")
        .expect("tray line");

    // Dropping the tray leaves 10, below the coupon's 25 minimum.
    let err = app
        .services
        .orders
        .cancel_item(customer.id, order.id, tray_line.id)
        .await
        .expect_err("cancel must not undercut the coupon minimum");
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn approved_return_refunds_the_prorated_total() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "returns@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, mug_variant) = seed_product(&app, "Mug", dec!(10), 5).await;
    let (_, vase_variant) = seed_product(&app, "Vase", dec!(20), 5).await;
    seed_percent_coupon(&app, "TEN", dec!(10), None, None).await;
    fund_wallet(&app, customer.id, dec!(37)).await;

    app.services
        .carts
        .add_item(customer.id, mug_variant, 1)
        .await
        .expect("add mug");
    app.services
        .carts
        .add_item(customer.id, vase_variant, 1)
        .await
        .expect("add vase");
    app.services
        .carts
        .apply_coupon(customer.id, "TEN")
        .await
        .expect("apply coupon");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    walk_to_delivered(&app, order.id).await;

    let order = app
        .services
        .orders
        .request_return(customer.id, order.id, "does not match the photos".into())
        .await
        .expect("return request should succeed");
    assert_eq!(order.status, OrderStatus::ReturnPending);
    // Stock goes back on the shelf at request time.
    assert_eq!(variant_stock(&app, mug_variant).await, 5);
    assert_eq!(variant_stock(&app, vase_variant).await, 5);

    let order = app
        .services
        .returns
        .approve(order.id)
        .await
        .expect("approval should succeed");
    assert_eq!(order.status, OrderStatus::Returned);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    // Refund covers goods minus the discount, not the shipping.
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(27.00));

    let (_, items) = app.services.orders.get(order.id).await.expect("order");
    assert!(items.iter().all(|i| i.status == OrderStatus::Returned));
}

#[tokio::test]
async fn rejected_return_puts_the_order_back_to_delivered() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "rejected@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Blanket", dec!(60), 3).await;
    fund_wallet(&app, customer.id, dec!(60)).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Wallet).await;
    walk_to_delivered(&app, order.id).await;
    app.services
        .orders
        .request_return(customer.id, order.id, "wrong colour".into())
        .await
        .expect("return request");
    assert_eq!(variant_stock(&app, variant_id).await, 3);

    let order = app
        .services
        .returns
        .reject(order.id, Some("outside the return window".into()))
        .await
        .expect("rejection should succeed");
    assert_eq!(order.status, OrderStatus::Delivered);
    // No refund happened.
    assert_eq!(wallet_balance(&app, customer.id).await, dec!(0));
    // The restored stock is reserved again.
    assert_eq!(variant_stock(&app, variant_id).await, 2);

    let (_, items) = app.services.orders.get(order.id).await.expect("order");
    assert!(items.iter().all(|i| i.status == OrderStatus::Delivered));
    assert!(items.iter().all(|i| i.return_reason.is_none()));
}

#[tokio::test]
async fn returns_need_a_delivered_order_and_a_reason() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "tooearly@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Rug", dec!(80), 2).await;
    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;
    let err = app
        .services
        .orders
        .request_return(customer.id, order.id, "too slow".into())
        .await
        .expect_err("undelivered orders cannot be returned");
    assert_matches!(err, ServiceError::InvalidOperation(_));

    app.services
        .orders
        .update_status(order.id, OrderStatus::Processing, None)
        .await
        .expect("to processing");
    walk_to_delivered(&app, order.id).await;
    let err = app
        .services
        .orders
        .request_return(customer.id, order.id, "   ".into())
        .await
        .expect_err("a blank reason is not a reason");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn customers_cannot_touch_each_others_orders() {
    let app = spawn_app().await;
    let alice = seed_customer(&app, "alice2@example.com").await;
    let mallory = seed_customer(&app, "mallory2@example.com").await;
    let address = seed_address(&app, alice.id).await;
    let (_, variant_id) = seed_product(&app, "Lamp", dec!(45), 3).await;
    app.services
        .carts
        .add_item(alice.id, variant_id, 1)
        .await
        .expect("add to cart");

    let (order, _) = place_order(&app, alice.id, address.id, PaymentMethod::Cod).await;
    let err = app
        .services
        .orders
        .cancel_order(Some(mallory.id), order.id, None)
        .await
        .expect_err("foreign orders must look like they do not exist");
    assert_matches!(err, ServiceError::NotFound(_));
}
