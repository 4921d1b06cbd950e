mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{coupon::CouponType, PaymentMethod},
    errors::ServiceError,
    services::coupons::CreateCouponInput,
};

use common::*;

#[tokio::test]
async fn percentage_coupon_discounts_the_cart() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "percent@example.com").await;
    let (_, variant_id) = seed_product(&app, "Scarf", dec!(30), 5).await;
    seed_percent_coupon(&app, "TEN", dec!(10), None, None).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let cart = app
        .services
        .carts
        .apply_coupon(customer.id, "ten")
        .await
        .expect("apply should succeed");

    assert_eq!(cart.coupon_code.as_deref(), Some("TEN"));
    assert_eq!(cart.cart.coupon_discount, dec!(3.00));
    // 30 - 3 + 10 shipping.
    assert_eq!(cart.cart.total, dec!(37.00));
}

#[tokio::test]
async fn fixed_coupon_never_exceeds_the_subtotal() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "fixed@example.com").await;
    let (_, variant_id) = seed_product(&app, "Keychain", dec!(6), 5).await;
    app.services
        .coupons
        .create_coupon(CreateCouponInput {
            code: "FLAT50".into(),
            discount_type: CouponType::Fixed,
            value: dec!(50),
            min_cart_value: None,
            max_discount: None,
            usage_limit: None,
            expires_at: Utc::now() + Duration::days(7),
        })
        .await
        .expect("coupon");

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let cart = app
        .services
        .carts
        .apply_coupon(customer.id, "FLAT50")
        .await
        .expect("apply should succeed");

    assert_eq!(cart.cart.coupon_discount, dec!(6));
    // The goods are free but the shipping is not: the free-shipping
    // threshold looks at the pre-discount subtotal.
    assert_eq!(cart.cart.shipping_total, dec!(10));
    assert_eq!(cart.cart.total, dec!(10));
}

#[tokio::test]
async fn percentage_discount_is_capped_by_max_discount() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "capped@example.com").await;
    let (_, variant_id) = seed_product(&app, "Jacket", dec!(100), 5).await;
    app.services
        .coupons
        .create_coupon(CreateCouponInput {
            code: "BIG20".into(),
            discount_type: CouponType::Percentage,
            value: dec!(20),
            min_cart_value: None,
            max_discount: Some(dec!(15)),
            usage_limit: None,
            expires_at: Utc::now() + Duration::days(7),
        })
        .await
        .expect("coupon");

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let cart = app
        .services
        .carts
        .apply_coupon(customer.id, "BIG20")
        .await
        .expect("apply should succeed");

    // 20% of 100 is 20, capped to 15.
    assert_eq!(cart.cart.coupon_discount, dec!(15));
    assert_eq!(cart.cart.total, dec!(85));
}

#[tokio::test]
async fn cart_below_the_minimum_is_rejected() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "toosmall@example.com").await;
    let (_, variant_id) = seed_product(&app, "Pin", dec!(4), 5).await;
    seed_percent_coupon(&app, "MIN100", dec!(10), Some(dec!(100)), None).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let err = app
        .services
        .carts
        .apply_coupon(customer.id, "MIN100")
        .await
        .expect_err("below-minimum carts do not qualify");
    assert_matches!(err, ServiceError::CouponRejected(_));
}

#[tokio::test]
async fn deactivated_coupons_are_rejected() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "inactive@example.com").await;
    let (_, variant_id) = seed_product(&app, "Poster", dec!(18), 5).await;
    let coupon = seed_percent_coupon(&app, "PAUSED", dec!(10), None, None).await;
    app.services
        .coupons
        .set_active(coupon.id, false)
        .await
        .expect("deactivate");

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    let err = app
        .services
        .carts
        .apply_coupon(customer.id, "PAUSED")
        .await
        .expect_err("inactive coupons do not apply");
    assert_matches!(err, ServiceError::CouponRejected(_));
}

#[tokio::test]
async fn usage_limit_counts_orders_not_applications() {
    let app = spawn_app().await;
    let alice = seed_customer(&app, "alice3@example.com").await;
    let bob = seed_customer(&app, "bob3@example.com").await;
    let alice_address = seed_address(&app, alice.id).await;
    let (_, variant_id) = seed_product(&app, "Hat", dec!(30), 10).await;
    let coupon = seed_percent_coupon(&app, "ONCE", dec!(10), None, Some(1)).await;

    app.services
        .carts
        .add_item(alice.id, variant_id, 1)
        .await
        .expect("alice adds");
    app.services
        .carts
        .apply_coupon(alice.id, "ONCE")
        .await
        .expect("alice applies");
    let (order, _) = place_order(&app, alice.id, alice_address.id, PaymentMethod::Cod).await;
    assert_eq!(
        app.services.coupons.usage(coupon.id).await.expect("usage"),
        1
    );

    app.services
        .carts
        .add_item(bob.id, variant_id, 1)
        .await
        .expect("bob adds");
    let err = app
        .services
        .carts
        .apply_coupon(bob.id, "ONCE")
        .await
        .expect_err("the single redemption is taken");
    assert_matches!(err, ServiceError::CouponRejected(_));

    // Cancelling the consuming order releases the redemption.
    app.services
        .orders
        .cancel_order(Some(alice.id), order.id, None)
        .await
        .expect("cancel");
    assert_eq!(
        app.services.coupons.usage(coupon.id).await.expect("usage"),
        0
    );
    app.services
        .carts
        .apply_coupon(bob.id, "ONCE")
        .await
        .expect("redemption is free again");
}

#[tokio::test]
async fn a_customer_cannot_reuse_a_coupon() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "repeat@example.com").await;
    let address = seed_address(&app, customer.id).await;
    let (_, variant_id) = seed_product(&app, "Gloves", dec!(30), 10).await;
    seed_percent_coupon(&app, "WELCOME", dec!(10), None, None).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("add to cart");
    app.services
        .carts
        .apply_coupon(customer.id, "WELCOME")
        .await
        .expect("first use");
    place_order(&app, customer.id, address.id, PaymentMethod::Cod).await;

    app.services
        .carts
        .add_item(customer.id, variant_id, 1)
        .await
        .expect("second cart");
    let err = app
        .services
        .carts
        .apply_coupon(customer.id, "WELCOME")
        .await
        .expect_err("one redemption per customer");
    assert_matches!(err, ServiceError::CouponRejected(_));
}

#[tokio::test]
async fn shrinking_the_cart_drops_an_ineligible_coupon() {
    let app = spawn_app().await;
    let customer = seed_customer(&app, "shrink@example.com").await;
    let (_, variant_id) = seed_product(&app, "Candle", dec!(10), 10).await;
    seed_percent_coupon(&app, "MIN25", dec!(10), Some(dec!(25)), None).await;

    let cart = app
        .services
        .carts
        .add_item(customer.id, variant_id, 3)
        .await
        .expect("add to cart");
    app.services
        .carts
        .apply_coupon(customer.id, "MIN25")
        .await
        .expect("30 clears the 25 minimum");

    let item_id = cart.items[0].id;
    let cart = app
        .services
        .carts
        .update_item_quantity(customer.id, item_id, 1)
        .await
        .expect("shrink the line");

    assert!(cart.coupon_code.is_none());
    assert_eq!(cart.cart.coupon_discount, dec!(0));
    assert_eq!(cart.cart.total, dec!(20));
}

#[tokio::test]
async fn duplicate_codes_and_past_expiries_are_refused() {
    let app = spawn_app().await;
    seed_percent_coupon(&app, "DUPE", dec!(10), None, None).await;

    let err = app
        .services
        .coupons
        .create_coupon(CreateCouponInput {
            code: "dupe".into(),
            discount_type: CouponType::Percentage,
            value: dec!(5),
            min_cart_value: None,
            max_discount: None,
            usage_limit: None,
            expires_at: Utc::now() + Duration::days(1),
        })
        .await
        .expect_err("codes are unique case-insensitively");
    assert_matches!(err, ServiceError::Conflict(_));

    let err = app
        .services
        .coupons
        .create_coupon(CreateCouponInput {
            code: "STALE".into(),
            discount_type: CouponType::Percentage,
            value: dec!(5),
            min_cart_value: None,
            max_discount: None,
            usage_limit: None,
            expires_at: Utc::now() - Duration::days(1),
        })
        .await
        .expect_err("expiry must be in the future");
    assert_matches!(err, ServiceError::ValidationError(_));
}
