use crate::{
    config::AppConfig,
    entities::{
        address, cart_item, coupon, order, order_item, order_status_history, Address, CartItem,
        Coupon, OrderItemModel, OrderModel, OrderStatus, PaymentMethod, PaymentStatus, Product,
        ProductVariant, TransactionSource,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        catalog,
        payments::PaymentGateway,
        pricing,
        wallet::WalletService,
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ORDER_CODE_ATTEMPTS: usize = 5;

/// Places orders. Checkout revalidates every cart line against the live
/// catalog, prorates the coupon discount across lines, takes stock with
/// guarded updates and dispatches payment, all in one transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
    wallets: WalletService,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PlaceOrderInput {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
}

/// Checkout either places the order or reports what changed under the
/// customer's feet. An adjusted cart is never silently ordered.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Placed {
        order: OrderModel,
        items: Vec<OrderItemModel>,
    },
    Adjusted {
        notices: Vec<String>,
    },
}

struct ValidatedLine {
    product_id: Uuid,
    variant_id: Uuid,
    product_name: String,
    size: String,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        carts: CartService,
        wallets: WalletService,
    ) -> Self {
        Self { db, config, event_sender, gateway, carts, wallets }
    }

    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn place_order(
        &self,
        customer_id: Uuid,
        input: PlaceOrderInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.carts.find_or_create_cart(&txn, customer_id).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".into()));
        }

        let shipping_address = Address::find_by_id(input.address_id)
            .filter(address::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".into()))?;

        // Revalidate every line against the live catalog before money moves.
        let mut notices = Vec::new();
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let variant = ProductVariant::find_by_id(item.variant_id).one(&txn).await?;
            let product = match &variant {
                Some(v) => Product::find_by_id(v.product_id).one(&txn).await?,
                None => None,
            };
            let (variant, product) = match (variant, product) {
                (Some(v), Some(p)) if p.is_purchasable() => (v, p),
                _ => {
                    notices.push("An item is no longer available and was removed".to_string());
                    CartItem::delete_many()
                        .filter(cart_item::Column::Id.eq(item.id))
                        .exec(&txn)
                        .await?;
                    continue;
                }
            };

            let current_price = pricing::effective_unit_price(
                variant.price,
                variant.sale_price,
                product.offer_percent,
            );
            let mut quantity = item.quantity;
            if variant.stock_quantity < quantity {
                quantity = variant.stock_quantity;
                if quantity == 0 {
                    notices.push(format!("{} ({}) is out of stock", product.name, variant.size));
                    CartItem::delete_many()
                        .filter(cart_item::Column::Id.eq(item.id))
                        .exec(&txn)
                        .await?;
                    continue;
                }
                notices.push(format!(
                    "{} ({}): quantity reduced to {}",
                    product.name, variant.size, quantity
                ));
            }
            if current_price != item.unit_price {
                notices.push(format!(
                    "{} ({}): price changed from {} to {}",
                    product.name, variant.size, item.unit_price, current_price
                ));
            }
            if quantity != item.quantity || current_price != item.unit_price {
                let mut active: cart_item::ActiveModel = item.clone().into();
                active.quantity = Set(quantity);
                active.unit_price = Set(current_price);
                active.line_total = Set(current_price * Decimal::from(quantity));
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            lines.push(ValidatedLine {
                product_id: product.id,
                variant_id: variant.id,
                product_name: product.name,
                size: variant.size,
                unit_price: current_price,
                quantity,
                line_total: current_price * Decimal::from(quantity),
            });
        }

        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        // Coupon recheck against the revalidated subtotal.
        let mut coupon_id = cart.coupon_id;
        let mut discount = Decimal::ZERO;
        if let Some(id) = cart.coupon_id {
            match Coupon::find_by_id(id)
                .filter(coupon::Column::IsDeleted.eq(false))
                .one(&txn)
                .await?
            {
                Some(c) if c.is_live(Utc::now()) && subtotal >= c.min_cart_value => {
                    if let Some(limit) = c.usage_limit {
                        let used = crate::services::coupons::usage_count(&txn, c.id).await?;
                        if used >= limit as u64 {
                            notices.push(format!("Coupon {} has reached its usage limit", c.code));
                            coupon_id = None;
                        }
                    }
                    if coupon_id.is_some() {
                        discount = pricing::coupon_discount(
                            c.discount_type,
                            c.value,
                            c.max_discount,
                            subtotal,
                        );
                    }
                }
                Some(c) => {
                    notices.push(format!("Coupon {} no longer applies", c.code));
                    coupon_id = None;
                }
                None => {
                    notices.push("Applied coupon no longer exists".into());
                    coupon_id = None;
                }
            }
        }

        if !notices.is_empty() {
            // Persist the corrected cart and bounce the customer back.
            if coupon_id != cart.coupon_id {
                let mut active: crate::entities::cart::ActiveModel = cart.clone().into();
                active.coupon_id = Set(coupon_id);
                active.update(&txn).await?;
            }
            self.carts.recompute_totals(&txn, cart.id).await?;
            txn.commit().await?;
            return Ok(CheckoutOutcome::Adjusted { notices });
        }
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".into()));
        }

        let shipping = pricing::shipping_charge(
            subtotal,
            self.config.shipping_flat_rate(),
            self.config.free_shipping_threshold(),
        );
        let final_amount = subtotal - discount + shipping;
        let line_totals: Vec<Decimal> = lines.iter().map(|l| l.line_total).collect();
        let discount_shares = pricing::prorate_lines(&line_totals, discount);

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let currency = self.config.currency.clone();

        // COD and wallet orders take stock and consume the cart right away.
        // Online orders leave both alone until the gateway callback verifies,
        // so an abandoned payment holds no inventory.
        let (status, payment_status, gateway_order_id, payment_attempts) =
            match input.payment_method {
                PaymentMethod::Cod => {
                    for line in &lines {
                        catalog::decrement_stock(&txn, line.variant_id, line.quantity).await?;
                    }
                    (OrderStatus::Pending, PaymentStatus::Pending, None, 0)
                }
                PaymentMethod::Wallet => {
                    for line in &lines {
                        catalog::decrement_stock(&txn, line.variant_id, line.quantity).await?;
                    }
                    self.wallets
                        .debit(
                            &txn,
                            customer_id,
                            final_amount,
                            TransactionSource::OrderPayment,
                            Some(order_id),
                            "Order payment",
                        )
                        .await?;
                    (OrderStatus::Processing, PaymentStatus::Completed, None, 0)
                }
                PaymentMethod::Online => {
                    let gw = self.gateway.create_order(final_amount, &currency).await?;
                    (
                        OrderStatus::Pending,
                        PaymentStatus::Pending,
                        Some(gw.gateway_order_id),
                        1,
                    )
                }
            };
        let consume_cart = input.payment_method != PaymentMethod::Online;

        let order_code = self.generate_order_code(&txn).await?;
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_code: Set(order_code.clone()),
            customer_id: Set(customer_id),
            status: Set(status),
            payment_method: Set(input.payment_method),
            payment_status: Set(payment_status),
            gateway_order_id: Set(gateway_order_id),
            payment_attempts: Set(payment_attempts),
            coupon_id: Set(coupon_id),
            subtotal: Set(subtotal),
            coupon_discount: Set(discount),
            shipping_total: Set(shipping),
            final_amount: Set(final_amount),
            currency: Set(currency),
            shipping_address: Set(serde_json::to_value(&shipping_address)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            cancellation_reason: Set(None),
            placed_at: Set(now),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(lines.len());
        for (line, share) in lines.into_iter().zip(discount_shares) {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                product_name: Set(line.product_name),
                size: Set(line.size),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.line_total),
                discount_share: Set(share),
                status: Set(status),
                return_reason: Set(None),
                refunded_amount: Set(Decimal::ZERO),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            order_items.push(item);
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(status),
            description: Set("Order placed".into()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if consume_cart {
            let cart_id = cart.id;
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart_id))
                .exec(&txn)
                .await?;
            let mut cart_active: crate::entities::cart::ActiveModel = cart.into();
            cart_active.coupon_id = Set(None);
            cart_active.update(&txn).await?;
            self.carts.recompute_totals(&txn, cart_id).await?;
        }

        txn.commit().await?;

        info!(order_code = %order_code, "order placed");
        self.event_sender
            .send_or_log(Event::OrderPlaced { order_id, order_code })
            .await;
        Ok(CheckoutOutcome::Placed { order: order_model, items: order_items })
    }

    /// Human-facing code: ORD + yymmdd + four random digits. Collisions are
    /// rare at this keyspace; re-roll a few times and give up loudly.
    async fn generate_order_code(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<String, ServiceError> {
        for _ in 0..ORDER_CODE_ATTEMPTS {
            let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
            let code = format!("ORD{}{:04}", Utc::now().format("%y%m%d"), suffix);
            let taken = crate::entities::Order::find()
                .filter(order::Column::OrderCode.eq(code.clone()))
                .one(txn)
                .await?
                .is_some();
            if !taken {
                return Ok(code);
            }
            warn!(code = %code, "order code collision, retrying");
        }
        Err(ServiceError::InternalError(
            "Could not allocate a unique order code".into(),
        ))
    }
}
