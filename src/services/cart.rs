use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item, coupon, order, product, Cart, CartItem, CartModel, Coupon, Order,
        OrderStatus, Product, ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const MAX_QUANTITY_PER_LINE: i32 = 10;

/// One customer cart with denormalised totals on the head row.
///
/// Totals are recomputed from the lines after every mutation inside the
/// same transaction, so the head row is never stale relative to its lines.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

/// Cart payload returned to the storefront.
#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: CartModel,
    pub items: Vec<CartLineView>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub size: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub in_stock: bool,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, event_sender: EventSender) -> Self {
        Self { db, config, event_sender }
    }

    /// Fetches the customer's cart head, creating an empty one on first use.
    pub async fn find_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        if let Some(existing) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }
        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            subtotal: Set(Decimal::ZERO),
            coupon_id: Set(None),
            coupon_discount: Set(Decimal::ZERO),
            shipping_total: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(conn).await?)
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError("Quantity must be at least 1".into()));
        }
        let txn = self.db.begin().await?;
        let cart = self.find_or_create_cart(&txn, customer_id).await?;

        let variant = ProductVariant::find_by_id(variant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
        let product = Product::find_by_id(variant.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;
        if !product.is_purchasable() {
            return Err(ServiceError::InvalidOperation(
                "Product is not available for purchase".into(),
            ));
        }

        let unit_price =
            pricing::effective_unit_price(variant.price, variant.sale_price, product.offer_percent);

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&txn)
            .await?;
        let new_quantity = existing.as_ref().map_or(0, |i| i.quantity) + quantity;
        if new_quantity > MAX_QUANTITY_PER_LINE {
            return Err(ServiceError::InvalidOperation(format!(
                "At most {} units of a variant per order",
                MAX_QUANTITY_PER_LINE
            )));
        }
        if new_quantity > variant.stock_quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units in stock",
                variant.stock_quantity
            )));
        }

        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.unit_price = Set(unit_price);
                active.line_total = Set(unit_price * Decimal::from(new_quantity));
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    unit_price: Set(unit_price),
                    line_total: Set(unit_price * Decimal::from(quantity)),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let cart = self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;
        self.event_sender
            .send_or_log(Event::CartItemAdded { cart_id: cart.id, variant_id })
            .await;
        self.view(cart).await
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 || quantity > MAX_QUANTITY_PER_LINE {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 0 and {}",
                MAX_QUANTITY_PER_LINE
            )));
        }
        let txn = self.db.begin().await?;
        let cart = self.require_cart(&txn, customer_id).await?;
        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".into()))?;

        if quantity == 0 {
            item.delete(&txn).await?;
            let cart = self.recompute_totals(&txn, cart.id).await?;
            txn.commit().await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved { cart_id: cart.id, item_id })
                .await;
            return self.view(cart).await;
        }

        let variant = ProductVariant::find_by_id(item.variant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Variant not found".into()))?;
        if quantity > variant.stock_quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units in stock",
                variant.stock_quantity
            )));
        }
        let unit_price = item.unit_price;
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.line_total = Set(unit_price * Decimal::from(quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let cart = self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;
        self.event_sender
            .send_or_log(Event::CartItemUpdated { cart_id: cart.id, item_id })
            .await;
        self.view(cart).await
    }

    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        self.update_item_quantity(customer_id, item_id, 0).await
    }

    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.require_cart(&txn, customer_id).await?;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;
        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;
        Ok(())
    }

    /// Attaches a coupon after checking every eligibility rule.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        customer_id: Uuid,
        code: &str,
    ) -> Result<CartView, ServiceError> {
        let code = code.trim().to_uppercase();
        let txn = self.db.begin().await?;
        let cart = self.require_cart(&txn, customer_id).await?;
        if cart.subtotal.is_zero() {
            return Err(ServiceError::CouponRejected(
                "Cannot apply a coupon to an empty cart".into(),
            ));
        }
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .filter(coupon::Column::IsDeleted.eq(false))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::CouponRejected("Unknown coupon code".into()))?;
        if !coupon.is_live(Utc::now()) {
            return Err(ServiceError::CouponRejected(
                "Coupon is inactive or expired".into(),
            ));
        }
        if cart.subtotal < coupon.min_cart_value {
            return Err(ServiceError::CouponRejected(format!(
                "Cart subtotal must be at least {}",
                coupon.min_cart_value
            )));
        }
        if let Some(limit) = coupon.usage_limit {
            let used = crate::services::coupons::usage_count(&txn, coupon.id).await?;
            if used >= limit as u64 {
                return Err(ServiceError::CouponRejected(
                    "Coupon usage limit reached".into(),
                ));
            }
        }
        let already_used = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::CouponId.eq(coupon.id))
            .filter(order::Column::Status.ne(OrderStatus::PaymentFailed))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .count(&txn)
            .await?;
        if already_used > 0 {
            return Err(ServiceError::CouponRejected(
                "Coupon already used on a previous order".into(),
            ));
        }

        let mut active: cart::ActiveModel = cart.clone().into();
        active.coupon_id = Set(Some(coupon.id));
        active.update(&txn).await?;
        let cart = self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;
        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id: cart.id,
                coupon_id: coupon.id,
                discount: cart.coupon_discount,
            })
            .await;
        self.view(cart).await
    }

    pub async fn remove_coupon(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.require_cart(&txn, customer_id).await?;
        let coupon_id = cart.coupon_id;
        let mut active: cart::ActiveModel = cart.clone().into();
        active.coupon_id = Set(None);
        active.update(&txn).await?;
        let cart = self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;
        if coupon_id.is_some() {
            self.event_sender
                .send_or_log(Event::CouponRemoved { cart_id: cart.id })
                .await;
        }
        self.view(cart).await
    }

    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.find_or_create_cart(&*self.db, customer_id).await?;
        self.view(cart).await
    }

    async fn require_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart is empty".into()))
    }

    /// Recomputes subtotal, discount, shipping and total from the lines.
    /// Drops the coupon silently when the cart no longer qualifies for it.
    pub async fn recompute_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".into()))?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;
        let subtotal: Decimal = items.iter().map(|i| i.line_total).sum();

        let mut coupon_id = cart.coupon_id;
        let mut discount = Decimal::ZERO;
        if let Some(id) = cart.coupon_id {
            let coupon = Coupon::find_by_id(id).one(conn).await?;
            match coupon {
                Some(c) if c.is_live(Utc::now()) && subtotal >= c.min_cart_value => {
                    discount =
                        pricing::coupon_discount(c.discount_type, c.value, c.max_discount, subtotal);
                }
                _ => coupon_id = None,
            }
        }

        let shipping = pricing::shipping_charge(
            subtotal,
            self.config.shipping_flat_rate(),
            self.config.free_shipping_threshold(),
        );

        let mut active: cart::ActiveModel = cart.into();
        active.subtotal = Set(subtotal);
        active.coupon_id = Set(coupon_id);
        active.coupon_discount = Set(discount);
        active.shipping_total = Set(shipping);
        active.total = Set(subtotal - discount + shipping);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    async fn view(&self, cart: CartModel) -> Result<CartView, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let variant = ProductVariant::find_by_id(item.variant_id).one(&*self.db).await?;
            let product = Product::find_by_id(item.product_id)
                .filter(product::Column::IsDeleted.eq(false))
                .one(&*self.db)
                .await?;
            let (product_name, size, in_stock) = match (&product, &variant) {
                (Some(p), Some(v)) => {
                    (p.name.clone(), v.size.clone(), v.stock_quantity >= item.quantity)
                }
                _ => (String::from("(unavailable)"), String::new(), false),
            };
            lines.push(CartLineView {
                id: item.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                product_name,
                size,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                in_stock,
            });
        }
        let coupon_code = match cart.coupon_id {
            Some(id) => Coupon::find_by_id(id).one(&*self.db).await?.map(|c| c.code),
            None => None,
        };
        Ok(CartView { cart, items: lines, coupon_code })
    }
}
