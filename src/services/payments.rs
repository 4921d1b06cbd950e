use crate::{
    config::{AppConfig, GatewayConfig},
    entities::{
        cart_item, order, order_item, CartItem, Order, OrderItem, OrderModel, OrderStatus,
        PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{cart::CartService, catalog, orders::OrderService},
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// A payment order registered with the external gateway before the
/// customer is redirected to pay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Boundary to the hosted payment gateway. Checkout and payment retry go
/// through this trait so tests can swap in a canned gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers an order with the gateway and returns its id for the
    /// client-side payment flow.
    async fn create_order(&self, amount: Decimal, currency: &str)
        -> Result<GatewayOrder, ServiceError>;
}

/// Production gateway client. Follows the common hosted-checkout shape:
/// create an order server side, let the client pay against it, then verify
/// the callback signature server side.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: Decimal,
    currency: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/orders", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateOrderRequest { amount, currency })
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                response.status()
            )));
        }
        let body: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("bad gateway response: {}", e)))?;
        Ok(GatewayOrder {
            gateway_order_id: body.id,
            amount,
            currency: currency.to_string(),
        })
    }
}

/// Verifies the gateway's payment callback signature:
/// hex(HMAC-SHA256(secret, "{gateway_order_id}|{payment_id}")).
pub fn verify_signature(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Settles online payments. The gateway calls back into
/// [`PaymentService::confirm`] with a signed payment id; a valid signature
/// releases stock and consumes the cart exactly as a wallet payment would,
/// an invalid one changes nothing.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PaymentCallback {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub signature: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        carts: CartService,
    ) -> Self {
        Self { db, config, event_sender, gateway, carts }
    }

    #[instrument(skip(self, callback), fields(gateway_order_id = %callback.gateway_order_id))]
    pub async fn confirm(&self, callback: PaymentCallback) -> Result<OrderModel, ServiceError> {
        if !verify_signature(
            &self.config.gateway.key_secret,
            &callback.gateway_order_id,
            &callback.payment_id,
            &callback.signature,
        ) {
            return Err(ServiceError::InvalidSignature);
        }

        let txn = self.db.begin().await?;
        let order = Order::find()
            .filter(order::Column::GatewayOrderId.eq(callback.gateway_order_id.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Unknown gateway order".into()))?;
        if order.payment_method != PaymentMethod::Online {
            return Err(ServiceError::InvalidOperation("Order is not an online payment".into()));
        }
        if order.payment_status == PaymentStatus::Completed {
            // Gateways redeliver callbacks; a settled order stays settled.
            txn.commit().await?;
            return Ok(order);
        }
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::PaymentFailed) {
            return Err(ServiceError::InvalidOperation(
                "Order is not awaiting payment".into(),
            ));
        }

        // Stock was not reserved at checkout for online orders; take it now.
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;
        for item in items.iter().filter(|i| i.status.is_active_line()) {
            catalog::decrement_stock(&txn, item.variant_id, item.quantity).await?;
        }

        let cart = self.carts.find_or_create_cart(&txn, order.customer_id).await?;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        let mut cart_active: crate::entities::cart::ActiveModel = cart.clone().into();
        cart_active.coupon_id = Set(None);
        cart_active.update(&txn).await?;
        self.carts.recompute_totals(&txn, cart.id).await?;

        OrderService::apply_transition(&txn, &order, OrderStatus::Processing).await?;
        Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed),
            )
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(OrderStatus::Processing))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::Status.is_in([
                OrderStatus::Pending,
                OrderStatus::PaymentFailed,
            ]))
            .exec(&txn)
            .await?;
        OrderService::record_history(
            &txn,
            order.id,
            OrderStatus::Processing,
            format!("Payment {} verified", callback.payment_id),
        )
        .await?;
        txn.commit().await?;

        info!(order_id = %order.id, "online payment confirmed");
        self.event_sender
            .send_or_log(Event::PaymentCompleted { order_id: order.id })
            .await;
        let order = Order::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
        Ok(order)
    }

    /// Client-reported payment failure. The order parks in `payment_failed`
    /// until the customer retries or cancels.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, gateway_order_id: &str) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Order::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Unknown gateway order".into()))?;
        if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "Order is not awaiting payment".into(),
            ));
        }

        OrderService::apply_transition(&txn, &order, OrderStatus::PaymentFailed).await?;
        Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        OrderService::record_history(
            &txn,
            order.id,
            OrderStatus::PaymentFailed,
            "Payment failed".into(),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed { order_id: order.id })
            .await;
        let order = Order::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
        Ok(order)
    }

    /// Retries a failed online payment with a fresh gateway order, bounded
    /// by the configured attempt ceiling.
    #[instrument(skip(self))]
    pub async fn retry(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Order::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::PaymentFailed {
            return Err(ServiceError::InvalidOperation(
                "Only failed payments can be retried".into(),
            ));
        }
        if order.payment_attempts >= self.config.gateway.max_payment_attempts as i32 {
            return Err(ServiceError::PaymentFailed(format!(
                "Payment attempt limit of {} reached",
                self.config.gateway.max_payment_attempts
            )));
        }

        let gw = self
            .gateway
            .create_order(order.final_amount, &order.currency)
            .await?;
        OrderService::apply_transition(&txn, &order, OrderStatus::Pending).await?;
        Order::update_many()
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(Some(gw.gateway_order_id.clone())),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Pending),
            )
            .col_expr(
                order::Column::PaymentAttempts,
                Expr::col(order::Column::PaymentAttempts).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        OrderService::record_history(
            &txn,
            order.id,
            OrderStatus::Pending,
            "Payment retried with a new gateway order".into(),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRetried {
                order_id: order.id,
                attempt: order.payment_attempts + 1,
            })
            .await;
        let order = Order::find_by_id(order.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))?;
        Ok(order)
    }
}

/// Gateway double that hands out sequential order ids without I/O. Lives
/// outside `cfg(test)` so the integration suites can use it too.
pub struct MockGateway {
    counter: std::sync::atomic::AtomicU32,
    fail: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self { counter: std::sync::atomic::AtomicU32::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { counter: std::sync::atomic::AtomicU32::new(0), fail: true }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        if self.fail {
            return Err(ServiceError::ExternalServiceError("gateway down".into()));
        }
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(GatewayOrder {
            gateway_order_id: format!("gw_order_{}", n),
            amount,
            currency: currency.to_string(),
        })
    }
}
