use crate::{
    entities::{
        order, order_item, Order, OrderItem, OrderModel, OrderStatus, PaymentStatus,
        TransactionSource,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog, orders::OrderService, wallet::WalletService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Admin side of the return flow. A customer's return request parks the
/// order in `return_pending`; this service settles it either way.
#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    wallets: WalletService,
}

impl ReturnService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        wallets: WalletService,
    ) -> Self {
        Self { db, event_sender, wallets }
    }

    /// Approves a pending return: each returned line refunds its subtotal
    /// minus the coupon share it carried at checkout, credited to the
    /// customer's wallet in one transaction.
    #[instrument(skip(self))]
    pub async fn approve(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::ReturnPending {
            return Err(ServiceError::InvalidOperation(
                "Order has no pending return".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let mut refund_total = Decimal::ZERO;
        for item in items.iter().filter(|i| i.status == OrderStatus::ReturnPending) {
            let refund = item.refundable_amount();
            refund_total += refund;
            let mut active: order_item::ActiveModel = item.clone().into();
            active.status = Set(OrderStatus::Returned);
            active.refunded_amount = Set(refund);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }
        if refund_total > Decimal::ZERO {
            self.wallets
                .credit(
                    &txn,
                    order.customer_id,
                    refund_total,
                    TransactionSource::OrderReturn,
                    Some(order_id),
                    &format!("Refund for returned order {}", order.order_code),
                )
                .await?;
        }

        OrderService::apply_transition(&txn, &order, OrderStatus::Returned).await?;
        // A fully returned order has nothing partially refunded about it.
        let all_settled = items
            .iter()
            .all(|i| !i.status.is_active_line() || i.status == OrderStatus::ReturnPending);
        let payment_status = if all_settled {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;
        OrderService::record_history(
            &txn,
            order_id,
            OrderStatus::Returned,
            "Return approved, refund credited to wallet".into(),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReturnApproved { order_id, refund: refund_total })
            .await;
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(order)
    }

    /// Rejects a pending return: lines go back to `delivered` and the stock
    /// that was restored at request time is taken back. A line whose stock
    /// was already sold on is logged and skipped rather than blocking the
    /// rejection.
    #[instrument(skip(self))]
    pub async fn reject(&self, order_id: Uuid, note: Option<String>) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::ReturnPending {
            return Err(ServiceError::InvalidOperation(
                "Order has no pending return".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in items.iter().filter(|i| i.status == OrderStatus::ReturnPending) {
            if let Err(err) = catalog::decrement_stock(&txn, item.variant_id, item.quantity).await {
                warn!(
                    order_id = %order_id,
                    variant_id = %item.variant_id,
                    error = %err,
                    "could not re-reserve stock while rejecting return"
                );
            }
            let mut active: order_item::ActiveModel = item.clone().into();
            active.status = Set(OrderStatus::Delivered);
            active.return_reason = Set(None);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        OrderService::apply_transition(&txn, &order, OrderStatus::Delivered).await?;
        OrderService::record_history(
            &txn,
            order_id,
            OrderStatus::Delivered,
            note.unwrap_or_else(|| "Return rejected".into()),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReturnRejected { order_id })
            .await;
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(order)
    }
}
