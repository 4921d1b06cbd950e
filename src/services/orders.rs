use crate::{
    entities::{
        order, order_item, order_status_history, Coupon, Order, OrderItem, OrderItemModel,
        OrderModel, OrderStatus, OrderStatusHistory, OrderStatusHistoryModel, PaymentMethod,
        PaymentStatus, TransactionSource,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog, wallet::WalletService},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Order lifecycle after checkout: status transitions, cancellation with
/// stock and wallet restitution, and the customer-facing return request.
///
/// Every transition is applied through a version-guarded UPDATE and lands
/// an append-only history row in the same transaction.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    wallets: WalletService,
}

/// Forward fulfillment chain plus the cancellation and return branches.
/// Delivered orders only move through the return flow, never through a
/// plain status update.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Cancelled)
            | (Pending, PaymentFailed)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, OutForDelivery)
            | (OutForDelivery, Delivered)
            | (Delivered, ReturnPending)
            | (ReturnPending, Returned)
            | (ReturnPending, Delivered)
            | (PaymentFailed, Pending)
            | (PaymentFailed, Cancelled)
    )
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        wallets: WalletService,
    ) -> Self {
        Self { db, event_sender, wallets }
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::PlacedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    pub async fn get_for_customer(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    pub async fn get(&self, order_id: Uuid) -> Result<(OrderModel, Vec<OrderItemModel>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    pub async fn history(&self, order_id: Uuid) -> Result<Vec<OrderStatusHistoryModel>, ServiceError> {
        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Admin order listing with optional status and placement-date filters.
    pub async fn admin_list(
        &self,
        status: Option<OrderStatus>,
        placed_after: Option<DateTime<Utc>>,
        placed_before: Option<DateTime<Utc>>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(after) = placed_after {
            query = query.filter(order::Column::PlacedAt.gte(after));
        }
        if let Some(before) = placed_before {
            query = query.filter(order::Column::PlacedAt.lte(before));
        }
        let paginator = query
            .order_by_desc(order::Column::PlacedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Admin transition along the fulfillment chain. `delivered` orders are
    /// immutable here; cancellation routes through [`OrderService::cancel_order`]
    /// so stock and refunds are handled.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        description: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        if matches!(
            new_status,
            OrderStatus::ReturnPending | OrderStatus::Returned | OrderStatus::PaymentFailed
        ) {
            return Err(ServiceError::InvalidOperation(
                "This status is only reachable through its own flow".into(),
            ));
        }
        if new_status == OrderStatus::Cancelled {
            return self.cancel_order(None, order_id, None).await;
        }

        let txn = self.db.begin().await?;
        let order = Self::require_order(&txn, order_id).await?;
        if !is_valid_transition(order.status, new_status) {
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status.to_string(),
                to: new_status.to_string(),
            });
        }

        Self::apply_transition(&txn, &order, new_status).await?;
        // Active lines mirror the order's fulfillment state.
        OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(new_status))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::Status.is_in([
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::Shipped,
                OrderStatus::OutForDelivery,
            ]))
            .exec(&txn)
            .await?;

        // COD money changes hands at the doorstep.
        if new_status == OrderStatus::Delivered
            && order.payment_method == PaymentMethod::Cod
            && order.payment_status == PaymentStatus::Pending
        {
            Order::update_many()
                .col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(PaymentStatus::Completed),
                )
                .filter(order::Column::Id.eq(order_id))
                .exec(&txn)
                .await?;
        }

        Self::record_history(
            &txn,
            order_id,
            new_status,
            description.unwrap_or_else(|| format!("Status changed to {}", new_status)),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        let (order, _) = self.get(order_id).await?;
        Ok(order)
    }

    /// Cancels a whole order while it is still pre-shipment. Restores stock
    /// for active lines and refunds the full amount to the wallet when the
    /// payment had completed.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        customer_id: Option<Uuid>,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Self::require_order(&txn, order_id).await?;
        if let Some(customer_id) = customer_id {
            if order.customer_id != customer_id {
                return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
            }
        }
        if !is_valid_transition(order.status, OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        // Online orders that never completed payment hold no stock.
        let holds_stock =
            order.payment_method != PaymentMethod::Online || order.payment_status.is_paid();
        for item in items.iter().filter(|i| i.status.is_active_line()) {
            if holds_stock {
                catalog::restore_stock(&txn, item.variant_id, item.quantity).await?;
            }
        }

        // `final_amount` already shrank with every earlier item cancel, so
        // refunding it after a partial refund credits exactly the remainder.
        let refunded = if order.payment_status.is_paid() {
            self.wallets
                .credit(
                    &txn,
                    order.customer_id,
                    order.final_amount,
                    TransactionSource::OrderCancellation,
                    Some(order_id),
                    &format!("Refund for cancelled order {}", order.order_code),
                )
                .await?;
            true
        } else {
            false
        };

        Self::apply_transition(&txn, &order, OrderStatus::Cancelled).await?;
        let payment_status = if refunded {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Cancelled
        };
        Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
            .col_expr(
                order::Column::CancellationReason,
                Expr::value(reason.clone()),
            )
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;
        OrderItem::update_many()
            .col_expr(order_item::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order_item::Column::OrderId.eq(order_id))
            .filter(order_item::Column::Status.ne(OrderStatus::Returned))
            .exec(&txn)
            .await?;
        Self::record_history(
            &txn,
            order_id,
            OrderStatus::Cancelled,
            reason.unwrap_or_else(|| "Order cancelled".into()),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: OrderStatus::Cancelled.to_string(),
            })
            .await;
        let (order, _) = self.get(order_id).await?;
        Ok(order)
    }

    /// Cancels one line of a pre-shipment order. The refund for a paid
    /// order is the line subtotal minus its prorated coupon share, and the
    /// order's stored breakdown shrinks by the same amounts.
    #[instrument(skip(self))]
    pub async fn cancel_item(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<OrderItemModel, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Self::require_order(&txn, order_id).await?;
        if order.customer_id != customer_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(ServiceError::InvalidOperation(
                "Items can only be cancelled before the order ships".into(),
            ));
        }
        let item = OrderItem::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order item not found".into()))?;
        if !item.status.is_active_line() {
            return Err(ServiceError::InvalidOperation(
                "Item is already cancelled or returned".into(),
            ));
        }

        let active_items: Vec<OrderItemModel> = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?
            .into_iter()
            .filter(|i| i.status.is_active_line())
            .collect();
        let last_active_line = active_items.len() == 1;
        if last_active_line {
            // Cancelling the only remaining line is a whole-order cancel.
            drop(txn);
            self.cancel_order(Some(customer_id), order_id, None).await?;
            let (_, items) = self.get(order_id).await?;
            return items
                .into_iter()
                .find(|i| i.id == item_id)
                .ok_or_else(|| ServiceError::NotFound("Order item not found".into()));
        }

        // Keep the coupon honest: the surviving lines must still clear the
        // coupon's minimum cart value.
        if let Some(coupon_id) = order.coupon_id {
            if let Some(coupon) = Coupon::find_by_id(coupon_id).one(&txn).await? {
                let remaining_subtotal = order.subtotal - item.line_total;
                if remaining_subtotal < coupon.min_cart_value {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Cancelling this item drops the order below coupon {}'s minimum; cancel the whole order instead",
                        coupon.code
                    )));
                }
            }
        }

        let holds_stock =
            order.payment_method != PaymentMethod::Online || order.payment_status.is_paid();
        if holds_stock {
            catalog::restore_stock(&txn, item.variant_id, item.quantity).await?;
        }

        let refund = item.refundable_amount();
        let mut refunded_amount = Decimal::ZERO;
        if order.payment_status.is_paid() {
            self.wallets
                .credit(
                    &txn,
                    customer_id,
                    refund,
                    TransactionSource::OrderCancellation,
                    Some(order_id),
                    &format!("Refund for cancelled item on order {}", order.order_code),
                )
                .await?;
            refunded_amount = refund;
            Order::update_many()
                .col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(PaymentStatus::PartiallyRefunded),
                )
                .filter(order::Column::Id.eq(order_id))
                .exec(&txn)
                .await?;
        }

        let mut active: order_item::ActiveModel = item.clone().into();
        active.status = Set(OrderStatus::Cancelled);
        active.refunded_amount = Set(refunded_amount);
        active.updated_at = Set(Utc::now());
        let updated_item = active.update(&txn).await?;

        Self::shrink_order_totals(&txn, &order, &item).await?;
        Self::record_history(
            &txn,
            order_id,
            order.status,
            format!("Item {} ({}) cancelled", item.product_name, item.size),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderItemCancelled { order_id, item_id })
            .await;
        Ok(updated_item)
    }

    /// Customer asks to return a delivered order. Stock goes back on the
    /// shelf immediately; money moves only when an admin approves.
    #[instrument(skip(self, reason))]
    pub async fn request_return(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        reason: String,
    ) -> Result<OrderModel, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError("A return needs a reason".into()));
        }
        let txn = self.db.begin().await?;
        let order = Self::require_order(&txn, order_id).await?;
        if order.customer_id != customer_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::InvalidOperation(
                "Only delivered orders can be returned".into(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in items.iter().filter(|i| i.status == OrderStatus::Delivered) {
            catalog::restore_stock(&txn, item.variant_id, item.quantity).await?;
            let mut active: order_item::ActiveModel = item.clone().into();
            active.status = Set(OrderStatus::ReturnPending);
            active.return_reason = Set(Some(reason.clone()));
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        Self::apply_transition(&txn, &order, OrderStatus::ReturnPending).await?;
        Self::record_history(&txn, order_id, OrderStatus::ReturnPending, reason).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReturnRequested { order_id })
            .await;
        let (order, _) = self.get(order_id).await?;
        Ok(order)
    }

    async fn require_order<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Version-guarded status write. A zero row count means someone else
    /// moved the order first.
    pub(crate) async fn apply_transition<C: ConnectionTrait>(
        conn: &C,
        order: &OrderModel,
        new_status: OrderStatus,
    ) -> Result<(), ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            warn!(order_id = %order.id, "concurrent order update detected");
            return Err(ServiceError::Conflict(
                "Order was modified concurrently, retry".into(),
            ));
        }
        Ok(())
    }

    pub(crate) async fn record_history<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        status: OrderStatus,
        description: String,
    ) -> Result<(), ServiceError> {
        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(status),
            description: Set(description),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        Ok(())
    }

    /// Removes one line's contribution from the order's stored breakdown.
    async fn shrink_order_totals<C: ConnectionTrait>(
        conn: &C,
        order: &OrderModel,
        item: &OrderItemModel,
    ) -> Result<(), ServiceError> {
        Order::update_many()
            .col_expr(
                order::Column::Subtotal,
                Expr::col(order::Column::Subtotal).sub(item.line_total),
            )
            .col_expr(
                order::Column::CouponDiscount,
                Expr::col(order::Column::CouponDiscount).sub(item.discount_share),
            )
            .col_expr(
                order::Column::FinalAmount,
                Expr::col(order::Column::FinalAmount).sub(item.refundable_amount()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfillment_chain_moves_forward_only() {
        use OrderStatus::*;
        assert!(is_valid_transition(Pending, Processing));
        assert!(is_valid_transition(Processing, Shipped));
        assert!(is_valid_transition(Shipped, OutForDelivery));
        assert!(is_valid_transition(OutForDelivery, Delivered));
        assert!(!is_valid_transition(Shipped, Processing));
        assert!(!is_valid_transition(Delivered, Shipped));
        assert!(!is_valid_transition(Pending, Delivered));
    }

    #[test]
    fn delivered_orders_only_enter_the_return_flow() {
        use OrderStatus::*;
        assert!(is_valid_transition(Delivered, ReturnPending));
        assert!(!is_valid_transition(Delivered, Cancelled));
        assert!(is_valid_transition(ReturnPending, Returned));
        assert!(is_valid_transition(ReturnPending, Delivered));
    }

    #[test]
    fn payment_failed_is_recoverable() {
        use OrderStatus::*;
        assert!(is_valid_transition(PaymentFailed, Pending));
        assert!(is_valid_transition(PaymentFailed, Cancelled));
        assert!(!is_valid_transition(PaymentFailed, Delivered));
    }

    #[test]
    fn cancellation_window_closes_at_shipment() {
        use OrderStatus::*;
        assert!(is_valid_transition(Pending, Cancelled));
        assert!(is_valid_transition(Processing, Cancelled));
        assert!(!is_valid_transition(Shipped, Cancelled));
        assert!(!is_valid_transition(OutForDelivery, Cancelled));
        assert!(!is_valid_transition(Returned, Cancelled));
    }
}
