use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Domain events emitted by services after a successful state change.
/// Consumers are strictly observational; no business rule depends on an
/// event being delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDelisted(Uuid),
    StockAdjusted {
        variant_id: Uuid,
        delta: i32,
    },

    // Cart
    CartItemAdded {
        cart_id: Uuid,
        variant_id: Uuid,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartCleared(Uuid),

    // Coupons
    CouponCreated(Uuid),
    CouponApplied {
        cart_id: Uuid,
        coupon_id: Uuid,
        discount: Decimal,
    },
    CouponRemoved {
        cart_id: Uuid,
    },

    // Orders
    OrderPlaced {
        order_id: Uuid,
        order_code: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderItemCancelled {
        order_id: Uuid,
        item_id: Uuid,
    },
    ReturnRequested {
        order_id: Uuid,
    },
    ReturnApproved {
        order_id: Uuid,
        refund: Decimal,
    },
    ReturnRejected {
        order_id: Uuid,
    },

    // Payments
    PaymentCompleted {
        order_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    PaymentRetried {
        order_id: Uuid,
        attempt: i32,
    },

    // Wallet
    WalletCredited {
        wallet_id: Uuid,
        amount: Decimal,
        source: String,
    },
    WalletDebited {
        wallet_id: Uuid,
        amount: Decimal,
        source: String,
    },

    // Customers
    CustomerRegistered(Uuid),
    CustomerVerified(Uuid),
    CustomerBlocked(Uuid),
}

/// Cloneable handle for publishing events onto the shared channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs (rather than propagates) a channel failure.
    /// Event delivery never gates a state change that already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            error!("Failed to publish event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Runs until every sender
/// is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        debug!(?event, "event");
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic even though the receiver is gone.
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();
        sender
            .send(Event::OrderPlaced {
                order_id,
                order_code: "ORD2508250001".to_string(),
            })
            .await
            .expect("send should succeed");

        match rx.recv().await {
            Some(Event::OrderPlaced { order_id: got, .. }) => assert_eq!(got, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
