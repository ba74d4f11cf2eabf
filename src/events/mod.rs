use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

/// Cloneable handle onto the domain event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
    },
    OrderConfirmed(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    InventoryReserved {
        checkout_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    },
    InventoryReleased {
        checkout_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    },
    CouponRedeemed {
        code: String,
        order_id: Uuid,
    },
    /// A claimed use handed back because the checkout failed.
    CouponReleased {
        code: String,
    },
    /// A gateway authorization exists with no order referencing it.
    PaymentAuthorizationOrphaned {
        authorization_id: String,
        checkout_id: Uuid,
        user_id: String,
        reason: String,
    },
    CartCleared {
        user_id: String,
    },
}

/// Drains the event channel, logging each event. Ends when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
            } => {
                info!(%order_id, %order_number, %total, "order created");
            }
            Event::OrderConfirmed(order_id) => {
                info!(%order_id, "order confirmed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::InventoryReserved {
                checkout_id,
                variant_id,
                quantity,
            } => {
                info!(%checkout_id, %variant_id, quantity, "inventory reserved");
            }
            Event::InventoryReleased {
                checkout_id,
                variant_id,
                quantity,
            } => {
                info!(%checkout_id, %variant_id, quantity, "inventory released");
            }
            Event::CouponRedeemed { code, order_id } => {
                info!(%code, %order_id, "coupon redeemed");
            }
            Event::CouponReleased { code } => {
                info!(%code, "coupon use released");
            }
            Event::PaymentAuthorizationOrphaned {
                authorization_id,
                checkout_id,
                user_id,
                reason,
            } => {
                error!(
                    %authorization_id,
                    %checkout_id,
                    %user_id,
                    %reason,
                    reconciliation_required = true,
                    "payment authorization has no order"
                );
            }
            Event::CartCleared { user_id } => {
                info!(%user_id, "cart cleared");
            }
        }
    }

    warn!("Event processing loop has ended");
}
