use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
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
}

// The domain events emitted after a mutation commits. Delivery is
// best-effort: a full or closed channel never rolls the mutation back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderPlaced {
        order_id: Uuid,
        user_id: i64,
        warehouse_id: i32,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentCompleted(Uuid),
    PaymentRefunded(Uuid),

    // Shipment events
    ShipmentCreated {
        shipment_id: Uuid,
        order_id: Uuid,
    },
    ShipmentStatusChanged {
        shipment_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Inventory events
    StockAdjusted {
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity_delta: i32,
        new_on_hand: i32,
    },
    StockReserved {
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
        order_id: Option<Uuid>,
    },
    StockReleased {
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
        order_id: Option<Uuid>,
    },
    StockTransferred {
        product_variant_id: Uuid,
        from_warehouse_id: i32,
        to_warehouse_id: i32,
        quantity: i32,
    },
}

// Drains the event channel and logs each event. Side effects that hang off
// events (notifications, projections) attach here without touching the
// services that emit them.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                user_id,
                warehouse_id,
            } => {
                info!(
                    %order_id,
                    user_id,
                    warehouse_id,
                    "order placed"
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, old_status, new_status, "order status changed");
            }
            Event::PaymentCompleted(order_id) => {
                info!(%order_id, "payment completed");
            }
            Event::PaymentRefunded(order_id) => {
                info!(%order_id, "payment refunded");
            }
            Event::ShipmentCreated { shipment_id, order_id } => {
                info!(%shipment_id, %order_id, "shipment created");
            }
            Event::ShipmentStatusChanged {
                shipment_id,
                old_status,
                new_status,
            } => {
                info!(%shipment_id, old_status, new_status, "shipment status changed");
            }
            Event::StockAdjusted {
                product_variant_id,
                warehouse_id,
                quantity_delta,
                new_on_hand,
            } => {
                info!(
                    %product_variant_id,
                    warehouse_id,
                    quantity_delta,
                    new_on_hand,
                    "stock adjusted"
                );
                if *new_on_hand == 0 {
                    warn!(%product_variant_id, warehouse_id, "stock depleted");
                }
            }
            Event::StockReserved {
                product_variant_id,
                warehouse_id,
                quantity,
                ..
            } => {
                info!(%product_variant_id, warehouse_id, quantity, "stock reserved");
            }
            Event::StockReleased {
                product_variant_id,
                warehouse_id,
                quantity,
                ..
            } => {
                info!(%product_variant_id, warehouse_id, quantity, "stock released");
            }
            Event::StockTransferred {
                product_variant_id,
                from_warehouse_id,
                to_warehouse_id,
                quantity,
            } => {
                info!(
                    %product_variant_id,
                    from_warehouse_id,
                    to_warehouse_id,
                    quantity,
                    "stock transferred"
                );
            }
        }
    }

    info!("Event channel closed, stopping event processing loop");
}
