use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::entities::payment::{self, Entity as Payment, PaymentStatus};
use crate::entities::purchase_order::{self, Entity as PurchaseOrder, OrderStatus};
use crate::entities::purchase_order_detail::{self, Entity as PurchaseOrderDetail};
use crate::entities::shipment::{self, Entity as Shipment, ShipmentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::StockLedgerService;

/// The events that may advance an order through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConfirmPayment,
    BeginProcessing,
    Cancel,
    CreateShipment,
    ShipmentDelivered,
    ShipmentFailed,
}

/// The full transition table. Every status change in the system flows
/// through here; anything this function rejects is an
/// `InvalidStateTransition` and must leave no trace in the database.
pub fn next_status(current: OrderStatus, trigger: Trigger) -> Option<OrderStatus> {
    use OrderStatus::*;
    use Trigger::*;

    match (current, trigger) {
        (PendingPayment, ConfirmPayment) => Some(Paid),
        (Paid, BeginProcessing) => Some(Processing),
        (PendingPayment, Cancel) | (Processing, Cancel) => Some(Cancelled),
        (Paid, CreateShipment) | (Processing, CreateShipment) => Some(Shipped),
        (Shipped, ShipmentDelivered) => Some(Completed),
        (Shipped, ShipmentFailed) => Some(ShippingFailed),
        _ => None,
    }
}

/// Per-order outcome of a bulk status override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideResult {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Order, lines and its 1:1 payment/shipment rows as one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAggregate {
    pub order: purchase_order::Model,
    pub details: Vec<purchase_order_detail::Model>,
    pub payment: Option<payment::Model>,
    pub shipment: Option<shipment::Model>,
}

/// Single writer of `purchase_orders.status`. Payment and shipment rows
/// change only here, in the same transaction as the order row, so the
/// three can never disagree.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    ledger: StockLedgerService,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedgerService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            ledger,
            event_sender,
        }
    }

    /// pending_payment -> paid; marks the payment completed.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        transaction_code: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;
        let new_status = require_transition(&order, current, Trigger::ConfirmPayment)?;

        let payment = load_payment(&txn, order_id).await?;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Completed.as_str().to_string());
        if transaction_code.is_some() {
            active.transaction_code = Set(transaction_code);
        }
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        let updated = advance_order(&txn, &order, new_status).await?;
        txn.commit().await?;

        self.emit(Event::PaymentCompleted(order_id)).await;
        self.emit_status_change(&order, new_status).await;
        Ok(updated)
    }

    /// paid -> processing.
    #[instrument(skip(self))]
    pub async fn begin_processing(
        &self,
        order_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;
        let new_status = require_transition(&order, current, Trigger::BeginProcessing)?;

        let updated = advance_order(&txn, &order, new_status).await?;
        txn.commit().await?;

        self.emit_status_change(&order, new_status).await;
        Ok(updated)
    }

    /// pending_payment | processing -> cancelled. Releases every line's
    /// reservation and refunds a completed payment, atomically with the
    /// status change.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;
        let new_status = require_transition(&order, current, Trigger::Cancel)?;

        let refunded = self.cancel_side_effects(&txn, &order).await?;

        if let Some(reason) = reason {
            // The customer's own notes stay; the reason is appended.
            let notes = match &order.notes {
                Some(existing) => format!("{}\n{}", existing, reason),
                None => reason,
            };
            PurchaseOrder::update_many()
                .col_expr(purchase_order::Column::Notes, Expr::value(Some(notes)))
                .filter(purchase_order::Column::Id.eq(order.id))
                .exec(&txn)
                .await?;
        }

        let updated = advance_order(&txn, &order, new_status).await?;
        txn.commit().await?;

        if refunded {
            self.emit(Event::PaymentRefunded(order_id)).await;
        }
        self.emit_status_change(&order, new_status).await;
        Ok(updated)
    }

    /// paid | processing -> shipped. Creates the pending shipment and
    /// converts every line's reservation into an outbound ledger entry.
    #[instrument(skip(self))]
    pub async fn create_shipment(
        &self,
        order_id: Uuid,
        shipping_method: String,
        tracking_code: Option<String>,
        actor_id: i64,
    ) -> Result<shipment::Model, ServiceError> {
        if shipping_method.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping method must not be empty".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;
        let new_status = require_transition(&order, current, Trigger::CreateShipment)?;

        if load_shipment(&txn, order_id).await?.is_some() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} already has a shipment",
                order_id
            )));
        }

        let details = load_details(&txn, order_id).await?;
        for line in &details {
            self.ledger
                .consume_reserved_within(
                    &txn,
                    line.product_variant_id,
                    order.warehouse_id,
                    line.quantity,
                    order_id,
                    actor_id,
                )
                .await?;
        }

        let created = shipment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            shipping_method: Set(shipping_method),
            tracking_code: Set(tracking_code),
            status: Set(ShipmentStatus::Pending.as_str().to_string()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        advance_order(&txn, &order, new_status).await?;
        txn.commit().await?;

        self.emit(Event::ShipmentCreated {
            shipment_id: created.id,
            order_id,
        })
        .await;
        self.emit_status_change(&order, new_status).await;
        Ok(created)
    }

    /// Carrier outcome for an order's shipment. Delivery completes the
    /// order and forces the payment to completed (cash on delivery);
    /// failed or returned parks the order in shipping_failed without
    /// touching stock.
    #[instrument(skip(self))]
    pub async fn update_shipment_status(
        &self,
        order_id: Uuid,
        new_shipment_status: ShipmentStatus,
    ) -> Result<shipment::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;

        let shipment = load_shipment(&txn, order_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("order {} has no shipment", order_id))
        })?;
        let old_shipment_status = shipment.status.clone();

        let mut events = Vec::new();

        match new_shipment_status {
            ShipmentStatus::Pending => {
                return Err(ServiceError::InvalidStateTransition(format!(
                    "shipment for order {} cannot move back to pending",
                    order_id
                )));
            }
            ShipmentStatus::InTransit | ShipmentStatus::OutForDelivery => {
                if current != OrderStatus::Shipped {
                    return Err(ServiceError::InvalidStateTransition(format!(
                        "order {} is {}, shipment updates require shipped",
                        order_id, order.status
                    )));
                }
            }
            ShipmentStatus::Delivered => {
                let new_status = require_transition(&order, current, Trigger::ShipmentDelivered)?;

                // COD orders are paid at the door; delivery is the moment
                // the payment becomes real.
                let payment = load_payment(&txn, order_id).await?;
                if payment.payment_status() != Some(PaymentStatus::Completed) {
                    let mut active: payment::ActiveModel = payment.into();
                    active.status = Set(PaymentStatus::Completed.as_str().to_string());
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&txn).await?;
                    events.push(Event::PaymentCompleted(order_id));
                }

                advance_order(&txn, &order, new_status).await?;
                events.push(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: order.status.clone(),
                    new_status: new_status.as_str().to_string(),
                });
            }
            ShipmentStatus::Failed | ShipmentStatus::Returned => {
                let new_status = require_transition(&order, current, Trigger::ShipmentFailed)?;
                advance_order(&txn, &order, new_status).await?;
                events.push(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: order.status.clone(),
                    new_status: new_status.as_str().to_string(),
                });
            }
        }

        let mut active: shipment::ActiveModel = shipment.into();
        active.status = Set(new_shipment_status.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.emit(Event::ShipmentStatusChanged {
            shipment_id: updated.id,
            old_status: old_shipment_status,
            new_status: updated.status.clone(),
        })
        .await;
        for event in events {
            self.emit(event).await;
        }
        Ok(updated)
    }

    /// Admin bulk override: forces each non-terminal order to `target`,
    /// with the target's side effects (completed forces payment, cancelled
    /// refunds and releases). Per-order failures are reported, not fatal.
    #[instrument(skip(self, ctx))]
    pub async fn override_status(
        &self,
        ctx: &AuthContext,
        order_ids: Vec<Uuid>,
        target: OrderStatus,
    ) -> Result<Vec<OverrideResult>, ServiceError> {
        ctx.ensure_admin()?;

        let mut results = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            match self.override_one(order_id, target).await {
                Ok(()) => results.push(OverrideResult {
                    order_id,
                    status: Some(target.as_str().to_string()),
                    error: None,
                }),
                Err(e) => results.push(OverrideResult {
                    order_id,
                    status: None,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(results)
    }

    async fn override_one(&self, order_id: Uuid, target: OrderStatus) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let order = load_order(&txn, order_id).await?;
        let current = order.order_status()?;

        if current.is_terminal() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is already {} (terminal)",
                order_id, order.status
            )));
        }
        if current == target {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is already {}",
                order_id, order.status
            )));
        }

        let mut events = Vec::new();

        match target {
            OrderStatus::Completed => {
                let payment = load_payment(&txn, order_id).await?;
                if payment.payment_status() != Some(PaymentStatus::Completed) {
                    let mut active: payment::ActiveModel = payment.into();
                    active.status = Set(PaymentStatus::Completed.as_str().to_string());
                    active.updated_at = Set(Some(Utc::now()));
                    active.update(&txn).await?;
                    events.push(Event::PaymentCompleted(order_id));
                }
            }
            OrderStatus::Cancelled => {
                if self.cancel_side_effects(&txn, &order).await? {
                    events.push(Event::PaymentRefunded(order_id));
                }
            }
            _ => {}
        }

        advance_order(&txn, &order, target).await?;
        txn.commit().await?;

        events.push(Event::OrderStatusChanged {
            order_id: order.id,
            old_status: order.status.clone(),
            new_status: target.as_str().to_string(),
        });
        for event in events {
            self.emit(event).await;
        }
        Ok(())
    }

    /// Refunds a completed payment and hands reservations back to the
    /// ledger. Reservations only exist before shipment; a shipped order's
    /// stock already left as outbound entries and stays gone.
    async fn cancel_side_effects(
        &self,
        txn: &DatabaseTransaction,
        order: &purchase_order::Model,
    ) -> Result<bool, ServiceError> {
        let current = order.order_status()?;
        let holds_reservations = matches!(
            current,
            OrderStatus::PendingPayment | OrderStatus::Paid | OrderStatus::Processing
        );

        if holds_reservations {
            let details = load_details(txn, order.id).await?;
            for line in &details {
                self.ledger
                    .release_within(txn, line.product_variant_id, order.warehouse_id, line.quantity)
                    .await?;
            }
        }

        let payment = load_payment(txn, order.id).await?;
        if payment.payment_status() == Some(PaymentStatus::Completed) {
            let mut active: payment::ActiveModel = payment.into();
            active.status = Set(PaymentStatus::Refunded.as_str().to_string());
            active.updated_at = Set(Some(Utc::now()));
            active.update(txn).await?;
            return Ok(true);
        }
        Ok(false)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderAggregate, ServiceError> {
        let order = PurchaseOrder::find_by_id(order_id)
            .filter(purchase_order::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        let details = PurchaseOrderDetail::find()
            .filter(purchase_order_detail::Column::OrderId.eq(order_id))
            .order_by_asc(purchase_order_detail::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(self.db.as_ref())
            .await?;
        let shipment = Shipment::find()
            .filter(shipment::Column::OrderId.eq(order_id))
            .one(self.db.as_ref())
            .await?;

        Ok(OrderAggregate {
            order,
            details,
            payment,
            shipment,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Option<i64>,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<purchase_order::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);

        let mut query = PurchaseOrder::find()
            .filter(purchase_order::Column::DeletedAt.is_null())
            .order_by_desc(purchase_order::Column::CreatedAt);
        if let Some(user_id) = user_id {
            query = query.filter(purchase_order::Column::UserId.eq(user_id));
        }
        if let Some(status) = status {
            query = query.filter(purchase_order::Column::Status.eq(status.as_str()));
        }

        let paginator = query.paginate(self.db.as_ref(), per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish order event");
        }
    }

    async fn emit_status_change(&self, order: &purchase_order::Model, new_status: OrderStatus) {
        self.emit(Event::OrderStatusChanged {
            order_id: order.id,
            old_status: order.status.clone(),
            new_status: new_status.as_str().to_string(),
        })
        .await;
    }
}

fn require_transition(
    order: &purchase_order::Model,
    current: OrderStatus,
    trigger: Trigger,
) -> Result<OrderStatus, ServiceError> {
    next_status(current, trigger).ok_or_else(|| {
        ServiceError::InvalidStateTransition(format!(
            "order {} is {}, {:?} is not allowed",
            order.id, order.status, trigger
        ))
    })
}

async fn load_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrder::find_by_id(order_id)
        .filter(purchase_order::Column::DeletedAt.is_null())
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))
}

async fn load_details(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<Vec<purchase_order_detail::Model>, ServiceError> {
    let rows = PurchaseOrderDetail::find()
        .filter(purchase_order_detail::Column::OrderId.eq(order_id))
        .all(txn)
        .await?;
    Ok(rows)
}

async fn load_payment(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<payment::Model, ServiceError> {
    Payment::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .one(txn)
        .await?
        .ok_or_else(|| {
            ServiceError::InvariantViolation(format!("order {} has no payment row", order_id))
        })
}

async fn load_shipment(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<Option<shipment::Model>, ServiceError> {
    let row = Shipment::find()
        .filter(shipment::Column::OrderId.eq(order_id))
        .one(txn)
        .await?;
    Ok(row)
}

/// Conditional status write against the version read at the start of the
/// transaction. A lost race is a conflict, never a silent double apply.
async fn advance_order(
    txn: &DatabaseTransaction,
    order: &purchase_order::Model,
    new_status: OrderStatus,
) -> Result<purchase_order::Model, ServiceError> {
    let result = PurchaseOrder::update_many()
        .col_expr(
            purchase_order::Column::Status,
            Expr::value(new_status.as_str().to_string()),
        )
        .col_expr(
            purchase_order::Column::Version,
            Expr::value(order.version + 1),
        )
        .col_expr(purchase_order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(purchase_order::Column::Id.eq(order.id))
        .filter(purchase_order::Column::Version.eq(order.version))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrencyConflict(format!(
            "order {} changed concurrently",
            order.id
        )));
    }

    Ok(purchase_order::Model {
        status: new_status.as_str().to_string(),
        version: order.version + 1,
        updated_at: Some(Utc::now()),
        ..order.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATUSES: [OrderStatus; 7] = [
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::ShippingFailed,
    ];

    const ALL_TRIGGERS: [Trigger; 6] = [
        Trigger::ConfirmPayment,
        Trigger::BeginProcessing,
        Trigger::Cancel,
        Trigger::CreateShipment,
        Trigger::ShipmentDelivered,
        Trigger::ShipmentFailed,
    ];

    #[test]
    fn happy_path_reaches_completed() {
        let mut status = OrderStatus::PendingPayment;
        for trigger in [
            Trigger::ConfirmPayment,
            Trigger::BeginProcessing,
            Trigger::CreateShipment,
            Trigger::ShipmentDelivered,
        ] {
            status = next_status(status, trigger).unwrap();
        }
        assert_eq!(status, OrderStatus::Completed);
    }

    #[test]
    fn cancel_only_before_shipping() {
        assert_eq!(
            next_status(OrderStatus::PendingPayment, Trigger::Cancel),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(
            next_status(OrderStatus::Processing, Trigger::Cancel),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(next_status(OrderStatus::Paid, Trigger::Cancel), None);
        assert_eq!(next_status(OrderStatus::Shipped, Trigger::Cancel), None);
    }

    #[test]
    fn shipping_failure_is_not_terminal_but_goes_nowhere_by_itself() {
        let failed = next_status(OrderStatus::Shipped, Trigger::ShipmentFailed).unwrap();
        assert_eq!(failed, OrderStatus::ShippingFailed);
        assert!(!failed.is_terminal());
        for trigger in ALL_TRIGGERS {
            assert_eq!(next_status(failed, trigger), None);
        }
    }

    proptest! {
        #[test]
        fn terminal_states_accept_no_trigger(
            status_idx in 0usize..ALL_STATUSES.len(),
            trigger_idx in 0usize..ALL_TRIGGERS.len(),
        ) {
            let status = ALL_STATUSES[status_idx];
            let trigger = ALL_TRIGGERS[trigger_idx];
            if status.is_terminal() {
                prop_assert_eq!(next_status(status, trigger), None);
            }
        }

        #[test]
        fn transitions_never_yield_the_same_status(
            status_idx in 0usize..ALL_STATUSES.len(),
            trigger_idx in 0usize..ALL_TRIGGERS.len(),
        ) {
            let status = ALL_STATUSES[status_idx];
            let trigger = ALL_TRIGGERS[trigger_idx];
            if let Some(next) = next_status(status, trigger) {
                prop_assert_ne!(next, status);
            }
        }
    }
}
