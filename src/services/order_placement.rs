use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::Deserialize;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthContext;
use crate::entities::payment::{self, PaymentStatus};
use crate::entities::product_variant::Entity as ProductVariant;
use crate::entities::purchase_order::{self, OrderStatus};
use crate::entities::purchase_order_detail;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::StockLedgerService;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceOrderLine {
    pub product_variant_id: Uuid,
    #[validate(range(min = 1, message = "Line quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 100, message = "Recipient name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub address: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceOrderInput {
    pub warehouse_id: i32,
    #[validate]
    pub lines: Vec<PlaceOrderLine>,
    #[validate]
    pub shipping: ShippingInfo,
    #[validate(length(min = 1, max = 50, message = "Payment method is required"))]
    pub payment_method: String,
    #[serde(default)]
    pub shipping_fee: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    pub notes: Option<String>,
}

/// Order placed: the order row, its line snapshots and the pending
/// payment, as created in one transaction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlacedOrder {
    pub order: purchase_order::Model,
    pub details: Vec<purchase_order_detail::Model>,
    pub payment: payment::Model,
}

/// Turns a cart into a pending_payment order. Checks availability and
/// reserves every line, snapshots prices into detail rows and opens a
/// pending payment, all in one transaction; any line failure rolls the
/// whole order back.
#[derive(Clone)]
pub struct OrderPlacementService {
    db: Arc<DatabaseConnection>,
    ledger: StockLedgerService,
    event_sender: Arc<EventSender>,
}

impl OrderPlacementService {
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

    #[instrument(skip(self, ctx, input), fields(user = ctx.user_id, warehouse = input.warehouse_id))]
    pub async fn place_order(
        &self,
        ctx: &AuthContext,
        input: PlaceOrderInput,
    ) -> Result<PlacedOrder, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        input.validate()?;
        if input.shipping_fee < Decimal::ZERO || input.discount_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping fee and discount must not be negative".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for line in &input.lines {
            if !seen.insert(line.product_variant_id) {
                return Err(ServiceError::ValidationError(format!(
                    "variant {} appears more than once in the cart",
                    line.product_variant_id
                )));
            }
        }

        let txn = self.db.begin().await?;
        let order_id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let mut sub_total = Decimal::ZERO;
        let mut details = Vec::with_capacity(input.lines.len());

        for line in &input.lines {
            let variant = ProductVariant::find_by_id(line.product_variant_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "product variant {} not found",
                        line.product_variant_id
                    ))
                })?;

            // Reservation failure names the offending variant and aborts
            // the whole order.
            self.ledger
                .reserve_within(&txn, variant.id, input.warehouse_id, line.quantity)
                .await
                .map_err(|e| match e {
                    ServiceError::InsufficientStock(_) => ServiceError::InsufficientStock(
                        format!(
                            "not enough stock of {} in warehouse {} for quantity {}",
                            variant.sku, input.warehouse_id, line.quantity
                        ),
                    ),
                    other => other,
                })?;

            let line_subtotal = variant.price * Decimal::from(line.quantity);
            sub_total += line_subtotal;

            details.push(purchase_order_detail::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_variant_id: Set(variant.id),
                quantity: Set(line.quantity),
                price_at_purchase: Set(variant.price),
                subtotal: Set(line_subtotal),
                created_at: Set(now),
            });
        }

        let total_amount = sub_total + input.shipping_fee - input.discount_amount;
        if total_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount exceeds the order total".to_string(),
            ));
        }

        let order_code = format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        );

        let order = purchase_order::ActiveModel {
            id: Set(order_id),
            order_code: Set(order_code),
            user_id: Set(ctx.user_id),
            warehouse_id: Set(input.warehouse_id),
            status: Set(OrderStatus::PendingPayment.as_str().to_string()),
            shipping_name: Set(input.shipping.name.clone()),
            shipping_address: Set(input.shipping.address.clone()),
            shipping_phone: Set(input.shipping.phone.clone()),
            sub_total: Set(sub_total),
            shipping_fee: Set(input.shipping_fee),
            discount_amount: Set(input.discount_amount),
            total_amount: Set(total_amount),
            notes: Set(input.notes.clone()),
            deleted_at: Set(None),
            version: Set(1),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut inserted_details = Vec::with_capacity(details.len());
        for detail in details {
            inserted_details.push(detail.insert(&txn).await?);
        }

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            payment_method: Set(input.payment_method.clone()),
            amount: Set(total_amount),
            status: Set(PaymentStatus::Pending.as_str().to_string()),
            transaction_code: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.emit(Event::OrderPlaced {
            order_id,
            user_id: ctx.user_id,
            warehouse_id: input.warehouse_id,
        })
        .await;
        for line in &input.lines {
            self.emit(Event::StockReserved {
                product_variant_id: line.product_variant_id,
                warehouse_id: input.warehouse_id,
                quantity: line.quantity,
                order_id: Some(order_id),
            })
            .await;
        }

        Ok(PlacedOrder {
            order,
            details: inserted_details,
            payment,
        })
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish order placement event");
        }
    }
}
