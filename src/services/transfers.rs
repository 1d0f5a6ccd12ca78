use std::sync::Arc;

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionTrait};
use serde::Deserialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_transaction::{self, TransactionType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger::{
    apply_balance_update, create_balance_row, fetch_balance, lost_insert_race,
};

#[derive(Debug, Clone, Deserialize)]
pub struct TransferStockInput {
    pub product_variant_id: Uuid,
    pub from_warehouse_id: i32,
    pub to_warehouse_id: i32,
    pub quantity: i32,
    pub notes: Option<String>,
}

/// Moves on-hand stock between warehouses. The outbound and inbound legs
/// commit atomically: both balance rows are updated and a transfer_out /
/// transfer_in ledger pair is written in one transaction, linked by a
/// shared reference number. Reserved stock never moves.
#[derive(Clone)]
pub struct TransferService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    retry_attempts: u32,
}

impl TransferService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        retry_attempts: u32,
    ) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts,
        }
    }

    #[instrument(skip(self), fields(variant = %input.product_variant_id))]
    pub async fn transfer(
        &self,
        input: TransferStockInput,
        actor_id: i64,
    ) -> Result<String, ServiceError> {
        if input.from_warehouse_id == input.to_warehouse_id {
            return Err(ServiceError::ValidationError(
                "source and destination warehouses must differ".to_string(),
            ));
        }
        if input.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "transfer quantity must be positive".to_string(),
            ));
        }

        let reference = format!("TRF-{}", Uuid::new_v4().simple());

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;

            // Deterministic read order across concurrent transfers.
            let (first, second) = if input.from_warehouse_id < input.to_warehouse_id {
                (input.from_warehouse_id, input.to_warehouse_id)
            } else {
                (input.to_warehouse_id, input.from_warehouse_id)
            };
            let first_row = fetch_balance(&txn, input.product_variant_id, first).await?;
            let second_row = fetch_balance(&txn, input.product_variant_id, second).await?;

            let (source, dest) = if first == input.from_warehouse_id {
                (first_row, second_row)
            } else {
                (second_row, first_row)
            };

            let source = source.ok_or_else(|| {
                ServiceError::InsufficientStock(format!(
                    "variant {} has no stock in warehouse {} (requested {})",
                    input.product_variant_id, input.from_warehouse_id, input.quantity
                ))
            })?;

            // Reserved stock stays put; only the sellable surplus may leave.
            if source.available() < input.quantity {
                txn.rollback().await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "variant {} in warehouse {}: available {} < transfer {}",
                    input.product_variant_id,
                    input.from_warehouse_id,
                    source.available(),
                    input.quantity
                )));
            }

            let dest = match dest {
                Some(row) => row,
                None => {
                    match create_balance_row(&txn, input.product_variant_id, input.to_warehouse_id)
                        .await
                    {
                        Ok(row) => row,
                        Err(e) if lost_insert_race(&e) => {
                            txn.rollback().await?;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            let dest_on_hand = match dest.quantity_on_hand.checked_add(input.quantity) {
                Some(total) => total,
                None => {
                    txn.rollback().await?;
                    return Err(ServiceError::ValidationError(format!(
                        "transfer of {} overflows the on-hand counter for variant {} in warehouse {}",
                        input.quantity, input.product_variant_id, input.to_warehouse_id
                    )));
                }
            };

            let source_updated = apply_balance_update(
                &txn,
                &source,
                source.quantity_on_hand - input.quantity,
                source.quantity_reserved,
            )
            .await?;
            let dest_updated = apply_balance_update(&txn, &dest, dest_on_hand, dest.quantity_reserved)
                .await?;
            if source_updated.is_none() || dest_updated.is_none() {
                txn.rollback().await?;
                continue;
            }

            inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_variant_id: Set(input.product_variant_id),
                warehouse_id: Set(input.from_warehouse_id),
                transaction_type: Set(TransactionType::TransferOut.as_str().to_string()),
                quantity: Set(-input.quantity),
                order_id: Set(None),
                reference_number: Set(Some(reference.clone())),
                notes: Set(input.notes.clone()),
                created_by: Set(actor_id),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_variant_id: Set(input.product_variant_id),
                warehouse_id: Set(input.to_warehouse_id),
                transaction_type: Set(TransactionType::TransferIn.as_str().to_string()),
                quantity: Set(input.quantity),
                order_id: Set(None),
                reference_number: Set(Some(reference.clone())),
                notes: Set(input.notes.clone()),
                created_by: Set(actor_id),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;

            if let Err(e) = self
                .event_sender
                .send(Event::StockTransferred {
                    product_variant_id: input.product_variant_id,
                    from_warehouse_id: input.from_warehouse_id,
                    to_warehouse_id: input.to_warehouse_id,
                    quantity: input.quantity,
                })
                .await
            {
                warn!(error = %e, "failed to publish transfer event");
            }

            return Ok(reference);
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up transferring variant {} from warehouse {} to {} after {} attempts",
            input.product_variant_id,
            input.from_warehouse_id,
            input.to_warehouse_id,
            self.retry_attempts
        )))
    }
}
