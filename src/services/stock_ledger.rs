use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_balance::{self, Entity as InventoryBalance};
use crate::entities::inventory_transaction::{
    self, Entity as InventoryTransaction, TransactionType,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// How an adjustment changes on-hand stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Increase(i32),
    Decrease(i32),
    SetTo(i32),
}

/// A requested change to on-hand stock for one (variant, warehouse) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovement {
    Inbound(i32),
    Outbound(i32),
    Adjustment(AdjustmentKind),
}

impl StockMovement {
    fn transaction_type(&self) -> TransactionType {
        match self {
            StockMovement::Inbound(_) => TransactionType::Inbound,
            StockMovement::Outbound(_) => TransactionType::Outbound,
            StockMovement::Adjustment(_) => TransactionType::Adjustment,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordMovementInput {
    pub product_variant_id: Uuid,
    pub warehouse_id: i32,
    pub movement: StockMovement,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

/// Rejects movements whose quantity makes no sense regardless of the
/// current balance.
fn validate_movement(movement: &StockMovement) -> Result<(), ServiceError> {
    let ok = match movement {
        StockMovement::Inbound(q) | StockMovement::Outbound(q) => *q > 0,
        StockMovement::Adjustment(AdjustmentKind::Increase(n))
        | StockMovement::Adjustment(AdjustmentKind::Decrease(n)) => *n > 0,
        StockMovement::Adjustment(AdjustmentKind::SetTo(n)) => *n >= 0,
    };
    if ok {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "movement quantity out of range: {:?}",
            movement
        )))
    }
}

/// Signed on-hand delta a movement produces against the given balance.
fn signed_delta(movement: &StockMovement, on_hand: i32) -> i32 {
    match movement {
        StockMovement::Inbound(q) => *q,
        StockMovement::Outbound(q) => -*q,
        StockMovement::Adjustment(AdjustmentKind::Increase(n)) => *n,
        StockMovement::Adjustment(AdjustmentKind::Decrease(n)) => -*n,
        StockMovement::Adjustment(AdjustmentKind::SetTo(n)) => *n - on_hand,
    }
}

/// Append-only stock ledger over per-warehouse balance rows. Every
/// mutation runs in its own transaction: a conditional update on the
/// balance row's version plus exactly one inventory_transactions insert,
/// retried a bounded number of times when a concurrent writer wins.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    retry_attempts: u32,
}

impl StockLedgerService {
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

    /// Applies an inbound, outbound or adjustment movement and records it
    /// in the ledger. Outbound and downward adjustments may not take
    /// on-hand below the reserved quantity.
    #[instrument(skip(self), fields(variant = %input.product_variant_id, warehouse = input.warehouse_id))]
    pub async fn record_movement(
        &self,
        input: RecordMovementInput,
        actor_id: i64,
    ) -> Result<(inventory_balance::Model, inventory_transaction::Model), ServiceError> {
        validate_movement(&input.movement)?;

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;

            let balance = match fetch_balance(&txn, input.product_variant_id, input.warehouse_id)
                .await?
            {
                Some(row) => row,
                None => match input.movement {
                    // Outbound from a pair that never had stock is a plain
                    // shortage, not a missing-row error.
                    StockMovement::Outbound(q) => {
                        txn.rollback().await?;
                        return Err(ServiceError::InsufficientStock(format!(
                            "variant {} has no stock in warehouse {} (requested {})",
                            input.product_variant_id, input.warehouse_id, q
                        )));
                    }
                    _ => {
                        match create_balance_row(&txn, input.product_variant_id, input.warehouse_id)
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
                },
            };

            let delta = signed_delta(&input.movement, balance.quantity_on_hand);
            let new_on_hand = match balance.quantity_on_hand.checked_add(delta) {
                Some(total) => total,
                None => {
                    txn.rollback().await?;
                    return Err(ServiceError::ValidationError(format!(
                        "movement of {} overflows the on-hand counter for variant {} in warehouse {}",
                        delta, input.product_variant_id, input.warehouse_id
                    )));
                }
            };

            if new_on_hand < balance.quantity_reserved {
                txn.rollback().await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "variant {} in warehouse {}: on-hand would drop to {} below reserved {}",
                    input.product_variant_id,
                    input.warehouse_id,
                    new_on_hand,
                    balance.quantity_reserved
                )));
            }

            let updated_balance = match apply_balance_update(
                &txn,
                &balance,
                new_on_hand,
                balance.quantity_reserved,
            )
            .await?
            {
                Some(row) => row,
                None => {
                    txn.rollback().await?;
                    continue;
                }
            };

            let record = inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_variant_id: Set(input.product_variant_id),
                warehouse_id: Set(input.warehouse_id),
                transaction_type: Set(input.movement.transaction_type().as_str().to_string()),
                quantity: Set(delta),
                order_id: Set(None),
                reference_number: Set(input.reference_number.clone()),
                notes: Set(input.notes.clone()),
                created_by: Set(actor_id),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;

            self.emit(Event::StockAdjusted {
                product_variant_id: input.product_variant_id,
                warehouse_id: input.warehouse_id,
                quantity_delta: delta,
                new_on_hand,
            })
            .await;

            return Ok((updated_balance, record));
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up recording movement for variant {} in warehouse {} after {} attempts",
            input.product_variant_id, input.warehouse_id, self.retry_attempts
        )))
    }

    /// Reserves sellable stock for an order line. Reservations move
    /// quantity from available to reserved without touching on-hand, so
    /// they leave no ledger record.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<inventory_balance::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "reservation quantity must be positive".to_string(),
            ));
        }

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;

            let balance = fetch_balance(&txn, product_variant_id, warehouse_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::InsufficientStock(format!(
                        "variant {} has no stock in warehouse {} (requested {})",
                        product_variant_id, warehouse_id, quantity
                    ))
                })?;

            if balance.available() < quantity {
                txn.rollback().await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "variant {} in warehouse {}: available {} < requested {}",
                    product_variant_id,
                    warehouse_id,
                    balance.available(),
                    quantity
                )));
            }

            let updated_balance = match apply_balance_update(
                &txn,
                &balance,
                balance.quantity_on_hand,
                balance.quantity_reserved + quantity,
            )
            .await?
            {
                Some(row) => row,
                None => {
                    txn.rollback().await?;
                    continue;
                }
            };

            txn.commit().await?;

            self.emit(Event::StockReserved {
                product_variant_id,
                warehouse_id,
                quantity,
                order_id,
            })
            .await;

            return Ok(updated_balance);
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up reserving variant {} in warehouse {} after {} attempts",
            product_variant_id, warehouse_id, self.retry_attempts
        )))
    }

    /// Returns previously reserved quantity to the sellable pool. Releasing
    /// more than is reserved floors at zero rather than failing, so a
    /// double release stays harmless.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<inventory_balance::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "release quantity must be positive".to_string(),
            ));
        }

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;

            let balance = fetch_balance(&txn, product_variant_id, warehouse_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "no balance for variant {} in warehouse {}",
                        product_variant_id, warehouse_id
                    ))
                })?;

            let new_reserved = (balance.quantity_reserved - quantity).max(0);

            let updated_balance = match apply_balance_update(
                &txn,
                &balance,
                balance.quantity_on_hand,
                new_reserved,
            )
            .await?
            {
                Some(row) => row,
                None => {
                    txn.rollback().await?;
                    continue;
                }
            };

            txn.commit().await?;

            self.emit(Event::StockReleased {
                product_variant_id,
                warehouse_id,
                quantity,
                order_id,
            })
            .await;

            return Ok(updated_balance);
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up releasing variant {} in warehouse {} after {} attempts",
            product_variant_id, warehouse_id, self.retry_attempts
        )))
    }

    /// Ships reserved stock out: decrements on-hand and reserved together
    /// and records an outbound ledger entry tied to the order. Runs inside
    /// the caller's transaction so an order status change and its stock
    /// consumption commit or roll back as one.
    pub(crate) async fn consume_reserved_within(
        &self,
        txn: &DatabaseTransaction,
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
        order_id: Uuid,
        actor_id: i64,
    ) -> Result<(), ServiceError> {
        let balance = fetch_balance(txn, product_variant_id, warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InvariantViolation(format!(
                    "no balance for reserved variant {} in warehouse {}",
                    product_variant_id, warehouse_id
                ))
            })?;

        if balance.quantity_reserved < quantity {
            return Err(ServiceError::InvariantViolation(format!(
                "variant {} in warehouse {}: reserved {} < shipped {}",
                product_variant_id, warehouse_id, balance.quantity_reserved, quantity
            )));
        }

        if apply_balance_update(
            txn,
            &balance,
            balance.quantity_on_hand - quantity,
            balance.quantity_reserved - quantity,
        )
        .await?
        .is_none()
        {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "balance for variant {} in warehouse {} changed during shipment",
                product_variant_id, warehouse_id
            )));
        }

        inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_variant_id: Set(product_variant_id),
            warehouse_id: Set(warehouse_id),
            transaction_type: Set(TransactionType::Outbound.as_str().to_string()),
            quantity: Set(-quantity),
            order_id: Set(Some(order_id)),
            reference_number: Set(None),
            notes: Set(None),
            created_by: Set(actor_id),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        Ok(())
    }

    /// Reserves stock inside the caller's transaction, for order
    /// placement. The caller rolls everything back if any line fails.
    pub(crate) async fn reserve_within(
        &self,
        txn: &DatabaseTransaction,
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let balance = fetch_balance(txn, product_variant_id, warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InsufficientStock(format!(
                    "variant {} has no stock in warehouse {} (requested {})",
                    product_variant_id, warehouse_id, quantity
                ))
            })?;

        if balance.available() < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "variant {} in warehouse {}: available {} < requested {}",
                product_variant_id,
                warehouse_id,
                balance.available(),
                quantity
            )));
        }

        if apply_balance_update(
            txn,
            &balance,
            balance.quantity_on_hand,
            balance.quantity_reserved + quantity,
        )
        .await?
        .is_none()
        {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "balance for variant {} in warehouse {} changed during reservation",
                product_variant_id, warehouse_id
            )));
        }

        Ok(())
    }

    /// Releases a reservation inside the caller's transaction, for order
    /// cancellation.
    pub(crate) async fn release_within(
        &self,
        txn: &DatabaseTransaction,
        product_variant_id: Uuid,
        warehouse_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let balance = fetch_balance(txn, product_variant_id, warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InvariantViolation(format!(
                    "no balance for reserved variant {} in warehouse {}",
                    product_variant_id, warehouse_id
                ))
            })?;

        if balance.quantity_reserved < quantity {
            return Err(ServiceError::InvariantViolation(format!(
                "variant {} in warehouse {}: reserved {} < release {}",
                product_variant_id, warehouse_id, balance.quantity_reserved, quantity
            )));
        }

        if apply_balance_update(
            txn,
            &balance,
            balance.quantity_on_hand,
            balance.quantity_reserved - quantity,
        )
        .await?
        .is_none()
        {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "balance for variant {} in warehouse {} changed during release",
                product_variant_id, warehouse_id
            )));
        }

        Ok(())
    }

    /// Sets the low-stock threshold for a pair, creating the balance row
    /// if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn set_reorder_level(
        &self,
        product_variant_id: Uuid,
        warehouse_id: i32,
        reorder_level: i32,
    ) -> Result<inventory_balance::Model, ServiceError> {
        if reorder_level < 0 {
            return Err(ServiceError::ValidationError(
                "reorder level must not be negative".to_string(),
            ));
        }

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;

            let balance = match fetch_balance(&txn, product_variant_id, warehouse_id).await? {
                Some(row) => row,
                None => match create_balance_row(&txn, product_variant_id, warehouse_id).await {
                    Ok(row) => row,
                    Err(e) if lost_insert_race(&e) => {
                        txn.rollback().await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let now = chrono::Utc::now();
            let result = InventoryBalance::update_many()
                .col_expr(
                    inventory_balance::Column::ReorderLevel,
                    Expr::value(reorder_level),
                )
                .col_expr(
                    inventory_balance::Column::Version,
                    Expr::value(balance.version + 1),
                )
                .col_expr(inventory_balance::Column::UpdatedAt, Expr::value(now))
                .filter(inventory_balance::Column::Id.eq(balance.id))
                .filter(inventory_balance::Column::Version.eq(balance.version))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                txn.rollback().await?;
                continue;
            }

            txn.commit().await?;
            return Ok(inventory_balance::Model {
                reorder_level,
                version: balance.version + 1,
                updated_at: now,
                ..balance
            });
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up setting reorder level for variant {} in warehouse {} after {} attempts",
            product_variant_id, warehouse_id, self.retry_attempts
        )))
    }

    /// Current balance for a pair, creating the zero row on first access.
    #[instrument(skip(self))]
    pub async fn get_balance(
        &self,
        product_variant_id: Uuid,
        warehouse_id: i32,
    ) -> Result<inventory_balance::Model, ServiceError> {
        if let Some(row) = InventoryBalance::find()
            .filter(inventory_balance::Column::ProductVariantId.eq(product_variant_id))
            .filter(inventory_balance::Column::WarehouseId.eq(warehouse_id))
            .one(self.db.as_ref())
            .await?
        {
            return Ok(row);
        }

        for _ in 0..self.retry_attempts {
            let txn = self.db.begin().await?;
            let row = match fetch_balance(&txn, product_variant_id, warehouse_id).await? {
                Some(row) => row,
                None => match create_balance_row(&txn, product_variant_id, warehouse_id).await {
                    Ok(row) => row,
                    Err(e) if lost_insert_race(&e) => {
                        txn.rollback().await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };
            txn.commit().await?;
            return Ok(row);
        }

        Err(ServiceError::ConcurrencyConflict(format!(
            "gave up reading balance for variant {} in warehouse {} after {} attempts",
            product_variant_id, warehouse_id, self.retry_attempts
        )))
    }

    /// Ledger history for one (variant, warehouse) pair, oldest first.
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        product_variant_id: Uuid,
        warehouse_id: i32,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<inventory_transaction::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 200);

        let paginator = InventoryTransaction::find()
            .filter(inventory_transaction::Column::ProductVariantId.eq(product_variant_id))
            .filter(inventory_transaction::Column::WarehouseId.eq(warehouse_id))
            .order_by_asc(inventory_transaction::Column::CreatedAt)
            .order_by_asc(inventory_transaction::Column::Id)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to publish stock event");
        }
    }
}

pub(crate) async fn fetch_balance(
    txn: &DatabaseTransaction,
    product_variant_id: Uuid,
    warehouse_id: i32,
) -> Result<Option<inventory_balance::Model>, ServiceError> {
    let row = InventoryBalance::find()
        .filter(inventory_balance::Column::ProductVariantId.eq(product_variant_id))
        .filter(inventory_balance::Column::WarehouseId.eq(warehouse_id))
        .one(txn)
        .await?;
    Ok(row)
}

/// Creates an empty balance row the first time a pair sees stock.
pub(crate) async fn create_balance_row(
    txn: &DatabaseTransaction,
    product_variant_id: Uuid,
    warehouse_id: i32,
) -> Result<inventory_balance::Model, ServiceError> {
    let row = inventory_balance::ActiveModel {
        product_variant_id: Set(product_variant_id),
        warehouse_id: Set(warehouse_id),
        quantity_on_hand: Set(0),
        quantity_reserved: Set(0),
        reorder_level: Set(0),
        version: Set(1),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(row)
}

/// Conditional write against the row version read earlier. Returns the
/// row as written on success, None when a concurrent writer got there
/// first.
pub(crate) async fn apply_balance_update(
    txn: &DatabaseTransaction,
    balance: &inventory_balance::Model,
    new_on_hand: i32,
    new_reserved: i32,
) -> Result<Option<inventory_balance::Model>, ServiceError> {
    let now = chrono::Utc::now();
    let result = InventoryBalance::update_many()
        .col_expr(
            inventory_balance::Column::QuantityOnHand,
            Expr::value(new_on_hand),
        )
        .col_expr(
            inventory_balance::Column::QuantityReserved,
            Expr::value(new_reserved),
        )
        .col_expr(
            inventory_balance::Column::Version,
            Expr::value(balance.version + 1),
        )
        .col_expr(inventory_balance::Column::UpdatedAt, Expr::value(now))
        .filter(inventory_balance::Column::Id.eq(balance.id))
        .filter(inventory_balance::Column::Version.eq(balance.version))
        .exec(txn)
        .await?;

    if result.rows_affected == 1 {
        Ok(Some(inventory_balance::Model {
            quantity_on_hand: new_on_hand,
            quantity_reserved: new_reserved,
            version: balance.version + 1,
            updated_at: now,
            ..balance.clone()
        }))
    } else {
        Ok(None)
    }
}

/// A unique-index hit while inserting the zero row means another
/// transaction created it first; the caller rolls back, re-reads and
/// retries instead of surfacing a database error.
pub(crate) fn lost_insert_race(err: &ServiceError) -> bool {
    match err {
        ServiceError::DatabaseError(db) => matches!(
            db.sql_err(),
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
        ),
        _ => false,
    }
}
