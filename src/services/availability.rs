use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::inventory_balance::{self, Entity as InventoryBalance};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

/// Point-in-time availability snapshot for a variant, either in one
/// warehouse or summed across all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAvailability {
    pub product_variant_id: Uuid,
    pub warehouse_id: Option<i32>,
    pub on_hand: i32,
    pub reserved: i32,
    pub available: i32,
    pub status: StockStatus,
}

/// Row in the low-stock report: a (variant, warehouse) pair at or under
/// its reorder level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockEntry {
    pub product_variant_id: Uuid,
    pub warehouse_id: i32,
    pub on_hand: i32,
    pub reserved: i32,
    pub reorder_level: i32,
    pub status: StockStatus,
}

fn classify(on_hand: i32, reorder_level: i32) -> StockStatus {
    if on_hand <= 0 {
        StockStatus::OutOfStock
    } else if on_hand <= reorder_level {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

/// Read-only view over inventory balances; never mutates, so repeated
/// reads of an unchanged ledger return identical snapshots.
#[derive(Clone)]
pub struct AvailabilityService {
    db: Arc<DatabaseConnection>,
}

impl AvailabilityService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Availability for one warehouse, or summed across all warehouses
    /// when `warehouse_id` is omitted. A pair with no balance row reads
    /// as zero stock.
    #[instrument(skip(self))]
    pub async fn availability(
        &self,
        product_variant_id: Uuid,
        warehouse_id: Option<i32>,
    ) -> Result<StockAvailability, ServiceError> {
        let mut query = InventoryBalance::find()
            .filter(inventory_balance::Column::ProductVariantId.eq(product_variant_id));
        if let Some(wh) = warehouse_id {
            query = query.filter(inventory_balance::Column::WarehouseId.eq(wh));
        }
        let rows = query.all(self.db.as_ref()).await?;

        let on_hand: i32 = rows.iter().map(|r| r.quantity_on_hand).sum();
        let reserved: i32 = rows.iter().map(|r| r.quantity_reserved).sum();
        // Aggregate threshold is the sum of the per-warehouse levels.
        let reorder_level: i32 = rows.iter().map(|r| r.reorder_level).sum();

        Ok(StockAvailability {
            product_variant_id,
            warehouse_id,
            on_hand,
            reserved,
            available: on_hand - reserved,
            status: classify(on_hand, reorder_level),
        })
    }

    /// Every (variant, warehouse) pair at or below its reorder level.
    #[instrument(skip(self))]
    pub async fn low_stock_report(&self) -> Result<Vec<LowStockEntry>, ServiceError> {
        let rows = InventoryBalance::find()
            .filter(
                Expr::col(inventory_balance::Column::QuantityOnHand)
                    .lte(Expr::col(inventory_balance::Column::ReorderLevel)),
            )
            .order_by_asc(inventory_balance::Column::WarehouseId)
            .order_by_asc(inventory_balance::Column::ProductVariantId)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| LowStockEntry {
                product_variant_id: r.product_variant_id,
                warehouse_id: r.warehouse_id,
                on_hand: r.quantity_on_hand,
                reserved: r.quantity_reserved,
                reorder_level: r.reorder_level,
                status: classify(r.quantity_on_hand, r.reorder_level),
            })
            .collect())
    }
}
