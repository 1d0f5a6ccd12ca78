use std::sync::Arc;

use crate::services::availability::AvailabilityService;
use crate::services::order_placement::OrderPlacementService;
use crate::services::order_status::OrderStatusService;
use crate::services::stock_ledger::StockLedgerService;
use crate::services::transfers::TransferService;

pub mod inventory;
pub mod orders;

/// Everything the HTTP layer needs, shared as one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub stock_ledger: StockLedgerService,
    pub transfers: TransferService,
    pub availability: AvailabilityService,
    pub order_status: OrderStatusService,
    pub order_placement: OrderPlacementService,
}

pub type SharedServices = Arc<AppServices>;
