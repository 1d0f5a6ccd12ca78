pub mod availability;
pub mod order_placement;
pub mod order_status;
pub mod stock_ledger;
pub mod transfers;
