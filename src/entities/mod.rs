pub mod inventory_balance;
pub mod inventory_transaction;
pub mod payment;
pub mod product_variant;
pub mod purchase_order;
pub mod purchase_order_detail;
pub mod shipment;
pub mod warehouse;
