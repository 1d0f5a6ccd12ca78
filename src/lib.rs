//! Back-office API for a multi-warehouse shop: stock ledger, transfers,
//! availability queries and the order fulfillment state machine.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;

use handlers::{AppServices, SharedServices};
use services::availability::AvailabilityService;
use services::order_placement::OrderPlacementService;
use services::order_status::OrderStatusService;
use services::stock_ledger::StockLedgerService;
use services::transfers::TransferService;

/// Wires every service over one database pool and one event channel.
pub fn build_services(
    db: Arc<DatabaseConnection>,
    event_sender: Arc<events::EventSender>,
    ledger_retry_attempts: u32,
) -> SharedServices {
    let stock_ledger =
        StockLedgerService::new(db.clone(), event_sender.clone(), ledger_retry_attempts);
    let transfers =
        TransferService::new(db.clone(), event_sender.clone(), ledger_retry_attempts);
    let availability = AvailabilityService::new(db.clone());
    let order_status =
        OrderStatusService::new(db.clone(), stock_ledger.clone(), event_sender.clone());
    let order_placement = OrderPlacementService::new(db, stock_ledger.clone(), event_sender);

    Arc::new(AppServices {
        stock_ledger,
        transfers,
        availability,
        order_status,
        order_placement,
    })
}

/// Versioned API surface: inventory and order routes under one router.
pub fn api_v1_routes() -> Router<SharedServices> {
    Router::new()
        .nest("/inventory", handlers::inventory::inventory_router())
        .nest("/orders", handlers::orders::order_router())
}

/// Complete application router, including health, ready to serve.
pub fn app_router(services: SharedServices) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({ "status": "ok" })) }),
        )
        .nest("/api/v1", api_v1_routes())
        .with_state(services)
}
