use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::errors::ServiceError;
use crate::services::stock_ledger::{RecordMovementInput, StockMovement};
use crate::services::transfers::TransferStockInput;

use super::SharedServices;

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: i32,
    pub movement: StockMovement,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReservationRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: i32,
    pub quantity: i32,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub warehouse_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub fn inventory_router() -> Router<SharedServices> {
    Router::new()
        .route("/adjust", post(adjust_stock))
        .route("/reserve", post(reserve_stock))
        .route("/release", post(release_stock))
        .route("/transfer", post(transfer_stock))
        .route("/balance/:variant_id/:warehouse_id", get(get_balance))
        .route("/availability/:variant_id", get(get_availability))
        .route(
            "/transactions/:variant_id/:warehouse_id",
            get(list_transactions),
        )
        .route("/reorder-level", post(set_reorder_level))
        .route("/low-stock", get(low_stock_report))
}

#[derive(Debug, Deserialize)]
pub struct ReorderLevelRequest {
    pub product_variant_id: Uuid,
    pub warehouse_id: i32,
    pub reorder_level: i32,
}

async fn set_reorder_level(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<ReorderLevelRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(req.warehouse_id)?;

    let balance = services
        .stock_ledger
        .set_reorder_level(req.product_variant_id, req.warehouse_id, req.reorder_level)
        .await?;
    Ok(Json(balance))
}

async fn adjust_stock(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(req.warehouse_id)?;

    let (balance, transaction) = services
        .stock_ledger
        .record_movement(
            RecordMovementInput {
                product_variant_id: req.product_variant_id,
                warehouse_id: req.warehouse_id,
                movement: req.movement,
                reference_number: req.reference_number,
                notes: req.notes,
            },
            ctx.user_id,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "balance": balance,
            "transaction": transaction,
        })),
    ))
}

async fn reserve_stock(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<ReservationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(req.warehouse_id)?;

    let balance = services
        .stock_ledger
        .reserve(
            req.product_variant_id,
            req.warehouse_id,
            req.quantity,
            req.order_id,
        )
        .await?;

    Ok(Json(balance))
}

async fn release_stock(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<ReservationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(req.warehouse_id)?;

    let balance = services
        .stock_ledger
        .release(
            req.product_variant_id,
            req.warehouse_id,
            req.quantity,
            req.order_id,
        )
        .await?;

    Ok(Json(balance))
}

async fn transfer_stock(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<TransferStockInput>,
) -> Result<impl IntoResponse, ServiceError> {
    // The caller must be allowed to act on both ends of the transfer.
    ctx.ensure_warehouse(req.from_warehouse_id)?;
    ctx.ensure_warehouse(req.to_warehouse_id)?;

    let reference = services.transfers.transfer(req, ctx.user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "reference_number": reference })),
    ))
}

async fn get_balance(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path((variant_id, warehouse_id)): Path<(Uuid, i32)>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(warehouse_id)?;

    let balance = services
        .stock_ledger
        .get_balance(variant_id, warehouse_id)
        .await?;
    Ok(Json(balance))
}

async fn get_availability(
    State(services): State<SharedServices>,
    Path(variant_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let snapshot = services
        .availability
        .availability(variant_id, query.warehouse_id)
        .await?;
    Ok(Json(snapshot))
}

async fn list_transactions(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path((variant_id, warehouse_id)): Path<(Uuid, i32)>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_warehouse(warehouse_id)?;

    let (transactions, total) = services
        .stock_ledger
        .list_transactions(
            variant_id,
            warehouse_id,
            query.page.unwrap_or(0),
            query.per_page.unwrap_or(50),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "transactions": transactions,
        "total": total,
    })))
}

async fn low_stock_report(
    State(services): State<SharedServices>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_staff()?;

    let report = services.availability.low_stock_report().await?;
    Ok(Json(report))
}
