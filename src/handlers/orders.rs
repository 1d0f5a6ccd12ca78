use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{AuthContext, Role};
use crate::entities::purchase_order::OrderStatus;
use crate::entities::shipment::ShipmentStatus;
use crate::errors::ServiceError;
use crate::services::order_placement::PlaceOrderInput;

use super::SharedServices;

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub transaction_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateShipmentRequest {
    pub shipping_method: String,
    pub tracking_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShipmentStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideStatusRequest {
    pub order_ids: Vec<Uuid>,
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub user_id: Option<i64>,
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub fn order_router() -> Router<SharedServices> {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/override", post(override_status))
        .route("/:id", get(get_order))
        .route("/:id/confirm-payment", post(confirm_payment))
        .route("/:id/process", post(begin_processing))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/shipment", post(create_shipment))
        .route("/:id/shipment/status", post(update_shipment_status))
}

async fn place_order(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<PlaceOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = services.order_placement.place_order(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

async fn list_orders(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    // Customers only ever see their own orders.
    let user_filter = match ctx.role {
        Role::Customer => Some(ctx.user_id),
        _ => query.user_id,
    };
    let status = match &query.status {
        Some(raw) => Some(OrderStatus::from_str(raw).ok_or_else(|| {
            ServiceError::ValidationError(format!("unknown order status '{}'", raw))
        })?),
        None => None,
    };

    let (orders, total) = services
        .order_status
        .list_orders(
            user_filter,
            status,
            query.page.unwrap_or(0),
            query.per_page.unwrap_or(20),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "orders": orders,
        "total": total,
    })))
}

async fn get_order(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let aggregate = services.order_status.get_order(order_id).await?;
    ensure_can_view(&ctx, aggregate.order.user_id)?;
    Ok(Json(aggregate))
}

async fn confirm_payment(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_staff()?;
    let order = services
        .order_status
        .confirm_payment(order_id, req.transaction_code)
        .await?;
    Ok(Json(order))
}

async fn begin_processing(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_staff()?;
    let order = services.order_status.begin_processing(order_id).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    // Customers may cancel their own orders; staff anyone's.
    let aggregate = services.order_status.get_order(order_id).await?;
    ensure_can_view(&ctx, aggregate.order.user_id)?;

    let order = services.order_status.cancel(order_id, req.reason).await?;
    Ok(Json(order))
}

async fn create_shipment(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_staff()?;
    let shipment = services
        .order_status
        .create_shipment(order_id, req.shipping_method, req.tracking_code, ctx.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn update_shipment_status(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ShipmentStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    ctx.ensure_staff()?;
    let status = ShipmentStatus::from_str(&req.status).ok_or_else(|| {
        ServiceError::ValidationError(format!("unknown shipment status '{}'", req.status))
    })?;

    let shipment = services
        .order_status
        .update_shipment_status(order_id, status)
        .await?;
    Ok(Json(shipment))
}

async fn override_status(
    State(services): State<SharedServices>,
    ctx: AuthContext,
    Json(req): Json<OverrideStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let target = OrderStatus::from_str(&req.target).ok_or_else(|| {
        ServiceError::ValidationError(format!("unknown order status '{}'", req.target))
    })?;

    let results = services
        .order_status
        .override_status(&ctx, req.order_ids, target)
        .await?;
    Ok(Json(results))
}

fn ensure_can_view(ctx: &AuthContext, owner_id: i64) -> Result<(), ServiceError> {
    if ctx.role == Role::Customer && ctx.user_id != owner_id {
        return Err(ServiceError::Forbidden(
            "order belongs to another customer".to_string(),
        ));
    }
    Ok(())
}
