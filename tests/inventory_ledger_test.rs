mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;

use common::{read_json, TestApp};

#[tokio::test]
async fn inbound_and_outbound_update_balance_and_ledger() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-1", dec!(10.00)).await;

    app.seed_stock(variant.id, warehouse.id, 20).await;

    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "outbound": 6 },
                "reference_number": "PICK-42",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["balance"]["quantity_on_hand"], 14);
    assert_eq!(body["transaction"]["quantity"], -6);
    assert_eq!(body["transaction"]["transaction_type"], "outbound");

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let balance = read_json(response).await;
    assert_eq!(balance["quantity_on_hand"], 14);
    assert_eq!(balance["quantity_reserved"], 0);
}

#[tokio::test]
async fn outbound_past_zero_is_rejected_without_a_ledger_entry() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-2", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 3).await;

    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "outbound": 4 },
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/transactions/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    let history = read_json(response).await;
    // Only the seeding inbound is on record.
    assert_eq!(history["total"], 1);

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    let balance = read_json(response).await;
    assert_eq!(balance["quantity_on_hand"], 3);
}

#[tokio::test]
async fn set_to_adjustment_records_the_signed_delta() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-3", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 10).await;

    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "adjustment": { "set_to": 4 } },
                "notes": "cycle count",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["balance"]["quantity_on_hand"], 4);
    assert_eq!(body["transaction"]["quantity"], -6);
    assert_eq!(body["transaction"]["transaction_type"], "adjustment");
}

#[tokio::test]
async fn replaying_the_ledger_reproduces_the_balance() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-4", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 50).await;
    for movement in [
        json!({ "outbound": 7 }),
        json!({ "adjustment": { "increase": 3 } }),
        json!({ "adjustment": { "set_to": 31 } }),
        json!({ "outbound": 11 }),
        json!({ "inbound": 2 }),
    ] {
        let response = app
            .as_admin(
                Method::POST,
                "/api/v1/inventory/adjust",
                Some(json!({
                    "product_variant_id": variant.id,
                    "warehouse_id": warehouse.id,
                    "movement": movement,
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/transactions/{}/{}?per_page=100",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    let history = read_json(response).await;
    let replayed: i64 = history["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["quantity"].as_i64().unwrap())
        .sum();

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    let balance = read_json(response).await;
    assert_eq!(replayed, balance["quantity_on_hand"].as_i64().unwrap());
    assert_eq!(balance["quantity_on_hand"], 22);
}

#[tokio::test]
async fn reservations_bound_outbound_stock() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-5", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 10).await;

    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/reserve",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "quantity": 8,
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let balance = read_json(response).await;
    assert_eq!(balance["quantity_reserved"], 8);

    // Only 2 are sellable now.
    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "outbound": 3 },
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Reserving more than is available fails too.
    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/reserve",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "quantity": 3,
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Over-release floors at zero instead of failing.
    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/release",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "quantity": 50,
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let balance = read_json(response).await;
    assert_eq!(balance["quantity_reserved"], 0);
}

#[tokio::test]
async fn inbound_past_the_counter_limit_is_rejected() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-8", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, i32::MAX).await;

    let response = app
        .as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "inbound": 1 },
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Balance and ledger are untouched by the rejected movement.
    let balance = read_json(
        app.as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(
        balance["quantity_on_hand"].as_i64().unwrap(),
        i64::from(i32::MAX)
    );

    let history = read_json(
        app.as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/transactions/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(history["total"], 1);
}

#[tokio::test]
async fn adjust_response_matches_the_stored_balance() {
    let app = TestApp::new().await;
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-9", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 5).await;

    let body = read_json(
        app.as_admin(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": warehouse.id,
                "movement": { "outbound": 2 },
            })),
        )
        .await,
    )
    .await;

    let stored = read_json(
        app.as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await,
    )
    .await;

    assert_eq!(body["balance"]["quantity_on_hand"], stored["quantity_on_hand"]);
    assert_eq!(body["balance"]["version"], stored["version"]);
    assert_eq!(body["balance"]["updated_at"], stored["updated_at"]);
}

#[tokio::test]
async fn scoped_staff_cannot_touch_other_warehouses() {
    let app = TestApp::new().await;
    let home = app.seed_warehouse("home").await;
    let other = app.seed_warehouse("other").await;
    let variant = app.seed_variant("SKU-LEDGER-6", dec!(5.00)).await;

    let response = app
        .as_staff(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": other.id,
                "movement": { "inbound": 5 },
            })),
            Some(home.id),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .as_staff(
            Method::POST,
            "/api/v1/inventory/adjust",
            Some(json!({
                "product_variant_id": variant.id,
                "warehouse_id": home.id,
                "movement": { "inbound": 5 },
            })),
            Some(home.id),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn concurrent_outbound_movements_lose_no_updates() {
    let app = Arc::new(TestApp::new().await);
    let warehouse = app.seed_warehouse("central").await;
    let variant = app.seed_variant("SKU-LEDGER-7", dec!(5.00)).await;

    app.seed_stock(variant.id, warehouse.id, 5).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        let variant_id = variant.id;
        let warehouse_id = warehouse.id;
        handles.push(tokio::spawn(async move {
            app.as_admin(
                Method::POST,
                "/api/v1/inventory/adjust",
                Some(json!({
                    "product_variant_id": variant_id,
                    "warehouse_id": warehouse_id,
                    "movement": { "outbound": 1 },
                })),
            )
            .await
            .status()
        }));
    }

    let mut succeeded: i64 = 0;
    for handle in handles {
        if handle.await.unwrap() == StatusCode::CREATED {
            succeeded += 1;
        }
    }

    let response = app
        .as_admin(
            Method::GET,
            &format!(
                "/api/v1/inventory/balance/{}/{}",
                variant.id, warehouse.id
            ),
            None,
        )
        .await;
    let balance = read_json(response).await;
    let on_hand = balance["quantity_on_hand"].as_i64().unwrap();

    // Every success consumed exactly one unit and none went missing.
    assert_eq!(on_hand, 5 - succeeded);
    assert!(on_hand >= 0);
    assert_eq!(succeeded, 5);
}
