use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use backoffice_api::{
    config::AppConfig,
    db,
    entities::{product_variant, warehouse},
    events::{self, EventSender},
    handlers::SharedServices,
};

/// Spins up the full router over a throwaway SQLite file. Each harness
/// gets its own database so tests in one binary can run concurrently.
pub struct TestApp {
    router: Router,
    pub services: SharedServices,
    pub db: Arc<sea_orm::DatabaseConnection>,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file = format!("backoffice_test_{}.db", Uuid::new_v4().simple());
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        // Contended tests hammer single rows; give the optimistic loop room.
        cfg.ledger_retry_attempts = 50;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = backoffice_api::build_services(
            db_arc.clone(),
            event_sender,
            cfg.ledger_retry_attempts,
        );
        let router = backoffice_api::app_router(services.clone());

        Self {
            router,
            services,
            db: db_arc,
            db_file,
            _event_task: event_task,
        }
    }

    /// Raw request with explicit identity headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        identity: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in identity {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(
            method,
            uri,
            body,
            &[("x-user-id", "1"), ("x-user-role", "admin")],
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn as_staff(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        warehouse_scope: Option<i32>,
    ) -> axum::response::Response {
        let scope = warehouse_scope.map(|w| w.to_string());
        let mut identity = vec![("x-user-id", "2"), ("x-user-role", "staff")];
        if let Some(scope) = scope.as_deref() {
            identity.push(("x-warehouse-scope", scope));
        }
        self.request(method, uri, body, &identity).await
    }

    #[allow(dead_code)]
    pub async fn as_customer(
        &self,
        user_id: i64,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let id = user_id.to_string();
        self.request(
            method,
            uri,
            body,
            &[("x-user-id", id.as_str()), ("x-user-role", "customer")],
        )
        .await
    }

    pub async fn seed_warehouse(&self, name: &str) -> warehouse::Model {
        warehouse::ActiveModel {
            name: Set(name.to_string()),
            location: Set(format!("{} district", name)),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed warehouse for tests")
    }

    pub async fn seed_variant(&self, sku: &str, price: Decimal) -> product_variant::Model {
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            price: Set(price),
            created_at: Set(chrono::Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed product variant for tests")
    }

    /// Adds on-hand stock through the API so the ledger sees it.
    pub async fn seed_stock(&self, variant_id: Uuid, warehouse_id: i32, quantity: i32) {
        let response = self
            .as_admin(
                Method::POST,
                "/api/v1/inventory/adjust",
                Some(serde_json::json!({
                    "product_variant_id": variant_id,
                    "warehouse_id": warehouse_id,
                    "movement": { "inbound": quantity },
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "seed stock failed");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Places an order through the API as the given customer and returns the
/// response body. Panics unless the order is accepted.
#[allow(dead_code)]
pub async fn place_order(
    app: &TestApp,
    user_id: i64,
    warehouse_id: i32,
    lines: Value,
) -> Value {
    let response = app
        .as_customer(
            user_id,
            Method::POST,
            "/api/v1/orders",
            Some(serde_json::json!({
                "warehouse_id": warehouse_id,
                "lines": lines,
                "shipping": {
                    "name": "Pat Doe",
                    "address": "1 Main St",
                    "phone": "555-0100",
                },
                "payment_method": "card",
                "shipping_fee": "5.00",
                "discount_amount": "0.00",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED, "order placement failed");
    read_json(response).await
}

/// Reads a JSON response body.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not valid json")
}
