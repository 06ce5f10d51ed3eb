//! Common test utilities for integration tests.
//!
//! The router is built over the in-memory device store, so these tests need
//! no database. Postgres-specific behavior is covered in the persistence crate.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use emi_lock_api::{
    app::create_app,
    config::{
        Config, DatabaseConfig, LoggingConfig, SchedulerConfig, SecurityConfig, ServerConfig,
        StorageBackend, StorageConfig,
    },
};
use fake::{faker::name::en::Name, Fake};
use persistence::repositories::InMemoryDeviceRepository;
use serde_json::{json, Value};

/// Test configuration backed by the in-memory store.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
            request_timeout_secs: 30,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig::default(),
        scheduler: SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        },
    }
}

/// Create a test application router along with its store.
///
/// The store handle lets tests stage state the API cannot set directly.
pub fn create_test_app() -> (Router, Arc<InMemoryDeviceRepository>) {
    let store = Arc::new(InMemoryDeviceRepository::new());
    let app = create_app(test_config(), store.clone());
    (app, store)
}

/// A random IMEI with a valid check digit.
pub fn unique_imei() -> String {
    let body: String = (0..14)
        .map(|_| char::from(b'0' + (0..10u8).fake::<u8>()))
        .collect();
    let check = shared::validation::luhn_check_digit(&body).unwrap();
    format!("{}{}", body, check)
}

/// Device registration payload.
pub struct TestDevice {
    pub id: String,
    pub customer_name: String,
    pub imei1: String,
    pub tenure: i32,
    pub paid_emis: i32,
    pub next_due_date: NaiveDate,
}

impl TestDevice {
    pub fn new() -> Self {
        Self {
            id: format!("dev-{}", uuid::Uuid::new_v4().simple()),
            customer_name: Name().fake(),
            imei1: unique_imei(),
            tenure: 12,
            paid_emis: 0,
            next_due_date: Utc::now().date_naive() + Duration::days(30),
        }
    }

    pub fn with_plan(mut self, tenure: i32, paid_emis: i32) -> Self {
        self.tenure = tenure;
        self.paid_emis = paid_emis;
        self
    }

    pub fn due_on(mut self, date: NaiveDate) -> Self {
        self.next_due_date = date;
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "customerName": self.customer_name,
            "mobileNo": "9876543210",
            "aadharNo": "1234 5678 9012",
            "address": "42 MG Road, Pune",
            "imei1": self.imei1,
            "deviceModel": "Galaxy A15",
            "emiDetails": {
                "financeName": "Acme Finance",
                "financePhone": "9123456780",
                "totalAmount": 18000.0,
                "emiAmount": 1500.0,
                "tenure": self.tenure,
                "paidEmis": self.paid_emis,
                "nextDueDate": self.next_due_date
            }
        })
    }
}

impl Default for TestDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Payment payload with the given transaction id.
pub fn payment_json(transaction_id: &str) -> Value {
    json!({
        "payment": {
            "amount": 1500.0,
            "paidDate": Utc::now().date_naive(),
            "transactionId": transaction_id,
            "paymentMethod": "upi",
            "recordedBy": "admin"
        }
    })
}

/// Build a JSON request.
pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a request without a body.
pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Helper to parse JSON response body.
pub async fn parse_response_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

/// Register a device via the API and return the response body.
pub async fn register_test_device(app: &Router, device: &TestDevice) -> Value {
    use tower::ServiceExt;

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/devices", device.to_json()))
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        axum::http::StatusCode::CREATED,
        "device registration failed"
    );
    parse_response_body(response).await
}
