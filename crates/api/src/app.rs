use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use domain::services::DeviceStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{devices, health};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DeviceStore>,
    pub config: Arc<Config>,
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_app(config: Config, store: Arc<dyn DeviceStore>) -> Router {
    let config = Arc::new(config);
    let cors = cors_layer(&config);
    let state = AppState {
        store,
        config: config.clone(),
    };

    let device_routes = Router::new()
        .route(
            "/api/devices",
            get(devices::list_devices)
                .post(devices::create_device)
                .delete(devices::delete_all_devices),
        )
        .route(
            "/api/devices/:id",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/api/devices/:id/location", put(devices::update_location))
        .route("/api/devices/:id/telemetry", put(devices::update_telemetry))
        .route(
            "/api/devices/:id/features/:feature",
            put(devices::set_feature_lock),
        )
        .route("/api/devices/:id/payment", post(devices::record_payment))
        .route("/api/devices/:id/lock", post(devices::lock_device))
        .route("/api/devices/:id/unlock", post(devices::unlock_device))
        .route("/api/devices/:id/wipe", post(devices::request_wipe))
        .route("/api/devices/:id/release", post(devices::request_release))
        .route(
            "/api/devices/:id/tracking/start",
            post(devices::start_tracking),
        )
        .route("/api/devices/:id/tracking/stop", post(devices::stop_tracking));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(device_routes)
        // Runs after routing so the matched path template is available
        .route_layer(middleware::from_fn(metrics_middleware))
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
