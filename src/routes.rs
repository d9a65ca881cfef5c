use std::sync::Arc;

use axum::{middleware, routing::get, routing::post, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{
        jobs::{jobs_handler, provider_handler},
        webhooks::{paypal_webhook, stripe_webhook},
    },
    middleware::auth,
    AppState,
};

// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Webhook routes are public: the gateways authenticate themselves
    // through signatures, not through user tokens.
    let webhook_routes = Router::new()
        .route("/stripe", post(stripe_webhook))
        .route("/paypal", post(paypal_webhook));

    let api_route = Router::new()
        .nest("/jobs", jobs_handler().layer(middleware::from_fn(auth)))
        .nest("/provider", provider_handler().layer(middleware::from_fn(auth)))
        .nest("/webhooks", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
}
