mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use config::Config;
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use crate::db::db::DBClient;
use service::{
    escrow_service::EscrowService, notification_service::NotificationService,
    payment_gateway::PaymentGatewayService, release_scheduler::ReleaseScheduler,
    webhook_reconciler::WebhookReconciler,
};

/// Backstop poll for due escrow releases. Armed timers usually fire
/// first; the poll picks up whatever they miss.
const RELEASE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub escrow_service: Arc<EscrowService>,
    pub notification_service: Arc<NotificationService>,
    pub release_scheduler: Arc<ReleaseScheduler>,
    pub webhook_reconciler: Arc<WebhookReconciler>,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config) -> Self {
        let db_client_arc = Arc::new(db_client);

        let notification_service = Arc::new(NotificationService::new(db_client_arc.clone()));
        let gateway = Arc::new(PaymentGatewayService::new(&config));

        let escrow_service = Arc::new(EscrowService::new(
            db_client_arc.clone(),
            gateway,
            notification_service.clone(),
            config.escrow_period_days,
            config.service_fee_percent,
        ));

        let release_scheduler = Arc::new(ReleaseScheduler::new(
            db_client_arc.clone(),
            escrow_service.clone(),
        ));

        let webhook_reconciler = Arc::new(WebhookReconciler::new(
            db_client_arc.clone(),
            escrow_service.clone(),
            release_scheduler.clone(),
            &config,
        ));

        Self {
            env: config,
            db_client: db_client_arc,
            escrow_service,
            notification_service,
            release_scheduler,
            webhook_reconciler,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    dotenv().ok();

    let config = Config::init();

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!("Connection to the database is successful");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    let db_client = DBClient::new(pool);

    let allowed_origins = vec![config
        .app_url
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"))];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);

    let app_state = Arc::new(AppState::new(db_client, config.clone()));

    // Restore release obligations lost with the previous process before
    // accepting traffic; overdue escrows are released on the spot.
    if let Err(e) = app_state.release_scheduler.reconcile_on_startup().await {
        tracing::error!("Startup escrow reconciliation failed: {}", e);
    }

    let scheduler = app_state.release_scheduler.clone();
    tokio::spawn(async move {
        scheduler.run(RELEASE_POLL_INTERVAL).await;
    });

    let app = create_router(app_state.clone()).layer(cors);

    tracing::info!("Server is running on http://localhost:{}", config.port);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", &config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind port {}: {:?}", config.port, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {:?}", err);
    }
}
