// config.rs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub app_url: String,
    pub jwt_secret: String,
    pub port: u16,
    // Payment gateway configurations
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub paypal_client_id: String,
    pub paypal_secret_key: String,
    pub paypal_webhook_id: String,
    pub paypal_api_url: String,
    // Escrow tunables. escrow_period is read at charge-confirmation time
    // and frozen into the job's escrow_end_date; changing it later does
    // not affect in-flight escrows.
    pub escrow_period_days: i64,
    pub service_fee_percent: f64,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");
        let app_url = std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8000);

        // Payment gateway configurations (with test defaults)
        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY")
            .unwrap_or_else(|_| "sk_test_secret_key".to_string());
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .unwrap_or_else(|_| "whsec_test_secret".to_string());
        let paypal_client_id = std::env::var("PAYPAL_CLIENT_ID")
            .unwrap_or_else(|_| "test_client_id".to_string());
        let paypal_secret_key = std::env::var("PAYPAL_SECRET_KEY")
            .unwrap_or_else(|_| "test_secret_key".to_string());
        let paypal_webhook_id = std::env::var("PAYPAL_WEBHOOK_ID")
            .unwrap_or_else(|_| "test_webhook_id".to_string());
        let paypal_api_url = std::env::var("PAYPAL_API_URL")
            .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string());

        let escrow_period_days = std::env::var("ESCROW_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(7);
        let service_fee_percent = std::env::var("SERVICE_FEE_PERCENT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(10.0);

        Config {
            database_url,
            app_url,
            jwt_secret,
            port,
            stripe_secret_key,
            stripe_webhook_secret,
            paypal_client_id,
            paypal_secret_key,
            paypal_webhook_id,
            paypal_api_url,
            escrow_period_days,
            service_fee_percent,
        }
    }
}
