use std::sync::Arc;

use axum::{http::HeaderMap, response::IntoResponse, Extension, Json};

use crate::{error::HttpError, AppState};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, HttpError> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| HttpError::bad_request(format!("Missing {} header", name)))
}

// Stripe signs the raw body, so this handler must see the exact bytes
// that came over the wire, not a re-serialized Json value.
pub async fn stripe_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HttpError> {
    let signature = header(&headers, "stripe-signature")?;

    app_state
        .webhook_reconciler
        .process_stripe_event(&body, signature)
        .await?;

    Ok(Json(serde_json::json!({"status": "success"})))
}

pub async fn paypal_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HttpError> {
    let transmission_id = header(&headers, "paypal-transmission-id")?;
    let transmission_time = header(&headers, "paypal-transmission-time")?;
    let transmission_sig = header(&headers, "paypal-transmission-sig")?;
    let cert_url = header(&headers, "paypal-cert-url")?;
    let auth_algo = header(&headers, "paypal-auth-algo")?;

    app_state
        .webhook_reconciler
        .process_paypal_event(
            &body,
            transmission_id,
            transmission_time,
            transmission_sig,
            cert_url,
            auth_algo,
        )
        .await?;

    Ok(Json(serde_json::json!({"status": "success"})))
}
