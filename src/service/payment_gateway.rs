// service/payment_gateway.rs
//
// Normalizes the card-style gateway (Stripe, synchronous client-secret
// flow) and the wallet-style gateway (PayPal, two-phase order create /
// capture) into one result shape. The adapter never touches the
// ledger; callers persist transactions from the returned data. Every
// failure mode (network, timeout, decline, malformed response) folds
// into success=false with a readable reason.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::Config, models::jobmodel::PaymentGateway};

type GatewayResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub gateway: PaymentGateway,
    pub amount_cents: i64,
    pub job_id: Uuid,
    pub customer_id: Uuid,
    pub customer_email: String,
    pub description: String,
    /// Internal reference, also sent as the idempotency key so a
    /// network-level retry cannot double-charge.
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub success: bool,
    pub external_payment_id: Option<String>,
    /// Stripe: the PaymentIntent client secret. PayPal: the approval
    /// redirect URL. The API layer hands this to the frontend.
    pub redirect_or_client_secret: Option<String>,
    pub error_message: Option<String>,
}

impl ChargeResult {
    fn failure(message: impl Into<String>) -> Self {
        ChargeResult {
            success: false,
            external_payment_id: None,
            redirect_or_client_secret: None,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    pub success: bool,
    pub captured_amount_cents: i64,
    pub error_message: Option<String>,
}

impl CaptureResult {
    fn failure(message: impl Into<String>) -> Self {
        CaptureResult {
            success: false,
            captured_amount_cents: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Render cents as the "123.45" decimal string PayPal's API expects.
pub fn cents_to_amount_string(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

pub struct PaymentGatewayService {
    stripe_secret_key: String,
    paypal_client_id: String,
    paypal_secret_key: String,
    paypal_api_url: String,
    client: reqwest::Client,
}

impl PaymentGatewayService {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            stripe_secret_key: config.stripe_secret_key.clone(),
            paypal_client_id: config.paypal_client_id.clone(),
            paypal_secret_key: config.paypal_secret_key.clone(),
            paypal_api_url: config.paypal_api_url.clone(),
            client,
        }
    }

    pub async fn charge(&self, request: &ChargeRequest) -> ChargeResult {
        if request.amount_cents <= 0 {
            return ChargeResult::failure("Charge amount must be positive");
        }

        let outcome = match request.gateway {
            PaymentGateway::Stripe => self.stripe_create_payment_intent(request).await,
            PaymentGateway::Paypal => self.paypal_create_order(request).await,
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    "Gateway charge failed for job {} via {}: {}",
                    request.job_id,
                    request.gateway.to_str(),
                    e
                );
                ChargeResult::failure(e.to_string())
            }
        }
    }

    pub async fn capture(
        &self,
        gateway: PaymentGateway,
        external_payment_id: &str,
    ) -> CaptureResult {
        let outcome = match gateway {
            PaymentGateway::Stripe => self.stripe_capture(external_payment_id).await,
            PaymentGateway::Paypal => self.paypal_capture_order(external_payment_id).await,
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    "Gateway capture failed for {} via {}: {}",
                    external_payment_id,
                    gateway.to_str(),
                    e
                );
                CaptureResult::failure(e.to_string())
            }
        }
    }

    // Stripe: create a PaymentIntent; the frontend confirms it with the
    // returned client secret and the charge completes synchronously.
    async fn stripe_create_payment_intent(
        &self,
        request: &ChargeRequest,
    ) -> GatewayResult<ChargeResult> {
        let amount = request.amount_cents.to_string();
        let job_id = request.job_id.to_string();
        let customer_id = request.customer_id.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", "usd"),
            ("description", request.description.as_str()),
            ("metadata[job_id]", job_id.as_str()),
            ("metadata[customer_id]", customer_id.as_str()),
            ("metadata[reference]", request.reference.as_str()),
        ];

        let response = self
            .client
            .post("https://api.stripe.com/v1/payment_intents")
            .basic_auth(&self.stripe_secret_key, None::<&str>)
            .header("Idempotency-Key", &request.reference)
            .form(&params)
            .send()
            .await?;

        let response_body: serde_json::Value = response.json().await?;

        if let Some(error) = response_body.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("Charge declined by gateway");
            return Ok(ChargeResult::failure(message));
        }

        Ok(ChargeResult {
            success: true,
            external_payment_id: response_body["id"].as_str().map(|s| s.to_string()),
            redirect_or_client_secret: response_body["client_secret"]
                .as_str()
                .map(|s| s.to_string()),
            error_message: None,
        })
    }

    async fn stripe_capture(&self, payment_intent_id: &str) -> GatewayResult<CaptureResult> {
        let url = format!(
            "https://api.stripe.com/v1/payment_intents/{}/capture",
            payment_intent_id
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.stripe_secret_key, None::<&str>)
            .send()
            .await?;

        let response_body: serde_json::Value = response.json().await?;

        if let Some(error) = response_body.get("error") {
            let message = error["message"].as_str().unwrap_or("Capture failed");
            return Ok(CaptureResult::failure(message));
        }

        Ok(CaptureResult {
            success: response_body["status"].as_str() == Some("succeeded"),
            captured_amount_cents: response_body["amount_received"].as_i64().unwrap_or(0),
            error_message: None,
        })
    }

    // PayPal: two-phase. Order creation returns an approval URL; funds
    // move only on the later capture round trip.
    async fn paypal_create_order(&self, request: &ChargeRequest) -> GatewayResult<ChargeResult> {
        let access_token = self.paypal_access_token().await?;

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.job_id.to_string(),
                "custom_id": request.reference,
                "description": request.description,
                "amount": {
                    "currency_code": "USD",
                    "value": cents_to_amount_string(request.amount_cents),
                }
            }]
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.paypal_api_url))
            .bearer_auth(&access_token)
            .header("PayPal-Request-Id", &request.reference)
            .json(&payload)
            .send()
            .await?;

        let response_body: serde_json::Value = response.json().await?;

        let Some(order_id) = response_body["id"].as_str() else {
            let message = response_body["message"]
                .as_str()
                .unwrap_or("Order creation failed");
            return Ok(ChargeResult::failure(message));
        };

        let approve_url = response_body["links"]
            .as_array()
            .and_then(|links| {
                links
                    .iter()
                    .find(|l| l["rel"].as_str() == Some("approve"))
                    .and_then(|l| l["href"].as_str())
            })
            .map(|s| s.to_string());

        Ok(ChargeResult {
            success: true,
            external_payment_id: Some(order_id.to_string()),
            redirect_or_client_secret: approve_url,
            error_message: None,
        })
    }

    async fn paypal_capture_order(&self, order_id: &str) -> GatewayResult<CaptureResult> {
        let access_token = self.paypal_access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.paypal_api_url, order_id
            ))
            .bearer_auth(&access_token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let response_body: serde_json::Value = response.json().await?;

        if response_body["status"].as_str() != Some("COMPLETED") {
            let message = response_body["message"].as_str().unwrap_or("Capture denied");
            return Ok(CaptureResult::failure(message));
        }

        let captured = response_body["purchase_units"][0]["payments"]["captures"][0]["amount"]
            ["value"]
            .as_str()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| (v * 100.0).round() as i64)
            .unwrap_or(0);

        Ok(CaptureResult {
            success: true,
            captured_amount_cents: captured,
            error_message: None,
        })
    }

    async fn paypal_access_token(&self) -> GatewayResult<String> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.paypal_api_url))
            .basic_auth(&self.paypal_client_id, Some(&self.paypal_secret_key))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let response_body: serde_json::Value = response.json().await?;

        response_body["access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "Failed to obtain PayPal access token".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_string_formats_cents_as_decimal() {
        assert_eq!(cents_to_amount_string(10000), "100.00");
        assert_eq!(cents_to_amount_string(9005), "90.05");
        assert_eq!(cents_to_amount_string(50), "0.50");
    }

    #[test]
    fn non_positive_amounts_are_rejected_as_failure() {
        let result = ChargeResult::failure("Charge amount must be positive");
        assert!(!result.success);
        assert!(result.external_payment_id.is_none());
        assert!(result.error_message.is_some());
    }
}
