// service/webhook_reconciler.rs
//
// Consumes signed gateway events and replays them through the escrow
// state machine. Deliveries may be duplicated, delayed or out of
// order; every entry point re-checks the transaction's current status
// under the same guard the synchronous paths use, so no separate
// dedup store is needed. Signature mismatches fail closed with no
// state mutation.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{
    config::Config,
    db::{db::DBClient, escrowdb::EscrowExt},
    models::jobmodel::{PaymentGateway, Transaction},
    service::{
        error::ServiceError, escrow_service::EscrowService, release_scheduler::ReleaseScheduler,
    },
};

/// Tolerated skew between the signed timestamp and our clock.
const STRIPE_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// What a gateway event means to the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EscrowAction {
    /// Funds confirmed; move the transaction into escrow.
    Confirm,
    /// Buyer approved a two-phase order; capture then confirm.
    Capture,
    /// Charge declined or capture denied.
    Fail,
    /// Terminal or irrelevant event; acknowledge and do nothing.
    Ignore,
}

pub fn map_stripe_event(event_type: &str) -> EscrowAction {
    match event_type {
        "payment_intent.succeeded" => EscrowAction::Confirm,
        "payment_intent.payment_failed" | "payment_intent.canceled" => EscrowAction::Fail,
        _ => EscrowAction::Ignore,
    }
}

pub fn map_paypal_event(event_type: &str) -> EscrowAction {
    match event_type {
        "CHECKOUT.ORDER.APPROVED" => EscrowAction::Capture,
        "PAYMENT.CAPTURE.COMPLETED" => EscrowAction::Confirm,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => EscrowAction::Fail,
        _ => EscrowAction::Ignore,
    }
}

/// Verify a Stripe-style signature header ("t=...,v1=...") against the
/// raw request body. Constant-time comparison, bounded timestamp skew.
pub fn verify_stripe_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.trim().parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ServiceError::SignatureVerificationFailed)?;
    if signatures.is_empty() {
        return Err(ServiceError::SignatureVerificationFailed);
    }

    if (now.timestamp() - timestamp).abs() > STRIPE_TIMESTAMP_TOLERANCE_SECS {
        return Err(ServiceError::SignatureVerificationFailed);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::SignatureVerificationFailed)?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures.iter().any(|candidate| {
        bool::from(ConstantTimeEq::ct_eq(
            candidate.as_bytes(),
            expected.as_bytes(),
        ))
    });

    if matched {
        Ok(())
    } else {
        Err(ServiceError::SignatureVerificationFailed)
    }
}

pub struct WebhookReconciler {
    db_client: Arc<DBClient>,
    escrow_service: Arc<EscrowService>,
    scheduler: Arc<ReleaseScheduler>,
    stripe_webhook_secret: String,
    paypal_client_id: String,
    paypal_secret_key: String,
    paypal_webhook_id: String,
    paypal_api_url: String,
    client: reqwest::Client,
}

impl WebhookReconciler {
    pub fn new(
        db_client: Arc<DBClient>,
        escrow_service: Arc<EscrowService>,
        scheduler: Arc<ReleaseScheduler>,
        config: &Config,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            db_client,
            escrow_service,
            scheduler,
            stripe_webhook_secret: config.stripe_webhook_secret.clone(),
            paypal_client_id: config.paypal_client_id.clone(),
            paypal_secret_key: config.paypal_secret_key.clone(),
            paypal_webhook_id: config.paypal_webhook_id.clone(),
            paypal_api_url: config.paypal_api_url.clone(),
            client,
        }
    }

    /// Handle a raw Stripe delivery. Returns Ok for every outcome the
    /// gateway should not retry, including business-level no-ops.
    pub async fn process_stripe_event(
        &self,
        raw_body: &str,
        signature_header: &str,
    ) -> Result<(), ServiceError> {
        verify_stripe_signature(
            raw_body,
            signature_header,
            &self.stripe_webhook_secret,
            Utc::now(),
        )?;

        let event: serde_json::Value = serde_json::from_str(raw_body)
            .map_err(|e| ServiceError::Validation(format!("Malformed webhook payload: {}", e)))?;

        let event_type = event["type"].as_str().unwrap_or_default().to_string();
        let action = map_stripe_event(&event_type);

        if action == EscrowAction::Ignore {
            tracing::info!("Ignoring Stripe webhook event: {}", event_type);
            return Ok(());
        }

        let payment_intent_id = event["data"]["object"]["id"]
            .as_str()
            .ok_or_else(|| ServiceError::Validation("Missing payment id in event".to_string()))?;

        let failure_reason = event["data"]["object"]["last_payment_error"]["message"]
            .as_str()
            .unwrap_or("Charge failed at gateway")
            .to_string();

        let Some(transaction) = self
            .find_transaction(PaymentGateway::Stripe, payment_intent_id)
            .await?
        else {
            return Ok(());
        };

        self.apply(action, &transaction, &failure_reason, &event_type)
            .await
    }

    /// Handle a raw PayPal delivery, verified against PayPal's
    /// verify-webhook-signature endpoint before any mutation.
    pub async fn process_paypal_event(
        &self,
        raw_body: &str,
        transmission_id: &str,
        transmission_time: &str,
        transmission_sig: &str,
        cert_url: &str,
        auth_algo: &str,
    ) -> Result<(), ServiceError> {
        let event: serde_json::Value = serde_json::from_str(raw_body)
            .map_err(|e| ServiceError::Validation(format!("Malformed webhook payload: {}", e)))?;

        self.verify_paypal_signature(
            &event,
            transmission_id,
            transmission_time,
            transmission_sig,
            cert_url,
            auth_algo,
        )
        .await?;

        let event_type = event["event_type"].as_str().unwrap_or_default().to_string();
        let action = map_paypal_event(&event_type);

        if action == EscrowAction::Ignore {
            tracing::info!("Ignoring PayPal webhook event: {}", event_type);
            return Ok(());
        }

        // Capture events reference the order through supplementary
        // data; approval events carry the order id directly.
        let order_id = event["resource"]["supplementary_data"]["related_ids"]["order_id"]
            .as_str()
            .or_else(|| event["resource"]["id"].as_str())
            .ok_or_else(|| ServiceError::Validation("Missing order id in event".to_string()))?;

        let failure_reason = event["resource"]["status_details"]["reason"]
            .as_str()
            .unwrap_or("Capture denied at gateway")
            .to_string();

        let Some(transaction) = self
            .find_transaction(PaymentGateway::Paypal, order_id)
            .await?
        else {
            return Ok(());
        };

        self.apply(action, &transaction, &failure_reason, &event_type)
            .await
    }

    /// Deliveries for payments we have no record of are acknowledged,
    /// not rejected: the gateway only cares that the HTTP exchange
    /// succeeded, and retrying a permanently unknown id forever helps
    /// nobody.
    async fn find_transaction(
        &self,
        gateway: PaymentGateway,
        external_payment_id: &str,
    ) -> Result<Option<Transaction>, ServiceError> {
        let transaction = self
            .db_client
            .get_transaction_by_external_id(gateway, external_payment_id)
            .await?;

        if transaction.is_none() {
            tracing::warn!(
                "Webhook referenced unknown {} payment {}; acknowledging",
                gateway.to_str(),
                external_payment_id
            );
        }

        Ok(transaction)
    }

    async fn apply(
        &self,
        action: EscrowAction,
        transaction: &Transaction,
        failure_reason: &str,
        event_type: &str,
    ) -> Result<(), ServiceError> {
        let outcome = match action {
            EscrowAction::Confirm => self
                .escrow_service
                .confirm_charge(transaction.id)
                .await
                .map(|(_, job)| Some(job)),
            EscrowAction::Capture => self
                .escrow_service
                .capture_payment(transaction.id)
                .await
                .map(|(_, job)| Some(job)),
            EscrowAction::Fail => self
                .escrow_service
                .fail_charge(transaction.id, failure_reason)
                .await
                .map(|_| None),
            EscrowAction::Ignore => Ok(None),
        };

        match outcome {
            Ok(Some(job)) => {
                if let Some(fire_at) = job.escrow_end_date {
                    self.scheduler.arm(job.id, fire_at);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            // Duplicate or out-of-order delivery: the state machine
            // already holds the target state. Acknowledge it.
            Err(ServiceError::AlreadyProcessed) => {
                tracing::info!(
                    "Webhook {} for transaction {} already processed",
                    event_type,
                    transaction.id
                );
                Ok(())
            }
            // Business-level rejection (e.g. the job was cancelled
            // while the charge was in flight). The state machine has
            // settled the matter; retrying the delivery cannot change
            // the outcome, so acknowledge it.
            Err(ServiceError::InvalidTransition(reason)) => {
                tracing::warn!(
                    "Webhook {} for transaction {} rejected: {}",
                    event_type,
                    transaction.id,
                    reason
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn verify_paypal_signature(
        &self,
        event: &serde_json::Value,
        transmission_id: &str,
        transmission_time: &str,
        transmission_sig: &str,
        cert_url: &str,
        auth_algo: &str,
    ) -> Result<(), ServiceError> {
        let token_response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.paypal_api_url))
            .basic_auth(&self.paypal_client_id, Some(&self.paypal_secret_key))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        let token_body: serde_json::Value = token_response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        let access_token = token_body["access_token"]
            .as_str()
            .ok_or_else(|| ServiceError::Gateway("No PayPal access token".to_string()))?;

        let payload = serde_json::json!({
            "transmission_id": transmission_id,
            "transmission_time": transmission_time,
            "transmission_sig": transmission_sig,
            "cert_url": cert_url,
            "auth_algo": auth_algo,
            "webhook_id": self.paypal_webhook_id,
            "webhook_event": event,
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.paypal_api_url
            ))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(e.to_string()))?;

        if body["verification_status"].as_str() == Some("SUCCESS") {
            Ok(())
        } else {
            tracing::warn!("PayPal webhook signature verification failed");
            Err(ServiceError::SignatureVerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_stripe_signature_passes() {
        let now = Utc::now();
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(payload, now.timestamp(), "whsec_test");

        assert!(verify_stripe_signature(payload, &header, "whsec_test", now).is_ok());
    }

    #[test]
    fn tampered_payload_fails_closed() {
        let now = Utc::now();
        let header = sign(r#"{"amount":100}"#, now.timestamp(), "whsec_test");

        let result = verify_stripe_signature(r#"{"amount":999}"#, &header, "whsec_test", now);
        assert!(matches!(
            result,
            Err(ServiceError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn wrong_secret_fails_closed() {
        let now = Utc::now();
        let payload = r#"{"type":"payment_intent.succeeded"}"#;
        let header = sign(payload, now.timestamp(), "whsec_other");

        assert!(verify_stripe_signature(payload, &header, "whsec_test", now).is_err());
    }

    #[test]
    fn stale_timestamp_fails_closed() {
        let now = Utc::now();
        let payload = r#"{}"#;
        let header = sign(payload, now.timestamp() - 600, "whsec_test");

        assert!(verify_stripe_signature(payload, &header, "whsec_test", now).is_err());
    }

    #[test]
    fn missing_header_parts_fail_closed() {
        let now = Utc::now();
        assert!(verify_stripe_signature("{}", "v1=abc", "whsec_test", now).is_err());
        assert!(verify_stripe_signature("{}", "t=123", "whsec_test", now).is_err());
        assert!(verify_stripe_signature("{}", "", "whsec_test", now).is_err());
    }

    #[test]
    fn stripe_events_map_to_state_machine_entry_points() {
        assert_eq!(
            map_stripe_event("payment_intent.succeeded"),
            EscrowAction::Confirm
        );
        assert_eq!(
            map_stripe_event("payment_intent.payment_failed"),
            EscrowAction::Fail
        );
        assert_eq!(map_stripe_event("charge.updated"), EscrowAction::Ignore);
    }

    #[test]
    fn paypal_events_map_to_state_machine_entry_points() {
        assert_eq!(
            map_paypal_event("CHECKOUT.ORDER.APPROVED"),
            EscrowAction::Capture
        );
        assert_eq!(
            map_paypal_event("PAYMENT.CAPTURE.COMPLETED"),
            EscrowAction::Confirm
        );
        assert_eq!(
            map_paypal_event("PAYMENT.CAPTURE.DENIED"),
            EscrowAction::Fail
        );
        assert_eq!(
            map_paypal_event("BILLING.SUBSCRIPTION.CREATED"),
            EscrowAction::Ignore
        );
    }
}
