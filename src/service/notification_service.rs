// service/notification_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{db::db::DBClient, service::error::ServiceError};

/// Domain events the escrow engine emits. Delivery (email, push,
/// in-app) is somebody else's problem; we log and persist the event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomainEvent {
    ChargeSucceeded,
    Hired,
    JobCompleted,
    PaymentReleased,
    ChargeFailed,
}

impl DomainEvent {
    pub fn to_str(&self) -> &str {
        match self {
            DomainEvent::ChargeSucceeded => "charge_succeeded",
            DomainEvent::Hired => "hired",
            DomainEvent::JobCompleted => "job_completed",
            DomainEvent::PaymentReleased => "payment_released",
            DomainEvent::ChargeFailed => "charge_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }

    pub async fn emit(
        &self,
        event: DomainEvent,
        user_id: Uuid,
        job_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), ServiceError> {
        tracing::info!(
            "Domain event {} for user {} on job {}",
            event.to_str(),
            user_id,
            job_id
        );

        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, event_type, job_id, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(event.to_str())
        .bind(job_id)
        .bind(payload)
        .execute(&self.db_client.pool)
        .await
        .map_err(|e| ServiceError::Notification(e.to_string()))?;

        Ok(())
    }

    /// Notification failures never abort a money transition; they are
    /// logged and dropped.
    pub async fn emit_best_effort(
        &self,
        event: DomainEvent,
        user_id: Uuid,
        job_id: Uuid,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self.emit(event, user_id, job_id, payload).await {
            tracing::warn!("Failed to store {} notification: {}", event.to_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_published_contract() {
        assert_eq!(DomainEvent::ChargeSucceeded.to_str(), "charge_succeeded");
        assert_eq!(DomainEvent::Hired.to_str(), "hired");
        assert_eq!(DomainEvent::JobCompleted.to_str(), "job_completed");
        assert_eq!(DomainEvent::PaymentReleased.to_str(), "payment_released");
        assert_eq!(DomainEvent::ChargeFailed.to_str(), "charge_failed");
    }
}
