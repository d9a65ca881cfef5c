use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    InEscrow,
    Released,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InEscrow,
    Released,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "payment_gateway", rename_all = "snake_case")]
pub enum PaymentGateway {
    Stripe,
    Paypal,
}

impl PaymentGateway {
    pub fn to_str(&self) -> &str {
        match self {
            PaymentGateway::Stripe => "stripe",
            PaymentGateway::Paypal => "paypal",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "quote_status", rename_all = "snake_case")]
pub enum QuoteStatus {
    Submitted,
    Accepted,
    Rejected,
}

/// Single lifecycle view over the (status, payment_status) pair stored
/// on jobs. Transitions are validated here; the two legacy-shaped
/// columns are only a projection at the persistence boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EscrowState {
    None,
    ChargePending,
    InEscrow,
    Released,
    Refunded,
    Failed,
}

impl EscrowState {
    pub fn is_valid_transition(&self, to: &EscrowState) -> bool {
        match (self, to) {
            (EscrowState::None, EscrowState::ChargePending) => true,
            (EscrowState::ChargePending, EscrowState::InEscrow) => true,
            (EscrowState::ChargePending, EscrowState::Failed) => true,
            // Failed charges reset the job to hireable
            (EscrowState::Failed, EscrowState::ChargePending) => true,
            (EscrowState::InEscrow, EscrowState::Released) => true,
            (EscrowState::InEscrow, EscrowState::Refunded) => true,
            _ => false,
        }
    }

    /// Project the tagged state into the two legacy job columns.
    pub fn project(&self) -> (JobStatus, PaymentStatus) {
        match self {
            EscrowState::None => (JobStatus::Active, PaymentStatus::Pending),
            EscrowState::ChargePending => (JobStatus::Active, PaymentStatus::Pending),
            EscrowState::InEscrow => (JobStatus::InProgress, PaymentStatus::InEscrow),
            EscrowState::Released => (JobStatus::Completed, PaymentStatus::Released),
            EscrowState::Refunded => (JobStatus::Completed, PaymentStatus::Refunded),
            EscrowState::Failed => (JobStatus::Active, PaymentStatus::Pending),
        }
    }

    /// Reconstruct the lifecycle view from a persisted job row.
    pub fn from_job(job: &Job) -> EscrowState {
        match (job.status, job.payment_status) {
            (JobStatus::InProgress, PaymentStatus::InEscrow) => EscrowState::InEscrow,
            (JobStatus::Completed, PaymentStatus::Released) => EscrowState::Released,
            (JobStatus::Completed, PaymentStatus::Refunded) => EscrowState::Refunded,
            (JobStatus::Active, _) if job.hired_provider_id.is_some() => EscrowState::ChargePending,
            _ => EscrowState::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub status: JobStatus,
    pub payment_status: PaymentStatus,
    pub hired_provider_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub escrow_end_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quote {
    pub id: Uuid,
    pub job_id: Uuid,
    pub provider_id: Uuid,
    pub amount: BigDecimal,
    pub message: Option<String>,
    pub status: QuoteStatus,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub job_id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub gateway: PaymentGateway,
    pub external_payment_id: String,
    pub amount_cents: i64,
    pub service_fee_cents: i64,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Provider's share once released. The fee is carved out of the
    /// charged amount, frozen at charge time.
    pub fn provider_amount_cents(&self) -> i64 {
        self.amount_cents - self.service_fee_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(EscrowState::None.is_valid_transition(&EscrowState::ChargePending));
        assert!(EscrowState::ChargePending.is_valid_transition(&EscrowState::InEscrow));
        assert!(EscrowState::InEscrow.is_valid_transition(&EscrowState::Released));
    }

    #[test]
    fn failure_and_refund_paths_are_legal() {
        assert!(EscrowState::ChargePending.is_valid_transition(&EscrowState::Failed));
        assert!(EscrowState::Failed.is_valid_transition(&EscrowState::ChargePending));
        assert!(EscrowState::InEscrow.is_valid_transition(&EscrowState::Refunded));
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        for to in [
            EscrowState::None,
            EscrowState::ChargePending,
            EscrowState::InEscrow,
            EscrowState::Refunded,
        ] {
            assert!(!EscrowState::Released.is_valid_transition(&to));
            assert!(!EscrowState::Refunded.is_valid_transition(&to));
        }
    }

    #[test]
    fn states_cannot_revisit_pending_once_escrowed() {
        assert!(!EscrowState::InEscrow.is_valid_transition(&EscrowState::ChargePending));
        assert!(!EscrowState::Released.is_valid_transition(&EscrowState::InEscrow));
    }

    #[test]
    fn projection_keeps_legacy_columns_cross_consistent() {
        assert_eq!(
            EscrowState::InEscrow.project(),
            (JobStatus::InProgress, PaymentStatus::InEscrow)
        );
        assert_eq!(
            EscrowState::Released.project(),
            (JobStatus::Completed, PaymentStatus::Released)
        );
        assert_eq!(
            EscrowState::Refunded.project(),
            (JobStatus::Completed, PaymentStatus::Refunded)
        );
        // Failed charges leave the job hireable again
        assert_eq!(
            EscrowState::Failed.project(),
            (JobStatus::Active, PaymentStatus::Pending)
        );
    }

    #[test]
    fn provider_amount_is_amount_minus_frozen_fee() {
        let tx = Transaction {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            provider_id: None,
            gateway: PaymentGateway::Stripe,
            external_payment_id: "pi_test".to_string(),
            amount_cents: 10_000,
            service_fee_cents: 1_000,
            status: TransactionStatus::InEscrow,
            failure_reason: None,
            created_at: None,
            released_at: None,
        };
        assert_eq!(tx.provider_amount_cents(), 9_000);
    }
}
