use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::jobmodel::*,
    utils::currency::{cents_to_dollars, decimal_to_cents},
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct HireProviderDto {
    pub provider_id: Uuid,

    pub payment_gateway: PaymentGateway,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RefundTransactionDto {
    pub transaction_id: Uuid,

    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponseDto {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub status: JobStatus,
    pub payment_status: PaymentStatus,
    pub hired_provider_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub escrow_end_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponseDto {
    pub id: Uuid,
    pub job_id: Uuid,
    pub gateway: PaymentGateway,
    pub amount: f64,
    pub service_fee: f64,
    pub provider_amount: f64,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HireResponseDto {
    pub job: JobResponseDto,
    pub transaction: TransactionResponseDto,
    /// Card flow: the client secret the frontend confirms with.
    /// Wallet flow: the approval URL to redirect the customer to.
    pub payment_action: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderEarningsDto {
    pub available_balance: f64,
    pub total_earnings: f64,
    pub released_transactions: Vec<TransactionResponseDto>,
}

// Response wrappers
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

// Conversion helpers
impl From<Job> for JobResponseDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            customer_id: job.customer_id,
            title: job.title,
            description: job.description,
            price: cents_to_dollars(decimal_to_cents(&job.price)),
            status: job.status,
            payment_status: job.payment_status,
            hired_provider_id: job.hired_provider_id,
            transaction_id: job.transaction_id,
            escrow_end_date: job.escrow_end_date,
            completed_at: job.completed_at,
            created_at: job.created_at,
        }
    }
}

impl From<Transaction> for TransactionResponseDto {
    fn from(tx: Transaction) -> Self {
        let provider_amount = tx.provider_amount_cents();
        Self {
            id: tx.id,
            job_id: tx.job_id,
            gateway: tx.gateway,
            amount: cents_to_dollars(tx.amount_cents),
            service_fee: cents_to_dollars(tx.service_fee_cents),
            provider_amount: cents_to_dollars(provider_amount),
            status: tx.status,
            failure_reason: tx.failure_reason,
            created_at: tx.created_at,
            released_at: tx.released_at,
        }
    }
}
