// service/escrow_service.rs
//
// The escrow lifecycle engine. All money transitions funnel through
// here: synchronous hire/complete actions, webhook reconciliation and
// scheduler fires all end up in the same guarded primitives, so the
// release computation exists exactly once.
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{db::DBClient, escrowdb::EscrowExt, jobdb::JobExt},
    models::{
        jobmodel::*,
        usermodel::{User, UserRole},
    },
    service::{
        error::ServiceError,
        notification_service::{DomainEvent, NotificationService},
        payment_gateway::{ChargeRequest, PaymentGatewayService},
    },
    utils::{currency, reference::generate_payment_reference},
};

#[derive(Debug, Serialize)]
pub struct HireOutcome {
    pub job: Job,
    pub transaction: Transaction,
    /// Client secret (card flow) or approval URL (wallet flow) for the
    /// frontend to finish the payment.
    pub redirect_or_client_secret: Option<String>,
}

#[derive(Clone)]
pub struct EscrowService {
    db_client: Arc<DBClient>,
    gateway: Arc<PaymentGatewayService>,
    notification_service: Arc<NotificationService>,
    escrow_period: Duration,
    service_fee_percent: f64,
}

impl EscrowService {
    pub fn new(
        db_client: Arc<DBClient>,
        gateway: Arc<PaymentGatewayService>,
        notification_service: Arc<NotificationService>,
        escrow_period_days: i64,
        service_fee_percent: f64,
    ) -> Self {
        Self {
            db_client,
            gateway,
            notification_service,
            escrow_period: Duration::days(escrow_period_days),
            service_fee_percent,
        }
    }

    /// Hire a provider and initiate the charge. On gateway failure no
    /// ledger state is written and the job stays hireable.
    pub async fn hire_and_charge(
        &self,
        job_id: Uuid,
        provider_id: Uuid,
        payment_gateway: PaymentGateway,
        actor: &User,
    ) -> Result<HireOutcome, ServiceError> {
        let job = self
            .db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if job.customer_id != actor.id && actor.role != UserRole::Admin {
            return Err(ServiceError::NotAuthorized(actor.id, job_id));
        }

        if EscrowState::from_job(&job) != EscrowState::None || job.status != JobStatus::Active {
            return Err(ServiceError::InvalidTransition(format!(
                "Job {} is not open for hiring",
                job_id
            )));
        }

        // Provider must have a live quote on this job.
        self.db_client
            .get_submitted_quote(job_id, provider_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Validation("Provider has no submitted quote for this job".to_string())
            })?;

        let amount_cents = currency::decimal_to_cents(&job.price);
        if amount_cents <= 0 {
            return Err(ServiceError::Validation(
                "Job price must be positive".to_string(),
            ));
        }

        // Fee is computed once here and frozen into the transaction;
        // later fee-rate changes cannot touch an in-flight escrow.
        let service_fee_cents = currency::service_fee_cents(amount_cents, self.service_fee_percent);

        let charge_request = ChargeRequest {
            gateway: payment_gateway,
            amount_cents,
            job_id,
            customer_id: actor.id,
            customer_email: actor.email.clone(),
            description: format!("Payment for job: {}", job.title),
            reference: generate_payment_reference(),
        };

        let charge = self.gateway.charge(&charge_request).await;

        if !charge.success {
            let reason = charge
                .error_message
                .unwrap_or_else(|| "Charge declined".to_string());
            return Err(ServiceError::Gateway(reason));
        }

        let external_payment_id = charge.external_payment_id.ok_or_else(|| {
            ServiceError::Gateway("Gateway returned no payment id".to_string())
        })?;

        // The DB-level hire guard is the authority; the state check
        // above was only a read. A concurrent hire that won the
        // reservation leaves nothing written here.
        let Some((transaction, job)) = self
            .db_client
            .create_pending_transaction(
                job_id,
                job.customer_id,
                provider_id,
                payment_gateway,
                &external_payment_id,
                amount_cents,
                service_fee_cents,
            )
            .await?
        else {
            return Err(ServiceError::InvalidTransition(format!(
                "Job {} is no longer open for hiring",
                job_id
            )));
        };

        self.notification_service
            .emit_best_effort(
                DomainEvent::Hired,
                provider_id,
                job_id,
                serde_json::json!({
                    "job_title": job.title,
                    "amount_cents": amount_cents,
                }),
            )
            .await;

        Ok(HireOutcome {
            job,
            transaction,
            redirect_or_client_secret: charge.redirect_or_client_secret,
        })
    }

    /// Move a pending transaction into escrow. Invoked by the
    /// synchronous capture path and by webhook reconciliation; applied
    /// at most once per transaction, duplicates get AlreadyProcessed.
    pub async fn confirm_charge(
        &self,
        transaction_id: Uuid,
    ) -> Result<(Transaction, Job), ServiceError> {
        let escrow_end_date = Utc::now() + self.escrow_period;

        match self
            .db_client
            .confirm_charge(transaction_id, escrow_end_date)
            .await?
        {
            Some((transaction, job)) => {
                tracing::info!(
                    "Transaction {} entered escrow for job {}, window ends {}",
                    transaction.id,
                    job.id,
                    escrow_end_date
                );

                self.notification_service
                    .emit_best_effort(
                        DomainEvent::ChargeSucceeded,
                        job.customer_id,
                        job.id,
                        serde_json::json!({
                            "transaction_id": transaction.id,
                            "amount_cents": transaction.amount_cents,
                            "escrow_end_date": job.escrow_end_date,
                        }),
                    )
                    .await;

                Ok((transaction, job))
            }
            None => {
                let transaction = self
                    .db_client
                    .get_transaction_by_id(transaction_id)
                    .await?
                    .ok_or(ServiceError::TransactionNotFound(transaction_id))?;

                // A still-pending transaction here means the job guard
                // lost: the job was cancelled while the charge was in
                // flight. Close the charge out as failed so it cannot
                // confirm later; the job stays cancelled.
                if transaction.status == TransactionStatus::Pending {
                    self.fail_charge(
                        transaction_id,
                        "Job was cancelled before the charge confirmed",
                    )
                    .await?;
                    return Err(ServiceError::InvalidTransition(format!(
                        "Job for transaction {} is no longer awaiting payment",
                        transaction_id
                    )));
                }

                self.classify_lost_guard(transaction_id).await
            }
        }
    }

    /// Synchronous capture entry: capture at the gateway, then drive
    /// the same confirm/fail transitions a webhook would.
    pub async fn capture_payment(
        &self,
        transaction_id: Uuid,
    ) -> Result<(Transaction, Job), ServiceError> {
        let transaction = self
            .db_client
            .get_transaction_by_id(transaction_id)
            .await?
            .ok_or(ServiceError::TransactionNotFound(transaction_id))?;

        if transaction.status != TransactionStatus::Pending {
            return match transaction.status {
                TransactionStatus::InEscrow | TransactionStatus::Released => {
                    Err(ServiceError::AlreadyProcessed)
                }
                _ => Err(ServiceError::InvalidTransition(format!(
                    "Transaction {} is not awaiting capture",
                    transaction_id
                ))),
            };
        }

        let capture = self
            .gateway
            .capture(transaction.gateway, &transaction.external_payment_id)
            .await;

        if capture.success {
            self.confirm_charge(transaction_id).await
        } else {
            let reason = capture
                .error_message
                .unwrap_or_else(|| "Capture denied".to_string());
            self.fail_charge(transaction_id, &reason).await?;
            Err(ServiceError::Gateway(reason))
        }
    }

    /// Manual completion by the job poster or the hired provider.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        actor: &User,
    ) -> Result<(Transaction, Job), ServiceError> {
        let job = self
            .db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        let is_party =
            job.customer_id == actor.id || job.hired_provider_id == Some(actor.id);
        if !is_party && actor.role != UserRole::Admin {
            return Err(ServiceError::NotAuthorized(actor.id, job_id));
        }

        if EscrowState::from_job(&job) != EscrowState::InEscrow {
            return Err(ServiceError::InvalidTransition(format!(
                "Job {} is not holding funds in escrow",
                job_id
            )));
        }

        self.release_job(job_id).await
    }

    /// Scheduler entry point. No-ops unless the job is still holding
    /// escrowed funds and the window has elapsed; a human completing
    /// the job first renders the fire inert.
    pub async fn attempt_auto_release(
        &self,
        job_id: Uuid,
    ) -> Result<Option<(Transaction, Job)>, ServiceError> {
        let job = self
            .db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if EscrowState::from_job(&job) != EscrowState::InEscrow {
            return Ok(None);
        }

        match job.escrow_end_date {
            Some(end) if end <= Utc::now() => {}
            _ => return Ok(None),
        }

        match self.release_job(job_id).await {
            Ok(released) => Ok(Some(released)),
            // Lost the race to a manual completion; that's success.
            Err(ServiceError::AlreadyProcessed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The single release primitive: settle the transaction, close the
    /// job and credit the provider, atomically. Exactly one caller
    /// wins under concurrency; losers map to AlreadyProcessed.
    pub async fn release_job(&self, job_id: Uuid) -> Result<(Transaction, Job), ServiceError> {
        let Some((transaction, job)) = self.db_client.release_job(job_id).await? else {
            return Err(ServiceError::AlreadyProcessed);
        };

        let provider_amount = transaction.provider_amount_cents();
        tracing::info!(
            "Released {} to provider {:?} for job {} (fee {})",
            currency::format_cents_as_dollars(provider_amount),
            transaction.provider_id,
            job.id,
            currency::format_cents_as_dollars(transaction.service_fee_cents),
        );

        if let Some(provider_id) = transaction.provider_id {
            self.notification_service
                .emit_best_effort(
                    DomainEvent::PaymentReleased,
                    provider_id,
                    job.id,
                    serde_json::json!({
                        "transaction_id": transaction.id,
                        "amount_cents": provider_amount,
                    }),
                )
                .await;
        }

        self.notification_service
            .emit_best_effort(
                DomainEvent::JobCompleted,
                job.customer_id,
                job.id,
                serde_json::json!({ "job_title": job.title }),
            )
            .await;

        Ok((transaction, job))
    }

    /// Declined or failed charge: transaction closes as failed and the
    /// job reverts to hireable so the customer can retry.
    pub async fn fail_charge(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<(Transaction, Job), ServiceError> {
        match self.db_client.fail_charge(transaction_id, reason).await? {
            Some((transaction, job)) => {
                tracing::warn!(
                    "Charge failed for transaction {} on job {}: {}",
                    transaction.id,
                    job.id,
                    reason
                );

                self.notification_service
                    .emit_best_effort(
                        DomainEvent::ChargeFailed,
                        job.customer_id,
                        job.id,
                        serde_json::json!({
                            "transaction_id": transaction.id,
                            "reason": reason,
                        }),
                    )
                    .await;

                Ok((transaction, job))
            }
            None => self.classify_lost_guard(transaction_id).await,
        }
    }

    /// Dispute/cancellation path out of escrow; admin capability.
    pub async fn refund_transaction(
        &self,
        transaction_id: Uuid,
        actor: &User,
    ) -> Result<(Transaction, Job), ServiceError> {
        if actor.role != UserRole::Admin {
            return Err(ServiceError::NotAuthorized(actor.id, transaction_id));
        }

        match self.db_client.refund_transaction(transaction_id).await? {
            Some((transaction, job)) => {
                tracing::info!(
                    "Refunded transaction {} on job {}",
                    transaction.id,
                    job.id
                );
                Ok((transaction, job))
            }
            None => self.classify_lost_guard(transaction_id).await,
        }
    }

    /// Cancel a job that has not been hired yet.
    pub async fn cancel_job(&self, job_id: Uuid, actor: &User) -> Result<Job, ServiceError> {
        let job = self
            .db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if job.customer_id != actor.id && actor.role != UserRole::Admin {
            return Err(ServiceError::NotAuthorized(actor.id, job_id));
        }

        self.db_client.cancel_job(job_id).await?.ok_or_else(|| {
            ServiceError::InvalidTransition(format!(
                "Job {} can no longer be cancelled",
                job_id
            ))
        })
    }

    /// A guarded UPDATE matched zero rows. Decide whether the caller
    /// raced a completed transition (fine) or asked for an illegal one.
    async fn classify_lost_guard<T>(&self, transaction_id: Uuid) -> Result<T, ServiceError> {
        let transaction = self
            .db_client
            .get_transaction_by_id(transaction_id)
            .await?
            .ok_or(ServiceError::TransactionNotFound(transaction_id))?;

        match transaction.status {
            TransactionStatus::InEscrow
            | TransactionStatus::Released
            | TransactionStatus::Refunded => Err(ServiceError::AlreadyProcessed),
            TransactionStatus::Failed => Err(ServiceError::InvalidTransition(format!(
                "Transaction {} already failed",
                transaction_id
            ))),
            TransactionStatus::Pending => Err(ServiceError::InvalidTransition(format!(
                "Transaction {} is still pending",
                transaction_id
            ))),
        }
    }
}
