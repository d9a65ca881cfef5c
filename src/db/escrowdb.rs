// db/escrowdb.rs
//
// Every escrow transition is applied as a single database transaction
// whose first UPDATE carries the state guard in its WHERE clause. Under
// concurrent invocation (user action vs. webhook vs. scheduler fire)
// exactly one caller's guard matches; the losers observe zero rows and
// get Ok(None) back, which the service layer maps to AlreadyProcessed.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::jobmodel::*;

#[async_trait]
pub trait EscrowExt {
    /// Record a successful charge initiation: pending transaction plus
    /// the provider reservation on the job, atomically. Ok(None) means
    /// the job guard lost: another hire reserved the job first, or it
    /// left the hireable state. Nothing is written in that case.
    async fn create_pending_transaction(
        &self,
        job_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
        gateway: PaymentGateway,
        external_payment_id: &str,
        amount_cents: i64,
        service_fee_cents: i64,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error>;

    /// Move a pending transaction into escrow and stamp the job with
    /// its escrow window. Ok(None) means the guard lost: the
    /// transaction was no longer pending.
    async fn confirm_charge(
        &self,
        transaction_id: Uuid,
        escrow_end_date: DateTime<Utc>,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error>;

    /// The one release primitive shared by manual completion and
    /// auto-release: transaction -> released, job -> completed,
    /// provider credited amount minus fee, in one transaction.
    /// Ok(None) means another racer already released (or refunded).
    async fn release_job(&self, job_id: Uuid) -> Result<Option<(Transaction, Job)>, sqlx::Error>;

    /// Failed or declined charge: transaction -> failed and the job
    /// reset to hireable (provider reservation cleared).
    async fn fail_charge(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error>;

    /// Dispute/cancellation path out of escrow. The provider is never
    /// credited; the job closes as refunded.
    async fn refund_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error>;

    async fn get_transaction_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    async fn get_transaction_by_external_id(
        &self,
        gateway: PaymentGateway,
        external_payment_id: &str,
    ) -> Result<Option<Transaction>, sqlx::Error>;

    async fn get_released_transactions_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Transaction>, sqlx::Error>;
}

const TX_COLUMNS: &str = r#"
    id,
    job_id,
    customer_id,
    provider_id,
    gateway,
    external_payment_id,
    amount_cents,
    service_fee_cents,
    status,
    failure_reason,
    created_at,
    released_at
"#;

const JOB_COLUMNS: &str = r#"
    id,
    customer_id,
    title,
    description,
    price,
    status,
    payment_status,
    hired_provider_id,
    transaction_id,
    escrow_end_date,
    completed_at,
    created_at,
    updated_at
"#;

#[async_trait]
impl EscrowExt for DBClient {
    async fn create_pending_transaction(
        &self,
        job_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
        gateway: PaymentGateway,
        external_payment_id: &str,
        amount_cents: i64,
        service_fee_cents: i64,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions
                (job_id, customer_id, provider_id, gateway, external_payment_id,
                 amount_cents, service_fee_cents, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(customer_id)
        .bind(provider_id)
        .bind(gateway)
        .bind(external_payment_id)
        .bind(amount_cents)
        .bind(service_fee_cents)
        .fetch_one(&mut *tx)
        .await?;

        // The hire guard. hired_provider_id IS NULL is load-bearing: a
        // job with a charge pending is still 'active', and two
        // concurrent hires must not both reserve it. The loser matches
        // zero rows and the whole insert rolls back.
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET hired_provider_id = $2,
                payment_status = 'pending',
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND hired_provider_id IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(provider_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;
        Ok(Some((transaction, job)))
    }

    async fn confirm_charge(
        &self,
        transaction_id: Uuid,
        escrow_end_date: DateTime<Utc>,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions
            SET status = 'in_escrow'
            WHERE id = $1 AND status = 'pending'
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction) = transaction else {
            // Duplicate delivery or out-of-order event; nothing to do.
            tx.rollback().await?;
            return Ok(None);
        };

        // The job must still be awaiting this charge. A job cancelled
        // while the charge was in flight stays cancelled; rolling back
        // leaves the transaction pending for the caller to fail out.
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'in_progress',
                payment_status = 'in_escrow',
                escrow_end_date = $2,
                transaction_id = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(transaction.job_id)
        .bind(escrow_end_date)
        .bind(transaction.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;
        Ok(Some((transaction, job)))
    }

    async fn release_job(&self, job_id: Uuid) -> Result<Option<(Transaction, Job)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Err(sqlx::Error::RowNotFound);
        };

        let (Some(transaction_id), Some(provider_id)) = (job.transaction_id, job.hired_provider_id)
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        // The escrow guard. A losing racer (manual completion vs.
        // scheduler fire) matches zero rows here and backs off.
        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions
            SET status = 'released',
                provider_id = $2,
                released_at = NOW()
            WHERE id = $1 AND status = 'in_escrow'
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(transaction_id)
        .bind(provider_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction) = transaction else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed',
                payment_status = 'released',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        let provider_amount = transaction.provider_amount_cents();
        sqlx::query(
            r#"
            UPDATE users
            SET available_balance_cents = available_balance_cents + $2,
                total_earnings_cents = total_earnings_cents + $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(provider_id)
        .bind(provider_amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((transaction, job)))
    }

    async fn fail_charge(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions
            SET status = 'failed',
                failure_reason = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(transaction_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction) = transaction else {
            tx.rollback().await?;
            return Ok(None);
        };

        // The provider reservation is cleared; an active job re-enters
        // the pool of hireable jobs. Status is deliberately untouched
        // so a cancelled job is not resurrected here.
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET hired_provider_id = NULL,
                payment_status = 'pending',
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(transaction.job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((transaction, job)))
    }

    async fn refund_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<(Transaction, Job)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions
            SET status = 'refunded'
            WHERE id = $1 AND status = 'in_escrow'
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction) = transaction else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed',
                payment_status = 'refunded',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(transaction.job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((transaction, job)))
    }

    async fn get_transaction_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_transaction_by_external_id(
        &self,
        gateway: PaymentGateway,
        external_payment_id: &str,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TX_COLUMNS}
            FROM transactions
            WHERE gateway = $1 AND external_payment_id = $2
            "#
        ))
        .bind(gateway)
        .bind(external_payment_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_released_transactions_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TX_COLUMNS}
            FROM transactions
            WHERE provider_id = $1 AND status = 'released'
            ORDER BY released_at DESC
            "#
        ))
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::jobdb::JobExt;
    use chrono::Duration;
    use sqlx::PgPool;

    async fn seed_user(pool: &PgPool, role: &str) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO users (name, email, role)
            VALUES ($1, $2, $3::user_role)
            RETURNING id
            "#,
        )
        .bind("Test User")
        .bind(format!("{}@test.local", Uuid::new_v4()))
        .bind(role)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_job(pool: &PgPool, customer_id: Uuid) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO jobs (customer_id, title, description, price)
            VALUES ($1, 'Fix kitchen sink', 'The sink leaks under the counter', 100.00)
            RETURNING id
            "#,
        )
        .bind(customer_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn provider_balances(pool: &PgPool, provider_id: Uuid) -> (i64, i64) {
        sqlx::query_as(
            "SELECT available_balance_cents, total_earnings_cents FROM users WHERE id = $1",
        )
        .bind(provider_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn second_hire_loses_the_job_guard(pool: PgPool) {
        let db = DBClient::new(pool);
        let customer = seed_user(&db.pool, "customer").await;
        let first_provider = seed_user(&db.pool, "provider").await;
        let second_provider = seed_user(&db.pool, "provider").await;
        let job_id = seed_job(&db.pool, customer).await;

        let first = db
            .create_pending_transaction(
                job_id, customer, first_provider, PaymentGateway::Stripe,
                "pi_first", 10_000, 1_000,
            )
            .await
            .unwrap();
        assert!(first.is_some());

        // The job is still 'active' while the first charge is pending;
        // a second hire must not steal the reservation.
        let second = db
            .create_pending_transaction(
                job_id, customer, second_provider, PaymentGateway::Stripe,
                "pi_second", 10_000, 1_000,
            )
            .await
            .unwrap();
        assert!(second.is_none());

        let job = db.get_job_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.hired_provider_id, Some(first_provider));

        // The loser's transaction rolled back with the reservation.
        let orphan = db
            .get_transaction_by_external_id(PaymentGateway::Stripe, "pi_second")
            .await
            .unwrap();
        assert!(orphan.is_none());
    }

    #[sqlx::test]
    async fn confirm_charge_applies_exactly_once(pool: PgPool) {
        let db = DBClient::new(pool);
        let customer = seed_user(&db.pool, "customer").await;
        let provider = seed_user(&db.pool, "provider").await;
        let job_id = seed_job(&db.pool, customer).await;

        let (transaction, _) = db
            .create_pending_transaction(
                job_id, customer, provider, PaymentGateway::Stripe, "pi_dup", 10_000, 1_000,
            )
            .await
            .unwrap()
            .unwrap();

        let end = Utc::now() + Duration::days(7);
        let first = db.confirm_charge(transaction.id, end).await.unwrap();
        assert!(first.is_some());

        // Duplicate webhook delivery: the guard already lost.
        let second = db.confirm_charge(transaction.id, end).await.unwrap();
        assert!(second.is_none());

        let job = db.get_job_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.payment_status, PaymentStatus::InEscrow);
        assert_eq!(job.transaction_id, Some(transaction.id));
    }

    #[sqlx::test]
    async fn cancelled_job_is_not_resurrected_by_a_late_confirmation(pool: PgPool) {
        let db = DBClient::new(pool);
        let customer = seed_user(&db.pool, "customer").await;
        let provider = seed_user(&db.pool, "provider").await;
        let job_id = seed_job(&db.pool, customer).await;

        let (transaction, _) = db
            .create_pending_transaction(
                job_id, customer, provider, PaymentGateway::Paypal, "order_late", 10_000, 1_000,
            )
            .await
            .unwrap()
            .unwrap();

        // Cancellation that slipped in while the charge was in flight.
        sqlx::query("UPDATE jobs SET status = 'cancelled' WHERE id = $1")
            .bind(job_id)
            .execute(&db.pool)
            .await
            .unwrap();

        let end = Utc::now() + Duration::days(7);
        let confirmed = db.confirm_charge(transaction.id, end).await.unwrap();
        assert!(confirmed.is_none());

        let job = db.get_job_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.escrow_end_date, None);

        // The transaction stayed pending for the fail path to close.
        let transaction = db.get_transaction_by_id(transaction.id).await.unwrap().unwrap();
        assert_eq!(transaction.status, TransactionStatus::Pending);
    }

    #[sqlx::test]
    async fn release_applies_once_and_credits_the_provider_once(pool: PgPool) {
        let db = DBClient::new(pool);
        let customer = seed_user(&db.pool, "customer").await;
        let provider = seed_user(&db.pool, "provider").await;
        let job_id = seed_job(&db.pool, customer).await;

        let (transaction, _) = db
            .create_pending_transaction(
                job_id, customer, provider, PaymentGateway::Stripe, "pi_release", 10_000, 1_000,
            )
            .await
            .unwrap()
            .unwrap();
        db.confirm_charge(transaction.id, Utc::now() + Duration::days(7))
            .await
            .unwrap()
            .unwrap();

        // Manual completion and the scheduler fire race to this call;
        // exactly one may settle the money.
        let first = db.release_job(job_id).await.unwrap();
        let released = first.unwrap().0;
        assert_eq!(released.status, TransactionStatus::Released);

        let second = db.release_job(job_id).await.unwrap();
        assert!(second.is_none());

        // Conservation: amount = payout + fee, credited exactly once.
        let (available, total) = provider_balances(&db.pool, provider).await;
        assert_eq!(available, 9_000);
        assert_eq!(total, 9_000);
        assert_eq!(released.amount_cents, 9_000 + released.service_fee_cents);

        let job = db.get_job_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.payment_status, PaymentStatus::Released);
    }
}
