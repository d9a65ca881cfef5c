// db/jobdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::jobmodel::*;

#[async_trait]
pub trait JobExt {
    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error>;

    async fn get_submitted_quote(
        &self,
        job_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Option<Quote>, sqlx::Error>;

    /// Cancel a job. The guard lives in the UPDATE's WHERE clause; a
    /// stale caller gets no row back. Jobs with a provider reserved
    /// (charge in flight) cannot be cancelled.
    async fn cancel_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error>;

    /// Jobs in escrow whose window has elapsed, due for auto-release.
    async fn get_jobs_due_for_release(&self, limit: i64) -> Result<Vec<Job>, sqlx::Error>;

    /// All jobs currently holding funds in escrow, due or not.
    /// Used by the startup sweep to re-arm timers lost to a restart.
    async fn get_jobs_in_escrow(&self) -> Result<Vec<Job>, sqlx::Error>;
}

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
impl JobExt for DBClient {
    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_submitted_quote(
        &self,
        job_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Option<Quote>, sqlx::Error> {
        sqlx::query_as::<_, Quote>(
            r#"
            SELECT id, job_id, provider_id, amount, message, status, created_at
            FROM quotes
            WHERE job_id = $1 AND provider_id = $2 AND status = 'submitted'
            "#,
        )
        .bind(job_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND hired_provider_id IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_jobs_due_for_release(&self, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'in_progress'
              AND payment_status = 'in_escrow'
              AND escrow_end_date IS NOT NULL
              AND escrow_end_date <= NOW()
            ORDER BY escrow_end_date ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_jobs_in_escrow(&self) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'in_progress'
              AND payment_status = 'in_escrow'
              AND escrow_end_date IS NOT NULL
            ORDER BY escrow_end_date ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn cancel_is_blocked_while_a_provider_is_reserved(pool: PgPool) {
        let db = DBClient::new(pool);

        let customer: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (name, email, role)
            VALUES ('Test User', $1, 'customer'::user_role)
            RETURNING id
            "#,
        )
        .bind(format!("{}@test.local", Uuid::new_v4()))
        .fetch_one(&db.pool)
        .await
        .unwrap();

        let job_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (customer_id, title, description, price)
            VALUES ($1, 'Patch drywall', 'Two holes in the hallway wall', 80.00)
            RETURNING id
            "#,
        )
        .bind(customer)
        .fetch_one(&db.pool)
        .await
        .unwrap();

        // A reserved provider means a charge is in flight.
        sqlx::query("UPDATE jobs SET hired_provider_id = $2 WHERE id = $1")
            .bind(job_id)
            .bind(customer)
            .execute(&db.pool)
            .await
            .unwrap();

        let cancelled = db.cancel_job(job_id).await.unwrap();
        assert!(cancelled.is_none());

        let job = db.get_job_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Active);
    }
}
