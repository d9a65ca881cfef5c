// service/release_scheduler.rs
//
// Durable deferred release. The obligation lives in the database
// (jobs.escrow_end_date), not in process memory: a periodic poll picks
// up every due escrow, and reconcile_on_startup replaces whatever
// timers a previous process lost when it died. In-process arming is
// only a latency optimization; correctness never depends on it, and
// every fire is made idempotent by the release guard rather than by
// timer cancellation.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::{
    db::{db::DBClient, jobdb::JobExt},
    service::{error::ServiceError, escrow_service::EscrowService},
};

const DUE_BATCH_SIZE: i64 = 100;

/// How long to sleep before firing; zero when already due.
pub fn sleep_until(fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (fire_at - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[derive(Clone)]
pub struct ReleaseScheduler {
    db_client: Arc<DBClient>,
    escrow_service: Arc<EscrowService>,
}

impl ReleaseScheduler {
    pub fn new(db_client: Arc<DBClient>, escrow_service: Arc<EscrowService>) -> Self {
        Self {
            db_client,
            escrow_service,
        }
    }

    /// Schedule a release attempt at or after fire_at. Past deadlines
    /// fire immediately. The spawned task holds no locks while it
    /// waits and simply no-ops if someone completed the job first.
    pub fn arm(&self, job_id: Uuid, fire_at: DateTime<Utc>) {
        let escrow_service = self.escrow_service.clone();
        tokio::spawn(async move {
            let delay = sleep_until(fire_at, Utc::now());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match escrow_service.attempt_auto_release(job_id).await {
                Ok(Some(_)) => tracing::info!("Auto-released escrow for job {}", job_id),
                Ok(None) => {}
                Err(e) => tracing::error!("Auto-release attempt for job {} failed: {}", job_id, e),
            }
        });
    }

    /// Re-establish every pending release obligation after a restart:
    /// jobs already past their window are released on the spot, the
    /// rest get fresh in-process timers.
    pub async fn reconcile_on_startup(&self) -> Result<(), ServiceError> {
        let jobs = self.db_client.get_jobs_in_escrow().await?;
        let now = Utc::now();

        tracing::info!(
            "Release scheduler reconciling {} job(s) in escrow at startup",
            jobs.len()
        );

        for job in jobs {
            let Some(fire_at) = job.escrow_end_date else {
                continue;
            };

            if fire_at <= now {
                match self.escrow_service.attempt_auto_release(job.id).await {
                    Ok(Some(_)) => {
                        tracing::info!("Startup sweep released overdue escrow for job {}", job.id)
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("Startup release for job {} failed: {}", job.id, e)
                    }
                }
            } else {
                self.arm(job.id, fire_at);
            }
        }

        Ok(())
    }

    /// Background poll loop for due escrows. This is the durability
    /// backstop: even if every armed timer is lost, each tick picks up
    /// whatever became due.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut tick = interval(poll_interval);

        loop {
            tick.tick().await;

            let due = match self.db_client.get_jobs_due_for_release(DUE_BATCH_SIZE).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!("Release scheduler poll failed: {}", e);
                    continue;
                }
            };

            if due.is_empty() {
                continue;
            }

            tracing::info!("Release scheduler found {} due escrow(s)", due.len());

            for job in due {
                match self.escrow_service.attempt_auto_release(job.id).await {
                    Ok(Some(_)) => tracing::info!("Auto-released escrow for job {}", job.id),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("Auto-release for job {} failed: {}", job.id, e)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn past_deadlines_sleep_zero() {
        let now = Utc::now();
        assert_eq!(sleep_until(now - ChronoDuration::hours(1), now), Duration::ZERO);
        assert_eq!(sleep_until(now, now), Duration::ZERO);
    }

    #[test]
    fn future_deadlines_sleep_until_due() {
        let now = Utc::now();
        let delay = sleep_until(now + ChronoDuration::seconds(90), now);
        assert_eq!(delay.as_secs(), 90);
    }
}
