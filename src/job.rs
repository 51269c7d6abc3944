use std::time::Duration;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use crate::configs::settings::Settings;
use crate::outbox::publisher::OutboxPublisher;
use crate::repository::adapter::LedgerStore;
use crate::scheduled::ScheduledTransferScheduler;
use crate::state::ApplicationState;

pub fn create_outbox_job<S: LedgerStore>(
    publisher: OutboxPublisher<S>,
    interval: Duration,
) -> Result<Job, JobSchedulerError> {
    Job::new_repeated_async(interval, move |_uuid, _l| {
        let publisher = publisher.clone();
        Box::pin(async move {
            match publisher.drain_once().await {
                Ok(stats) if stats.claimed > 0 => {
                    info!(
                        claimed = stats.claimed,
                        sent = stats.sent,
                        retried = stats.retried,
                        failed = stats.failed,
                        errors = stats.errors,
                        "outbox drained"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error draining outbox: {:?}", e),
            }
        })
    })
}

pub fn create_scheduled_transfer_job<S: LedgerStore>(
    scheduler: ScheduledTransferScheduler<S>,
    interval: Duration,
) -> Result<Job, JobSchedulerError> {
    Job::new_repeated_async(interval, move |_uuid, _l| {
        let scheduler = scheduler.clone();
        Box::pin(async move {
            match scheduler.tick().await {
                Ok(stats) if stats.due > 0 => {
                    info!(
                        due = stats.due,
                        completed = stats.completed,
                        retrying = stats.retrying,
                        failed = stats.failed,
                        skipped = stats.skipped,
                        errors = stats.errors,
                        "scheduled transfers processed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error processing scheduled transfers: {:?}", e),
            }
        })
    })
}

/// Registers the enabled periodic jobs and starts them.
pub async fn start_jobs(
    state: &ApplicationState<PgPool>,
    settings: &Settings,
) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    if settings.outbox.enabled {
        sched
            .add(create_outbox_job(
                state.publisher.clone(),
                settings.outbox.poll_interval(),
            )?)
            .await?;
    } else {
        warn!("outbox publisher disabled");
    }

    if settings.scheduler.enabled {
        sched
            .add(create_scheduled_transfer_job(
                state.scheduler.clone(),
                settings.scheduler.tick_interval(),
            )?)
            .await?;
    } else {
        warn!("scheduled transfer executor disabled");
    }

    sched.start().await?;
    Ok(sched)
}
