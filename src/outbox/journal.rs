use chrono::{Duration, Utc};
use tracing::warn;

use crate::common::error::AppError;
use crate::domain::events::LedgerEvent;
use crate::domain::models::{OutboxEvent, OutboxStatus};
use crate::repository::adapter::{LedgerStore, UnitOfWork};

/// How long a claimed event may sit in `processing` before another drain
/// takes it back.
pub const DEFAULT_RECLAIM_AFTER_SECS: i64 = 300;

/// Durable record of events that still have to leave the service.
#[derive(Clone)]
pub struct OutboxJournal<S: LedgerStore> {
    store: S,
    max_attempts: i32,
    reclaim_after: Duration,
}

impl<S: LedgerStore> OutboxJournal<S> {
    pub fn new(store: S, max_attempts: i32) -> Self {
        OutboxJournal {
            store,
            max_attempts: max_attempts.clamp(1, 100),
            reclaim_after: Duration::seconds(DEFAULT_RECLAIM_AFTER_SECS),
        }
    }

    pub fn with_reclaim_after(mut self, secs: u64) -> Self {
        self.reclaim_after = Duration::seconds(secs.clamp(1, 86_400) as i64);
        self
    }

    /// Adds a `pending` row inside the caller's unit of work. It commits or
    /// vanishes together with the mutation it describes.
    pub async fn append<U: UnitOfWork>(
        &self,
        uow: &mut U,
        event: &LedgerEvent,
    ) -> Result<i64, AppError> {
        uow.insert_outbox_event(event.to_outbox()?).await
    }

    /// Claims pending events, plus events a crashed drain left in
    /// `processing` for longer than the reclaim window.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<OutboxEvent>, AppError> {
        self.store
            .claim_outbox(limit.clamp(1, 200), Utc::now() - self.reclaim_after)
            .await
    }

    pub async fn mark_sent(&self, event: &OutboxEvent) -> Result<(), AppError> {
        self.store.mark_outbox_sent(event.id).await
    }

    /// Counts a failed delivery and returns the event's new status: back to
    /// `pending` while attempts remain, `failed` once they are used up.
    pub async fn record_failure(
        &self,
        event: &OutboxEvent,
        error: &str,
    ) -> Result<OutboxStatus, AppError> {
        if event.attempts + 1 >= self.max_attempts {
            self.store.mark_outbox_failed(event.id, error).await?;
            warn!(
                outbox_id = event.id,
                event_type = %event.event_type,
                attempts = event.attempts + 1,
                "outbox delivery failed permanently: {}",
                error
            );
            return Ok(OutboxStatus::Failed);
        }
        self.store.mark_outbox_retry(event.id, error).await?;
        warn!(
            outbox_id = event.id,
            event_type = %event.event_type,
            attempts = event.attempts + 1,
            "outbox delivery failed, will retry: {}",
            error
        );
        Ok(OutboxStatus::Pending)
    }
}
