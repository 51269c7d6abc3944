use tracing::{info, warn};

use crate::common::error::AppError;
use crate::domain::models::{
    BatchStatus, BatchTransferRecord, LedgerTransaction, ScheduledStatus, ScheduledTransfer,
};
use crate::repository::adapter::{LedgerStore, LockMode, UnitOfWork};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKey {
    /// Caller-supplied payment reference.
    Debit(String),
    Batch(String),
}

#[derive(Debug, Clone)]
pub enum PriorOutcome {
    Debit(LedgerTransaction),
    Batch(BatchTransferRecord),
}

#[derive(Debug)]
pub enum Reservation {
    Existing(PriorOutcome),
    /// The key is free. For a batch, a `processing` row now holds the id and
    /// must be completed or released by the caller.
    Proceed,
}

/// Short-circuits replays before any lock is taken. The unique indexes on
/// `ref_id` and `batch_id` remain the final arbiter.
#[derive(Clone)]
pub struct IdempotencyGuard<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> IdempotencyGuard<S> {
    pub fn new(store: S) -> Self {
        IdempotencyGuard { store }
    }

    pub async fn check_or_reserve(&self, key: &IdempotencyKey) -> Result<Reservation, AppError> {
        match key {
            IdempotencyKey::Debit(ref_id) => {
                if let Some(existing) = self.store.find_transaction_by_ref(ref_id).await? {
                    info!(ref_id = %ref_id, transaction_id = %existing.transaction_id, "debit replayed");
                    return Ok(Reservation::Existing(PriorOutcome::Debit(existing)));
                }
                Ok(Reservation::Proceed)
            }
            IdempotencyKey::Batch(batch_id) => {
                if let Some(found) = self.replay_batch(batch_id).await? {
                    return Ok(found);
                }
                match self.store.reserve_batch(batch_id).await {
                    Ok(()) => Ok(Reservation::Proceed),
                    // Lost the insert race; the winner may already be done.
                    Err(AppError::Conflict(_)) => match self.replay_batch(batch_id).await? {
                        Some(found) => Ok(found),
                        None => Err(in_progress(batch_id)),
                    },
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn replay_batch(&self, batch_id: &str) -> Result<Option<Reservation>, AppError> {
        match self.store.find_batch(batch_id).await? {
            Some(record) if record.status == BatchStatus::Completed => {
                info!(batch_id = %batch_id, "batch replayed");
                Ok(Some(Reservation::Existing(PriorOutcome::Batch(record))))
            }
            Some(_) => Err(in_progress(batch_id)),
            None => Ok(None),
        }
    }

    /// Re-check of a payment reference from inside the unit of work, after the
    /// account lock is held.
    pub async fn recheck_debit<U: UnitOfWork>(
        &self,
        uow: &mut U,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        uow.find_transaction_by_ref(ref_id).await
    }

    /// Locks a scheduled transfer without waiting and returns it only if it
    /// is still pending. `None` means another worker holds it or it has
    /// already moved on.
    pub async fn claim_scheduled<U: UnitOfWork>(
        &self,
        uow: &mut U,
        scheduled_id: &str,
    ) -> Result<Option<ScheduledTransfer>, AppError> {
        let row = uow.lock_scheduled(scheduled_id, LockMode::SkipLocked).await?;
        Ok(row.filter(|s| s.status == ScheduledStatus::Pending))
    }

}

fn in_progress(batch_id: &str) -> AppError {
    warn!(batch_id = %batch_id, "batch already executing");
    AppError::Conflict(format!("batch {} is already being processed", batch_id))
}
