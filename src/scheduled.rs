use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::error::{AppError, Resource};
use crate::common::money::validate_amount;
use crate::domain::finance::{
    ensure_remark_fits, ScheduledTransferRequest, TransferRequest, MAX_REMARK_LEN,
};
use crate::domain::models::{Page, ScheduledStatus, ScheduledTransfer};
use crate::idempotency::IdempotencyGuard;
use crate::repository::adapter::{LedgerStore, LockMode, UnitOfWork};
use crate::service::TransactionService;

pub const SCHEDULED_REMARK_PREFIX: &str = "[scheduled] ";

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    pub max_retry: i32,
    pub due_limit: i64,
    /// How far ahead of now a new schedule must be.
    pub min_lead: Duration,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        SchedulerLimits {
            max_retry: 3,
            due_limit: 100,
            min_lead: Duration::minutes(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Another worker holds the row or it is no longer pending.
    Skipped,
    Completed(String),
    Retrying(i32),
    Failed(i32),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub due: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ScheduledTransferScheduler<S: LedgerStore> {
    store: S,
    service: TransactionService<S>,
    guard: IdempotencyGuard<S>,
    limits: SchedulerLimits,
}

impl<S: LedgerStore> ScheduledTransferScheduler<S> {
    pub fn new(
        store: S,
        service: TransactionService<S>,
        guard: IdempotencyGuard<S>,
        limits: SchedulerLimits,
    ) -> Self {
        ScheduledTransferScheduler {
            store,
            service,
            guard,
            limits,
        }
    }

    pub async fn create(
        &self,
        request: ScheduledTransferRequest,
    ) -> Result<ScheduledTransfer, AppError> {
        if request.from_account_id == request.to_account_id {
            return Err(AppError::SameAccount);
        }
        let amount = validate_amount(request.amount)?;
        // The executed transfer carries the prefix in the same column.
        ensure_remark_fits(
            request.remark.as_deref(),
            MAX_REMARK_LEN - SCHEDULED_REMARK_PREFIX.chars().count(),
        )?;
        let now = Utc::now();
        if request.scheduled_time < now + self.limits.min_lead {
            return Err(AppError::InvalidSchedule(format!(
                "scheduledTime must be at least {} seconds in the future",
                self.limits.min_lead.num_seconds()
            )));
        }
        for id in [request.from_account_id, request.to_account_id] {
            if self.store.find_account(id).await?.is_none() {
                return Err(AppError::NotFound(Resource::Account));
            }
        }

        let scheduled = ScheduledTransfer {
            scheduled_id: Uuid::new_v4().to_string(),
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount,
            scheduled_time: request.scheduled_time,
            status: ScheduledStatus::Pending,
            transaction_id: None,
            retry_count: 0,
            error_message: None,
            remark: request.remark,
            created_at: now,
            updated_at: now,
        };
        let mut uow = self.store.begin().await?;
        uow.insert_scheduled(&scheduled).await?;
        uow.commit().await?;

        info!(
            scheduled_id = %scheduled.scheduled_id,
            from_account_id = scheduled.from_account_id,
            to_account_id = scheduled.to_account_id,
            amount = %scheduled.amount,
            scheduled_time = %scheduled.scheduled_time,
            "scheduled transfer created"
        );
        Ok(scheduled)
    }

    pub async fn cancel(&self, scheduled_id: &str) -> Result<ScheduledTransfer, AppError> {
        let mut uow = self.store.begin().await?;
        let mut scheduled = uow
            .lock_scheduled(scheduled_id, LockMode::Wait)
            .await?
            .ok_or(AppError::NotFound(Resource::ScheduledTransfer))?;
        if scheduled.status != ScheduledStatus::Pending {
            return Err(AppError::AlreadyTerminal(format!(
                "scheduled transfer is {}",
                scheduled.status
            )));
        }
        scheduled.status = ScheduledStatus::Cancelled;
        uow.update_scheduled(&scheduled).await?;
        uow.commit().await?;

        info!(scheduled_id = %scheduled_id, "scheduled transfer cancelled");
        Ok(scheduled)
    }

    pub async fn get(&self, scheduled_id: &str) -> Result<ScheduledTransfer, AppError> {
        self.store
            .find_scheduled(scheduled_id)
            .await?
            .ok_or(AppError::NotFound(Resource::ScheduledTransfer))
    }

    pub async fn list_for_account(
        &self,
        from_account_id: i64,
        status: Option<ScheduledStatus>,
        page: Page,
    ) -> Result<Vec<ScheduledTransfer>, AppError> {
        self.store.list_scheduled(from_account_id, status, page).await
    }

    /// Runs every due transfer once. Each one is isolated: an error on one
    /// id is logged and the tick moves on.
    pub async fn tick(&self) -> Result<TickStats, AppError> {
        let due = self
            .store
            .due_scheduled(Utc::now(), self.limits.due_limit)
            .await?;
        let mut stats = TickStats {
            due: due.len(),
            ..Default::default()
        };

        for scheduled_id in due {
            match self.execute_one(&scheduled_id).await {
                Ok(ExecutionOutcome::Completed(_)) => stats.completed += 1,
                Ok(ExecutionOutcome::Retrying(_)) => stats.retrying += 1,
                Ok(ExecutionOutcome::Failed(_)) => stats.failed += 1,
                Ok(ExecutionOutcome::Skipped) => stats.skipped += 1,
                Err(err) => {
                    stats.errors += 1;
                    error!(scheduled_id = %scheduled_id, "scheduled transfer execution error: {:?}", err);
                }
            }
        }
        Ok(stats)
    }

    /// Claims the row, moves the money and settles the row in one unit of
    /// work. Any failure rolls all of it back, leaving the row pending, and
    /// the failure is then counted against the row in a second unit of work.
    pub async fn execute_one(&self, scheduled_id: &str) -> Result<ExecutionOutcome, AppError> {
        let mut uow = self.store.begin().await?;
        let mut scheduled = match self.guard.claim_scheduled(&mut uow, scheduled_id).await? {
            Some(row) => row,
            None => {
                uow.rollback().await?;
                return Ok(ExecutionOutcome::Skipped);
            }
        };
        scheduled.status = ScheduledStatus::Processing;
        uow.update_scheduled(&scheduled).await?;

        let request = TransferRequest {
            from_account_id: scheduled.from_account_id,
            to_account_id: scheduled.to_account_id,
            amount: scheduled.amount,
            remark: Some(format!(
                "{}{}",
                SCHEDULED_REMARK_PREFIX,
                scheduled.remark.as_deref().unwrap_or_default()
            )),
        };
        let err = match self.service.transfer_within(&mut uow, &request).await {
            Ok(receipt) => {
                scheduled.status = ScheduledStatus::Completed;
                scheduled.transaction_id = Some(receipt.transaction_id.clone());
                scheduled.error_message = None;
                uow.update_scheduled(&scheduled).await?;
                uow.commit().await?;
                info!(
                    scheduled_id = %scheduled_id,
                    transaction_id = %receipt.transaction_id,
                    "scheduled transfer completed"
                );
                return Ok(ExecutionOutcome::Completed(receipt.transaction_id));
            }
            Err(err) => err,
        };
        uow.rollback().await?;
        self.record_failure(scheduled_id, &err).await
    }

    async fn record_failure(
        &self,
        scheduled_id: &str,
        err: &AppError,
    ) -> Result<ExecutionOutcome, AppError> {
        let mut uow = self.store.begin().await?;
        let mut scheduled = match self.guard.claim_scheduled(&mut uow, scheduled_id).await? {
            Some(row) => row,
            None => {
                uow.rollback().await?;
                return Ok(ExecutionOutcome::Skipped);
            }
        };
        scheduled.retry_count += 1;
        scheduled.error_message = Some(err.to_string());
        let outcome = if scheduled.retry_count >= self.limits.max_retry {
            scheduled.status = ScheduledStatus::Failed;
            warn!(
                scheduled_id = %scheduled_id,
                retry_count = scheduled.retry_count,
                "scheduled transfer failed permanently: {}",
                err
            );
            ExecutionOutcome::Failed(scheduled.retry_count)
        } else {
            info!(
                scheduled_id = %scheduled_id,
                retry_count = scheduled.retry_count,
                "scheduled transfer will retry: {}",
                err
            );
            ExecutionOutcome::Retrying(scheduled.retry_count)
        };
        uow.update_scheduled(&scheduled).await?;
        uow.commit().await?;
        Ok(outcome)
    }
}
