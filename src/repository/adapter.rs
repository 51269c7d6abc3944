use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::error::AppError;
use crate::domain::models::{
    Account, AccountStatus, BatchTransferRecord, LedgerTransaction, NewAccount,
    NewLedgerTransaction, NewOutboxEvent, OutboxEvent, Page, ScheduledStatus, ScheduledTransfer, TimeRange,
};
use crate::ledger::lock::LockedAccount;

/// Whether a row lock request waits for a concurrent holder or gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Wait,
    SkipLocked,
}

/// One database transaction. Row locks taken through it are held until
/// `commit` or `rollback`; dropping it without committing rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// `SELECT ... FOR UPDATE` on one account row.
    async fn select_account_for_update(&mut self, id: i64) -> Result<Option<Account>, AppError>;

    async fn store_balance(&mut self, account: &LockedAccount) -> Result<(), AppError>;

    async fn update_account_status(
        &mut self,
        account: &LockedAccount,
        status: AccountStatus,
    ) -> Result<(), AppError>;

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, AppError>;

    async fn find_transaction_by_ref(
        &mut self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError>;

    async fn insert_transaction(
        &mut self,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, AppError>;

    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<i64, AppError>;

    async fn lock_scheduled(
        &mut self,
        scheduled_id: &str,
        mode: LockMode,
    ) -> Result<Option<ScheduledTransfer>, AppError>;

    async fn insert_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError>;

    async fn update_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError>;

    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}

/// Storage backend for the ledger. Reads outside a unit of work see only
/// committed state.
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    type Uow: UnitOfWork + 'static;

    async fn begin(&self) -> Result<Self::Uow, AppError>;

    async fn find_account(&self, id: i64) -> Result<Option<Account>, AppError>;

    async fn find_accounts(&self, ids: &[i64]) -> Result<Vec<Account>, AppError>;

    async fn find_transaction_by_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError>;

    /// Accounts newest first, optionally narrowed to one customer or status.
    async fn list_accounts(
        &self,
        customer_id: Option<i64>,
        status: Option<AccountStatus>,
        page: Page,
    ) -> Result<Vec<Account>, AppError>;

    /// Newest first, limited to rows created inside `range`.
    async fn list_transactions(
        &self,
        account_id: i64,
        range: TimeRange,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    async fn find_batch(&self, batch_id: &str) -> Result<Option<BatchTransferRecord>, AppError>;

    /// Inserts a `processing` row for the batch id. Fails with `Conflict` if
    /// the id is already reserved or completed.
    async fn reserve_batch(&self, batch_id: &str) -> Result<(), AppError>;

    /// Stores the results on a reserved batch and marks it `completed`.
    async fn complete_batch(&self, record: &BatchTransferRecord) -> Result<(), AppError>;

    /// Drops a reservation that never ran any item.
    async fn release_batch(&self, batch_id: &str) -> Result<(), AppError>;

    async fn find_scheduled(&self, scheduled_id: &str)
        -> Result<Option<ScheduledTransfer>, AppError>;

    async fn list_scheduled(
        &self,
        from_account_id: i64,
        status: Option<ScheduledStatus>,
        page: Page,
    ) -> Result<Vec<ScheduledTransfer>, AppError>;

    /// Ids of pending scheduled transfers due at or before `now`, oldest first.
    async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<String>, AppError>;

    /// Atomically flips up to `limit` events to `processing`, skipping rows
    /// locked by another claimer. Candidates are `pending` rows plus
    /// `processing` rows last touched at or before `stale_before`.
    async fn claim_outbox(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, AppError>;

    async fn mark_outbox_sent(&self, id: i64) -> Result<(), AppError>;

    async fn mark_outbox_retry(&self, id: i64, error: &str) -> Result<(), AppError>;

    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), AppError>;
}
