//! In-process `LedgerStore` used by the test suites.
//!
//! Row locks are per-row `tokio` mutexes held by the unit of work until it is
//! committed or dropped. Writes are staged on the unit of work and applied to
//! the shared tables in one step on commit, so other readers never observe a
//! half-applied operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::common::error::AppError;
use crate::domain::models::{
    Account, AccountStatus, BatchTransferRecord, LedgerTransaction, NewAccount,
    BatchStatus, NewLedgerTransaction, NewOutboxEvent, OutboxEvent, OutboxStatus, Page,
    ScheduledStatus, ScheduledTransfer, TimeRange, STATUS_COMPLETED,
};
use crate::ledger::lock::LockedAccount;

use super::adapter::{LedgerStore, LockMode, UnitOfWork};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    transactions: Vec<LedgerTransaction>,
    batches: HashMap<String, BatchTransferRecord>,
    scheduled: HashMap<String, ScheduledTransfer>,
    outbox: BTreeMap<i64, OutboxEvent>,
    next_account_id: i64,
    next_transaction_id: i64,
    next_outbox_id: i64,
}

impl Tables {
    fn ref_exists(&self, ref_id: &str) -> bool {
        self.transactions
            .iter()
            .any(|t| t.ref_id.as_deref() == Some(ref_id))
    }

    fn transaction_id_exists(&self, transaction_id: &str) -> bool {
        self.transactions
            .iter()
            .any(|t| t.transaction_id == transaction_id)
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    account_rows: Mutex<HashMap<i64, Arc<RowLock<()>>>>,
    scheduled_rows: Mutex<HashMap<String, Arc<RowLock<()>>>>,
    failing_sent: Mutex<HashSet<i64>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_row(&self, id: i64) -> Arc<RowLock<()>> {
        self.inner
            .account_rows
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }

    fn scheduled_row(&self, scheduled_id: &str) -> Arc<RowLock<()>> {
        self.inner
            .scheduled_rows
            .lock()
            .entry(scheduled_id.to_string())
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }

    pub fn seed_account(&self, id: i64, customer_id: i64, balance: Decimal, status: AccountStatus) {
        let now = Utc::now();
        let mut tables = self.inner.tables.lock();
        tables.accounts.insert(
            id,
            Account::hydrate(
                id,
                format!("62{:014}", id),
                customer_id,
                balance,
                Default::default(),
                "savings".to_string(),
                status,
                now,
                now,
            ),
        );
        tables.next_account_id = tables.next_account_id.max(id);
    }

    pub fn seed_scheduled(&self, scheduled: ScheduledTransfer) {
        self.inner
            .tables
            .lock()
            .scheduled
            .insert(scheduled.scheduled_id.clone(), scheduled);
    }

    pub fn transactions(&self) -> Vec<LedgerTransaction> {
        self.inner.tables.lock().transactions.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.tables.lock().transactions.len()
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.inner.tables.lock().outbox.values().cloned().collect()
    }

    /// Makes `mark_outbox_sent` fail for one event id.
    pub fn fail_mark_sent(&self, id: i64) {
        self.inner.failing_sent.lock().insert(id);
    }

    pub fn total_balance(&self) -> Decimal {
        self.inner
            .tables
            .lock()
            .accounts
            .values()
            .map(|a| a.balance())
            .sum()
    }
}

enum Staged {
    Balance(i64, Decimal),
    Status(i64, AccountStatus),
    Account(Account),
    Transaction(LedgerTransaction),
    Outbox(OutboxEvent),
    Scheduled(ScheduledTransfer),
}

pub struct MemoryUnitOfWork {
    store: MemoryStore,
    guards: Vec<OwnedMutexGuard<()>>,
    held_accounts: HashSet<i64>,
    held_scheduled: HashSet<String>,
    staged: Vec<Staged>,
}

impl MemoryUnitOfWork {
    // Committed row overlaid with this unit of work's own staged writes.
    fn visible_account(&self, id: i64) -> Option<Account> {
        let mut account = self.store.inner.tables.lock().accounts.get(&id).cloned();
        for staged in &self.staged {
            match staged {
                Staged::Account(new) if new.id == id => account = Some(new.clone()),
                Staged::Balance(aid, balance) if *aid == id => {
                    account = account.map(|a| a.with_balance(*balance))
                }
                Staged::Status(aid, status) if *aid == id => {
                    if let Some(a) = account.as_mut() {
                        a.status = *status;
                    }
                }
                _ => {}
            }
        }
        account
    }

    fn visible_scheduled(&self, scheduled_id: &str) -> Option<ScheduledTransfer> {
        let staged = self.staged.iter().rev().find_map(|s| match s {
            Staged::Scheduled(row) if row.scheduled_id == scheduled_id => Some(row.clone()),
            _ => None,
        });
        staged.or_else(|| {
            self.store
                .inner
                .tables
                .lock()
                .scheduled
                .get(scheduled_id)
                .cloned()
        })
    }

    fn staged_ref_exists(&self, ref_id: &str) -> bool {
        self.staged.iter().any(|s| match s {
            Staged::Transaction(t) => t.ref_id.as_deref() == Some(ref_id),
            _ => false,
        })
    }

    fn ensure_held(&self, id: i64) -> Result<(), AppError> {
        if !self.held_accounts.contains(&id) {
            return Err(AppError::Internal(format!(
                "account {} written without its row lock",
                id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn select_account_for_update(&mut self, id: i64) -> Result<Option<Account>, AppError> {
        if self.visible_account(id).is_none() {
            return Ok(None);
        }
        if !self.held_accounts.contains(&id) {
            let guard = self.store.account_row(id).lock_owned().await;
            self.guards.push(guard);
            self.held_accounts.insert(id);
        }
        Ok(self.visible_account(id))
    }

    async fn store_balance(&mut self, account: &LockedAccount) -> Result<(), AppError> {
        self.ensure_held(account.id())?;
        self.staged
            .push(Staged::Balance(account.id(), account.balance()));
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        account: &LockedAccount,
        status: AccountStatus,
    ) -> Result<(), AppError> {
        self.ensure_held(account.id())?;
        self.staged.push(Staged::Status(account.id(), status));
        Ok(())
    }

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, AppError> {
        let now = Utc::now();
        let id = {
            let mut tables = self.store.inner.tables.lock();
            if tables
                .accounts
                .values()
                .any(|a| a.account_number == account.account_number)
            {
                return Err(AppError::Conflict("duplicate account_number".into()));
            }
            tables.next_account_id += 1;
            tables.next_account_id
        };
        let created = Account::hydrate(
            id,
            account.account_number,
            account.customer_id,
            Decimal::ZERO,
            account.currency,
            account.account_type,
            AccountStatus::Active,
            now,
            now,
        );
        self.staged.push(Staged::Account(created.clone()));
        Ok(created)
    }

    async fn find_transaction_by_ref(
        &mut self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        let staged = self.staged.iter().find_map(|s| match s {
            Staged::Transaction(t) if t.ref_id.as_deref() == Some(ref_id) => Some(t.clone()),
            _ => None,
        });
        if staged.is_some() {
            return Ok(staged);
        }
        self.store.find_transaction_by_ref(ref_id).await
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, AppError> {
        self.ensure_held(transaction.account_id)?;
        if let Some(ref_id) = transaction.ref_id.as_deref() {
            if self.staged_ref_exists(ref_id) {
                return Err(AppError::Conflict(format!("duplicate ref_id {}", ref_id)));
            }
        }
        let id = {
            let mut tables = self.store.inner.tables.lock();
            if let Some(ref_id) = transaction.ref_id.as_deref() {
                if tables.ref_exists(ref_id) {
                    return Err(AppError::Conflict(format!("duplicate ref_id {}", ref_id)));
                }
            }
            tables.next_transaction_id += 1;
            tables.next_transaction_id
        };
        let row = LedgerTransaction {
            id,
            transaction_id: transaction.transaction_id,
            account_id: transaction.account_id,
            counter_account_id: transaction.counter_account_id,
            amount: transaction.amount,
            transaction_type: transaction.transaction_type,
            status: STATUS_COMPLETED.to_string(),
            remark: transaction.remark,
            ref_id: transaction.ref_id,
            created_at: Utc::now(),
        };
        self.staged.push(Staged::Transaction(row.clone()));
        Ok(row)
    }

    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<i64, AppError> {
        let now = Utc::now();
        let id = {
            let mut tables = self.store.inner.tables.lock();
            tables.next_outbox_id += 1;
            tables.next_outbox_id
        };
        self.staged.push(Staged::Outbox(OutboxEvent {
            id,
            event_type: event.event_type,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            idempotency_key: event.idempotency_key,
            payload: event.payload,
            headers: event.headers,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }));
        Ok(id)
    }

    async fn lock_scheduled(
        &mut self,
        scheduled_id: &str,
        mode: LockMode,
    ) -> Result<Option<ScheduledTransfer>, AppError> {
        if self.visible_scheduled(scheduled_id).is_none() {
            return Ok(None);
        }
        if !self.held_scheduled.contains(scheduled_id) {
            let row = self.store.scheduled_row(scheduled_id);
            let guard = match mode {
                LockMode::Wait => row.lock_owned().await,
                LockMode::SkipLocked => match row.try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => return Ok(None),
                },
            };
            self.guards.push(guard);
            self.held_scheduled.insert(scheduled_id.to_string());
        }
        Ok(self.visible_scheduled(scheduled_id))
    }

    async fn insert_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError> {
        if self.visible_scheduled(&scheduled.scheduled_id).is_some() {
            return Err(AppError::Conflict(format!(
                "duplicate scheduled_id {}",
                scheduled.scheduled_id
            )));
        }
        self.staged.push(Staged::Scheduled(scheduled.clone()));
        Ok(())
    }

    async fn update_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError> {
        if !self.held_scheduled.contains(&scheduled.scheduled_id) {
            return Err(AppError::Internal(format!(
                "scheduled transfer {} written without its row lock",
                scheduled.scheduled_id
            )));
        }
        let mut row = scheduled.clone();
        row.updated_at = Utc::now();
        self.staged.push(Staged::Scheduled(row));
        Ok(())
    }

    async fn commit(self) -> Result<(), AppError> {
        let mut tables = self.store.inner.tables.lock();

        // A concurrent unit of work may have committed the same unique key
        // after our insert-time check.
        for staged in &self.staged {
            match staged {
                Staged::Transaction(t) => {
                    if t.ref_id.as_deref().is_some_and(|r| tables.ref_exists(r))
                        || tables.transaction_id_exists(&t.transaction_id)
                    {
                        return Err(AppError::Conflict(format!(
                            "duplicate transaction {}",
                            t.transaction_id
                        )));
                    }
                }
                Staged::Account(a) => {
                    if tables
                        .accounts
                        .values()
                        .any(|existing| existing.account_number == a.account_number)
                    {
                        return Err(AppError::Conflict("duplicate account_number".into()));
                    }
                }
                _ => {}
            }
        }

        let now = Utc::now();
        for staged in self.staged {
            match staged {
                Staged::Balance(id, balance) => {
                    if let Some(account) = tables.accounts.remove(&id) {
                        let mut account = account.with_balance(balance);
                        account.updated_at = now;
                        tables.accounts.insert(id, account);
                    }
                }
                Staged::Status(id, status) => {
                    if let Some(account) = tables.accounts.get_mut(&id) {
                        account.status = status;
                        account.updated_at = now;
                    }
                }
                Staged::Account(account) => {
                    tables.accounts.insert(account.id, account);
                }
                Staged::Transaction(row) => tables.transactions.push(row),
                Staged::Outbox(event) => {
                    tables.outbox.insert(event.id, event);
                }
                Staged::Scheduled(row) => {
                    tables.scheduled.insert(row.scheduled_id.clone(), row);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Uow = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, AppError> {
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            guards: Vec::new(),
            held_accounts: HashSet::new(),
            held_scheduled: HashSet::new(),
            staged: Vec::new(),
        })
    }

    async fn find_account(&self, id: i64) -> Result<Option<Account>, AppError> {
        Ok(self.inner.tables.lock().accounts.get(&id).cloned())
    }

    async fn find_accounts(&self, ids: &[i64]) -> Result<Vec<Account>, AppError> {
        let tables = self.inner.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.accounts.get(id).cloned())
            .collect())
    }

    async fn find_transaction_by_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        Ok(self
            .inner
            .tables
            .lock()
            .transactions
            .iter()
            .find(|t| t.ref_id.as_deref() == Some(ref_id))
            .cloned())
    }

    async fn list_accounts(
        &self,
        customer_id: Option<i64>,
        status: Option<AccountStatus>,
        page: Page,
    ) -> Result<Vec<Account>, AppError> {
        let tables = self.inner.tables.lock();
        let mut rows: Vec<_> = tables
            .accounts
            .values()
            .filter(|a| customer_id.map_or(true, |wanted| a.customer_id == wanted))
            .filter(|a| status.map_or(true, |wanted| a.status == wanted))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn list_transactions(
        &self,
        account_id: i64,
        range: TimeRange,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let tables = self.inner.tables.lock();
        Ok(tables
            .transactions
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id && range.contains(t.created_at))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn find_batch(&self, batch_id: &str) -> Result<Option<BatchTransferRecord>, AppError> {
        Ok(self.inner.tables.lock().batches.get(batch_id).cloned())
    }

    async fn reserve_batch(&self, batch_id: &str) -> Result<(), AppError> {
        let mut tables = self.inner.tables.lock();
        if tables.batches.contains_key(batch_id) {
            return Err(AppError::Conflict(format!("duplicate batch_id {}", batch_id)));
        }
        tables.batches.insert(
            batch_id.to_string(),
            BatchTransferRecord::reserved(batch_id.to_string()),
        );
        Ok(())
    }

    async fn complete_batch(&self, record: &BatchTransferRecord) -> Result<(), AppError> {
        let mut tables = self.inner.tables.lock();
        match tables.batches.get_mut(&record.batch_id) {
            Some(row) if row.status == BatchStatus::Processing => {
                // Same envelope the Postgres store persists.
                *row = BatchTransferRecord {
                    results: BatchTransferRecord::parse_results(record.results_json()?)?,
                    status: BatchStatus::Completed,
                    created_at: row.created_at,
                    ..record.clone()
                };
                Ok(())
            }
            _ => Err(AppError::Conflict(format!(
                "batch {} is not awaiting results",
                record.batch_id
            ))),
        }
    }

    async fn release_batch(&self, batch_id: &str) -> Result<(), AppError> {
        let mut tables = self.inner.tables.lock();
        if tables
            .batches
            .get(batch_id)
            .is_some_and(|row| row.status == BatchStatus::Processing)
        {
            tables.batches.remove(batch_id);
        }
        Ok(())
    }

    async fn find_scheduled(
        &self,
        scheduled_id: &str,
    ) -> Result<Option<ScheduledTransfer>, AppError> {
        Ok(self.inner.tables.lock().scheduled.get(scheduled_id).cloned())
    }

    async fn list_scheduled(
        &self,
        from_account_id: i64,
        status: Option<ScheduledStatus>,
        page: Page,
    ) -> Result<Vec<ScheduledTransfer>, AppError> {
        let tables = self.inner.tables.lock();
        let mut rows: Vec<_> = tables
            .scheduled
            .values()
            .filter(|s| s.from_account_id == from_account_id)
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>, AppError> {
        let tables = self.inner.tables.lock();
        let mut due: Vec<_> = tables
            .scheduled
            .values()
            .filter(|s| s.status == ScheduledStatus::Pending && s.scheduled_time <= now)
            .collect();
        due.sort_by_key(|s| s.scheduled_time);
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|s| s.scheduled_id.clone())
            .collect())
    }

    async fn claim_outbox(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, AppError> {
        let now = Utc::now();
        let mut tables = self.inner.tables.lock();
        let mut pending: Vec<_> = tables
            .outbox
            .values_mut()
            .filter(|e| {
                e.status == OutboxStatus::Pending
                    || (e.status == OutboxStatus::Processing && e.updated_at <= stale_before)
            })
            .collect();
        pending.sort_by_key(|e| (e.created_at, e.id));
        Ok(pending
            .into_iter()
            .take(limit as usize)
            .map(|event| {
                event.status = OutboxStatus::Processing;
                event.updated_at = now;
                event.clone()
            })
            .collect())
    }

    async fn mark_outbox_sent(&self, id: i64) -> Result<(), AppError> {
        if self.inner.failing_sent.lock().contains(&id) {
            return Err(AppError::Internal(format!("outbox event {} could not be updated", id)));
        }
        let now = Utc::now();
        if let Some(event) = self.inner.tables.lock().outbox.get_mut(&id) {
            event.status = OutboxStatus::Sent;
            event.sent_at = Some(now);
            event.updated_at = now;
        }
        Ok(())
    }

    async fn mark_outbox_retry(&self, id: i64, error: &str) -> Result<(), AppError> {
        if let Some(event) = self.inner.tables.lock().outbox.get_mut(&id) {
            event.status = OutboxStatus::Pending;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), AppError> {
        if let Some(event) = self.inner.tables.lock().outbox.get_mut(&id) {
            event.status = OutboxStatus::Failed;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_and_dropped() {
        let store = MemoryStore::new();
        store.seed_account(1, 1, dec!(10.00), AccountStatus::Active);

        let mut uow = store.begin().await.unwrap();
        uow.select_account_for_update(1).await.unwrap();
        uow.insert_outbox_event(NewOutboxEvent {
            event_type: "TRANSFER_COMPLETED".into(),
            aggregate_type: "transfer".into(),
            aggregate_id: "TX1O".into(),
            idempotency_key: "TX1O".into(),
            payload: serde_json::json!({}),
            headers: None,
        })
        .await
        .unwrap();
        assert!(store.outbox_events().is_empty());
        drop(uow);

        assert!(store.outbox_events().is_empty());
        // lock released by drop
        let mut again = store.begin().await.unwrap();
        let locked = tokio::time::timeout(
            Duration::from_millis(200),
            again.select_account_for_update(1),
        )
        .await;
        assert!(locked.is_ok());
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_unit_of_work() {
        let store = MemoryStore::new();
        store.seed_account(1, 1, dec!(10.00), AccountStatus::Active);

        let mut first = store.begin().await.unwrap();
        first.select_account_for_update(1).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            second.select_account_for_update(1),
        )
        .await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();
        assert!(second.select_account_for_update(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skip_locked_returns_none_for_held_row() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.seed_scheduled(ScheduledTransfer {
            scheduled_id: "S1".into(),
            from_account_id: 1,
            to_account_id: 2,
            amount: dec!(1.00),
            scheduled_time: now,
            status: ScheduledStatus::Pending,
            transaction_id: None,
            retry_count: 0,
            error_message: None,
            remark: None,
            created_at: now,
            updated_at: now,
        });

        let mut first = store.begin().await.unwrap();
        assert!(first
            .lock_scheduled("S1", LockMode::SkipLocked)
            .await
            .unwrap()
            .is_some());
        let mut second = store.begin().await.unwrap();
        assert!(second
            .lock_scheduled("S1", LockMode::SkipLocked)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_outbox_flips_pending_once() {
        let store = MemoryStore::new();
        store.seed_account(1, 1, dec!(10.00), AccountStatus::Active);
        let mut uow = store.begin().await.unwrap();
        for key in ["A", "B", "C"] {
            uow.insert_outbox_event(NewOutboxEvent {
                event_type: "TRANSFER_COMPLETED".into(),
                aggregate_type: "transfer".into(),
                aggregate_id: key.into(),
                idempotency_key: key.into(),
                payload: serde_json::json!({}),
                headers: None,
            })
            .await
            .unwrap();
        }
        uow.commit().await.unwrap();

        let stale_before = Utc::now() - chrono::Duration::minutes(5);
        let first = store.claim_outbox(2, stale_before).await.unwrap();
        let second = store.claim_outbox(2, stale_before).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].aggregate_id, "A");
        assert!(store.claim_outbox(2, stale_before).await.unwrap().is_empty());

        // Rows stuck in processing come back once they are older than the cutoff.
        let reclaimed = store
            .claim_outbox(10, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_reservation_lifecycle() {
        let store = MemoryStore::new();
        store.reserve_batch("B1").await.unwrap();
        assert!(matches!(
            store.reserve_batch("B1").await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(
            store.find_batch("B1").await.unwrap().unwrap().status,
            BatchStatus::Processing
        );

        let record = BatchTransferRecord::from_results("B1".into(), vec![]);
        store.complete_batch(&record).await.unwrap();
        assert_eq!(
            store.find_batch("B1").await.unwrap().unwrap().status,
            BatchStatus::Completed
        );
        assert!(matches!(
            store.complete_batch(&record).await,
            Err(AppError::Conflict(_))
        ));

        // Completed rows survive a release.
        store.release_batch("B1").await.unwrap();
        assert!(store.find_batch("B1").await.unwrap().is_some());

        store.reserve_batch("B2").await.unwrap();
        store.release_batch("B2").await.unwrap();
        assert!(store.find_batch("B2").await.unwrap().is_none());
        store.reserve_batch("B2").await.unwrap();
    }
}
