use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::common::error::AppError;
use crate::common::money::Currency;
use crate::domain::models::{
    Account, AccountStatus, BatchTransferRecord, LedgerTransaction, NewAccount,
    NewLedgerTransaction, NewOutboxEvent, OutboxEvent, Page, ScheduledStatus, ScheduledTransfer, TimeRange,
};
use crate::ledger::lock::LockedAccount;

use super::adapter::{LedgerStore, LockMode, UnitOfWork};

const ACCOUNT_COLUMNS: &str = "id, account_number, customer_id, balance, currency, account_type, \
     status, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, transaction_id, account_id, counter_account_id, amount, \
     transaction_type, status, remark, ref_id, created_at";
const SCHEDULED_COLUMNS: &str = "scheduled_id, from_account_id, to_account_id, amount, \
     scheduled_time, status, transaction_id, retry_count, error_message, remark, created_at, \
     updated_at";
const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, idempotency_key, \
     payload, headers, status, attempts, last_error, created_at, updated_at, sent_at";

fn account_from_row(row: &PgRow) -> Result<Account, AppError> {
    let currency: String = row.try_get("currency")?;
    let status: String = row.try_get("status")?;
    Ok(Account::hydrate(
        row.try_get("id")?,
        row.try_get("account_number")?,
        row.try_get("customer_id")?,
        row.try_get("balance")?,
        currency
            .parse::<Currency>()
            .map_err(|_| AppError::Internal(format!("unknown currency {}", currency)))?,
        row.try_get("account_type")?,
        status.parse::<AccountStatus>()?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    ))
}

fn transaction_from_row(row: &PgRow) -> Result<LedgerTransaction, AppError> {
    let transaction_type: String = row.try_get("transaction_type")?;
    Ok(LedgerTransaction {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        account_id: row.try_get("account_id")?,
        counter_account_id: row.try_get("counter_account_id")?,
        amount: row.try_get("amount")?,
        transaction_type: transaction_type.parse()?,
        status: row.try_get("status")?,
        remark: row.try_get("remark")?,
        ref_id: row.try_get("ref_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn scheduled_from_row(row: &PgRow) -> Result<ScheduledTransfer, AppError> {
    let status: String = row.try_get("status")?;
    Ok(ScheduledTransfer {
        scheduled_id: row.try_get("scheduled_id")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        scheduled_time: row.try_get("scheduled_time")?,
        status: status.parse()?,
        transaction_id: row.try_get("transaction_id")?,
        retry_count: row.try_get("retry_count")?,
        error_message: row.try_get("error_message")?,
        remark: row.try_get("remark")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEvent, AppError> {
    let status: String = row.try_get("status")?;
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payload: row.try_get("payload")?,
        headers: row.try_get("headers")?,
        status: status.parse()?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<BatchTransferRecord, AppError> {
    let status: String = row.try_get("status")?;
    Ok(BatchTransferRecord {
        batch_id: row.try_get("batch_id")?,
        status: status.parse()?,
        total_count: row.try_get("total_count")?,
        success_count: row.try_get("success_count")?,
        failed_count: row.try_get("failed_count")?,
        results: BatchTransferRecord::parse_results(row.try_get("result_json")?)?,
        created_at: row.try_get("created_at")?,
    })
}

/// A Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn select_account_for_update(&mut self, id: i64) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn store_balance(&mut self, account: &LockedAccount) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(account.id())
            .bind(account.balance())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        account: &LockedAccount,
        status: AccountStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE accounts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(account.id())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_account(&mut self, account: NewAccount) -> Result<Account, AppError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO accounts (account_number, customer_id, balance, currency, account_type, status)
               VALUES ($1, $2, 0, $3, $4, 'active')
               RETURNING {}"#,
            ACCOUNT_COLUMNS
        ))
        .bind(&account.account_number)
        .bind(account.customer_id)
        .bind(account.currency.to_string())
        .bind(&account.account_type)
        .fetch_one(&mut *self.tx)
        .await?;
        account_from_row(&row)
    }

    async fn find_transaction_by_ref(
        &mut self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE ref_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(ref_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, AppError> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO transactions
                   (transaction_id, account_id, counter_account_id, amount, transaction_type,
                    status, remark, ref_id)
               VALUES ($1, $2, $3, $4, $5, 'completed', $6, $7)
               RETURNING {}"#,
            TRANSACTION_COLUMNS
        ))
        .bind(&transaction.transaction_id)
        .bind(transaction.account_id)
        .bind(transaction.counter_account_id)
        .bind(transaction.amount)
        .bind(transaction.transaction_type.as_str())
        .bind(&transaction.remark)
        .bind(&transaction.ref_id)
        .fetch_one(&mut *self.tx)
        .await?;
        transaction_from_row(&row)
    }

    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO outbox_events
                   (event_type, aggregate_type, aggregate_id, idempotency_key, payload, headers,
                    status, attempts)
               VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0)
               RETURNING id"#,
        )
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.idempotency_key)
        .bind(&event.payload)
        .bind(&event.headers)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn lock_scheduled(
        &mut self,
        scheduled_id: &str,
        mode: LockMode,
    ) -> Result<Option<ScheduledTransfer>, AppError> {
        let lock = match mode {
            LockMode::Wait => "FOR UPDATE",
            LockMode::SkipLocked => "FOR UPDATE SKIP LOCKED",
        };
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_transfers WHERE scheduled_id = $1 {}",
            SCHEDULED_COLUMNS, lock
        ))
        .bind(scheduled_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(scheduled_from_row).transpose()
    }

    async fn insert_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO scheduled_transfers
                   (scheduled_id, from_account_id, to_account_id, amount, scheduled_time, status,
                    transaction_id, retry_count, error_message, remark, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&scheduled.scheduled_id)
        .bind(scheduled.from_account_id)
        .bind(scheduled.to_account_id)
        .bind(scheduled.amount)
        .bind(scheduled.scheduled_time)
        .bind(scheduled.status.as_str())
        .bind(&scheduled.transaction_id)
        .bind(scheduled.retry_count)
        .bind(&scheduled.error_message)
        .bind(&scheduled.remark)
        .bind(scheduled.created_at)
        .bind(scheduled.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_scheduled(&mut self, scheduled: &ScheduledTransfer) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE scheduled_transfers
               SET status = $2, transaction_id = $3, retry_count = $4, error_message = $5,
                   updated_at = NOW()
               WHERE scheduled_id = $1"#,
        )
        .bind(&scheduled.scheduled_id)
        .bind(scheduled.status.as_str())
        .bind(&scheduled.transaction_id)
        .bind(scheduled.retry_count)
        .bind(&scheduled.error_message)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgPool {
    type Uow = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, AppError> {
        let tx = sqlx::Pool::begin(self).await?;
        Ok(PgUnitOfWork { tx })
    }

    async fn find_account(&self, id: i64) -> Result<Option<Account>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(self)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_accounts(&self, ids: &[i64]) -> Result<Vec<Account>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = ANY($1) ORDER BY id",
            ACCOUNT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(self)
        .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn find_transaction_by_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<LedgerTransaction>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE ref_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(ref_id)
        .fetch_optional(self)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_accounts(
        &self,
        customer_id: Option<i64>,
        status: Option<AccountStatus>,
        page: Page,
    ) -> Result<Vec<Account>, AppError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM accounts
               WHERE ($1::bigint IS NULL OR customer_id = $1)
                 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"#,
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id)
        .bind(status.map(|s| s.as_str()))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self)
        .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn list_transactions(
        &self,
        account_id: i64,
        range: TimeRange,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM transactions
               WHERE account_id = $1
                 AND ($2::timestamptz IS NULL OR created_at >= $2)
                 AND ($3::timestamptz IS NULL OR created_at <= $3)
               ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .bind(range.from)
        .bind(range.to)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn find_batch(&self, batch_id: &str) -> Result<Option<BatchTransferRecord>, AppError> {
        let row = sqlx::query(
            r#"SELECT batch_id, status, total_count, success_count, failed_count, result_json,
                      created_at
               FROM batch_transfers WHERE batch_id = $1"#,
        )
        .bind(batch_id)
        .fetch_optional(self)
        .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn reserve_batch(&self, batch_id: &str) -> Result<(), AppError> {
        let placeholder = BatchTransferRecord::reserved(batch_id.to_string());
        // The unique index on batch_id turns a second reservation into 23505.
        sqlx::query(
            r#"INSERT INTO batch_transfers (batch_id, status, result_json)
               VALUES ($1, 'processing', $2)"#,
        )
        .bind(batch_id)
        .bind(placeholder.results_json()?)
        .execute(self)
        .await?;
        Ok(())
    }

    async fn complete_batch(&self, record: &BatchTransferRecord) -> Result<(), AppError> {
        let done = sqlx::query(
            r#"UPDATE batch_transfers
               SET status = 'completed', total_count = $2, success_count = $3,
                   failed_count = $4, result_json = $5, updated_at = NOW()
               WHERE batch_id = $1 AND status = 'processing'"#,
        )
        .bind(&record.batch_id)
        .bind(record.total_count)
        .bind(record.success_count)
        .bind(record.failed_count)
        .bind(record.results_json()?)
        .execute(self)
        .await?;
        if done.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "batch {} is not awaiting results",
                record.batch_id
            )));
        }
        Ok(())
    }

    async fn release_batch(&self, batch_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM batch_transfers WHERE batch_id = $1 AND status = 'processing'")
            .bind(batch_id)
            .execute(self)
            .await?;
        Ok(())
    }

    async fn find_scheduled(
        &self,
        scheduled_id: &str,
    ) -> Result<Option<ScheduledTransfer>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_transfers WHERE scheduled_id = $1",
            SCHEDULED_COLUMNS
        ))
        .bind(scheduled_id)
        .fetch_optional(self)
        .await?;
        row.as_ref().map(scheduled_from_row).transpose()
    }

    async fn list_scheduled(
        &self,
        from_account_id: i64,
        status: Option<ScheduledStatus>,
        page: Page,
    ) -> Result<Vec<ScheduledTransfer>, AppError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM scheduled_transfers
               WHERE from_account_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC LIMIT $3 OFFSET $4"#,
            SCHEDULED_COLUMNS
        ))
        .bind(from_account_id)
        .bind(status.map(|s| s.as_str()))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self)
        .await?;
        rows.iter().map(scheduled_from_row).collect()
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            r#"SELECT scheduled_id FROM scheduled_transfers
               WHERE status = 'pending' AND scheduled_time <= $1
               ORDER BY scheduled_time LIMIT $2"#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self)
        .await?;
        rows.iter()
            .map(|r| r.try_get("scheduled_id").map_err(AppError::from))
            .collect()
    }

    async fn claim_outbox(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, AppError> {
        let rows = sqlx::query(&format!(
            r#"WITH cte AS (
                   SELECT id FROM outbox_events
                   WHERE status = 'pending'
                      OR (status = 'processing' AND updated_at <= $2)
                   ORDER BY created_at, id
                   FOR UPDATE SKIP LOCKED
                   LIMIT $1
               )
               UPDATE outbox_events o
               SET status = 'processing', updated_at = NOW()
               FROM cte
               WHERE o.id = cte.id
               RETURNING {}"#,
            OUTBOX_COLUMNS
                .split(", ")
                .map(|c| format!("o.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(limit)
        .bind(stale_before)
        .fetch_all(self)
        .await?;
        let mut events = rows
            .iter()
            .map(outbox_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the CTE's order.
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn mark_outbox_sent(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'sent', sent_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(self)
        .await?;
        Ok(())
    }

    async fn mark_outbox_retry(&self, id: i64, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE outbox_events
               SET status = 'pending', attempts = attempts + 1, last_error = $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(error)
        .execute(self)
        .await?;
        Ok(())
    }

    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE outbox_events
               SET status = 'failed', attempts = attempts + 1, last_error = $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(error)
        .execute(self)
        .await?;
        Ok(())
    }
}
