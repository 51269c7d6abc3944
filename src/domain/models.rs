use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::common::error::AppError;
use crate::common::money::Currency;

pub const STATUS_COMPLETED: &str = "completed";

// Implements `as_str` / `FromStr` for the lowercase text statuses stored in
// the database.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::Internal(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Frozen,
    Closed,
}

text_enum!(AccountStatus {
    Active => "active",
    Frozen => "frozen",
    Closed => "closed",
});

/// A bank account as read from storage.
///
/// The balance has no public setter: the only way to persist a new balance is
/// through a `LockedAccount`, which only the ledger can hand out while the
/// account's row lock is held.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub account_number: String,
    pub customer_id: i64,
    balance: Decimal,
    pub currency: Currency,
    pub account_type: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: i64,
        account_number: String,
        customer_id: i64,
        balance: Decimal,
        currency: Currency,
        account_type: String,
        status: AccountStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Account {
            id,
            account_number,
            customer_id,
            balance,
            currency,
            account_type,
            status,
            created_at,
            updated_at,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    // Snapshot of the account after a committed mutation. Not a write path.
    pub(crate) fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_number: String,
    pub customer_id: i64,
    pub currency: Currency,
    pub account_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    TransferOut,
    TransferIn,
}

text_enum!(TransactionType {
    Payment => "payment",
    TransferOut => "transfer_out",
    TransferIn => "transfer_in",
});

/// One immutable balance movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: i64,
    pub transaction_id: String,
    pub account_id: i64,
    pub counter_account_id: Option<i64>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub status: String,
    pub remark: Option<String>,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerTransaction {
    pub transaction_id: String,
    pub account_id: i64,
    pub counter_account_id: Option<i64>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub remark: Option<String>,
    pub ref_id: Option<String>,
}

/// Outcome of one item inside a batch transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ItemResult {
    Completed {
        index: usize,
        transaction_id: String,
    },
    Failed {
        index: usize,
        error_code: String,
        message: String,
    },
}

impl ItemResult {
    pub fn index(&self) -> usize {
        match self {
            ItemResult::Completed { index, .. } | ItemResult::Failed { index, .. } => *index,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ItemResult::Completed { .. })
    }

    pub fn failed(index: usize, err: &AppError) -> Self {
        ItemResult::Failed {
            index,
            error_code: err.code().to_string(),
            message: err.message(),
        }
    }
}

pub const BATCH_RESULT_VERSION: u32 = 1;

/// Storage envelope for batch results; the only place they become JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredBatchResults {
    pub version: u32,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Reserved; items may be executing.
    #[default]
    Processing,
    Completed,
}

text_enum!(BatchStatus {
    Processing => "processing",
    Completed => "completed",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransferRecord {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub results: Vec<ItemResult>,
    pub created_at: DateTime<Utc>,
}

impl BatchTransferRecord {
    /// Builds the record from results already sorted by item index.
    pub fn from_results(batch_id: String, results: Vec<ItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.is_completed()).count() as i32;
        let total_count = results.len() as i32;
        BatchTransferRecord {
            batch_id,
            status: BatchStatus::Completed,
            total_count,
            success_count,
            failed_count: total_count - success_count,
            results,
            created_at: Utc::now(),
        }
    }

    /// Placeholder row that holds the batch id while the items run.
    pub fn reserved(batch_id: String) -> Self {
        BatchTransferRecord {
            batch_id,
            status: BatchStatus::Processing,
            total_count: 0,
            success_count: 0,
            failed_count: 0,
            results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn results_json(&self) -> Result<serde_json::Value, AppError> {
        Ok(serde_json::to_value(StoredBatchResults {
            version: BATCH_RESULT_VERSION,
            items: self.results.clone(),
        })?)
    }

    pub fn parse_results(value: serde_json::Value) -> Result<Vec<ItemResult>, AppError> {
        let stored: StoredBatchResults = serde_json::from_value(value)?;
        if stored.version != BATCH_RESULT_VERSION {
            return Err(AppError::Internal(format!(
                "unsupported batch result version {}",
                stored.version
            )));
        }
        Ok(stored.items)
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(ScheduledStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransfer {
    pub scheduled_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub scheduled_time: DateTime<Utc>,
    pub status: ScheduledStatus,
    pub transaction_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Failed,
}

text_enum!(OutboxStatus {
    Pending => "pending",
    Processing => "processing",
    Sent => "sent",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub headers: Option<serde_json::Value>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub headers: Option<serde_json::Value>,
}

/// Inclusive bounds on a row's creation time. A missing bound is open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<Self, AppError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::InvalidRequest("from must not be after to".into()));
            }
        }
        Ok(TimeRange { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Offset pagination, 1-based page numbers, page size capped at 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const MAX_SIZE: i64 = 100;

    pub fn new(page: i64, page_size: i64) -> Self {
        let limit = page_size.clamp(1, Self::MAX_SIZE);
        let offset = (page.max(1) - 1) * limit;
        Page { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(1, 20)
    }
}
