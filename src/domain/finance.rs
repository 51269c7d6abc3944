use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::error::AppError;
use crate::common::money::Currency;

use super::models::{AccountStatus, BatchTransferRecord, ItemResult, STATUS_COMPLETED};

/// Column widths of `transactions.ref_id` and the `remark` columns.
pub const MAX_REF_ID_LEN: usize = 64;
pub const MAX_REMARK_LEN: usize = 255;

/// Rejects a value that would not fit its column.
pub fn ensure_max_len(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.chars().count() > max {
        return Err(AppError::InvalidRequest(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

pub fn ensure_remark_fits(remark: Option<&str>, max: usize) -> Result<(), AppError> {
    match remark {
        Some(remark) => ensure_max_len("remark", remark, max),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub account_id: i64,
    pub amount: Decimal,
    pub ref_id: String,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebitReceipt {
    pub transaction_id: String,
    pub account_id: i64,
    pub amount: Decimal,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    /// Id of the outgoing leg.
    pub transaction_id: String,
    pub counter_transaction_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub status: String,
}

impl TransferReceipt {
    pub fn completed(
        transaction_id: String,
        counter_transaction_id: String,
        request: &TransferRequest,
        amount: Decimal,
    ) -> Self {
        TransferReceipt {
            transaction_id,
            counter_transaction_id,
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount,
            status: STATUS_COMPLETED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransferRequest {
    pub batch_id: String,
    pub transfers: Vec<TransferRequest>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransferReceipt {
    pub batch_id: String,
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub results: Vec<ItemResult>,
}

impl From<BatchTransferRecord> for BatchTransferReceipt {
    fn from(record: BatchTransferRecord) -> Self {
        BatchTransferReceipt {
            batch_id: record.batch_id,
            total_count: record.total_count,
            success_count: record.success_count,
            failed_count: record.failed_count,
            results: record.results,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub scheduled_time: DateTime<Utc>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub customer_id: i64,
    pub account_type: String,
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountStatusRequest {
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountListParams {
    pub customer_id: Option<i64>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// `from` and `to` are ISO-8601 instants, e.g. `2024-08-01T00:00:00Z`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub account_id: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<String>,
}
