use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::error::AppError;

use super::models::NewOutboxEvent;

pub const PAYMENT_DEBIT_COMPLETED: &str = "PAYMENT_DEBIT_COMPLETED";
pub const TRANSFER_COMPLETED: &str = "TRANSFER_COMPLETED";
pub const BATCH_TRANSFER_ITEM_COMPLETED: &str = "BATCH_TRANSFER_ITEM_COMPLETED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebitCompleted {
    pub transaction_id: String,
    pub account_id: i64,
    pub amount: Decimal,
    pub ref_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompleted {
    pub tx_out_id: String,
    pub tx_in_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemCompleted {
    pub batch_id: String,
    pub index: usize,
    #[serde(flatten)]
    pub transfer: TransferCompleted,
}

/// Domain events recorded in the outbox alongside the mutation they describe.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    PaymentDebitCompleted(DebitCompleted),
    TransferCompleted(TransferCompleted),
    BatchTransferItemCompleted(BatchItemCompleted),
}

impl LedgerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::PaymentDebitCompleted(_) => PAYMENT_DEBIT_COMPLETED,
            LedgerEvent::TransferCompleted(_) => TRANSFER_COMPLETED,
            LedgerEvent::BatchTransferItemCompleted(_) => BATCH_TRANSFER_ITEM_COMPLETED,
        }
    }

    pub fn event_version(&self) -> &'static str {
        "1.0"
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            LedgerEvent::PaymentDebitCompleted(_) => "payment",
            LedgerEvent::TransferCompleted(_) => "transfer",
            LedgerEvent::BatchTransferItemCompleted(_) => "batch-transfer",
        }
    }

    /// The payment's ref id for debits, the outgoing leg id for transfers.
    pub fn aggregate_id(&self) -> &str {
        match self {
            LedgerEvent::PaymentDebitCompleted(e) => &e.ref_id,
            LedgerEvent::TransferCompleted(e) => &e.tx_out_id,
            LedgerEvent::BatchTransferItemCompleted(e) => &e.transfer.tx_out_id,
        }
    }

    fn payload(&self) -> Result<serde_json::Value, AppError> {
        let value = match self {
            LedgerEvent::PaymentDebitCompleted(e) => serde_json::to_value(e)?,
            LedgerEvent::TransferCompleted(e) => serde_json::to_value(e)?,
            LedgerEvent::BatchTransferItemCompleted(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    pub fn to_outbox(&self) -> Result<NewOutboxEvent, AppError> {
        Ok(NewOutboxEvent {
            event_type: self.event_type().to_string(),
            aggregate_type: self.aggregate_type().to_string(),
            aggregate_id: self.aggregate_id().to_string(),
            idempotency_key: self.aggregate_id().to_string(),
            payload: self.payload()?,
            headers: Some(serde_json::json!({ "event_version": self.event_version() })),
        })
    }
}
