use std::sync::Arc;

use tracing::{debug, error};

use crate::client::payment::{PaymentCallback, PaymentClient};
use crate::common::error::AppError;
use crate::domain::events::PAYMENT_DEBIT_COMPLETED;
use crate::domain::models::{OutboxEvent, OutboxStatus, STATUS_COMPLETED};
use crate::repository::adapter::LedgerStore;

use super::journal::OutboxJournal;

/// Where a claimed event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    PaymentCallback,
    /// No downstream consumer yet; the event is marked sent as claimed.
    Acknowledge,
}

pub struct OutboxRoute;

impl OutboxRoute {
    pub fn route(event_type: &str) -> Delivery {
        if event_type.eq_ignore_ascii_case(PAYMENT_DEBIT_COMPLETED) {
            Delivery::PaymentCallback
        } else {
            Delivery::Acknowledge
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    /// Events whose outcome could not be recorded. They stay `processing`
    /// until the reclaim window passes.
    pub errors: usize,
}

#[derive(Clone)]
pub struct OutboxPublisher<S: LedgerStore> {
    journal: OutboxJournal<S>,
    payment: Arc<dyn PaymentClient>,
    batch_size: i64,
}

impl<S: LedgerStore> OutboxPublisher<S> {
    pub fn new(journal: OutboxJournal<S>, payment: Arc<dyn PaymentClient>, batch_size: i64) -> Self {
        OutboxPublisher {
            journal,
            payment,
            batch_size: batch_size.clamp(1, 200),
        }
    }

    /// Claims one batch and delivers it. A failing event, or one whose
    /// outcome cannot be stored, is logged and the loop moves on.
    pub async fn drain_once(&self) -> Result<DrainStats, AppError> {
        let events = self.journal.claim_batch(self.batch_size).await?;
        let mut stats = DrainStats {
            claimed: events.len(),
            ..Default::default()
        };

        for event in events {
            match self.publish(&event).await {
                Ok(()) => match self.journal.mark_sent(&event).await {
                    Ok(()) => stats.sent += 1,
                    Err(err) => {
                        stats.errors += 1;
                        error!(outbox_id = event.id, "failed to mark outbox event sent: {:?}", err);
                    }
                },
                Err(err) => {
                    let detail = err.to_string();
                    match self.journal.record_failure(&event, &detail).await {
                        Ok(OutboxStatus::Failed) => stats.failed += 1,
                        Ok(_) => stats.retried += 1,
                        Err(err) => {
                            stats.errors += 1;
                            error!(outbox_id = event.id, "failed to record outbox failure: {:?}", err);
                        }
                    }
                }
            }
        }
        Ok(stats)
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<(), AppError> {
        match OutboxRoute::route(&event.event_type) {
            Delivery::PaymentCallback => self.payment.send_callback(payment_callback(event)).await,
            Delivery::Acknowledge => {
                debug!(outbox_id = event.id, event_type = %event.event_type, "no delivery route, marking sent");
                Ok(())
            }
        }
    }
}

fn payment_callback(event: &OutboxEvent) -> PaymentCallback {
    let payload = &event.payload;
    let text = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let payment_id = if event.aggregate_id.trim().is_empty() {
        text("refId").unwrap_or_default()
    } else {
        event.aggregate_id.clone()
    };
    PaymentCallback {
        payment_id,
        status: text("status").unwrap_or_else(|| STATUS_COMPLETED.to_string()),
        gateway_order_id: text("transactionId"),
        code: "CB000".to_string(),
        message: "core-bank debit completed".to_string(),
    }
}
