use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::common::error::{AppError, Resource};
use crate::domain::finance::{BatchTransferReceipt, BatchTransferRequest, TransferRequest};
use crate::domain::models::{Account, BatchStatus, BatchTransferRecord, ItemResult};
use crate::idempotency::{IdempotencyGuard, IdempotencyKey, PriorOutcome, Reservation};
use crate::repository::adapter::LedgerStore;
use crate::service::{BatchItemContext, TransactionService};

pub const ITEM_TIMEOUT_CODE: &str = "CBS004";
pub const MAX_BATCH_ID_LEN: usize = 64;
const ITEM_TIMEOUT_MESSAGE: &str = "execution timed out; outcome unknown";

#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_concurrency: usize,
    pub item_timeout: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            max_items: 100,
            max_concurrency: 10,
            item_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs the items of a batch in parallel, each as its own transfer with its
/// own unit of work. One item failing never affects another.
#[derive(Clone)]
pub struct BatchOrchestrator<S: LedgerStore> {
    store: S,
    service: TransactionService<S>,
    guard: IdempotencyGuard<S>,
    limits: BatchLimits,
    permits: Arc<Semaphore>,
}

impl<S: LedgerStore> BatchOrchestrator<S> {
    pub fn new(
        store: S,
        service: TransactionService<S>,
        guard: IdempotencyGuard<S>,
        limits: BatchLimits,
    ) -> Self {
        BatchOrchestrator {
            store,
            service,
            guard,
            permits: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
            limits,
        }
    }

    pub async fn get(&self, batch_id: &str) -> Result<BatchTransferReceipt, AppError> {
        // A reserved batch has no results to show yet.
        self.store
            .find_batch(batch_id)
            .await?
            .filter(|record| record.status == BatchStatus::Completed)
            .map(BatchTransferReceipt::from)
            .ok_or(AppError::NotFound(Resource::Batch))
    }

    pub async fn execute(
        &self,
        request: BatchTransferRequest,
    ) -> Result<BatchTransferReceipt, AppError> {
        let batch_id = request.batch_id.trim().to_string();
        if batch_id.is_empty() {
            return Err(AppError::InvalidRequest("batchId is required".into()));
        }
        if batch_id.chars().count() > MAX_BATCH_ID_LEN {
            return Err(AppError::InvalidRequest(format!(
                "batchId must be at most {} characters",
                MAX_BATCH_ID_LEN
            )));
        }
        if request.transfers.is_empty() {
            return Err(AppError::InvalidRequest("transfers must not be empty".into()));
        }
        if request.transfers.len() > self.limits.max_items {
            return Err(AppError::BatchTooLarge(self.limits.max_items));
        }

        match self
            .guard
            .check_or_reserve(&IdempotencyKey::Batch(batch_id.clone()))
            .await?
        {
            Reservation::Existing(PriorOutcome::Batch(record)) => return Ok(record.into()),
            Reservation::Existing(other) => {
                return Err(AppError::Internal(format!(
                    "unexpected prior outcome for batch: {:?}",
                    other
                )))
            }
            Reservation::Proceed => {}
        }

        // Nothing has run yet, so a failed lookup frees the id for a retry.
        let snapshot = match self.resolve_accounts(&request.transfers).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(err) => {
                if let Err(release_err) = self.store.release_batch(&batch_id).await {
                    error!(batch_id = %batch_id, "failed to release batch reservation: {:?}", release_err);
                }
                return Err(err);
            }
        };
        let total = request.transfers.len();
        info!(batch_id = %batch_id, items = total, "batch transfer started");

        let mut tasks = JoinSet::new();
        for (index, item) in request.transfers.into_iter().enumerate() {
            tasks.spawn(run_item(
                self.service.clone(),
                self.permits.clone(),
                self.limits.item_timeout,
                snapshot.clone(),
                BatchItemContext {
                    batch_id: batch_id.clone(),
                    index,
                },
                item,
            ));
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    let index = result.index();
                    slots[index] = Some(result);
                }
                Err(err) => error!(batch_id = %batch_id, "batch item task aborted: {:?}", err),
            }
        }
        let results: Vec<ItemResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ItemResult::failed(index, &AppError::Internal("item task aborted".into()))
                })
            })
            .collect();

        let record = BatchTransferRecord::from_results(batch_id.clone(), results);
        // The reservation stays in place on failure so the items never rerun.
        if let Err(err) = self.store.complete_batch(&record).await {
            error!(batch_id = %batch_id, "failed to store batch results: {:?}", err);
            return Err(err);
        }

        info!(
            batch_id = %batch_id,
            total = record.total_count,
            success = record.success_count,
            failed = record.failed_count,
            "batch transfer finished"
        );
        Ok(record.into())
    }

    async fn resolve_accounts(
        &self,
        items: &[TransferRequest],
    ) -> Result<HashMap<i64, Account>, AppError> {
        let ids: Vec<i64> = items
            .iter()
            .flat_map(|t| [t.from_account_id, t.to_account_id])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(self
            .store
            .find_accounts(&ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect())
    }
}

async fn run_item<S: LedgerStore>(
    service: TransactionService<S>,
    permits: Arc<Semaphore>,
    item_timeout: Duration,
    snapshot: Arc<HashMap<i64, Account>>,
    context: BatchItemContext,
    item: TransferRequest,
) -> ItemResult {
    let index = context.index;
    let from = match (
        snapshot.get(&item.from_account_id),
        snapshot.contains_key(&item.to_account_id),
    ) {
        (Some(from), true) => from.clone(),
        _ => return ItemResult::failed(index, &AppError::NotFound(Resource::Account)),
    };

    let permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return ItemResult::failed(index, &AppError::Internal("batch pool closed".into()))
        }
    };

    // The work runs in its own task so that a timeout only stops the wait.
    let batch_id = context.batch_id.clone();
    let work = tokio::spawn(async move {
        let _permit = permit;
        service.transfer_batch_item(&item, &from, context).await
    });

    match tokio::time::timeout(item_timeout, work).await {
        Ok(Ok(Ok(receipt))) => ItemResult::Completed {
            index,
            transaction_id: receipt.transaction_id,
        },
        Ok(Ok(Err(err))) => ItemResult::failed(index, &err),
        Ok(Err(join_err)) => {
            error!(batch_id = %batch_id, index, "batch item panicked: {:?}", join_err);
            ItemResult::failed(index, &AppError::Internal(join_err.to_string()))
        }
        Err(_) => {
            warn!(batch_id = %batch_id, index, "batch item timed out, outcome unknown");
            ItemResult::Failed {
                index,
                error_code: ITEM_TIMEOUT_CODE.to_string(),
                message: ITEM_TIMEOUT_MESSAGE.to_string(),
            }
        }
    }
}
