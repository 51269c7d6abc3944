use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::client::risk::{RiskCheckRequest, RiskClient};
use crate::common::error::AppError;
use crate::common::money::validate_amount;
use crate::domain::events::{BatchItemCompleted, DebitCompleted, LedgerEvent, TransferCompleted};
use crate::domain::finance::{
    ensure_max_len, ensure_remark_fits, DebitReceipt, DebitRequest, TransferReceipt,
    TransferRequest, MAX_REF_ID_LEN, MAX_REMARK_LEN,
};
use crate::domain::models::{Account, LedgerTransaction, STATUS_COMPLETED};
use crate::idempotency::{IdempotencyGuard, IdempotencyKey, PriorOutcome, Reservation};
use crate::ledger::lock::lock_accounts;
use crate::ledger::AccountLedger;
use crate::outbox::journal::OutboxJournal;
use crate::repository::adapter::{LedgerStore, UnitOfWork};

/// Ties a batch item's transfer to its batch in the emitted event.
#[derive(Debug, Clone)]
pub struct BatchItemContext {
    pub batch_id: String,
    pub index: usize,
}

/// The money-moving operations. Every successful call commits its ledger
/// rows and its outbox event in the same unit of work.
#[derive(Clone)]
pub struct TransactionService<S: LedgerStore> {
    store: S,
    ledger: AccountLedger<S>,
    guard: IdempotencyGuard<S>,
    journal: OutboxJournal<S>,
    risk: Arc<dyn RiskClient>,
}

impl<S: LedgerStore> TransactionService<S> {
    pub fn new(
        store: S,
        guard: IdempotencyGuard<S>,
        journal: OutboxJournal<S>,
        risk: Arc<dyn RiskClient>,
    ) -> Self {
        TransactionService {
            ledger: AccountLedger::new(store.clone()),
            store,
            guard,
            journal,
            risk,
        }
    }

    pub async fn debit(&self, request: DebitRequest) -> Result<DebitReceipt, AppError> {
        let ref_id = request.ref_id.trim().to_string();
        if ref_id.is_empty() {
            return Err(AppError::InvalidRequest("refId is required".into()));
        }
        ensure_max_len("refId", &ref_id, MAX_REF_ID_LEN)?;
        ensure_remark_fits(request.remark.as_deref(), MAX_REMARK_LEN)?;

        match self
            .guard
            .check_or_reserve(&IdempotencyKey::Debit(ref_id.clone()))
            .await?
        {
            Reservation::Existing(PriorOutcome::Debit(existing)) => {
                return Ok(debit_receipt(existing))
            }
            Reservation::Existing(other) => {
                return Err(AppError::Internal(format!(
                    "unexpected prior outcome for debit: {:?}",
                    other
                )))
            }
            Reservation::Proceed => {}
        }
        let amount = validate_amount(request.amount)?;

        match self.post_debit(&request, &ref_id, amount).await {
            // Lost the race on the ref_id unique index: the winner's row is
            // the answer.
            Err(AppError::Conflict(detail)) => match self.store.find_transaction_by_ref(&ref_id).await? {
                Some(existing) => {
                    info!(ref_id = %ref_id, transaction_id = %existing.transaction_id, "debit resolved to concurrent winner");
                    Ok(debit_receipt(existing))
                }
                None => Err(AppError::Conflict(detail)),
            },
            other => other,
        }
    }

    async fn post_debit(
        &self,
        request: &DebitRequest,
        ref_id: &str,
        amount: Decimal,
    ) -> Result<DebitReceipt, AppError> {
        let mut uow = self.store.begin().await?;
        // The row lock is held by the unit of work from here on.
        lock_accounts(&mut uow, &[request.account_id]).await?;
        if let Some(existing) = self.guard.recheck_debit(&mut uow, ref_id).await? {
            uow.rollback().await?;
            info!(ref_id = %ref_id, transaction_id = %existing.transaction_id, "debit replayed under lock");
            return Ok(debit_receipt(existing));
        }

        let row = self
            .ledger
            .post_payment(&mut uow, request.account_id, amount, ref_id, request.remark.clone())
            .await?;
        let event = LedgerEvent::PaymentDebitCompleted(DebitCompleted {
            transaction_id: row.transaction_id.clone(),
            account_id: row.account_id,
            amount: row.amount,
            ref_id: ref_id.to_string(),
            status: STATUS_COMPLETED.to_string(),
        });
        self.journal.append(&mut uow, &event).await?;
        uow.commit().await?;

        info!(
            transaction_id = %row.transaction_id,
            account_id = row.account_id,
            amount = %row.amount,
            ref_id = %ref_id,
            "debit completed"
        );
        Ok(debit_receipt(row))
    }

    /// Screens the transfer with the risk service, then posts it.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, AppError> {
        validate_transfer(request)?;
        let from = self.ledger.get_account(request.from_account_id).await?;
        self.screen_and_post(request, &from, None).await
    }

    /// Batch variant: the source account comes from the batch's snapshot
    /// instead of a fresh read, and the event names the batch.
    pub async fn transfer_batch_item(
        &self,
        request: &TransferRequest,
        from: &Account,
        context: BatchItemContext,
    ) -> Result<TransferReceipt, AppError> {
        validate_transfer(request)?;
        self.screen_and_post(request, from, Some(context)).await
    }

    /// Screens and posts the transfer inside the caller's unit of work. The
    /// caller owns the commit.
    pub async fn transfer_within<U: UnitOfWork>(
        &self,
        uow: &mut U,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, AppError> {
        validate_transfer(request)?;
        let from = self.ledger.get_account(request.from_account_id).await?;
        let amount = self.screen(request, &from).await?;
        self.post_transfer_in(uow, request, amount, None).await
    }

    async fn screen(&self, request: &TransferRequest, from: &Account) -> Result<Decimal, AppError> {
        let amount = validate_amount(request.amount)?;
        self.risk
            .check_transfer(RiskCheckRequest::transfer(
                from.customer_id,
                request.from_account_id,
                amount,
                request.to_account_id,
            ))
            .await?;
        Ok(amount)
    }

    async fn screen_and_post(
        &self,
        request: &TransferRequest,
        from: &Account,
        batch: Option<BatchItemContext>,
    ) -> Result<TransferReceipt, AppError> {
        let amount = self.screen(request, from).await?;
        let mut uow = self.store.begin().await?;
        let receipt = self
            .post_transfer_in(&mut uow, request, amount, batch.as_ref())
            .await?;
        uow.commit().await?;
        Ok(receipt)
    }

    async fn post_transfer_in<U: UnitOfWork>(
        &self,
        uow: &mut U,
        request: &TransferRequest,
        amount: Decimal,
        batch: Option<&BatchItemContext>,
    ) -> Result<TransferReceipt, AppError> {
        let posting = self.ledger.post_transfer(uow, request).await?;
        let completed = TransferCompleted {
            tx_out_id: posting.outgoing.transaction_id.clone(),
            tx_in_id: posting.incoming.transaction_id.clone(),
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount,
            status: STATUS_COMPLETED.to_string(),
        };
        let event = match batch {
            None => LedgerEvent::TransferCompleted(completed),
            Some(ctx) => LedgerEvent::BatchTransferItemCompleted(BatchItemCompleted {
                batch_id: ctx.batch_id.clone(),
                index: ctx.index,
                transfer: completed,
            }),
        };
        self.journal.append(uow, &event).await?;

        info!(
            transaction_id = %posting.outgoing.transaction_id,
            from_account_id = request.from_account_id,
            to_account_id = request.to_account_id,
            amount = %amount,
            batch_id = batch.map(|c| c.batch_id.as_str()).unwrap_or(""),
            "transfer posted"
        );
        Ok(TransferReceipt::completed(
            posting.outgoing.transaction_id,
            posting.incoming.transaction_id,
            request,
            amount,
        ))
    }
}

fn validate_transfer(request: &TransferRequest) -> Result<(), AppError> {
    if request.from_account_id == request.to_account_id {
        return Err(AppError::SameAccount);
    }
    ensure_remark_fits(request.remark.as_deref(), MAX_REMARK_LEN)?;
    validate_amount(request.amount)?;
    Ok(())
}

fn debit_receipt(row: LedgerTransaction) -> DebitReceipt {
    DebitReceipt {
        transaction_id: row.transaction_id,
        account_id: row.account_id,
        amount: row.amount,
        status: row.status,
    }
}
