pub mod lock;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::common::account::generate_bank_account_number;
use crate::common::error::{AppError, Resource};
use crate::common::money::validate_amount;
use crate::common::snowflake::generate_transaction_reference;
use crate::domain::finance::{OpenAccountRequest, TransferRequest};
use crate::domain::models::{
    Account, AccountStatus, LedgerTransaction, NewAccount, NewLedgerTransaction, Page,
    TimeRange, TransactionType,
};
use crate::repository::adapter::{LedgerStore, UnitOfWork};

use lock::lock_accounts;

const ACCOUNT_NUMBER_DIGITS: usize = 14;
const ACCOUNT_NUMBER_RETRY: usize = 5;

/// Both legs of a posted transfer plus the post-mutation account snapshots.
#[derive(Debug)]
pub struct TransferPosting {
    pub outgoing: LedgerTransaction,
    pub incoming: LedgerTransaction,
    pub accounts: BTreeMap<i64, Account>,
}

/// Owner of account balances. Mutating calls run inside a unit of work the
/// caller controls, so the caller can add its outbox event before committing.
#[derive(Clone)]
pub struct AccountLedger<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> AccountLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, AppError> {
        self.store
            .find_account(id)
            .await?
            .ok_or(AppError::NotFound(Resource::Account))
    }

    pub async fn list_accounts(
        &self,
        customer_id: Option<i64>,
        status: Option<AccountStatus>,
        page: Page,
    ) -> Result<Vec<Account>, AppError> {
        self.store.list_accounts(customer_id, status, page).await
    }

    /// Newest first. `range` bounds are inclusive.
    pub async fn list_transactions(
        &self,
        account_id: i64,
        range: TimeRange,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        self.get_account(account_id).await?;
        self.store.list_transactions(account_id, range, page).await
    }

    pub async fn open_account(&self, request: OpenAccountRequest) -> Result<Account, AppError> {
        if request.customer_id <= 0 {
            return Err(AppError::InvalidRequest("customerId must be positive".into()));
        }
        let account_type = request.account_type.trim().to_lowercase();
        if account_type.is_empty() {
            return Err(AppError::InvalidRequest("accountType is required".into()));
        }

        for attempt in 1..=ACCOUNT_NUMBER_RETRY {
            let new_account = NewAccount {
                account_number: generate_bank_account_number(ACCOUNT_NUMBER_DIGITS),
                customer_id: request.customer_id,
                currency: request.currency.unwrap_or_default(),
                account_type: account_type.clone(),
            };
            let mut uow = self.store.begin().await?;
            match uow.insert_account(new_account).await {
                Ok(account) => {
                    uow.commit().await?;
                    info!(
                        account_id = account.id,
                        account_number = %account.account_number,
                        customer_id = account.customer_id,
                        "account opened"
                    );
                    return Ok(account);
                }
                Err(AppError::Conflict(_)) => {
                    uow.rollback().await?;
                    warn!(attempt, "account number collision, regenerating");
                }
                Err(err) => return Err(err),
            }
        }
        Err(AppError::Conflict(
            "could not allocate a unique account number".into(),
        ))
    }

    pub async fn change_status(&self, id: i64, status: AccountStatus) -> Result<Account, AppError> {
        let mut uow = self.store.begin().await?;
        let locks = lock_accounts(&mut uow, &[id]).await?;
        let locked = locks.get(id)?;
        let current = locked.account().status;

        if current == status {
            uow.rollback().await?;
            return Ok(locked.account().clone());
        }
        if current == AccountStatus::Closed {
            return Err(AppError::AlreadyTerminal(format!("account {} is closed", id)));
        }
        if status == AccountStatus::Closed && !locked.balance().is_zero() {
            return Err(AppError::InvalidRequest(
                "account balance must be zero before closing".into(),
            ));
        }

        uow.update_account_status(locked, status).await?;
        let mut account = locked.account().clone();
        uow.commit().await?;

        info!(account_id = id, from = %current, to = %status, "account status changed");
        account.status = status;
        Ok(account)
    }

    /// Debits one account for a payment and records the `payment` row carrying
    /// the caller's reference id.
    pub async fn post_payment<U: UnitOfWork>(
        &self,
        uow: &mut U,
        account_id: i64,
        amount: Decimal,
        ref_id: &str,
        remark: Option<String>,
    ) -> Result<LedgerTransaction, AppError> {
        let amount = validate_amount(amount)?;
        let mut locks = lock_accounts(uow, &[account_id]).await?;
        locks.debit(account_id, amount)?;
        locks.persist(uow).await?;

        uow.insert_transaction(NewLedgerTransaction {
            transaction_id: generate_transaction_reference("PY"),
            account_id,
            counter_account_id: None,
            amount,
            transaction_type: TransactionType::Payment,
            remark,
            ref_id: Some(ref_id.to_string()),
        })
        .await
    }

    /// Moves `amount` between two accounts and records both legs under one
    /// correlation prefix. Nothing is visible until the caller commits.
    pub async fn post_transfer<U: UnitOfWork>(
        &self,
        uow: &mut U,
        request: &TransferRequest,
    ) -> Result<TransferPosting, AppError> {
        let (from_id, to_id) = (request.from_account_id, request.to_account_id);
        if from_id == to_id {
            return Err(AppError::SameAccount);
        }
        let amount = validate_amount(request.amount)?;

        let mut locks = lock_accounts(uow, &[from_id, to_id]).await?;
        locks.debit(from_id, amount)?;
        locks.credit(to_id, amount)?;
        locks.persist(uow).await?;

        let correlation = generate_transaction_reference("TX");
        let outgoing = uow
            .insert_transaction(NewLedgerTransaction {
                transaction_id: format!("{}O", correlation),
                account_id: from_id,
                counter_account_id: Some(to_id),
                amount,
                transaction_type: TransactionType::TransferOut,
                remark: request.remark.clone(),
                ref_id: None,
            })
            .await?;
        let incoming = uow
            .insert_transaction(NewLedgerTransaction {
                transaction_id: format!("{}I", correlation),
                account_id: to_id,
                counter_account_id: Some(from_id),
                amount,
                transaction_type: TransactionType::TransferIn,
                remark: request.remark.clone(),
                ref_id: None,
            })
            .await?;

        Ok(TransferPosting {
            outgoing,
            incoming,
            accounts: locks.into_accounts(),
        })
    }
}
