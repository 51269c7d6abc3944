//! Lock manager for account rows.
//!
//! Every balance change goes through [`lock_accounts`]: it takes row locks in
//! ascending id order inside the caller's unit of work, so two operations over
//! the same accounts always queue on the same first row and can never wait on
//! each other in a cycle. The locks are released by the unit of work's commit
//! or rollback.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use tracing::debug;

use crate::common::error::{AppError, Resource};
use crate::domain::models::Account;
use crate::repository::adapter::UnitOfWork;

/// An account whose row lock is held by the current unit of work.
#[derive(Debug)]
pub struct LockedAccount {
    account: Account,
    balance: Decimal,
    dirty: bool,
}

impl LockedAccount {
    fn new(account: Account) -> Self {
        let balance = account.balance();
        LockedAccount {
            account,
            balance,
            dirty: false,
        }
    }

    pub fn id(&self) -> i64 {
        self.account.id
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Working balance, including uncommitted changes in this unit of work.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    fn ensure_active(&self) -> Result<(), AppError> {
        if !self.account.is_active() {
            return Err(AppError::AccountFrozen(self.account.id));
        }
        Ok(())
    }

    fn debit(&mut self, amount: Decimal) -> Result<(), AppError> {
        self.ensure_active()?;
        if self.balance < amount {
            return Err(AppError::InsufficientFunds);
        }
        self.balance -= amount;
        self.dirty = true;
        Ok(())
    }

    fn credit(&mut self, amount: Decimal) -> Result<(), AppError> {
        self.ensure_active()?;
        self.balance += amount;
        self.dirty = true;
        Ok(())
    }

    fn into_account(self) -> Account {
        self.account.with_balance(self.balance)
    }
}

/// The set of accounts locked by one unit of work.
#[derive(Debug, Default)]
pub struct AccountLocks {
    accounts: BTreeMap<i64, LockedAccount>,
}

impl AccountLocks {
    pub fn get(&self, id: i64) -> Result<&LockedAccount, AppError> {
        self.accounts
            .get(&id)
            .ok_or(AppError::NotFound(Resource::Account))
    }

    pub fn debit(&mut self, id: i64, amount: Decimal) -> Result<(), AppError> {
        self.get_mut(id)?.debit(amount)
    }

    pub fn credit(&mut self, id: i64, amount: Decimal) -> Result<(), AppError> {
        self.get_mut(id)?.credit(amount)
    }

    /// Writes every changed balance back through the unit of work.
    pub async fn persist<U: UnitOfWork>(&mut self, uow: &mut U) -> Result<(), AppError> {
        for locked in self.accounts.values_mut().filter(|a| a.dirty) {
            uow.store_balance(locked).await?;
            locked.dirty = false;
        }
        Ok(())
    }

    /// Post-mutation snapshots, for handing back to callers after commit.
    pub fn into_accounts(self) -> BTreeMap<i64, Account> {
        self.accounts
            .into_iter()
            .map(|(id, locked)| (id, locked.into_account()))
            .collect()
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut LockedAccount, AppError> {
        self.accounts
            .get_mut(&id)
            .ok_or(AppError::NotFound(Resource::Account))
    }
}

/// Ascending, de-duplicated acquisition order for a set of account ids.
pub fn lock_order(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

pub async fn lock_accounts<U: UnitOfWork>(
    uow: &mut U,
    ids: &[i64],
) -> Result<AccountLocks, AppError> {
    let mut locks = AccountLocks::default();
    for id in lock_order(ids) {
        let account = uow
            .select_account_for_update(id)
            .await?
            .ok_or(AppError::NotFound(Resource::Account))?;
        debug!(account_id = id, "account row locked");
        locks.accounts.insert(id, LockedAccount::new(account));
    }
    Ok(locks)
}
