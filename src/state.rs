use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::batch::BatchOrchestrator;
use crate::client::payment::{new_payment_client, PaymentClient};
use crate::client::risk::{new_risk_client, RiskClient};
use crate::configs::settings::Settings;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::AccountLedger;
use crate::outbox::journal::OutboxJournal;
use crate::outbox::publisher::OutboxPublisher;
use crate::repository::adapter::LedgerStore;
use crate::scheduled::ScheduledTransferScheduler;
use crate::service::TransactionService;

#[derive(Clone)]
pub struct ApplicationState<S: LedgerStore> {
    pub ledger: AccountLedger<S>,
    pub transactions: TransactionService<S>,
    pub batch: BatchOrchestrator<S>,
    pub scheduler: ScheduledTransferScheduler<S>,
    pub publisher: OutboxPublisher<S>,
}

impl<S: LedgerStore> ApplicationState<S> {
    pub fn build(
        store: S,
        settings: &Settings,
        risk: Arc<dyn RiskClient>,
        payment: Arc<dyn PaymentClient>,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.clone());
        let journal = OutboxJournal::new(store.clone(), settings.outbox.max_attempts)
            .with_reclaim_after(settings.outbox.reclaim_after_secs);
        let transactions =
            TransactionService::new(store.clone(), guard.clone(), journal.clone(), risk);

        ApplicationState {
            ledger: AccountLedger::new(store.clone()),
            batch: BatchOrchestrator::new(
                store.clone(),
                transactions.clone(),
                guard.clone(),
                settings.batch.limits(),
            ),
            scheduler: ScheduledTransferScheduler::new(
                store,
                transactions.clone(),
                guard,
                settings.scheduler.limits(),
            ),
            publisher: OutboxPublisher::new(journal, payment, settings.outbox.batch_size),
            transactions,
        }
    }
}

pub async fn new_application_state(settings: &Settings) -> anyhow::Result<ApplicationState<PgPool>> {
    let pool: PgPool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.connection_string())
        .await
        .context("Failed to connect to database")?;

    let risk = new_risk_client(&settings.services.risk)?;
    let payment = new_payment_client(&settings.services.payment)?;

    Ok(ApplicationState::build(pool, settings, risk, payment))
}
