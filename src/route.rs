use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::str::FromStr;

use crate::common::error::AppError;
use crate::domain::finance::{
    AccountListParams, AccountStatusRequest, BatchTransferRequest, DebitRequest, HistoryParams,
    OpenAccountRequest, PageParams, ScheduledTransferRequest, TransferRequest,
};
use crate::domain::models::{Page, TimeRange};
use crate::repository::adapter::LedgerStore;
use crate::state::ApplicationState;

pub fn router<S: LedgerStore>(state: ApplicationState<S>) -> Router {
    Router::new()
        .route(
            "/accounts",
            post(open_account_handler::<S>).get(account_list_handler::<S>),
        )
        .route("/accounts/:id", get(account_query_handler::<S>))
        .route("/accounts/:id/status", patch(account_status_handler::<S>))
        .route(
            "/accounts/:id/transactions",
            get(transaction_history_handler::<S>),
        )
        .route(
            "/accounts/:id/scheduled-transfers",
            get(scheduled_list_handler::<S>),
        )
        .route("/transactions/history", get(history_handler::<S>))
        .route("/transactions/debit", post(debit_handler::<S>))
        .route("/transactions/transfer", post(transfer_handler::<S>))
        .route("/transactions/batch-transfer", post(batch_transfer_handler::<S>))
        .route(
            "/transactions/batch-transfer/:batch_id",
            get(batch_query_handler::<S>),
        )
        .route("/scheduled-transfers", post(scheduled_create_handler::<S>))
        .route(
            "/scheduled-transfers/:id",
            get(scheduled_query_handler::<S>).delete(scheduled_cancel_handler::<S>),
        )
        .with_state(state)
}

fn page_of(page: Option<i64>, page_size: Option<i64>) -> Page {
    Page::new(page.unwrap_or(1), page_size.unwrap_or(20))
}

fn status_of<T: FromStr>(raw: Option<&str>) -> Result<Option<T>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .to_lowercase()
            .parse()
            .map(Some)
            .map_err(|_| AppError::InvalidRequest(format!("unknown status filter: {}", raw))),
    }
}

fn instant_of(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| {
                AppError::InvalidRequest(format!("{} must be an ISO-8601 instant, got {}", field, raw))
            }),
    }
}

pub async fn open_account_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<Response, AppError> {
    let account = state.ledger.open_account(request).await?;
    Ok((StatusCode::CREATED, Json(account)).into_response())
}

pub async fn account_list_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Query(params): Query<AccountListParams>,
) -> Result<Response, AppError> {
    let entries = state
        .ledger
        .list_accounts(
            params.customer_id,
            status_of(params.status.as_deref())?,
            page_of(params.page, params.page_size),
        )
        .await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

pub async fn account_query_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let account = state.ledger.get_account(id).await?;
    Ok((StatusCode::OK, Json(account)).into_response())
}

pub async fn account_status_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<i64>,
    Json(request): Json<AccountStatusRequest>,
) -> Result<Response, AppError> {
    let account = state.ledger.change_status(id, request.status).await?;
    Ok((StatusCode::OK, Json(account)).into_response())
}

pub async fn transaction_history_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Response, AppError> {
    let entries = state
        .ledger
        .list_transactions(id, TimeRange::default(), page_of(params.page, params.page_size))
        .await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

pub async fn history_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, AppError> {
    let account_id = params
        .account_id
        .ok_or_else(|| AppError::InvalidRequest("accountId is required".into()))?;
    let range = TimeRange::new(
        instant_of("from", params.from.as_deref())?,
        instant_of("to", params.to.as_deref())?,
    )?;
    let entries = state
        .ledger
        .list_transactions(account_id, range, page_of(params.page, params.page_size))
        .await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

pub async fn scheduled_list_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Response, AppError> {
    let entries = state
        .scheduler
        .list_for_account(
            id,
            status_of(params.status.as_deref())?,
            page_of(params.page, params.page_size),
        )
        .await?;
    Ok((StatusCode::OK, Json(json!({ "entries": entries }))).into_response())
}

pub async fn debit_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Json(request): Json<DebitRequest>,
) -> Result<Response, AppError> {
    let receipt = state.transactions.debit(request).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub async fn transfer_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Json(request): Json<TransferRequest>,
) -> Result<Response, AppError> {
    let receipt = state.transactions.transfer(&request).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub async fn batch_transfer_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Json(request): Json<BatchTransferRequest>,
) -> Result<Response, AppError> {
    let receipt = state.batch.execute(request).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub async fn batch_query_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(batch_id): Path<String>,
) -> Result<Response, AppError> {
    let receipt = state.batch.get(&batch_id).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub async fn scheduled_create_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Json(request): Json<ScheduledTransferRequest>,
) -> Result<Response, AppError> {
    let scheduled = state.scheduler.create(request).await?;
    Ok((StatusCode::CREATED, Json(scheduled)).into_response())
}

pub async fn scheduled_query_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let scheduled = state.scheduler.get(&id).await?;
    Ok((StatusCode::OK, Json(scheduled)).into_response())
}

pub async fn scheduled_cancel_handler<S: LedgerStore>(
    State(state): State<ApplicationState<S>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let scheduled = state.scheduler.cancel(&id).await?;
    Ok((StatusCode::OK, Json(scheduled)).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::client::payment::DisabledPaymentClient;
    use crate::client::risk::DisabledRiskClient;
    use crate::configs::settings::tests::sample_settings;
    use crate::domain::models::AccountStatus;
    use crate::repository::memory::MemoryStore;

    fn app(store: &MemoryStore) -> Router {
        router(ApplicationState::build(
            store.clone(),
            &sample_settings(),
            Arc::new(DisabledRiskClient),
            Arc::new(DisabledPaymentClient),
        ))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_transfer_then_balance() {
        let store = MemoryStore::new();
        store.seed_account(1, 10, dec!(200.00), AccountStatus::Active);
        store.seed_account(2, 20, dec!(0.00), AccountStatus::Active);

        let (status, body) = call(
            app(&store),
            "POST",
            "/transactions/transfer",
            Some(json!({"fromAccountId": 1, "toAccountId": 2, "amount": "60.00"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        let (status, body) = call(app(&store), "GET", "/accounts/2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 2);
        assert_eq!(store.total_balance(), dec!(200.00));
    }

    #[tokio::test]
    async fn test_errors_render_with_codes() {
        let store = MemoryStore::new();
        store.seed_account(1, 10, dec!(5.00), AccountStatus::Active);
        store.seed_account(2, 20, dec!(0.00), AccountStatus::Active);

        let (status, body) = call(app(&store), "GET", "/accounts/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "CBB001");

        let (status, body) = call(
            app(&store),
            "POST",
            "/transactions/transfer",
            Some(json!({"fromAccountId": 1, "toAccountId": 2, "amount": "6.00"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "CBB002");

        let (status, body) = call(
            app(&store),
            "GET",
            "/accounts/1/scheduled-transfers?status=bogus",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "CBV003");

        let (status, body) = call(app(&store), "DELETE", "/scheduled-transfers/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "CBB012");
    }

    #[tokio::test]
    async fn test_account_listing_filters() {
        let store = MemoryStore::new();
        store.seed_account(1, 10, dec!(0.00), AccountStatus::Active);
        store.seed_account(2, 10, dec!(0.00), AccountStatus::Frozen);
        store.seed_account(3, 20, dec!(0.00), AccountStatus::Active);

        let (status, body) = call(app(&store), "GET", "/accounts?customerId=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 2);

        let (_, body) = call(
            app(&store),
            "GET",
            "/accounts?customerId=10&status=FROZEN&page=1&pageSize=5",
            None,
        )
        .await;
        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], 2);

        let (status, body) = call(app(&store), "GET", "/accounts?status=dormant", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "CBV003");
    }

    #[tokio::test]
    async fn test_history_by_time_range() {
        let store = MemoryStore::new();
        store.seed_account(1, 10, dec!(100.00), AccountStatus::Active);
        store.seed_account(2, 20, dec!(0.00), AccountStatus::Active);
        let (status, _) = call(
            app(&store),
            "POST",
            "/transactions/transfer",
            Some(json!({"fromAccountId": 1, "toAccountId": 2, "amount": "15.00"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            app(&store),
            "GET",
            "/transactions/history?accountId=1&from=2000-01-01T00:00:00Z&to=2999-01-01T00:00:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);

        let (_, body) = call(
            app(&store),
            "GET",
            "/transactions/history?accountId=1&from=2999-01-01T00:00:00Z",
            None,
        )
        .await;
        assert!(body["entries"].as_array().unwrap().is_empty());

        let (_, body) = call(app(&store), "GET", "/transactions/history?accountId=2", None).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);

        for uri in [
            "/transactions/history?accountId=1&from=yesterday",
            "/transactions/history?accountId=1&to=2024-13-01",
            "/transactions/history?from=2000-01-01T00:00:00Z",
        ] {
            let (status, body) = call(app(&store), "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error_code"], "CBV003", "{}", uri);
        }

        let (status, body) = call(app(&store), "GET", "/transactions/history?accountId=9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "CBB001");
    }

    #[tokio::test]
    async fn test_batch_submit_and_fetch() {
        let store = MemoryStore::new();
        store.seed_account(1, 10, dec!(100.00), AccountStatus::Active);
        store.seed_account(2, 20, dec!(0.00), AccountStatus::Active);

        let (status, body) = call(
            app(&store),
            "POST",
            "/transactions/batch-transfer",
            Some(json!({
                "batchId": "B-http",
                "transfers": [
                    {"fromAccountId": 1, "toAccountId": 2, "amount": "10.00"},
                    {"fromAccountId": 1, "toAccountId": 1, "amount": "10.00"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["failedCount"], 1);

        let (status, fetched) = call(app(&store), "GET", "/transactions/batch-transfer/B-http", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, body);
    }
}
