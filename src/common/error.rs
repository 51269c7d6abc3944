use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Caller-facing text for database conflicts. Constraint and table names stay
/// in the logs.
const DUPLICATE_MESSAGE: &str = "request conflicts with an existing record";
const CONTENTION_MESSAGE: &str = "concurrent update, please retry";

/// Resource kinds that can be missing; each maps to its own stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resource {
    Account,
    ScheduledTransfer,
    Batch,
}

/// Downstream collaborators the core calls synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Upstream {
    Risk,
    Payment,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:?} not found")]
    NotFound(Resource),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("source and destination account are the same")]
    SameAccount,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("account {0} is not active")]
    AccountFrozen(i64),

    #[error("rejected by risk control")]
    RiskRejected,

    #[error("{0:?} service unavailable: {1}")]
    UpstreamUnavailable(Upstream, String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("batch exceeds the limit of {0} transfers")]
    BatchTooLarge(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(Resource::Account) => "CBB001",
            AppError::InsufficientFunds => "CBB002",
            AppError::AccountFrozen(_) => "CBB003",
            AppError::InvalidAmount(_) => "CBB004",
            AppError::SameAccount => "CBB005",
            AppError::Conflict(_) => "CBB009",
            AppError::BatchTooLarge(_) => "CBB010",
            AppError::InvalidSchedule(_) => "CBB011",
            AppError::NotFound(Resource::ScheduledTransfer) => "CBB012",
            AppError::AlreadyTerminal(_) => "CBB013",
            AppError::NotFound(Resource::Batch) => "CBB014",
            AppError::InvalidRequest(_) => "CBV003",
            AppError::RiskRejected => "RKB001",
            AppError::UpstreamUnavailable(Upstream::Risk, _) => "CBS002",
            AppError::UpstreamUnavailable(Upstream::Payment, _) => "CBS003",
            AppError::Internal(_) => "CBS001",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::RiskRejected => 403,
            AppError::Conflict(_) => 409,
            AppError::UpstreamUnavailable(Upstream::Risk, _) => 504,
            AppError::UpstreamUnavailable(Upstream::Payment, _) => 502,
            AppError::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Message safe to hand back to a caller; internal detail stays in the logs.
    pub fn message(&self) -> String {
        match self {
            AppError::Internal(_) => "internal server error".to_string(),
            AppError::UpstreamUnavailable(upstream, _) => {
                format!("{:?} service unavailable, please retry later", upstream)
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => {
                    warn!("unique violation: {}", db_err.message());
                    return AppError::Conflict(DUPLICATE_MESSAGE.to_string());
                }
                // deadlock_detected, serialization_failure
                Some("40P01") | Some("40001") => {
                    warn!("lock contention: {}", db_err.message());
                    return AppError::Conflict(CONTENTION_MESSAGE.to_string());
                }
                _ => {}
            }
        }
        error!("database error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "code": self.status(),
            "error_code": self.code(),
            "message": self.message(),
        }));
        (status_code, body).into_response()
    }
}
