use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::common::error::{AppError, Upstream};
use crate::configs::settings::ServiceEndpoint;

use super::{endpoint, CALLER_SERVICE, CALLER_SERVICE_HEADER};

const RISK_CHECK_PATH: &str = "/api/v1/risk/check";

/// Body of `POST /api/v1/risk/check`. The risk service speaks snake_case
/// and takes ids as strings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskCheckRequest {
    pub customer_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub transaction_type: String,
    pub recipient_account_id: String,
}

impl RiskCheckRequest {
    pub fn transfer(customer_id: i64, account_id: i64, amount: Decimal, recipient: i64) -> Self {
        RiskCheckRequest {
            customer_id: customer_id.to_string(),
            account_id: account_id.to_string(),
            amount,
            transaction_type: "transfer".to_string(),
            recipient_account_id: recipient.to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskClient: Send + Sync {
    /// `Ok(())` means approved. A rejection is `RiskRejected`; anything that
    /// prevents a decision is `UpstreamUnavailable(Risk)`.
    async fn check_transfer(&self, request: RiskCheckRequest) -> Result<(), AppError>;
}

pub struct HttpRiskClient {
    client: reqwest::Client,
    url: String,
}

impl HttpRiskClient {
    pub fn new(settings: &ServiceEndpoint) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("risk client: {}", e)))?;
        Ok(HttpRiskClient {
            client,
            url: endpoint(&settings.url, RISK_CHECK_PATH),
        })
    }
}

#[async_trait]
impl RiskClient for HttpRiskClient {
    async fn check_transfer(&self, request: RiskCheckRequest) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.url)
            .header(CALLER_SERVICE_HEADER, CALLER_SERVICE)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.url, "risk service call failed: {:?}", e);
                AppError::UpstreamUnavailable(Upstream::Risk, e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => {
                debug!(account_id = %request.account_id, amount = %request.amount, "risk check passed");
                Ok(())
            }
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                warn!(account_id = %request.account_id, amount = %request.amount, body = %body, "transfer rejected by risk control");
                Err(AppError::RiskRejected)
            }
            status => {
                error!(url = %self.url, %status, "risk service returned unexpected status");
                Err(AppError::UpstreamUnavailable(
                    Upstream::Risk,
                    format!("unexpected status {}", status),
                ))
            }
        }
    }
}

/// Approves everything. Only installed when risk checks are explicitly
/// switched off.
pub struct DisabledRiskClient;

#[async_trait]
impl RiskClient for DisabledRiskClient {
    async fn check_transfer(&self, request: RiskCheckRequest) -> Result<(), AppError> {
        debug!(account_id = %request.account_id, "risk check disabled, skipping");
        Ok(())
    }
}

pub fn new_risk_client(settings: &ServiceEndpoint) -> Result<Arc<dyn RiskClient>, AppError> {
    if settings.enabled {
        return Ok(Arc::new(HttpRiskClient::new(settings)?));
    }
    warn!("risk checks are DISABLED by configuration; transfers will not be screened");
    Ok(Arc::new(DisabledRiskClient))
}
