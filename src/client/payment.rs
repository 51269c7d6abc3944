use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::common::error::{AppError, Upstream};
use crate::configs::settings::ServiceEndpoint;

use super::{endpoint, CALLER_SERVICE, CALLER_SERVICE_HEADER};

const CALLBACK_PATH: &str = "/api/v1/payments/callback";

/// Body of `POST /api/v1/payments/callback`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentCallback {
    pub payment_id: String,
    pub status: String,
    pub gateway_order_id: Option<String>,
    pub code: String,
    pub message: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn send_callback(&self, callback: PaymentCallback) -> Result<(), AppError>;
}

pub struct HttpPaymentClient {
    client: reqwest::Client,
    url: String,
}

impl HttpPaymentClient {
    pub fn new(settings: &ServiceEndpoint) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("payment client: {}", e)))?;
        Ok(HttpPaymentClient {
            client,
            url: endpoint(&settings.url, CALLBACK_PATH),
        })
    }
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn send_callback(&self, callback: PaymentCallback) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.url)
            .header(CALLER_SERVICE_HEADER, CALLER_SERVICE)
            .json(&callback)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.url, "payment callback failed: {:?}", e);
                AppError::UpstreamUnavailable(Upstream::Payment, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(payment_id = %callback.payment_id, %status, body = %body, "payment callback rejected");
            return Err(AppError::UpstreamUnavailable(
                Upstream::Payment,
                format!("unexpected status {}", status),
            ));
        }
        debug!(payment_id = %callback.payment_id, status = %callback.status, "payment callback delivered");
        Ok(())
    }
}

/// Drops callbacks. The outbox still marks the events sent.
pub struct DisabledPaymentClient;

#[async_trait]
impl PaymentClient for DisabledPaymentClient {
    async fn send_callback(&self, callback: PaymentCallback) -> Result<(), AppError> {
        debug!(payment_id = %callback.payment_id, "payment callbacks disabled, skipping");
        Ok(())
    }
}

pub fn new_payment_client(settings: &ServiceEndpoint) -> Result<Arc<dyn PaymentClient>, AppError> {
    if settings.enabled {
        return Ok(Arc::new(HttpPaymentClient::new(settings)?));
    }
    warn!("payment callbacks are disabled by configuration");
    Ok(Arc::new(DisabledPaymentClient))
}
