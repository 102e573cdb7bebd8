use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult, PaymentStatus, PaymentStatusProvider, ProviderError};

use crate::app_config::ProviderConfig;

#[derive(Debug, Clone)]
pub struct StatusClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl StatusClientConfig {
    pub fn from_provider_config(cfg: &ProviderConfig) -> CoreResult<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                CoreError::ValidationError("provider.base_url is required for the http provider".to_string())
            })?;
        Ok(Self {
            base_url,
            api_key: cfg.api_key.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BookingStatusBody {
    status: i32,
}

/// Reads booking payment status from the booking service over HTTP.
///
/// `GET {base_url}/bookings/{booking_id}/status` → `{"status": <int>}`.
/// Every failure is reported as a (transient) [`ProviderError`]; retrying is
/// left to the poller's next tick.
#[derive(Clone)]
pub struct HttpStatusProvider {
    client: Client,
    config: StatusClientConfig,
}

impl HttpStatusProvider {
    pub fn new(config: StatusClientConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::InternalError(format!("failed to initialize HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, booking_id: Uuid) -> String {
        format!(
            "{}/bookings/{}/status",
            self.config.base_url.trim_end_matches('/'),
            booking_id
        )
    }
}

#[async_trait]
impl PaymentStatusProvider for HttpStatusProvider {
    async fn booking_status(&self, booking_id: Uuid) -> Result<PaymentStatus, ProviderError> {
        let mut request = self.client.get(self.endpoint(booking_id));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(booking_id = %booking_id, http_status = status.as_u16(), "booking status request rejected");
            return Err(ProviderError::Http {
                status: status.as_u16(),
            });
        }

        let body: BookingStatusBody = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Decode(e.to_string())
            }
        })?;

        let payment_status = PaymentStatus::from_code(body.status);
        if !payment_status.is_paid() {
            debug!(booking_id = %booking_id, status_code = body.status, "booking status is not the paid code");
        }
        Ok(payment_status)
    }
}
