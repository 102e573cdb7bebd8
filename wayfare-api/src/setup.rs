use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wayfare_checkout::{ConfirmationSettings, MockStatusProvider};
use wayfare_core::{CoreResult, PaymentStatusProvider};
use wayfare_store::app_config::{CheckoutConfig, ProviderConfig, ProviderKind};
use wayfare_store::{HttpStatusProvider, StatusClientConfig};

pub fn confirmation_settings(cfg: &CheckoutConfig) -> ConfirmationSettings {
    ConfirmationSettings {
        // a zero interval would spin; clamp to the smallest sane cadence
        poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
        tick: Duration::from_millis(cfg.tick_millis.max(100)),
        success_delay: Duration::from_millis(cfg.success_delay_millis),
    }
}

pub fn session_retention(cfg: &CheckoutConfig) -> Duration {
    Duration::from_secs(cfg.retain_terminal_secs)
}

/// Builds the status provider selected by `provider.kind`.
pub fn status_provider(cfg: &ProviderConfig) -> CoreResult<Arc<dyn PaymentStatusProvider>> {
    match cfg.kind {
        ProviderKind::Http => {
            let client_cfg = StatusClientConfig::from_provider_config(cfg)?;
            info!(base_url = %client_cfg.base_url, "using http payment status provider");
            Ok(Arc::new(HttpStatusProvider::new(client_cfg)?))
        }
        ProviderKind::Mock => {
            warn!(
                paid_after = cfg.mock_paid_after,
                "using mock payment status provider; do not run this in production"
            );
            Ok(Arc::new(MockStatusProvider::paid_after(cfg.mock_paid_after)))
        }
    }
}
