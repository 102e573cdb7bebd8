use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Timing of the payment confirmation step.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_success_delay_millis")]
    pub success_delay_millis: u64,
    /// How long a succeeded or expired session stays queryable before the
    /// host forgets it.
    #[serde(default = "default_retain_terminal_secs")]
    pub retain_terminal_secs: u64,
}

fn default_poll_interval_secs() -> u64 { 10 }
fn default_tick_millis() -> u64 { 1000 }
fn default_success_delay_millis() -> u64 { 2000 }
fn default_retain_terminal_secs() -> u64 { 60 }

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            tick_millis: default_tick_millis(),
            success_delay_millis: default_success_delay_millis(),
            retain_terminal_secs: default_retain_terminal_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Http,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Mock provider only: polls answered "not yet paid" before it reports paid.
    #[serde(default = "default_mock_paid_after")]
    pub mock_paid_after: usize,
}

fn default_timeout_secs() -> u64 { 10 }
fn default_mock_paid_after() -> usize { 3 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `WAYFARE__CHECKOUT__POLL_INTERVAL_SECS=5`
            .add_source(config::Environment::with_prefix("WAYFARE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
