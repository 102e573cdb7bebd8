pub mod app_config;
pub mod status_client;

pub use status_client::{HttpStatusProvider, StatusClientConfig};
