use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wayfare_api::{app, setup, state::SessionRegistry, AppState};
use wayfare_core::SystemClock;
use wayfare_store::app_config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wayfare_api=debug,wayfare_checkout=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Wayfare API on port {}", config.server.port);

    let provider = setup::status_provider(&config.provider)
        .context("Failed to set up payment status provider")?;
    let settings = setup::confirmation_settings(&config.checkout);
    tracing::info!(
        poll_interval_secs = settings.poll_interval.as_secs(),
        tick_millis = settings.tick.as_millis() as u64,
        success_delay_millis = settings.success_delay.as_millis() as u64,
        "payment confirmation settings"
    );

    let app_state = AppState::new(provider, Arc::new(SystemClock), settings)
        .with_session_retention(setup::session_retention(&config.checkout));
    let sessions = app_state.sessions.clone();
    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await
        .context("Server error")?;

    Ok(())
}

/// Waits for Ctrl-C, then tears every live confirmation down so open
/// event streams end and the server can drain.
async fn shutdown_signal(sessions: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    sessions.shutdown_all();
}
