use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::config::{Config, LogFormat};
use courier_dispatch::directory::{
    CourierProfileStore, HttpOrderDirectory, InMemoryCourierStore, InMemoryDirectory,
    OrderDirectory, Role, StaticSessionVerifier,
};
use courier_dispatch::dispatch::housekeeping::run_housekeeping;
use courier_dispatch::dispatch::store::InMemoryDeliveryStore;
use courier_dispatch::error::AppError;
use courier_dispatch::ingest::run_ingest;
use courier_dispatch::models::CourierProfile;
use courier_dispatch::state::{AppState, Collaborators};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let directory: Arc<dyn OrderDirectory> = match &config.order_service_url {
        Some(url) => {
            tracing::info!(order_service_url = %url, "using order service");
            Arc::new(HttpOrderDirectory::new(url.clone())?)
        }
        None => {
            tracing::warn!("ORDER_SERVICE_URL not set; using an empty in-memory order directory");
            Arc::new(InMemoryDirectory::new())
        }
    };

    let sessions = Arc::new(StaticSessionVerifier::parse(&config.session_tokens)?);
    if config.service_token.is_none() {
        tracing::warn!("SERVICE_TOKEN not set; /events and re-dispatch reject every caller");
    }
    let couriers = Arc::new(InMemoryCourierStore::new());
    for courier_id in sessions.parties(Role::Courier) {
        couriers
            .upsert(CourierProfile::new(courier_id, format!("courier-{courier_id}")))
            .await?;
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        Collaborators {
            directory,
            couriers,
            deliveries: Arc::new(InMemoryDeliveryStore::new()),
            sessions,
        },
    ));

    tokio::spawn(run_ingest(
        state.events.clone(),
        state.coordinator.clone(),
        config.ingest_max_attempts,
        state.metrics.clone(),
    ));
    tokio::spawn(run_housekeeping(
        state.coordinator.clone(),
        state.presence.clone(),
        state.claims.clone(),
        config.sweep_interval,
    ));

    let app = api::rest::router(state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Infrastructure(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Infrastructure(format!("server error: {err}")))?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
