//! Cockpit gateway binary. Config from `config/cockpit.toml` plus `COCKPIT__*` env,
//! secrets from `.env`.

use cockpit_core::{
    CoreConfig, HttpChangeProposer, OpenAiAssistants, Secrets, SledStore, TurnDeps,
    TurnOrchestrator,
};
use cockpit_gateway::{build_app, AppState};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = CoreConfig::load()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let secrets = Secrets::from_env();
    if secrets.provider_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; every turn will fail upstream");
    }
    if config.autonomy_endpoint.is_none() || secrets.service_key.is_none() {
        tracing::warn!("Autonomy endpoint or COCKPIT_SERVICE_KEY missing; change proposals will be reported as tool errors");
    }

    let store = Arc::new(SledStore::open_path(&config.storage_path)?);
    let provider = Arc::new(OpenAiAssistants::new(
        &config.provider_base_url,
        secrets.provider_api_key.clone(),
    ));
    let proposer = Arc::new(HttpChangeProposer::new(
        config.autonomy_endpoint.clone(),
        secrets.service_key.clone(),
    ));
    let orchestrator = TurnOrchestrator::new(
        TurnDeps::new(store.clone(), store.clone(), provider, proposer),
        &config,
    );

    let app = build_app(AppState::new(orchestrator, &config.app_name));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        app = %config.app_name,
        addr = %config.bind_addr,
        storage = %config.storage_path,
        version = cockpit_core::version(),
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.flush()?;
    tracing::info!("Gateway stopped");
    Ok(())
}

/// stdout always; a daily rolling file as well when `log_dir` is set.
fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cockpit-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
