//! Altsmith - unattended SEO metadata generation for WordPress media
//! libraries.
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod providers;
pub mod ratelimit;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod wordpress;

use std::net::SocketAddr;
use std::sync::Arc;

use altsmith_common::ClientId;
use altsmith_db::pool::{get_conn, init_pool, DbPool};
use altsmith_db::queries::clients;
use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::providers::{HuggingFaceProvider, MistralProvider, OllamaProvider, ProviderRouter};
use crate::ratelimit::RateLimiterSet;
use crate::state::AppContext;

/// Build the provider router from configuration. Providers are always
/// registered; ones missing credentials report themselves unavailable and
/// the router skips them.
pub fn build_provider_router(config: &Config) -> ProviderRouter {
    let mut router = ProviderRouter::new(config.providers.order.clone());
    router.register(Arc::new(MistralProvider::new(&config.providers.mistral)));
    router.register(Arc::new(HuggingFaceProvider::new(
        &config.providers.huggingface,
    )));
    router.register(Arc::new(OllamaProvider::new(&config.providers.ollama)));
    router
}

/// Register clients declared in the config file. Runs at startup, before
/// the API is reachable; API registrations use the same upsert.
pub fn sync_clients_from_config(db: &DbPool, config: &Config) -> Result<()> {
    if config.clients.is_empty() {
        return Ok(());
    }

    let conn = get_conn(db)?;
    for client in &config.clients {
        let id = ClientId::parse(&client.id)?;
        let language = client
            .language
            .as_deref()
            .unwrap_or(&config.providers.language);
        clients::upsert_client(
            &conn,
            &id,
            &client.base_url,
            &client.username,
            &client.app_password,
            language,
            client.provider_order.as_deref(),
        )?;
    }
    tracing::info!(count = config.clients.len(), "registered clients from config");
    Ok(())
}

/// Start the service: database, scheduler, sweep timer, and HTTP server.
/// Returns once a shutdown signal has been handled and background tasks
/// have stopped.
pub async fn start(config: Config) -> Result<()> {
    let db = init_pool(&config.database.path).context("Failed to open database")?;

    // Recover state left behind by an unclean shutdown before accepting
    // any new work.
    scheduler::recover_interrupted(&db)?;
    sync_clients_from_config(&db, &config)?;

    let router = Arc::new(build_provider_router(&config));
    let available = router.available_names();
    if available.is_empty() {
        tracing::warn!("no metadata providers are configured; runs will fail until one is");
    } else {
        tracing::info!(providers = ?available, "metadata providers ready");
    }

    let wp_limits = Arc::new(RateLimiterSet::new(config.wordpress.requests_per_minute));
    let config = Arc::new(config);

    let cancel = CancellationToken::new();

    let deps = scheduler::SchedulerDeps {
        db: db.clone(),
        config: config.clone(),
        router: router.clone(),
        wp_limits: wp_limits.clone(),
    };
    let (handle, dispatcher_handle) = scheduler::spawn(deps, cancel.clone());

    // Unattended sweep timer.
    let sweep_handle = handle.clone();
    let sweep_cancel = cancel.clone();
    let interval_hours = config.scheduler.interval_hours;
    let sweep_task = tokio::spawn(async move {
        scheduler::run_schedule_loop(sweep_handle, interval_hours, sweep_cancel).await;
    });

    let ctx = AppContext {
        db,
        config: config.clone(),
        router,
        wp_limits,
        scheduler: handle,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = server::create_router(ctx);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Signal background tasks to stop and wait for them.
    cancel.cancel();
    let _ = tokio::join!(dispatcher_handle, sweep_task);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => {},
    }

    tracing::info!("Shutdown signal received");
}
