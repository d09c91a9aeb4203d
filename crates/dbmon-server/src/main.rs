use anyhow::{bail, Result};
use dbmon_common::{Allowlist, Limits};
use dbmon_scheduler::Registry;
use dbmon_server::api;
use dbmon_server::bus;
use dbmon_server::config::{build_adapter_registry, ServerConfig};
use dbmon_server::reconcile;
use dbmon_server::state::AppState;
use dbmon_storage::{Repository, RuleStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dbmon=info".parse()?))
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        workers = config.worker_count,
        admin_port = config.admin_port,
        allowlisted_tables = config.allowlist_tables.len(),
        "dbmon worker starting"
    );

    let store: Arc<dyn RuleStore> = Arc::new(Repository::connect(&config.database_url).await?);

    let adapters = Arc::new(build_adapter_registry(&config)?);
    if adapters.is_empty() {
        bail!("no data-source adapters configured");
    }
    tracing::info!(types = ?adapters.types(), "Adapter registry ready");

    let limits = Limits::default();
    let registry = Registry::new(
        store.clone(),
        limits.clone(),
        config.worker_count,
        config.job_timeout,
    );
    let state = AppState {
        store,
        registry: registry.clone(),
        adapters,
        allowlist: Arc::new(Allowlist {
            tables: config.allowlist_tables.clone(),
        }),
        limits,
    };

    if let Err(err) = reconcile::reconcile(&state).await {
        tracing::error!(error = %err, "Startup reconciliation failed");
    }

    let nats = async_nats::connect(config.nats_url.as_str()).await?;
    let bus_handles = bus::subscribe_rule_events(&nats, state.clone()).await?;

    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.admin_port).parse()?;
    let app = api::build_admin_app(state);
    let listener = tokio::net::TcpListener::bind(admin_addr).await?;
    tracing::info!(admin = %admin_addr, "Admin server listening");

    let admin_server = axum::serve(listener, app);
    tokio::select! {
        result = admin_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "Admin server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    for handle in bus_handles {
        handle.abort();
    }
    registry.stop();
    tracing::info!("Worker stopped");

    Ok(())
}
