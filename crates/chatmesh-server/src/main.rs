use chatmesh_server::api::{self, AppState};
use chatmesh_server::config::ServerConfig;
use chatmesh_server::tasks;
use chatmesh_shared::constants::DEFAULT_HUB_SECRET;
use chatmesh_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,chatmesh_server=debug,chatmesh_sync=debug")
        }))
        .init();

    info!("Starting chatmesh server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        role = ?config.role,
        name = %config.node_name,
        url = %config.node_url,
        sync_enabled = config.sync_enabled,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );
    if config.hub_secret == DEFAULT_HUB_SECRET {
        warn!("HUB_SHARED_SECRET not set; using the development default");
    }

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default(&config.database_file_name())?,
    };

    // -----------------------------------------------------------------------
    // 4. Wire services and start the delivery workers
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let local_addr = config.local_addr;
    let concurrency = config.delivery_concurrency;
    let (app_state, queue) = AppState::new(config, db)?;
    chatmesh_sync::spawn_delivery_workers(queue, app_state.transport.clone(), concurrency);

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks for this role
    // -----------------------------------------------------------------------
    let _tasks = tasks::spawn_all(&app_state);

    // -----------------------------------------------------------------------
    // 6. Run the HTTP listeners (blocks until shutdown)
    // -----------------------------------------------------------------------
    let local_state = app_state.clone();
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        result = api::serve_local(local_state, local_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Local write listener failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
