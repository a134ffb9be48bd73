//! Application state and server bootstrap.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tracing::info;

use lifeboat_core::clock::HlcClock;
use lifeboat_core::errors::Result;
use lifeboat_core::events::EventStore;
use lifeboat_core::export::{ExportService, DEFAULT_EXPORT_PAGE_LIMIT};
use lifeboat_core::identity::{HealthService, IdentityStore};
use lifeboat_core::projection::{ProjectionRebuilder, ProjectionStore};
use lifeboat_core::restore::{RestoreEngine, RestoreSessionStore};
use lifeboat_storage_sqlite::{
    create_pool, init, run_migrations, spawn_writer, EventRepository, IdentityRepository,
    ProjectionRepository, RestoreSessionRepository,
};

const DEFAULT_DATA_DIR: &str = "./lifeboat-data";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8640";

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Server configuration, read from the environment at bootstrap.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: String,
    pub bind_addr: String,
    /// Privileged restore credential. Restore is disabled (fails closed)
    /// when unset.
    pub operator_pin: Option<String>,
    pub export_page_limit: i64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: env_trimmed("LIFEBOAT_DATA_DIR")
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            bind_addr: env_trimmed("LIFEBOAT_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            operator_pin: env_trimmed("LIFEBOAT_OPERATOR_PIN"),
            export_page_limit: env_trimmed("LIFEBOAT_EXPORT_PAGE_LIMIT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_EXPORT_PAGE_LIMIT),
        }
    }
}

/// Shared state for all request handlers.
pub struct AppState {
    pub export_service: ExportService,
    pub restore_engine: RestoreEngine,
    pub health_service: Arc<HealthService>,
    pub events: Arc<dyn EventStore>,
    pub sessions: Arc<dyn RestoreSessionStore>,
    pub exports_served: AtomicU64,
    pub config: ServerConfig,
}

/// Wire repositories and services over one pool and writer.
pub async fn build_state(config: ServerConfig) -> Result<Arc<AppState>> {
    let db_path = init(&config.data_dir)?;
    run_migrations(&db_path)?;
    let pool = create_pool(&db_path)?;
    let writer = spawn_writer(Arc::clone(&pool));

    let events: Arc<dyn EventStore> =
        Arc::new(EventRepository::new(Arc::clone(&pool), writer.clone()));
    let projections: Arc<dyn ProjectionStore> =
        Arc::new(ProjectionRepository::new(Arc::clone(&pool), writer.clone()));
    let sessions: Arc<dyn RestoreSessionStore> = Arc::new(RestoreSessionRepository::new(
        Arc::clone(&pool),
        writer.clone(),
    ));

    let identity = IdentityRepository::new(pool, writer).get_or_init().await?;
    info!(
        "server instance '{}' (initialized {})",
        identity.server_instance_id, identity.initialized_at
    );

    let clock = Arc::new(HlcClock::new(identity.server_instance_id.clone()));
    let health_service = Arc::new(HealthService::new(identity, Arc::clone(&events)));
    let rebuilder = Arc::new(ProjectionRebuilder::new(
        Arc::clone(&events),
        Arc::clone(&projections),
    ));
    let export_service = ExportService::new(
        Arc::clone(&events),
        projections,
        Arc::clone(&health_service),
        config.export_page_limit,
    );
    let restore_engine = RestoreEngine::new(
        Arc::clone(&events),
        Arc::clone(&sessions),
        rebuilder,
        clock,
    );

    if config.operator_pin.is_none() {
        tracing::warn!("LIFEBOAT_OPERATOR_PIN is not set; restore submissions will be rejected");
    }

    Ok(Arc::new(AppState {
        export_service,
        restore_engine,
        health_service,
        events,
        sessions,
        exports_served: AtomicU64::new(0),
        config,
    }))
}

pub async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let state = build_state(config).await?;

    let app = crate::api::router().with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    info!("lifeboat server listening on {}", state.config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
