//! Wiring of store, auth session, queue, and flush coordinator.

use std::sync::Arc;

use altrinity_auth::AuthSession;
use altrinity_config_and_utils::{Config, Paths};
use altrinity_storage::{KeyValueStore, SqliteStore};
use route_outbox::{FlushCoordinator, HttpRouteSubmitter, RouteQueue, SenderConfig};
use tracing::info;

/// Everything a command needs, opened once per process.
pub struct App {
    pub config: Config,
    pub auth: Arc<AuthSession>,
    pub queue: Arc<RouteQueue>,
    pub coordinator: Arc<FlushCoordinator>,
}

impl App {
    /// Open the store under `paths`, restore the session, and load the queue.
    pub async fn open(config: Config, paths: &Paths) -> anyhow::Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&paths.store_file())?);
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let auth = Arc::new(AuthSession::new(store.clone()));
        auth.restore()?;

        let queue = Arc::new(RouteQueue::new(store));
        queue.load().await?;

        let submitter = Arc::new(HttpRouteSubmitter::new(SenderConfig {
            api_base_url: config.api_base_url.clone(),
            timeout_secs: config.request_timeout_secs,
        })?);

        let coordinator = Arc::new(FlushCoordinator::new(
            queue.clone(),
            submitter,
            auth.clone(),
            config.max_attempts,
        ));

        info!(
            api_base_url = %config.api_base_url,
            authenticated = auth.is_authenticated(),
            "Route sync ready"
        );

        Ok(Self {
            config,
            auth,
            queue,
            coordinator,
        })
    }
}
