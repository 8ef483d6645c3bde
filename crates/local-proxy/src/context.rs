use crate::config::Config;
use remote_bridge::{RemoteClient, StagingLocks};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use task_store::TaskStore;

/// Explicit, process-wide context passed into every handler and into
/// the Reconciler (spec.md §9: replaces module-level globals for the
/// database engine, the current user, and the poll thread).
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<TaskStore>,
    pub config: Arc<Config>,
    pub remote: Option<Arc<RemoteClient>>,
    pub staging_locks: Arc<StagingLocks>,
    pub polling_active: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(store: TaskStore, config: Config) -> Self {
        let remote = config
            .remote
            .as_ref()
            .map(|r| Arc::new(RemoteClient::new(r.server_url.clone())));
        AppContext {
            store: Arc::new(store),
            config: Arc::new(config),
            remote,
            staging_locks: Arc::new(StagingLocks::new()),
            polling_active: Arc::new(AtomicBool::new(false)),
        }
    }
}
