use crate::config::Config;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use task_store::TaskStore;

#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<TaskStore>,
    pub config: Arc<Config>,
    pub polling_active: Arc<AtomicBool>,
}

impl AppContext {
    pub fn new(store: TaskStore, config: Config) -> Self {
        AppContext {
            store: Arc::new(store),
            config: Arc::new(config),
            polling_active: Arc::new(AtomicBool::new(false)),
        }
    }
}
