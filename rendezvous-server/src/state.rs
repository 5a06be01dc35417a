use std::sync::Arc;

use crate::pipe::fanout::FanoutRegistry;
use crate::pipe::PipeRegistry;
use crate::store::ContentStore;

/// Shared application state threaded through every route handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub pipes: Arc<PipeRegistry>,
    pub fanout: Arc<FanoutRegistry>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: Arc::new(ContentStore::new()),
            pipes: Arc::new(PipeRegistry::new()),
            fanout: Arc::new(FanoutRegistry::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
