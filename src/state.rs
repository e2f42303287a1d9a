//! Shared application state for all routes. Both parts are read-only after startup.

use crate::config::SchemaRegistry;
use crate::store::RecordStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<dyn RecordStore>,
}

impl AppState {
    pub fn new(registry: SchemaRegistry, store: impl RecordStore + 'static) -> Self {
        Self {
            registry: Arc::new(registry),
            store: Arc::new(store),
        }
    }
}
