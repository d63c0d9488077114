//! Shared application state.

use std::sync::Arc;

use seqserve_core::Processor;

use crate::config::Config;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub processor: Arc<Processor>,
}

impl AppState {
    pub fn new(config: Config, processor: Arc<Processor>) -> Self {
        Self { config, processor }
    }
}
