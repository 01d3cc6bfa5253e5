//! Per-engine context, replacing the legacy `app` singleton (spec §9).
//!
//! A single `EngineContext` is constructed once per topology and handed to
//! every factory's `init` and every source's `open`. It carries no
//! process-wide mutable state; two topologies in the same process get two
//! independent contexts.

use std::sync::Arc;

use crate::config::EngineConfig;

/// Shared, read-mostly context handed to user hooks at initialization time.
#[derive(Clone)]
pub struct EngineContext {
    config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        EngineContext { config: Arc::new(config) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Look up a (type, tag) pair in the `autoactivate` list.
    pub fn is_autoactivated(&self, type_name: &str, tag: &str) -> bool {
        self.config
            .autoactivate
            .iter()
            .any(|(t, g)| t == type_name && g == tag)
    }
}
