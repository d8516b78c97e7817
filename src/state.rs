//! Application state management
//!
//! Contains shared state accessible across all handlers. Nothing here holds
//! credentials; those live only inside the configuration of a running job.

use crate::config::MigrationSettings;
use crate::migration::RunRegistry;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Migration runs started by this process
    pub runs: RunRegistry,

    /// Tunables applied to every run and connection test
    pub settings: MigrationSettings,
}

impl AppState {
    pub fn new(settings: MigrationSettings) -> Self {
        Self {
            runs: RunRegistry::new(settings.clone()),
            settings,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
