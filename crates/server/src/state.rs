use std::path::Path;
use std::sync::Arc;

use mediagrab_core::{Config, JobOrchestrator, JobRegistry, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    /// Read-only view of job records.
    pub fn registry(&self) -> &dyn JobRegistry {
        self.orchestrator.registry().as_ref()
    }

    pub fn output_dir(&self) -> &Path {
        self.orchestrator.output_dir()
    }
}
