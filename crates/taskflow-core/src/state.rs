//! Shared application state: configuration plus everything built from it.

use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::EngineError;
use crate::store::TaskStore;
use crate::workflow::{
    backend_from_config, DefinitionStore, GenerationBackend, Pacing, StepExecutor, WorkflowEngine,
};

pub struct AppStateInner {
    pub config: EngineConfig,
    pub db: Database,
    pub task_store: TaskStore,
    pub definitions: Arc<DefinitionStore>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub backend: Arc<dyn GenerationBackend>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire the stores, definitions, capabilities and backend from `config`.
    ///
    /// Definitions are the built-ins overlaid with the YAML files in
    /// `task_configs_dir`; rejected files are logged and skipped.
    pub fn new(config: EngineConfig, db: Database) -> Result<Self, EngineError> {
        config.validate()?;

        let mut definitions = DefinitionStore::with_builtins();
        let report = definitions.load_dir(&config.task_configs_dir)?;
        for (path, reason) in &report.rejected {
            tracing::warn!("[State] Skipping workflow {}: {}", path.display(), reason);
        }

        let capabilities = CapabilityRegistry::with_builtins(&config);
        let backend = backend_from_config(&config.backend);

        Ok(Self::with_parts(config, db, definitions, capabilities, backend))
    }

    /// Assemble state from prebuilt parts.
    pub fn with_parts(
        config: EngineConfig,
        db: Database,
        definitions: DefinitionStore,
        capabilities: CapabilityRegistry,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            task_store: TaskStore::new(db.clone()),
            definitions: Arc::new(definitions),
            capabilities: Arc::new(capabilities),
            backend,
            config,
            db,
        }
    }

    /// A fresh engine over this state.
    pub fn engine(&self) -> WorkflowEngine {
        let executor = StepExecutor::from_config(
            &self.config,
            self.capabilities.clone(),
            self.backend.clone(),
        );
        WorkflowEngine::new(
            self.task_store.clone(),
            self.definitions.clone(),
            executor,
            Pacing::from_config(&self.config),
        )
        .with_results_dir(self.config.results_dir.clone())
    }
}
