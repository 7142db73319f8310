use std::collections::HashMap;
use std::sync::Arc;

use crate::capabilities::{
    Capability, CodeExecutionCapability, FileOperationsCapability, WebSearchCapability,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::workflow::schema::WorkflowDefinition;

/// Name → capability map. Populated before the engine starts and read-only
/// afterwards.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `web_search`, `file_operations` and `code_execution`.
    pub fn with_builtins(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register_capability(Arc::new(WebSearchCapability::new(&config.search)));
        registry.register_capability(Arc::new(FileOperationsCapability::new(
            config.workspace_dir.clone(),
        )));
        registry.register_capability(Arc::new(CodeExecutionCapability::new(
            config.allowed_languages.clone(),
        )));
        registry
    }

    /// Register `capability` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        let name = name.into();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!("[Capabilities] Replaced capability '{}'", name);
        } else {
            tracing::debug!("[Capabilities] Registered capability '{}'", name);
        }
    }

    /// Register under the capability's own name.
    pub fn register_capability(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        self.register(name, capability);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Capability>, EngineError> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCapability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Sorted capability names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail with `MalformedWorkflow` if `definition` names an unregistered
    /// capability.
    pub fn check_definition(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        match definition.capability_names().find(|name| !self.contains(name)) {
            Some(missing) => Err(EngineError::malformed(
                &definition.task_type,
                format!("step references unknown capability '{}'", missing),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityContext, CapabilityError, Parameters};
    use crate::models::StepOutcome;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            ctx: &CapabilityContext<'_>,
            _params: &Parameters,
        ) -> Result<StepOutcome, CapabilityError> {
            Ok(StepOutcome::ok(ctx.content))
        }
    }

    #[test]
    fn test_lookup_unknown_capability() {
        let registry = CapabilityRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(EngineError::UnknownCapability(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_register_and_names() {
        let mut registry = CapabilityRegistry::with_builtins(&EngineConfig::default());
        registry.register_capability(Arc::new(Echo));
        assert_eq!(
            registry.names(),
            vec!["code_execution", "echo", "file_operations", "web_search"]
        );
        assert_eq!(registry.lookup("echo").unwrap().name(), "echo");
    }

    #[test]
    fn test_check_definition() {
        let registry = CapabilityRegistry::new();
        let def = WorkflowDefinition::from_yaml(
            "type: t\nsteps:\n  - name: a\n    plugin: echo\n",
            None,
        )
        .unwrap();
        let err = registry.check_definition(&def).unwrap_err();
        assert!(err.to_string().contains("unknown capability 'echo'"));

        let mut registry = registry;
        registry.register_capability(Arc::new(Echo));
        assert!(registry.check_definition(&def).is_ok());
    }
}
