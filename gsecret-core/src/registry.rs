use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;

use crate::chain::{Chain, ChainController, ChainStageBuilder};
use crate::error::BuildError;

/// A registry of stage builders keyed by stage name, specialized to one
/// stage contract `T`.
pub struct Interface<T: ?Sized> {
    pub name: String,
    stages: HashMap<String, Arc<dyn ChainStageBuilder<T>>>,
}

impl<T: ?Sized> Interface<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
        }
    }

    pub fn register_stage(
        &mut self,
        name: impl Into<String>,
        builder: Arc<dyn ChainStageBuilder<T>>,
    ) -> Result<(), BuildError> {
        let name = name.into();
        if self.stages.contains_key(&name) {
            return Err(BuildError::DuplicateStage(name));
        }
        self.stages.insert(name, builder);
        Ok(())
    }

    pub fn get_stage(&self, name: &str) -> Option<&Arc<dyn ChainStageBuilder<T>>> {
        self.stages.get(name)
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }
}

/// `{ name, chain_controller, interface, router }` — one API surface
/// mounted under `/<name>`.
pub struct APIPlugin<T: ?Sized, S = ()> {
    pub name: String,
    pub chain_controller: ChainController<T>,
    pub interface: Interface<T>,
    pub router: Router<S>,
}

impl<T: ?Sized, S> APIPlugin<T, S> {
    pub fn new(name: impl Into<String>, interface: Interface<T>, router: Router<S>) -> Self {
        Self {
            name: name.into(),
            chain_controller: ChainController::new(),
            interface,
            router,
        }
    }
}

/// Process-wide map of API name -> [`APIPlugin`]. Built once at startup by
/// `main` and handed to the [`crate::builder::ApiBuilder`]; read-only
/// thereafter.
pub struct APIPluginManager<T: ?Sized, S = ()> {
    api_plugins: HashMap<String, APIPlugin<T, S>>,
}

impl<T: ?Sized, S> APIPluginManager<T, S> {
    pub fn new() -> Self {
        Self {
            api_plugins: HashMap::new(),
        }
    }

    pub fn register_plugin(&mut self, plugin: APIPlugin<T, S>) -> Result<(), BuildError> {
        if self.api_plugins.contains_key(&plugin.name) {
            return Err(BuildError::DuplicateApi(plugin.name));
        }
        self.api_plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    pub fn get_api(&self, name: &str) -> Option<&APIPlugin<T, S>> {
        self.api_plugins.get(name)
    }

    pub fn get_api_mut(&mut self, name: &str) -> Option<&mut APIPlugin<T, S>> {
        self.api_plugins.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.api_plugins.keys().map(|s| s.as_str())
    }

    pub fn into_plugins(self) -> HashMap<String, APIPlugin<T, S>> {
        self.api_plugins
    }
}

impl<T: ?Sized, S> Default for APIPluginManager<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Dummy: Send + Sync {}

    struct NoopBuilder;
    impl ChainStageBuilder<dyn Dummy> for NoopBuilder {
        fn build(
            &self,
            _config: Option<serde_json::Value>,
            _chain: &Chain<dyn Dummy>,
        ) -> Result<Arc<dyn Dummy>, BuildError> {
            unreachable!("not exercised in these tests")
        }
    }

    #[test]
    fn register_stage_rejects_duplicates() {
        let mut iface: Interface<dyn Dummy> = Interface::new("gsecret");
        iface.register_stage("cache", Arc::new(NoopBuilder)).unwrap();
        let err = iface.register_stage("cache", Arc::new(NoopBuilder)).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateStage(name) if name == "cache"));
    }

    #[test]
    fn get_stage_finds_registered_builder() {
        let mut iface: Interface<dyn Dummy> = Interface::new("gsecret");
        iface.register_stage("cache", Arc::new(NoopBuilder)).unwrap();
        assert!(iface.has_stage("cache"));
        assert!(iface.get_stage("cache").is_some());
        assert!(iface.get_stage("missing").is_none());
    }

    #[test]
    fn manager_rejects_duplicate_api_registration() {
        let mut manager: APIPluginManager<dyn Dummy> = APIPluginManager::new();
        let plugin = APIPlugin::new("gsecret", Interface::new("gsecret"), Router::new());
        manager.register_plugin(plugin).unwrap();

        let dup = APIPlugin::new("gsecret", Interface::new("gsecret"), Router::new());
        let err = manager.register_plugin(dup).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateApi(name) if name == "gsecret"));
    }
}
