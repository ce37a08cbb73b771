//! Component registry
//!
//! Built once at startup, then frozen and shared by reference with the
//! control loop. Iteration follows registration order.

use super::{Component, ComponentContext};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use tracing::{debug, info};

/// Mutable registry used during startup
#[derive(Default)]
pub struct ComponentRegistryBuilder {
    components: IndexMap<String, Box<dyn Component>>,
}

impl ComponentRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under a unique name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        component: Box<dyn Component>,
    ) -> Result<&mut Self> {
        let name = name.into();
        if self.components.contains_key(&name) {
            return Err(Error::ComponentAlreadyRegistered { name });
        }
        debug!("Registered component {}", name);
        self.components.insert(name, component);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Initialize every component with the shared context and freeze the registry
    pub fn build(mut self, ctx: &ComponentContext) -> ComponentRegistry {
        for (name, component) in self.components.iter_mut() {
            component.initialize(ctx);
            debug!("Initialized component {}", name);
        }
        info!(
            components = ?self.components.keys().collect::<Vec<_>>(),
            "Component registry built"
        );
        ComponentRegistry {
            components: self.components,
        }
    }
}

/// Immutable registry of initialized components
pub struct ComponentRegistry {
    components: IndexMap<String, Box<dyn Component>>,
}

impl ComponentRegistry {
    /// Components in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Component)> {
        self.components
            .iter()
            .map(|(name, component)| (name.as_str(), component.as_ref()))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Component> {
        self.components.get(name).map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StorageCluster;
    use crate::testing;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type InitLog = Arc<Mutex<Vec<&'static str>>>;

    struct Probe {
        name: &'static str,
        initialized: InitLog,
    }

    #[async_trait]
    impl Component for Probe {
        fn initialize(&mut self, _ctx: &ComponentContext) {
            self.initialized.lock().push(self.name);
        }

        fn is_enabled(&self, _cluster: &StorageCluster) -> bool {
            true
        }

        async fn reconcile(&self, _cluster: &StorageCluster) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _cluster: &StorageCluster) -> Result<()> {
            Ok(())
        }

        fn mark_deleted(&self) {}
    }

    fn probe(name: &'static str, log: &InitLog) -> Box<dyn Component> {
        Box::new(Probe {
            name,
            initialized: log.clone(),
        })
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let log = InitLog::default();
        let mut builder = ComponentRegistryBuilder::new();
        builder.register("Stork", probe("Stork", &log)).unwrap();

        let err = builder.register("Stork", probe("Stork", &log)).err().unwrap();
        assert_matches::assert_matches!(
            err,
            Error::ComponentAlreadyRegistered { name } if name == "Stork"
        );
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_build_initializes_in_order() {
        let log = InitLog::default();
        let mut builder = ComponentRegistryBuilder::new();
        builder
            .register("Stork", probe("Stork", &log))
            .unwrap()
            .register("VolumePlacementStrategy", probe("VolumePlacementStrategy", &log))
            .unwrap();
        assert!(log.lock().is_empty());

        let harness = testing::Harness::new();
        let registry = builder.build(&harness.context());

        // Registration order, not name order
        assert_eq!(*log.lock(), vec!["Stork", "VolumePlacementStrategy"]);
        assert_eq!(registry.names(), vec!["Stork", "VolumePlacementStrategy"]);
        assert!(registry.get("Stork").is_some());
        assert!(registry.get("Missing").is_none());
    }
}
