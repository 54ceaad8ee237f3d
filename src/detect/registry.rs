use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::BackendFactory;

/// Named inference backends available to the daemon.
///
/// The first registered backend is the default.
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::StubBackendFactory::default());
        registry
    }

    pub fn register<F: BackendFactory + 'static>(&mut self, factory: F) {
        let name = factory.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn default_factory(&self) -> Option<Arc<dyn BackendFactory>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Resolve a configured backend name, falling back to the default for `None`.
    pub fn select(&self, name: Option<&str>) -> Result<Arc<dyn BackendFactory>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                let mut known = self.list();
                known.sort();
                anyhow!("unknown backend '{}' (available: {})", name, known.join(", "))
            }),
            None => self
                .default_factory()
                .ok_or_else(|| anyhow!("no inference backend registered")),
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
