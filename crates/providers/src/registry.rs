//! Model registry: selects the model adapter named in an agent's config.
//!
//! Handles adapter registration and lookup. Hosts register their own
//! adapters here; the workspace only ships the built-in `echo` adapter.

use std::collections::HashMap;
use std::sync::Arc;

use agentbus_core::error::{Error, Result};
use agentbus_core::model::ModelAdapter;
use tracing::info;

use crate::echo::EchoAdapter;

/// Maps provider names to model adapters.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in adapters already registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoAdapter::new()));
        registry
    }

    /// Register an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) {
        let name = adapter.name().to_string();
        self.register_as(name, adapter);
    }

    /// Register an adapter under an explicit name (aliasing).
    pub fn register_as(&mut self, name: impl Into<String>, adapter: Arc<dyn ModelAdapter>) {
        let name = name.into();
        info!(model = %name, adapter = %adapter.name(), "Registered model adapter");
        self.adapters.insert(name, adapter);
    }

    /// Get an adapter by provider name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing name is an `UnknownModel` error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ModelAdapter>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// List all registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
