//! Provider registry
//!
//! Built once at the host's composition root and passed to whatever needs to
//! look providers up by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use stackwright_common::{Error, Result};
use tracing::debug;

use crate::provider::example::ExampleProvider;
use crate::provider::Provider;

/// Providers keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider shipped in this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExampleProvider));
        registry
    }

    /// Add or replace a provider under its own name
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        debug!(provider = %name, "registering provider");
        self.providers.insert(name, provider);
    }

    /// Look up a provider
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers.get(name).cloned().ok_or_else(|| {
            Error::validation_for_field("provider", "name", format!("unknown provider {:?}", name))
        })
    }

    /// Registered provider names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_register_example() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["example"]);
        assert_eq!(registry.get("example").unwrap().resource_type(), "instance");
    }

    #[test]
    fn test_unknown_provider() {
        let err = ProviderRegistry::new().get("aws").err().unwrap();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(Arc::new(ExampleProvider));
        assert_eq!(registry.names().count(), 1);
    }
}
