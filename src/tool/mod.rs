pub mod builtin;
pub mod types;

pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

/// Name → tool map consulted by the discovery stage. Lookup is by exact
/// name; registration replaces any previous entry with the same name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registry pre-loaded with the built-in tool set.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtin::ReadTool));
        registry.register(Arc::new(builtin::WriteTool));
        registry.register(Arc::new(builtin::EditTool));
        registry.register(Arc::new(builtin::ShellTool));
        registry.register(Arc::new(builtin::FetchTool::new()));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_is_exact() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.get("read").is_some());
        assert!(registry.get("Read").is_none());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 5);
        for name in ["read", "write", "edit", "shell", "fetch"] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
    }
}
