//! Permission configuration: the allow/ask/deny rule lists and their
//! JSON-backed store.
//!
//! The pipeline consumes a `PermissionConfig` snapshot per call and calls
//! back through `RulePersister` when the user grants a persistent approval.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Ordered rule lists matched against call signatures. First match wins
/// within each list; deny always beats allow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub allow: Vec<String>,
    pub ask: Vec<String>,
    pub deny: Vec<String>,
}

impl PermissionConfig {
    #[must_use]
    pub fn with_allow(mut self, rule: impl Into<String>) -> Self {
        self.allow.push(rule.into());
        self
    }

    #[must_use]
    pub fn with_ask(mut self, rule: impl Into<String>) -> Self {
        self.ask.push(rule.into());
        self
    }

    #[must_use]
    pub fn with_deny(mut self, rule: impl Into<String>) -> Self {
        self.deny.push(rule.into());
        self
    }
}

/// Callback for appending learned allow rules. A failure here is logged
/// by the caller and never fails the tool call.
pub trait RulePersister: Send + Sync {
    fn append_allow_rule(&self, rule: &str) -> Result<()>;
}

/// JSON file store for the permission config.
///
/// Rewrites touch only the three rule arrays; unknown fields in the file
/// are preserved for forward compatibility.
#[derive(Debug, Clone)]
pub struct PermissionConfigStore {
    path: PathBuf,
}

impl PermissionConfigStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the user's home directory.
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".to_string()))?;
        Ok(Self::new(home.join(".axon").join("permissions.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, falling back to defaults when the file is missing.
    /// A malformed file is reported and treated as empty rather than
    /// taking the pipeline down.
    pub fn load(&self) -> Result<PermissionConfig> {
        if !self.path.exists() {
            return Ok(PermissionConfig::default());
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(
                    "Invalid permission config at {}: {err}; using defaults",
                    self.path.display()
                );
                Ok(PermissionConfig::default())
            }
        }
    }

    /// Write the rule lists back, keeping any unknown fields the file
    /// already carries.
    pub fn save(&self, config: &PermissionConfig) -> Result<()> {
        let mut root = self.read_raw()?;
        let object = root
            .as_object_mut()
            .ok_or_else(|| Error::Config("permission config root must be an object".to_string()))?;
        object.insert("allow".to_string(), serde_json::to_value(&config.allow)?);
        object.insert("ask".to_string(), serde_json::to_value(&config.ask)?);
        object.insert("deny".to_string(), serde_json::to_value(&config.deny)?);
        self.write_raw(&root)
    }

    fn read_raw(&self) -> Result<Value> {
        if !self.path.exists() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) | Err(_) => Ok(Value::Object(serde_json::Map::new())),
        }
    }

    fn write_raw(&self, root: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(root)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

impl RulePersister for PermissionConfigStore {
    fn append_allow_rule(&self, rule: &str) -> Result<()> {
        let mut root = self.read_raw()?;
        let object = root
            .as_object_mut()
            .ok_or_else(|| Error::Config("permission config root must be an object".to_string()))?;
        let allow = object
            .entry("allow")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(rules) = allow else {
            return Err(Error::Config("'allow' must be an array".to_string()));
        };
        let already_present = rules.iter().any(|r| r.as_str() == Some(rule));
        if !already_present {
            rules.push(Value::String(rule.to_string()));
            self.write_raw(&root)?;
        }
        Ok(())
    }
}
