//! Registry of analysis domains
//!
//! Configuration problems (duplicate ids, a schema whose array property does
//! not match the artifact array key, schemas that do not compile) are rejected
//! at registration, so a registered domain is always usable.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use super::{loader, presets, DomainConfig, ResponseKind};
use crate::error::{ConfigError, Result, WorkbenchError};

/// A registered domain: its configuration plus the compiled artifact schema
pub struct Domain {
    config: DomainConfig,
    item_schema: Option<JSONSchema>,
}

impl Domain {
    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Whether a generated array element satisfies the artifact schema
    pub fn accepts_artifact(&self, value: &Value) -> bool {
        self.item_schema
            .as_ref()
            .map_or(true, |schema| schema.is_valid(value))
    }
}

impl Deref for Domain {
    type Target = DomainConfig;

    fn deref(&self) -> &DomainConfig {
        &self.config
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.config.id)
            .field("item_schema", &self.item_schema.is_some())
            .finish()
    }
}

/// Domains by id
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: BTreeMap<String, Arc<Domain>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in domains
    pub fn with_defaults() -> std::result::Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in presets::all() {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Validate and add a domain
    pub fn register(&mut self, config: DomainConfig) -> std::result::Result<(), ConfigError> {
        if self.domains.contains_key(&config.id) {
            return Err(ConfigError::DuplicateDomain(config.id));
        }
        let item_schema = validate(&config)?;

        tracing::debug!(domain = %config.id, fields = config.input_fields.len(), "registered domain");
        self.domains.insert(
            config.id.clone(),
            Arc::new(Domain {
                config,
                item_schema,
            }),
        );
        Ok(())
    }

    /// Load every `*.yaml`/`*.yml` domain file in `dir`; returns how many
    pub fn load_dir(&mut self, dir: &Path) -> std::result::Result<usize, ConfigError> {
        let configs = loader::load_dir(dir)?;
        let count = configs.len();
        for config in configs {
            self.register(config)?;
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Domain>> {
        self.domains
            .get(id)
            .cloned()
            .ok_or_else(|| WorkbenchError::UnknownDomain(id.to_string()))
    }

    /// Seed text for the evaluation prompt editor
    pub fn default_evaluation_prompt(&self, id: &str) -> Result<String> {
        Ok(self.get(id)?.evaluation.system.clone())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.domains.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Domain>> {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Check a configuration and compile its artifact schema
fn validate(config: &DomainConfig) -> std::result::Result<Option<JSONSchema>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        domain: config.id.clone(),
        reason: reason.to_string(),
    };

    if config.id.trim().is_empty() {
        return Err(invalid("domain id is empty"));
    }
    if config.response.array_key.trim().is_empty() {
        return Err(invalid("artifact array key is empty"));
    }
    if config.artifact_fields.title.trim().is_empty() {
        return Err(invalid("artifact title field is empty"));
    }
    if config.execution.entry_point.trim().is_empty() {
        return Err(invalid("execution entry point is empty"));
    }
    if config.evaluation.language.trim().is_empty() {
        return Err(invalid("evaluation language is empty"));
    }

    let mut seen = std::collections::HashSet::new();
    for field in &config.input_fields {
        if !seen.insert(field.id.as_str()) {
            return Err(invalid(&format!("duplicate input field '{}'", field.id)));
        }
    }

    let ResponseKind::JsonSchema { schema, .. } = &config.response.kind else {
        return Ok(None);
    };

    let declares_array = schema
        .get("properties")
        .and_then(|props| props.get(&config.response.array_key))
        .and_then(|prop| prop.get("type"))
        .and_then(Value::as_str)
        == Some("array");
    if !declares_array {
        return Err(ConfigError::ArrayKeyMismatch {
            domain: config.id.clone(),
            key: config.response.array_key.clone(),
        });
    }

    let schema_err = |reason: String| ConfigError::InvalidSchema {
        domain: config.id.clone(),
        reason,
    };
    JSONSchema::compile(schema).map_err(|e| schema_err(e.to_string()))?;

    match config.response.item_schema() {
        Some(items) => JSONSchema::compile(items)
            .map(Some)
            .map_err(|e| schema_err(e.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResponseConstraint;
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = DomainRegistry::with_defaults().unwrap();
        assert_eq!(registry.ids(), vec!["hypothesis", "modeling", "quality"]);
        assert!(!registry.default_evaluation_prompt("hypothesis").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_domain() {
        let registry = DomainRegistry::with_defaults().unwrap();
        assert!(matches!(
            registry.get("forecasting"),
            Err(WorkbenchError::UnknownDomain(ref id)) if id == "forecasting"
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = DomainRegistry::with_defaults().unwrap();
        let result = registry.register(presets::quality());
        assert!(matches!(result, Err(ConfigError::DuplicateDomain(_))));
    }

    #[test]
    fn test_array_key_mismatch_rejected() {
        let mut config = presets::quality();
        config.id = "broken".to_string();
        config.response = ResponseConstraint {
            array_key: "items".to_string(),
            ..ResponseConstraint::schema("checks", "checks", json!({"type": "object"}))
        };

        let result = DomainRegistry::new().register(config);
        assert!(matches!(
            result,
            Err(ConfigError::ArrayKeyMismatch { ref key, .. }) if key == "items"
        ));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut config = presets::quality();
        config.response = ResponseConstraint::schema("checks", "checks", json!({"type": 12}));

        let result = DomainRegistry::new().register(config);
        assert!(matches!(result, Err(ConfigError::InvalidSchema { .. })));
    }

    #[test]
    fn test_item_schema_filters_artifacts() {
        let registry = DomainRegistry::with_defaults().unwrap();
        let domain = registry.get("hypothesis").unwrap();

        assert!(domain.accepts_artifact(&json!({"hypothesis": "h", "benefit": "b"})));
        assert!(!domain.accepts_artifact(&json!({"hypothesis": "h"})));
    }

    #[test]
    fn test_loose_domain_accepts_anything() {
        let mut config = presets::quality();
        config.id = "loose".to_string();
        config.response = ResponseConstraint::loose("checks");

        let mut registry = DomainRegistry::new();
        registry.register(config).unwrap();
        assert!(registry.get("loose").unwrap().accepts_artifact(&json!(42)));
    }
}
