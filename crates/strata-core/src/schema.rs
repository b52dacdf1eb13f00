//! Schema registry: type name → structural validator and multiplicity.
//!
//! Unregistered types are accepted without structural constraints;
//! registered types are enforced strictly. Resolution is async because a
//! registry may live behind a remote service, which is also why the store
//! resolves validators before it takes any lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// One side of a relationship's cardinality.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

/// Cardinality constraint for a relationship type.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Multiplicity {
    #[serde(default)]
    pub src: Cardinality,
    #[serde(default)]
    pub dst: Cardinality,
}

/// Validates a property bag. Returns every problem found, not just the first.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<(), Vec<String>>;
}

/// Run an optional validator, mapping failures to `ValidationFailed`.
pub fn check(
    validator: Option<&Arc<dyn Validator>>,
    type_name: &str,
    properties: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    match validator {
        Some(v) => v
            .validate(properties)
            .map_err(|reasons| StrataError::ValidationFailed {
                type_name: type_name.to_string(),
                reasons,
            }),
        None => Ok(()),
    }
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Validator for an object type, or `None` when the type is unregistered.
    async fn object_validator(&self, object_type: &str) -> Option<Arc<dyn Validator>>;

    /// Validator for a relationship type, or `None` when unregistered.
    async fn relationship_validator(&self, rel_type: &str) -> Option<Arc<dyn Validator>>;

    /// Declared multiplicity, `{many, many}` when not declared.
    async fn relationship_multiplicity(&self, rel_type: &str) -> Multiplicity;
}

// ── Structural Schemas ────────────────────────────────────────────

/// Expected JSON kind of a property.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl PropertyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    fn admits(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::String => matches!(value, Value::String(_)),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// Structural schema for one registered type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyKind>,
    #[serde(default = "default_true")]
    pub additional_properties: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TypeSchema {
    fn default() -> Self {
        Self {
            required: Vec::new(),
            properties: BTreeMap::new(),
            additional_properties: true,
        }
    }
}

impl Validator for TypeSchema {
    fn validate(
        &self,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<(), Vec<String>> {
        let mut reasons = Vec::new();

        for name in &self.required {
            if !properties.contains_key(name) {
                reasons.push(format!("missing required property '{name}'"));
            }
        }

        for (name, value) in properties {
            match self.properties.get(name) {
                Some(kind) if !kind.admits(value) => {
                    reasons.push(format!("property '{name}' must be {}", kind.name()));
                }
                Some(_) => {}
                None if !self.additional_properties => {
                    reasons.push(format!("unexpected property '{name}'"));
                }
                None => {}
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}

/// Schema and cardinality for a relationship type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipSchema {
    #[serde(flatten)]
    pub schema: TypeSchema,
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

/// A serde-loadable set of type declarations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSet {
    #[serde(default)]
    pub objects: BTreeMap<String, TypeSchema>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipSchema>,
}

/// In-process registry over a fixed [`SchemaSet`].
#[derive(Default)]
pub struct StaticSchemaRegistry {
    objects: BTreeMap<String, Arc<dyn Validator>>,
    relationships: BTreeMap<String, Arc<dyn Validator>>,
    multiplicities: BTreeMap<String, Multiplicity>,
}

impl StaticSchemaRegistry {
    /// A registry with nothing registered: every type is permissive.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn from_set(set: SchemaSet) -> Self {
        let mut registry = Self::default();
        for (name, schema) in set.objects {
            registry.objects.insert(name, Arc::new(schema));
        }
        for (name, rel) in set.relationships {
            registry
                .multiplicities
                .insert(name.clone(), rel.multiplicity);
            registry.relationships.insert(name, Arc::new(rel.schema));
        }
        registry
    }

    /// Load a registry from a JSON schema-set document.
    pub fn from_json(json: &str) -> Result<Self> {
        let set: SchemaSet = serde_json::from_str(json)?;
        Ok(Self::from_set(set))
    }

    pub fn with_object(mut self, name: &str, schema: TypeSchema) -> Self {
        self.objects.insert(name.to_string(), Arc::new(schema));
        self
    }

    pub fn with_relationship(
        mut self,
        name: &str,
        schema: TypeSchema,
        multiplicity: Multiplicity,
    ) -> Self {
        self.relationships
            .insert(name.to_string(), Arc::new(schema));
        self.multiplicities.insert(name.to_string(), multiplicity);
        self
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn object_validator(&self, object_type: &str) -> Option<Arc<dyn Validator>> {
        self.objects.get(object_type).cloned()
    }

    async fn relationship_validator(&self, rel_type: &str) -> Option<Arc<dyn Validator>> {
        self.relationships.get(rel_type).cloned()
    }

    async fn relationship_multiplicity(&self, rel_type: &str) -> Multiplicity {
        self.multiplicities
            .get(rel_type)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        v.as_object().cloned().unwrap()
    }

    fn requirement_schema() -> TypeSchema {
        TypeSchema {
            required: vec!["title".into()],
            properties: [
                ("title".to_string(), PropertyKind::String),
                ("priority".to_string(), PropertyKind::Integer),
            ]
            .into_iter()
            .collect(),
            additional_properties: false,
        }
    }

    #[test]
    fn strict_schema_reports_every_problem() {
        let schema = requirement_schema();
        assert!(schema.validate(&props(json!({"title": "x", "priority": 2}))).is_ok());

        let reasons = schema
            .validate(&props(json!({"priority": "high", "extra": true})))
            .unwrap_err();
        assert_eq!(reasons.len(), 3);
        assert!(reasons.iter().any(|r| r.contains("missing required property 'title'")));
        assert!(reasons.iter().any(|r| r.contains("'priority' must be integer")));
        assert!(reasons.iter().any(|r| r.contains("unexpected property 'extra'")));
    }

    #[tokio::test]
    async fn unregistered_types_are_permissive() {
        let registry = StaticSchemaRegistry::permissive().with_object("Requirement", requirement_schema());

        assert!(registry.object_validator("Requirement").await.is_some());
        assert!(registry.object_validator("Decision").await.is_none());
        assert!(check(None, "Decision", &props(json!({"anything": 1}))).is_ok());

        let v = registry.object_validator("Requirement").await;
        let err = check(v.as_ref(), "Requirement", &props(json!({}))).unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn multiplicity_defaults_to_many_many() {
        let registry = StaticSchemaRegistry::from_json(
            r#"{
                "relationships": {
                    "OWNED_BY": { "multiplicity": { "src": "one" } }
                }
            }"#,
        )
        .unwrap();

        let owned = registry.relationship_multiplicity("OWNED_BY").await;
        assert_eq!(owned.src, Cardinality::One);
        assert_eq!(owned.dst, Cardinality::Many);

        let other = registry.relationship_multiplicity("RELATES_TO").await;
        assert_eq!(other, Multiplicity::default());
        assert_eq!(other.src, Cardinality::Many);
    }
}
