//! Component definitions, shape validation, and the definition registry
//!
//! A component is declared once as a named default record. Inserting data
//! merges a partial record over that default after every provided field has
//! been checked against the default's shape.
//!
//! # Example
//!
//! ```rust
//! use esengine_runtime::ecs::ComponentDef;
//! use serde_json::json;
//!
//! let health = ComponentDef::script("Health", json!({ "current": 100, "max": 100 })).unwrap();
//! let data = health.create(&json!({ "current": 40 })).unwrap();
//! assert_eq!(data, json!({ "current": 40, "max": 100 }));
//! ```

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::ResourceDef;
use crate::error::{EcsError, FieldIssue, Result, ValidationError};

/// Which storage backend holds a component
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// Stored by the native backend, reached through `<verb><TypeName>` accessors
    Builtin {
        /// Accessor naming token, e.g. `Sprite` for `addSprite`
        type_name: String,
    },
    /// Stored in the world's sparse per-type maps
    Script,
}

struct ComponentInner {
    name: String,
    kind: ComponentKind,
    default: Map<String, Value>,
}

/// A declared component shape
///
/// Cheap to clone. Two definitions are the same component when their names
/// match.
#[derive(Clone)]
pub struct ComponentDef(Arc<ComponentInner>);

impl ComponentDef {
    /// Declare a script component backed by the world's sparse storage
    pub fn script(name: impl Into<String>, default: Value) -> Result<Self> {
        Self::new(name.into(), ComponentKind::Script, default)
    }

    /// Declare a builtin component whose accessors are named after `name`
    pub fn builtin(name: impl Into<String>, default: Value) -> Result<Self> {
        let name = name.into();
        let kind = ComponentKind::Builtin {
            type_name: name.clone(),
        };
        Self::new(name, kind, default)
    }

    /// Declare a script component whose default is `T::default()`
    pub fn script_from<T: Serialize + Default>(name: impl Into<String>) -> Result<Self> {
        let default = serde_json::to_value(T::default())
            .map_err(|e| EcsError::Configuration(format!("unserializable default: {e}")))?;
        Self::script(name, default)
    }

    fn new(name: String, kind: ComponentKind, default: Value) -> Result<Self> {
        match default {
            Value::Object(default) => Ok(Self(Arc::new(ComponentInner {
                name,
                kind,
                default,
            }))),
            other => Err(EcsError::Configuration(format!(
                "default of component `{name}` must be a record, found {}",
                value_kind(&other)
            ))),
        }
    }

    /// Used by the builtin table where the shape is a literal record
    pub(crate) fn from_shape(name: &str, kind: ComponentKind, default: Value) -> Self {
        let default = match default {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self(Arc::new(ComponentInner {
            name: name.to_string(),
            kind,
            default,
        }))
    }

    /// Component name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Storage variant
    pub fn kind(&self) -> &ComponentKind {
        &self.0.kind
    }

    /// Whether the native backend stores this component
    pub fn is_builtin(&self) -> bool {
        matches!(self.0.kind, ComponentKind::Builtin { .. })
    }

    /// Native accessor naming token, if builtin
    pub fn type_name(&self) -> Option<&str> {
        match &self.0.kind {
            ComponentKind::Builtin { type_name } => Some(type_name),
            ComponentKind::Script => None,
        }
    }

    /// The declared default record
    pub fn default_fields(&self) -> &Map<String, Value> {
        &self.0.default
    }

    /// The declared default as a value
    pub fn default_value(&self) -> Value {
        Value::Object(self.0.default.clone())
    }

    /// Validate `partial` with the shape validator and merge it over the default
    pub fn create(&self, partial: &Value) -> Result<Value> {
        self.create_with(&ShapeValidator, partial)
    }

    /// Validate `partial` with `validator` and merge it over the default
    pub fn create_with(&self, validator: &dyn Validator, partial: &Value) -> Result<Value> {
        let fields = self.fields_of(partial)?;
        let issues = validator.validate(self, fields);
        if !issues.is_empty() {
            return Err(ValidationError {
                component: self.name().to_string(),
                issues,
            }
            .into());
        }
        Ok(self.merge(fields))
    }

    /// Deserialize a stored record into a typed value
    pub fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            EcsError::Other(format!("cannot decode component `{}`: {e}", self.name()))
        })
    }

    fn fields_of<'a>(&self, partial: &'a Value) -> Result<&'a Map<String, Value>> {
        static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
        match partial {
            Value::Object(fields) => Ok(fields),
            Value::Null => Ok(EMPTY.get_or_init(Map::new)),
            other => Err(ValidationError {
                component: self.name().to_string(),
                issues: vec![FieldIssue::NotAnObject {
                    found: value_kind(other),
                }],
            }
            .into()),
        }
    }

    fn merge(&self, partial: &Map<String, Value>) -> Value {
        let mut merged = self.0.default.clone();
        for (key, value) in partial {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }
}

impl PartialEq for ComponentDef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ComponentDef {}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish()
    }
}

/// Checks component data against a declared shape
///
/// Returns every offending field; an empty list accepts the data.
pub trait Validator {
    /// Validate the provided fields of `def`
    fn validate(&self, def: &ComponentDef, fields: &Map<String, Value>) -> Vec<FieldIssue>;
}

/// Default validator: fields must exist in the default and match its kind
///
/// Nested records are checked field by field using dotted names. A `null`
/// default accepts any value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeValidator;

impl Validator for ShapeValidator {
    fn validate(&self, def: &ComponentDef, fields: &Map<String, Value>) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        check_fields(def.default_fields(), fields, "", &mut issues);
        issues
    }
}

fn check_fields(
    shape: &Map<String, Value>,
    fields: &Map<String, Value>,
    prefix: &str,
    issues: &mut Vec<FieldIssue>,
) {
    for (key, value) in fields {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        let Some(expected) = shape.get(key) else {
            issues.push(FieldIssue::Unknown { field: path });
            continue;
        };

        match (expected, value) {
            (Value::Null, _) => {}
            (Value::Object(inner_shape), Value::Object(inner)) => {
                check_fields(inner_shape, inner, &path, issues);
            }
            _ if value_kind(expected) != value_kind(value) => {
                issues.push(FieldIssue::TypeMismatch {
                    field: path,
                    expected: value_kind(expected),
                    found: value_kind(value),
                });
            }
            _ => {}
        }
    }
}

/// Kind name of a value as reported in validation messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_color(map: &Map<String, Value>) -> bool {
    map.len() == 4
        && ["r", "g", "b", "a"]
            .iter()
            .all(|k| map.get(*k).is_some_and(Value::is_number))
}

/// Rewrite `{r,g,b,a}` fields into the backend's `{x,y,z,w}` vectors
pub(crate) fn colors_to_vectors(record: &mut Value) {
    let Value::Object(fields) = record else {
        return;
    };
    for value in fields.values_mut() {
        if let Value::Object(inner) = value {
            if is_color(inner) {
                let mut vector = Map::new();
                for (from, to) in [("r", "x"), ("g", "y"), ("b", "z"), ("a", "w")] {
                    if let Some(channel) = inner.remove(from) {
                        vector.insert(to.to_string(), channel);
                    }
                }
                *inner = vector;
            }
        }
    }
}

/// Undo [`colors_to_vectors`] for fields whose default is a color
pub(crate) fn vectors_to_colors(def: &ComponentDef, record: &mut Value) {
    let Value::Object(fields) = record else {
        return;
    };
    for (key, default) in def.default_fields() {
        let is_color_field = matches!(default, Value::Object(d) if is_color(d));
        if !is_color_field {
            continue;
        }
        if let Some(Value::Object(inner)) = fields.get_mut(key) {
            if inner.contains_key("x") && !inner.contains_key("r") {
                let mut color = Map::new();
                for (from, to) in [("x", "r"), ("y", "g"), ("z", "b"), ("w", "a")] {
                    if let Some(channel) = inner.remove(from) {
                        color.insert(to.to_string(), channel);
                    }
                }
                *inner = color;
            }
        }
    }
}

/// Registry for all component and resource definitions
///
/// Definitions are authored before any world that uses them and live for
/// the process; names are unique per kind.
#[derive(Default)]
pub struct Registry {
    components: IndexMap<String, ComponentDef>,
    resources: IndexMap<String, ResourceDef>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the builtin components and time resources
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in super::builtins::components() {
            registry.components.insert(def.name().to_string(), def);
        }
        for def in [super::builtins::time(), super::builtins::fixed_time()] {
            registry.resources.insert(def.name().to_string(), def);
        }
        registry
    }

    /// Register a component definition
    pub fn define_component(&mut self, def: ComponentDef) -> Result<ComponentDef> {
        if self.components.contains_key(def.name()) {
            return Err(EcsError::Configuration(format!(
                "component `{}` is already defined",
                def.name()
            )));
        }
        self.components.insert(def.name().to_string(), def.clone());
        Ok(def)
    }

    /// Declare and register a script component
    pub fn script(&mut self, name: &str, default: Value) -> Result<ComponentDef> {
        self.define_component(ComponentDef::script(name, default)?)
    }

    /// Register a resource definition
    pub fn define_resource(&mut self, def: ResourceDef) -> Result<ResourceDef> {
        if self.resources.contains_key(def.name()) {
            return Err(EcsError::Configuration(format!(
                "resource `{}` is already defined",
                def.name()
            )));
        }
        self.resources.insert(def.name().to_string(), def.clone());
        Ok(def)
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&ComponentDef> {
        self.components.get(name)
    }

    /// Look up a resource by name
    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }

    /// All component definitions in registration order
    pub fn components(&self) -> impl Iterator<Item = &ComponentDef> {
        self.components.values()
    }

    /// Builtin component definitions in registration order
    pub fn builtins(&self) -> impl Iterator<Item = &ComponentDef> {
        self.components.values().filter(|d| d.is_builtin())
    }

    /// All resource definitions in registration order
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef> {
        self.resources.values()
    }
}
