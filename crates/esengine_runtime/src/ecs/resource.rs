//! Resource definitions and storage for global singletons

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::error::{EcsError, Result};

struct ResourceInner {
    name: String,
    default: Value,
}

/// A declared resource: a name and the value it starts with
#[derive(Clone)]
pub struct ResourceDef(Arc<ResourceInner>);

impl ResourceDef {
    /// Declare a resource
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self(Arc::new(ResourceInner {
            name: name.into(),
            default,
        }))
    }

    /// Declare a resource whose default is `T::default()`
    pub fn from_default<T: Serialize + Default>(name: impl Into<String>) -> Result<Self> {
        let default = serde_json::to_value(T::default())
            .map_err(|e| EcsError::Configuration(format!("unserializable default: {e}")))?;
        Ok(Self::new(name, default))
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The declared default
    pub fn default_value(&self) -> &Value {
        &self.0.default
    }
}

impl PartialEq for ResourceDef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ResourceDef {}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceDef").field(&self.0.name).finish()
    }
}

/// Storage for global resources
///
/// Values materialize their default on first read. Writes are immediate:
/// when two handles write the same resource, the last write wins.
#[derive(Default)]
pub struct Resources {
    values: RefCell<FxHashMap<String, Value>>,
}

impl Resources {
    /// Create an empty resource store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, materializing the default on first access
    pub fn get(&self, resource: &ResourceDef) -> Value {
        self.values
            .borrow_mut()
            .entry(resource.name().to_string())
            .or_insert_with(|| resource.default_value().clone())
            .clone()
    }

    /// Current value decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self, resource: &ResourceDef) -> Result<T> {
        serde_json::from_value(self.get(resource)).map_err(|e| {
            EcsError::Other(format!("cannot decode resource `{}`: {e}", resource.name()))
        })
    }

    /// Overwrite a resource
    pub fn set(&self, resource: &ResourceDef, value: Value) {
        self.values
            .borrow_mut()
            .insert(resource.name().to_string(), value);
    }

    /// Overwrite a resource with a serialized value
    pub fn set_as<T: Serialize>(&self, resource: &ResourceDef, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            EcsError::Other(format!("cannot encode resource `{}`: {e}", resource.name()))
        })?;
        self.set(resource, value);
        Ok(())
    }

    /// Alias for [`Resources::set`]
    pub fn insert(&self, resource: &ResourceDef, value: Value) {
        self.set(resource, value);
    }

    /// Check if a resource has been materialized or written
    pub fn contains(&self, resource: &ResourceDef) -> bool {
        self.values.borrow().contains_key(resource.name())
    }

    /// Mutable handle bound to this store
    pub fn get_res_mut<'r>(&'r self, resource: &ResourceDef) -> ResMut<'r> {
        ResMut {
            resources: self,
            def: resource.clone(),
        }
    }
}

/// Write-through handle to one resource
///
/// Reads return the current snapshot; writes land in storage immediately.
#[derive(Clone)]
pub struct ResMut<'r> {
    resources: &'r Resources,
    def: ResourceDef,
}

impl<'r> ResMut<'r> {
    /// Current value
    pub fn get(&self) -> Value {
        self.resources.get(&self.def)
    }

    /// Current value decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.resources.get_as(&self.def)
    }

    /// Overwrite the value
    pub fn set(&self, value: Value) {
        self.resources.set(&self.def, value);
    }

    /// Read, modify, and write back in one step
    pub fn modify(&self, f: impl FnOnce(&mut Value)) {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }

    /// The resource this handle writes
    pub fn def(&self) -> &ResourceDef {
        &self.def
    }
}
