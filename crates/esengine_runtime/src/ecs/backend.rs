//! Native backend adapter and the in-process dense backend
//!
//! Builtin components live outside the world, behind accessor functions
//! named `<verb><TypeName>` (`addSprite`, `getSprite`, `hasSprite`,
//! `removeSprite`). The world resolves the four accessors of a type once and
//! caches them as a [`BuiltinAccessors`] table.

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::Entity;
use crate::error::{BackendError, EcsError, Result};

/// A resolved native accessor
///
/// `add` receives the full record, `get` returns it, `has` returns a
/// boolean, `remove` returns null. Other verbs ignore their argument.
pub type NativeFn = Rc<dyn Fn(Entity, &Value) -> std::result::Result<Value, BackendError>>;

/// Accessor verbs of the `<verb><TypeName>` convention
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Insert or replace
    Add,
    /// Read
    Get,
    /// Membership test
    Has,
    /// Delete
    Remove,
}

impl Verb {
    /// All verbs in resolution order
    pub const ALL: [Verb; 4] = [Verb::Add, Verb::Get, Verb::Has, Verb::Remove];

    /// Method name prefix
    pub fn prefix(self) -> &'static str {
        match self {
            Verb::Add => "add",
            Verb::Get => "get",
            Verb::Has => "has",
            Verb::Remove => "remove",
        }
    }

    /// Method name for a builtin type, e.g. `addSprite`
    pub fn method(self, type_name: &str) -> String {
        format!("{}{}", self.prefix(), type_name)
    }
}

/// Entity allocation, hierarchy, and accessor lookup supplied by a native engine
pub trait NativeBackend {
    /// Allocate an entity
    fn create(&mut self) -> Entity;

    /// Destroy an entity and everything the backend stores for it
    fn destroy(&mut self, entity: Entity);

    /// Check if an entity is alive in the backend
    fn valid(&self, entity: Entity) -> bool;

    /// Link or unlink a child from its parent
    fn set_parent(&mut self, child: Entity, parent: Option<Entity>);

    /// Look up an accessor by its full method name
    fn method(&self, name: &str) -> Option<NativeFn>;
}

/// The four accessors of one builtin type
#[derive(Clone)]
pub struct BuiltinAccessors {
    /// `add<TypeName>`
    pub add: NativeFn,
    /// `get<TypeName>`
    pub get: NativeFn,
    /// `has<TypeName>`
    pub has: NativeFn,
    /// `remove<TypeName>`
    pub remove: NativeFn,
}

impl BuiltinAccessors {
    /// Resolve all four accessors of `type_name`
    ///
    /// Fails with a configuration error naming every missing method.
    pub fn resolve(backend: &dyn NativeBackend, type_name: &str) -> Result<Self> {
        let mut missing = Vec::new();
        let mut lookup = |verb: Verb| {
            let name = verb.method(type_name);
            let found = backend.method(&name);
            if found.is_none() {
                missing.push(name);
            }
            found
        };

        let (add, get, has, remove) = (
            lookup(Verb::Add),
            lookup(Verb::Get),
            lookup(Verb::Has),
            lookup(Verb::Remove),
        );

        match (add, get, has, remove) {
            (Some(add), Some(get), Some(has), Some(remove)) => Ok(Self {
                add,
                get,
                has,
                remove,
            }),
            _ => Err(EcsError::Configuration(format!(
                "native backend is missing accessor methods: {}",
                missing.join(", ")
            ))),
        }
    }

    /// Accessor for a verb
    pub fn verb(&self, verb: Verb) -> &NativeFn {
        match verb {
            Verb::Add => &self.add,
            Verb::Get => &self.get,
            Verb::Has => &self.has,
            Verb::Remove => &self.remove,
        }
    }
}

/// Sparse set storage for one builtin type
#[derive(Default)]
struct SparsePool {
    sparse: Vec<Option<usize>>,
    dense: Vec<Entity>,
    values: Vec<Value>,
}

impl SparsePool {
    fn index(&self, entity: Entity) -> Option<usize> {
        self.sparse
            .get(entity.to_raw() as usize)
            .copied()
            .flatten()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.index(entity).is_some()
    }

    fn get(&self, entity: Entity) -> Option<&Value> {
        self.index(entity).map(|i| &self.values[i])
    }

    fn insert(&mut self, entity: Entity, value: Value) {
        if let Some(i) = self.index(entity) {
            self.values[i] = value;
            return;
        }

        let slot = entity.to_raw() as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, None);
        }
        self.sparse[slot] = Some(self.dense.len());
        self.dense.push(entity);
        self.values.push(value);
    }

    fn remove(&mut self, entity: Entity) -> bool {
        let Some(i) = self.index(entity) else {
            return false;
        };

        let last = self.dense.len() - 1;
        self.dense.swap(i, last);
        self.values.swap(i, last);
        let moved = self.dense[i];
        self.sparse[moved.to_raw() as usize] = Some(i);
        self.sparse[entity.to_raw() as usize] = None;
        self.dense.pop();
        self.values.pop();
        true
    }
}

#[derive(Default)]
struct DenseState {
    valid: Vec<bool>,
    recycled: VecDeque<Entity>,
    next: u32,
    pools: FxHashMap<String, SparsePool>,
    parents: FxHashMap<Entity, Entity>,
}

impl DenseState {
    fn is_valid(&self, entity: Entity) -> bool {
        self.valid
            .get(entity.to_raw() as usize)
            .copied()
            .unwrap_or(false)
    }
}

/// In-process native backend with dense, recycled entity ids
///
/// Serves the accessor table for every type it was created with. Ids start
/// at zero and destroyed ids are reused in FIFO order.
pub struct DenseBackend {
    state: Rc<RefCell<DenseState>>,
    types: IndexSet<String, FxBuildHasher>,
}

impl Default for DenseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseBackend {
    /// Backend serving the builtin component set
    pub fn new() -> Self {
        Self::with_types(
            super::builtins::components()
                .iter()
                .filter_map(|d| d.type_name().map(str::to_string)),
        )
    }

    /// Backend serving exactly `types`
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Rc::new(RefCell::new(DenseState::default())),
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.state.borrow().valid.iter().filter(|v| **v).count()
    }

    /// Parent recorded for an entity
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.state.borrow().parents.get(&entity).copied()
    }

    fn accessor(&self, verb: Verb, type_name: &str) -> NativeFn {
        let state = Rc::clone(&self.state);
        let type_name = type_name.to_string();
        let method = verb.method(&type_name);

        Rc::new(move |entity: Entity, value: &Value| {
            let mut state = state.borrow_mut();
            if !state.is_valid(entity) {
                return Err(BackendError::new(
                    method.as_str(),
                    format!("entity {entity} is not valid"),
                ));
            }

            match verb {
                Verb::Add => {
                    state
                        .pools
                        .entry(type_name.clone())
                        .or_default()
                        .insert(entity, value.clone());
                    Ok(Value::Null)
                }
                Verb::Get => state
                    .pools
                    .get(&type_name)
                    .and_then(|pool| pool.get(entity))
                    .cloned()
                    .ok_or_else(|| {
                        BackendError::new(
                            method.as_str(),
                            format!("entity {entity} has no {type_name}"),
                        )
                    }),
                Verb::Has => Ok(Value::Bool(
                    state
                        .pools
                        .get(&type_name)
                        .is_some_and(|pool| pool.contains(entity)),
                )),
                Verb::Remove => {
                    if let Some(pool) = state.pools.get_mut(&type_name) {
                        pool.remove(entity);
                    }
                    Ok(Value::Null)
                }
            }
        })
    }
}

impl NativeBackend for DenseBackend {
    fn create(&mut self) -> Entity {
        let mut state = self.state.borrow_mut();
        let entity = match state.recycled.pop_front() {
            Some(entity) => entity,
            None => {
                let entity = Entity::from_raw(state.next);
                state.next += 1;
                entity
            }
        };

        let slot = entity.to_raw() as usize;
        if slot >= state.valid.len() {
            state.valid.resize(slot + 1, false);
        }
        state.valid[slot] = true;
        entity
    }

    fn destroy(&mut self, entity: Entity) {
        let mut state = self.state.borrow_mut();
        if !state.is_valid(entity) {
            return;
        }

        for pool in state.pools.values_mut() {
            pool.remove(entity);
        }
        state.parents.remove(&entity);
        state.parents.retain(|_, parent| *parent != entity);
        state.valid[entity.to_raw() as usize] = false;
        state.recycled.push_back(entity);
    }

    fn valid(&self, entity: Entity) -> bool {
        self.state.borrow().is_valid(entity)
    }

    fn set_parent(&mut self, child: Entity, parent: Option<Entity>) {
        let mut state = self.state.borrow_mut();
        match parent {
            Some(parent) => {
                state.parents.insert(child, parent);
            }
            None => {
                state.parents.remove(&child);
            }
        }
    }

    fn method(&self, name: &str) -> Option<NativeFn> {
        let (verb, type_name) = Verb::ALL
            .iter()
            .find_map(|verb| name.strip_prefix(verb.prefix()).map(|rest| (*verb, rest)))?;

        if self.types.contains(type_name) {
            Some(self.accessor(verb, type_name))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_recycled() {
        let mut backend = DenseBackend::new();

        let e0 = backend.create();
        let e1 = backend.create();
        assert_eq!((e0.to_raw(), e1.to_raw()), (0, 1));

        backend.destroy(e0);
        assert!(!backend.valid(e0));
        assert_eq!(backend.entity_count(), 1);

        let reused = backend.create();
        assert_eq!(reused, e0);
        assert!(backend.valid(reused));
    }

    #[test]
    fn test_accessor_round_trip() {
        let mut backend = DenseBackend::with_types(["Velocity"]);
        let e = backend.create();
        let accessors = BuiltinAccessors::resolve(&backend, "Velocity").unwrap();

        let value = json!({ "linear": { "x": 1.0, "y": 0.0, "z": 0.0 } });
        (accessors.add)(e, &value).unwrap();
        assert_eq!((accessors.has)(e, &Value::Null).unwrap(), json!(true));
        assert_eq!((accessors.get)(e, &Value::Null).unwrap(), value);

        (accessors.remove)(e, &Value::Null).unwrap();
        assert_eq!((accessors.has)(e, &Value::Null).unwrap(), json!(false));
        assert!((accessors.get)(e, &Value::Null).is_err());
    }

    #[test]
    fn test_destroy_clears_pools() {
        let mut backend = DenseBackend::with_types(["Velocity"]);
        let a = backend.create();
        let b = backend.create();
        let accessors = BuiltinAccessors::resolve(&backend, "Velocity").unwrap();
        (accessors.add)(a, &json!({ "n": 1 })).unwrap();
        (accessors.add)(b, &json!({ "n": 2 })).unwrap();

        backend.destroy(a);
        assert_eq!((accessors.get)(b, &Value::Null).unwrap(), json!({ "n": 2 }));

        let reused = backend.create();
        assert_eq!((accessors.has)(reused, &Value::Null).unwrap(), json!(false));
    }

    #[test]
    fn test_calls_on_dead_entities_fail() {
        let backend = DenseBackend::with_types(["Velocity"]);
        let accessors = BuiltinAccessors::resolve(&backend, "Velocity").unwrap();

        let err = (accessors.add)(Entity::from_raw(9), &json!({})).unwrap_err();
        assert_eq!(err.method, "addVelocity");
    }

    #[test]
    fn test_missing_accessors_are_reported() {
        let backend = DenseBackend::with_types(["Velocity"]);

        let err = BuiltinAccessors::resolve(&backend, "Collider").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("addCollider"));
        assert!(message.contains("removeCollider"));
    }

    #[test]
    fn test_parent_links() {
        let mut backend = DenseBackend::new();
        let parent = backend.create();
        let child = backend.create();

        backend.set_parent(child, Some(parent));
        assert_eq!(backend.parent(child), Some(parent));

        backend.destroy(parent);
        assert_eq!(backend.parent(child), None);
    }
}
