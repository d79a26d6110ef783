//! World container for entities and component storage
//!
//! The world dispatches every component operation to one of two backends:
//! builtin components go through the native accessor table, script
//! components live in sparse per-type maps owned by the world. All methods
//! take `&self`; queries, command buffers, and systems share one world on a
//! single thread, and the iteration depth counter rejects destructive calls
//! made while a query is running.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::backend::{BuiltinAccessors, NativeBackend, NativeFn, Verb};
use super::component::{colors_to_vectors, vectors_to_colors};
use super::{ComponentDef, Entity, EntityManager, ShapeValidator, Validator};
use crate::config::RuntimeConfig;
use crate::error::{EcsError, Result};

/// Script component values of one type, in insertion order
type ScriptStorage = IndexMap<Entity, Value, FxBuildHasher>;

/// Entities and script storage
#[derive(Default)]
struct WorldState {
    entities: EntityManager,
    storages: FxHashMap<String, ScriptStorage>,
    /// Script components held by each entity
    reverse: FxHashMap<Entity, IndexSet<String, FxBuildHasher>>,
}

/// Native backend plus the accessor tables resolved from it
#[derive(Default)]
struct BuiltinState {
    backend: Option<Box<dyn NativeBackend>>,
    accessors: FxHashMap<String, BuiltinAccessors>,
}

/// Sorted component names of one query shape
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct QuerySignature {
    required: Vec<String>,
    with: Vec<String>,
    without: Vec<String>,
}

impl QuerySignature {
    fn new(required: &[ComponentDef], with: &[ComponentDef], without: &[ComponentDef]) -> Self {
        fn sorted(defs: &[ComponentDef]) -> Vec<String> {
            let mut names: Vec<String> = defs.iter().map(|d| d.name().to_string()).collect();
            names.sort_unstable();
            names
        }
        Self {
            required: sorted(required),
            with: sorted(with),
            without: sorted(without),
        }
    }
}

struct CachedQuery {
    version: u64,
    entities: Rc<Vec<Entity>>,
}

/// Query cache hit/miss counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that recomputed the result
    pub misses: u64,
}

#[derive(Default)]
struct QueryCache {
    entries: FxHashMap<QuerySignature, CachedQuery>,
    /// Cleared buffers from replaced entries
    pool: Vec<Vec<Entity>>,
    pool_capacity: usize,
    stats: CacheStats,
}

impl QueryCache {
    fn take_buffer(&mut self) -> Vec<Entity> {
        self.pool.pop().unwrap_or_default()
    }

    fn recycle(&mut self, entities: Rc<Vec<Entity>>) {
        if let Ok(mut buffer) = Rc::try_unwrap(entities) {
            if self.pool.len() < self.pool_capacity {
                buffer.clear();
                self.pool.push(buffer);
            }
        }
    }
}

/// The World contains all entities and components
pub struct World {
    state: RefCell<WorldState>,
    builtin: RefCell<BuiltinState>,
    validator: Box<dyn Validator>,
    version: Cell<u64>,
    iteration_depth: Cell<u32>,
    cache: RefCell<QueryCache>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new empty world with no backend attached
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Create a world sized by `config`
    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            state: RefCell::new(WorldState::default()),
            builtin: RefCell::new(BuiltinState::default()),
            validator: Box::new(ShapeValidator),
            version: Cell::new(0),
            iteration_depth: Cell::new(0),
            cache: RefCell::new(QueryCache {
                pool_capacity: config.query_buffer_pool,
                ..Default::default()
            }),
        }
    }

    /// Replace the validator used by both storage paths
    pub fn set_validator(&mut self, validator: impl Validator + 'static) {
        self.validator = Box::new(validator);
        self.bump();
    }

    // === Backend ===

    /// Attach a native backend and resolve the accessors of `builtins`
    ///
    /// Attach before spawning: ids already handed out by the local counter
    /// are not known to the backend. Fails without attaching if any accessor
    /// is missing.
    pub fn attach_backend<'a>(
        &mut self,
        backend: impl NativeBackend + 'static,
        builtins: impl IntoIterator<Item = &'a ComponentDef>,
    ) -> Result<()> {
        let mut accessors = FxHashMap::default();
        for def in builtins {
            if let Some(type_name) = def.type_name() {
                accessors.insert(
                    type_name.to_string(),
                    BuiltinAccessors::resolve(&backend, type_name)?,
                );
            }
        }

        if !self.state.get_mut().entities.is_empty() {
            tracing::warn!("Native backend attached to a world that already has entities");
        }

        let builtin = self.builtin.get_mut();
        builtin.backend = Some(Box::new(backend));
        builtin.accessors = accessors;
        tracing::debug!(
            "Native backend attached with {} builtin types",
            builtin.accessors.len()
        );
        self.bump();
        Ok(())
    }

    /// Detach the native backend
    ///
    /// Builtin membership changes with the backend, so cached query results
    /// are invalidated.
    pub fn detach_backend(&mut self) -> Option<Box<dyn NativeBackend>> {
        let builtin = self.builtin.get_mut();
        builtin.accessors.clear();
        let backend = builtin.backend.take();
        if backend.is_some() {
            self.bump();
        }
        backend
    }

    /// Whether a native backend is attached
    pub fn is_attached(&self) -> bool {
        self.builtin.borrow().backend.is_some()
    }

    // === Iteration guard ===

    /// Enter a query iteration
    pub fn begin_iteration(&self) {
        self.iteration_depth.set(self.iteration_depth.get() + 1);
    }

    /// Leave a query iteration; never goes below zero
    pub fn end_iteration(&self) {
        self.iteration_depth
            .set(self.iteration_depth.get().saturating_sub(1));
    }

    /// Whether any query is iterating
    pub fn is_iterating(&self) -> bool {
        self.iteration_depth.get() > 0
    }

    /// Current iteration depth
    pub fn iteration_depth(&self) -> u32 {
        self.iteration_depth.get()
    }

    fn guard(&self, operation: &'static str) -> Result<()> {
        if self.is_iterating() {
            return Err(EcsError::IllegalMutation { operation });
        }
        Ok(())
    }

    /// Structural version, bumped by every structural mutation
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    fn bump(&self) {
        self.version.set(self.version.get() + 1);
    }

    // === Entity Operations ===

    /// Spawn a new entity
    pub fn spawn(&self) -> Result<Entity> {
        self.guard("spawn")?;
        let entity = self.allocate();
        self.state.borrow_mut().entities.register(entity);
        self.bump();
        Ok(entity)
    }

    /// Spawn `count` entities at once
    pub fn spawn_batch(&self, count: usize) -> Result<Vec<Entity>> {
        self.guard("spawn")?;
        let entities: Vec<Entity> = (0..count).map(|_| self.allocate()).collect();
        {
            let mut state = self.state.borrow_mut();
            for &entity in &entities {
                state.entities.register(entity);
            }
        }
        if count > 0 {
            self.bump();
        }
        Ok(entities)
    }

    /// Allocate an id without making the entity alive in the world
    ///
    /// Used by deferred spawns; [`World::adopt`] completes the spawn. The id
    /// is not [`valid`](World::valid) until adopted, with or without a
    /// backend.
    pub(crate) fn allocate(&self) -> Entity {
        let allocated = self
            .builtin
            .borrow_mut()
            .backend
            .as_mut()
            .map(|backend| backend.create());
        match allocated {
            Some(entity) => entity,
            None => self.state.borrow_mut().entities.allocate(),
        }
    }

    /// Make an allocated entity alive
    pub(crate) fn adopt(&self, entity: Entity) -> Result<()> {
        self.guard("spawn")?;
        let destroyed = self
            .builtin
            .borrow()
            .backend
            .as_ref()
            .is_some_and(|backend| !backend.valid(entity));
        if destroyed {
            tracing::warn!("Reserved entity {entity} was destroyed before its spawn applied");
            return Ok(());
        }
        if self.state.borrow_mut().entities.register(entity) {
            self.bump();
        }
        Ok(())
    }

    /// Return an allocated id that was never adopted
    pub(crate) fn release(&self, entity: Entity) {
        if self.state.borrow().entities.exists(entity) {
            return;
        }
        if let Some(backend) = self.builtin.borrow_mut().backend.as_mut() {
            backend.destroy(entity);
        }
    }

    /// Despawn an entity and all its script components
    ///
    /// Children are detached, not despawned. Despawning a dead entity does
    /// nothing.
    pub fn despawn(&self, entity: Entity) -> Result<()> {
        self.guard("despawn")?;

        let mut state = self.state.borrow_mut();
        let was_alive = state.entities.unregister(entity);
        if was_alive {
            if let Some(backend) = self.builtin.borrow_mut().backend.as_mut() {
                backend.destroy(entity);
            }
        }
        let held = state.reverse.remove(&entity);
        if let Some(held) = &held {
            for name in held {
                if let Some(storage) = state.storages.get_mut(name) {
                    storage.shift_remove(&entity);
                }
            }
        }
        drop(state);

        if was_alive || held.is_some() {
            self.bump();
        }
        Ok(())
    }

    /// Despawn every entity and drop all script component data
    ///
    /// The local id counter keeps counting.
    pub fn clear(&self) -> Result<()> {
        self.guard("clear the world")?;

        let mut state = self.state.borrow_mut();
        let entities: Vec<Entity> = state.entities.iter().collect();
        if let Some(backend) = self.builtin.borrow_mut().backend.as_mut() {
            for &entity in &entities {
                backend.destroy(entity);
            }
        }
        for &entity in &entities {
            state.entities.unregister(entity);
        }
        state.storages.clear();
        state.reverse.clear();
        drop(state);

        tracing::debug!("Cleared {} entities", entities.len());
        self.bump();
        Ok(())
    }

    /// Check if an entity is alive
    ///
    /// With a backend attached the entity must be alive in both the world
    /// and the backend.
    pub fn valid(&self, entity: Entity) -> bool {
        if !self.state.borrow().entities.exists(entity) {
            return false;
        }
        self.builtin
            .borrow()
            .backend
            .as_ref()
            .map_or(true, |backend| backend.valid(entity))
    }

    /// Get entity count
    pub fn entity_count(&self) -> usize {
        self.state.borrow().entities.len()
    }

    /// All live entities in spawn order
    pub fn entities(&self) -> Vec<Entity> {
        self.state.borrow().entities.iter().collect()
    }

    /// Script components held by an entity, in insertion order
    pub fn components_of(&self, entity: Entity) -> Vec<String> {
        self.state
            .borrow()
            .reverse
            .get(&entity)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    // === Hierarchy ===

    /// Set parent-child relationship
    pub fn set_parent(&self, child: Entity, parent: Entity) {
        if !self.valid(child) || !self.valid(parent) || child == parent {
            tracing::warn!("Ignoring set_parent({child}, {parent}) on invalid entities");
            return;
        }
        self.state.borrow_mut().entities.set_parent(child, parent);
        if let Some(backend) = self.builtin.borrow_mut().backend.as_mut() {
            backend.set_parent(child, Some(parent));
        }
    }

    /// Remove parent relationship
    pub fn remove_parent(&self, child: Entity) {
        self.state.borrow_mut().entities.remove_parent(child);
        if let Some(backend) = self.builtin.borrow_mut().backend.as_mut() {
            backend.set_parent(child, None);
        }
    }

    /// Get parent of an entity
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.state.borrow().entities.parent(entity)
    }

    /// Get children of an entity
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.state.borrow().entities.children(entity).to_vec()
    }

    // === Component Operations ===

    /// Insert a component, merging `data` over its default
    ///
    /// `data` is a partial record (or null for the default). Rejected data
    /// leaves storage untouched.
    pub fn insert(&self, entity: Entity, component: &ComponentDef, data: Value) -> Result<()> {
        if component.is_builtin() {
            self.insert_builtin(entity, component, data)
        } else {
            self.insert_script(entity, component, &data)
        }
    }

    fn insert_builtin(&self, entity: Entity, component: &ComponentDef, data: Value) -> Result<()> {
        let data = match data {
            Value::Object(mut fields) => {
                fields.retain(|_, v| !v.is_null());
                Value::Object(fields)
            }
            other => other,
        };
        let mut record = component.create_with(self.validator.as_ref(), &data)?;
        colors_to_vectors(&mut record);

        if self.call_builtin(component, Verb::Add, entity, &record)?.is_some() {
            self.bump();
        }
        Ok(())
    }

    fn insert_script(&self, entity: Entity, component: &ComponentDef, data: &Value) -> Result<()> {
        let record = component.create_with(self.validator.as_ref(), data)?;

        if !self.valid(entity) {
            tracing::warn!(
                "Ignoring insert of `{}` on dead entity {entity}",
                component.name()
            );
            return Ok(());
        }

        let mut state = self.state.borrow_mut();
        let name = component.name();
        state
            .storages
            .entry(name.to_string())
            .or_default()
            .insert(entity, record);
        let held = state.reverse.entry(entity).or_default();
        if !held.contains(name) {
            held.insert(name.to_string());
        }
        drop(state);

        self.bump();
        Ok(())
    }

    /// Get a component
    ///
    /// Missing script components are a `NotFound` error. Builtin reads that
    /// fail in the backend degrade to the component default.
    pub fn get(&self, entity: Entity, component: &ComponentDef) -> Result<Value> {
        if component.is_builtin() {
            let value = self.call_builtin(component, Verb::Get, entity, &Value::Null)?;
            let mut value = value.unwrap_or_else(|| component.default_value());
            vectors_to_colors(component, &mut value);
            return Ok(value);
        }

        self.state
            .borrow()
            .storages
            .get(component.name())
            .and_then(|storage| storage.get(&entity))
            .cloned()
            .ok_or_else(|| EcsError::NotFound {
                component: component.name().to_string(),
                entity,
            })
    }

    /// Get a component if the entity has it
    pub fn try_get(&self, entity: Entity, component: &ComponentDef) -> Option<Value> {
        if component.is_builtin() {
            if !self.has(entity, component) {
                return None;
            }
            return self.get(entity, component).ok();
        }

        self.state
            .borrow()
            .storages
            .get(component.name())
            .and_then(|storage| storage.get(&entity))
            .cloned()
    }

    /// Get a component decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self, entity: Entity, component: &ComponentDef) -> Result<T> {
        component.decode(self.get(entity, component)?)
    }

    /// Check if an entity has a component
    pub fn has(&self, entity: Entity, component: &ComponentDef) -> bool {
        if component.is_builtin() {
            return match self.call_builtin(component, Verb::Has, entity, &Value::Null) {
                Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(false),
                Err(err) => {
                    tracing::error!("has({entity}, {}) failed: {err}", component.name());
                    false
                }
            };
        }

        self.state
            .borrow()
            .storages
            .get(component.name())
            .is_some_and(|storage| storage.contains_key(&entity))
    }

    /// Remove a component from an entity
    ///
    /// Removing a component the entity does not have does nothing.
    pub fn remove(&self, entity: Entity, component: &ComponentDef) -> Result<()> {
        self.guard("remove a component")?;

        if component.is_builtin() {
            if self
                .call_builtin(component, Verb::Remove, entity, &Value::Null)?
                .is_some()
            {
                self.bump();
            }
            return Ok(());
        }

        let mut state = self.state.borrow_mut();
        let removed = state
            .storages
            .get_mut(component.name())
            .and_then(|storage| storage.shift_remove(&entity))
            .is_some();
        if removed {
            if let Some(held) = state.reverse.get_mut(&entity) {
                held.shift_remove(component.name());
                if held.is_empty() {
                    state.reverse.remove(&entity);
                }
            }
        }
        drop(state);

        if removed {
            self.bump();
        }
        Ok(())
    }

    /// Store a value mutated during iteration without bumping the version
    pub(crate) fn write_back(&self, entity: Entity, component: &ComponentDef, value: Value) {
        if component.is_builtin() {
            let mut record = value;
            colors_to_vectors(&mut record);
            if let Err(err) = self.call_builtin(component, Verb::Add, entity, &record) {
                tracing::error!("write-back of `{}` failed: {err}", component.name());
            }
            return;
        }

        let mut state = self.state.borrow_mut();
        if let Some(slot) = state
            .storages
            .get_mut(component.name())
            .and_then(|storage| storage.get_mut(&entity))
        {
            *slot = value;
        }
    }

    /// Dispatch one builtin accessor call
    ///
    /// `Ok(None)` means the call degraded: no backend, or the backend failed
    /// and the failure was logged. A missing accessor is a configuration
    /// error.
    fn call_builtin(
        &self,
        component: &ComponentDef,
        verb: Verb,
        entity: Entity,
        arg: &Value,
    ) -> Result<Option<Value>> {
        let Some(accessor) = self.accessor(component, verb)? else {
            tracing::debug!(
                "{} on builtin `{}` ignored: no native backend attached",
                verb.method(component.name()),
                component.name()
            );
            return Ok(None);
        };

        match accessor(entity, arg) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::error!("{err}");
                Ok(None)
            }
        }
    }

    /// Cached accessor lookup; resolves a type on first use
    fn accessor(&self, component: &ComponentDef, verb: Verb) -> Result<Option<NativeFn>> {
        let Some(type_name) = component.type_name() else {
            return Ok(None);
        };

        let mut builtin = self.builtin.borrow_mut();
        if builtin.backend.is_none() {
            return Ok(None);
        }
        if let Some(accessors) = builtin.accessors.get(type_name) {
            return Ok(Some(Rc::clone(accessors.verb(verb))));
        }

        let resolved = match builtin.backend.as_deref() {
            Some(backend) => BuiltinAccessors::resolve(backend, type_name)?,
            None => return Ok(None),
        };
        let accessor = Rc::clone(resolved.verb(verb));
        builtin.accessors.insert(type_name.to_string(), resolved);
        Ok(Some(accessor))
    }

    // === Query Operations ===

    /// Entities holding all of `required` and `with` and none of `without`
    ///
    /// Results are cached per signature until the next structural mutation;
    /// a cache hit returns the same buffer.
    pub fn get_entities_with_components(
        &self,
        required: &[ComponentDef],
        with: &[ComponentDef],
        without: &[ComponentDef],
    ) -> Rc<Vec<Entity>> {
        let signature = QuerySignature::new(required, with, without);
        let version = self.version();

        let mut cache = self.cache.borrow_mut();
        if let Some(entry) = cache.entries.get(&signature) {
            if entry.version == version {
                let hit = Rc::clone(&entry.entities);
                cache.stats.hits += 1;
                tracing::trace!("query cache hit for {signature:?}");
                return hit;
            }
        }
        cache.stats.misses += 1;
        let mut buffer = cache.take_buffer();
        drop(cache);

        tracing::trace!("query cache miss for {signature:?} at version {version}");
        self.collect_matches(required, with, without, &mut buffer);

        let entities = Rc::new(buffer);
        let mut cache = self.cache.borrow_mut();
        let previous = cache.entries.insert(
            signature,
            CachedQuery {
                version,
                entities: Rc::clone(&entities),
            },
        );
        if let Some(previous) = previous {
            cache.recycle(previous.entities);
        }
        entities
    }

    fn collect_matches(
        &self,
        required: &[ComponentDef],
        with: &[ComponentDef],
        without: &[ComponentDef],
        out: &mut Vec<Entity>,
    ) {
        out.clear();
        {
            let state = self.state.borrow();
            let seed = required
                .iter()
                .filter(|def| !def.is_builtin())
                .map(|def| state.storages.get(def.name()))
                .min_by_key(|storage| storage.map_or(0, |s| s.len()));

            match seed {
                Some(Some(storage)) => out.extend(storage.keys().copied()),
                Some(None) => return,
                None => out.extend(state.entities.iter()),
            }
        }

        out.retain(|&entity| {
            required
                .iter()
                .chain(with)
                .all(|def| self.has(entity, def))
                && !without.iter().any(|def| self.has(entity, def))
        });
    }

    /// Query cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats
    }

    /// Number of pooled result buffers waiting for reuse
    pub fn pooled_buffers(&self) -> usize {
        self.cache.borrow().pool.len()
    }

    /// Number of entities holding a script component
    pub fn script_len(&self, component: &ComponentDef) -> usize {
        self.state
            .borrow()
            .storages
            .get(component.name())
            .map_or(0, |storage| storage.len())
    }
}
