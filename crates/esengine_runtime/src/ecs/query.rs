//! Query system for iterating over entities with specific components
//!
//! A [`QueryDescriptor`] lists the components a query reads or writes plus
//! `with`/`without` filters. Iteration is a one-shot cursor: each call to
//! [`Query::iter`] starts a fresh pass, marks the world as iterating, and
//! commits the values of mutable terms back to storage when it moves past a
//! row or is dropped.
//!
//! # Example
//!
//! ```rust
//! use esengine_runtime::ecs::{ComponentDef, QueryDescriptor, World};
//! use serde_json::json;
//!
//! let world = World::new();
//! let health = ComponentDef::script("Health", json!({ "current": 100 })).unwrap();
//! let e = world.spawn().unwrap();
//! world.insert(e, &health, json!({ "current": 10 })).unwrap();
//!
//! let query = world.query(QueryDescriptor::new().write(&health));
//! let mut iter = query.iter();
//! while let Some(mut row) = iter.next_row() {
//!     if let Some(value) = row.get_mut(0) {
//!         value["current"] = json!(20);
//!     }
//! }
//! drop(iter);
//!
//! assert_eq!(world.get(e, &health).unwrap()["current"], json!(20));
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use std::ops::Index;
use std::rc::Rc;

use super::{ComponentDef, Entity, World};
use crate::error::{EcsError, Result};

/// How a query term touches its component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Values are snapshots; changes are discarded
    Read,
    /// Values are committed back to storage
    Write,
}

/// One requested component
#[derive(Clone, Debug)]
pub struct QueryTerm {
    /// Component fetched for each row
    pub component: ComponentDef,
    /// Read or write
    pub access: Access,
}

/// Declarative description of a query
#[derive(Clone, Debug, Default)]
pub struct QueryDescriptor {
    terms: SmallVec<[QueryTerm; 4]>,
    with: SmallVec<[ComponentDef; 2]>,
    without: SmallVec<[ComponentDef; 2]>,
}

impl QueryDescriptor {
    /// Empty descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `component` read-only
    pub fn read(mut self, component: &ComponentDef) -> Self {
        self.terms.push(QueryTerm {
            component: component.clone(),
            access: Access::Read,
        });
        self
    }

    /// Fetch `component` and commit changes back
    pub fn write(mut self, component: &ComponentDef) -> Self {
        self.terms.push(QueryTerm {
            component: component.clone(),
            access: Access::Write,
        });
        self
    }

    /// Require `component` without fetching it
    pub fn with(mut self, component: &ComponentDef) -> Self {
        self.with.push(component.clone());
        self
    }

    /// Skip entities carrying `component`
    pub fn without(mut self, component: &ComponentDef) -> Self {
        self.without.push(component.clone());
        self
    }

    /// Fetched terms in declaration order
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// Whether any term is mutable
    pub fn is_mutable(&self) -> bool {
        self.terms.iter().any(|t| t.access == Access::Write)
    }

    fn required(&self) -> SmallVec<[ComponentDef; 4]> {
        self.terms.iter().map(|t| t.component.clone()).collect()
    }
}

/// A query bound to a world
#[derive(Clone)]
pub struct Query<'w> {
    world: &'w World,
    descriptor: QueryDescriptor,
}

impl World {
    /// Create a query over this world
    pub fn query(&self, descriptor: QueryDescriptor) -> Query<'_> {
        Query::new(self, descriptor)
    }
}

impl<'w> Query<'w> {
    /// Create a new query
    pub fn new(world: &'w World, descriptor: QueryDescriptor) -> Self {
        Self { world, descriptor }
    }

    /// The descriptor this query runs
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// Start a fresh iteration
    pub fn iter(&self) -> QueryIter<'w> {
        let entities = self.world.get_entities_with_components(
            &self.descriptor.required(),
            &self.descriptor.with,
            &self.descriptor.without,
        );
        self.world.begin_iteration();

        QueryIter {
            world: self.world,
            terms: self.descriptor.terms.clone(),
            without: self.descriptor.without.clone(),
            entities,
            cursor: 0,
            pending: None,
        }
    }

    /// Run `f` on every row
    pub fn for_each(&self, mut f: impl FnMut(QueryRow<'_>)) {
        let mut iter = self.iter();
        while let Some(row) = iter.next_row() {
            f(row);
        }
    }

    /// Run `f` on every row, stopping at the first error
    ///
    /// Rows visited before the error keep their writes.
    pub fn try_for_each(&self, mut f: impl FnMut(QueryRow<'_>) -> Result<()>) -> Result<()> {
        let mut iter = self.iter();
        while let Some(row) = iter.next_row() {
            f(row)?;
        }
        Ok(())
    }

    /// First matching row, if any
    pub fn single(&self) -> Option<(Entity, Vec<Value>)> {
        let mut iter = self.iter();
        let row = iter.next_row()?;
        Some((row.entity(), row.values.to_vec()))
    }

    /// Whether no entity matches
    pub fn is_empty(&self) -> bool {
        let mut iter = self.iter();
        let empty = iter.next_row().is_none();
        empty
    }

    /// Number of matching rows
    pub fn count(&self) -> usize {
        let mut iter = self.iter();
        let mut count = 0;
        while iter.next_row().is_some() {
            count += 1;
        }
        count
    }

    /// Snapshot every row
    pub fn to_vec(&self) -> Vec<(Entity, Vec<Value>)> {
        let mut rows = Vec::new();
        let mut iter = self.iter();
        while let Some(row) = iter.next_row() {
            rows.push((row.entity(), row.values.to_vec()));
        }
        rows
    }
}

/// One pass over a query's matches
///
/// Not restartable. While it lives the world rejects spawn, despawn, and
/// component removal.
pub struct QueryIter<'w> {
    world: &'w World,
    terms: SmallVec<[QueryTerm; 4]>,
    without: SmallVec<[ComponentDef; 2]>,
    entities: Rc<Vec<Entity>>,
    cursor: usize,
    /// Row handed out last and not yet committed
    pending: Option<(Entity, SmallVec<[Value; 4]>)>,
}

impl<'w> QueryIter<'w> {
    /// Commit the previous row and advance to the next match
    pub fn next_row(&mut self) -> Option<QueryRow<'_>> {
        self.commit();

        while let Some(&entity) = self.entities.get(self.cursor) {
            self.cursor += 1;
            if let Some(values) = self.fetch(entity) {
                self.pending = Some((entity, values));
                break;
            }
        }

        let (entity, values) = self.pending.as_mut()?;
        Some(QueryRow {
            entity: *entity,
            terms: &self.terms,
            values,
        })
    }

    /// Entities left to visit, including ones that may be skipped
    pub fn remaining(&self) -> usize {
        self.entities.len().saturating_sub(self.cursor)
    }

    fn fetch(&self, entity: Entity) -> Option<SmallVec<[Value; 4]>> {
        if !self.world.valid(entity) {
            return None;
        }
        if self.without.iter().any(|def| self.world.has(entity, def)) {
            return None;
        }
        self.terms
            .iter()
            .map(|term| self.world.try_get(entity, &term.component))
            .collect()
    }

    fn commit(&mut self) {
        let Some((entity, values)) = self.pending.take() else {
            return;
        };
        for (term, value) in self.terms.iter().zip(values) {
            if term.access == Access::Write {
                self.world.write_back(entity, &term.component, value);
            }
        }
    }
}

impl Drop for QueryIter<'_> {
    fn drop(&mut self) {
        self.commit();
        self.world.end_iteration();
    }
}

/// One matched entity and its component values, in term order
pub struct QueryRow<'a> {
    entity: Entity,
    terms: &'a [QueryTerm],
    values: &'a mut [Value],
}

impl QueryRow<'_> {
    /// The matched entity
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Number of fetched values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row fetched nothing
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of term `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Mutable value of term `index`; `None` for read-only terms
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        match self.terms.get(index)?.access {
            Access::Write => self.values.get_mut(index),
            Access::Read => None,
        }
    }

    /// Value of term `index` decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let term = self
            .terms
            .get(index)
            .ok_or_else(|| EcsError::Other(format!("query row has no term {index}")))?;
        term.component.decode(self.values[index].clone())
    }

    /// Replace the value of a mutable term
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let name = self
            .terms
            .get(index)
            .map(|t| t.component.name().to_string())
            .unwrap_or_default();
        let slot = self.get_mut(index).ok_or_else(|| {
            EcsError::Other(format!("query term {index} `{name}` is not mutable"))
        })?;
        *slot = value;
        Ok(())
    }
}

impl Index<usize> for QueryRow<'_> {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::backend::DenseBackend;
    use crate::ecs::builtins;
    use serde_json::json;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn position() -> ComponentDef {
        ComponentDef::script("Position", json!({ "x": 0.0, "y": 0.0 })).unwrap()
    }

    fn velocity() -> ComponentDef {
        ComponentDef::script("Velocity", json!({ "x": 0.0, "y": 0.0 })).unwrap()
    }

    fn frozen() -> ComponentDef {
        ComponentDef::script("Frozen", json!({})).unwrap()
    }

    fn setup() -> (World, Vec<Entity>) {
        let world = World::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let e = world.spawn().unwrap();
            world.insert(e, &position(), json!({ "x": i as f64 })).unwrap();
            world.insert(e, &velocity(), json!({ "x": 1.0 })).unwrap();
            ids.push(e);
        }
        (world, ids)
    }

    fn movement() -> QueryDescriptor {
        QueryDescriptor::new().write(&position()).read(&velocity())
    }

    #[test]
    fn test_query_iterates_matches() {
        let (world, ids) = setup();
        let lone = world.spawn().unwrap();
        world.insert(lone, &position(), Value::Null).unwrap();

        let rows = world.query(movement()).to_vec();
        let entities: Vec<_> = rows.iter().map(|(e, _)| *e).collect();
        assert_eq!(entities, ids);
        assert_eq!(rows[2].1[0], json!({ "x": 2.0, "y": 0.0 }));
    }

    #[test]
    fn test_writes_commit_on_advance_and_drop() {
        let (world, ids) = setup();

        world.query(movement()).for_each(|mut row| {
            let dx = row[1]["x"].as_f64().unwrap();
            let pos = row.get_mut(0).unwrap();
            pos["x"] = json!(pos["x"].as_f64().unwrap() + dx);
        });

        for (i, e) in ids.iter().enumerate() {
            assert_eq!(world.get(*e, &position()).unwrap()["x"], json!(i as f64 + 1.0));
        }
        assert!(!world.is_iterating());
    }

    #[test]
    fn test_read_terms_are_not_writable() {
        let (world, ids) = setup();
        let query = world.query(movement());
        let mut iter = query.iter();

        let mut row = iter.next_row().unwrap();
        assert!(row.get_mut(1).is_none());
        assert!(row.set(1, json!({ "x": 9.0 })).is_err());
        drop(iter);

        assert_eq!(world.get(ids[0], &velocity()).unwrap()["x"], json!(1.0));
    }

    #[test]
    fn test_writes_survive_early_exit() {
        let (world, ids) = setup();
        let query = world.query(movement());

        let mut iter = query.iter();
        while let Some(mut row) = iter.next_row() {
            row.set(0, json!({ "x": 50.0, "y": 0.0 })).unwrap();
            if row.entity() == ids[1] {
                break;
            }
        }
        drop(iter);

        assert_eq!(world.get(ids[0], &position()).unwrap()["x"], json!(50.0));
        assert_eq!(world.get(ids[1], &position()).unwrap()["x"], json!(50.0));
        assert_eq!(world.get(ids[2], &position()).unwrap()["x"], json!(2.0));
        assert_eq!(world.iteration_depth(), 0);
    }

    #[test]
    fn test_writes_survive_errors() {
        let (world, ids) = setup();

        let result = world.query(movement()).try_for_each(|mut row| {
            row.set(0, json!({ "x": -1.0, "y": 0.0 }))?;
            Err(EcsError::Other("stop".into()))
        });

        assert!(result.is_err());
        assert_eq!(world.get(ids[0], &position()).unwrap()["x"], json!(-1.0));
        assert_eq!(world.get(ids[1], &position()).unwrap()["x"], json!(1.0));
        assert!(!world.is_iterating());
    }

    #[test]
    fn test_writes_survive_panics() {
        let (world, ids) = setup();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let query = world.query(movement());
            let mut iter = query.iter();
            let mut row = iter.next_row().unwrap();
            row.set(0, json!({ "x": 7.0, "y": 7.0 })).unwrap();
            panic!("system failed");
        }));

        assert!(result.is_err());
        assert_eq!(world.get(ids[0], &position()).unwrap(), json!({ "x": 7.0, "y": 7.0 }));
        assert!(!world.is_iterating());
    }

    #[test]
    fn test_mutation_guard_during_iteration() {
        let (world, ids) = setup();
        let query = world.query(movement());

        let iter = query.iter();
        assert!(matches!(world.spawn(), Err(EcsError::IllegalMutation { .. })));
        assert!(matches!(world.despawn(ids[0]), Err(EcsError::IllegalMutation { .. })));
        assert!(matches!(
            world.remove(ids[0], &velocity()),
            Err(EcsError::IllegalMutation { .. })
        ));
        drop(iter);

        assert!(world.spawn().is_ok());
        assert!(world.despawn(ids[0]).is_ok());
    }

    #[test]
    fn test_without_skips_entities() {
        let (world, ids) = setup();
        world.insert(ids[1], &frozen(), Value::Null).unwrap();

        let query = world.query(movement().without(&frozen()));
        let entities: Vec<_> = query.to_vec().into_iter().map(|(e, _)| e).collect();
        assert_eq!(entities, vec![ids[0], ids[2]]);

        let query = world.query(QueryDescriptor::new().read(&position()).with(&frozen()));
        assert_eq!(query.single().map(|(e, _)| e), Some(ids[1]));
    }

    #[test]
    fn test_without_rechecked_mid_iteration() {
        let (world, ids) = setup();
        let query = world.query(movement().without(&frozen()));

        let mut iter = query.iter();
        let first = iter.next_row().map(|row| row.entity());
        world.insert(ids[2], &frozen(), Value::Null).unwrap();
        let mut rest = Vec::new();
        while let Some(row) = iter.next_row() {
            rest.push(row.entity());
        }

        assert_eq!(first, Some(ids[0]));
        assert_eq!(rest, vec![ids[1]]);
    }

    #[test]
    fn test_reducers_run_fresh_iterations() {
        let (world, _) = setup();
        let query = world.query(movement());

        assert_eq!(query.count(), 3);
        assert_eq!(query.count(), 3);
        assert!(!query.is_empty());
        assert!(query.single().is_some());
        assert!(!world.is_iterating());

        let empty = world.query(QueryDescriptor::new().read(&frozen()));
        assert!(empty.is_empty());
        assert!(empty.single().is_none());
    }

    #[test]
    fn test_nested_iterations_track_depth() {
        let (world, _) = setup();
        let outer = world.query(movement());
        let inner = world.query(QueryDescriptor::new().read(&velocity()));

        let mut iter = outer.iter();
        while iter.next_row().is_some() {
            assert_eq!(inner.count(), 3);
            assert_eq!(world.iteration_depth(), 1);
        }
        drop(iter);
        assert_eq!(world.iteration_depth(), 0);
    }

    #[test]
    fn test_builtin_scenario() {
        let mut world = World::new();
        world
            .attach_backend(DenseBackend::new(), &builtins::components())
            .unwrap();
        let rigid_body = builtins::rigid_body();
        let transform = builtins::local_transform();

        let ids: Vec<_> = (0..4).map(|_| world.spawn().unwrap()).collect();
        for &e in &ids[1..] {
            world.insert(e, &rigid_body, Value::Null).unwrap();
        }
        world.insert(ids[1], &transform, Value::Null).unwrap();
        world.insert(ids[3], &transform, Value::Null).unwrap();

        let query = world.query(QueryDescriptor::new().read(&rigid_body).write(&transform));
        query.for_each(|mut row| {
            let t = row.get_mut(1).unwrap();
            t["position"]["x"] = json!(4.0);
        });

        let matched: Vec<_> = query.to_vec().into_iter().map(|(e, _)| e.to_raw()).collect();
        assert_eq!(matched, vec![1, 3]);
        assert_eq!(world.get(ids[3], &transform).unwrap()["position"]["x"], json!(4.0));
    }

    #[test]
    fn test_typed_row_access() {
        #[derive(serde::Deserialize)]
        struct Position {
            x: f32,
        }

        let (world, _) = setup();
        let query = world.query(movement());
        let mut iter = query.iter();
        iter.next_row();
        let row = iter.next_row().unwrap();

        let pos: Position = row.get_as(0).unwrap();
        assert_eq!(pos.x, 1.0);
        assert!(row.get_as::<Position>(5).is_err());
    }
}
