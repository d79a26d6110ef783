//! Entity Component System (ECS)
//!
//! A single-threaded ECS runtime with two component stores: builtin
//! components held by a native backend behind accessor functions, and
//! script components held in the world's sparse maps.
//!
//! ## Overview
//!
//! - **Entity**: A unique identifier for game objects
//! - **Component**: A named default record; data is merged over it on insert
//! - **Resource**: A global singleton value
//! - **Query**: Iteration over entities matching a component signature
//! - **Commands**: Structural changes deferred until a system returns
//! - **System**: Declared parameters plus a body, run per phase

pub mod backend;
pub mod builtins;
mod commands;
mod component;
mod entity;
mod query;
mod resource;
mod schedule;
mod system;
mod world;

pub use backend::{BuiltinAccessors, DenseBackend, NativeBackend, NativeFn, Verb};
pub use commands::{Command, Commands, EntityCommands, SpawnBuilder};
pub use component::{value_kind, ComponentDef, ComponentKind, Registry, ShapeValidator, Validator};
pub use entity::{Entity, EntityManager};
pub use query::{Access, Query, QueryDescriptor, QueryIter, QueryRow, QueryTerm};
pub use resource::{ResMut, ResourceDef, Resources};
pub use schedule::{Phase, Schedule};
pub use system::{system, ParamValue, System, SystemArgs, SystemFn, SystemParam, SystemRunner};
pub use world::{CacheStats, World};
