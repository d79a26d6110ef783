//! # ESEngine Runtime
//!
//! The entity-component-system runtime that drives per-frame game logic.
//!
//! This crate provides:
//! - **Definitions** of component shapes and resource singletons
//! - **World** storage split between a native backend and script maps
//! - **Queries** with write-back of mutable terms
//! - **Commands** for structural changes deferred past iteration
//! - **Schedule** of systems across fixed per-frame and fixed-step phases
//! - **App** frame driver with plugins and time resources
//!
//! ## Quick Start
//!
//! ```rust
//! use esengine_runtime::prelude::*;
//! use serde_json::json;
//!
//! let mut app = App::new();
//! let health = app
//!     .registry_mut()
//!     .script("Health", json!({ "current": 100, "max": 100 }))
//!     .unwrap();
//!
//! app.add_system(
//!     Phase::Update,
//!     System::new(
//!         "regen",
//!         [SystemParam::Query(QueryDescriptor::new().write(&health))],
//!         |args| {
//!             args.query(0)?.for_each(|mut row| {
//!                 if let Some(h) = row.get_mut(0) {
//!                     let max = h["max"].clone();
//!                     h["current"] = max;
//!                 }
//!             });
//!             Ok(())
//!         },
//!     ),
//! );
//!
//! let e = app.world().spawn().unwrap();
//! app.world().insert(e, &health, json!({ "current": 10 })).unwrap();
//! app.update(1.0 / 60.0).unwrap();
//! assert_eq!(app.world().get(e, &health).unwrap()["current"], json!(100));
//! ```

// Application frame driver
pub mod app;

// Runtime configuration
pub mod config;

// ECS - Entity Component System
pub mod ecs;

// Error types
pub mod error;

// Prelude
pub mod prelude;

// Re-export core types at crate root
pub use app::{App, Plugin};
pub use config::RuntimeConfig;
pub use ecs::{
    Commands, ComponentDef, Entity, Phase, Query, QueryDescriptor, Registry, ResourceDef,
    Resources, Schedule, System, SystemParam, SystemRunner, World,
};
pub use error::{EcsError, Result};

/// Route `tracing` output through the test harness
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
