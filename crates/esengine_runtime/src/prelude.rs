//! Common imports for esengine_runtime
//!
//! ```rust
//! use esengine_runtime::prelude::*;
//! ```

pub use crate::app::{App, Plugin};
pub use crate::config::RuntimeConfig;
pub use crate::ecs::builtins::{self, FixedTime, Time};
pub use crate::ecs::{
    system, Access, Commands, ComponentDef, DenseBackend, Entity, NativeBackend, Phase, Query,
    QueryDescriptor, QueryRow, Registry, ResMut, ResourceDef, Resources, Schedule, System,
    SystemArgs, SystemParam, SystemRunner, World,
};
pub use crate::error::{EcsError, Result};
