//! Systems and parameter resolution
//!
//! A system declares its parameters up front as [`SystemParam`]s. The
//! [`SystemRunner`] resolves them against a world and resource store, hands
//! the resolved slots to the body as [`SystemArgs`], and flushes every
//! command buffer once the body returns successfully.
//!
//! # Example
//!
//! ```rust
//! use esengine_runtime::ecs::{Entity, Resources, System, SystemParam, SystemRunner, World};
//!
//! let world = World::new();
//! let resources = Resources::new();
//! let e = world.spawn().unwrap();
//!
//! let mut cleanup = System::new("cleanup", [SystemParam::Commands], move |args| {
//!     args.commands(0)?.despawn(e);
//!     Ok(())
//! });
//! SystemRunner::new(&world, &resources).run(&mut cleanup).unwrap();
//! assert!(!world.valid(e));
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Commands, Query, QueryDescriptor, ResMut, ResourceDef, Resources, World};
use crate::error::{EcsError, Result};

/// A declared system parameter
#[derive(Clone, Debug)]
pub enum SystemParam {
    /// A fresh query over the world
    Query(QueryDescriptor),
    /// Snapshot of a resource taken when the system starts
    Res(ResourceDef),
    /// Write-through handle to a resource
    ResMut(ResourceDef),
    /// A command buffer flushed after the body returns
    Commands,
}

impl SystemParam {
    /// Parameter kind name
    pub fn kind(&self) -> &'static str {
        match self {
            SystemParam::Query(_) => "Query",
            SystemParam::Res(_) => "Res",
            SystemParam::ResMut(_) => "ResMut",
            SystemParam::Commands => "Commands",
        }
    }
}

/// A resolved parameter slot
pub enum ParamValue<'w> {
    /// Resolved `Query`
    Query(Query<'w>),
    /// Resolved `Res`
    Res(Value),
    /// Resolved `ResMut`
    ResMut(ResMut<'w>),
    /// Resolved `Commands`
    Commands(Commands<'w>),
}

impl ParamValue<'_> {
    /// Parameter kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Query(_) => "Query",
            ParamValue::Res(_) => "Res",
            ParamValue::ResMut(_) => "ResMut",
            ParamValue::Commands(_) => "Commands",
        }
    }
}

/// Resolved parameters handed to a system body
pub struct SystemArgs<'w> {
    system: &'w str,
    world: &'w World,
    params: Vec<ParamValue<'w>>,
}

impl<'w> SystemArgs<'w> {
    /// The world the system runs against
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if the system declared no parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Query in slot `index`
    pub fn query(&self, index: usize) -> Result<Query<'w>> {
        match self.slot(index, "Query")? {
            ParamValue::Query(query) => Ok(query.clone()),
            other => Err(self.mismatch(index, "Query", other.kind())),
        }
    }

    /// Resource snapshot in slot `index`
    pub fn res(&self, index: usize) -> Result<&Value> {
        match self.slot(index, "Res")? {
            ParamValue::Res(value) => Ok(value),
            other => Err(self.mismatch(index, "Res", other.kind())),
        }
    }

    /// Resource snapshot in slot `index` decoded into `T`
    pub fn res_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        serde_json::from_value(self.res(index)?.clone()).map_err(|e| {
            EcsError::Other(format!(
                "system `{}` cannot decode resource in slot {index}: {e}",
                self.system
            ))
        })
    }

    /// Resource handle in slot `index`
    pub fn res_mut(&self, index: usize) -> Result<ResMut<'w>> {
        match self.slot(index, "ResMut")? {
            ParamValue::ResMut(handle) => Ok(handle.clone()),
            other => Err(self.mismatch(index, "ResMut", other.kind())),
        }
    }

    /// Command buffer in slot `index`
    pub fn commands(&mut self, index: usize) -> Result<&mut Commands<'w>> {
        let found = self.slot(index, "Commands")?.kind();
        if found != "Commands" {
            return Err(self.mismatch(index, "Commands", found));
        }
        let system = self.system;
        match self.params.get_mut(index) {
            Some(ParamValue::Commands(commands)) => Ok(commands),
            _ => Err(EcsError::Configuration(format!(
                "system `{system}` has no Commands in slot {index}"
            ))),
        }
    }

    fn slot(&self, index: usize, expected: &str) -> Result<&ParamValue<'w>> {
        self.params.get(index).ok_or_else(|| {
            EcsError::Configuration(format!(
                "system `{}` asked for {expected} in slot {index} but declared {} parameters",
                self.system,
                self.params.len()
            ))
        })
    }

    fn mismatch(&self, index: usize, expected: &str, found: &str) -> EcsError {
        EcsError::Configuration(format!(
            "system `{}` asked for {expected} in slot {index} but declared {found}",
            self.system
        ))
    }
}

/// Boxed system body
pub type SystemFn = Box<dyn FnMut(&mut SystemArgs<'_>) -> Result<()>>;

/// A named system: declared parameters plus a body
pub struct System {
    name: String,
    params: Vec<SystemParam>,
    body: SystemFn,
    enabled: bool,
}

impl System {
    /// Create a new system
    pub fn new<F>(
        name: impl Into<String>,
        params: impl IntoIterator<Item = SystemParam>,
        body: F,
    ) -> Self
    where
        F: FnMut(&mut SystemArgs<'_>) -> Result<()> + 'static,
    {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            body: Box::new(body),
            enabled: true,
        }
    }

    /// System name for debugging
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    pub fn params(&self) -> &[SystemParam] {
        &self.params
    }

    /// Enable or disable the system; a schedule skips disabled systems
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the system runs when its phase runs
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Create a system
///
/// # Example
///
/// ```rust,ignore
/// let tick = system("tick", [SystemParam::ResMut(time)], |args| {
///     args.res_mut(0)?.modify(|t| t["frameCount"] = json!(1));
///     Ok(())
/// });
/// ```
pub fn system<F>(
    name: impl Into<String>,
    params: impl IntoIterator<Item = SystemParam>,
    body: F,
) -> System
where
    F: FnMut(&mut SystemArgs<'_>) -> Result<()> + 'static,
{
    System::new(name, params, body)
}

/// Resolves parameters and runs systems against one world
#[derive(Clone, Copy)]
pub struct SystemRunner<'w> {
    world: &'w World,
    resources: &'w Resources,
}

impl<'w> SystemRunner<'w> {
    /// Create a runner
    pub fn new(world: &'w World, resources: &'w Resources) -> Self {
        Self { world, resources }
    }

    /// Resolve one parameter
    pub fn resolve(&self, param: &SystemParam) -> ParamValue<'w> {
        match param {
            SystemParam::Query(descriptor) => {
                ParamValue::Query(Query::new(self.world, descriptor.clone()))
            }
            SystemParam::Res(resource) => ParamValue::Res(self.resources.get(resource)),
            SystemParam::ResMut(resource) => {
                ParamValue::ResMut(self.resources.get_res_mut(resource))
            }
            SystemParam::Commands => {
                ParamValue::Commands(Commands::new(self.world, self.resources))
            }
        }
    }

    /// Run a system
    ///
    /// Command buffers are flushed only when the body returns `Ok`; on error
    /// they are discarded and the error is returned.
    pub fn run(&self, system: &mut System) -> Result<()> {
        tracing::trace!("Running system `{}`", system.name);

        let params = system.params.iter().map(|p| self.resolve(p)).collect();
        let mut args = SystemArgs {
            system: &system.name,
            world: self.world,
            params,
        };

        (system.body)(&mut args)?;

        for param in &mut args.params {
            if let ParamValue::Commands(commands) = param {
                commands.flush();
            }
        }
        Ok(())
    }
}
