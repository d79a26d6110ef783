//! Application frame driver
//!
//! [`App`] owns a world, its resources, the definition registry, and a
//! schedule, and advances them one frame per [`App::update`] call.
//!
//! # Example
//!
//! ```rust
//! use esengine_runtime::prelude::*;
//!
//! let mut app = App::new();
//! app.add_system(
//!     Phase::Update,
//!     System::new("tick", [SystemParam::Res(builtins::time())], |args| {
//!         let _time: Time = args.res_as(0)?;
//!         Ok(())
//!     }),
//! );
//!
//! app.update(1.0 / 60.0).unwrap();
//! assert_eq!(app.time().unwrap().frame_count, 1);
//! ```

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::ecs::builtins::{self, FixedTime, Time};
use crate::ecs::{
    ComponentDef, NativeBackend, Phase, Registry, ResourceDef, Resources, Schedule, System, World,
};
use crate::error::Result;

/// A unit of app configuration
///
/// Plugins register systems, resources, and definitions on an [`App`].
pub trait Plugin {
    /// Configure the app
    fn build(&self, app: &mut App);

    /// Plugin name for debugging
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The frame driver
pub struct App {
    world: World,
    resources: Resources,
    registry: Registry,
    schedule: Schedule,
    config: RuntimeConfig,
    /// Unsimulated fixed-step time, in seconds
    accumulator: f32,
    plugins: Vec<String>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create an app with the default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create an app with a custom configuration
    ///
    /// An invalid configuration is replaced by the defaults with a warning;
    /// use [`App::try_with_config`] to reject it instead.
    pub fn with_config(config: RuntimeConfig) -> Self {
        match Self::try_with_config(config) {
            Ok(app) => app,
            Err(err) => {
                tracing::warn!("{err}; using the default runtime config");
                Self::from_valid_config(RuntimeConfig::default())
            }
        }
    }

    /// Create an app, failing on an invalid configuration
    pub fn try_with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RuntimeConfig) -> Self {
        tracing::info!(
            "Creating app: fixed_timestep={}s max_delta={}s",
            config.fixed_timestep,
            config.max_delta
        );
        Self {
            world: World::with_config(&config),
            resources: Resources::new(),
            registry: Registry::with_builtins(),
            schedule: Schedule::new(),
            config,
            accumulator: 0.0,
            plugins: Vec::new(),
        }
    }

    /// The world
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access, for attaching backends or validators
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Global resources
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Component and resource definitions
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable definition registry
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// The schedule
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Attach a native backend for every builtin in the registry
    pub fn attach_backend(&mut self, backend: impl NativeBackend + 'static) -> Result<&mut Self> {
        let builtins: Vec<ComponentDef> = self.registry.builtins().cloned().collect();
        self.world.attach_backend(backend, &builtins)?;
        Ok(self)
    }

    /// Add a plugin
    pub fn add_plugin(&mut self, plugin: impl Plugin) -> &mut Self {
        let name = plugin.name().to_string();
        tracing::info!("Adding plugin {name}");
        plugin.build(self);
        self.plugins.push(name);
        self
    }

    /// Check if a plugin with this name was added
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p == name)
    }

    /// Add a system to a phase
    pub fn add_system(&mut self, phase: Phase, system: System) -> &mut Self {
        self.schedule.add_system(phase, system);
        self
    }

    /// Add a system that runs once before the first frame
    pub fn add_startup_system(&mut self, system: System) -> &mut Self {
        self.add_system(Phase::Startup, system)
    }

    /// Set a resource value
    pub fn insert_resource(&mut self, resource: &ResourceDef, value: Value) -> &mut Self {
        self.resources.set(resource, value);
        self
    }

    /// Current frame timing
    pub fn time(&self) -> Result<Time> {
        self.resources.get_as(&builtins::time())
    }

    /// Current fixed-step timing
    pub fn fixed_time(&self) -> Result<FixedTime> {
        self.resources.get_as(&builtins::fixed_time())
    }

    /// Advance one frame
    ///
    /// `delta` is clamped to `[0, max_delta]`. Time is updated first, then
    /// Startup runs if it has not, then the frame phases run with as many
    /// fixed steps as the accumulated time allows, up to `max_fixed_steps`.
    pub fn update(&mut self, delta: f32) -> Result<()> {
        let delta = if delta.is_finite() {
            delta.clamp(0.0, self.config.max_delta)
        } else {
            0.0
        };

        let time_def = builtins::time();
        let mut time: Time = self.resources.get_as(&time_def)?;
        time.delta = delta;
        time.elapsed += delta;
        time.frame_count += 1;
        self.resources.set_as(&time_def, &time)?;

        if self.schedule.run_startup(&self.world, &self.resources)? {
            tracing::info!("Startup complete");
        }

        for phase in Phase::BEFORE_FIXED {
            self.schedule.run_phase(phase, &self.world, &self.resources)?;
        }
        self.run_fixed_steps(delta)?;
        for phase in Phase::AFTER_FIXED {
            self.schedule.run_phase(phase, &self.world, &self.resources)?;
        }
        Ok(())
    }

    fn run_fixed_steps(&mut self, delta: f32) -> Result<()> {
        let step = self.config.fixed_timestep;
        let fixed_def = builtins::fixed_time();
        self.accumulator += delta;

        let mut steps = 0;
        while self.accumulator >= step {
            if steps == self.config.max_fixed_steps {
                tracing::warn!(
                    "Dropping {:.3}s of fixed-step time after {steps} steps",
                    self.accumulator
                );
                self.accumulator = 0.0;
                break;
            }

            let mut fixed: FixedTime = self.resources.get_as(&fixed_def)?;
            fixed.delta = step;
            fixed.elapsed += step;
            self.resources.set_as(&fixed_def, &fixed)?;

            for phase in Phase::FIXED {
                self.schedule.run_phase(phase, &self.world, &self.resources)?;
            }
            self.accumulator -= step;
            steps += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{QueryDescriptor, SystemParam};
    use crate::error::EcsError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn recorder(log: &Log, label: &str) -> System {
        let log = Rc::clone(log);
        let label = label.to_string();
        System::new(label.clone(), [], move |_| {
            log.borrow_mut().push(label.clone());
            Ok(())
        })
    }

    fn quarter_steps() -> RuntimeConfig {
        RuntimeConfig {
            fixed_timestep: 0.25,
            max_delta: 4.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_order() {
        let log = Log::default();
        let mut app = App::with_config(quarter_steps());
        for (phase, label) in [
            (Phase::Last, "last"),
            (Phase::FixedPostUpdate, "fixed_post"),
            (Phase::Update, "update"),
            (Phase::First, "first"),
            (Phase::FixedUpdate, "fixed"),
            (Phase::PostUpdate, "post"),
            (Phase::PreUpdate, "pre"),
            (Phase::FixedPreUpdate, "fixed_pre"),
            (Phase::Startup, "startup"),
        ] {
            app.add_system(phase, recorder(&log, label));
        }

        app.update(0.25).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["startup", "first", "pre", "fixed_pre", "fixed", "fixed_post", "update", "post", "last"]
        );

        log.borrow_mut().clear();
        app.update(0.0).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "pre", "update", "post", "last"]);
    }

    #[test]
    fn test_time_is_clamped_and_accumulated() {
        let mut app = App::new();
        assert_eq!(app.time().unwrap(), Time::default());

        app.update(0.05).unwrap();
        app.update(5.0).unwrap();
        app.update(-1.0).unwrap();

        let time = app.time().unwrap();
        assert_eq!(time.frame_count, 3);
        assert_eq!(time.delta, 0.0);
        assert!((time.elapsed - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_fixed_steps_accumulate() {
        let fixed_runs = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fixed_runs);
        let mut app = App::with_config(quarter_steps());
        app.add_system(
            Phase::FixedUpdate,
            System::new("count", [], move |_| {
                *counter.borrow_mut() += 1;
                Ok(())
            }),
        );

        app.update(0.125).unwrap();
        assert_eq!(*fixed_runs.borrow(), 0);
        app.update(0.125).unwrap();
        assert_eq!(*fixed_runs.borrow(), 1);
        app.update(0.5).unwrap();
        assert_eq!(*fixed_runs.borrow(), 3);

        let fixed = app.fixed_time().unwrap();
        assert_eq!(fixed.delta, 0.25);
        assert_eq!(fixed.elapsed, 0.75);
    }

    #[test]
    fn test_fixed_steps_are_capped() {
        crate::init_test_tracing();
        let fixed_runs = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fixed_runs);
        let mut app = App::with_config(RuntimeConfig {
            max_fixed_steps: 2,
            ..quarter_steps()
        });
        app.add_system(
            Phase::FixedUpdate,
            System::new("count", [], move |_| {
                *counter.borrow_mut() += 1;
                Ok(())
            }),
        );

        app.update(1.0).unwrap();
        assert_eq!(*fixed_runs.borrow(), 2);
        app.update(0.25).unwrap();
        assert_eq!(*fixed_runs.borrow(), 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let negative = RuntimeConfig {
            max_delta: -1.0,
            ..Default::default()
        };
        let nan = RuntimeConfig {
            max_delta: f32::NAN,
            ..Default::default()
        };
        let zero_step = RuntimeConfig {
            fixed_timestep: 0.0,
            ..Default::default()
        };

        for config in [negative, nan, zero_step] {
            let err = App::try_with_config(config).err();
            assert!(matches!(err, Some(EcsError::Configuration(_))));
        }
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        crate::init_test_tracing();
        let mut app = App::with_config(RuntimeConfig {
            max_delta: -1.0,
            ..Default::default()
        });
        assert_eq!(app.config(), &RuntimeConfig::default());
        app.update(0.016).unwrap();
        assert_eq!(app.time().unwrap().delta, 0.016);

        let fixed_runs = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fixed_runs);
        let mut app = App::with_config(RuntimeConfig {
            fixed_timestep: 0.0,
            ..Default::default()
        });
        app.add_system(
            Phase::FixedUpdate,
            System::new("count", [], move |_| {
                *counter.borrow_mut() += 1;
                Ok(())
            }),
        );
        app.update(0.0).unwrap();
        assert_eq!(*fixed_runs.borrow(), 0);
    }

    #[test]
    fn test_plugins_and_startup_commands() {
        struct SpawnPlayer;

        impl Plugin for SpawnPlayer {
            fn build(&self, app: &mut App) {
                let player = app
                    .registry_mut()
                    .script("Player", json!({ "name": "" }))
                    .unwrap();
                let spawned = ResourceDef::new("Spawned", json!(0));
                app.insert_resource(&spawned, json!(0));

                let spawn = player.clone();
                app.add_startup_system(System::new(
                    "spawn_player",
                    [SystemParam::Commands],
                    move |args| {
                        args.commands(0)?
                            .spawn()
                            .insert(&spawn, json!({ "name": "p1" }));
                        Ok(())
                    },
                ));
                app.add_system(
                    Phase::Update,
                    System::new(
                        "count_players",
                        [
                            SystemParam::Query(QueryDescriptor::new().read(&player)),
                            SystemParam::ResMut(spawned.clone()),
                        ],
                        |args| {
                            let count = args.query(0)?.count();
                            args.res_mut(1)?.set(json!(count));
                            Ok(())
                        },
                    ),
                );
            }

            fn name(&self) -> &str {
                "SpawnPlayer"
            }
        }

        let mut app = App::new();
        app.add_plugin(SpawnPlayer);
        assert!(app.has_plugin("SpawnPlayer"));

        app.update(0.016).unwrap();
        app.update(0.016).unwrap();
        assert_eq!(app.world().entity_count(), 1);
        assert!(app.registry().component("Player").is_some());
        assert_eq!(
            app.resources().get(&ResourceDef::new("Spawned", json!(0))),
            json!(1)
        );
    }

    #[test]
    fn test_systems_read_time() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&seen);
        let mut app = App::new();
        app.add_system(
            Phase::PreUpdate,
            System::new("frames", [SystemParam::Res(builtins::time())], move |args| {
                out.borrow_mut().push(args.res_as::<Time>(0)?.frame_count);
                Ok(())
            }),
        );

        for _ in 0..3 {
            app.update(0.01).unwrap();
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_attach_backend_uses_registry_builtins() {
        let mut app = App::new();
        app.attach_backend(crate::ecs::DenseBackend::new()).unwrap();
        assert!(app.world().is_attached());

        let e = app.world().spawn().unwrap();
        app.world()
            .insert(e, &builtins::velocity(), Value::Null)
            .unwrap();
        assert!(app.world().has(e, &builtins::velocity()));
    }
}
