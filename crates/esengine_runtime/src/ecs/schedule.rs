//! System scheduling

use rustc_hash::FxHashMap;

use super::{Resources, System, SystemRunner, World};
use crate::error::{EcsError, Result};

/// System execution phases
///
/// `Startup` runs once before the first frame. Each frame then runs
/// First → PreUpdate → (fixed steps) → Update → PostUpdate → Last, where each
/// fixed step runs FixedPreUpdate → FixedUpdate → FixedPostUpdate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Runs once before the first frame
    Startup,
    /// Start of the frame
    First,
    /// Input and time-dependent preparation
    PreUpdate,
    /// Main game logic
    #[default]
    Update,
    /// Reactions to this frame's logic
    PostUpdate,
    /// End of the frame
    Last,
    /// Before each fixed step
    FixedPreUpdate,
    /// Fixed-rate simulation
    FixedUpdate,
    /// After each fixed step
    FixedPostUpdate,
}

impl Phase {
    /// Per-frame phases that run before the fixed steps
    pub const BEFORE_FIXED: [Phase; 2] = [Phase::First, Phase::PreUpdate];

    /// Phases of one fixed step
    pub const FIXED: [Phase; 3] = [
        Phase::FixedPreUpdate,
        Phase::FixedUpdate,
        Phase::FixedPostUpdate,
    ];

    /// Per-frame phases that run after the fixed steps
    pub const AFTER_FIXED: [Phase; 3] = [Phase::Update, Phase::PostUpdate, Phase::Last];

    /// Whether the phase belongs to the fixed-step cadence
    pub fn is_fixed(self) -> bool {
        Self::FIXED.contains(&self)
    }
}

/// Schedule for running systems
///
/// Systems run in registration order within their phase.
#[derive(Default)]
pub struct Schedule {
    phases: FxHashMap<Phase, Vec<System>>,
    started: bool,
}

impl Schedule {
    /// Create a new empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system to a phase
    pub fn add_system(&mut self, phase: Phase, system: System) {
        tracing::debug!("Adding system `{}` to {phase:?}", system.name());
        self.phases.entry(phase).or_default().push(system);
    }

    /// Builder form of [`Schedule::add_system`]
    pub fn with_system(mut self, phase: Phase, system: System) -> Self {
        self.add_system(phase, system);
        self
    }

    /// Run the systems of one phase
    ///
    /// A configuration error stops the phase and is returned. Other system
    /// errors are logged and the remaining systems still run.
    pub fn run_phase(&mut self, phase: Phase, world: &World, resources: &Resources) -> Result<()> {
        let Some(systems) = self.phases.get_mut(&phase) else {
            return Ok(());
        };

        tracing::trace!("Running {phase:?} ({} systems)", systems.len());
        let runner = SystemRunner::new(world, resources);
        for system in systems.iter_mut().filter(|s| s.is_enabled()) {
            match runner.run(system) {
                Ok(()) => {}
                Err(err @ EcsError::Configuration(_)) => return Err(err),
                Err(err) => {
                    tracing::error!("System `{}` failed in {phase:?}: {err}", system.name());
                }
            }
        }
        Ok(())
    }

    /// Run `Startup` if it has not run yet
    ///
    /// Returns whether it ran.
    pub fn run_startup(&mut self, world: &World, resources: &Resources) -> Result<bool> {
        if self.started {
            return Ok(false);
        }
        self.started = true;
        self.run_phase(Phase::Startup, world, resources)?;
        Ok(true)
    }

    /// Whether `Startup` has run
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Get system count
    pub fn len(&self) -> usize {
        self.phases.values().map(Vec::len).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enable or disable every system named `name`
    ///
    /// Returns how many systems matched.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> usize {
        let mut matched = 0;
        for system in self.phases.values_mut().flatten() {
            if system.name() == name {
                system.set_enabled(enabled);
                matched += 1;
            }
        }
        if matched == 0 {
            tracing::warn!("No system named `{name}` to enable or disable");
        }
        matched
    }

    /// Get system names of a phase in run order
    pub fn system_names(&self, phase: Phase) -> Vec<&str> {
        self.phases
            .get(&phase)
            .map(|systems| systems.iter().map(|s| s.name()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, name: &str) -> System {
        let log = Rc::clone(log);
        let label = name.to_string();
        System::new(name, [], move |_| {
            log.borrow_mut().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Startup < Phase::First);
        assert!(Phase::PreUpdate < Phase::Update);
        assert!(Phase::PostUpdate < Phase::Last);
        assert!(Phase::FixedUpdate.is_fixed());
        assert!(!Phase::Update.is_fixed());
    }

    #[test]
    fn test_registration_order_within_phase() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = Schedule::new()
            .with_system(Phase::Update, recorder(&log, "a"))
            .with_system(Phase::Last, recorder(&log, "z"))
            .with_system(Phase::Update, recorder(&log, "b"));

        let world = World::new();
        let resources = Resources::new();
        schedule.run_phase(Phase::Update, &world, &resources).unwrap();

        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(schedule.system_names(Phase::Update), vec!["a", "b"]);
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn test_startup_runs_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(Phase::Startup, recorder(&log, "init"));

        let world = World::new();
        let resources = Resources::new();
        assert!(schedule.run_startup(&world, &resources).unwrap());
        assert!(!schedule.run_startup(&world, &resources).unwrap());
        assert_eq!(log.borrow().len(), 1);
        assert!(schedule.has_started());
    }

    #[test]
    fn test_failing_system_does_not_stop_phase() {
        crate::init_test_tracing();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(
            Phase::Update,
            System::new("broken", [], |_| Err(EcsError::Other("boom".into()))),
        );
        schedule.add_system(Phase::Update, recorder(&log, "after"));

        let world = World::new();
        let resources = Resources::new();
        assert!(schedule.run_phase(Phase::Update, &world, &resources).is_ok());
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn test_disabled_systems_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut muted = recorder(&log, "muted");
        muted.set_enabled(false);
        assert!(!muted.is_enabled());

        let mut schedule = Schedule::new()
            .with_system(Phase::Update, muted)
            .with_system(Phase::Update, recorder(&log, "loud"));
        let world = World::new();
        let resources = Resources::new();

        schedule.run_phase(Phase::Update, &world, &resources).unwrap();
        assert_eq!(*log.borrow(), vec!["loud"]);

        assert_eq!(schedule.set_enabled("muted", true), 1);
        assert_eq!(schedule.set_enabled("loud", false), 1);
        assert_eq!(schedule.set_enabled("missing", false), 0);
        schedule.run_phase(Phase::Update, &world, &resources).unwrap();
        assert_eq!(*log.borrow(), vec!["loud", "muted"]);
        assert_eq!(schedule.system_names(Phase::Update), vec!["muted", "loud"]);
    }

    #[test]
    fn test_configuration_error_stops_phase() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(
            Phase::Update,
            System::new("misdeclared", [], |args| {
                args.commands(0)?;
                Ok(())
            }),
        );
        schedule.add_system(Phase::Update, recorder(&log, "after"));

        let world = World::new();
        let resources = Resources::new();
        let err = schedule
            .run_phase(Phase::Update, &world, &resources)
            .unwrap_err();
        assert!(matches!(err, EcsError::Configuration(_)));
        assert!(log.borrow().is_empty());
    }
}
