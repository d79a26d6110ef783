//! Deferred structural mutations
//!
//! Systems record spawns, despawns, and component changes on a [`Commands`]
//! buffer while queries are running; the buffer is applied in recorded order
//! by [`Commands::flush`] once the system body has returned.

use serde_json::Value;

use super::{ComponentDef, Entity, ResourceDef, Resources, World};
use crate::error::Result;

/// A recorded mutation
#[derive(Clone, Debug)]
pub enum Command {
    /// Make a reserved entity alive and insert its components in order
    Spawn {
        /// Id reserved when the spawn was recorded
        entity: Entity,
        /// Components in insertion order
        components: Vec<(ComponentDef, Value)>,
    },
    /// Despawn an entity
    Despawn(Entity),
    /// Insert a component
    Insert {
        /// Target entity
        entity: Entity,
        /// Component to insert
        component: ComponentDef,
        /// Partial record merged over the default
        data: Value,
    },
    /// Remove a component
    Remove {
        /// Target entity
        entity: Entity,
        /// Component to remove
        component: ComponentDef,
    },
    /// Overwrite a resource
    InsertResource {
        /// Resource to write
        resource: ResourceDef,
        /// New value
        value: Value,
    },
}

/// Ordered buffer of deferred mutations bound to a world
pub struct Commands<'w> {
    world: &'w World,
    resources: &'w Resources,
    queue: Vec<Command>,
}

impl<'w> Commands<'w> {
    /// Create an empty buffer
    pub fn new(world: &'w World, resources: &'w Resources) -> Self {
        Self {
            world,
            resources,
            queue: Vec::new(),
        }
    }

    /// Start a deferred spawn
    ///
    /// The entity id is reserved when the builder is finalized, either by
    /// [`SpawnBuilder::id`] or when it is dropped.
    pub fn spawn(&mut self) -> SpawnBuilder<'_, 'w> {
        SpawnBuilder {
            commands: self,
            components: Vec::new(),
            entity: None,
        }
    }

    /// Queue mutations for an existing entity
    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_, 'w> {
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// Queue a despawn
    pub fn despawn(&mut self, entity: Entity) {
        self.queue.push(Command::Despawn(entity));
    }

    /// Queue a component insert
    pub fn insert(&mut self, entity: Entity, component: &ComponentDef, data: Value) {
        self.queue.push(Command::Insert {
            entity,
            component: component.clone(),
            data,
        });
    }

    /// Queue a component removal
    pub fn remove(&mut self, entity: Entity, component: &ComponentDef) {
        self.queue.push(Command::Remove {
            entity,
            component: component.clone(),
        });
    }

    /// Queue a resource write
    pub fn insert_resource(&mut self, resource: &ResourceDef, value: Value) {
        self.queue.push(Command::InsertResource {
            resource: resource.clone(),
            value,
        });
    }

    /// Recorded commands, oldest first
    pub fn queued(&self) -> &[Command] {
        &self.queue
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Apply every recorded command in order and clear the buffer
    ///
    /// Failures are logged and skipped; later commands still apply.
    pub fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let queue = std::mem::take(&mut self.queue);
        tracing::trace!("Flushing {} commands", queue.len());
        for command in queue {
            if let Err(err) = self.apply(command) {
                tracing::warn!("Command failed during flush: {err}");
            }
        }
    }

    fn apply(&self, command: Command) -> Result<()> {
        match command {
            Command::Spawn { entity, components } => {
                self.world.adopt(entity)?;
                for (component, data) in components {
                    if let Err(err) = self.world.insert(entity, &component, data) {
                        tracing::warn!(
                            "Spawned entity {entity} skipped `{}`: {err}",
                            component.name()
                        );
                    }
                }
                Ok(())
            }
            Command::Despawn(entity) => {
                if !self.world.valid(entity) {
                    tracing::debug!("Despawn of dead entity {entity} ignored");
                }
                self.world.despawn(entity)
            }
            Command::Insert {
                entity,
                component,
                data,
            } => {
                if !self.world.valid(entity) {
                    tracing::warn!(
                        "Insert of `{}` on dead entity {entity} skipped",
                        component.name()
                    );
                    return Ok(());
                }
                self.world.insert(entity, &component, data)
            }
            Command::Remove { entity, component } => {
                if !self.world.valid(entity) {
                    tracing::warn!(
                        "Remove of `{}` on dead entity {entity} skipped",
                        component.name()
                    );
                    return Ok(());
                }
                self.world.remove(entity, &component)
            }
            Command::InsertResource { resource, value } => {
                self.resources.set(&resource, value);
                Ok(())
            }
        }
    }
}

impl Drop for Commands<'_> {
    fn drop(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        tracing::debug!("Discarding {} unflushed commands", self.queue.len());
        for command in &self.queue {
            if let Command::Spawn { entity, .. } = command {
                self.world.release(*entity);
            }
        }
    }
}

/// Builder for a deferred spawn
///
/// Inserts are buffered locally and recorded as one spawn command.
pub struct SpawnBuilder<'c, 'w> {
    commands: &'c mut Commands<'w>,
    components: Vec<(ComponentDef, Value)>,
    entity: Option<Entity>,
}

impl SpawnBuilder<'_, '_> {
    /// Buffer a component for the new entity
    pub fn insert(mut self, component: &ComponentDef, data: Value) -> Self {
        self.components.push((component.clone(), data));
        self
    }

    /// Finalize the spawn and return the reserved id
    pub fn id(mut self) -> Entity {
        self.finalize()
    }

    fn finalize(&mut self) -> Entity {
        if let Some(entity) = self.entity {
            return entity;
        }

        let entity = self.commands.world.allocate();
        self.commands.queue.push(Command::Spawn {
            entity,
            components: std::mem::take(&mut self.components),
        });
        self.entity = Some(entity);
        entity
    }
}

impl Drop for SpawnBuilder<'_, '_> {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Queued mutations for one existing entity
pub struct EntityCommands<'c, 'w> {
    commands: &'c mut Commands<'w>,
    entity: Entity,
}

impl EntityCommands<'_, '_> {
    /// Target entity
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Queue a component insert
    pub fn insert(&mut self, component: &ComponentDef, data: Value) -> &mut Self {
        self.commands.insert(self.entity, component, data);
        self
    }

    /// Queue a component removal
    pub fn remove(&mut self, component: &ComponentDef) -> &mut Self {
        self.commands.remove(self.entity, component);
        self
    }

    /// Queue a despawn of this entity
    pub fn despawn(self) {
        self.commands.despawn(self.entity);
    }
}
