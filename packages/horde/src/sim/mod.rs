//! The unit simulation: components, passes and the driver which runs them.
//!
//! Units are bootstrapped in a spawning state, assigned a class by the spawn
//! pass, fight until they die and are replaced by fresh spawning units after
//! a delay. Every random decision draws from the unit's own stream, so a run
//! is reproducible from its `SimConfig` alone, whichever `ExecutionMode` it
//! uses.

use thiserror::Error;

use crate::component_data::EntityTemplate;
use crate::error::WorldError;
use crate::query::Query;
use crate::system::SystemGroup;
use crate::world::World;

pub use self::components::*;
pub use self::config::{ConfigError, SimConfig};
pub use self::render::{DrawCommand, FramebufferSink, NullSink};

pub mod components;
pub mod config;
pub mod lifecycle;
pub mod combat;
pub mod motion;
pub mod render;

/// Counters gathered while running a tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub tick: i64,
    pub spawned: usize,
    pub respawned: usize,
    pub killed: usize,
    pub attacks_launched: usize,
    pub attacks_resolved: usize,
    pub hits_landed: usize,
    /// The longest travel time of any attack launched.
    pub max_attack_ticks: i32,
    pub commands_applied: usize,
    pub playback_failures: usize,
}

impl TickStats {
    /// Fold the counters of a later tick into these.
    pub fn accumulate(&mut self, other: &TickStats) {
        self.tick = other.tick;
        self.spawned += other.spawned;
        self.respawned += other.respawned;
        self.killed += other.killed;
        self.attacks_launched += other.attacks_launched;
        self.attacks_resolved += other.attacks_resolved;
        self.hits_landed += other.hits_landed;
        self.max_attack_ticks = self.max_attack_ticks.max(other.max_attack_ticks);
        self.commands_applied += other.commands_applied;
        self.playback_failures += other.playback_failures;
    }
}

/// Reasons a `Simulation` cannot be created.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to populate the world: {0}")]
    World(#[from] WorldError),
}

/// Create `entity_count` units in their initial spawning state.
pub fn populate(world: &mut World, entity_count: u32) -> Result<(), WorldError> {
    for n in 0..entity_count {
        world.create_from(&EntityTemplate::new()
            .with(Spawning)
            .with(SimTick { tick: 0 })
            .with(Unit::new(n, n)))?;
    }
    Ok(())
}

/// Build the tick pipeline. The order of the passes is fixed.
pub fn build_systems(config: &SimConfig) -> SystemGroup {
    SystemGroup::new()
        .with(lifecycle::SpawnSystem::new(*config))
        .with(lifecycle::RespawnSystem::new())
        .with(lifecycle::KillSystem::new(config))
        .with(render::RenderSystem::new())
        .with(render::SpriteSystem::new())
        .with(combat::DamageSystem::new())
        .with(combat::AttackSystem::new(config))
        .with(motion::MovementSystem::new())
        .with(motion::VelocitySystem::new(*config))
        .with(motion::TickSystem::new())
}

/// The observable state of a single unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitSnapshot {
    pub unit: Unit,
    pub position: Option<Position>,
    pub health: Option<Health>,
    pub sprite: Option<Sprite>,
}

/// A world of units together with the passes which drive it.
pub struct Simulation {
    config: SimConfig,
    world: World,
    systems: SystemGroup,
    ticks: i64,
}

impl Simulation {
    /// Validate `config` and bootstrap a world from it.
    pub fn new(config: SimConfig) -> Result<Simulation, SimError> {
        config.validate()?;

        let mut world = World::with_config(config.world);
        populate(&mut world, config.entity_count)?;
        let systems = build_systems(&config);

        log::info!(
            "simulating {} units in a {}x{} world ({:?}, passes: {})",
            config.entity_count, config.width, config.height, config.mode,
            systems.names().join(", "),
        );

        Ok(Simulation {
            config,
            world,
            systems,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// The number of ticks run so far.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Run every pass once.
    pub fn tick(&mut self, sink: &mut dyn FramebufferSink) -> Result<TickStats, WorldError> {
        let mut stats = self.systems.update(&mut self.world, self.config.mode, sink)?;
        stats.tick = self.ticks;
        self.ticks += 1;

        log::debug!(
            "tick {}: {} spawned, {} killed, {} respawned, {} attacks launched, {} landed, {} entities",
            stats.tick, stats.spawned, stats.killed, stats.respawned,
            stats.attacks_launched, stats.hits_landed, self.world.len(),
        );

        Ok(stats)
    }

    /// Run `ticks` ticks, returning the accumulated counters.
    pub fn run(&mut self, ticks: usize, sink: &mut dyn FramebufferSink) -> Result<TickStats, WorldError> {
        let mut total = TickStats::default();
        for _ in 0..ticks {
            let stats = self.tick(sink)?;
            total.accumulate(&stats);
        }
        Ok(total)
    }

    /// The state of every unit, ordered by unit id.
    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        let world = &self.world;
        let mut snapshot = Query::new().read::<Unit>()
            .entities(world)
            .into_iter()
            .filter_map(|entity| {
                let unit = *world.get::<Unit>(entity).ok()?;
                Some(UnitSnapshot {
                    unit,
                    position: world.get::<Position>(entity).ok().copied(),
                    health: world.get::<Health>(entity).ok().copied(),
                    sprite: world.get::<Sprite>(entity).ok().copied(),
                })
            })
            .collect::<Vec<_>>();

        snapshot.sort_by_key(|s| s.unit.id);
        snapshot
    }

    /// The number of units, whatever their state.
    pub fn unit_count(&self) -> usize {
        Query::new().read::<Unit>().count(&self.world)
    }
}
