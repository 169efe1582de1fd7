//! Spawning, killing and respawning units.

use crate::component_data::EntityTemplate;
use crate::error::WorldError;
use crate::query::Query;
use crate::rng;
use crate::sim::components::{Damage, Dead, Glyph, Health, IsHero, IsMonster, IsNpc, Position, SimTick, Spawning, Sprite, Unit};
use crate::sim::config::SimConfig;
use crate::sim::motion::{keep_in_bounds, random_velocity};
use crate::system::{Flush, System, SystemContext};

/// The class a unit is assigned when it spawns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitClass {
    Npc,
    Hero,
    Monster,
}

impl UnitClass {
    /// Map a roll in `0..100` to a class: half NPCs, a fifth heroes and the
    /// rest monsters.
    pub fn from_roll(roll: u32) -> UnitClass {
        match roll {
            0..=49 => UnitClass::Npc,
            50..=69 => UnitClass::Hero,
            _ => UnitClass::Monster,
        }
    }

    pub fn glyph(&self) -> Glyph {
        match self {
            UnitClass::Npc => Glyph::Npc,
            UnitClass::Hero => Glyph::Hero,
            UnitClass::Monster => Glyph::Monster,
        }
    }

    /// Roll health and combat statistics for a fresh unit of this class.
    fn roll_stats(&self, unit: &mut Unit) -> (Health, Damage) {
        let mut range = |lo, hi| rng::range(unit.seed, &mut unit.counter, lo, hi);
        match self {
            UnitClass::Npc => {
                let hp = range(100, 150);
                let defence = range(5, 10);
                (Health { hp }, Damage { attack: 0, defence, cooldown: 0 })
            }
            UnitClass::Hero => {
                let hp = range(150, 200);
                let attack = range(30, 50);
                let defence = range(10, 20);
                let cooldown = range(5, 10);
                (Health { hp }, Damage { attack, defence, cooldown })
            }
            UnitClass::Monster => {
                let hp = range(200, 300);
                let attack = range(20, 40);
                let defence = range(5, 15);
                let cooldown = range(8, 16);
                (Health { hp }, Damage { attack, defence, cooldown })
            }
        }
    }

    fn add_tag(&self, template: &mut EntityTemplate) {
        match self {
            UnitClass::Npc => template.set(IsNpc),
            UnitClass::Hero => template.set(IsHero),
            UnitClass::Monster => template.set(IsMonster),
        }
    }
}

/// Turn a spawning unit into a full unit of a randomly chosen class.
///
/// Advances the unit's random stream, sets `spawn_tick` and returns the
/// components to insert.
pub fn spawn_unit(config: &SimConfig, tick: i64, unit: &mut Unit) -> (UnitClass, EntityTemplate) {
    let class = UnitClass::from_roll(rng::bounded(unit.seed, &mut unit.counter, 100));
    let (health, damage) = class.roll_stats(unit);

    let position = Position {
        x: rng::bounded(unit.seed, &mut unit.counter, config.width) as f32,
        y: rng::bounded(unit.seed, &mut unit.counter, config.height) as f32,
    };
    let mut velocity = random_velocity(config, unit);
    keep_in_bounds(config, &position, &mut velocity);

    unit.spawn_tick = tick;

    let mut template = EntityTemplate::new()
        .with(health)
        .with(damage)
        .with(Sprite { glyph: class.glyph() })
        .with(position)
        .with(velocity);
    class.add_tag(&mut template);

    (class, template)
}

/// The components of the unit which replaces a dead one.
pub fn respawned_unit(unit: &Unit, tick: i64) -> EntityTemplate {
    let id = unit.id | ((tick as u32) << 16);
    let seed = rng::stable_hash32(unit.seed, unit.counter);

    EntityTemplate::new()
        .with(Spawning)
        .with(SimTick { tick })
        .with(Unit::new(id, seed))
}

/// Assigns a class to every spawning unit.
pub struct SpawnSystem {
    config: SimConfig,
    query: Query,
}

impl SpawnSystem {
    pub fn new(config: SimConfig) -> SpawnSystem {
        SpawnSystem {
            config,
            query: Query::new()
                .write::<Unit>()
                .read::<SimTick>()
                .read::<Spawning>(),
        }
    }
}

impl System for SpawnSystem {
    fn name(&self) -> &'static str {
        "spawn"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let config = &self.config;
        let (commands, spawned) = ctx.map_chunks(&mut self.query, |chunk, commands| {
            let entities = chunk.entities();
            let ticks = chunk.components::<SimTick>()?;
            let units = chunk.components_mut::<Unit>()?;

            for ((entity, unit), tick) in entities.iter().zip(units.iter_mut()).zip(ticks) {
                let (_, template) = spawn_unit(config, tick.tick, unit);
                commands.record_remove::<Spawning>(*entity);
                commands.record_insert(*entity, template);
            }
            Ok(entities.len())
        })?;

        ctx.stats_mut().spawned += spawned.iter().sum::<usize>();
        ctx.apply(commands, Flush::Immediate)
    }
}

/// Replaces dead units whose respawn tick has come with fresh spawning ones.
pub struct RespawnSystem {
    query: Query,
}

impl RespawnSystem {
    pub fn new() -> RespawnSystem {
        RespawnSystem {
            query: Query::new()
                .read::<Unit>()
                .read::<SimTick>()
                .read::<Dead>(),
        }
    }
}

impl Default for RespawnSystem {
    fn default() -> Self {
        RespawnSystem::new()
    }
}

impl System for RespawnSystem {
    fn name(&self) -> &'static str {
        "respawn"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let (commands, respawned) = ctx.map_chunks(&mut self.query, |chunk, commands| {
            let entities = chunk.entities();
            let units = chunk.components::<Unit>()?;
            let ticks = chunk.components::<SimTick>()?;

            let mut count = 0;
            for ((entity, unit), tick) in entities.iter().zip(units).zip(ticks) {
                if tick.tick >= unit.respawn_tick {
                    // Create first so the replacement never reuses this index.
                    commands.record_create(respawned_unit(unit, tick.tick));
                    commands.record_destroy(*entity);
                    count += 1;
                }
            }
            Ok(count)
        })?;

        ctx.stats_mut().respawned += respawned.iter().sum::<usize>();
        ctx.apply(commands, Flush::Immediate)
    }
}

/// Marks units which have run out of health as dead.
pub struct KillSystem {
    respawn_delay: i64,
    query: Query,
}

impl KillSystem {
    pub fn new(config: &SimConfig) -> KillSystem {
        KillSystem {
            respawn_delay: config.respawn_delay,
            query: Query::new()
                .write::<Unit>()
                .read::<Health>()
                .read::<SimTick>()
                .exclude::<Dead>(),
        }
    }
}

impl System for KillSystem {
    fn name(&self) -> &'static str {
        "kill"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let respawn_delay = self.respawn_delay;
        let (commands, killed) = ctx.map_chunks(&mut self.query, |chunk, commands| {
            let entities = chunk.entities();
            let healths = chunk.components::<Health>()?;
            let ticks = chunk.components::<SimTick>()?;
            let units = chunk.components_mut::<Unit>()?;

            let mut count = 0;
            let rows = entities.iter().zip(units.iter_mut()).zip(healths).zip(ticks);
            for (((entity, unit), health), tick) in rows {
                if health.hp <= 0 {
                    unit.respawn_tick = tick.tick + respawn_delay;
                    commands.record_add(*entity, Dead);
                    count += 1;
                }
            }
            Ok(count)
        })?;

        ctx.stats_mut().killed += killed.iter().sum::<usize>();
        ctx.apply(commands, Flush::Immediate)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command_buffer::CommandBuffer;
    use crate::entity::Entity;
    use crate::sim::render::NullSink;
    use crate::sim::{populate, TickStats};
    use crate::system::ExecutionMode;
    use crate::world::World;

    fn run(world: &mut World, system: &mut dyn System) -> TickStats {
        let mut end_of_tick = CommandBuffer::new();
        let mut stats = TickStats::default();
        let mut sink = NullSink;
        let mut ctx = SystemContext::new(world, ExecutionMode::Parallel, &mut end_of_tick, &mut sink, &mut stats);
        system.update(&mut ctx).unwrap();
        ctx.flush_end_of_tick().unwrap();
        stats
    }

    #[test]
    fn test_class_rolls() {
        assert_eq!(UnitClass::from_roll(0), UnitClass::Npc);
        assert_eq!(UnitClass::from_roll(49), UnitClass::Npc);
        assert_eq!(UnitClass::from_roll(50), UnitClass::Hero);
        assert_eq!(UnitClass::from_roll(69), UnitClass::Hero);
        assert_eq!(UnitClass::from_roll(70), UnitClass::Monster);
        assert_eq!(UnitClass::from_roll(99), UnitClass::Monster);
    }

    #[test]
    fn test_spawn_unit_rolls_in_range() {
        let config = SimConfig::default().with_bounds(20, 10);
        for seed in 0..200 {
            let mut unit = Unit::new(seed, seed);
            let (class, template) = spawn_unit(&config, 12, &mut unit);
            assert_eq!(unit.spawn_tick, 12);

            let health = template.get::<Health>().unwrap();
            let damage = template.get::<Damage>().unwrap();
            let position = template.get::<Position>().unwrap();
            assert!(position.x >= 0.0 && position.x < 20.0);
            assert!(position.y >= 0.0 && position.y < 10.0);
            assert_eq!(template.get::<Sprite>().unwrap().glyph, class.glyph());

            match class {
                UnitClass::Npc => {
                    assert!((100..150).contains(&health.hp));
                    assert_eq!(damage.cooldown, 0);
                    assert!(template.get::<IsNpc>().is_some());
                }
                UnitClass::Hero => {
                    assert!((150..200).contains(&health.hp));
                    assert!((30..50).contains(&damage.attack));
                    assert!((5..10).contains(&damage.cooldown));
                    assert!(template.get::<IsHero>().is_some());
                }
                UnitClass::Monster => {
                    assert!((200..300).contains(&health.hp));
                    assert!((20..40).contains(&damage.attack));
                    assert!((8..16).contains(&damage.cooldown));
                    assert!(template.get::<IsMonster>().is_some());
                }
            }
        }
    }

    #[test]
    fn test_spawned_archetypes_are_complete() {
        let config = SimConfig::default();
        let mut world = World::new();
        populate(&mut world, 50).unwrap();

        let stats = run(&mut world, &mut SpawnSystem::new(config));
        assert_eq!(stats.spawned, 50);
        assert_eq!(Query::new().read::<Spawning>().count(&world), 0);

        let mut units = Query::new().read::<Unit>();
        for entity in units.entities(&world) {
            assert!(world.has::<Health>(entity));
            assert!(world.has::<Damage>(entity));
            assert!(world.has::<Sprite>(entity));
            assert!(world.has::<Position>(entity));
            assert!(world.has::<crate::sim::components::Velocity>(entity));
            let classes = [world.has::<IsNpc>(entity), world.has::<IsHero>(entity), world.has::<IsMonster>(entity)];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1);
        }
    }

    #[test]
    fn test_kill_marks_dead() {
        let config = SimConfig::default().with_respawn_delay(5);
        let mut world = World::new();
        let alive = world.create_from(&EntityTemplate::new()
            .with(Unit::new(0, 0))
            .with(SimTick { tick: 3 })
            .with(Health { hp: 1 })).unwrap();
        let dying = world.create_from(&EntityTemplate::new()
            .with(Unit::new(1, 1))
            .with(SimTick { tick: 3 })
            .with(Health { hp: -4 })).unwrap();

        let stats = run(&mut world, &mut KillSystem::new(&config));
        assert_eq!(stats.killed, 1);
        assert!(!world.has::<Dead>(alive));
        assert!(world.has::<Dead>(dying));
        assert_eq!(world.get::<Unit>(dying).unwrap().respawn_tick, 8);

        // Already dead units are left alone.
        let stats = run(&mut world, &mut KillSystem::new(&config));
        assert_eq!(stats.killed, 0);
    }

    #[test]
    fn test_respawn() {
        let mut world = World::new();
        let mut unit = Unit::new(7, 1234);
        unit.counter = 9;
        unit.respawn_tick = 5;
        let dead = world.create_from(&EntityTemplate::new()
            .with(unit)
            .with(SimTick { tick: 4 })
            .with(Health { hp: -1 })
            .with(Dead)).unwrap();

        let mut respawn = RespawnSystem::new();
        assert_eq!(run(&mut world, &mut respawn).respawned, 0);
        assert!(world.exists(dead));

        world.get_mut::<SimTick>(dead).unwrap().tick = 5;
        assert_eq!(run(&mut world, &mut respawn).respawned, 1);
        assert!(!world.exists(dead));
        assert!(matches!(world.get::<Unit>(dead), Err(WorldError::NotFound(_))));

        let fresh = Query::new().read::<Spawning>().entities(&world);
        assert_eq!(fresh.len(), 1);
        let fresh: Entity = fresh[0];
        assert_ne!(fresh.index(), dead.index());

        let replacement = world.get::<Unit>(fresh).unwrap();
        assert_eq!(replacement.id, 7 | (5 << 16));
        assert_eq!(replacement.seed, rng::stable_hash32(1234, 9));
        assert_eq!(replacement.counter, 0);
        assert_eq!(world.get::<SimTick>(fresh).unwrap().tick, 5);
        assert!(!world.has::<Health>(fresh));
    }
}
