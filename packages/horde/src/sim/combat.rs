//! Launching attacks and resolving them when they land.
//!
//! An attack lives on its own entity carrying a `PendingAttack`. It is created
//! by the attack pass with a travel time derived from the distance to its
//! target, counted down by the damage pass and destroyed when it lands.

use rayon::prelude::*;

use crate::component_data::EntityTemplate;
use crate::entity::Entity;
use crate::error::{Access, WorldError};
use crate::query::Query;
use crate::rng;
use crate::sim::components::{Damage, Dead, Health, PendingAttack, Position, SimTick, Spawning, Unit};
use crate::sim::config::SimConfig;
use crate::system::{Flush, System, SystemContext};
use crate::world::World;

/// An entity which may be attacked this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub id: u32,
    pub entity: Entity,
    pub position: Position,
}

/// An attack which has landed and must be applied to its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hit {
    pub target: Entity,
    pub damage: i32,
}

/// The number of ticks an attack takes to travel between two points.
pub fn attack_ticks(attack_speed: f32, from: &Position, to: &Position) -> i32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    ((dx * dx + dy * dy).sqrt() / attack_speed).ceil() as i32
}

/// Apply a hit to its target.
///
/// Returns `Ok(false)` if the attack fizzled because the target is gone, dead
/// or cannot take damage.
pub fn resolve_hit(world: &mut World, hit: &Hit) -> Result<bool, WorldError> {
    if !world.exists(hit.target) || world.has::<Dead>(hit.target) {
        return Ok(false);
    }

    let defence = match world.get::<Damage>(hit.target) {
        Ok(damage) => damage.defence,
        Err(err) if err.is_not_found() => return Ok(false),
        Err(err) => return Err(err),
    };

    match world.get_mut::<Health>(hit.target) {
        Ok(health) => {
            health.hp -= hit.damage - defence;
            Ok(true)
        }
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Counts attacks down and applies the ones which land.
pub struct DamageSystem {
    query: Query,
}

impl DamageSystem {
    pub fn new() -> DamageSystem {
        DamageSystem {
            query: Query::new().write::<PendingAttack>(),
        }
    }
}

impl Default for DamageSystem {
    fn default() -> Self {
        DamageSystem::new()
    }
}

impl System for DamageSystem {
    fn name(&self) -> &'static str {
        "damage"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let (commands, hits) = ctx.map_chunks(&mut self.query, |chunk, commands| {
            let entities = chunk.entities();
            let attacks = chunk.components_mut::<PendingAttack>()?;

            let mut hits = Vec::new();
            for (entity, attack) in entities.iter().zip(attacks.iter_mut()) {
                if attack.ticks_remaining > 0 {
                    attack.ticks_remaining -= 1;
                } else {
                    commands.record_destroy(*entity);
                    hits.push(Hit { target: attack.target, damage: attack.damage });
                }
            }
            Ok(hits)
        })?;

        // Targets may live in any chunk, so hits are applied here.
        let mut resolved = 0;
        let mut landed = 0;
        for hit in hits.iter().flatten() {
            resolved += 1;
            if resolve_hit(ctx.world_mut(), hit)? {
                landed += 1;
            } else {
                log::trace!("attack on {} fizzled", hit.target);
            }
        }

        let stats = ctx.stats_mut();
        stats.attacks_resolved += resolved;
        stats.hits_landed += landed;

        ctx.apply(commands, Flush::EndOfTick)
    }
}

/// Launches attacks from every unit whose cooldown has come round.
pub struct AttackSystem {
    attack_speed: f32,
    targets: Query,
    attackers: Query,
}

impl AttackSystem {
    pub fn new(config: &SimConfig) -> AttackSystem {
        AttackSystem {
            attack_speed: config.attack_speed,
            targets: Query::new()
                .read::<Unit>()
                .read::<Position>()
                .exclude::<Spawning>()
                .exclude::<Dead>(),
            attackers: Query::new()
                .write::<Unit>()
                .read::<Damage>()
                .read::<Position>()
                .read::<SimTick>()
                .exclude::<Spawning>()
                .exclude::<Dead>(),
        }
    }

    /// Every eligible target, stably sorted by unit id.
    fn collect_targets(&mut self, ctx: &SystemContext<'_>) -> Result<Vec<Target>, WorldError> {
        let missing = |component| WorldError::AccessDenied { component, access: Access::Read };

        let mut targets = Vec::new();
        for chunk in self.targets.iter_chunks(ctx.world()) {
            let units = chunk.components::<Unit>().ok_or_else(|| missing("Unit"))?;
            let positions = chunk.components::<Position>().ok_or_else(|| missing("Position"))?;
            let rows = chunk.entities().iter().zip(units).zip(positions);
            targets.extend(rows.map(|((entity, unit), position)| Target {
                id: unit.id,
                entity: *entity,
                position: *position,
            }));
        }

        if ctx.mode().is_parallel() {
            targets.par_sort_by_key(|t| t.id);
        } else {
            targets.sort_by_key(|t| t.id);
        }

        Ok(targets)
    }
}

impl System for AttackSystem {
    fn name(&self) -> &'static str {
        "attack"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let targets = self.collect_targets(ctx)?;
        if targets.is_empty() {
            return Ok(());
        }

        let attack_speed = self.attack_speed;
        let targets = &targets;
        let (commands, launched) = ctx.map_chunks(&mut self.attackers, |chunk, commands| {
            let damages = chunk.components::<Damage>()?;
            let positions = chunk.components::<Position>()?;
            let ticks = chunk.components::<SimTick>()?;
            let units = chunk.components_mut::<Unit>()?;

            let mut count = 0;
            let mut max_ticks = 0;
            let rows = units.iter_mut().zip(damages).zip(positions).zip(ticks);
            for (((unit, damage), position), tick) in rows {
                if damage.cooldown <= 0 || (tick.tick - unit.spawn_tick).rem_euclid(damage.cooldown as i64) != 0 {
                    continue;
                }

                let pick = rng::bounded(unit.seed, &mut unit.counter, targets.len() as u32) as usize;
                let target = &targets[pick];
                let ticks_remaining = attack_ticks(attack_speed, position, &target.position);

                commands.record_create(EntityTemplate::new().with(PendingAttack {
                    target: target.entity,
                    damage: damage.attack,
                    ticks_remaining,
                }));
                count += 1;
                max_ticks = max_ticks.max(ticks_remaining);
            }
            Ok((count, max_ticks))
        })?;

        let stats = ctx.stats_mut();
        for (count, max_ticks) in launched {
            stats.attacks_launched += count;
            stats.max_attack_ticks = stats.max_attack_ticks.max(max_ticks);
        }

        ctx.apply(commands, Flush::EndOfTick)
    }
}
