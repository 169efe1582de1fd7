//! Movement, steering and the per-entity clock.

use crate::error::WorldError;
use crate::query::Query;
use crate::rng;
use crate::sim::components::{Dead, Position, SimTick, Unit, Velocity};
use crate::sim::config::SimConfig;
use crate::system::{System, SystemContext};

/// Directions are drawn from a lattice with this many steps per unit of
/// `max_speed` on each axis.
pub const STEERING_STEPS: i32 = 16;

/// Draw a new direction from the unit's stream.
pub fn random_velocity(config: &SimConfig, unit: &mut Unit) -> Velocity {
    let mut axis = || {
        let step = rng::bounded(unit.seed, &mut unit.counter, 2 * STEERING_STEPS as u32 + 1) as i32 - STEERING_STEPS;
        step as f32 / STEERING_STEPS as f32 * config.max_speed
    };

    let dx = axis();
    let dy = axis();
    Velocity { dx, dy }
}

/// Flip any axis whose next step would leave the world.
pub fn keep_in_bounds(config: &SimConfig, position: &Position, velocity: &mut Velocity) {
    let next_x = position.x + velocity.dx;
    if next_x < 0.0 || next_x > config.width as f32 {
        velocity.dx = -velocity.dx;
    }

    let next_y = position.y + velocity.dy;
    if next_y < 0.0 || next_y > config.height as f32 {
        velocity.dy = -velocity.dy;
    }
}

/// Steps every living unit along its velocity.
pub struct MovementSystem {
    query: Query,
}

impl MovementSystem {
    pub fn new() -> MovementSystem {
        MovementSystem {
            query: Query::new()
                .write::<Position>()
                .read::<Velocity>()
                .exclude::<Dead>(),
        }
    }
}

impl Default for MovementSystem {
    fn default() -> Self {
        MovementSystem::new()
    }
}

impl System for MovementSystem {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        ctx.map_chunks(&mut self.query, |chunk, _| {
            let velocities = chunk.components::<Velocity>()?;
            let positions = chunk.components_mut::<Position>()?;
            for (position, velocity) in positions.iter_mut().zip(velocities) {
                position.x += velocity.dx;
                position.y += velocity.dy;
            }
            Ok(())
        })?;

        Ok(())
    }
}

/// Re-steers living units on a fixed interval and bounces them off the world
/// edges.
pub struct VelocitySystem {
    config: SimConfig,
    query: Query,
}

impl VelocitySystem {
    pub fn new(config: SimConfig) -> VelocitySystem {
        VelocitySystem {
            config,
            query: Query::new()
                .write::<Unit>()
                .write::<Velocity>()
                .read::<Position>()
                .read::<SimTick>()
                .exclude::<Dead>(),
        }
    }
}

impl System for VelocitySystem {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let config = &self.config;
        ctx.map_chunks(&mut self.query, |chunk, _| {
            let positions = chunk.components::<Position>()?;
            let ticks = chunk.components::<SimTick>()?;
            let units = chunk.components_mut::<Unit>()?;
            let velocities = chunk.components_mut::<Velocity>()?;

            let rows = units.iter_mut().zip(velocities.iter_mut()).zip(positions).zip(ticks);
            for (((unit, velocity), position), tick) in rows {
                if (tick.tick - unit.spawn_tick).rem_euclid(config.velocity_change_ticks) == 0 {
                    *velocity = random_velocity(config, unit);
                }
                keep_in_bounds(config, position, velocity);
            }
            Ok(())
        })?;

        Ok(())
    }
}

/// Advances every entity's clock.
pub struct TickSystem {
    query: Query,
}

impl TickSystem {
    pub fn new() -> TickSystem {
        TickSystem {
            query: Query::new().write::<SimTick>(),
        }
    }
}

impl Default for TickSystem {
    fn default() -> Self {
        TickSystem::new()
    }
}

impl System for TickSystem {
    fn name(&self) -> &'static str {
        "bookkeeping"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        ctx.map_chunks(&mut self.query, |chunk, _| {
            for tick in chunk.components_mut::<SimTick>()? {
                tick.tick += 1;
            }
            Ok(())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command_buffer::CommandBuffer;
    use crate::component_data::EntityTemplate;
    use crate::sim::render::NullSink;
    use crate::sim::TickStats;
    use crate::system::{ExecutionMode, SystemGroup};
    use crate::world::{World, WorldConfig};

    #[test]
    fn test_random_velocity_is_bounded_lattice() {
        let config = SimConfig::default().with_max_speed(2.0);
        let mut unit = Unit::new(3, 99);
        for _ in 0..500 {
            let v = random_velocity(&config, &mut unit);
            for d in [v.dx, v.dy].iter() {
                assert!(d.abs() <= 2.0);
                let steps = d / 2.0 * STEERING_STEPS as f32;
                assert_eq!(steps, steps.round());
            }
        }
        assert_eq!(unit.counter, 1000);
    }

    #[test]
    fn test_keep_in_bounds_flips_axes() {
        let config = SimConfig::default().with_bounds(10, 10);
        let mut v = Velocity { dx: 1.0, dy: -1.0 };
        keep_in_bounds(&config, &Position { x: 9.5, y: 0.5 }, &mut v);
        assert_eq!(v, Velocity { dx: -1.0, dy: 1.0 });

        let mut v = Velocity { dx: 1.0, dy: 1.0 };
        keep_in_bounds(&config, &Position { x: 9.0, y: 5.0 }, &mut v);
        assert_eq!(v, Velocity { dx: 1.0, dy: 1.0 });
    }

    #[test]
    fn test_units_stay_in_bounds() {
        let config = SimConfig::default().with_bounds(8, 5).with_max_speed(2.5).with_velocity_change_ticks(3);
        let mut world = World::with_config(WorldConfig::default().with_chunk_capacity(8));
        for i in 0..40u32 {
            world.create_from(&EntityTemplate::new()
                .with(Unit::new(i, i * 31))
                .with(SimTick::default())
                .with(Position { x: (i % 9) as f32, y: (i % 6) as f32 })
                .with(Velocity::default())).unwrap();
        }

        let mut group = SystemGroup::new()
            .with(MovementSystem::new())
            .with(VelocitySystem::new(config))
            .with(TickSystem::new());

        for _ in 0..200 {
            group.update(&mut world, ExecutionMode::Parallel, &mut NullSink).unwrap();
            let mut query = Query::new().read::<Position>();
            for chunk in query.iter_chunks(&world) {
                for p in chunk.components::<Position>().unwrap() {
                    assert!(p.x >= 0.0 && p.x <= 8.0, "x out of bounds: {:?}", p);
                    assert!(p.y >= 0.0 && p.y <= 5.0, "y out of bounds: {:?}", p);
                }
            }
        }
    }

    #[test]
    fn test_steering_interval_and_clock() {
        let config = SimConfig::default().with_velocity_change_ticks(4);
        let mut world = World::new();
        let mut unit = Unit::new(1, 1);
        unit.spawn_tick = 2;
        let entity = world.create_from(&EntityTemplate::new()
            .with(unit)
            .with(SimTick { tick: 3 })
            .with(Position { x: 50.0, y: 50.0 })
            .with(Velocity::default())).unwrap();

        let mut end_of_tick = CommandBuffer::new();
        let mut stats = TickStats::default();
        let mut sink = NullSink;
        let mut velocity = VelocitySystem::new(config);
        let mut clock = TickSystem::new();

        let mut ctx = SystemContext::new(&mut world, ExecutionMode::Sequential, &mut end_of_tick, &mut sink, &mut stats);
        velocity.update(&mut ctx).unwrap();
        clock.update(&mut ctx).unwrap();
        assert_eq!(ctx.world().get::<Unit>(entity).unwrap().counter, 0);
        assert_eq!(ctx.world().get::<SimTick>(entity).unwrap().tick, 4);

        // Unchanged until tick 6, four ticks after spawning.
        for _ in 0..2 {
            velocity.update(&mut ctx).unwrap();
            clock.update(&mut ctx).unwrap();
        }
        assert_eq!(ctx.world().get::<Unit>(entity).unwrap().counter, 0);

        velocity.update(&mut ctx).unwrap();
        assert_eq!(ctx.world().get::<Unit>(entity).unwrap().counter, 2);
    }
}
