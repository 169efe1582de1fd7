//! The framebuffer boundary and the passes which feed it.

use crate::error::{Access, WorldError};
use crate::query::{ChunkGuard, Query};
use crate::sim::components::{Dead, Glyph, IsHero, IsMonster, IsNpc, Position, SimTick, Spawning, Sprite, Unit};
use crate::system::{System, SystemContext};

/// Something which can draw units.
pub trait FramebufferSink {
    fn draw(&mut self, position: (f32, f32), glyph: Glyph, unit_id: u32, tick: i64);
}

/// A sink which discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FramebufferSink for NullSink {
    fn draw(&mut self, _position: (f32, f32), _glyph: Glyph, _unit_id: u32, _tick: i64) {}
}

/// A single recorded draw call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    pub position: (f32, f32),
    pub glyph: Glyph,
    pub unit_id: u32,
    pub tick: i64,
}

impl FramebufferSink for Vec<DrawCommand> {
    fn draw(&mut self, position: (f32, f32), glyph: Glyph, unit_id: u32, tick: i64) {
        self.push(DrawCommand { position, glyph, unit_id, tick });
    }
}

/// Draws every placed unit. Always runs on the calling thread, since the sink
/// is not shared.
pub struct RenderSystem {
    query: Query,
}

impl RenderSystem {
    pub fn new() -> RenderSystem {
        RenderSystem {
            query: Query::new()
                .read::<Position>()
                .read::<Sprite>()
                .read::<Unit>()
                .read::<SimTick>(),
        }
    }
}

impl Default for RenderSystem {
    fn default() -> Self {
        RenderSystem::new()
    }
}

impl System for RenderSystem {
    fn name(&self) -> &'static str {
        "render"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        let (world, sink) = ctx.world_and_sink();
        let missing = |component| WorldError::AccessDenied { component, access: Access::Read };

        for chunk in self.query.iter_chunks(world) {
            let positions = chunk.components::<Position>().ok_or_else(|| missing("Position"))?;
            let sprites = chunk.components::<Sprite>().ok_or_else(|| missing("Sprite"))?;
            let units = chunk.components::<Unit>().ok_or_else(|| missing("Unit"))?;
            let ticks = chunk.components::<SimTick>().ok_or_else(|| missing("SimTick"))?;

            for (((position, sprite), unit), tick) in positions.iter().zip(sprites).zip(units).zip(ticks) {
                sink.draw((position.x, position.y), sprite.glyph, unit.id, tick.tick);
            }
        }

        Ok(())
    }
}

/// Pick the glyph for every entity in a chunk from its tags.
fn chunk_glyph(chunk: &ChunkGuard<'_>) -> Option<Glyph> {
    if chunk.has::<Spawning>() {
        Some(Glyph::Spawn)
    } else if chunk.has::<Dead>() {
        Some(Glyph::Grave)
    } else if chunk.has::<IsNpc>() {
        Some(Glyph::Npc)
    } else if chunk.has::<IsHero>() {
        Some(Glyph::Hero)
    } else if chunk.has::<IsMonster>() {
        Some(Glyph::Monster)
    } else {
        None
    }
}

/// Keeps each unit's sprite in line with its lifecycle state and class.
pub struct SpriteSystem {
    query: Query,
}

impl SpriteSystem {
    pub fn new() -> SpriteSystem {
        SpriteSystem {
            query: Query::new().write::<Sprite>(),
        }
    }
}

impl Default for SpriteSystem {
    fn default() -> Self {
        SpriteSystem::new()
    }
}

impl System for SpriteSystem {
    fn name(&self) -> &'static str {
        "sprite"
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), WorldError> {
        ctx.map_chunks(&mut self.query, |chunk, _| {
            if let Some(glyph) = chunk_glyph(chunk) {
                for sprite in chunk.components_mut::<Sprite>()? {
                    sprite.glyph = glyph;
                }
            }
            Ok(())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component_data::EntityTemplate;
    use crate::command_buffer::CommandBuffer;
    use crate::sim::TickStats;
    use crate::system::ExecutionMode;
    use crate::world::World;

    fn unit(id: u32, x: f32) -> EntityTemplate {
        EntityTemplate::new()
            .with(Unit::new(id, id))
            .with(SimTick { tick: 7 })
            .with(Position { x, y: 1.0 })
            .with(Sprite::default())
    }

    #[test]
    fn test_sprites_follow_tags() {
        let mut world = World::new();
        let npc = world.create_from(&unit(0, 0.0).with(IsNpc)).unwrap();
        let hero = world.create_from(&unit(1, 0.0).with(IsHero)).unwrap();
        let monster = world.create_from(&unit(2, 0.0).with(IsMonster)).unwrap();
        let grave = world.create_from(&unit(3, 0.0).with(IsHero).with(Dead)).unwrap();
        let plain = world.create_from(&unit(4, 0.0)).unwrap();

        let mut end_of_tick = CommandBuffer::new();
        let mut stats = TickStats::default();
        let mut sink = NullSink;
        let mut ctx = SystemContext::new(&mut world, ExecutionMode::Parallel, &mut end_of_tick, &mut sink, &mut stats);
        SpriteSystem::new().update(&mut ctx).unwrap();

        assert_eq!(world.get::<Sprite>(npc).unwrap().glyph, Glyph::Npc);
        assert_eq!(world.get::<Sprite>(hero).unwrap().glyph, Glyph::Hero);
        assert_eq!(world.get::<Sprite>(monster).unwrap().glyph, Glyph::Monster);
        assert_eq!(world.get::<Sprite>(grave).unwrap().glyph, Glyph::Grave);
        assert_eq!(world.get::<Sprite>(plain).unwrap().glyph, Glyph::Spawn);
    }

    #[test]
    fn test_render_draws_placed_units() {
        let mut world = World::new();
        world.create_from(&unit(5, 2.0).with(IsNpc)).unwrap();
        world.create_from(&unit(6, 3.0)).unwrap();
        world.create_from(&EntityTemplate::new().with(Unit::new(9, 9)).with(Spawning)).unwrap();

        let mut end_of_tick = CommandBuffer::new();
        let mut stats = TickStats::default();
        let mut sink: Vec<DrawCommand> = Vec::new();
        let mut ctx = SystemContext::new(&mut world, ExecutionMode::Sequential, &mut end_of_tick, &mut sink, &mut stats);
        RenderSystem::new().update(&mut ctx).unwrap();

        sink.sort_by_key(|d| d.unit_id);
        assert_eq!(sink, vec![
            DrawCommand { position: (2.0, 1.0), glyph: Glyph::Spawn, unit_id: 5, tick: 7 },
            DrawCommand { position: (3.0, 1.0), glyph: Glyph::Spawn, unit_id: 6, tick: 7 },
        ]);
    }
}
