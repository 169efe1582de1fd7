//! The components making up a simulated unit.

use crate::component;
use crate::entity::Entity;

/// Identity and lifecycle bookkeeping of a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unit {
    pub id: u32,
    pub seed: u32,
    /// The next draw of this unit's random stream.
    pub counter: u32,
    pub spawn_tick: i64,
    pub respawn_tick: i64,
}

impl Unit {
    /// A fresh unit in its initial, unspawned state.
    pub fn new(id: u32, seed: u32) -> Unit {
        Unit {
            id,
            seed,
            ..Unit::default()
        }
    }
}

/// The simulation tick as seen by an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimTick {
    pub tick: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Health {
    pub hp: i32,
}

/// Combat statistics. A `cooldown` of zero means the unit never attacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Damage {
    pub attack: i32,
    pub defence: i32,
    pub cooldown: i32,
}

/// What a unit looks like on the framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Glyph {
    Spawn,
    Grave,
    Npc,
    Hero,
    Monster,
}

impl Default for Glyph {
    fn default() -> Self {
        Glyph::Spawn
    }
}

impl Glyph {
    /// The character drawn for this glyph.
    pub fn as_char(&self) -> char {
        match self {
            Glyph::Spawn => '.',
            Glyph::Grave => '+',
            Glyph::Npc => 'n',
            Glyph::Hero => 'H',
            Glyph::Monster => 'M',
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sprite {
    pub glyph: Glyph,
}

/// An attack in flight. Lives on its own entity until it lands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingAttack {
    pub target: Entity,
    pub damage: i32,
    pub ticks_remaining: i32,
}

/// The unit is waiting to be assigned a class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Spawning;

/// The unit has been killed and is waiting to respawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dead;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IsNpc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IsHero;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IsMonster;

component!(
    Unit, SimTick, Position, Velocity, Health, Damage, Sprite, PendingAttack,
    Spawning, Dead, IsNpc, IsHero, IsMonster,
);
