//! Simulation parameters.

use thiserror::Error;

use crate::system::ExecutionMode;
use crate::world::WorldConfig;

/// Reasons a `SimConfig` is rejected.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("world bounds must be positive, got {width}x{height}")]
    EmptyBounds { width: u32, height: u32 },

    #[error("attack speed must be positive, got {0}")]
    AttackSpeed(f32),

    #[error("max speed {max_speed} must be positive and at most half the smallest world dimension")]
    MaxSpeed { max_speed: f32 },

    #[error("velocity change interval must be positive, got {0}")]
    VelocityChangeTicks(i64),

    #[error("respawn delay must not be negative, got {0}")]
    RespawnDelay(i64),

    #[error("{entity_count} units need more than {max_entities} entity slots")]
    Capacity { entity_count: u32, max_entities: u32 },
}

/// Everything that parameterises a simulation run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// The number of units bootstrapped into the world.
    pub entity_count: u32,
    pub width: u32,
    pub height: u32,
    /// Ticks between a unit dying and respawning.
    pub respawn_delay: i64,
    /// Distance an attack travels per tick.
    pub attack_speed: f32,
    /// Largest per-axis velocity component.
    pub max_speed: f32,
    /// Ticks between steering changes.
    pub velocity_change_ticks: i64,
    pub mode: ExecutionMode,
    pub world: WorldConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            entity_count: 1000,
            width: 100,
            height: 100,
            respawn_delay: 30,
            attack_speed: 2.0,
            max_speed: 1.0,
            velocity_change_ticks: 10,
            mode: ExecutionMode::Sequential,
            world: WorldConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_entity_count(mut self, entity_count: u32) -> SimConfig {
        self.entity_count = entity_count;
        self
    }

    pub fn with_bounds(mut self, width: u32, height: u32) -> SimConfig {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_respawn_delay(mut self, respawn_delay: i64) -> SimConfig {
        self.respawn_delay = respawn_delay;
        self
    }

    pub fn with_attack_speed(mut self, attack_speed: f32) -> SimConfig {
        self.attack_speed = attack_speed;
        self
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> SimConfig {
        self.max_speed = max_speed;
        self
    }

    pub fn with_velocity_change_ticks(mut self, ticks: i64) -> SimConfig {
        self.velocity_change_ticks = ticks;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> SimConfig {
        self.mode = mode;
        self
    }

    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> SimConfig {
        self.world = self.world.with_chunk_capacity(chunk_capacity);
        self
    }

    pub fn with_max_entities(mut self, max_entities: u32) -> SimConfig {
        self.world = self.world.with_max_entities(max_entities);
        self
    }

    /// The longest an attack can take to land: the world diagonal at
    /// `attack_speed` per tick.
    pub fn max_attack_ticks(&self) -> i32 {
        let w = self.width as f32;
        let h = self.height as f32;
        ((w * w + h * h).sqrt() / self.attack_speed).ceil() as i32
    }

    /// Check the parameters keep the simulation well-formed.
    ///
    /// Steering relies on a single step never crossing more than half the
    /// world, which keeps reflected positions in bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyBounds { width: self.width, height: self.height });
        }

        if !(self.attack_speed > 0.0) {
            return Err(ConfigError::AttackSpeed(self.attack_speed));
        }

        let half = self.width.min(self.height) as f32 / 2.0;
        if !(self.max_speed > 0.0 && self.max_speed <= half) {
            return Err(ConfigError::MaxSpeed { max_speed: self.max_speed });
        }

        if self.velocity_change_ticks <= 0 {
            return Err(ConfigError::VelocityChangeTicks(self.velocity_change_ticks));
        }

        if self.respawn_delay < 0 {
            return Err(ConfigError::RespawnDelay(self.respawn_delay));
        }

        // Respawning briefly needs a second slot per unit, and every unit may
        // have attacks in flight.
        if self.entity_count > self.world.max_entities / 2 {
            return Err(ConfigError::Capacity {
                entity_count: self.entity_count,
                max_entities: self.world.max_entities,
            });
        }

        Ok(())
    }
}
