//! Configuration system.
//!
//! Loads server and gameplay configuration from JSON. Every section falls
//! back to defaults, so a config file only needs the fields it overrides.

use std::{path::Path, time::Duration};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Simulation steps allowed before one outbound flush when catching up.
    pub max_catch_up_ticks: u32,
    /// Backlog beyond this many steps is dropped (with a warning).
    pub max_backlog_ticks: u32,
    /// Seed for the simulation RNG.
    pub seed: u64,
    /// Accept debug RPCs (points, self-kill, mass spawn).
    pub debug_commands: bool,
    /// Capacity of the network -> simulation queue.
    pub input_channel_capacity: usize,
    pub gameplay: GameplayConfig,
    pub importance: ImportanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 20,
            max_catch_up_ticks: 5,
            max_backlog_ticks: 40,
            seed: 0x5eed,
            debug_commands: true,
            input_channel_capacity: 1024,
            gameplay: GameplayConfig::default(),
            importance: ImportanceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads, parses, and validates a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the simulation cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_hz > 0, "tick_hz must be positive");
        ensure!(self.max_catch_up_ticks > 0, "max_catch_up_ticks must be positive");
        ensure!(
            self.max_backlog_ticks >= self.max_catch_up_ticks,
            "max_backlog_ticks must be at least max_catch_up_ticks"
        );
        ensure!(
            self.importance.half_rate_radius > self.importance.full_rate_radius,
            "importance.half_rate_radius must exceed full_rate_radius"
        );
        ensure!(
            !self.gameplay.spawn_points.is_empty(),
            "gameplay.spawn_points must not be empty"
        );
        ensure!(
            self.gameplay.spawn_interval_secs > 0.0,
            "gameplay.spawn_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    /// Fixed simulation step in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }
}

/// Gameplay tunables shared by all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplayConfig {
    pub spawn_interval_secs: f32,
    /// Distance from the chosen player at which enemies appear.
    pub spawn_radius: f32,
    pub max_enemies: u32,
    /// Largest count a single mass-spawn request may ask for.
    pub mass_spawn_limit: u32,
    /// The arena is the square `[-h, h] x [-h, h]`.
    pub arena_half_extent: f32,
    pub spawn_points: Vec<Vec2>,
    /// Freeze gameplay stages while any player is choosing a buff.
    pub pause_during_selection: bool,
    pub player: PlayerTuning,
    pub enemy: EnemyTuning,
    pub projectile: ProjectileTuning,
    pub pickup: PickupTuning,
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            spawn_interval_secs: 1.0,
            spawn_radius: 30.0,
            max_enemies: 150,
            mass_spawn_limit: 100,
            arena_half_extent: 150.0,
            spawn_points: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(8.0, 0.0),
                Vec2::new(-8.0, 0.0),
                Vec2::new(0.0, 8.0),
            ],
            pause_during_selection: true,
            player: PlayerTuning::default(),
            enemy: EnemyTuning::default(),
            projectile: ProjectileTuning::default(),
            pickup: PickupTuning::default(),
        }
    }
}

/// Base player stats before buffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerTuning {
    pub max_health: f32,
    pub move_speed: f32,
    pub radius: f32,
    pub fire_interval_secs: f32,
    pub damage: f32,
    pub magnet_radius: f32,
}

impl Default for PlayerTuning {
    fn default() -> Self {
        Self {
            max_health: 100.0,
            move_speed: 6.0,
            radius: 0.5,
            fire_interval_secs: 0.4,
            damage: 10.0,
            magnet_radius: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyTuning {
    pub max_health: f32,
    pub speed: f32,
    pub radius: f32,
    pub contact_damage: f32,
    pub contact_interval_secs: f32,
    /// Point value of the pickup an enemy drops.
    pub pickup_value: u32,
}

impl Default for EnemyTuning {
    fn default() -> Self {
        Self {
            max_health: 30.0,
            speed: 2.5,
            radius: 0.5,
            contact_damage: 10.0,
            contact_interval_secs: 1.0,
            pickup_value: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileTuning {
    pub speed: f32,
    pub lifetime_secs: f32,
    pub radius: f32,
}

impl Default for ProjectileTuning {
    fn default() -> Self {
        Self {
            speed: 15.0,
            lifetime_secs: 2.0,
            radius: 0.25,
        }
    }
}

/// Pickup physics and collection. `collect_radius`, the player's magnet
/// radius, and the settle gate are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupTuning {
    pub collect_radius: f32,
    /// Pull speed right next to the player.
    pub magnet_min_speed: f32,
    /// Pull speed at the edge of the magnet radius.
    pub magnet_max_speed: f32,
    pub gravity: f32,
    /// Fraction of vertical speed kept on each bounce.
    pub bounce_restitution: f32,
    /// Horizontal deceleration while on the ground, units/s^2.
    pub friction: f32,
    pub max_bounces: u8,
    /// Ground speed below which a pickup counts as settled.
    pub settle_speed: f32,
    /// Max random offset from the drop position.
    pub spawn_offset: f32,
    /// Max initial horizontal burst speed.
    pub spawn_speed: f32,
    /// Initial upward speed.
    pub spawn_lift: f32,
}

impl Default for PickupTuning {
    fn default() -> Self {
        Self {
            collect_radius: 0.75,
            magnet_min_speed: 2.0,
            magnet_max_speed: 12.0,
            gravity: 20.0,
            bounce_restitution: 0.4,
            friction: 6.0,
            max_bounces: 2,
            settle_speed: 0.5,
            spawn_offset: 0.6,
            spawn_speed: 3.0,
            spawn_lift: 4.0,
        }
    }
}

/// Distance bands for replication importance. Both bounds are exclusive on
/// the faster tier: a distance equal to `full_rate_radius` is half rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceConfig {
    pub full_rate_radius: f32,
    pub half_rate_radius: f32,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            full_rate_radius: 50.0,
            half_rate_radius: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(
            r#"{ "tick_hz": 30, "gameplay": { "max_enemies": 12, "enemy": { "speed": 4.0 } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.gameplay.max_enemies, 12);
        assert_eq!(cfg.gameplay.enemy.speed, 4.0);
        assert_eq!(cfg.gameplay.enemy.max_health, 30.0);
        assert_eq!(cfg.importance.full_rate_radius, 50.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn default_runs_at_twenty_hertz() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tick_hz, 20);
        assert_eq!(cfg.tick_interval(), Duration::from_millis(50));
        assert!((cfg.dt() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn validate_rejects_inverted_importance_bands() {
        let mut cfg = EngineConfig::default();
        cfg.importance.half_rate_radius = 10.0;
        assert!(cfg.validate().is_err());
        cfg = EngineConfig::default();
        cfg.tick_hz = 0;
        assert!(cfg.validate().is_err());
    }
}
