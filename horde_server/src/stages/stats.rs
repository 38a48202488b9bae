//! Stage 2: stat recalculation.
//!
//! Buff levels map to modifiers through fixed tables
//! ([`StatModifiers::from_levels`]); this stage applies them to the base
//! tuning. Growing max health grows current health by the same amount.
//! Regeneration ticks here too, clamped to max, and stops while gameplay is
//! paused.

use horde_shared::{
    buffs::{BuffLevels, StatModifiers},
    components::{Health, Player, PlayerStats},
    config::GameplayConfig,
    ecs::World,
};

use crate::sim::SimContext;

/// Pure `levels -> stats` derivation.
pub fn derive_stats(levels: &BuffLevels, gameplay: &GameplayConfig) -> PlayerStats {
    let m = StatModifiers::from_levels(levels);
    let base = &gameplay.player;
    PlayerStats {
        modifiers: m,
        max_health: base.max_health + m.max_health_bonus,
        move_speed: base.move_speed * m.move_speed_mult,
        fire_interval: base.fire_interval_secs / m.fire_rate_mult.max(f32::EPSILON),
        damage: base.damage * m.damage_mult,
        projectile_speed: gameplay.projectile.speed * m.projectile_speed_mult,
        magnet_radius: base.magnet_radius * m.magnet_radius_mult,
        regen_per_sec: m.regen_per_sec,
        homing_turn_rate: m.homing_turn_rate,
    }
}

pub fn run(world: &mut World, ctx: &mut SimContext) {
    let regen = !ctx.gameplay_paused();
    let ids: Vec<_> = world.query::<BuffLevels>().map(|(id, _)| id).collect();
    for id in ids {
        let Some(levels) = world.get::<BuffLevels>(id).copied() else {
            continue;
        };
        let stats = derive_stats(&levels, &ctx.config.gameplay);
        let alive = world.get::<Player>(id).is_some_and(Player::is_alive);

        if let Some(health) = world.get_mut::<Health>(id) {
            if stats.max_health != health.max {
                let grown = (stats.max_health - health.max).max(0.0);
                health.max = stats.max_health;
                health.current = (health.current + grown).min(health.max);
            }
            if regen && alive && stats.regen_per_sec > 0.0 {
                health.heal(stats.regen_per_sec * ctx.dt);
            }
        }
        if let Some(current) = world.get_mut::<PlayerStats>(id) {
            *current = stats;
        } else {
            ctx.commands.insert(id, stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_shared::{buffs::BuffType, config::EngineConfig};

    #[test]
    fn neutral_levels_give_base_tuning() {
        let cfg = EngineConfig::default();
        let stats = derive_stats(&BuffLevels::default(), &cfg.gameplay);
        assert_eq!(stats.max_health, cfg.gameplay.player.max_health);
        assert_eq!(stats.damage, cfg.gameplay.player.damage);
        assert_eq!(stats.homing_turn_rate, 0.0);
    }

    #[test]
    fn damage_and_health_follow_the_tables() {
        let cfg = EngineConfig::default();
        let mut levels = BuffLevels::default();
        for _ in 0..3 {
            levels.try_level_up(BuffType::Damage);
        }
        levels.try_level_up(BuffType::MaxHealth);
        let stats = derive_stats(&levels, &cfg.gameplay);
        assert!((stats.damage - cfg.gameplay.player.damage * 1.35).abs() < 1e-4);
        assert_eq!(stats.max_health, cfg.gameplay.player.max_health + 20.0);
        assert_eq!(stats, derive_stats(&levels, &cfg.gameplay), "deterministic");
    }
}
