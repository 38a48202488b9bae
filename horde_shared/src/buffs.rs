//! Buff categories, level tables, and the point thresholds that unlock offers.
//!
//! Everything here is pure and deterministic. Randomised offer selection lives
//! on the server, which owns the simulation RNG.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of independent buff categories.
pub const BUFF_TYPE_COUNT: usize = 8;

/// Highest level any buff can reach.
pub const MAX_BUFF_LEVEL: u8 = 5;

/// Number of choices in a single offer.
pub const OFFER_SIZE: usize = 3;

/// Buff category. The discriminant is the wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum BuffType {
    Damage = 0,
    FireRate = 1,
    MoveSpeed = 2,
    MaxHealth = 3,
    Regeneration = 4,
    MagnetRange = 5,
    ProjectileSpeed = 6,
    Homing = 7,
}

impl BuffType {
    pub const ALL: [BuffType; BUFF_TYPE_COUNT] = [
        BuffType::Damage,
        BuffType::FireRate,
        BuffType::MoveSpeed,
        BuffType::MaxHealth,
        BuffType::Regeneration,
        BuffType::MagnetRange,
        BuffType::ProjectileSpeed,
        BuffType::Homing,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            BuffType::Damage => "damage",
            BuffType::FireRate => "fire_rate",
            BuffType::MoveSpeed => "move_speed",
            BuffType::MaxHealth => "max_health",
            BuffType::Regeneration => "regeneration",
            BuffType::MagnetRange => "magnet_range",
            BuffType::ProjectileSpeed => "projectile_speed",
            BuffType::Homing => "homing",
        }
    }

    fn index(self) -> usize {
        usize::from(self.id())
    }
}

impl fmt::Display for BuffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-player buff levels, one counter per category, each in `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuffLevels([u8; BUFF_TYPE_COUNT]);

impl BuffLevels {
    pub fn level(&self, buff: BuffType) -> u8 {
        self.0[buff.index()]
    }

    pub fn is_maxed(&self, buff: BuffType) -> bool {
        self.level(buff) >= MAX_BUFF_LEVEL
    }

    /// Raises `buff` by one level. Returns false, leaving the level untouched,
    /// if it is already at [`MAX_BUFF_LEVEL`].
    pub fn try_level_up(&mut self, buff: BuffType) -> bool {
        let slot = &mut self.0[buff.index()];
        if *slot >= MAX_BUFF_LEVEL {
            return false;
        }
        *slot += 1;
        true
    }

    /// Categories that can still be levelled, in id order.
    pub fn eligible(&self) -> Vec<BuffType> {
        BuffType::ALL
            .into_iter()
            .filter(|b| !self.is_maxed(*b))
            .collect()
    }

    /// Sum of all levels.
    pub fn total(&self) -> u32 {
        self.0.iter().map(|l| u32::from(*l)).sum()
    }
}

// Level tables, index = level. Level 0 is always the neutral value.
const DAMAGE_BONUS: [f32; 6] = [0.0, 0.10, 0.20, 0.35, 0.50, 0.75];
const FIRE_RATE_BONUS: [f32; 6] = [0.0, 0.10, 0.20, 0.30, 0.45, 0.60];
const MOVE_SPEED_BONUS: [f32; 6] = [0.0, 0.05, 0.10, 0.15, 0.20, 0.30];
const MAX_HEALTH_BONUS: [f32; 6] = [0.0, 20.0, 40.0, 70.0, 100.0, 150.0];
const REGEN_PER_SEC: [f32; 6] = [0.0, 0.5, 1.0, 1.5, 2.5, 4.0];
const MAGNET_RANGE_BONUS: [f32; 6] = [0.0, 0.20, 0.40, 0.70, 1.00, 1.50];
const PROJECTILE_SPEED_BONUS: [f32; 6] = [0.0, 0.10, 0.20, 0.35, 0.50, 0.70];
const HOMING_TURN_RATE: [f32; 6] = [0.0, 1.5, 2.5, 3.5, 5.0, 7.0];

/// Derived stat modifiers for one set of buff levels.
///
/// Multipliers are `1.0 + bonus`; additive values are absolute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatModifiers {
    pub damage_mult: f32,
    pub fire_rate_mult: f32,
    pub move_speed_mult: f32,
    pub max_health_bonus: f32,
    pub regen_per_sec: f32,
    pub magnet_radius_mult: f32,
    pub projectile_speed_mult: f32,
    /// Radians per second. Zero means projectiles fly straight.
    pub homing_turn_rate: f32,
}

impl StatModifiers {
    pub fn from_levels(levels: &BuffLevels) -> Self {
        let at = |table: &[f32; 6], buff: BuffType| table[usize::from(levels.level(buff))];
        Self {
            damage_mult: 1.0 + at(&DAMAGE_BONUS, BuffType::Damage),
            fire_rate_mult: 1.0 + at(&FIRE_RATE_BONUS, BuffType::FireRate),
            move_speed_mult: 1.0 + at(&MOVE_SPEED_BONUS, BuffType::MoveSpeed),
            max_health_bonus: at(&MAX_HEALTH_BONUS, BuffType::MaxHealth),
            regen_per_sec: at(&REGEN_PER_SEC, BuffType::Regeneration),
            magnet_radius_mult: 1.0 + at(&MAGNET_RANGE_BONUS, BuffType::MagnetRange),
            projectile_speed_mult: 1.0 + at(&PROJECTILE_SPEED_BONUS, BuffType::ProjectileSpeed),
            homing_turn_rate: at(&HOMING_TURN_RATE, BuffType::Homing),
        }
    }
}

impl Default for StatModifiers {
    fn default() -> Self {
        Self::from_levels(&BuffLevels::default())
    }
}

const FRONT_LOADED_THRESHOLDS: [u32; 6] = [10, 15, 20, 30, 40, 55];
const LINEAR_THRESHOLD_STEP: u32 = 15;

/// Points needed for the offer after `selection_count` resolved selections.
///
/// Front-loaded for the first six offers, then linear.
pub fn buff_threshold(selection_count: u32) -> u32 {
    let front = FRONT_LOADED_THRESHOLDS.len() as u32;
    match FRONT_LOADED_THRESHOLDS.get(selection_count as usize) {
        Some(threshold) => *threshold,
        None => {
            let last = FRONT_LOADED_THRESHOLDS[FRONT_LOADED_THRESHOLDS.len() - 1];
            last.saturating_add(LINEAR_THRESHOLD_STEP.saturating_mul(selection_count - front + 1))
        }
    }
}

/// One entry of an offer as shown to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffChoice {
    pub buff: BuffType,
    pub current_level: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_up_caps_at_five() {
        let mut levels = BuffLevels::default();
        for _ in 0..MAX_BUFF_LEVEL {
            assert!(levels.try_level_up(BuffType::Damage));
        }
        assert_eq!(levels.level(BuffType::Damage), 5);
        assert!(!levels.try_level_up(BuffType::Damage));
        assert_eq!(levels.level(BuffType::Damage), 5);
        assert!(levels.is_maxed(BuffType::Damage));
        assert!(!levels.eligible().contains(&BuffType::Damage));
    }

    #[test]
    fn levels_stay_in_range_under_repeated_level_ups() {
        let mut levels = BuffLevels::default();
        for round in 0..20 {
            for buff in BuffType::ALL {
                levels.try_level_up(buff);
                assert!(levels.level(buff) <= MAX_BUFF_LEVEL, "round {round}");
            }
        }
        assert_eq!(levels.total(), 40);
        assert!(levels.eligible().is_empty());
    }

    #[test]
    fn threshold_sequence_is_front_loaded_then_linear() {
        let first: Vec<u32> = (0..6).map(buff_threshold).collect();
        assert_eq!(first, vec![10, 15, 20, 30, 40, 55]);
        assert_eq!(buff_threshold(6), 70);
        assert_eq!(buff_threshold(7), 85);
        for n in 6..50 {
            assert_eq!(buff_threshold(n) - buff_threshold(n - 1), 15);
        }
    }

    #[test]
    fn damage_curve_matches_table() {
        let mut levels = BuffLevels::default();
        let expected = [1.10, 1.20, 1.35, 1.50, 1.75];
        for want in expected {
            levels.try_level_up(BuffType::Damage);
            let got = StatModifiers::from_levels(&levels).damage_mult;
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn neutral_modifiers_at_level_zero() {
        let m = StatModifiers::default();
        assert_eq!(m.damage_mult, 1.0);
        assert_eq!(m.max_health_bonus, 0.0);
        assert_eq!(m.homing_turn_rate, 0.0);
    }

    #[test]
    fn wire_ids_roundtrip() {
        for buff in BuffType::ALL {
            assert_eq!(BuffType::from_id(buff.id()), Some(buff));
        }
        assert_eq!(BuffType::from_id(8), None);
    }
}
