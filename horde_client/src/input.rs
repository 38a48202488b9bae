//! Input handling.
//!
//! A headless client has no keyboard, so input comes from a small scripted
//! brain. Each tick it produces an [`InputState`], which turns into the
//! [`PlayerInput`] sent to the server.

use std::f32::consts::TAU;

use horde_shared::{math::Vec2, net::PlayerInput};
use rand::Rng;

/// Sampled intent at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub movement: Vec2,
    pub aim: Vec2,
    pub fire: bool,
}

/// Turns sampled input into the wire message for a tick.
pub fn build_input(input: InputState) -> PlayerInput {
    PlayerInput {
        movement: input.movement.normalize_or_zero(),
        aim: input.aim,
        fire: input.fire,
    }
}

/// Random walk that changes heading every `turn_every` ticks and aims at
/// the nearest target when one is known.
#[derive(Debug, Clone)]
pub struct Wander {
    heading: Vec2,
    turn_every: u32,
    ticks: u32,
}

impl Wander {
    pub fn new(turn_every: u32) -> Self {
        Self {
            heading: Vec2::ZERO,
            turn_every: turn_every.max(1),
            ticks: 0,
        }
    }

    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R, me: Vec2, target: Option<Vec2>) -> InputState {
        if self.ticks % self.turn_every == 0 {
            self.heading = Vec2::from_angle(rng.gen_range(0.0..TAU));
        }
        self.ticks = self.ticks.wrapping_add(1);
        let aim = target.map_or(self.heading, |t| t - me);
        InputState {
            movement: self.heading,
            aim,
            fire: target.is_some(),
        }
    }
}
