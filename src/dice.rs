//! Randomness seam.
//!
//! Every roll the engines make goes through [`Dice`] so tests can script
//! outcomes. [`RandDice`] is the production implementation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Dice: Send {
    /// Uniform sample in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// Percent roll: true with probability `chance / 100`.
    fn percent(&mut self, chance: f64) -> bool {
        self.unit() * 100.0 < chance
    }

    /// Uniform integer in `0..n`. `n == 0` yields 0.
    fn below(&mut self, n: u32) -> u32 {
        if n == 0 {
            0
        } else {
            (self.unit() * n as f64) as u32
        }
    }
}

/// Fisher-Yates driven by a [`Dice`].
pub fn shuffle<T>(dice: &mut dyn Dice, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = dice.below(i as u32 + 1) as usize;
        items.swap(i, j);
    }
}

pub struct RandDice {
    rng: StdRng,
}

impl RandDice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandDice {
    fn default() -> Self {
        Self::new()
    }
}

impl Dice for RandDice {
    fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Plays back a fixed list of unit rolls, then repeats the final value.
/// Intended for tests that need exact combat outcomes.
pub struct ScriptedDice {
    rolls: Vec<f64>,
    cursor: usize,
}

impl ScriptedDice {
    pub fn new(rolls: Vec<f64>) -> Self {
        Self { rolls, cursor: 0 }
    }

    /// How many scripted rolls have been consumed.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl Dice for ScriptedDice {
    fn unit(&mut self) -> f64 {
        let value = self
            .rolls
            .get(self.cursor)
            .or_else(|| self.rolls.last())
            .copied()
            .unwrap_or(0.5);
        if self.cursor < self.rolls.len() {
            self.cursor += 1;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_rolls_play_back_in_order() {
        let mut dice = ScriptedDice::new(vec![0.0, 0.9]);
        assert_eq!(dice.unit(), 0.0);
        assert_eq!(dice.unit(), 0.9);
        // exhausted script repeats the last roll
        assert_eq!(dice.unit(), 0.9);
        assert_eq!(dice.consumed(), 2);
    }

    #[test]
    fn percent_uses_unit() {
        let mut sure = ScriptedDice::new(vec![0.0]);
        assert!(sure.percent(1.0));
        let mut never = ScriptedDice::new(vec![0.999]);
        assert!(!never.percent(50.0));
    }

    #[test]
    fn below_stays_in_range() {
        let mut dice = RandDice::seeded(7);
        for _ in 0..100 {
            assert!(dice.below(5) < 5);
        }
        assert_eq!(dice.below(0), 0);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut dice = RandDice::seeded(42);
        let mut items = vec![1, 2, 3, 4, 5];
        shuffle(&mut dice, &mut items);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
    }
}
