//! Content-system seam.
//!
//! Item definitions carry formulas (weapon damage, mostly) that the
//! content system owns and evaluates. The engines only ever ask for a
//! resolved number.

use crate::dice::Dice;
use crate::types::ItemRecord;

pub trait ContentOracle: Send + Sync {
    /// Roll the weapon's damage formula. Items without a weapon profile
    /// deal nothing.
    fn weapon_damage(&self, weapon: &ItemRecord, dice: &mut dyn Dice) -> f64;
}

/// Evaluates the common `NdM+K` formula shape; anything it cannot parse
/// rolls uniformly up to the profile's max damage. Good enough for an
/// embedded world; production supplies its own oracle.
#[derive(Default)]
pub struct DiceFormulaOracle;

impl DiceFormulaOracle {
    fn parse(formula: &str) -> Option<(u32, u32, i64)> {
        let formula = formula.trim();
        let (dice_part, bonus) = match formula.split_once('+') {
            Some((d, b)) => (d, b.trim().parse::<i64>().ok()?),
            None => (formula, 0),
        };
        let (count, sides) = dice_part.trim().split_once('d')?;
        Some((
            count.trim().parse::<u32>().ok()?,
            sides.trim().parse::<u32>().ok()?,
            bonus,
        ))
    }
}

impl ContentOracle for DiceFormulaOracle {
    fn weapon_damage(&self, weapon: &ItemRecord, dice: &mut dyn Dice) -> f64 {
        let Some(profile) = &weapon.weapon else {
            return 0.0;
        };
        match Self::parse(&profile.damage_formula) {
            Some((count, sides, bonus)) => {
                let mut total = bonus;
                for _ in 0..count {
                    total += dice.below(sides) as i64 + 1;
                }
                total.max(0) as f64
            }
            None => dice.unit() * profile.max_damage,
        }
    }
}

/// Always deals the profile's max damage. For tests that need exact
/// numbers out of combat.
#[derive(Default)]
pub struct FixedDamageOracle;

impl ContentOracle for FixedDamageOracle {
    fn weapon_damage(&self, weapon: &ItemRecord, _dice: &mut dyn Dice) -> f64 {
        weapon.weapon.as_ref().map(|w| w.max_damage).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::ScriptedDice;
    use crate::types::{ContainerRef, WeaponProfile};

    fn weapon(formula: &str, max: f64) -> ItemRecord {
        let mut item = ItemRecord::new(1, "sword", ContainerRef::Character(1));
        item.weapon = Some(WeaponProfile {
            damage_formula: formula.to_string(),
            max_damage: max,
            damage_types: Vec::new(),
            crit_chance: 0.0,
            crit_multiplier: None,
        });
        item
    }

    #[test]
    fn formula_rolls_each_die() {
        let oracle = DiceFormulaOracle;
        // two d6 rolling max faces, plus one
        let mut dice = ScriptedDice::new(vec![0.99, 0.99]);
        let dmg = oracle.weapon_damage(&weapon("2d6+1", 13.0), &mut dice);
        assert_eq!(dmg, 13.0);
    }

    #[test]
    fn unparseable_formula_falls_back_to_max_damage_roll() {
        let oracle = DiceFormulaOracle;
        let mut dice = ScriptedDice::new(vec![0.5]);
        let dmg = oracle.weapon_damage(&weapon("whatever", 10.0), &mut dice);
        assert_eq!(dmg, 5.0);
    }

    #[test]
    fn non_weapon_deals_nothing() {
        let oracle = DiceFormulaOracle;
        let mut dice = ScriptedDice::new(vec![0.5]);
        let item = ItemRecord::new(2, "rock", ContainerRef::Location(1));
        assert_eq!(oracle.weapon_damage(&item, &mut dice), 0.0);
    }
}
