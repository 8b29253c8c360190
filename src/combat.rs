//! Combat resolution.
//!
//! One call to [`CombatEngine::attempt_attack`] is one full exchange:
//! hit roll, weapon damage, critical, armor blocking, durability decay,
//! hitpoint application, and death handling when the defender drops.
//! Every random number comes from the caller's [`Dice`] so outcomes can
//! be scripted in tests.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use crate::attributes::{pumped, AttributeResolver, BuffCache};
use crate::cache::{flag_combat_action, WorldCache};
use crate::config::GameConfig;
use crate::content::ContentOracle;
use crate::dice::{shuffle, Dice};
use crate::errors::{Denial, GameError};
use crate::inventory::InventoryManager;
use crate::notify::{GameEvent, Notifier};
use crate::party::{apply_to_all, PartyCoordinator};
use crate::store::{require_character, require_location, StoreHandle};
use crate::types::{
    BlockCapability, CharacterMode, CharacterRecord, CombatTag, ContainerRef, DamageType,
    EquipSlot, ItemRecord, LocationRecord, PathKind, WeaponChoice,
};

/// What one weapon swing did.
#[derive(Debug, Clone, PartialEq)]
pub struct SwingReport {
    /// Weapon used; None is an unarmed swing
    pub weapon: Option<u64>,
    /// Damage that landed after blocking
    pub damage: f64,
    pub blocked: f64,
    pub crit: bool,
    pub weapon_destroyed: bool,
}

/// One full attack exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackReport {
    pub swings: Vec<SwingReport>,
    pub killed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeOutcome {
    Escaped { to: u64 },
    Failed,
}

pub struct CombatEngine {
    store: StoreHandle,
    cache: Arc<dyn WorldCache>,
    notifier: Arc<dyn Notifier>,
    content: Arc<dyn ContentOracle>,
    attributes: Arc<AttributeResolver>,
    parties: Arc<PartyCoordinator>,
    inventory: Arc<InventoryManager>,
    config: Arc<GameConfig>,
}

impl CombatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreHandle,
        cache: Arc<dyn WorldCache>,
        notifier: Arc<dyn Notifier>,
        content: Arc<dyn ContentOracle>,
        attributes: Arc<AttributeResolver>,
        parties: Arc<PartyCoordinator>,
        inventory: Arc<InventoryManager>,
        config: Arc<GameConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            content,
            attributes,
            parties,
            inventory,
            config,
        }
    }

    // ===== attacking =====

    /// One attack exchange. `Ok(None)` is a clean miss.
    pub fn attempt_attack(
        &self,
        dice: &mut dyn Dice,
        attacker_id: u64,
        defender_id: u64,
    ) -> Result<Option<AttackReport>, GameError> {
        let mut attacker = require_character(self.store.as_ref(), attacker_id)?;
        let mut defender = require_character(self.store.as_ref(), defender_id)?;
        if attacker.is_incapacitated() {
            return Err(Denial::refused("You are in no state to fight.").into());
        }
        if defender.mode == CharacterMode::Dead {
            return Err(Denial::refused("They are already dead.").into());
        }
        if attacker.location != defender.location {
            return Err(Denial::refused("They are not here.").into());
        }
        if attacker.is_player() && defender.is_player() {
            flag_combat_action(
                self.cache.as_ref(),
                attacker_id,
                defender_id,
                self.config.combat.combat_flag_ttl_secs,
            );
        }

        // fighting anything trains the attacker, hit or miss
        if attacker.is_player() {
            let multiplier = defender
                .experience_multiplier
                .clamp(0.0, self.config.combat.max_experience_multiplier);
            self.train(&mut attacker, multiplier);
        }

        let full_health_going_in = attacker.hitpoints >= attacker.max_hitpoints;
        let mut cache = BuffCache::new();
        let attacker_dex = self.attributes.dexterity(&mut cache, &attacker)?;
        let defender_dex = self.attributes.dexterity(&mut cache, &defender)?;
        // attacker wins ties
        if dice.unit() * attacker_dex < dice.unit() * defender_dex {
            self.store.put_character(&attacker)?;
            debug!("{} missed {}", attacker.name, defender.name);
            return Ok(None);
        }

        let weapons = self.hand_weapons(&attacker)?;
        let mut swings = Vec::new();
        if weapons.is_empty() {
            swings.push(self.swing(dice, &mut cache, &mut attacker, &mut defender, None)?);
        } else {
            for (index, weapon) in weapons.iter().enumerate() {
                if defender.hitpoints <= 0.0 {
                    break;
                }
                // the off-hand only joins in on a double-attack roll
                if index > 0 && !self.double_attack(dice, &mut cache, &attacker, weapon)? {
                    continue;
                }
                swings.push(self.swing(
                    dice,
                    &mut cache,
                    &mut attacker,
                    &mut defender,
                    Some(weapon),
                )?);
            }
        }

        self.store.put_character(&attacker)?;
        self.store.put_character(&defender)?;
        self.notifier.notify(attacker_id, GameEvent::CombatUpdate);
        self.notifier.notify(defender_id, GameEvent::CombatUpdate);

        let killed = defender.hitpoints <= 0.0;
        if killed {
            self.handle_death(dice, attacker_id, defender_id, full_health_going_in)?;
        }
        Ok(Some(AttackReport { swings, killed }))
    }

    /// Distinct weapons in hand, two-handed grips counted once.
    fn hand_weapons(&self, character: &CharacterRecord) -> Result<Vec<ItemRecord>, GameError> {
        let mut weapons: Vec<ItemRecord> = Vec::new();
        for slot in [EquipSlot::RightHand, EquipSlot::LeftHand] {
            let Some(item_id) = character.equipped(slot) else {
                continue;
            };
            if weapons.iter().any(|w| w.id == item_id) {
                continue;
            }
            if let Some(item) = self.store.get_item(item_id)? {
                if item.is_weapon() {
                    weapons.push(item);
                }
            }
        }
        Ok(weapons)
    }

    /// The weapon an NPC swings back with.
    pub fn counter_attack_weapon(
        &self,
        dice: &mut dyn Dice,
        npc: &CharacterRecord,
    ) -> Result<Option<ItemRecord>, GameError> {
        let weapons = self.hand_weapons(npc)?;
        if weapons.is_empty() {
            return Ok(None);
        }
        let pick = match npc.counter_attack_method {
            WeaponChoice::HighestDamage => weapons
                .into_iter()
                .max_by(|a, b| {
                    let da = a.weapon.as_ref().map(|w| w.max_damage).unwrap_or(0.0);
                    let db = b.weapon.as_ref().map(|w| w.max_damage).unwrap_or(0.0);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                }),
            WeaponChoice::Random => {
                let index = dice.below(weapons.len() as u32) as usize;
                weapons.into_iter().nth(index)
            }
        };
        Ok(pick)
    }

    /// Whether a second weapon gets a swing of its own. Same
    /// intelligence-adjusted chance as a critical with that weapon.
    fn double_attack(
        &self,
        dice: &mut dyn Dice,
        cache: &mut BuffCache,
        attacker: &CharacterRecord,
        weapon: &ItemRecord,
    ) -> Result<bool, GameError> {
        let base = weapon.weapon.as_ref().map(|p| p.crit_chance).unwrap_or(0.0);
        let intelligence = self.attributes.intelligence(cache, attacker)?;
        let chance = base
            + (intelligence - self.config.combat.crit_intelligence_pivot)
                * self.config.combat.crit_per_intelligence;
        Ok(dice.percent(chance))
    }

    fn train(&self, attacker: &mut CharacterRecord, multiplier: f64) {
        let divisor = self.config.combat.training_divisor;
        Self::train_stat(&mut attacker.strength, attacker.max_strength, 4.0 * multiplier, divisor);
        Self::train_stat(
            &mut attacker.dexterity,
            attacker.max_dexterity,
            2.0 * multiplier,
            divisor,
        );
        Self::train_stat(
            &mut attacker.intelligence,
            attacker.max_intelligence,
            0.5 * multiplier,
            divisor,
        );
    }

    /// Gains shrink linearly as the stat approaches its ceiling.
    fn train_stat(current: &mut f64, max: f64, amount: f64, divisor: f64) {
        let amount = amount / divisor;
        let range = max - 3.0;
        if range <= 0.0 {
            return;
        }
        let scale = (1.0 - (*current - 3.0) / range).max(0.0);
        *current += amount * scale;
    }

    fn swing(
        &self,
        dice: &mut dyn Dice,
        cache: &mut BuffCache,
        attacker: &mut CharacterRecord,
        defender: &mut CharacterRecord,
        weapon: Option<&ItemRecord>,
    ) -> Result<SwingReport, GameError> {
        let mut damage = match weapon {
            Some(w) => self.content.weapon_damage(w, dice),
            None => 0.0,
        };

        let strength = self.attributes.strength(cache, attacker)?;
        let mut bonus_ceiling = (strength - 3.0).max(0.0);
        if weapon.map(|w| w.two_handed()).unwrap_or(false) {
            bonus_ceiling *= self.config.combat.two_hand_bonus_factor;
        }
        bonus_ceiling *= 2.0;
        let strength_bonus = (dice.unit() * bonus_ceiling).floor().max(0.0);

        let mut crit = false;
        if let Some(profile) = weapon.and_then(|w| w.weapon.as_ref()) {
            let intelligence = self.attributes.intelligence(cache, attacker)?;
            let crit_chance = profile.crit_chance
                + (intelligence - self.config.combat.crit_intelligence_pivot)
                    * self.config.combat.crit_per_intelligence;
            if dice.percent(crit_chance) {
                crit = true;
                let multiplier = profile
                    .crit_multiplier
                    .unwrap_or(self.config.combat.default_crit_multiplier);
                // the bonus rides on top of the crit, not inside it
                damage = damage * multiplier + strength_bonus;
            }
        }
        if !crit {
            damage += strength_bonus;
        }

        let mut weapon_destroyed = false;
        if let Some(w) = weapon {
            weapon_destroyed = self.wear_item(attacker, w.id)?;
        }

        let mut blocked = 0.0;
        if damage > 0.0 {
            let types = weapon
                .and_then(|w| w.weapon.as_ref())
                .map(|p| p.damage_types.clone())
                .unwrap_or_default();
            blocked = self.block_attack(dice, defender, damage, &types)?;
            damage -= blocked;
        }
        defender.hitpoints -= damage;

        Ok(SwingReport {
            weapon: weapon.map(|w| w.id),
            damage,
            blocked,
            crit,
            weapon_destroyed,
        })
    }

    /// Take one point of durability; destroy the item at zero. Returns
    /// whether the item was destroyed.
    fn wear_item(&self, holder: &mut CharacterRecord, item_id: u64) -> Result<bool, GameError> {
        let Some(mut item) = self.store.get_item(item_id)? else {
            return Ok(false);
        };
        let Some(durability) = item.durability else {
            return Ok(false);
        };
        let next = durability - 1;
        if next <= 0 {
            info!("{} broke beyond repair", item.name);
            for slot in holder.slots_holding(item_id) {
                holder.equipment.remove(&slot);
            }
            self.store.put_character(holder)?;
            self.store.delete_item(item_id)?;
            Ok(true)
        } else {
            item.durability = Some(next);
            self.store.put_item(&item)?;
            Ok(false)
        }
    }

    // ===== blocking =====

    /// Run the defender's armor against an incoming hit. Returns the total
    /// damage absorbed, capped at `damage`.
    fn block_attack(
        &self,
        dice: &mut dyn Dice,
        defender: &mut CharacterRecord,
        damage: f64,
        damage_types: &[DamageType],
    ) -> Result<f64, GameError> {
        // hands, rings and neck always get a say; the body placement roll
        // decides which worn piece is in the hit's path
        let mut slots = vec![
            EquipSlot::LeftHand,
            EquipSlot::RightHand,
            EquipSlot::RightRing,
            EquipSlot::LeftRing,
            EquipSlot::Neck,
        ];
        match dice.below(100) {
            0..=49 => {
                slots.push(EquipSlot::Chest);
                slots.push(EquipSlot::Shirt);
            }
            50..=79 => slots.push(EquipSlot::Legs),
            80..=89 => slots.push(EquipSlot::Helmet),
            90..=94 => slots.push(EquipSlot::Gloves),
            _ => slots.push(EquipSlot::Boots),
        }

        let mut blockers: Vec<ItemRecord> = Vec::new();
        for slot in slots {
            let Some(item_id) = defender.equipped(slot) else {
                continue;
            };
            if blockers.iter().any(|b| b.id == item_id) {
                continue;
            }
            if let Some(item) = self.store.get_item(item_id)? {
                if item.armor.is_some() {
                    blockers.push(item);
                }
            }
        }

        // eager pieces go first: order by a roll weighted by block chance
        let mut weighted: Vec<(f64, ItemRecord)> = blockers
            .into_iter()
            .map(|item| {
                let chance = item.armor.as_ref().map(|a| a.block_chance).unwrap_or(0.0);
                (dice.unit() * chance, item)
            })
            .collect();
        weighted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut remaining = damage;
        let mut blocked = 0.0;
        for (_, item) in weighted {
            if remaining <= 0.0 {
                break;
            }
            let Some(armor) = item.armor.as_ref() else {
                continue;
            };
            if !dice.percent(armor.block_chance) {
                continue;
            }
            // multi-type damage seeks the armor's weakest point
            let capability = damage_types
                .iter()
                .map(|dt| armor.capability(*dt))
                .min()
                .unwrap_or(BlockCapability::Average);
            let base = armor
                .damage_reduction
                .unwrap_or(self.config.combat.default_damage_reduction);
            let reduction = (base * capability.multiplier()).min(remaining);
            if reduction <= 0.0 {
                continue;
            }
            remaining -= reduction;
            blocked += reduction;
            self.wear_item(defender, item.id)?;
        }
        Ok(blocked)
    }

    // ===== death =====

    /// Settle a kill. Mode resets, loot, and record rewrites happen inside
    /// one transaction; item scattering follows outside it.
    fn handle_death(
        &self,
        dice: &mut dyn Dice,
        attacker_id: u64,
        victim_id: u64,
        attacker_was_full_health: bool,
    ) -> Result<(), GameError> {
        let die_roll = dice.unit();
        let parties = self.parties.clone();
        let mut auto_loot = false;
        self.store.transaction(&mut |tx| {
            let mut attacker = require_character(tx, attacker_id)?;
            let mut victim = require_character(tx, victim_id)?;
            let mut location = require_location(tx, victim.location)?;

            // the winner's whole party stands down; the loser's side is
            // only reset on the victim itself
            auto_loot = location.territory.is_some()
                || location.defence_structure.is_some()
                || attacker.combat_tag == Some(CombatTag::Instance)
                || (!location.is_combat_site() && victim.max_hitpoints < 100.0);

            attacker.reset_combat();
            if let Some(code) = attacker.party_code.clone() {
                let mut members = tx.characters_in_party(&code, 50)?;
                apply_to_all(&mut members, |m| m.reset_combat());
                for member in members.iter().filter(|m| m.id != attacker_id) {
                    tx.put_character(member)?;
                }
            }

            if victim.is_npc() {
                victim.mode = CharacterMode::Dead;
                victim.combatant = None;
                victim.combat_tag = None;
                victim.name = format!("Dead {}", victim.name);
                if location.instanced {
                    location.instance_respawn = Some(Utc::now());
                    tx.put_location(&location)?;
                }
            } else {
                victim.mode = CharacterMode::Unconscious;
                victim.combatant = None;
                victim.combat_tag = None;
                // the deeper below zero they went, the likelier this is it
                let death_chance = (-victim.hitpoints + 1.0).max(0.0);
                if die_roll * 100.0 < death_chance {
                    info!("{} died of their wounds", victim.name);
                    victim.mode = CharacterMode::Dead;
                }
            }

            // the fallen leave their party on the spot
            if let Some(code) = victim.party_code.clone() {
                let mut members = tx.characters_in_party(&code, 50)?;
                for m in members.iter_mut() {
                    if m.id == victim_id {
                        *m = victim.clone();
                    }
                }
                if victim.party_leader {
                    parties.reassign_leader_from(&mut members);
                }
                let mut survivors: Vec<CharacterRecord> = members
                    .into_iter()
                    .filter(|m| m.id != victim_id)
                    .collect();
                if survivors.len() == 1 {
                    survivors[0].party_code = None;
                    survivors[0].party_leader = false;
                }
                for member in survivors {
                    if member.id == attacker_id {
                        // the attacker's copy is persisted below
                        attacker.party_code = member.party_code.clone();
                        attacker.party_leader = member.party_leader;
                    } else {
                        tx.put_character(&member)?;
                    }
                }
                victim.party_code = None;
                victim.party_leader = false;
                victim.party_joins_allowed = false;
            }

            if auto_loot && victim.coins > 0 {
                attacker.coins += victim.coins;
                victim.coins = 0;
            }

            tx.put_character(&attacker)?;
            tx.put_character(&victim)?;
            Ok(())
        })?;

        self.scatter_possessions(attacker_id, victim_id, auto_loot)?;

        if attacker_was_full_health {
            let mut cache = BuffCache::new();
            self.attributes.award_buff(&mut cache, attacker_id, &pumped())?;
        }
        self.notifier.notify(attacker_id, GameEvent::CombatUpdate);
        self.notifier.notify(victim_id, GameEvent::CombatUpdate);
        Ok(())
    }

    /// Strip the victim: natural equipment evaporates, the rest goes to
    /// the killer when the kill earned a claim, to the ground otherwise
    /// (or when the killer cannot carry it), and carried characters are
    /// set down.
    fn scatter_possessions(
        &self,
        attacker_id: u64,
        victim_id: u64,
        auto_loot: bool,
    ) -> Result<(), GameError> {
        let attacker = require_character(self.store.as_ref(), attacker_id)?;
        let mut victim = require_character(self.store.as_ref(), victim_id)?;
        let now = Utc::now();

        let mut cache = BuffCache::new();
        let overburdened = self.inventory.is_overburdened(&mut cache, &attacker)?;
        let items = self
            .store
            .items_in(ContainerRef::Character(victim_id), 500)?;
        let mut dropped_any = false;
        for mut item in items {
            if item.natural_equipment {
                self.store.delete_item(item.id)?;
                continue;
            }
            item.container = if auto_loot && !overburdened {
                ContainerRef::Character(attacker_id)
            } else {
                if auto_loot {
                    dropped_any = true;
                }
                ContainerRef::Location(victim.location)
            };
            item.moved = Some(now);
            self.store.put_item(&item)?;
        }
        if dropped_any {
            self.notifier.send_game_message(
                attacker_id,
                "You are carrying too much. The spoils fall to the ground.",
            );
        }
        victim.equipment.clear();
        self.store.put_character(&victim)?;

        for mut carried in self.store.characters_carried_by(victim_id)? {
            carried.carried_by = None;
            carried.location = victim.location;
            self.store.put_character(&carried)?;
        }
        Ok(())
    }

    // ===== escaping =====

    /// Try to break off from combat. Strictly harder than landing a hit:
    /// ties lose.
    pub fn attempt_escape(
        &self,
        dice: &mut dyn Dice,
        character_id: u64,
    ) -> Result<EscapeOutcome, GameError> {
        let character = require_character(self.store.as_ref(), character_id)?;
        if character.mode != CharacterMode::Combat {
            return Err(Denial::refused("You are not fighting anything.").into());
        }
        let opponent_id = character
            .combatant
            .ok_or_else(|| GameError::invariant("in combat with no combatant"))?;
        let mut opponent = require_character(self.store.as_ref(), opponent_id)?;
        if opponent.is_player() {
            return Err(Denial::refused("You cannot slip away from another adventurer.").into());
        }
        if character.party_code.is_some() && !character.party_leader {
            return Err(Denial::refused("Only the party leader can call the retreat.").into());
        }

        let mut cache = BuffCache::new();
        let character_dex = self.attributes.dexterity(&mut cache, &character)?;
        let opponent_dex = self.attributes.dexterity(&mut cache, &opponent)?;
        if dice.unit() * character_dex <= dice.unit() * opponent_dex {
            debug!("{} failed to escape {}", character.name, opponent.name);
            return Ok(EscapeOutcome::Failed);
        }

        let mut members = self.parties.party_or_solo(&character)?;
        apply_to_all(&mut members, |m| m.reset_combat());
        self.parties.persist_members(character_id, &members)?;
        for member in members.iter().filter(|m| m.id != character_id) {
            self.notifier.notify(member.id, GameEvent::CombatUpdate);
        }

        // structure and territory defenders shake it off completely
        let defending_structure = matches!(
            opponent.combat_tag,
            Some(CombatTag::StructureDefence) | Some(CombatTag::Territory)
        );
        if defending_structure && !opponent.raid_boss {
            opponent.hitpoints = opponent.max_hitpoints;
        }
        opponent.reset_combat();
        self.store.put_character(&opponent)?;

        let location = require_location(self.store.as_ref(), character.location)?;
        let destination = self.flight_destination(dice, &location)?;
        let mut escapee = members
            .into_iter()
            .find(|m| m.id == character_id)
            .unwrap_or(character);
        escapee.reset_combat();
        if let Some(to) = destination {
            escapee.location = to;
            escapee.location_entry = Some(Utc::now());
        }
        self.store.put_character(&escapee)?;
        self.notifier.notify(character_id, GameEvent::FullPageRefresh);
        Ok(EscapeOutcome::Escaped {
            to: destination.unwrap_or(escapee.location),
        })
    }

    /// Where a successful escape lands you: the parent exit when there is
    /// one, otherwise a random permanent path, otherwise any path at all.
    fn flight_destination(
        &self,
        dice: &mut dyn Dice,
        location: &LocationRecord,
    ) -> Result<Option<u64>, GameError> {
        let paths = self
            .store
            .paths_at(location.id, self.config.movement.npc_scan_limit)?;
        if let Some(parent) = location.parent {
            if let Some(path) = paths
                .iter()
                .find(|p| p.other_end(location.id) == Some(parent))
            {
                return Ok(path.other_end(location.id));
            }
        }
        let mut permanent: Vec<&crate::types::PathRecord> = paths
            .iter()
            .filter(|p| p.kind == PathKind::Permanent && p.passable_from(location.id))
            .collect();
        if !permanent.is_empty() {
            shuffle(dice, &mut permanent);
            return Ok(permanent[0].other_end(location.id));
        }
        Ok(paths
            .iter()
            .find(|p| p.passable_from(location.id))
            .and_then(|p| p.other_end(location.id)))
    }
}
