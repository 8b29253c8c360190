//! Inventory and equipment management.
//!
//! Items always live in exactly one container (a character, a location,
//! or another item). Equipping never moves an item; it only writes slot
//! entries on the character, so an equipped item still sits in its
//! owner's inventory. Moves run through a source/destination policy
//! matrix with capacity math that can split a stack rather than fail
//! when only part of it fits.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::attributes::{AttributeResolver, BuffCache};
use crate::config::GameConfig;
use crate::errors::{Denial, GameError};
use crate::market::is_item_for_sale;
use crate::store::{require_character, require_item, StoreHandle};
use crate::types::{CharacterRecord, ContainerRef, EquipSlot, ItemRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct EquipOptions {
    /// NPC spawners and death handling dress characters without the gate
    pub skip_strength_check: bool,
    pub skip_sale_check: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Moved {
        /// Id of the record now sitting at the destination. Differs from
        /// the request when a stack was split.
        item: u64,
        quantity: u64,
        partial: bool,
    },
}

enum AffinityTarget {
    BothHands,
    Alternatives(Vec<EquipSlot>),
}

/// Expand the content affinity grammar into candidate slots.
fn affinity_slots(affinity: &str) -> Option<AffinityTarget> {
    if affinity.trim() == "2Hands" {
        return Some(AffinityTarget::BothHands);
    }
    let mut slots = Vec::new();
    for token in affinity.split(',') {
        let token = token.trim();
        if token == "Ring" {
            slots.push(EquipSlot::LeftRing);
            slots.push(EquipSlot::RightRing);
        } else if let Some(slot) = EquipSlot::parse(token) {
            slots.push(slot);
        }
    }
    if slots.is_empty() {
        None
    } else {
        Some(AffinityTarget::Alternatives(slots))
    }
}

pub struct InventoryManager {
    store: StoreHandle,
    config: Arc<GameConfig>,
    attributes: Arc<AttributeResolver>,
}

impl InventoryManager {
    pub fn new(
        store: StoreHandle,
        config: Arc<GameConfig>,
        attributes: Arc<AttributeResolver>,
    ) -> Self {
        Self {
            store,
            config,
            attributes,
        }
    }

    // ===== equipping =====

    pub fn equip(
        &self,
        cache: &mut BuffCache,
        character_id: u64,
        item_id: u64,
        opts: EquipOptions,
    ) -> Result<(), GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        let item = require_item(self.store.as_ref(), item_id)?;
        if item.container != ContainerRef::Character(character_id) {
            return Err(Denial::refused("You are not holding that item.").into());
        }
        let Some(affinity) = item.equip_affinity.as_deref() else {
            return Err(Denial::NotEquipable.into());
        };
        let Some(target) = affinity_slots(affinity) else {
            return Err(Denial::NotEquipable.into());
        };
        if !opts.skip_sale_check && is_item_for_sale(self.store.as_ref(), &item)? {
            return Err(Denial::ItemListedForSale.into());
        }
        // NPCs dress themselves however content says; only players get gated
        if !opts.skip_strength_check && character.is_player() {
            if let Some(required) = item.strength_requirement {
                let strength = self.attributes.strength(cache, &character)?;
                if strength.round() < required {
                    return Err(Denial::InsufficientStrength {
                        required: required as u32,
                    }
                    .into());
                }
            }
        }
        match target {
            AffinityTarget::BothHands => {
                self.clear_slot(&mut character, EquipSlot::RightHand);
                self.clear_slot(&mut character, EquipSlot::LeftHand);
                character.equipment.insert(EquipSlot::RightHand, item_id);
                character.equipment.insert(EquipSlot::LeftHand, item_id);
            }
            AffinityTarget::Alternatives(slots) => {
                if slots.len() == 1 {
                    // a single-slot item replaces whatever is there
                    self.clear_slot(&mut character, slots[0]);
                    character.equipment.insert(slots[0], item_id);
                } else {
                    let Some(free) = slots.iter().find(|s| character.equipped(**s).is_none())
                    else {
                        return Err(Denial::SlotsFull.into());
                    };
                    character.equipment.insert(*free, item_id);
                }
            }
        }
        self.store.put_character(&character)?;
        Ok(())
    }

    /// Remove whatever occupies `slot`, clearing every slot the occupant
    /// spans (a two-handed weapon leaves both hands).
    pub fn unequip_slot(&self, character_id: u64, slot: EquipSlot) -> Result<(), GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        self.clear_slot(&mut character, slot);
        self.store.put_character(&character)?;
        Ok(())
    }

    pub fn unequip_item(&self, character_id: u64, item_id: u64) -> Result<(), GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        for slot in character.slots_holding(item_id) {
            character.equipment.remove(&slot);
        }
        self.store.put_character(&character)?;
        Ok(())
    }

    fn clear_slot(&self, character: &mut CharacterRecord, slot: EquipSlot) {
        if let Some(occupant) = character.equipped(slot) {
            for held in character.slots_holding(occupant) {
                character.equipment.remove(&held);
            }
        }
    }

    // ===== weight =====

    /// Weight the character is actively carrying: inventory minus armor
    /// worn on the body (hand-held items still count), plus the body
    /// weight of anyone they are carrying.
    pub fn carried_weight(&self, character: &CharacterRecord) -> Result<u64, GameError> {
        let mut total = 0u64;
        let items = self.store.items_in(
            ContainerRef::Character(character.id),
            self.config.inventory.contents_query_limit,
        )?;
        for item in items {
            let worn_on_body = character
                .slots_holding(item.id)
                .iter()
                .any(|s| !s.is_hand());
            if worn_on_body {
                continue;
            }
            total += item.total_weight();
        }
        for carried in self.store.characters_carried_by(character.id)? {
            total += self.body_weight(&carried);
        }
        Ok(total)
    }

    /// A character's own mass, driven by strength.
    pub fn body_weight(&self, character: &CharacterRecord) -> u64 {
        (character.strength.max(0.0) * self.config.inventory.body_grams_per_strength as f64) as u64
    }

    pub fn max_carry_weight(&self, strength: f64) -> u64 {
        let extra = (strength - 3.0) * self.config.inventory.carry_grams_per_strength as f64;
        let total = self.config.inventory.base_carry_grams as f64 + extra;
        total.max(0.0) as u64
    }

    pub fn is_overburdened(
        &self,
        cache: &mut BuffCache,
        character: &CharacterRecord,
    ) -> Result<bool, GameError> {
        let strength = self.attributes.strength(cache, character)?;
        Ok(self.carried_weight(character)? > self.max_carry_weight(strength))
    }

    // ===== moving =====

    /// Move (part of) an item stack. `quantity` of None means the whole
    /// stack. When the destination can only hold part of the stack, that
    /// part is split off and moved; the caller learns how much went.
    pub fn move_item(
        &self,
        cache: &mut BuffCache,
        actor_id: u64,
        item_id: u64,
        dest: ContainerRef,
        quantity: Option<u64>,
    ) -> Result<MoveOutcome, GameError> {
        let actor = require_character(self.store.as_ref(), actor_id)?;
        let item = require_item(self.store.as_ref(), item_id)?;
        if !item.movable {
            return Err(Denial::refused("That cannot be moved.").into());
        }
        if dest == ContainerRef::Item(item_id) {
            return Err(Denial::refused("You cannot put something inside itself.").into());
        }
        if actor.is_equipped(item_id) {
            return Err(Denial::ItemEquipped.into());
        }
        if is_item_for_sale(self.store.as_ref(), &item)? {
            return Err(Denial::ItemListedForSale.into());
        }
        let requested = quantity.unwrap_or(item.quantity).min(item.quantity);
        if requested == 0 {
            return Err(Denial::refused("Nothing to move.").into());
        }

        let allowed = match (item.container, dest) {
            // dropping to the ground underfoot
            (ContainerRef::Character(holder), ContainerRef::Location(loc)) => {
                if holder != actor_id {
                    return Err(Denial::refused("You are not holding that item.").into());
                }
                if actor.location != loc {
                    return Err(Denial::refused("You are not there.").into());
                }
                requested
            }
            // stashing into a container
            (ContainerRef::Character(holder), ContainerRef::Item(container_id)) => {
                if holder != actor_id {
                    return Err(Denial::refused("You are not holding that item.").into());
                }
                let container = require_item(self.store.as_ref(), container_id)?;
                self.check_container_reachable(&actor, &container)?;
                if matches!(container.container, ContainerRef::Item(_)) {
                    return Err(Denial::refused("That container is packed too deep.").into());
                }
                if item.is_container() {
                    return Err(
                        Denial::refused("A container cannot go inside another container.").into(),
                    );
                }
                self.container_capacity(&item, &container, requested)?
            }
            // hand-offs between characters only happen through trades
            (ContainerRef::Character(_), ContainerRef::Character(_)) => {
                return Err(Denial::refused(
                    "Items change hands through trades, not by shoving.",
                )
                .into());
            }
            // picking up from the ground
            (ContainerRef::Location(loc), ContainerRef::Character(taker)) => {
                if taker != actor_id {
                    return Err(Denial::refused("You can only pick things up for yourself.").into());
                }
                if actor.location != loc {
                    return Err(Denial::refused("You are not there.").into());
                }
                self.carry_capacity(cache, &actor, &item, requested)?
            }
            // pulling out of a container
            (ContainerRef::Item(container_id), ContainerRef::Character(taker)) => {
                if taker != actor_id {
                    return Err(Denial::refused("You can only pick things up for yourself.").into());
                }
                let container = require_item(self.store.as_ref(), container_id)?;
                self.check_container_reachable(&actor, &container)?;
                self.carry_capacity(cache, &actor, &item, requested)?
            }
            _ => {
                return Err(Denial::refused("You cannot move it there.").into());
            }
        };

        if allowed == 0 {
            return Err(Denial::NoRoom("None of it fits.".into()).into());
        }
        self.transfer(&item, dest, allowed, requested)
    }

    /// Ground pickup shortcut.
    pub fn collect_item(
        &self,
        cache: &mut BuffCache,
        actor_id: u64,
        item_id: u64,
    ) -> Result<MoveOutcome, GameError> {
        self.move_item(cache, actor_id, item_id, ContainerRef::Character(actor_id), None)
    }

    fn check_container_reachable(
        &self,
        actor: &CharacterRecord,
        container: &ItemRecord,
    ) -> Result<(), GameError> {
        let reachable = match container.container {
            ContainerRef::Character(holder) => holder == actor.id,
            ContainerRef::Location(loc) => loc == actor.location,
            ContainerRef::Item(_) => false,
        };
        if reachable {
            Ok(())
        } else {
            Err(Denial::refused("You cannot reach that container.").into())
        }
    }

    /// How many units fit into a container item. Errors outright when the
    /// container is already over capacity and the item has dimension.
    fn container_capacity(
        &self,
        item: &ItemRecord,
        container: &ItemRecord,
        requested: u64,
    ) -> Result<u64, GameError> {
        if !container.is_container() {
            return Err(Denial::refused("That is not a container.").into());
        }
        let contents = self.store.items_in(
            ContainerRef::Item(container.id),
            self.config.inventory.contents_query_limit,
        )?;
        let used_weight: u64 = contents.iter().map(|i| i.total_weight()).sum();
        let used_space: u64 = contents.iter().map(|i| i.total_space()).sum();
        let avail_weight = container.max_weight.map(|m| m as i64 - used_weight as i64);
        let avail_space = container.max_space.map(|m| m as i64 - used_space as i64);
        if item.has_dimension()
            && (avail_weight.map(|a| a < 0).unwrap_or(false)
                || avail_space.map(|a| a < 0).unwrap_or(false))
        {
            return Err(Denial::NoRoom("It is already overfull.".into()).into());
        }
        let mut allowed = requested;
        if item.unit_weight() > 0 {
            if let Some(avail) = avail_weight {
                allowed = allowed.min((avail.max(0) as u64) / item.unit_weight());
            }
        }
        if item.unit_space() > 0 {
            if let Some(avail) = avail_space {
                allowed = allowed.min((avail.max(0) as u64) / item.unit_space());
            }
        }
        Ok(allowed)
    }

    /// How many units the actor can still carry. A container item brings
    /// its contents' weight with it.
    fn carry_capacity(
        &self,
        cache: &mut BuffCache,
        actor: &CharacterRecord,
        item: &ItemRecord,
        requested: u64,
    ) -> Result<u64, GameError> {
        let strength = self.attributes.strength(cache, actor)?;
        let max = self.max_carry_weight(strength);
        let carried = self.carried_weight(actor)?;
        let avail = max as i64 - carried as i64;
        let mut per_unit = item.unit_weight();
        if item.is_container() {
            let contents = self.store.items_in(
                ContainerRef::Item(item.id),
                self.config.inventory.contents_query_limit,
            )?;
            // containers move as a whole, contents ride along
            per_unit += contents.iter().map(|i| i.total_weight()).sum::<u64>();
        }
        if per_unit == 0 {
            return Ok(requested);
        }
        if avail <= 0 {
            return Ok(0);
        }
        Ok(requested.min(avail as u64 / per_unit))
    }

    /// Move `allowed` units of `item` to `dest`. A partial move splits the
    /// stack inside a transaction so a concurrent change to the stack
    /// cannot duplicate units.
    fn transfer(
        &self,
        item: &ItemRecord,
        dest: ContainerRef,
        allowed: u64,
        requested: u64,
    ) -> Result<MoveOutcome, GameError> {
        let now = Utc::now();
        if allowed >= item.quantity {
            // allowed never exceeds requested, so this is the whole stack
            let mut moved = item.clone();
            moved.container = dest;
            moved.moved = Some(now);
            self.store.put_item(&moved)?;
            return Ok(MoveOutcome::Moved {
                item: moved.id,
                quantity: moved.quantity,
                partial: false,
            });
        }
        let split_id = self.store.allocate_id()?;
        let item_id = item.id;
        self.store.transaction(&mut |tx| {
            let mut source = require_item(tx, item_id)?;
            if source.quantity <= allowed {
                // the stack shrank under us; move what is left whole
                source.container = dest;
                source.moved = Some(now);
                tx.put_item(&source)?;
                return Ok(());
            }
            source.quantity -= allowed;
            tx.put_item(&source)?;
            let mut split = source.clone();
            split.id = split_id;
            split.quantity = allowed;
            split.container = dest;
            split.created = now;
            split.moved = Some(now);
            tx.put_item(&split)?;
            Ok(())
        })?;
        debug!("split {allowed} of item {item_id} into {split_id}");
        // report what landed at the destination
        if let Some(split) = self.store.get_item(split_id)? {
            Ok(MoveOutcome::Moved {
                item: split.id,
                quantity: split.quantity,
                partial: true,
            })
        } else {
            let moved = require_item(self.store.as_ref(), item_id)?;
            Ok(MoveOutcome::Moved {
                item: moved.id,
                quantity: moved.quantity,
                partial: moved.quantity < requested,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::EntityStore;
    use crate::types::CharacterKind;

    fn setup() -> (Arc<MemoryStore>, InventoryManager) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(GameConfig::default());
        let attributes = Arc::new(AttributeResolver::new(store.clone(), config.clone()));
        let inventory = InventoryManager::new(store.clone(), config, attributes);
        (store, inventory)
    }

    fn character_at(store: &MemoryStore, location: u64) -> CharacterRecord {
        let id = store.allocate_id().unwrap();
        let c = CharacterRecord::new(id, "Hale", CharacterKind::Player, location);
        store.put_character(&c).unwrap();
        c
    }

    fn item(store: &MemoryStore, name: &str, container: ContainerRef) -> ItemRecord {
        let id = store.allocate_id().unwrap();
        let rec = ItemRecord::new(id, name, container);
        store.put_item(&rec).unwrap();
        rec
    }

    #[test]
    fn equip_single_slot_replaces_occupant() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut old_helm = item(&store, "leather cap", ContainerRef::Character(c.id));
        old_helm.equip_affinity = Some("Helmet".into());
        store.put_item(&old_helm).unwrap();
        let mut new_helm = item(&store, "iron helm", ContainerRef::Character(c.id));
        new_helm.equip_affinity = Some("Helmet".into());
        store.put_item(&new_helm).unwrap();

        let mut cache = BuffCache::new();
        inv.equip(&mut cache, c.id, old_helm.id, EquipOptions::default()).unwrap();
        inv.equip(&mut cache, c.id, new_helm.id, EquipOptions::default()).unwrap();
        let c = store.get_character(c.id).unwrap().unwrap();
        assert_eq!(c.equipped(EquipSlot::Helmet), Some(new_helm.id));
        assert!(!c.is_equipped(old_helm.id));
    }

    #[test]
    fn ring_alias_picks_first_free_then_fills() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut cache = BuffCache::new();
        let mut rings = Vec::new();
        for name in ["gold ring", "silver ring", "copper ring"] {
            let mut r = item(&store, name, ContainerRef::Character(c.id));
            r.equip_affinity = Some("Ring".into());
            store.put_item(&r).unwrap();
            rings.push(r);
        }
        inv.equip(&mut cache, c.id, rings[0].id, EquipOptions::default()).unwrap();
        inv.equip(&mut cache, c.id, rings[1].id, EquipOptions::default()).unwrap();
        let err = inv
            .equip(&mut cache, c.id, rings[2].id, EquipOptions::default())
            .unwrap_err();
        assert!(matches!(err, GameError::Denied(Denial::SlotsFull)));
    }

    #[test]
    fn two_handed_occupies_both_hands() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut sword = item(&store, "claymore", ContainerRef::Character(c.id));
        sword.equip_affinity = Some("2Hands".into());
        store.put_item(&sword).unwrap();
        let mut cache = BuffCache::new();
        inv.equip(&mut cache, c.id, sword.id, EquipOptions::default()).unwrap();
        let c = store.get_character(c.id).unwrap().unwrap();
        assert_eq!(c.equipped(EquipSlot::LeftHand), Some(sword.id));
        assert_eq!(c.equipped(EquipSlot::RightHand), Some(sword.id));
    }

    #[test]
    fn strength_gate_blocks_weak_players() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut maul = item(&store, "great maul", ContainerRef::Character(c.id));
        maul.equip_affinity = Some("RightHand".into());
        maul.strength_requirement = Some(10.0);
        store.put_item(&maul).unwrap();
        let mut cache = BuffCache::new();
        let err = inv
            .equip(&mut cache, c.id, maul.id, EquipOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::Denied(Denial::InsufficientStrength { required: 10 })
        ));
        // the bypass used by spawners works
        inv.equip(
            &mut cache,
            c.id,
            maul.id,
            EquipOptions {
                skip_strength_check: true,
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn equipped_items_refuse_to_move() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut helm = item(&store, "helm", ContainerRef::Character(c.id));
        helm.equip_affinity = Some("Helmet".into());
        store.put_item(&helm).unwrap();
        let mut cache = BuffCache::new();
        inv.equip(&mut cache, c.id, helm.id, EquipOptions::default()).unwrap();
        let err = inv
            .move_item(&mut cache, c.id, helm.id, ContainerRef::Location(1), None)
            .unwrap_err();
        assert!(matches!(err, GameError::Denied(Denial::ItemEquipped)));
    }

    #[test]
    fn partial_move_splits_stack() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut arrows = item(&store, "arrows", ContainerRef::Character(c.id));
        arrows.quantity = 10;
        arrows.weight = Some(100);
        store.put_item(&arrows).unwrap();
        let mut quiver = item(&store, "quiver", ContainerRef::Character(c.id));
        quiver.max_weight = Some(350);
        quiver.max_space = Some(1000);
        store.put_item(&quiver).unwrap();

        let mut cache = BuffCache::new();
        let outcome = inv
            .move_item(&mut cache, c.id, arrows.id, ContainerRef::Item(quiver.id), None)
            .unwrap();
        match outcome {
            MoveOutcome::Moved {
                item: moved_id,
                quantity,
                partial,
            } => {
                assert_eq!(quantity, 3);
                assert!(partial);
                assert_ne!(moved_id, arrows.id);
                let split = store.get_item(moved_id).unwrap().unwrap();
                assert_eq!(split.container, ContainerRef::Item(quiver.id));
                let source = store.get_item(arrows.id).unwrap().unwrap();
                assert_eq!(source.quantity, 7);
            }
        }
    }

    #[test]
    fn no_room_at_all_is_an_error() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut anvil = item(&store, "anvil", ContainerRef::Character(c.id));
        anvil.weight = Some(5000);
        store.put_item(&anvil).unwrap();
        let mut pouch = item(&store, "pouch", ContainerRef::Character(c.id));
        pouch.max_weight = Some(1000);
        pouch.max_space = Some(10);
        store.put_item(&pouch).unwrap();
        let mut cache = BuffCache::new();
        let err = inv
            .move_item(&mut cache, c.id, anvil.id, ContainerRef::Item(pouch.id), None)
            .unwrap_err();
        assert!(matches!(err, GameError::Denied(Denial::NoRoom(_))));
    }

    #[test]
    fn character_to_character_is_forbidden() {
        let (store, inv) = setup();
        let a = character_at(&store, 1);
        let b = character_at(&store, 1);
        let coin = item(&store, "coin", ContainerRef::Character(a.id));
        let mut cache = BuffCache::new();
        let err = inv
            .move_item(&mut cache, a.id, coin.id, ContainerRef::Character(b.id), None)
            .unwrap_err();
        assert!(err.is_denial());
    }

    #[test]
    fn pickup_respects_carry_capacity() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        // strength 3.0 -> max carry 60kg
        let mut ore = item(&store, "iron ore", ContainerRef::Location(1));
        ore.quantity = 10;
        ore.weight = Some(25_000);
        store.put_item(&ore).unwrap();
        let mut cache = BuffCache::new();
        let outcome = inv.collect_item(&mut cache, c.id, ore.id).unwrap();
        match outcome {
            MoveOutcome::Moved { quantity, partial, .. } => {
                assert_eq!(quantity, 2);
                assert!(partial);
            }
        }
    }

    #[test]
    fn carried_weight_skips_worn_armor_but_not_held_weapons() {
        let (store, inv) = setup();
        let c = character_at(&store, 1);
        let mut cache = BuffCache::new();
        let mut plate = item(&store, "plate", ContainerRef::Character(c.id));
        plate.weight = Some(20_000);
        plate.equip_affinity = Some("Chest".into());
        store.put_item(&plate).unwrap();
        let mut sword = item(&store, "sword", ContainerRef::Character(c.id));
        sword.weight = Some(2_000);
        sword.equip_affinity = Some("RightHand".into());
        store.put_item(&sword).unwrap();
        inv.equip(&mut cache, c.id, plate.id, EquipOptions::default()).unwrap();
        inv.equip(&mut cache, c.id, sword.id, EquipOptions::default()).unwrap();
        let c = store.get_character(c.id).unwrap().unwrap();
        assert_eq!(inv.carried_weight(&c).unwrap(), 2_000);
    }
}
