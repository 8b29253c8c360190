//! Derived-attribute resolution.
//!
//! Base attributes live on the character record; buffs are separate
//! records attached to it. Resolution folds live buff effects over the
//! base value in storage order, percent effects scaling the running
//! total and additive effects shifting it. Expired buffs are deleted
//! lazily when a cache loads, never by a background job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::debug;

use crate::config::GameConfig;
use crate::errors::GameError;
use crate::store::{EntityStore, StoreHandle};
use crate::types::{
    AttributeField, BuffEffect, BuffEntry, BuffRecord, CharacterRecord, EquipSlot,
    BUFF_SCHEMA_VERSION, MAX_BUFF_ENTRIES,
};

/// Per-request buff cache. Callers own one for the lifetime of a request
/// and pass it to every resolution in that request; nothing is shared
/// across requests, so there is no instance-level state to go stale.
#[derive(Default)]
pub struct BuffCache {
    loaded: HashMap<u64, Vec<BuffRecord>>,
}

impl BuffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live buffs for `character`, loading (and lazily evicting expired
    /// rows) on first touch.
    pub fn buffs(
        &mut self,
        store: &dyn EntityStore,
        character: u64,
    ) -> Result<&[BuffRecord], GameError> {
        if !self.loaded.contains_key(&character) {
            let live = evict_expired(store, character)?;
            self.loaded.insert(character, live);
        }
        Ok(self.loaded.get(&character).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Forget a character so the next read refetches. Needed after awards.
    pub fn invalidate(&mut self, character: u64) {
        self.loaded.remove(&character);
    }
}

/// Delete expired buffs for `character` and return the survivors in
/// storage order. This is the only place buffs die.
pub fn evict_expired(
    store: &dyn EntityStore,
    character: u64,
) -> Result<Vec<BuffRecord>, GameError> {
    let now = Utc::now();
    let mut live = Vec::new();
    for buff in store.buffs_for(character)? {
        if buff.is_expired(now) {
            debug!("evicting expired buff {} ({})", buff.id, buff.name);
            store.delete_buff(buff.id)?;
        } else {
            live.push(buff);
        }
    }
    Ok(live)
}

/// Recipe for awarding one buff.
#[derive(Debug, Clone)]
pub struct BuffSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub entries: Vec<BuffEntry>,
    pub duration_secs: i64,
    /// How many instances of this name may be live at once
    pub max_count: usize,
}

impl BuffSpec {
    fn entry(field: AttributeField, effect: BuffEffect) -> BuffEntry {
        BuffEntry { field, effect }
    }
}

/// Adrenaline surge for landing a kill at full health.
pub fn pumped() -> BuffSpec {
    BuffSpec {
        name: "Pumped",
        description: "You're pumped from your last kill!",
        entries: vec![
            BuffSpec::entry(AttributeField::Strength, BuffEffect::Percent(10.0)),
            BuffSpec::entry(AttributeField::Dexterity, BuffEffect::Percent(10.0)),
            BuffSpec::entry(AttributeField::Intelligence, BuffEffect::Percent(5.0)),
        ],
        duration_secs: 60,
        max_count: 3,
    }
}

pub fn well_rested() -> BuffSpec {
    BuffSpec {
        name: "Well Rested",
        description: "A good night's sleep has you sharp.",
        entries: vec![
            BuffSpec::entry(AttributeField::Strength, BuffEffect::Percent(5.0)),
            BuffSpec::entry(AttributeField::Intelligence, BuffEffect::Percent(5.0)),
        ],
        duration_secs: 60 * 60,
        max_count: 1,
    }
}

pub fn drunk() -> BuffSpec {
    BuffSpec {
        name: "Drunk",
        description: "Everything is funnier and harder to hit.",
        entries: vec![
            BuffSpec::entry(AttributeField::Strength, BuffEffect::Percent(5.0)),
            BuffSpec::entry(AttributeField::Dexterity, BuffEffect::Percent(-10.0)),
            BuffSpec::entry(AttributeField::Intelligence, BuffEffect::Percent(-10.0)),
        ],
        duration_secs: 20 * 60,
        max_count: 5,
    }
}

pub fn sick() -> BuffSpec {
    BuffSpec {
        name: "Sick",
        description: "You feel awful.",
        entries: vec![
            BuffSpec::entry(AttributeField::Strength, BuffEffect::Percent(-15.0)),
            BuffSpec::entry(AttributeField::Dexterity, BuffEffect::Percent(-15.0)),
        ],
        duration_secs: 2 * 60 * 60,
        max_count: 1,
    }
}

pub struct AttributeResolver {
    store: StoreHandle,
    config: Arc<GameConfig>,
}

impl AttributeResolver {
    pub fn new(store: StoreHandle, config: Arc<GameConfig>) -> Self {
        Self { store, config }
    }

    /// Fold live buffs over `base` for one attribute, in storage order,
    /// then clamp to the configured floor.
    pub fn effective_value(
        &self,
        cache: &mut BuffCache,
        character: &CharacterRecord,
        field: AttributeField,
        base: f64,
    ) -> Result<f64, GameError> {
        let mut value = base;
        for buff in cache.buffs(self.store.as_ref(), character.id)? {
            for effect in buff.effects_on(field) {
                value = effect.apply(value);
            }
        }
        Ok(value.max(self.config.attributes.min_attribute))
    }

    pub fn strength(
        &self,
        cache: &mut BuffCache,
        character: &CharacterRecord,
    ) -> Result<f64, GameError> {
        self.effective_value(cache, character, AttributeField::Strength, character.strength)
    }

    pub fn intelligence(
        &self,
        cache: &mut BuffCache,
        character: &CharacterRecord,
    ) -> Result<f64, GameError> {
        self.effective_value(
            cache,
            character,
            AttributeField::Intelligence,
            character.intelligence,
        )
    }

    /// Dexterity additionally pays each equipped item's percent penalty
    /// after buffs, then clamps again.
    pub fn dexterity(
        &self,
        cache: &mut BuffCache,
        character: &CharacterRecord,
    ) -> Result<f64, GameError> {
        let mut dex = self.effective_value(
            cache,
            character,
            AttributeField::Dexterity,
            character.dexterity,
        )?;
        let mut seen = Vec::new();
        for slot in EquipSlot::ALL {
            let Some(item_id) = character.equipped(slot) else {
                continue;
            };
            // a two-handed item occupies two slots but penalizes once
            if seen.contains(&item_id) {
                continue;
            }
            seen.push(item_id);
            if let Some(item) = self.store.get_item(item_id)? {
                if let Some(penalty) = item.dexterity_penalty {
                    dex -= dex * (penalty / 100.0);
                }
            }
        }
        Ok(dex.max(self.config.attributes.min_attribute))
    }

    /// Attach one instance of `spec` to `character`. Returns None without
    /// writing anything once the per-name cap is reached.
    pub fn award_buff(
        &self,
        cache: &mut BuffCache,
        character: u64,
        spec: &BuffSpec,
    ) -> Result<Option<BuffRecord>, GameError> {
        if spec.entries.len() > MAX_BUFF_ENTRIES {
            return Err(GameError::invariant(format!(
                "buff {} carries {} effects, limit is {MAX_BUFF_ENTRIES}",
                spec.name,
                spec.entries.len()
            )));
        }
        let existing = cache
            .buffs(self.store.as_ref(), character)?
            .iter()
            .filter(|b| b.name == spec.name)
            .count();
        if existing >= spec.max_count {
            debug!("buff {} at cap ({existing}) for character {character}", spec.name);
            return Ok(None);
        }
        let buff = BuffRecord {
            id: self.store.allocate_id()?,
            parent: character,
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            entries: spec.entries.clone(),
            expiry: Utc::now() + Duration::seconds(spec.duration_secs),
            schema_version: BUFF_SCHEMA_VERSION,
        };
        self.store.put_buff(&buff)?;
        cache.invalidate(character);
        Ok(Some(buff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{CharacterKind, ContainerRef, ItemRecord};

    fn resolver() -> (Arc<MemoryStore>, AttributeResolver) {
        let store = Arc::new(MemoryStore::new());
        let resolver = AttributeResolver::new(store.clone(), Arc::new(GameConfig::default()));
        (store, resolver)
    }

    fn character(store: &MemoryStore) -> CharacterRecord {
        let id = store.allocate_id().unwrap();
        let c = CharacterRecord::new(id, "Vex", CharacterKind::Player, 1);
        store.put_character(&c).unwrap();
        c
    }

    fn attach_buff(
        store: &MemoryStore,
        parent: u64,
        field: AttributeField,
        effect: BuffEffect,
        secs: i64,
    ) {
        let buff = BuffRecord {
            id: store.allocate_id().unwrap(),
            parent,
            name: "test".into(),
            description: String::new(),
            entries: vec![BuffEntry { field, effect }],
            expiry: Utc::now() + Duration::seconds(secs),
            schema_version: BUFF_SCHEMA_VERSION,
        };
        store.put_buff(&buff).unwrap();
    }

    #[test]
    fn composition_runs_in_storage_order() {
        let (store, resolver) = resolver();
        let mut c = character(&store);
        c.strength = 10.0;
        // +10% first, +1 second: 10 -> 11 -> 12 (order matters)
        attach_buff(&store, c.id, AttributeField::Strength, BuffEffect::Percent(10.0), 60);
        attach_buff(&store, c.id, AttributeField::Strength, BuffEffect::Add(1.0), 60);
        let mut cache = BuffCache::new();
        let v = resolver.strength(&mut cache, &c).unwrap();
        assert!((v - 12.0).abs() < 1e-9);
    }

    #[test]
    fn expired_buffs_are_deleted_on_read() {
        let (store, resolver) = resolver();
        let c = character(&store);
        attach_buff(&store, c.id, AttributeField::Strength, BuffEffect::Add(5.0), -1);
        let mut cache = BuffCache::new();
        let v = resolver.strength(&mut cache, &c).unwrap();
        assert_eq!(v, 3.0);
        assert!(store.buffs_for(c.id).unwrap().is_empty());
    }

    #[test]
    fn resolved_attributes_never_drop_below_floor() {
        let (store, resolver) = resolver();
        let mut c = character(&store);
        c.intelligence = 3.0;
        attach_buff(
            &store,
            c.id,
            AttributeField::Intelligence,
            BuffEffect::Add(-10.0),
            60,
        );
        let mut cache = BuffCache::new();
        assert_eq!(resolver.intelligence(&mut cache, &c).unwrap(), 2.0);
    }

    #[test]
    fn dexterity_pays_equip_penalties_once_per_item() {
        let (store, resolver) = resolver();
        let mut c = character(&store);
        c.dexterity = 10.0;
        let item_id = store.allocate_id().unwrap();
        let mut armor = ItemRecord::new(item_id, "tower shield", ContainerRef::Character(c.id));
        armor.dexterity_penalty = Some(20.0);
        store.put_item(&armor).unwrap();
        c.equipment.insert(EquipSlot::LeftHand, item_id);
        c.equipment.insert(EquipSlot::RightHand, item_id);
        store.put_character(&c).unwrap();
        let mut cache = BuffCache::new();
        let dex = resolver.dexterity(&mut cache, &c).unwrap();
        // one 20% penalty, not two
        assert!((dex - 8.0).abs() < 1e-9);
    }

    #[test]
    fn award_buff_respects_per_name_cap() {
        let (store, resolver) = resolver();
        let c = character(&store);
        let spec = pumped();
        let mut cache = BuffCache::new();
        for _ in 0..spec.max_count {
            assert!(resolver.award_buff(&mut cache, c.id, &spec).unwrap().is_some());
        }
        assert!(resolver.award_buff(&mut cache, c.id, &spec).unwrap().is_none());
        assert_eq!(store.buffs_for(c.id).unwrap().len(), spec.max_count);
    }
}
