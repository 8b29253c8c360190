//! Shared scaffolding for the integration tests: an in-memory world with
//! every engine wired the way a deployment would wire them.

#![allow(dead_code)]

use std::sync::Arc;

use duskhollow::attributes::AttributeResolver;
use duskhollow::cache::MemoryCache;
use duskhollow::combat::CombatEngine;
use duskhollow::config::GameConfig;
use duskhollow::content::FixedDamageOracle;
use duskhollow::inventory::InventoryManager;
use duskhollow::movement::{BlockadeResolver, MovementEngine, OpenRoads};
use duskhollow::notify::RecordingNotifier;
use duskhollow::party::PartyCoordinator;
use duskhollow::store::memory::MemoryStore;
use duskhollow::store::EntityStore;
use duskhollow::trade::TradeEngine;
use duskhollow::types::{
    CharacterKind, CharacterRecord, ContainerRef, DamageType, ItemRecord, LocationKind,
    LocationRecord, PathKind, PathRecord, WeaponProfile,
};

pub struct TestWorld {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: Arc<GameConfig>,
    pub attributes: Arc<AttributeResolver>,
    pub parties: Arc<PartyCoordinator>,
    pub inventory: Arc<InventoryManager>,
    pub combat: CombatEngine,
    pub trade: TradeEngine,
    pub movement: MovementEngine,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_blockades(Arc::new(OpenRoads))
    }

    pub fn with_blockades(blockades: Arc<dyn BlockadeResolver>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let config = Arc::new(GameConfig::default());
        let attributes = Arc::new(AttributeResolver::new(store.clone(), config.clone()));
        let parties = Arc::new(PartyCoordinator::new(store.clone(), config.clone()));
        let inventory = Arc::new(InventoryManager::new(
            store.clone(),
            config.clone(),
            attributes.clone(),
        ));
        let combat = CombatEngine::new(
            store.clone(),
            cache.clone(),
            notifier.clone(),
            Arc::new(FixedDamageOracle),
            attributes.clone(),
            parties.clone(),
            inventory.clone(),
            config.clone(),
        );
        let trade = TradeEngine::new(store.clone(), notifier.clone());
        let movement = MovementEngine::new(
            store.clone(),
            notifier.clone(),
            parties.clone(),
            blockades,
            config.clone(),
        );
        Self {
            store,
            cache,
            notifier,
            config,
            attributes,
            parties,
            inventory,
            combat,
            trade,
            movement,
        }
    }

    pub fn location(&self, name: &str, kind: LocationKind) -> LocationRecord {
        let id = self.store.allocate_id().unwrap();
        let loc = LocationRecord::new(id, name, kind);
        self.store.put_location(&loc).unwrap();
        loc
    }

    pub fn path(&self, kind: PathKind, a: u64, b: u64) -> PathRecord {
        let id = self.store.allocate_id().unwrap();
        let path = PathRecord::new(id, "way", kind, a, b);
        self.store.put_path(&path).unwrap();
        path
    }

    pub fn player(&self, name: &str, location: u64) -> CharacterRecord {
        let id = self.store.allocate_id().unwrap();
        let mut c = CharacterRecord::new(id, name, CharacterKind::Player, location);
        c.hitpoints = 40.0;
        c.max_hitpoints = 40.0;
        self.store.put_character(&c).unwrap();
        c
    }

    pub fn npc(&self, name: &str, location: u64, hitpoints: f64) -> CharacterRecord {
        let id = self.store.allocate_id().unwrap();
        let mut c = CharacterRecord::new(id, name, CharacterKind::Npc, location);
        c.hitpoints = hitpoints;
        c.max_hitpoints = hitpoints;
        self.store.put_character(&c).unwrap();
        c
    }

    /// Create a weapon in a character's inventory and wield it.
    pub fn arm(&self, holder: u64, name: &str, max_damage: f64) -> ItemRecord {
        let id = self.store.allocate_id().unwrap();
        let mut weapon = ItemRecord::new(id, name, ContainerRef::Character(holder));
        weapon.equip_affinity = Some("RightHand".into());
        weapon.weapon = Some(WeaponProfile {
            damage_formula: String::new(),
            max_damage,
            damage_types: vec![DamageType::Slashing],
            crit_chance: 0.0,
            crit_multiplier: None,
        });
        self.store.put_item(&weapon).unwrap();
        let mut holder_rec = self.store.get_character(holder).unwrap().unwrap();
        holder_rec
            .equipment
            .insert(duskhollow::types::EquipSlot::RightHand, id);
        self.store.put_character(&holder_rec).unwrap();
        weapon
    }

    pub fn item_held_by(&self, holder: u64, name: &str) -> ItemRecord {
        let id = self.store.allocate_id().unwrap();
        let item = ItemRecord::new(id, name, ContainerRef::Character(holder));
        self.store.put_item(&item).unwrap();
        item
    }
}
