//! In-memory [`EntityStore`] backend.
//!
//! Tables are `BTreeMap`s keyed by id, so every scan comes back in id
//! order. Transactions snapshot the whole table set and restore it on
//! error; they are serialized against each other by a dedicated mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{GameError, StoreError};
use crate::store::EntityStore;
use crate::types::{
    BuffRecord, CharacterRecord, ContainerRef, DiscoveryRecord, ItemRecord, LocationRecord,
    PathRecord, SaleListingRecord, TradeRecord, TradeState,
};

#[derive(Default, Clone)]
struct Tables {
    characters: BTreeMap<u64, CharacterRecord>,
    items: BTreeMap<u64, ItemRecord>,
    locations: BTreeMap<u64, LocationRecord>,
    paths: BTreeMap<u64, PathRecord>,
    buffs: BTreeMap<u64, BuffRecord>,
    trades: BTreeMap<u64, TradeRecord>,
    listings: BTreeMap<u64, SaleListingRecord>,
    discoveries: BTreeMap<u64, DiscoveryRecord>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    tx_active: AtomicBool,
    tx_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
            tx_active: AtomicBool::new(false),
            tx_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Corrupt("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Corrupt("store lock poisoned".into()))
    }
}

impl EntityStore for MemoryStore {
    fn allocate_id(&self) -> Result<u64, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn get_character(&self, id: u64) -> Result<Option<CharacterRecord>, StoreError> {
        Ok(self.read()?.characters.get(&id).cloned())
    }

    fn put_character(&self, rec: &CharacterRecord) -> Result<(), StoreError> {
        self.write()?.characters.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_character(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.characters.remove(&id);
        Ok(())
    }

    fn get_item(&self, id: u64) -> Result<Option<ItemRecord>, StoreError> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    fn put_item(&self, rec: &ItemRecord) -> Result<(), StoreError> {
        self.write()?.items.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_item(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.items.remove(&id);
        Ok(())
    }

    fn get_location(&self, id: u64) -> Result<Option<LocationRecord>, StoreError> {
        Ok(self.read()?.locations.get(&id).cloned())
    }

    fn put_location(&self, rec: &LocationRecord) -> Result<(), StoreError> {
        self.write()?.locations.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_location(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.locations.remove(&id);
        Ok(())
    }

    fn get_path(&self, id: u64) -> Result<Option<PathRecord>, StoreError> {
        Ok(self.read()?.paths.get(&id).cloned())
    }

    fn put_path(&self, rec: &PathRecord) -> Result<(), StoreError> {
        self.write()?.paths.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_path(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.paths.remove(&id);
        Ok(())
    }

    fn get_buff(&self, id: u64) -> Result<Option<BuffRecord>, StoreError> {
        Ok(self.read()?.buffs.get(&id).cloned())
    }

    fn put_buff(&self, rec: &BuffRecord) -> Result<(), StoreError> {
        self.write()?.buffs.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_buff(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.buffs.remove(&id);
        Ok(())
    }

    fn get_trade(&self, id: u64) -> Result<Option<TradeRecord>, StoreError> {
        Ok(self.read()?.trades.get(&id).cloned())
    }

    fn put_trade(&self, rec: &TradeRecord) -> Result<(), StoreError> {
        self.write()?.trades.insert(rec.id, rec.clone());
        Ok(())
    }

    fn get_listing(&self, id: u64) -> Result<Option<SaleListingRecord>, StoreError> {
        Ok(self.read()?.listings.get(&id).cloned())
    }

    fn put_listing(&self, rec: &SaleListingRecord) -> Result<(), StoreError> {
        self.write()?.listings.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_listing(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.listings.remove(&id);
        Ok(())
    }

    fn get_discovery(&self, id: u64) -> Result<Option<DiscoveryRecord>, StoreError> {
        Ok(self.read()?.discoveries.get(&id).cloned())
    }

    fn put_discovery(&self, rec: &DiscoveryRecord) -> Result<(), StoreError> {
        self.write()?.discoveries.insert(rec.id, rec.clone());
        Ok(())
    }

    fn delete_discovery(&self, id: u64) -> Result<(), StoreError> {
        self.write()?.discoveries.remove(&id);
        Ok(())
    }

    fn items_in(
        &self,
        container: ContainerRef,
        limit: usize,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        Ok(self
            .read()?
            .items
            .values()
            .filter(|i| i.container == container)
            .take(limit)
            .cloned()
            .collect())
    }

    fn characters_at(
        &self,
        location: u64,
        limit: usize,
    ) -> Result<Vec<CharacterRecord>, StoreError> {
        Ok(self
            .read()?
            .characters
            .values()
            .filter(|c| c.location == location)
            .take(limit)
            .cloned()
            .collect())
    }

    fn characters_in_party(
        &self,
        code: &str,
        limit: usize,
    ) -> Result<Vec<CharacterRecord>, StoreError> {
        Ok(self
            .read()?
            .characters
            .values()
            .filter(|c| c.party_code.as_deref() == Some(code))
            .take(limit)
            .cloned()
            .collect())
    }

    fn characters_carried_by(&self, carrier: u64) -> Result<Vec<CharacterRecord>, StoreError> {
        Ok(self
            .read()?
            .characters
            .values()
            .filter(|c| c.carried_by == Some(carrier))
            .cloned()
            .collect())
    }

    fn buffs_for(&self, parent: u64) -> Result<Vec<BuffRecord>, StoreError> {
        Ok(self
            .read()?
            .buffs
            .values()
            .filter(|b| b.parent == parent)
            .cloned()
            .collect())
    }

    fn paths_at(&self, location: u64, limit: usize) -> Result<Vec<PathRecord>, StoreError> {
        Ok(self
            .read()?
            .paths
            .values()
            .filter(|p| p.location1 == location || p.location2 == location)
            .take(limit)
            .cloned()
            .collect())
    }

    fn listings_for_item(&self, item: u64) -> Result<Vec<SaleListingRecord>, StoreError> {
        Ok(self
            .read()?
            .listings
            .values()
            .filter(|l| l.item == item)
            .cloned()
            .collect())
    }

    fn discovery_of(
        &self,
        character: u64,
        path: u64,
    ) -> Result<Option<DiscoveryRecord>, StoreError> {
        Ok(self
            .read()?
            .discoveries
            .values()
            .find(|d| d.character == character && d.path == path)
            .cloned())
    }

    fn discoveries_for_path(
        &self,
        path: u64,
        limit: usize,
    ) -> Result<Vec<DiscoveryRecord>, StoreError> {
        Ok(self
            .read()?
            .discoveries
            .values()
            .filter(|d| d.path == path)
            .take(limit)
            .cloned()
            .collect())
    }

    fn open_trade_for(&self, character: u64) -> Result<Option<TradeRecord>, StoreError> {
        Ok(self
            .read()?
            .trades
            .values()
            .find(|t| t.state == TradeState::Open && t.involves(character))
            .cloned())
    }

    fn transaction(
        &self,
        body: &mut dyn FnMut(&dyn EntityStore) -> Result<(), GameError>,
    ) -> Result<(), GameError> {
        // A nested call would deadlock on tx_lock; catch it first. The flag
        // is only ever set by the thread holding tx_lock.
        if self.tx_active.load(Ordering::Acquire) {
            return Err(GameError::invariant("nested store transaction"));
        }
        let _guard = self
            .tx_lock
            .lock()
            .map_err(|_| StoreError::Corrupt("transaction lock poisoned".into()))
            .map_err(GameError::from)?;
        self.tx_active.store(true, Ordering::Release);
        let snapshot = self.read().map_err(GameError::from)?.clone();
        let outcome = body(self);
        if outcome.is_err() {
            *self.write().map_err(GameError::from)? = snapshot;
        }
        self.tx_active.store(false, Ordering::Release);
        outcome
    }
}
