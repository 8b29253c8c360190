//! Sled-backed [`EntityStore`] backend.
//!
//! One tree per record type, keys are big-endian ids so scans come back in
//! id order, values are bincode. Transactions hold an exclusive lock and
//! keep an undo log of prior values; an error replays the log in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ::sled::{Config, Db, Tree};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{GameError, StoreError};
use crate::store::EntityStore;
use crate::types::{
    BuffRecord, CharacterRecord, ContainerRef, DiscoveryRecord, ItemRecord, LocationRecord,
    PathRecord, SaleListingRecord, TradeRecord, TradeState, BUFF_SCHEMA_VERSION,
    CHARACTER_SCHEMA_VERSION, DISCOVERY_SCHEMA_VERSION, ITEM_SCHEMA_VERSION,
    LISTING_SCHEMA_VERSION, LOCATION_SCHEMA_VERSION, PATH_SCHEMA_VERSION, TRADE_SCHEMA_VERSION,
};

const TREE_CHARACTERS: &str = "characters";
const TREE_ITEMS: &str = "items";
const TREE_LOCATIONS: &str = "locations";
const TREE_PATHS: &str = "paths";
const TREE_BUFFS: &str = "buffs";
const TREE_TRADES: &str = "trades";
const TREE_LISTINGS: &str = "listings";
const TREE_DISCOVERIES: &str = "discoveries";

struct UndoEntry {
    tree: &'static str,
    key: [u8; 8],
    prior: Option<Vec<u8>>,
}

pub struct SledStore {
    db: Db,
    characters: Tree,
    items: Tree,
    locations: Tree,
    paths: Tree,
    buffs: Tree,
    trades: Tree,
    listings: Tree,
    discoveries: Tree,
    undo: Mutex<Vec<UndoEntry>>,
    tx_active: AtomicBool,
    tx_lock: Mutex<()>,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = ::sled::open(path)?;
        Self::from_db(db)
    }

    /// Ephemeral store for tests and tools; nothing survives drop.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let characters = db.open_tree(TREE_CHARACTERS)?;
        let items = db.open_tree(TREE_ITEMS)?;
        let locations = db.open_tree(TREE_LOCATIONS)?;
        let paths = db.open_tree(TREE_PATHS)?;
        let buffs = db.open_tree(TREE_BUFFS)?;
        let trades = db.open_tree(TREE_TRADES)?;
        let listings = db.open_tree(TREE_LISTINGS)?;
        let discoveries = db.open_tree(TREE_DISCOVERIES)?;
        debug!("sled store opened, {} characters", characters.len());
        Ok(Self {
            db,
            characters,
            items,
            locations,
            paths,
            buffs,
            trades,
            listings,
            discoveries,
            undo: Mutex::new(Vec::new()),
            tx_active: AtomicBool::new(false),
            tx_lock: Mutex::new(()),
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, name: &str) -> &Tree {
        match name {
            TREE_CHARACTERS => &self.characters,
            TREE_ITEMS => &self.items,
            TREE_LOCATIONS => &self.locations,
            TREE_PATHS => &self.paths,
            TREE_BUFFS => &self.buffs,
            TREE_TRADES => &self.trades,
            TREE_LISTINGS => &self.listings,
            TREE_DISCOVERIES => &self.discoveries,
            _ => unreachable!("unknown tree {name}"),
        }
    }

    fn record_undo(&self, tree_name: &'static str, key: [u8; 8]) -> Result<(), StoreError> {
        if !self.tx_active.load(Ordering::Acquire) {
            return Ok(());
        }
        let prior = self.tree(tree_name).get(key)?.map(|v| v.to_vec());
        self.undo
            .lock()
            .map_err(|_| StoreError::Corrupt("undo log poisoned".into()))?
            .push(UndoEntry {
                tree: tree_name,
                key,
                prior,
            });
        Ok(())
    }

    fn put_record<T: Serialize>(
        &self,
        tree_name: &'static str,
        id: u64,
        rec: &T,
    ) -> Result<(), StoreError> {
        let key = id.to_be_bytes();
        self.record_undo(tree_name, key)?;
        let bytes = bincode::serialize(rec)?;
        self.tree(tree_name).insert(key, bytes)?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(
        &self,
        tree_name: &'static str,
        id: u64,
    ) -> Result<Option<T>, StoreError> {
        match self.tree(tree_name).get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_record(&self, tree_name: &'static str, id: u64) -> Result<(), StoreError> {
        let key = id.to_be_bytes();
        self.record_undo(tree_name, key)?;
        self.tree(tree_name).remove(key)?;
        Ok(())
    }

    /// Scan a whole tree in key order, stopping once `take` accepted records
    /// hit `limit`.
    fn scan<T, F>(
        &self,
        tree_name: &'static str,
        limit: usize,
        mut keep: F,
    ) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.tree(tree_name).iter() {
            let (_, bytes) = entry?;
            let rec: T = bincode::deserialize(&bytes)?;
            if keep(&rec) {
                out.push(rec);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn check_schema(
        entity: &str,
        expected: u32,
        found: u32,
    ) -> Result<(), StoreError> {
        if expected == found {
            Ok(())
        } else {
            Err(StoreError::SchemaMismatch {
                entity: entity.to_string(),
                expected,
                found,
            })
        }
    }

    fn rollback(&self) {
        let mut log = match self.undo.lock() {
            Ok(l) => l,
            Err(_) => {
                warn!("undo log poisoned during rollback; store state is suspect");
                return;
            }
        };
        while let Some(entry) = log.pop() {
            let tree = self.tree(entry.tree);
            let result = match entry.prior {
                Some(bytes) => tree.insert(entry.key, bytes).map(|_| ()),
                None => tree.remove(entry.key).map(|_| ()),
            };
            if let Err(e) = result {
                warn!("rollback write failed on {}: {e}", entry.tree);
            }
        }
    }
}

impl EntityStore for SledStore {
    fn allocate_id(&self) -> Result<u64, StoreError> {
        // sled's internal id generator is monotonic and crash-safe
        Ok(self.db.generate_id()? + 1)
    }

    fn get_character(&self, id: u64) -> Result<Option<CharacterRecord>, StoreError> {
        let rec: Option<CharacterRecord> = self.get_record(TREE_CHARACTERS, id)?;
        if let Some(ref c) = rec {
            Self::check_schema("character", CHARACTER_SCHEMA_VERSION, c.schema_version)?;
        }
        Ok(rec)
    }

    fn put_character(&self, rec: &CharacterRecord) -> Result<(), StoreError> {
        self.put_record(TREE_CHARACTERS, rec.id, rec)
    }

    fn delete_character(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_CHARACTERS, id)
    }

    fn get_item(&self, id: u64) -> Result<Option<ItemRecord>, StoreError> {
        let rec: Option<ItemRecord> = self.get_record(TREE_ITEMS, id)?;
        if let Some(ref i) = rec {
            Self::check_schema("item", ITEM_SCHEMA_VERSION, i.schema_version)?;
        }
        Ok(rec)
    }

    fn put_item(&self, rec: &ItemRecord) -> Result<(), StoreError> {
        self.put_record(TREE_ITEMS, rec.id, rec)
    }

    fn delete_item(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_ITEMS, id)
    }

    fn get_location(&self, id: u64) -> Result<Option<LocationRecord>, StoreError> {
        let rec: Option<LocationRecord> = self.get_record(TREE_LOCATIONS, id)?;
        if let Some(ref l) = rec {
            Self::check_schema("location", LOCATION_SCHEMA_VERSION, l.schema_version)?;
        }
        Ok(rec)
    }

    fn put_location(&self, rec: &LocationRecord) -> Result<(), StoreError> {
        self.put_record(TREE_LOCATIONS, rec.id, rec)
    }

    fn delete_location(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_LOCATIONS, id)
    }

    fn get_path(&self, id: u64) -> Result<Option<PathRecord>, StoreError> {
        let rec: Option<PathRecord> = self.get_record(TREE_PATHS, id)?;
        if let Some(ref p) = rec {
            Self::check_schema("path", PATH_SCHEMA_VERSION, p.schema_version)?;
        }
        Ok(rec)
    }

    fn put_path(&self, rec: &PathRecord) -> Result<(), StoreError> {
        self.put_record(TREE_PATHS, rec.id, rec)
    }

    fn delete_path(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_PATHS, id)
    }

    fn get_buff(&self, id: u64) -> Result<Option<BuffRecord>, StoreError> {
        let rec: Option<BuffRecord> = self.get_record(TREE_BUFFS, id)?;
        if let Some(ref b) = rec {
            Self::check_schema("buff", BUFF_SCHEMA_VERSION, b.schema_version)?;
        }
        Ok(rec)
    }

    fn put_buff(&self, rec: &BuffRecord) -> Result<(), StoreError> {
        self.put_record(TREE_BUFFS, rec.id, rec)
    }

    fn delete_buff(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_BUFFS, id)
    }

    fn get_trade(&self, id: u64) -> Result<Option<TradeRecord>, StoreError> {
        let rec: Option<TradeRecord> = self.get_record(TREE_TRADES, id)?;
        if let Some(ref t) = rec {
            Self::check_schema("trade", TRADE_SCHEMA_VERSION, t.schema_version)?;
        }
        Ok(rec)
    }

    fn put_trade(&self, rec: &TradeRecord) -> Result<(), StoreError> {
        self.put_record(TREE_TRADES, rec.id, rec)
    }

    fn get_listing(&self, id: u64) -> Result<Option<SaleListingRecord>, StoreError> {
        let rec: Option<SaleListingRecord> = self.get_record(TREE_LISTINGS, id)?;
        if let Some(ref l) = rec {
            Self::check_schema("listing", LISTING_SCHEMA_VERSION, l.schema_version)?;
        }
        Ok(rec)
    }

    fn put_listing(&self, rec: &SaleListingRecord) -> Result<(), StoreError> {
        self.put_record(TREE_LISTINGS, rec.id, rec)
    }

    fn delete_listing(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_LISTINGS, id)
    }

    fn get_discovery(&self, id: u64) -> Result<Option<DiscoveryRecord>, StoreError> {
        let rec: Option<DiscoveryRecord> = self.get_record(TREE_DISCOVERIES, id)?;
        if let Some(ref d) = rec {
            Self::check_schema("discovery", DISCOVERY_SCHEMA_VERSION, d.schema_version)?;
        }
        Ok(rec)
    }

    fn put_discovery(&self, rec: &DiscoveryRecord) -> Result<(), StoreError> {
        self.put_record(TREE_DISCOVERIES, rec.id, rec)
    }

    fn delete_discovery(&self, id: u64) -> Result<(), StoreError> {
        self.delete_record(TREE_DISCOVERIES, id)
    }

    fn items_in(
        &self,
        container: ContainerRef,
        limit: usize,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        self.scan(TREE_ITEMS, limit, |i: &ItemRecord| i.container == container)
    }

    fn characters_at(
        &self,
        location: u64,
        limit: usize,
    ) -> Result<Vec<CharacterRecord>, StoreError> {
        self.scan(TREE_CHARACTERS, limit, |c: &CharacterRecord| {
            c.location == location
        })
    }

    fn characters_in_party(
        &self,
        code: &str,
        limit: usize,
    ) -> Result<Vec<CharacterRecord>, StoreError> {
        self.scan(TREE_CHARACTERS, limit, |c: &CharacterRecord| {
            c.party_code.as_deref() == Some(code)
        })
    }

    fn characters_carried_by(&self, carrier: u64) -> Result<Vec<CharacterRecord>, StoreError> {
        self.scan(TREE_CHARACTERS, usize::MAX, |c: &CharacterRecord| {
            c.carried_by == Some(carrier)
        })
    }

    fn buffs_for(&self, parent: u64) -> Result<Vec<BuffRecord>, StoreError> {
        self.scan(TREE_BUFFS, usize::MAX, |b: &BuffRecord| b.parent == parent)
    }

    fn paths_at(&self, location: u64, limit: usize) -> Result<Vec<PathRecord>, StoreError> {
        self.scan(TREE_PATHS, limit, |p: &PathRecord| {
            p.location1 == location || p.location2 == location
        })
    }

    fn listings_for_item(&self, item: u64) -> Result<Vec<SaleListingRecord>, StoreError> {
        self.scan(TREE_LISTINGS, usize::MAX, |l: &SaleListingRecord| {
            l.item == item
        })
    }

    fn discovery_of(
        &self,
        character: u64,
        path: u64,
    ) -> Result<Option<DiscoveryRecord>, StoreError> {
        Ok(self
            .scan(TREE_DISCOVERIES, 1, |d: &DiscoveryRecord| {
                d.character == character && d.path == path
            })?
            .pop())
    }

    fn discoveries_for_path(
        &self,
        path: u64,
        limit: usize,
    ) -> Result<Vec<DiscoveryRecord>, StoreError> {
        self.scan(TREE_DISCOVERIES, limit, |d: &DiscoveryRecord| d.path == path)
    }

    fn open_trade_for(&self, character: u64) -> Result<Option<TradeRecord>, StoreError> {
        Ok(self
            .scan(TREE_TRADES, 1, |t: &TradeRecord| {
                t.state == TradeState::Open && t.involves(character)
            })?
            .pop())
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
        let outcome = body(self);
        if outcome.is_err() {
            self.rollback();
        } else if let Ok(mut log) = self.undo.lock() {
            log.clear();
        }
        self.tx_active.store(false, Ordering::Release);
        outcome
    }
}
