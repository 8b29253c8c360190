//! Entity persistence behind a narrow trait.
//!
//! The production deployment supplies its own datastore; the engines only
//! see [`EntityStore`]. Two reference backends ship with the crate:
//! [`memory::MemoryStore`] for tests and [`sled::SledStore`] for an
//! embedded single-process world.
//!
//! Semantics the engines rely on:
//! - ids ascend in allocation order and are never reused, so "storage
//!   order" means ascending id;
//! - single-record puts are last-writer-wins;
//! - [`EntityStore::transaction`] runs its body exclusively and rolls every
//!   write back if the body errors. Transactions do not nest.

pub mod memory;
pub mod sled;

use std::sync::Arc;

use crate::errors::{GameError, StoreError};
use crate::types::{
    BuffRecord, CharacterKind, CharacterRecord, ContainerRef, DiscoveryRecord, ItemRecord,
    LocationRecord, PathRecord, SaleListingRecord, TradeRecord,
};

pub trait EntityStore: Send + Sync {
    /// Hand out the next id. Never reused, strictly ascending.
    fn allocate_id(&self) -> Result<u64, StoreError>;

    // ===== characters =====
    fn get_character(&self, id: u64) -> Result<Option<CharacterRecord>, StoreError>;
    fn put_character(&self, rec: &CharacterRecord) -> Result<(), StoreError>;
    fn delete_character(&self, id: u64) -> Result<(), StoreError>;

    // ===== items =====
    fn get_item(&self, id: u64) -> Result<Option<ItemRecord>, StoreError>;
    fn put_item(&self, rec: &ItemRecord) -> Result<(), StoreError>;
    fn delete_item(&self, id: u64) -> Result<(), StoreError>;

    // ===== locations =====
    fn get_location(&self, id: u64) -> Result<Option<LocationRecord>, StoreError>;
    fn put_location(&self, rec: &LocationRecord) -> Result<(), StoreError>;
    fn delete_location(&self, id: u64) -> Result<(), StoreError>;

    // ===== paths =====
    fn get_path(&self, id: u64) -> Result<Option<PathRecord>, StoreError>;
    fn put_path(&self, rec: &PathRecord) -> Result<(), StoreError>;
    fn delete_path(&self, id: u64) -> Result<(), StoreError>;

    // ===== buffs =====
    fn get_buff(&self, id: u64) -> Result<Option<BuffRecord>, StoreError>;
    fn put_buff(&self, rec: &BuffRecord) -> Result<(), StoreError>;
    fn delete_buff(&self, id: u64) -> Result<(), StoreError>;

    // ===== trades =====
    fn get_trade(&self, id: u64) -> Result<Option<TradeRecord>, StoreError>;
    fn put_trade(&self, rec: &TradeRecord) -> Result<(), StoreError>;

    // ===== sale listings =====
    fn get_listing(&self, id: u64) -> Result<Option<SaleListingRecord>, StoreError>;
    fn put_listing(&self, rec: &SaleListingRecord) -> Result<(), StoreError>;
    fn delete_listing(&self, id: u64) -> Result<(), StoreError>;

    // ===== discoveries =====
    fn get_discovery(&self, id: u64) -> Result<Option<DiscoveryRecord>, StoreError>;
    fn put_discovery(&self, rec: &DiscoveryRecord) -> Result<(), StoreError>;
    fn delete_discovery(&self, id: u64) -> Result<(), StoreError>;

    // ===== queries (capped, id order) =====
    fn items_in(&self, container: ContainerRef, limit: usize)
        -> Result<Vec<ItemRecord>, StoreError>;
    fn characters_at(&self, location: u64, limit: usize)
        -> Result<Vec<CharacterRecord>, StoreError>;
    fn characters_in_party(&self, code: &str, limit: usize)
        -> Result<Vec<CharacterRecord>, StoreError>;
    fn characters_carried_by(&self, carrier: u64) -> Result<Vec<CharacterRecord>, StoreError>;
    fn buffs_for(&self, parent: u64) -> Result<Vec<BuffRecord>, StoreError>;
    fn paths_at(&self, location: u64, limit: usize) -> Result<Vec<PathRecord>, StoreError>;
    fn listings_for_item(&self, item: u64) -> Result<Vec<SaleListingRecord>, StoreError>;
    fn discovery_of(&self, character: u64, path: u64)
        -> Result<Option<DiscoveryRecord>, StoreError>;
    fn discoveries_for_path(&self, path: u64, limit: usize)
        -> Result<Vec<DiscoveryRecord>, StoreError>;
    /// The open trade `character` is a party to, if any.
    fn open_trade_for(&self, character: u64) -> Result<Option<TradeRecord>, StoreError>;

    /// Run `body` exclusively. Every write made through the handle is rolled
    /// back when `body` returns an error. Bodies must re-fetch the records
    /// they mutate; copies read before the transaction are stale by
    /// definition.
    fn transaction(
        &self,
        body: &mut dyn FnMut(&dyn EntityStore) -> Result<(), GameError>,
    ) -> Result<(), GameError>;
}

/// NPCs standing at a location, in id order.
pub fn npcs_at(
    store: &dyn EntityStore,
    location: u64,
    limit: usize,
) -> Result<Vec<CharacterRecord>, StoreError> {
    Ok(store
        .characters_at(location, limit)?
        .into_iter()
        .filter(|c| c.kind == CharacterKind::Npc)
        .collect())
}

/// Fetch a character that must exist.
pub fn require_character(
    store: &dyn EntityStore,
    id: u64,
) -> Result<CharacterRecord, GameError> {
    store
        .get_character(id)?
        .ok_or_else(|| GameError::not_found(format!("character {id}")))
}

/// Fetch an item that must exist.
pub fn require_item(store: &dyn EntityStore, id: u64) -> Result<ItemRecord, GameError> {
    store
        .get_item(id)?
        .ok_or_else(|| GameError::not_found(format!("item {id}")))
}

/// Fetch a location that must exist.
pub fn require_location(
    store: &dyn EntityStore,
    id: u64,
) -> Result<LocationRecord, GameError> {
    store
        .get_location(id)?
        .ok_or_else(|| GameError::not_found(format!("location {id}")))
}

/// Fetch a path that must exist.
pub fn require_path(store: &dyn EntityStore, id: u64) -> Result<PathRecord, GameError> {
    store
        .get_path(id)?
        .ok_or_else(|| GameError::not_found(format!("path {id}")))
}

/// Shared handle used throughout the engines.
pub type StoreHandle = Arc<dyn EntityStore>;
