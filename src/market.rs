//! Sale listings and merchant-store toggling.
//!
//! A `Selling` listing freezes its item: it cannot be equipped, moved,
//! or offered in trade until the listing is removed. Listings whose
//! seller no longer holds the item are stale and get cleaned up the
//! moment anyone asks about them.

use std::sync::Arc;

use log::debug;

use crate::cache::{flag_action_limiter, WorldCache};
use crate::config::GameConfig;
use crate::errors::{Denial, GameError};
use crate::store::{require_character, require_item, EntityStore, StoreHandle};
use crate::types::{
    CharacterMode, ContainerRef, ItemRecord, SaleListingRecord, SaleStatus,
};

/// Whether the item is frozen by an active listing. Stale listings
/// (seller no longer holds the item) are deleted on the way through.
pub fn is_item_for_sale(store: &dyn EntityStore, item: &ItemRecord) -> Result<bool, GameError> {
    let mut selling = false;
    for listing in store.listings_for_item(item.id)? {
        if item.container != ContainerRef::Character(listing.seller) {
            debug!(
                "deleting stale listing {} (seller {} no longer holds item {})",
                listing.id, listing.seller, item.id
            );
            store.delete_listing(listing.id)?;
            continue;
        }
        if listing.status == SaleStatus::Selling {
            selling = true;
        }
    }
    Ok(selling)
}

/// Remove every listing for an item. Used when a trade settles or an
/// owner withdraws the item from sale.
pub fn delist_item(store: &dyn EntityStore, item_id: u64) -> Result<(), GameError> {
    for listing in store.listings_for_item(item_id)? {
        store.delete_listing(listing.id)?;
    }
    Ok(())
}

pub struct Market {
    store: StoreHandle,
    cache: Arc<dyn WorldCache>,
    config: Arc<GameConfig>,
}

impl Market {
    pub fn new(store: StoreHandle, cache: Arc<dyn WorldCache>, config: Arc<GameConfig>) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Put one of the character's items up for sale.
    pub fn list_item(
        &self,
        seller_id: u64,
        item_id: u64,
        price: i64,
    ) -> Result<SaleListingRecord, GameError> {
        if price < 0 {
            return Err(Denial::refused("The price must not be negative.").into());
        }
        let seller = require_character(self.store.as_ref(), seller_id)?;
        let item = require_item(self.store.as_ref(), item_id)?;
        if item.container != ContainerRef::Character(seller_id) {
            return Err(Denial::refused("You are not holding that item.").into());
        }
        if seller.is_equipped(item_id) {
            return Err(Denial::ItemEquipped.into());
        }
        if is_item_for_sale(self.store.as_ref(), &item)? {
            return Err(Denial::ItemListedForSale.into());
        }
        let listing = SaleListingRecord::new(self.store.allocate_id()?, item_id, seller_id, price);
        self.store.put_listing(&listing)?;
        Ok(listing)
    }

    /// Withdraw an item from sale.
    pub fn withdraw_item(&self, seller_id: u64, item_id: u64) -> Result<(), GameError> {
        let item = require_item(self.store.as_ref(), item_id)?;
        if item.container != ContainerRef::Character(seller_id) {
            return Err(Denial::refused("You are not holding that item.").into());
        }
        delist_item(self.store.as_ref(), item_id)
    }

    /// Open or close the character's merchant store. Rate limited so the
    /// storefront cannot be flapped to dodge buyers.
    pub fn set_store_open(&self, character_id: u64, open: bool) -> Result<(), GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        match character.mode {
            CharacterMode::Normal | CharacterMode::Merchant => {}
            _ => {
                return Err(Denial::refused("You are too busy to tend a store right now.").into())
            }
        }
        flag_action_limiter(
            self.cache.as_ref(),
            &format!("sale_change_{character_id}"),
            self.config.limits.sale_change_window_secs,
            self.config.limits.sale_change_max,
        )
        .map_err(GameError::Denied)?;
        character.mode = if open {
            CharacterMode::Merchant
        } else {
            CharacterMode::Normal
        };
        self.store.put_character(&character)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::memory::MemoryStore;
    use crate::types::{CharacterKind, CharacterRecord};

    fn setup() -> (Arc<MemoryStore>, Market) {
        let store = Arc::new(MemoryStore::new());
        let market = Market::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(GameConfig::default()),
        );
        (store, market)
    }

    fn seller_with_item(store: &MemoryStore) -> (CharacterRecord, ItemRecord) {
        let cid = store.allocate_id().unwrap();
        let c = CharacterRecord::new(cid, "Merek", CharacterKind::Player, 1);
        store.put_character(&c).unwrap();
        let iid = store.allocate_id().unwrap();
        let item = ItemRecord::new(iid, "lantern", ContainerRef::Character(cid));
        store.put_item(&item).unwrap();
        (c, item)
    }

    #[test]
    fn listing_freezes_item() {
        let (store, market) = setup();
        let (seller, item) = seller_with_item(&store);
        market.list_item(seller.id, item.id, 25).unwrap();
        assert!(is_item_for_sale(&*store, &item).unwrap());
        // double-listing refused
        assert!(market.list_item(seller.id, item.id, 30).unwrap_err().is_denial());
        market.withdraw_item(seller.id, item.id).unwrap();
        assert!(!is_item_for_sale(&*store, &item).unwrap());
    }

    #[test]
    fn stale_listing_is_cleaned_up() {
        let (store, market) = setup();
        let (seller, mut item) = seller_with_item(&store);
        market.list_item(seller.id, item.id, 25).unwrap();
        // item walks away from the seller
        item.container = ContainerRef::Location(1);
        store.put_item(&item).unwrap();
        assert!(!is_item_for_sale(&*store, &item).unwrap());
        assert!(store.listings_for_item(item.id).unwrap().is_empty());
    }

    #[test]
    fn store_toggle_rate_limits() {
        let (store, market) = setup();
        let (seller, _) = seller_with_item(&store);
        market.set_store_open(seller.id, true).unwrap();
        market.set_store_open(seller.id, false).unwrap();
        let err = market.set_store_open(seller.id, true).unwrap_err();
        assert!(matches!(err, GameError::Denied(Denial::RateLimited)));
        // first two took effect
        let c = store.get_character(seller.id).unwrap().unwrap();
        assert_eq!(c.mode, CharacterMode::Normal);
    }

    #[test]
    fn busy_characters_cannot_tend_store() {
        let (store, market) = setup();
        let (mut seller, _) = seller_with_item(&store);
        seller.mode = CharacterMode::Combat;
        store.put_character(&seller).unwrap();
        assert!(market.set_store_open(seller.id, true).unwrap_err().is_denial());
    }
}
