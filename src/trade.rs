//! Player-to-player trading.
//!
//! A trade is a versioned record with two sides. Every offer mutation
//! bumps the version and clears both readiness flags; marking ready
//! must cite the version the client saw, so nobody can slip an offer
//! change under a confirmation. Settlement runs in a store transaction
//! and either transfers everything or nothing.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use crate::errors::{Denial, GameError};
use crate::market::{delist_item, is_item_for_sale};
use crate::notify::{GameEvent, Notifier};
use crate::store::{require_character, require_item, StoreHandle};
use crate::types::{CharacterMode, ContainerRef, TradeRecord, TradeState};

/// What a successful readiness call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// This side is now ready; waiting on the other
    Waiting,
    /// Both sides were ready and the trade settled
    Settled,
}

pub struct TradeEngine {
    store: StoreHandle,
    notifier: Arc<dyn Notifier>,
}

impl TradeEngine {
    pub fn new(store: StoreHandle, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Open a trade between two co-located characters. Both drop into
    /// `Trading` mode until the trade settles or cancels.
    pub fn start(&self, initiator_id: u64, partner_id: u64) -> Result<TradeRecord, GameError> {
        if initiator_id == partner_id {
            return Err(Denial::refused("You cannot trade with yourself.").into());
        }
        let mut initiator = require_character(self.store.as_ref(), initiator_id)?;
        let mut partner = require_character(self.store.as_ref(), partner_id)?;
        if initiator.location != partner.location {
            return Err(Denial::refused("You need to be in the same place to trade.").into());
        }
        for c in [&initiator, &partner] {
            match c.mode {
                CharacterMode::Normal | CharacterMode::Merchant => {}
                _ => return Err(Denial::refused(format!("{} is busy.", c.name)).into()),
            }
        }
        if self.store.open_trade_for(initiator_id)?.is_some()
            || self.store.open_trade_for(partner_id)?.is_some()
        {
            return Err(Denial::refused("One of you is already trading.").into());
        }

        let trade = TradeRecord::new(self.store.allocate_id()?, initiator_id, partner_id);
        initiator.mode = CharacterMode::Trading;
        partner.mode = CharacterMode::Trading;
        self.store.put_character(&initiator)?;
        self.store.put_character(&partner)?;
        self.store.put_trade(&trade)?;
        info!("trade {} opened between {initiator_id} and {partner_id}", trade.id);
        self.notifier
            .notify(initiator_id, GameEvent::TradeStarted { with: partner_id });
        self.notifier
            .notify(partner_id, GameEvent::TradeStarted { with: initiator_id });
        Ok(trade)
    }

    fn open_trade(&self, character_id: u64) -> Result<TradeRecord, GameError> {
        self.store
            .open_trade_for(character_id)?
            .ok_or_else(|| Denial::refused("You are not trading with anyone.").into())
    }

    /// Offer an item. The whole stack goes on the table.
    pub fn add_item(&self, actor_id: u64, item_id: u64) -> Result<TradeRecord, GameError> {
        let mut trade = self.open_trade(actor_id)?;
        let actor = require_character(self.store.as_ref(), actor_id)?;
        let item = require_item(self.store.as_ref(), item_id)?;
        if item.container != ContainerRef::Character(actor_id) {
            return Err(Denial::refused("You are not holding that item.").into());
        }
        if actor.is_equipped(item_id) {
            return Err(Denial::ItemEquipped.into());
        }
        if is_item_for_sale(self.store.as_ref(), &item)? {
            return Err(Denial::ItemListedForSale.into());
        }
        let side = trade
            .side_index(actor_id)
            .ok_or_else(|| GameError::invariant("open trade lost its side"))?;
        if !trade.sides[side].items.contains(&item_id) {
            trade.sides[side].items.push(item_id);
        }
        trade.bump();
        self.store.put_trade(&trade)?;
        self.notify_change(&trade);
        Ok(trade)
    }

    /// Offer several items at once. Validation is all-or-nothing and the
    /// version bumps a single step.
    pub fn add_items(&self, actor_id: u64, item_ids: &[u64]) -> Result<TradeRecord, GameError> {
        let mut trade = self.open_trade(actor_id)?;
        let actor = require_character(self.store.as_ref(), actor_id)?;
        let side = trade
            .side_index(actor_id)
            .ok_or_else(|| GameError::invariant("open trade lost its side"))?;
        for &item_id in item_ids {
            let item = require_item(self.store.as_ref(), item_id)?;
            if item.container != ContainerRef::Character(actor_id) {
                return Err(Denial::refused("You are not holding that item.").into());
            }
            if actor.is_equipped(item_id) {
                return Err(Denial::ItemEquipped.into());
            }
            if is_item_for_sale(self.store.as_ref(), &item)? {
                return Err(Denial::ItemListedForSale.into());
            }
        }
        for &item_id in item_ids {
            if !trade.sides[side].items.contains(&item_id) {
                trade.sides[side].items.push(item_id);
            }
        }
        trade.bump();
        self.store.put_trade(&trade)?;
        self.notify_change(&trade);
        Ok(trade)
    }

    /// Take an item back off the table.
    pub fn remove_item(&self, actor_id: u64, item_id: u64) -> Result<TradeRecord, GameError> {
        let mut trade = self.open_trade(actor_id)?;
        let side = trade
            .side_index(actor_id)
            .ok_or_else(|| GameError::invariant("open trade lost its side"))?;
        trade.sides[side].items.retain(|id| *id != item_id);
        trade.bump();
        self.store.put_trade(&trade)?;
        self.notify_change(&trade);
        Ok(trade)
    }

    /// Set the coins on the actor's side of the table.
    pub fn set_coins(&self, actor_id: u64, coins: i64) -> Result<TradeRecord, GameError> {
        if coins < 0 {
            return Err(Denial::refused("You cannot offer negative coins.").into());
        }
        let mut trade = self.open_trade(actor_id)?;
        let side = trade
            .side_index(actor_id)
            .ok_or_else(|| GameError::invariant("open trade lost its side"))?;
        trade.sides[side].coins = coins;
        trade.bump();
        self.store.put_trade(&trade)?;
        self.notify_change(&trade);
        Ok(trade)
    }

    /// Confirm the offer as seen at `seen_version`. A stale version is a
    /// pure denial: nothing about the trade changes. When both sides are
    /// ready the trade settles atomically.
    pub fn set_ready(
        &self,
        actor_id: u64,
        seen_version: u64,
    ) -> Result<ReadyOutcome, GameError> {
        let mut trade = self.open_trade(actor_id)?;
        if trade.version != seen_version {
            debug!(
                "trade {} readiness cited version {seen_version}, now at {}",
                trade.id, trade.version
            );
            return Err(Denial::StaleTrade.into());
        }
        let actor = require_character(self.store.as_ref(), actor_id)?;
        let side = trade
            .side_index(actor_id)
            .ok_or_else(|| GameError::invariant("open trade lost its side"))?;

        // the offer must still be honest before anyone commits to it
        for item_id in trade.sides[side].items.clone() {
            let still_good = match self.store.get_item(item_id)? {
                Some(item) => {
                    item.container == ContainerRef::Character(actor_id)
                        && !actor.is_equipped(item_id)
                }
                None => false,
            };
            if !still_good {
                info!("trade {} cancelled: offered item {item_id} walked away", trade.id);
                self.cancel_record(&mut trade)?;
                return Err(Denial::refused(
                    "An offered item is no longer available; the trade was cancelled.",
                )
                .into());
            }
        }
        if trade.sides[side].coins > actor.coins {
            self.cancel_record(&mut trade)?;
            return Err(
                Denial::refused("You no longer have those coins; the trade was cancelled.").into(),
            );
        }

        let other = &trade.sides[1 - side];
        let partner = require_character(self.store.as_ref(), other.character)?;
        if actor.location != partner.location {
            self.cancel_record(&mut trade)?;
            return Err(Denial::refused("You are no longer together; the trade was cancelled.").into());
        }

        trade.sides[side].ready = true;
        // both characters on one account confirm as one
        if actor.user_id.is_some() && actor.user_id == partner.user_id {
            trade.sides[1 - side].ready = true;
        }
        self.store.put_trade(&trade)?;
        if !trade.both_ready() {
            self.notify_change(&trade);
            return Ok(ReadyOutcome::Waiting);
        }

        self.settle(trade.id, actor_id)?;
        Ok(ReadyOutcome::Settled)
    }

    /// Walk away. Both sides return to normal unconditionally.
    pub fn cancel(&self, actor_id: u64) -> Result<(), GameError> {
        let mut trade = self.open_trade(actor_id)?;
        self.cancel_record(&mut trade)
    }

    /// Whether the character has an open trade.
    pub fn is_trading(&self, character_id: u64) -> Result<bool, GameError> {
        Ok(self.store.open_trade_for(character_id)?.is_some())
    }

    fn cancel_record(&self, trade: &mut TradeRecord) -> Result<(), GameError> {
        trade.state = TradeState::Cancelled;
        self.store.put_trade(trade)?;
        for side in &trade.sides {
            let mut c = require_character(self.store.as_ref(), side.character)?;
            if c.mode == CharacterMode::Trading {
                c.mode = CharacterMode::Normal;
                self.store.put_character(&c)?;
            }
            self.notifier.notify(side.character, GameEvent::TradeChanged);
        }
        Ok(())
    }

    /// Exchange everything on the table in one transaction. `actor_id` is
    /// the side whose confirmation completed the trade; only that side is
    /// returned to normal here, the partner leaves `Trading` when their
    /// client acknowledges the completed trade.
    fn settle(&self, trade_id: u64, actor_id: u64) -> Result<(), GameError> {
        let now = Utc::now();
        self.store.transaction(&mut |tx| {
            let mut trade = tx
                .get_trade(trade_id)?
                .ok_or_else(|| GameError::not_found(format!("trade {trade_id}")))?;
            if !trade.is_open() || !trade.both_ready() {
                return Err(GameError::invariant("trade settled out from under itself"));
            }
            let mut chars = [
                require_character(tx, trade.sides[0].character)?,
                require_character(tx, trade.sides[1].character)?,
            ];

            for giver in 0..2 {
                let taker = 1 - giver;
                for item_id in trade.sides[giver].items.clone() {
                    let mut item = require_item(tx, item_id)?;
                    if item.container != ContainerRef::Character(chars[giver].id) {
                        return Err(GameError::invariant(format!(
                            "settling trade {trade_id}: item {item_id} not with its giver"
                        )));
                    }
                    delist_item(tx, item_id)?;
                    item.container = ContainerRef::Character(chars[taker].id);
                    item.moved = Some(now);
                    tx.put_item(&item)?;
                }
                chars[giver].coins -= trade.sides[giver].coins;
                chars[taker].coins += trade.sides[giver].coins;
            }
            for c in &chars {
                if c.coins < 0 {
                    return Err(GameError::invariant(format!(
                        "settling trade {trade_id}: character {} would go negative",
                        c.id
                    )));
                }
            }

            for c in &mut chars {
                if c.id == actor_id {
                    c.mode = CharacterMode::Normal;
                }
                tx.put_character(c)?;
            }
            trade.state = TradeState::Complete;
            tx.put_trade(&trade)?;
            Ok(())
        })?;

        info!("trade {trade_id} settled");
        self.notifier.notify(actor_id, GameEvent::TradeChanged);
        if let Some(trade) = self.store.get_trade(trade_id)? {
            for side in &trade.sides {
                if side.character != actor_id {
                    self.notifier.notify(side.character, GameEvent::TradeChanged);
                }
            }
        }
        Ok(())
    }

    fn notify_change(&self, trade: &TradeRecord) {
        for side in &trade.sides {
            self.notifier.notify(side.character, GameEvent::TradeChanged);
        }
    }
}
