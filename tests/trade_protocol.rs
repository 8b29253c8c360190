//! The trade protocol end to end: versioned confirmation, settlement,
//! and the guard rails around dishonest offers.

mod common;

use common::TestWorld;
use duskhollow::errors::{Denial, GameError};
use duskhollow::store::EntityStore;
use duskhollow::trade::ReadyOutcome;
use duskhollow::types::{CharacterMode, ContainerRef, LocationKind, TradeState};

#[test]
fn items_and_coins_cross_in_one_settlement() {
    let w = TestWorld::new();
    let square = w.location("square", LocationKind::Town);
    let seller = w.player("Tam", square.id);
    let buyer = w.player("Orrin", square.id);
    let mut buyer_rec = w.store.get_character(buyer.id).unwrap().unwrap();
    buyer_rec.coins = 80;
    w.store.put_character(&buyer_rec).unwrap();
    let lamp = w.item_held_by(seller.id, "lamp");
    let rope = w.item_held_by(seller.id, "rope");

    w.trade.start(seller.id, buyer.id).unwrap();
    w.trade.add_item(seller.id, lamp.id).unwrap();
    w.trade.add_item(seller.id, rope.id).unwrap();
    let offer = w.trade.set_coins(buyer.id, 75).unwrap();

    assert_eq!(
        w.trade.set_ready(seller.id, offer.version).unwrap(),
        ReadyOutcome::Waiting
    );
    let current = w.store.get_trade(offer.id).unwrap().unwrap();
    assert_eq!(
        w.trade.set_ready(buyer.id, current.version).unwrap(),
        ReadyOutcome::Settled
    );

    for item_id in [lamp.id, rope.id] {
        let item = w.store.get_item(item_id).unwrap().unwrap();
        assert_eq!(item.container, ContainerRef::Character(buyer.id));
    }
    let seller = w.store.get_character(seller.id).unwrap().unwrap();
    let buyer = w.store.get_character(buyer.id).unwrap().unwrap();
    assert_eq!(seller.coins, 75);
    assert_eq!(buyer.coins, 5);
    let trade = w.store.get_trade(offer.id).unwrap().unwrap();
    assert_eq!(trade.state, TradeState::Complete);
}

#[test]
fn late_offer_change_forces_a_fresh_confirmation() {
    let w = TestWorld::new();
    let square = w.location("square", LocationKind::Town);
    let a = w.player("Tam", square.id);
    let b = w.player("Orrin", square.id);
    let mut a_rec = w.store.get_character(a.id).unwrap().unwrap();
    a_rec.coins = 100;
    w.store.put_character(&a_rec).unwrap();

    w.trade.start(a.id, b.id).unwrap();
    let offer = w.trade.set_coins(a.id, 50).unwrap();
    w.trade.set_ready(b.id, offer.version).unwrap();

    // the offer drops to 1 coin after b confirmed the 50
    let sneaky = w.trade.set_coins(a.id, 1).unwrap();
    assert!(!sneaky.sides.iter().any(|s| s.ready));

    // confirming against the old version is refused outright
    let err = w.trade.set_ready(b.id, offer.version).unwrap_err();
    assert!(matches!(err, GameError::Denied(Denial::StaleTrade)));
    // the fresh version still settles
    w.trade.set_ready(b.id, sneaky.version).unwrap();
    let current = w.store.get_trade(offer.id).unwrap().unwrap();
    w.trade.set_ready(a.id, current.version).unwrap();
    assert_eq!(
        w.store.get_trade(offer.id).unwrap().unwrap().state,
        TradeState::Complete
    );
}

#[test]
fn walking_apart_cancels_at_confirmation() {
    let w = TestWorld::new();
    let square = w.location("square", LocationKind::Town);
    let alley = w.location("alley", LocationKind::Town);
    let a = w.player("Tam", square.id);
    let b = w.player("Orrin", square.id);

    let trade = w.trade.start(a.id, b.id).unwrap();
    let mut b_rec = w.store.get_character(b.id).unwrap().unwrap();
    b_rec.location = alley.id;
    w.store.put_character(&b_rec).unwrap();

    assert!(w.trade.set_ready(a.id, trade.version).unwrap_err().is_denial());
    let trade = w.store.get_trade(trade.id).unwrap().unwrap();
    assert_eq!(trade.state, TradeState::Cancelled);
    for id in [a.id, b.id] {
        assert_eq!(
            w.store.get_character(id).unwrap().unwrap().mode,
            CharacterMode::Normal
        );
    }
}

#[test]
fn busy_characters_cannot_open_trades() {
    let w = TestWorld::new();
    let square = w.location("square", LocationKind::Town);
    let a = w.player("Tam", square.id);
    let mut b = w.player("Orrin", square.id);
    b.mode = CharacterMode::Combat;
    w.store.put_character(&b).unwrap();
    assert!(w.trade.start(a.id, b.id).unwrap_err().is_denial());
}
