//! The sled backend against a real on-disk database.

use duskhollow::errors::GameError;
use duskhollow::store::sled::SledStore;
use duskhollow::store::EntityStore;
use duskhollow::types::{CharacterKind, CharacterRecord, ContainerRef, ItemRecord};

#[test]
fn records_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world");

    let character_id;
    let item_id;
    {
        let store = SledStore::open(&path).unwrap();
        character_id = store.allocate_id().unwrap();
        let c = CharacterRecord::new(character_id, "Ash", CharacterKind::Player, 1);
        store.put_character(&c).unwrap();
        item_id = store.allocate_id().unwrap();
        let item = ItemRecord::new(item_id, "lantern", ContainerRef::Character(character_id));
        store.put_item(&item).unwrap();
        store.flush().unwrap();
    }

    let store = SledStore::open(&path).unwrap();
    let c = store.get_character(character_id).unwrap().unwrap();
    assert_eq!(c.name, "Ash");
    let held = store
        .items_in(ContainerRef::Character(character_id), 10)
        .unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, item_id);
}

#[test]
fn failed_transaction_rolls_everything_back() {
    let store = SledStore::open_temporary().unwrap();
    let id = store.allocate_id().unwrap();
    let mut c = CharacterRecord::new(id, "Ash", CharacterKind::Player, 1);
    c.coins = 10;
    store.put_character(&c).unwrap();

    let result = store.transaction(&mut |tx| {
        let mut c = tx.get_character(id)?.unwrap();
        c.coins = 99;
        tx.put_character(&c)?;
        let ghost_id = tx.allocate_id()?;
        let ghost = CharacterRecord::new(ghost_id, "Ghost", CharacterKind::Npc, 1);
        tx.put_character(&ghost)?;
        Err(GameError::invariant("deliberate failure"))
    });
    assert!(result.is_err());

    // the coin write and the insert both unwound
    let c = store.get_character(id).unwrap().unwrap();
    assert_eq!(c.coins, 10);
    let ghosts: Vec<_> = store
        .characters_at(1, 100)
        .unwrap()
        .into_iter()
        .filter(|c| c.name == "Ghost")
        .collect();
    assert!(ghosts.is_empty());
}

#[test]
fn location_queries_filter_and_cap() {
    let store = SledStore::open_temporary().unwrap();
    for i in 0..5 {
        let id = store.allocate_id().unwrap();
        let loc = if i < 3 { 7 } else { 8 };
        let c = CharacterRecord::new(id, &format!("c{i}"), CharacterKind::Npc, loc);
        store.put_character(&c).unwrap();
    }
    assert_eq!(store.characters_at(7, 100).unwrap().len(), 3);
    assert_eq!(store.characters_at(7, 2).unwrap().len(), 2);
    assert_eq!(store.characters_at(8, 100).unwrap().len(), 2);
}
