//! An expedition across engines: travel into a combat site, get jumped,
//! flee home, and watch the abandoned site rot away.

mod common;

use chrono::{Duration, Utc};
use common::TestWorld;
use duskhollow::combat::EscapeOutcome;
use duskhollow::store::EntityStore;
use duskhollow::dice::ScriptedDice;
use duskhollow::movement::MoveResult;
use duskhollow::types::{CharacterMode, LocationKind, PathKind};

#[test]
fn ambush_escape_and_site_decay() {
    let w = TestWorld::new();
    let field = w.location("field", LocationKind::Permanent);
    let site = w.location("wolf den", LocationKind::CombatSite);
    let path = w.path(PathKind::CombatSite, field.id, site.id);
    let wolf = w.npc("Wolf", site.id, 20.0);
    let hero = w.player("Ash", field.id);

    let mut dice = ScriptedDice::new(vec![0.5]);
    let result = w
        .movement
        .take_path(&mut dice, hero.id, path.id, false, false)
        .unwrap();
    assert_eq!(result, MoveResult::CombatStarted { with: wolf.id });
    let hero_rec = w.store.get_character(hero.id).unwrap().unwrap();
    assert_eq!(hero_rec.location, site.id);
    assert_eq!(hero_rec.mode, CharacterMode::Combat);
    // the site path became known on the way in
    assert!(w.store.discovery_of(hero.id, path.id).unwrap().is_some());

    // flee: strictly out-roll the wolf
    let mut dice = ScriptedDice::new(vec![0.9, 0.1]);
    let outcome = w.combat.attempt_escape(&mut dice, hero.id).unwrap();
    assert_eq!(outcome, EscapeOutcome::Escaped { to: field.id });
    let hero_rec = w.store.get_character(hero_rec.id).unwrap().unwrap();
    assert_eq!(hero_rec.location, field.id);
    assert_eq!(hero_rec.mode, CharacterMode::Normal);
    let wolf_rec = w.store.get_character(wolf.id).unwrap().unwrap();
    assert_eq!(wolf_rec.combatant, None);

    // two days of silence and the den is due
    let mut stale = w.store.get_location(site.id).unwrap().unwrap();
    stale.last_used = Some(Utc::now() - Duration::hours(72));
    w.store.put_location(&stale).unwrap();
    assert!(w.movement.is_due_for_deletion(site.id).unwrap());
    assert!(w.movement.delete_combat_site(site.id, false).unwrap());
    assert!(w.store.get_location(site.id).unwrap().is_none());
    assert!(w.store.get_character(wolf.id).unwrap().is_none());
    assert!(w.store.get_path(path.id).unwrap().is_none());
    // the discovery died with the path
    assert!(w.store.discovery_of(hero.id, path.id).unwrap().is_none());
}

#[test]
fn party_expedition_moves_everyone_and_discovers_for_all() {
    let w = TestWorld::new();
    let town = w.location("Duskhollow", LocationKind::Town);
    let camp = w.location("camp", LocationKind::CampSite);
    let path = w.path(PathKind::CampSite, town.id, camp.id);
    let leader = w.player("Ash", town.id);
    let second = w.player("Bryn", town.id);
    w.parties.join(second.id, leader.id).unwrap();

    let mut dice = ScriptedDice::new(vec![0.5]);
    let result = w
        .movement
        .take_path(&mut dice, leader.id, path.id, false, false)
        .unwrap();
    assert_eq!(result, MoveResult::Moved { to: camp.id });
    for id in [leader.id, second.id] {
        let c = w.store.get_character(id).unwrap().unwrap();
        assert_eq!(c.location, camp.id);
        assert!(w.store.discovery_of(id, path.id).unwrap().is_some());
    }
}

#[test]
fn town_arrivals_adopt_the_town() {
    let w = TestWorld::new();
    let road = w.location("road", LocationKind::Permanent);
    let town = w.location("Duskhollow", LocationKind::Town);
    let path = w.path(PathKind::Permanent, road.id, town.id);
    let hero = w.player("Ash", road.id);

    let mut dice = ScriptedDice::new(vec![0.5]);
    w.movement
        .take_path(&mut dice, hero.id, path.id, false, false)
        .unwrap();
    let hero = w.store.get_character(hero.id).unwrap().unwrap();
    assert_eq!(hero.home_town, Some(town.id));
}

#[test]
fn aged_site_collapses_its_contents_into_the_parent() {
    let w = TestWorld::new();
    let field = w.location("field", LocationKind::Permanent);
    let mut site = w.location("cave", LocationKind::CombatSite);
    site.created = Utc::now() - Duration::hours(30);
    w.store.put_location(&site).unwrap();
    w.path(PathKind::CombatSite, field.id, site.id);
    let wolf = w.npc("Wolf", site.id, 20.0);

    assert!(w.movement.collapse_combat_site(site.id).unwrap());
    assert!(w.store.get_location(site.id).unwrap().is_none());
    assert_eq!(
        w.store.get_character(wolf.id).unwrap().unwrap().location,
        field.id
    );
}
