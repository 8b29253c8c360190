//! Party membership and coordination.
//!
//! A party is nothing but a shared token on its members' records plus a
//! single leader flag; there is no party record to keep consistent.
//! Reads repair as they go: dead members are evicted and a party of one
//! dissolves the moment anyone looks at it.

use std::sync::Arc;

use log::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::errors::{Denial, GameError};
use crate::store::{require_character, StoreHandle};
use crate::types::{CharacterMode, CharacterRecord};

// party membership queries never need more than a screenful
const PARTY_QUERY_LIMIT: usize = 50;

pub struct PartyCoordinator {
    store: StoreHandle,
    config: Arc<GameConfig>,
}

/// Apply one mutation to every member of an already-fetched party.
pub fn apply_to_all<F: FnMut(&mut CharacterRecord)>(members: &mut [CharacterRecord], mut f: F) {
    for member in members.iter_mut() {
        f(member);
    }
}

impl PartyCoordinator {
    pub fn new(store: StoreHandle, config: Arc<GameConfig>) -> Self {
        Self { store, config }
    }

    /// The character's party, including themselves, in id order. Evicts
    /// dead members on the way through; a party reduced to one dissolves
    /// and resolves to None.
    pub fn party_of(
        &self,
        character: &CharacterRecord,
    ) -> Result<Option<Vec<CharacterRecord>>, GameError> {
        let Some(code) = character.party_code.as_deref() else {
            return Ok(None);
        };
        let members = self.store.characters_in_party(code, PARTY_QUERY_LIMIT)?;
        let mut live = Vec::new();
        for mut member in members {
            if member.mode == CharacterMode::Dead {
                debug!("evicting dead member {} from party {code}", member.id);
                Self::clear_party_fields(&mut member);
                self.store.put_character(&member)?;
            } else {
                live.push(member);
            }
        }
        if live.len() <= 1 {
            // the last one standing is no longer a party
            for mut member in live {
                Self::clear_party_fields(&mut member);
                self.store.put_character(&member)?;
            }
            return Ok(None);
        }
        Ok(Some(live))
    }

    /// The party, or just the character alone. The fetched copy of the
    /// character is re-read so the caller always gets fresh records.
    pub fn party_or_solo(
        &self,
        character: &CharacterRecord,
    ) -> Result<Vec<CharacterRecord>, GameError> {
        match self.party_of(character)? {
            Some(members) => Ok(members),
            None => Ok(vec![require_character(self.store.as_ref(), character.id)?]),
        }
    }

    /// Ask to join `target`'s party. A solo target founds a new party and
    /// becomes its leader.
    pub fn join(&self, requester_id: u64, target_id: u64) -> Result<(), GameError> {
        if requester_id == target_id {
            return Err(Denial::refused("You cannot party with yourself.").into());
        }
        let mut requester = require_character(self.store.as_ref(), requester_id)?;
        let mut target = require_character(self.store.as_ref(), target_id)?;
        if requester.location != target.location {
            return Err(Denial::refused("You need to be standing together to form a party.").into());
        }
        if requester.party_code.is_some() {
            return Err(Denial::refused("You are already in a party. Leave it first.").into());
        }
        let code = match target.party_code.clone() {
            None => {
                let code = Uuid::new_v4().simple().to_string();
                target.party_code = Some(code.clone());
                target.party_leader = true;
                target.party_joins_allowed = true;
                self.store.put_character(&target)?;
                info!("character {target_id} founded party {code}");
                code
            }
            Some(code) => {
                let members = self.store.characters_in_party(&code, PARTY_QUERY_LIMIT)?;
                let leader = members
                    .iter()
                    .find(|m| m.party_leader)
                    .ok_or_else(|| GameError::invariant(format!("party {code} has no leader")))?;
                if !leader.party_joins_allowed {
                    return Err(Denial::refused("That party is not accepting members.").into());
                }
                if members.len() >= self.config.party.max_size {
                    return Err(Denial::refused("That party is full.").into());
                }
                code
            }
        };
        requester.party_code = Some(code);
        requester.party_leader = false;
        self.store.put_character(&requester)?;
        Ok(())
    }

    /// Leave the party. A departing leader hands leadership to the first
    /// remaining member.
    pub fn leave(&self, character_id: u64) -> Result<(), GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        let Some(members) = self.party_of(&character)? else {
            // party already dissolved; make sure our own fields agree
            character = require_character(self.store.as_ref(), character_id)?;
            if character.party_code.is_some() {
                Self::clear_party_fields(&mut character);
                self.store.put_character(&character)?;
            }
            return Ok(());
        };
        if character.party_leader {
            if let Some(successor) = members.iter().find(|m| m.id != character_id) {
                let mut successor = successor.clone();
                successor.party_leader = true;
                self.store.put_character(&successor)?;
                debug!("leadership passed to {}", successor.id);
            }
        }
        Self::clear_party_fields(&mut character);
        self.store.put_character(&character)?;
        Ok(())
    }

    /// Hand leadership to another member of the same party.
    pub fn change_leader(&self, leader_id: u64, successor_id: u64) -> Result<(), GameError> {
        let mut leader = require_character(self.store.as_ref(), leader_id)?;
        let mut successor = require_character(self.store.as_ref(), successor_id)?;
        if !leader.party_leader {
            return Err(Denial::refused("Only the party leader can do that.").into());
        }
        if leader.party_code.is_none() || leader.party_code != successor.party_code {
            return Err(Denial::refused("You are not in a party with them.").into());
        }
        leader.party_leader = false;
        successor.party_leader = true;
        self.store.put_character(&leader)?;
        self.store.put_character(&successor)?;
        Ok(())
    }

    /// Open or close the party to new members.
    pub fn set_joins_allowed(&self, leader_id: u64, allowed: bool) -> Result<(), GameError> {
        let mut leader = require_character(self.store.as_ref(), leader_id)?;
        if !leader.party_leader {
            return Err(Denial::refused("Only the party leader can do that.").into());
        }
        leader.party_joins_allowed = allowed;
        self.store.put_character(&leader)?;
        Ok(())
    }

    /// When the leader goes down, the first member still standing takes
    /// over. Mutates the fetched records in place; callers persist.
    pub fn reassign_leader_from(&self, members: &mut [CharacterRecord]) {
        if members.iter().any(|m| m.party_leader && !m.is_incapacitated()) {
            return;
        }
        for member in members.iter_mut() {
            member.party_leader = false;
        }
        if let Some(successor) = members.iter_mut().find(|m| !m.is_incapacitated()) {
            successor.party_leader = true;
            debug!("party leadership reassigned to {}", successor.id);
        }
    }

    /// Persist every member except the acting character; the actor's call
    /// site always holds the freshest copy of them and saves it itself.
    pub fn persist_members(
        &self,
        actor_id: u64,
        members: &[CharacterRecord],
    ) -> Result<(), GameError> {
        for member in members.iter().filter(|m| m.id != actor_id) {
            self.store.put_character(member)?;
        }
        Ok(())
    }

    fn clear_party_fields(character: &mut CharacterRecord) {
        character.party_code = None;
        character.party_leader = false;
        character.party_joins_allowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::EntityStore;
    use crate::types::CharacterKind;

    fn setup() -> (Arc<MemoryStore>, PartyCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = PartyCoordinator::new(store.clone(), Arc::new(GameConfig::default()));
        (store, coordinator)
    }

    fn character_at(store: &MemoryStore, name: &str, location: u64) -> CharacterRecord {
        let id = store.allocate_id().unwrap();
        let c = CharacterRecord::new(id, name, CharacterKind::Player, location);
        store.put_character(&c).unwrap();
        c
    }

    #[test]
    fn join_founds_party_and_fills_it() {
        let (store, parties) = setup();
        let a = character_at(&store, "A", 1);
        let b = character_at(&store, "B", 1);
        parties.join(b.id, a.id).unwrap();

        let a = store.get_character(a.id).unwrap().unwrap();
        let b = store.get_character(b.id).unwrap().unwrap();
        assert!(a.party_leader);
        assert!(!b.party_leader);
        assert_eq!(a.party_code, b.party_code);
        assert!(a.party_code.is_some());
    }

    #[test]
    fn join_requires_co_location() {
        let (store, parties) = setup();
        let a = character_at(&store, "A", 1);
        let b = character_at(&store, "B", 2);
        let err = parties.join(b.id, a.id).unwrap_err();
        assert!(err.is_denial());
    }

    #[test]
    fn join_respects_max_size() {
        let (store, parties) = setup();
        let leader = character_at(&store, "L", 1);
        for name in ["B", "C", "D"] {
            let m = character_at(&store, name, 1);
            parties.join(m.id, leader.id).unwrap();
        }
        let overflow = character_at(&store, "E", 1);
        let err = parties.join(overflow.id, leader.id).unwrap_err();
        assert!(err.is_denial());
    }

    #[test]
    fn join_respects_closed_party() {
        let (store, parties) = setup();
        let leader = character_at(&store, "L", 1);
        let b = character_at(&store, "B", 1);
        parties.join(b.id, leader.id).unwrap();
        parties.set_joins_allowed(leader.id, false).unwrap();
        let c = character_at(&store, "C", 1);
        assert!(parties.join(c.id, leader.id).unwrap_err().is_denial());
    }

    #[test]
    fn dead_members_are_evicted_and_singleton_dissolves() {
        let (store, parties) = setup();
        let leader = character_at(&store, "L", 1);
        let b = character_at(&store, "B", 1);
        parties.join(b.id, leader.id).unwrap();

        let mut b = store.get_character(b.id).unwrap().unwrap();
        b.mode = CharacterMode::Dead;
        store.put_character(&b).unwrap();

        let leader = store.get_character(leader.id).unwrap().unwrap();
        assert!(parties.party_of(&leader).unwrap().is_none());

        // both sides scrubbed
        let leader = store.get_character(leader.id).unwrap().unwrap();
        let b = store.get_character(b.id).unwrap().unwrap();
        assert!(leader.party_code.is_none());
        assert!(b.party_code.is_none());
    }

    #[test]
    fn leaving_leader_hands_over() {
        let (store, parties) = setup();
        let leader = character_at(&store, "L", 1);
        let b = character_at(&store, "B", 1);
        let c = character_at(&store, "C", 1);
        parties.join(b.id, leader.id).unwrap();
        parties.join(c.id, leader.id).unwrap();

        parties.leave(leader.id).unwrap();
        let leader = store.get_character(leader.id).unwrap().unwrap();
        assert!(leader.party_code.is_none());
        let b = store.get_character(b.id).unwrap().unwrap();
        let c = store.get_character(c.id).unwrap().unwrap();
        assert_eq!(
            [b.party_leader, c.party_leader].iter().filter(|x| **x).count(),
            1
        );
    }

    #[test]
    fn reassign_skips_incapacitated() {
        let (store, parties) = setup();
        let mut leader = character_at(&store, "L", 1);
        let next = character_at(&store, "B", 1);
        leader.party_leader = true;
        leader.mode = CharacterMode::Unconscious;
        let mut members = vec![leader, next];
        parties.reassign_leader_from(&mut members);
        assert!(!members[0].party_leader);
        assert!(members[1].party_leader);
    }

    #[test]
    fn persist_members_skips_actor() {
        let (store, parties) = setup();
        let a = character_at(&store, "A", 1);
        let b = character_at(&store, "B", 1);
        let mut members = vec![a.clone(), b.clone()];
        apply_to_all(&mut members, |m| m.location = 9);
        parties.persist_members(a.id, &members).unwrap();
        assert_eq!(store.get_character(a.id).unwrap().unwrap().location, 1);
        assert_eq!(store.get_character(b.id).unwrap().unwrap().location, 9);
    }
}
