//! Travel, blockades, and combat-site lifecycle.
//!
//! [`MovementEngine::take_path`] is the one entry point for moving a
//! character (and their party) along a path: endpoint resolution,
//! one-way checks, ownership and discovery gating, blockade handling,
//! monster ambushes, and arrival bookkeeping all live here. The same
//! module owns the slow death of combat sites: disused ones are deleted,
//! old ones collapse into their parent.

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, info};

use crate::config::GameConfig;
use crate::dice::{shuffle, Dice};
use crate::errors::{Denial, GameError};
use crate::notify::{GameEvent, Notifier};
use crate::party::{apply_to_all, PartyCoordinator};
use crate::store::{npcs_at, require_character, require_location, require_path, EntityStore, StoreHandle};
use crate::types::{
    CharacterMode, CharacterRecord, CombatTag, ContainerRef, DiscoveryRecord, LocationKind,
    LocationRecord, OwnerRef, PathRecord,
};

/// What the blockade resolver found at a guarded destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockadeCheck {
    /// Nothing mans the structure; pass freely
    FreeToPass,
    /// A defender engages the mover; combat takes over from movement
    Matched { defender: u64 },
    /// The structure is mid-fight with someone else; come back later
    Busy,
}

/// Decides whether a defence structure stops a mover. The production
/// deployment wires in territory and war state; the engines only need
/// the verdict.
pub trait BlockadeResolver: Send + Sync {
    fn check(
        &self,
        store: &dyn EntityStore,
        destination: &LocationRecord,
        mover: &CharacterRecord,
    ) -> Result<BlockadeCheck, GameError>;
}

/// No structure is ever manned. Reference wiring for tests and worlds
/// without sieges.
#[derive(Default)]
pub struct OpenRoads;

impl BlockadeResolver for OpenRoads {
    fn check(
        &self,
        _store: &dyn EntityStore,
        _destination: &LocationRecord,
        _mover: &CharacterRecord,
    ) -> Result<BlockadeCheck, GameError> {
        Ok(BlockadeCheck::FreeToPass)
    }
}

/// How a travel attempt ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Moved { to: u64 },
    /// An ambush or blockade defender intercepted the mover
    CombatStarted { with: u64 },
}

pub struct MovementEngine {
    store: StoreHandle,
    notifier: Arc<dyn Notifier>,
    parties: Arc<PartyCoordinator>,
    blockades: Arc<dyn BlockadeResolver>,
    config: Arc<GameConfig>,
}

impl MovementEngine {
    pub fn new(
        store: StoreHandle,
        notifier: Arc<dyn Notifier>,
        parties: Arc<PartyCoordinator>,
        blockades: Arc<dyn BlockadeResolver>,
        config: Arc<GameConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            parties,
            blockades,
            config,
        }
    }

    // ===== travel =====

    /// Move `character` (and their party, when they lead one) along
    /// `path_id`. `allow_attack` is the caller's consent to engage a
    /// blockade instead of being refused at it. `is_explore` marks the
    /// step as a deliberate search, which can rouse monsters anywhere;
    /// plain travel only gets ambushed inside combat sites.
    pub fn take_path(
        &self,
        dice: &mut dyn Dice,
        character_id: u64,
        path_id: u64,
        allow_attack: bool,
        is_explore: bool,
    ) -> Result<MoveResult, GameError> {
        let character = require_character(self.store.as_ref(), character_id)?;
        if character.is_in_combat() {
            return Err(Denial::refused("You cannot walk away from a fight. Flee instead.").into());
        }
        if character.is_incapacitated() {
            return Err(Denial::refused("You are in no state to travel.").into());
        }

        let path = require_path(self.store.as_ref(), path_id)?;
        let destination_id = path
            .other_end(character.location)
            .ok_or_else(|| Denial::refused("That way is not here."))?;
        if !path.passable_from(character.location) {
            return Err(Denial::refused("The way is one-way, and not from this side.").into());
        }
        let mut destination = require_location(self.store.as_ref(), destination_id)?;
        if destination.is_combat_site() {
            destination.last_used = Some(Utc::now());
            self.store.put_location(&destination)?;
        }

        let mut members = self.parties.party_or_solo(&character)?;
        let in_party = members.len() > 1;
        if in_party && !members.iter().any(|m| m.id == character_id && m.party_leader) {
            return Err(Denial::refused("Only the party leader decides where the party goes.").into());
        }

        self.check_ownership(&path, &destination, &members, character_id)?;

        if destination.defence_structure.is_some() {
            if in_party {
                return Err(
                    Denial::refused("A party cannot force a blockade together. Go alone.").into(),
                );
            }
            if !allow_attack {
                return Err(Denial::BlockadeAhead(destination.name.clone()).into());
            }
            match self
                .blockades
                .check(self.store.as_ref(), &destination, &character)?
            {
                BlockadeCheck::FreeToPass => {}
                BlockadeCheck::Busy => return Err(Denial::TryLater.into()),
                BlockadeCheck::Matched { defender } => {
                    let with = self.engage(
                        character_id,
                        defender,
                        Some(CombatTag::StructureDefence),
                    )?;
                    return Ok(MoveResult::CombatStarted { with });
                }
            }
        }

        if destination.instanced {
            if in_party {
                return Err(Denial::refused("Instances admit one adventurer at a time.").into());
            }
            self.respawn_instance(&mut destination)?;
        }

        // the monsters get first say on arrival
        let ambusher = if is_explore || destination.is_combat_site() {
            self.roll_encounter(dice, &destination)?
        } else {
            None
        };
        if let Some(npc_id) = ambusher {
            if !destination.is_combat_site() {
                // a roused prowler stops the step before it happens
                let with = self.engage(character_id, npc_id, None)?;
                return Ok(MoveResult::CombatStarted { with });
            }
        }

        let now = Utc::now();
        apply_to_all(&mut members, |m| {
            m.location = destination_id;
            m.location_entry = Some(now);
            if destination.kind == LocationKind::Town {
                m.home_town = Some(destination_id);
            }
        });

        if let Some(npc_id) = ambusher {
            // the whole party is dragged into a combat-site fight
            apply_to_all(&mut members, |m| {
                m.mode = CharacterMode::Combat;
                m.combatant = Some(npc_id);
            });
            let mut npc = require_character(self.store.as_ref(), npc_id)?;
            npc.mode = CharacterMode::Combat;
            npc.combatant = Some(character_id);
            self.store.put_character(&npc)?;
        }

        if path.requires_discovery() {
            for member in &members {
                self.record_discovery(member.id, path_id)?;
            }
        }
        if destination.kind == LocationKind::PlayerHouse && destination.owner.is_none() {
            if let Some(user) = character.user_id {
                destination.owner = Some(OwnerRef::User(user));
                self.store.put_location(&destination)?;
            }
        }

        self.parties.persist_members(character_id, &members)?;
        if let Some(actor) = members.iter().find(|m| m.id == character_id) {
            self.store.put_character(actor)?;
        }
        for member in members.iter().filter(|m| m.id != character_id) {
            self.notifier.notify(member.id, GameEvent::FullPageRefresh);
        }

        debug!("character {character_id} took path {path_id} to {destination_id}");
        match ambusher {
            Some(npc_id) => Ok(MoveResult::CombatStarted { with: npc_id }),
            None => Ok(MoveResult::Moved { to: destination_id }),
        }
    }

    /// Group- and user-owned ways only admit their people. A discovery of
    /// the path counts as an invitation; party members ride on the
    /// actor's access and get the discovery recorded for themselves.
    fn check_ownership(
        &self,
        path: &PathRecord,
        destination: &LocationRecord,
        members: &[CharacterRecord],
        actor_id: u64,
    ) -> Result<(), GameError> {
        let actor = members
            .iter()
            .find(|m| m.id == actor_id)
            .ok_or_else(|| GameError::invariant("mover missing from own party"))?;
        for owner in [path.owner, destination.owner].into_iter().flatten() {
            match owner {
                OwnerRef::Group(group) => {
                    if !actor.has_active_group_membership(group) {
                        return Err(Denial::refused("That way belongs to a group you are not part of.")
                            .into());
                    }
                }
                OwnerRef::User(user) => {
                    let owns = actor.user_id == Some(user);
                    let invited = self
                        .store
                        .discovery_of(actor.id, path.id)?
                        .map(|d| !d.hidden)
                        .unwrap_or(false);
                    if !owns && !invited {
                        return Err(Denial::refused("That is private property.").into());
                    }
                }
            }
        }
        Ok(())
    }

    fn record_discovery(&self, character_id: u64, path_id: u64) -> Result<(), GameError> {
        match self.store.discovery_of(character_id, path_id)? {
            Some(mut discovery) => {
                if discovery.hidden {
                    discovery.hidden = false;
                    self.store.put_discovery(&discovery)?;
                }
            }
            None => {
                let discovery =
                    DiscoveryRecord::new(self.store.allocate_id()?, character_id, path_id);
                self.store.put_discovery(&discovery)?;
            }
        }
        Ok(())
    }

    /// Bring an instance's dead back once its respawn timer has lapsed.
    fn respawn_instance(&self, location: &mut LocationRecord) -> Result<(), GameError> {
        let Some(due) = location.instance_respawn else {
            return Ok(());
        };
        if due > Utc::now() {
            return Ok(());
        }
        for mut npc in npcs_at(
            self.store.as_ref(),
            location.id,
            self.config.movement.npc_scan_limit,
        )? {
            if npc.mode != CharacterMode::Dead {
                continue;
            }
            if let Some(name) = npc.name.strip_prefix("Dead ") {
                npc.name = name.to_string();
            }
            npc.mode = CharacterMode::Normal;
            npc.combatant = None;
            npc.hitpoints = npc.max_hitpoints;
            self.store.put_character(&npc)?;
        }
        location.instance_respawn = None;
        self.store.put_location(location)?;
        info!("instance {} respawned", location.id);
        Ok(())
    }

    /// Pick the monster, if any, that jumps arrivals. Defenders engage
    /// before ordinary monsters; within a rank the pick is random.
    fn roll_encounter(
        &self,
        dice: &mut dyn Dice,
        destination: &LocationRecord,
    ) -> Result<Option<u64>, GameError> {
        let mut npcs = npcs_at(
            self.store.as_ref(),
            destination.id,
            self.config.movement.npc_scan_limit,
        )?;
        shuffle(dice, &mut npcs);
        npcs.sort_by_key(|n| n.status);
        Ok(npcs
            .iter()
            .find(|n| n.hitpoints > 0.0 && n.mode == CharacterMode::Normal)
            .map(|n| n.id))
    }

    fn engage(
        &self,
        character_id: u64,
        defender_id: u64,
        tag: Option<CombatTag>,
    ) -> Result<u64, GameError> {
        let mut character = require_character(self.store.as_ref(), character_id)?;
        let mut defender = require_character(self.store.as_ref(), defender_id)?;
        character.mode = CharacterMode::Combat;
        character.combatant = Some(defender_id);
        character.combat_tag = tag;
        defender.mode = CharacterMode::Combat;
        defender.combatant = Some(character_id);
        self.store.put_character(&character)?;
        self.store.put_character(&defender)?;
        self.notifier.notify(character_id, GameEvent::CombatUpdate);
        Ok(defender_id)
    }

    // ===== combat-site lifecycle =====

    /// Whether a combat site has sat unused long enough to delete. A site
    /// with no usage stamp gets one now and is not yet due.
    pub fn is_due_for_deletion(&self, location_id: u64) -> Result<bool, GameError> {
        let mut location = require_location(self.store.as_ref(), location_id)?;
        if !location.is_combat_site() {
            return Ok(false);
        }
        let Some(last_used) = location.last_used else {
            location.last_used = Some(Utc::now());
            self.store.put_location(&location)?;
            return Ok(false);
        };
        let idle = Utc::now() - last_used;
        Ok(idle >= Duration::hours(self.config.movement.combat_site_delete_hours))
    }

    /// Delete a disused combat site outright. Returns whether it went.
    ///
    /// Standing players are walked out to the parent first. A site with
    /// more than one path, or one not yet due (unless forced), only has
    /// its path discoveries hidden so it fades from view instead.
    pub fn delete_combat_site(&self, location_id: u64, force: bool) -> Result<bool, GameError> {
        let location = require_location(self.store.as_ref(), location_id)?;
        if !location.is_combat_site() {
            return Err(GameError::invariant(format!(
                "location {location_id} is not a combat site"
            )));
        }
        let paths = self
            .store
            .paths_at(location_id, self.config.movement.npc_scan_limit)?;
        if paths.len() > 1 || (!force && !self.is_due_for_deletion(location_id)?) {
            for path in &paths {
                self.hide_path_discoveries(path.id)?;
            }
            return Ok(false);
        }

        let standing = self
            .store
            .characters_at(location_id, self.config.movement.npc_scan_limit)?;
        if standing.iter().any(|c| c.is_player()) {
            let Some(parent) = self.parent_location(&location)? else {
                debug!("combat site {location_id} has players and no parent; deletion skipped");
                return Ok(false);
            };
            for mut player in standing.iter().filter(|c| c.is_player()).cloned() {
                player.location = parent;
                self.store.put_character(&player)?;
                self.notifier.notify(player.id, GameEvent::FullPageRefresh);
            }
        }
        for npc in standing.iter().filter(|c| !c.is_player()) {
            self.store.delete_character(npc.id)?;
        }
        for item in self
            .store
            .items_in(ContainerRef::Location(location_id), usize::MAX)?
        {
            self.store.delete_item(item.id)?;
        }
        for path in paths {
            self.delete_path_with_discoveries(path.id)?;
        }
        self.store.delete_location(location_id)?;
        info!("combat site {location_id} deleted");
        Ok(true)
    }

    /// Collapse an aged combat site into its parent: contents move out,
    /// the site itself goes away. Sites with more than one path defer.
    pub fn collapse_combat_site(&self, location_id: u64) -> Result<bool, GameError> {
        let location = require_location(self.store.as_ref(), location_id)?;
        if !location.is_combat_site() {
            return Err(GameError::invariant(format!(
                "location {location_id} is not a combat site"
            )));
        }
        let age = Utc::now() - location.created;
        if age < Duration::hours(self.config.movement.combat_site_collapse_hours) {
            return Ok(false);
        }
        let paths = self
            .store
            .paths_at(location_id, self.config.movement.npc_scan_limit)?;
        if paths.len() > 1 {
            return Ok(false);
        }
        let Some(parent) = self.parent_location(&location)? else {
            return Ok(false);
        };

        for mut character in self
            .store
            .characters_at(location_id, self.config.movement.npc_scan_limit)?
        {
            character.location = parent;
            self.store.put_character(&character)?;
            if character.is_player() {
                self.notifier.notify(character.id, GameEvent::FullPageRefresh);
            }
        }
        for mut item in self
            .store
            .items_in(ContainerRef::Location(location_id), usize::MAX)?
        {
            item.container = ContainerRef::Location(parent);
            self.store.put_item(&item)?;
        }
        for path in paths {
            self.delete_path_with_discoveries(path.id)?;
        }
        self.store.delete_location(location_id)?;
        info!("combat site {location_id} collapsed into {parent}");
        Ok(true)
    }

    /// The site's parent, lazily back-filled from its first connecting
    /// path when the record never had one.
    pub fn parent_location(&self, location: &LocationRecord) -> Result<Option<u64>, GameError> {
        if let Some(parent) = location.parent {
            return Ok(Some(parent));
        }
        let paths = self.store.paths_at(location.id, 1)?;
        let Some(parent) = paths.first().and_then(|p| p.other_end(location.id)) else {
            return Ok(None);
        };
        let mut updated = location.clone();
        updated.parent = Some(parent);
        self.store.put_location(&updated)?;
        Ok(Some(parent))
    }

    fn hide_path_discoveries(&self, path_id: u64) -> Result<(), GameError> {
        for mut discovery in self.store.discoveries_for_path(path_id, usize::MAX)? {
            if !discovery.hidden {
                discovery.hidden = true;
                self.store.put_discovery(&discovery)?;
            }
        }
        Ok(())
    }

    fn delete_path_with_discoveries(&self, path_id: u64) -> Result<(), GameError> {
        for discovery in self.store.discoveries_for_path(path_id, usize::MAX)? {
            self.store.delete_discovery(discovery.id)?;
        }
        self.store.delete_path(path_id)
            .map_err(GameError::from)
    }
}
