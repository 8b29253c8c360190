//! # Duskhollow - world core for a persistent multiplayer RPG
//!
//! Duskhollow is the state-mutation heart of a persistent, open-world
//! multiplayer RPG: characters, items, locations, and the rules that move
//! them. It owns every gameplay state change (equipping, fighting,
//! trading, travelling) and nothing else. Rendering, accounts, content
//! authoring, and delivery all live outside the crate and talk to it
//! through narrow traits.
//!
//! ## Features
//!
//! - **Attribute resolution**: base stats plus stacking timed buffs, with
//!   lazy expiry and equipment dexterity penalties.
//! - **Inventory & equipment**: slot grammar (two-handed grips, ring
//!   alternatives), weight/space capacity, stack splitting, containers.
//! - **Combat**: dexterity-driven hit rolls, weapon formulas via a content
//!   oracle, criticals, armor blocking, durability decay, and full death
//!   handling with loot and party fallout.
//! - **Trading**: versioned two-sided offers where any change invalidates
//!   both confirmations, settled atomically.
//! - **Movement**: path travel with one-way and ownership gating, party
//!   coordination, blockades, monster ambushes, and combat-site expiry.
//! - **Pluggable persistence**: everything runs against the
//!   [`store::EntityStore`] trait; [`store::memory::MemoryStore`] and a
//!   [sled](https://docs.rs/sled)-backed store ship as reference backends.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duskhollow::attributes::AttributeResolver;
//! use duskhollow::config::GameConfig;
//! use duskhollow::dice::RandDice;
//! use duskhollow::inventory::InventoryManager;
//! use duskhollow::store::sled::SledStore;
//! use duskhollow::store::StoreHandle;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store: StoreHandle = Arc::new(SledStore::open("world.db")?);
//!     let config = Arc::new(GameConfig::from_toml(&std::fs::read_to_string("game.toml")?)?);
//!     let attributes = Arc::new(AttributeResolver::new(store.clone(), config.clone()));
//!     let _inventory = InventoryManager::new(store.clone(), config.clone(), attributes);
//!     let _dice = RandDice::new();
//!     // wire CombatEngine / TradeEngine / MovementEngine the same way
//!     Ok(())
//! }
//! ```
//!
//! ## Module organization
//!
//! - [`types`] - persisted records and the closed enums behind them
//! - [`store`] - the persistence trait plus memory and sled backends
//! - [`cache`] - volatile shared state (combat stamps, rate limiters)
//! - [`attributes`] - buff composition and derived-attribute resolution
//! - [`inventory`] - equipment slots, carry capacity, item movement
//! - [`market`] - sale listings and merchant-store toggling
//! - [`combat`] - attack resolution, blocking, death handling, escape
//! - [`trade`] - the versioned player-to-player trade protocol
//! - [`movement`] - travel, blockades, and combat-site lifecycle
//! - [`party`] - party membership and leadership
//! - [`dice`] / [`content`] / [`notify`] - seams for randomness, content
//!   formulas, and outbound events
//!
//! All randomness flows through [`dice::Dice`] and every engine takes its
//! collaborators as `Arc<dyn Trait>`, so whole gameplay flows can be
//! scripted deterministically in tests.

pub mod attributes;
pub mod cache;
pub mod combat;
pub mod config;
pub mod content;
pub mod dice;
pub mod errors;
pub mod inventory;
pub mod market;
pub mod movement;
pub mod notify;
pub mod party;
pub mod store;
pub mod trade;
pub mod types;

pub use errors::{Denial, GameError, StoreError};
