//! Tuning configuration for the world core.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file
//! at all) yields the stock rules. Nothing here changes semantics, only
//! numbers.

use serde::{Deserialize, Serialize};

use crate::errors::GameError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GameConfig {
    #[serde(default)]
    pub attributes: AttributeConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub party: PartyConfig,
    #[serde(default)]
    pub limits: LimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Floor for resolved strength/dexterity/intelligence
    #[serde(default = "default_min_attribute")]
    pub min_attribute: f64,
}

fn default_min_attribute() -> f64 {
    2.0
}

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            min_attribute: default_min_attribute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Carrying capacity everyone has regardless of strength, in grams
    #[serde(default = "default_base_carry_grams")]
    pub base_carry_grams: u64,
    /// Extra capacity per point of strength above 3
    #[serde(default = "default_carry_grams_per_strength")]
    pub carry_grams_per_strength: u64,
    /// A character's own body weight per point of strength
    #[serde(default = "default_body_grams_per_strength")]
    pub body_grams_per_strength: u64,
    /// Items inside a container inside an item are as deep as nesting goes
    #[serde(default = "default_max_container_depth")]
    pub max_container_depth: u32,
    /// Cap on container-content listings per query
    #[serde(default = "default_contents_query_limit")]
    pub contents_query_limit: usize,
}

fn default_base_carry_grams() -> u64 {
    60_000
}
fn default_carry_grams_per_strength() -> u64 {
    50_000
}
fn default_body_grams_per_strength() -> u64 {
    12_500
}
fn default_max_container_depth() -> u32 {
    2
}
fn default_contents_query_limit() -> usize {
    50
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            base_carry_grams: default_base_carry_grams(),
            carry_grams_per_strength: default_carry_grams_per_strength(),
            body_grams_per_strength: default_body_grams_per_strength(),
            max_container_depth: default_max_container_depth(),
            contents_query_limit: default_contents_query_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatConfig {
    /// Crit chance gained per point of intelligence above the pivot
    #[serde(default = "default_crit_per_intelligence")]
    pub crit_per_intelligence: f64,
    #[serde(default = "default_crit_intelligence_pivot")]
    pub crit_intelligence_pivot: f64,
    /// Applied when a weapon defines no multiplier of its own
    #[serde(default = "default_crit_multiplier")]
    pub default_crit_multiplier: f64,
    /// Armor absorbs this much per block when content gives no figure
    #[serde(default = "default_damage_reduction")]
    pub default_damage_reduction: f64,
    /// Training increments are divided by this before scaling
    #[serde(default = "default_training_divisor")]
    pub training_divisor: f64,
    /// Ceiling on a victim's experience multiplier
    #[serde(default = "default_max_experience_multiplier")]
    pub max_experience_multiplier: f64,
    /// Two-handed weapons scale their strength bonus by this
    #[serde(default = "default_two_hand_bonus_factor")]
    pub two_hand_bonus_factor: f64,
    /// Seconds a PvP combat-action flag stays live in the cache
    #[serde(default = "default_combat_flag_ttl_secs")]
    pub combat_flag_ttl_secs: u64,
}

fn default_crit_per_intelligence() -> f64 {
    2.5
}
fn default_crit_intelligence_pivot() -> f64 {
    4.0
}
fn default_crit_multiplier() -> f64 {
    2.0
}
fn default_damage_reduction() -> f64 {
    10.0
}
fn default_training_divisor() -> f64 {
    500.0
}
fn default_max_experience_multiplier() -> f64 {
    5.0
}
fn default_two_hand_bonus_factor() -> f64 {
    1.5
}
fn default_combat_flag_ttl_secs() -> u64 {
    600
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            crit_per_intelligence: default_crit_per_intelligence(),
            crit_intelligence_pivot: default_crit_intelligence_pivot(),
            default_crit_multiplier: default_crit_multiplier(),
            default_damage_reduction: default_damage_reduction(),
            training_divisor: default_training_divisor(),
            max_experience_multiplier: default_max_experience_multiplier(),
            two_hand_bonus_factor: default_two_hand_bonus_factor(),
            combat_flag_ttl_secs: default_combat_flag_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Hours of disuse before a combat site is due for deletion
    #[serde(default = "default_site_delete_hours")]
    pub combat_site_delete_hours: i64,
    /// Minimum age before a combat site may be collapsed
    #[serde(default = "default_site_collapse_hours")]
    pub combat_site_collapse_hours: i64,
    /// Cap on NPC scans when rolling an encounter
    #[serde(default = "default_npc_scan_limit")]
    pub npc_scan_limit: usize,
}

fn default_site_delete_hours() -> i64 {
    48
}
fn default_site_collapse_hours() -> i64 {
    24
}
fn default_npc_scan_limit() -> usize {
    500
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            combat_site_delete_hours: default_site_delete_hours(),
            combat_site_collapse_hours: default_site_collapse_hours(),
            npc_scan_limit: default_npc_scan_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyConfig {
    #[serde(default = "default_max_party_size")]
    pub max_size: usize,
}

fn default_max_party_size() -> usize {
    4
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_party_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Window for the store-sale toggle limiter, in seconds
    #[serde(default = "default_sale_change_window_secs")]
    pub sale_change_window_secs: u64,
    /// Toggles allowed inside one window
    #[serde(default = "default_sale_change_max")]
    pub sale_change_max: u32,
}

fn default_sale_change_window_secs() -> u64 {
    600
}
fn default_sale_change_max() -> u32 {
    2
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            sale_change_window_secs: default_sale_change_window_secs(),
            sale_change_max: default_sale_change_max(),
        }
    }
}

impl GameConfig {
    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(doc: &str) -> Result<Self, GameError> {
        let config: GameConfig = toml::from_str(doc)
            .map_err(|e| GameError::invariant(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<(), GameError> {
        if self.attributes.min_attribute < 0.0 {
            return Err(GameError::invariant("min_attribute must be non-negative"));
        }
        if self.party.max_size < 1 {
            return Err(GameError::invariant("party max_size must be at least 1"));
        }
        if self.combat.training_divisor <= 0.0 {
            return Err(GameError::invariant("training_divisor must be positive"));
        }
        if self.movement.combat_site_delete_hours < self.movement.combat_site_collapse_hours {
            return Err(GameError::invariant(
                "combat_site_delete_hours must not be below combat_site_collapse_hours",
            ));
        }
        if self.inventory.max_container_depth == 0 {
            return Err(GameError::invariant("max_container_depth must be at least 1"));
        }
        Ok(())
    }
}
