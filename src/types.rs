//! Persisted record types and the closed enums behind them.
//!
//! Every entity the world core mutates lives here as a serde-serializable
//! record keyed by a `u64` id. Ids are allocated by the store, are never
//! reused, and ascend in creation order; code that needs "storage order"
//! (buff composition, for one) relies on that ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const CHARACTER_SCHEMA_VERSION: u32 = 3;
pub const ITEM_SCHEMA_VERSION: u32 = 3;
pub const LOCATION_SCHEMA_VERSION: u32 = 2;
pub const PATH_SCHEMA_VERSION: u32 = 2;
pub const BUFF_SCHEMA_VERSION: u32 = 1;
pub const TRADE_SCHEMA_VERSION: u32 = 1;
pub const LISTING_SCHEMA_VERSION: u32 = 1;
pub const DISCOVERY_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// References
// ============================================================================

/// Where an item currently sits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRef {
    Character(u64),
    Location(u64),
    Item(u64),
}

/// Who owns a location or path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRef {
    User(u64),
    Group(u64),
}

// ============================================================================
// Characters
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CharacterKind {
    Player,
    Npc,
}

/// The exclusive activity state of a character. Transitions are owned by the
/// engines; nothing outside this crate writes the field directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CharacterMode {
    Normal,
    Combat,
    Merchant,
    Trading,
    Unconscious,
    Dead,
}

impl Default for CharacterMode {
    fn default() -> Self {
        Self::Normal
    }
}

/// Qualifies an active combat beyond the plain combatant reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CombatTag {
    /// Fighting the defenders of a blockading structure
    StructureDefence,
    /// Fighting inside an instanced location
    Instance,
    /// Territory defence combat
    Territory,
}

/// Ordering tag used when picking which defender engages first. Sorts
/// defenders ahead of everyone else, in rank order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CharacterStatus {
    Defender1,
    Defender2,
    Defender3,
    Normal,
}

impl Default for CharacterStatus {
    fn default() -> Self {
        Self::Normal
    }
}

/// Standing within a group. Only `Member` and `Admin` count as active
/// membership for access checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Applied,
    Member,
    Admin,
    Kicked,
}

impl GroupStatus {
    pub fn is_active(self) -> bool {
        matches!(self, GroupStatus::Member | GroupStatus::Admin)
    }
}

/// How an NPC picks its weapon when it swings back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WeaponChoice {
    HighestDamage,
    Random,
}

impl Default for WeaponChoice {
    fn default() -> Self {
        Self::HighestDamage
    }
}

/// The eleven named equipment slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Helmet,
    Chest,
    Shirt,
    Gloves,
    Legs,
    Boots,
    RightHand,
    LeftHand,
    RightRing,
    LeftRing,
    Neck,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 11] = [
        EquipSlot::Helmet,
        EquipSlot::Chest,
        EquipSlot::Shirt,
        EquipSlot::Gloves,
        EquipSlot::Legs,
        EquipSlot::Boots,
        EquipSlot::RightHand,
        EquipSlot::LeftHand,
        EquipSlot::RightRing,
        EquipSlot::LeftRing,
        EquipSlot::Neck,
    ];

    /// Slots that hold weapons or shields.
    pub fn is_hand(self) -> bool {
        matches!(self, EquipSlot::RightHand | EquipSlot::LeftHand)
    }

    /// Parse one slot name as it appears in item affinity strings.
    pub fn parse(name: &str) -> Option<EquipSlot> {
        match name.trim() {
            "Helmet" => Some(EquipSlot::Helmet),
            "Chest" => Some(EquipSlot::Chest),
            "Shirt" => Some(EquipSlot::Shirt),
            "Gloves" => Some(EquipSlot::Gloves),
            "Legs" => Some(EquipSlot::Legs),
            "Boots" => Some(EquipSlot::Boots),
            "RightHand" => Some(EquipSlot::RightHand),
            "LeftHand" => Some(EquipSlot::LeftHand),
            "RightRing" => Some(EquipSlot::RightRing),
            "LeftRing" => Some(EquipSlot::LeftRing),
            "Neck" => Some(EquipSlot::Neck),
            _ => None,
        }
    }
}

impl fmt::Display for EquipSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquipSlot::Helmet => "Helmet",
            EquipSlot::Chest => "Chest",
            EquipSlot::Shirt => "Shirt",
            EquipSlot::Gloves => "Gloves",
            EquipSlot::Legs => "Legs",
            EquipSlot::Boots => "Boots",
            EquipSlot::RightHand => "RightHand",
            EquipSlot::LeftHand => "LeftHand",
            EquipSlot::RightRing => "RightRing",
            EquipSlot::LeftRing => "LeftRing",
            EquipSlot::Neck => "Neck",
        };
        f.write_str(name)
    }
}

/// Equipment by slot. A two-handed item appears under both hand slots.
pub type Equipment = BTreeMap<EquipSlot, u64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterRecord {
    pub id: u64,
    pub name: String,
    pub kind: CharacterKind,
    /// Owning account, if player-controlled
    pub user_id: Option<u64>,

    // Base attributes. Resolved values go through the attribute resolver.
    pub strength: f64,
    pub dexterity: f64,
    pub intelligence: f64,
    pub max_strength: f64,
    pub max_dexterity: f64,
    pub max_intelligence: f64,

    pub hitpoints: f64,
    pub max_hitpoints: f64,

    pub mode: CharacterMode,
    /// Current opponent while `mode == Combat`
    pub combatant: Option<u64>,
    #[serde(default)]
    pub combat_tag: Option<CombatTag>,

    pub location: u64,
    #[serde(default)]
    pub location_entry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub home_town: Option<u64>,
    /// Set while another character is carrying this one
    #[serde(default)]
    pub carried_by: Option<u64>,

    pub coins: i64,

    #[serde(default)]
    pub equipment: Equipment,

    // Party fields. A character without a party code is solo.
    #[serde(default)]
    pub party_code: Option<String>,
    #[serde(default)]
    pub party_leader: bool,
    #[serde(default)]
    pub party_joins_allowed: bool,

    #[serde(default)]
    pub group: Option<u64>,
    #[serde(default)]
    pub group_status: Option<GroupStatus>,

    #[serde(default)]
    pub status: CharacterStatus,
    /// Scales attribute training from fighting this character, clamped to
    /// [0, max] at the point of use
    #[serde(default = "default_experience_multiplier")]
    pub experience_multiplier: f64,
    #[serde(default)]
    pub counter_attack_method: WeaponChoice,
    #[serde(default)]
    pub raid_boss: bool,

    pub schema_version: u32,
}

fn default_experience_multiplier() -> f64 {
    1.0
}

impl CharacterRecord {
    pub fn new(id: u64, name: &str, kind: CharacterKind, location: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            user_id: None,
            strength: 3.0,
            dexterity: 3.0,
            intelligence: 3.0,
            max_strength: 20.0,
            max_dexterity: 20.0,
            max_intelligence: 20.0,
            hitpoints: 10.0,
            max_hitpoints: 10.0,
            mode: CharacterMode::Normal,
            combatant: None,
            combat_tag: None,
            location,
            location_entry: None,
            home_town: None,
            carried_by: None,
            coins: 0,
            equipment: Equipment::new(),
            party_code: None,
            party_leader: false,
            party_joins_allowed: false,
            group: None,
            group_status: None,
            status: CharacterStatus::Normal,
            experience_multiplier: 1.0,
            counter_attack_method: WeaponChoice::default(),
            raid_boss: false,
            schema_version: CHARACTER_SCHEMA_VERSION,
        }
    }

    pub fn is_player(&self) -> bool {
        self.kind == CharacterKind::Player
    }

    pub fn is_npc(&self) -> bool {
        self.kind == CharacterKind::Npc
    }

    /// Dead or unconscious characters cannot act or lead.
    pub fn is_incapacitated(&self) -> bool {
        matches!(
            self.mode,
            CharacterMode::Dead | CharacterMode::Unconscious
        ) || self.hitpoints <= 0.0
    }

    pub fn is_in_combat(&self) -> bool {
        self.mode == CharacterMode::Combat
    }

    /// The item equipped in `slot`, if any.
    pub fn equipped(&self, slot: EquipSlot) -> Option<u64> {
        self.equipment.get(&slot).copied()
    }

    /// Every slot currently holding `item_id`.
    pub fn slots_holding(&self, item_id: u64) -> Vec<EquipSlot> {
        self.equipment
            .iter()
            .filter(|(_, id)| **id == item_id)
            .map(|(slot, _)| *slot)
            .collect()
    }

    pub fn is_equipped(&self, item_id: u64) -> bool {
        self.equipment.values().any(|id| *id == item_id)
    }

    /// Leave combat and forget the opponent. Does not touch party members.
    pub fn reset_combat(&mut self) {
        self.mode = CharacterMode::Normal;
        self.combatant = None;
        self.combat_tag = None;
    }

    pub fn has_active_group_membership(&self, group: u64) -> bool {
        self.group == Some(group)
            && self.group_status.map(GroupStatus::is_active).unwrap_or(false)
    }
}

// ============================================================================
// Items
// ============================================================================

/// Kinds of damage a weapon can deal and armor can stop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Ice,
    Poison,
    Arcane,
}

/// How well a piece of armor stops one damage type. The numeric multiplier
/// applies to the armor's base damage reduction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockCapability {
    None,
    Minimal,
    Poor,
    Average,
    Good,
    Excellent,
}

impl Default for BlockCapability {
    fn default() -> Self {
        Self::Average
    }
}

impl BlockCapability {
    pub fn multiplier(self) -> f64 {
        match self {
            BlockCapability::None => 0.0,
            BlockCapability::Minimal => 0.5,
            BlockCapability::Poor => 0.75,
            BlockCapability::Average => 1.0,
            BlockCapability::Good => 1.5,
            BlockCapability::Excellent => 2.0,
        }
    }
}

/// Weapon-specific fields. The damage formula itself belongs to the content
/// system; the oracle evaluates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeaponProfile {
    /// Content-defined damage formula, e.g. `"2d6+1"`
    pub damage_formula: String,
    /// Highest value the formula can produce; used for NPC weapon choice
    pub max_damage: f64,
    pub damage_types: Vec<DamageType>,
    /// Base critical-hit chance in percent, before the intelligence bonus
    pub crit_chance: f64,
    pub crit_multiplier: Option<f64>,
}

/// Armor-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmorProfile {
    /// Percent chance this piece is the one that intercepts a hit
    pub block_chance: f64,
    /// Base damage absorbed per block; 10 when content gives none
    pub damage_reduction: Option<f64>,
    #[serde(default)]
    pub capabilities: BTreeMap<DamageType, BlockCapability>,
}

impl ArmorProfile {
    /// Capability against one damage type, defaulting to Average.
    pub fn capability(&self, dt: DamageType) -> BlockCapability {
        self.capabilities.get(&dt).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub id: u64,
    pub name: String,
    pub container: ContainerRef,
    pub quantity: u64,
    /// Grams per unit; None counts as zero
    pub weight: Option<u64>,
    /// Volume units per unit; None counts as zero
    pub space: Option<u64>,
    /// Present on containers: capacity for contents
    #[serde(default)]
    pub max_weight: Option<u64>,
    #[serde(default)]
    pub max_space: Option<u64>,
    /// Content-defined slot grammar: a slot name, `"Ring"`, `"2Hands"`, or a
    /// comma-separated list of alternatives. None means not equipable.
    #[serde(default)]
    pub equip_affinity: Option<String>,
    #[serde(default)]
    pub strength_requirement: Option<f64>,
    /// None means indestructible; reaching zero destroys the item
    #[serde(default)]
    pub durability: Option<i64>,
    /// Part of the body, deleted rather than dropped on death
    #[serde(default)]
    pub natural_equipment: bool,
    /// Percent dexterity reduction while equipped
    #[serde(default)]
    pub dexterity_penalty: Option<f64>,
    #[serde(default)]
    pub weapon: Option<WeaponProfile>,
    #[serde(default)]
    pub armor: Option<ArmorProfile>,
    #[serde(default = "default_true")]
    pub movable: bool,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub moved: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

fn default_true() -> bool {
    true
}

impl ItemRecord {
    pub fn new(id: u64, name: &str, container: ContainerRef) -> Self {
        Self {
            id,
            name: name.to_string(),
            container,
            quantity: 1,
            weight: None,
            space: None,
            max_weight: None,
            max_space: None,
            equip_affinity: None,
            strength_requirement: None,
            durability: None,
            natural_equipment: false,
            dexterity_penalty: None,
            weapon: None,
            armor: None,
            movable: true,
            created: Utc::now(),
            moved: None,
            schema_version: ITEM_SCHEMA_VERSION,
        }
    }

    /// Total weight of the stack in grams.
    pub fn total_weight(&self) -> u64 {
        self.weight.unwrap_or(0) * self.quantity.max(1)
    }

    /// Total volume of the stack.
    pub fn total_space(&self) -> u64 {
        self.space.unwrap_or(0) * self.quantity.max(1)
    }

    /// Weight of a single unit.
    pub fn unit_weight(&self) -> u64 {
        self.weight.unwrap_or(0)
    }

    pub fn unit_space(&self) -> u64 {
        self.space.unwrap_or(0)
    }

    /// True when the item has any physical dimension a capacity check can
    /// bite on.
    pub fn has_dimension(&self) -> bool {
        self.unit_weight() > 0 || self.unit_space() > 0
    }

    pub fn is_container(&self) -> bool {
        self.max_weight.is_some() || self.max_space.is_some()
    }

    pub fn is_weapon(&self) -> bool {
        self.weapon.is_some()
    }

    pub fn two_handed(&self) -> bool {
        self.equip_affinity.as_deref() == Some("2Hands")
    }
}

// ============================================================================
// Locations & paths
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Permanent,
    Town,
    CampSite,
    CombatSite,
    RestSite,
    PlayerHouse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub id: u64,
    pub name: String,
    pub kind: LocationKind,
    #[serde(default)]
    pub description: String,
    /// Lazily back-filled from the first connecting path when missing
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub territory: Option<u64>,
    #[serde(default)]
    pub defence_structure: Option<u64>,
    /// Instanced locations respawn their monsters on a timer
    #[serde(default)]
    pub instanced: bool,
    #[serde(default)]
    pub instance_respawn: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    /// Drives combat-site expiry; lazily initialized on first check
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

impl LocationRecord {
    pub fn new(id: u64, name: &str, kind: LocationKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            description: String::new(),
            parent: None,
            owner: None,
            territory: None,
            defence_structure: None,
            instanced: false,
            instance_respawn: None,
            created: Utc::now(),
            last_used: None,
            schema_version: LOCATION_SCHEMA_VERSION,
        }
    }

    pub fn is_combat_site(&self) -> bool {
        self.kind == LocationKind::CombatSite
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Permanent,
    CampSite,
    CombatSite,
    PlayerHouse,
}

/// One-way travel restriction on a path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OneWay {
    No,
    FromFirstOnly,
    FromSecondOnly,
}

impl Default for OneWay {
    fn default() -> Self {
        Self::No
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathRecord {
    pub id: u64,
    pub name: String,
    pub kind: PathKind,
    pub location1: u64,
    pub location2: u64,
    #[serde(default)]
    pub one_way: OneWay,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    pub schema_version: u32,
}

impl PathRecord {
    pub fn new(id: u64, name: &str, kind: PathKind, location1: u64, location2: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            location1,
            location2,
            one_way: OneWay::No,
            owner: None,
            schema_version: PATH_SCHEMA_VERSION,
        }
    }

    /// The far endpoint as seen from `here`. None when the path does not
    /// touch `here` at all.
    pub fn other_end(&self, here: u64) -> Option<u64> {
        if self.location1 == here {
            Some(self.location2)
        } else if self.location2 == here {
            Some(self.location1)
        } else {
            None
        }
    }

    /// Whether travel may start from `here`.
    pub fn passable_from(&self, here: u64) -> bool {
        match self.one_way {
            OneWay::No => true,
            OneWay::FromFirstOnly => self.location1 == here,
            OneWay::FromSecondOnly => self.location2 == here,
        }
    }

    /// Paths that must be discovered before they show up for a character.
    pub fn requires_discovery(&self) -> bool {
        self.kind != PathKind::Permanent
    }
}

// ============================================================================
// Buffs
// ============================================================================

/// Attribute a buff effect targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttributeField {
    Strength,
    Dexterity,
    Intelligence,
}

/// A single parsed buff effect. Percent effects scale the running total,
/// additive effects shift it; composition happens in storage order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BuffEffect {
    Add(f64),
    Percent(f64),
}

impl BuffEffect {
    /// Parse the content notation: `+10%`, `-5%`, `+1`, `-0.2`.
    pub fn parse(raw: &str) -> Option<BuffEffect> {
        let s = raw.trim();
        let (sign, rest) = match s.as_bytes().first()? {
            b'+' => (1.0, &s[1..]),
            b'-' => (-1.0, &s[1..]),
            _ => return None,
        };
        if let Some(num) = rest.strip_suffix('%') {
            num.parse::<f64>().ok().map(|v| BuffEffect::Percent(sign * v))
        } else {
            rest.parse::<f64>().ok().map(|v| BuffEffect::Add(sign * v))
        }
    }

    /// Fold this effect into a running attribute value.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            BuffEffect::Add(delta) => value + delta,
            BuffEffect::Percent(pct) => value * (1.0 + pct / 100.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuffEntry {
    pub field: AttributeField,
    pub effect: BuffEffect,
}

/// Maximum effect entries a single buff carries.
pub const MAX_BUFF_ENTRIES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuffRecord {
    pub id: u64,
    /// Character the buff is attached to
    pub parent: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entries: Vec<BuffEntry>,
    pub expiry: DateTime<Utc>,
    pub schema_version: u32,
}

impl BuffRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Effects on one attribute, in entry order.
    pub fn effects_on(&self, field: AttributeField) -> impl Iterator<Item = BuffEffect> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.effect)
    }
}

// ============================================================================
// Trades
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Open,
    Complete,
    Cancelled,
}

/// One character's half of a trade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSide {
    pub character: u64,
    #[serde(default)]
    pub items: Vec<u64>,
    #[serde(default)]
    pub coins: i64,
    #[serde(default)]
    pub ready: bool,
}

impl TradeSide {
    pub fn new(character: u64) -> Self {
        Self {
            character,
            items: Vec::new(),
            coins: 0,
            ready: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: u64,
    pub state: TradeState,
    /// Bumped on every offer mutation; readiness must cite the version seen
    pub version: u64,
    pub sides: [TradeSide; 2],
    pub created: DateTime<Utc>,
    pub schema_version: u32,
}

impl TradeRecord {
    pub fn new(id: u64, a: u64, b: u64) -> Self {
        Self {
            id,
            state: TradeState::Open,
            version: 0,
            sides: [TradeSide::new(a), TradeSide::new(b)],
            created: Utc::now(),
            schema_version: TRADE_SCHEMA_VERSION,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == TradeState::Open
    }

    pub fn involves(&self, character: u64) -> bool {
        self.sides.iter().any(|s| s.character == character)
    }

    /// Index of `character`'s side, if they are in the trade.
    pub fn side_index(&self, character: u64) -> Option<usize> {
        self.sides.iter().position(|s| s.character == character)
    }

    pub fn side_of(&self, character: u64) -> Option<&TradeSide> {
        self.side_index(character).map(|i| &self.sides[i])
    }

    pub fn other_side(&self, character: u64) -> Option<&TradeSide> {
        self.side_index(character).map(|i| &self.sides[1 - i])
    }

    pub fn both_ready(&self) -> bool {
        self.sides.iter().all(|s| s.ready)
    }

    /// Any offer change invalidates both readiness flags.
    pub fn bump(&mut self) {
        self.version += 1;
        for side in &mut self.sides {
            side.ready = false;
        }
    }
}

// ============================================================================
// Sale listings & discoveries
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Selling,
    Sold,
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleListingRecord {
    pub id: u64,
    pub item: u64,
    pub seller: u64,
    pub price: i64,
    pub status: SaleStatus,
    pub created: DateTime<Utc>,
    pub schema_version: u32,
}

impl SaleListingRecord {
    pub fn new(id: u64, item: u64, seller: u64, price: i64) -> Self {
        Self {
            id,
            item,
            seller,
            price,
            status: SaleStatus::Selling,
            created: Utc::now(),
            schema_version: LISTING_SCHEMA_VERSION,
        }
    }
}

/// A character's knowledge of a non-permanent path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryRecord {
    pub id: u64,
    pub character: u64,
    pub path: u64,
    #[serde(default)]
    pub hidden: bool,
    pub created: DateTime<Utc>,
    pub schema_version: u32,
}

impl DiscoveryRecord {
    pub fn new(id: u64, character: u64, path: u64) -> Self {
        Self {
            id,
            character,
            path,
            hidden: false,
            created: Utc::now(),
            schema_version: DISCOVERY_SCHEMA_VERSION,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
