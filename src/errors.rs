//! Error taxonomy for the world core.
//!
//! Two layers: [`Denial`] is a typed, user-facing refusal (the action was
//! understood but the rules say no), [`GameError`] is everything that can
//! come out of an operation, including storage failures and invariant
//! violations that indicate corrupted state rather than a bad request.

use thiserror::Error;

/// Storage backend failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Sled database operation failed
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record does not match the expected schema version
    #[error("Schema mismatch for {entity}: expected {expected}, found {found}")]
    SchemaMismatch {
        entity: String,
        expected: u32,
        found: u32,
    },

    /// Stored bytes could not be interpreted
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// A rule refused the action. These map directly to messages shown to the
/// acting player and never indicate a bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Denial {
    /// Item has no equip affinity
    #[error("That item cannot be equipped.")]
    NotEquipable,

    /// Every slot the item fits is occupied
    #[error("There is no free slot to equip that item.")]
    SlotsFull,

    /// Character strength is below the item's requirement
    #[error("You are not strong enough to equip that. It requires {required} strength.")]
    InsufficientStrength { required: u32 },

    /// Item is frozen by an active sale listing
    #[error("That item is currently listed for sale. Remove the listing first.")]
    ItemListedForSale,

    /// Item is equipped and must be unequipped first
    #[error("That item is equipped. Unequip it first.")]
    ItemEquipped,

    /// Destination container cannot hold any of the item
    #[error("It doesn't fit. {0}")]
    NoRoom(String),

    /// The trade changed since the caller last saw it
    #[error("The other party changed something. Check the trade again before accepting.")]
    StaleTrade,

    /// Cache-backed action limiter fired
    #[error("You are doing that too often. Wait a while and try again.")]
    RateLimited,

    /// Transient contention, the caller should simply retry
    #[error("Somebody got in the way. Try again in a moment.")]
    TryLater,

    /// The mover must confirm walking into a blockade
    #[error("{0} is blocking the way. Proceeding will start a fight.")]
    BlockadeAhead(String),

    /// Situational refusal with a bespoke message
    #[error("{0}")]
    Refused(String),
}

impl Denial {
    pub fn refused(msg: impl Into<String>) -> Self {
        Denial::Refused(msg.into())
    }
}

/// Top-level error for every world-core operation.
#[derive(Error, Debug)]
pub enum GameError {
    /// The action was refused by a rule
    #[error(transparent)]
    Denied(#[from] Denial),

    /// The storage layer failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record that must exist is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// State that should be impossible was observed. Callers must surface
    /// these loudly instead of retrying.
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl GameError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GameError::NotFound(what.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        GameError::Invariant(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        GameError::Denied(Denial::refused(msg))
    }

    /// True when the error is a plain rule refusal rather than a failure.
    pub fn is_denial(&self) -> bool {
        matches!(self, GameError::Denied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_messages_are_user_readable() {
        let d = Denial::InsufficientStrength { required: 12 };
        assert!(d.to_string().contains("12 strength"));
        let d = Denial::refused("The door is barred.");
        assert_eq!(d.to_string(), "The door is barred.");
    }

    #[test]
    fn denial_converts_into_game_error() {
        let err: GameError = Denial::SlotsFull.into();
        assert!(err.is_denial());
        let err = GameError::invariant("negative balance");
        assert!(!err.is_denial());
    }
}
