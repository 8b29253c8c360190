//! Outbound notification seam.
//!
//! Delivery (websockets, push, whatever the frontend runs) lives outside
//! this crate. The engines emit fire-and-forget events; failures to
//! deliver never fail the state change that triggered them.

use std::sync::Mutex;

use log::info;

/// Events the engines raise. `recipient` is always a character id.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A trade opened with this character on one side
    TradeStarted { with: u64 },
    /// The trade this character is in changed (offer, readiness, settlement)
    TradeChanged,
    /// The client should re-render everything (location changed under it)
    FullPageRefresh,
    /// Combat state changed for this character
    CombatUpdate,
}

pub trait Notifier: Send + Sync {
    /// Raise an event for one character.
    fn notify(&self, recipient: u64, event: GameEvent);

    /// Human-readable message for one character's game log.
    fn send_game_message(&self, recipient: u64, text: &str);
}

/// Reference implementation: events go to the log and nowhere else.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: u64, event: GameEvent) {
        info!("notify character {recipient}: {event:?}");
    }

    fn send_game_message(&self, recipient: u64, text: &str) {
        info!("message for character {recipient}: {text}");
    }
}

/// Captures everything for assertions. Test-oriented but exported so
/// integration tests can use it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(u64, GameEvent)>>,
    pub messages: Mutex<Vec<(u64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, recipient: u64) -> Vec<GameEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn messages_for(&self, recipient: u64) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: u64, event: GameEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient, event));
    }

    fn send_game_message(&self, recipient: u64, text: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient, text.to_string()));
    }
}
