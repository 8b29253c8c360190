//! Shared volatile state behind a narrow trait.
//!
//! Production runs a distributed cache; the engines only see
//! [`WorldCache`]: TTL'd values with version-checked compare-and-swap.
//! Counters and flags (PvP combat-action stamps, action limiters) are
//! built on CAS retry loops, never on read-modify-write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::errors::Denial;

/// Values the cache stores. Windows back the action limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Number(i64),
    Text(String),
    Window { start_millis: i64, count: u32 },
}

pub trait WorldCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheValue>;
    /// Value plus the version token CAS must cite.
    fn get_versioned(&self, key: &str) -> Option<(CacheValue, u64)>;
    fn put(&self, key: &str, value: CacheValue, ttl: Option<Duration>);
    /// Store only when the key is absent. Returns whether the write won.
    fn put_if_absent(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool;
    /// Store only when the current version still matches `seen`
    /// (None = key must be absent). Returns whether the write won.
    fn compare_and_swap(
        &self,
        key: &str,
        seen: Option<u64>,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> bool;
    fn delete(&self, key: &str);
}

/// Atomically add `delta` to a numeric key, creating it at `delta`.
/// Returns the value after the add.
pub fn add_to_number(
    cache: &dyn WorldCache,
    key: &str,
    delta: i64,
    ttl: Option<Duration>,
) -> i64 {
    loop {
        match cache.get_versioned(key) {
            None => {
                if cache.put_if_absent(key, CacheValue::Number(delta), ttl) {
                    return delta;
                }
            }
            Some((CacheValue::Number(current), version)) => {
                let next = current + delta;
                if cache.compare_and_swap(key, Some(version), CacheValue::Number(next), ttl) {
                    return next;
                }
            }
            Some((_, version)) => {
                // Wrong type under the key; overwrite it
                if cache.compare_and_swap(key, Some(version), CacheValue::Number(delta), ttl) {
                    return delta;
                }
            }
        }
    }
}

fn combat_action_key(attacker: u64, defender: u64) -> String {
    format!("pvp_last_combat_action_{attacker}vs{defender}")
}

/// Stamp a PvP combat action between two player characters.
pub fn flag_combat_action(cache: &dyn WorldCache, attacker: u64, defender: u64, ttl_secs: u64) {
    cache.put(
        &combat_action_key(attacker, defender),
        CacheValue::Number(Utc::now().timestamp_millis()),
        Some(Duration::from_secs(ttl_secs)),
    );
}

/// When `attacker` last took a combat action against `defender`, if the
/// stamp is still live.
pub fn last_combat_action(
    cache: &dyn WorldCache,
    attacker: u64,
    defender: u64,
) -> Option<DateTime<Utc>> {
    match cache.get(&combat_action_key(attacker, defender)) {
        Some(CacheValue::Number(millis)) => Utc.timestamp_millis_opt(millis).single(),
        _ => None,
    }
}

/// Windowed use counter. Succeeds and records a use, or refuses with
/// [`Denial::RateLimited`] once `max_uses` have landed inside
/// `window_secs`.
pub fn flag_action_limiter(
    cache: &dyn WorldCache,
    key: &str,
    window_secs: u64,
    max_uses: u32,
) -> Result<(), Denial> {
    let now = Utc::now().timestamp_millis();
    let window_millis = window_secs as i64 * 1000;
    let ttl = Some(Duration::from_secs(window_secs));
    loop {
        match cache.get_versioned(key) {
            None => {
                let fresh = CacheValue::Window {
                    start_millis: now,
                    count: 1,
                };
                if cache.put_if_absent(key, fresh, ttl) {
                    return Ok(());
                }
            }
            Some((CacheValue::Window { start_millis, count }, version)) => {
                let (start, next_count) = if now - start_millis >= window_millis {
                    (now, 1)
                } else if count >= max_uses {
                    debug!("action limiter {key} tripped at {count}/{max_uses}");
                    return Err(Denial::RateLimited);
                } else {
                    (start_millis, count + 1)
                };
                let next = CacheValue::Window {
                    start_millis: start,
                    count: next_count,
                };
                if cache.compare_and_swap(key, Some(version), next, ttl) {
                    return Ok(());
                }
            }
            Some((_, version)) => {
                let fresh = CacheValue::Window {
                    start_millis: now,
                    count: 1,
                };
                if cache.compare_and_swap(key, Some(version), fresh, ttl) {
                    return Ok(());
                }
            }
        }
    }
}

// ============================================================================
// In-process reference implementation
// ============================================================================

struct Entry {
    value: CacheValue,
    version: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    // versions are global, so a delete+recreate never reuses one
    next_version: Mutex<u64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> u64 {
        let mut v = self.next_version.lock().unwrap_or_else(|e| e.into_inner());
        *v += 1;
        *v
    }

    fn expires_at(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d)
    }
}

impl WorldCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheValue> {
        self.get_versioned(key).map(|(v, _)| v)
    }

    fn get_versioned(&self, key: &str) -> Option<(CacheValue, u64)> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        entries.get(key).map(|e| (e.value.clone(), e.version))
    }

    fn put(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let version = self.bump_version();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: Self::expires_at(ttl),
            },
        );
    }

    fn put_if_absent(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        if self.get_versioned(key).is_some() {
            return false;
        }
        let version = self.bump_version();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries
            .get(key)
            .map(|e| !e.is_expired(Utc::now()))
            .unwrap_or(false)
        {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: Self::expires_at(ttl),
            },
        );
        true
    }

    fn compare_and_swap(
        &self,
        key: &str,
        seen: Option<u64>,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> bool {
        let version = self.bump_version();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let current = entries
            .get(key)
            .and_then(|e| if e.is_expired(now) { None } else { Some(e.version) });
        if current != seen {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: Self::expires_at(ttl),
            },
        );
        true
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_only_wins_once() {
        let cache = MemoryCache::new();
        assert!(cache.put_if_absent("k", CacheValue::Number(1), None));
        assert!(!cache.put_if_absent("k", CacheValue::Number(2), None));
        assert_eq!(cache.get("k"), Some(CacheValue::Number(1)));
    }

    #[test]
    fn cas_requires_matching_version() {
        let cache = MemoryCache::new();
        cache.put("k", CacheValue::Number(1), None);
        let (_, version) = cache.get_versioned("k").unwrap();
        assert!(!cache.compare_and_swap("k", Some(version + 99), CacheValue::Number(2), None));
        assert!(cache.compare_and_swap("k", Some(version), CacheValue::Number(2), None));
        assert_eq!(cache.get("k"), Some(CacheValue::Number(2)));
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        cache.put("gone", CacheValue::Number(1), Some(Duration::from_millis(0)));
        assert_eq!(cache.get("gone"), None);
    }

    #[test]
    fn add_to_number_accumulates() {
        let cache = MemoryCache::new();
        assert_eq!(add_to_number(&cache, "n", 5, None), 5);
        assert_eq!(add_to_number(&cache, "n", -2, None), 3);
    }

    #[test]
    fn combat_action_stamp_round_trips() {
        let cache = MemoryCache::new();
        assert!(last_combat_action(&cache, 1, 2).is_none());
        flag_combat_action(&cache, 1, 2, 600);
        assert!(last_combat_action(&cache, 1, 2).is_some());
        // direction matters
        assert!(last_combat_action(&cache, 2, 1).is_none());
    }

    #[test]
    fn action_limiter_refuses_after_max_uses() {
        let cache = MemoryCache::new();
        assert!(flag_action_limiter(&cache, "sale_change_7", 600, 2).is_ok());
        assert!(flag_action_limiter(&cache, "sale_change_7", 600, 2).is_ok());
        assert_eq!(
            flag_action_limiter(&cache, "sale_change_7", 600, 2),
            Err(Denial::RateLimited)
        );
        // other keys are unaffected
        assert!(flag_action_limiter(&cache, "sale_change_8", 600, 2).is_ok());
    }
}
