//! Attach-token replay cache (spec.md §4.3): rejects a second `Attach` using
//! the same `token_id` unless the previous use has already expired.
//!
//! Single-process only — spec.md §9 leaves cross-instance replay protection
//! as a deployment responsibility when horizontally scaled.

use std::collections::HashMap;
use std::sync::Mutex;

pub struct TokenUseCache {
    entries: Mutex<HashMap<String, i64>>,
}

impl Default for TokenUseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenUseCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Record `token_id`'s use if it hasn't been used before (or its prior
    /// use already expired), returning `false` on replay.
    pub fn check_and_record(&self, token_id: &str, exp: i64, now: i64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&prev_exp) = entries.get(token_id) {
            if prev_exp > now {
                return false;
            }
        }
        entries.insert(token_id.to_string(), exp);
        true
    }

    /// Drop entries whose token has already expired, bounding memory growth.
    pub fn sweep_expired(&self, now: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, &mut exp| exp > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
