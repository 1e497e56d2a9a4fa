//! Server-side handshake cache (spec.md §4.4 "Server flow" + §3 "Handshake
//! state"): keyed by SHA-256 of the canonical `Init` payload, bounded size,
//! TTL-evicted — grounded in `sandbox_fc::overlay::pool`'s
//! bounded-pool-with-eviction shape.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::ecdh::EphemeralKeypair;
use crate::error::{E2eeError, E2eeResult};

pub type CacheKey = [u8; 32];

pub fn cache_key(init_payload_bytes: &[u8]) -> CacheKey {
    Sha256::digest(init_payload_bytes).into()
}

pub struct CacheEntry {
    pub handshake_id: String,
    pub resp_frame: Vec<u8>,
    pub transcript: [u8; 32],
    pub client_pub: Vec<u8>,
    pub server_secret: Mutex<Option<EphemeralKeypair>>,
    created_at: Instant,
}

impl CacheEntry {
    pub fn new(
        handshake_id: String,
        resp_frame: Vec<u8>,
        transcript: [u8; 32],
        client_pub: Vec<u8>,
        server_secret: EphemeralKeypair,
    ) -> Self {
        Self {
            handshake_id,
            resp_frame,
            transcript,
            client_pub,
            server_secret: Mutex::new(Some(server_secret)),
            created_at: Instant::now(),
        }
    }
}

/// Default TTL for a cache entry (spec.md §3: "default 60s").
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Default bound on the number of outstanding handshakes (spec.md §3: "default 4096").
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

pub struct ServerHandshakeCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ServerHandshakeCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, max_entries }
    }

    /// Drop any entry older than `ttl`. Called opportunistically before
    /// every insert so the cache never grows past its TTL window even
    /// without a separate background sweeper.
    fn evict_expired(&self, guard: &mut HashMap<CacheKey, CacheEntry>) {
        let ttl = self.ttl;
        guard.retain(|_, entry| entry.created_at.elapsed() < ttl);
    }

    /// Resend the cached `Resp` frame for a retried `Init`, if present.
    pub fn resend(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut guard);
        guard.get(key).map(|e| e.resp_frame.clone())
    }

    /// Insert a freshly computed entry, enforcing `max_entries`.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> E2eeResult<()> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut guard);
        if !guard.contains_key(&key) && guard.len() >= self.max_entries {
            return Err(E2eeError::CacheFull);
        }
        guard.insert(key, entry);
        Ok(())
    }

    /// Finish a handshake: validate `handshake_id`, then remove the entry
    /// and hand back its transcript, client public key, and ephemeral
    /// secret for the caller to complete the ECDH.
    pub fn take(&self, key: &CacheKey, handshake_id: &str) -> E2eeResult<([u8; 32], Vec<u8>, EphemeralKeypair)> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = guard.remove(key).ok_or(E2eeError::UnexpectedFrameType("no matching Init for this Ack"))?;
        if entry.handshake_id != handshake_id {
            return Err(E2eeError::MalformedFrame("handshake_id does not match cached Init"));
        }
        let secret = entry
            .server_secret
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(E2eeError::MalformedFrame("handshake already completed"))?;
        Ok((entry.transcript, entry.client_pub, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Suite;

    fn make_entry() -> (CacheKey, CacheEntry) {
        let key = cache_key(b"init-payload");
        let secret = EphemeralKeypair::generate(Suite::X25519);
        let entry = CacheEntry::new("hs-1".into(), b"resp-frame".to_vec(), [0u8; 32], vec![1, 2, 3], secret);
        (key, entry)
    }

    #[test]
    fn resend_returns_cached_resp_on_hit() {
        let cache = ServerHandshakeCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES);
        let (key, entry) = make_entry();
        cache.insert(key, entry).unwrap();
        assert_eq!(cache.resend(&key), Some(b"resp-frame".to_vec()));
    }

    #[test]
    fn resend_miss_returns_none() {
        let cache = ServerHandshakeCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES);
        assert_eq!(cache.resend(&cache_key(b"nope")), None);
    }

    #[test]
    fn take_removes_entry_and_rejects_second_take() {
        let cache = ServerHandshakeCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES);
        let (key, entry) = make_entry();
        cache.insert(key, entry).unwrap();

        let (_, client_pub, _) = cache.take(&key, "hs-1").unwrap();
        assert_eq!(client_pub, vec![1, 2, 3]);
        assert!(cache.resend(&key).is_none());
        assert!(cache.take(&key, "hs-1").is_err());
    }

    #[test]
    fn take_rejects_mismatched_handshake_id() {
        let cache = ServerHandshakeCache::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES);
        let (key, entry) = make_entry();
        cache.insert(key, entry).unwrap();
        assert!(cache.take(&key, "wrong-id").is_err());
    }

    #[test]
    fn capacity_is_enforced() {
        let cache = ServerHandshakeCache::new(DEFAULT_TTL, 1);
        let (key_a, entry_a) = make_entry();
        cache.insert(key_a, entry_a).unwrap();

        let key_b = cache_key(b"other-payload");
        let secret_b = EphemeralKeypair::generate(Suite::X25519);
        let entry_b = CacheEntry::new("hs-2".into(), b"resp2".to_vec(), [1u8; 32], vec![9], secret_b);
        assert!(matches!(cache.insert(key_b, entry_b), Err(E2eeError::CacheFull)));
    }

    #[test]
    fn expired_entries_are_evicted_before_capacity_check() {
        let cache = ServerHandshakeCache::new(Duration::from_millis(1), 1);
        let (key_a, entry_a) = make_entry();
        cache.insert(key_a, entry_a).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let key_b = cache_key(b"other-payload");
        let secret_b = EphemeralKeypair::generate(Suite::X25519);
        let entry_b = CacheEntry::new("hs-2".into(), b"resp2".to_vec(), [1u8; 32], vec![9], secret_b);
        assert!(cache.insert(key_b, entry_b).is_ok());
    }
}
