// Short-lived memoization of fetched inbound descriptors.
//
// Provisioning bursts (a batch of subscription renewals) hit the same
// inbound repeatedly; the panel's list endpoint is slow enough that a
// 60-second cache is worth the staleness window. Any successful write
// to an inbound must invalidate its entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::panel::models::InboundDescriptor;

/// Default time-to-live for a cached inbound descriptor.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CachedInbound {
    fetched_at: Instant,
    inbound: Arc<InboundDescriptor>,
}

/// Keyed, TTL-bounded cache of the most recently fetched inbounds.
pub struct InboundCache {
    ttl: Duration,
    entries: DashMap<u32, CachedInbound>,
}

impl Default for InboundCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Return the cached descriptor for `inbound_id` if it is still fresh.
    /// Stale entries are evicted on access.
    pub fn get(&self, inbound_id: u32) -> Option<Arc<InboundDescriptor>> {
        let hit = self.entries.get(&inbound_id)?;
        if hit.fetched_at.elapsed() < self.ttl {
            return Some(Arc::clone(&hit.inbound));
        }
        drop(hit);
        self.entries.remove(&inbound_id);
        None
    }

    /// Store a freshly fetched descriptor, returning the shared handle.
    pub fn put(&self, inbound_id: u32, inbound: InboundDescriptor) -> Arc<InboundDescriptor> {
        let inbound = Arc::new(inbound);
        self.entries.insert(
            inbound_id,
            CachedInbound {
                fetched_at: Instant::now(),
                inbound: Arc::clone(&inbound),
            },
        );
        inbound
    }

    /// Drop the entry for `inbound_id` (after any successful write).
    pub fn invalidate(&self, inbound_id: u32) {
        self.entries.remove(&inbound_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(id: u32) -> InboundDescriptor {
        serde_json::from_value(json!({
            "id": id,
            "port": 443,
            "protocol": "vless",
            "settings": "{\"clients\":[]}",
        }))
        .expect("valid descriptor")
    }

    #[test]
    fn fresh_entry_is_returned() {
        let cache = InboundCache::new();
        cache.put(1, descriptor(1));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn stale_entry_is_evicted() {
        let cache = InboundCache::with_ttl(Duration::ZERO);
        cache.put(1, descriptor(1));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn invalidate_drops_entry() {
        let cache = InboundCache::new();
        cache.put(1, descriptor(1));
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }
}
