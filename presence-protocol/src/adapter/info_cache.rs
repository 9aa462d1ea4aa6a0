//! Short-TTL memoization of `bluetoothctl info` responses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::mac::MacAddress;

struct Entry {
    ts: Instant,
    raw_info_text: String,
}

/// Read-through cache for adapter `info` output.
///
/// A TTL of zero disables caching outright (every lookup misses). Entries
/// older than the TTL are invisible to `get` even though they haven't been
/// evicted yet — they're dropped lazily on the next miss for that key.
pub struct DeviceInfoCache {
    ttl: Duration,
    entries: Mutex<HashMap<MacAddress, Entry>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
}

pub struct DeviceInfoCacheWithStats {
    cache: DeviceInfoCache,
    stats: Mutex<CacheStats>,
}

impl DeviceInfoCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn get(&self, mac: &MacAddress) -> Option<String> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(mac) else {
            return None;
        };
        if entry.ts.elapsed() > self.ttl {
            entries.remove(mac);
            return None;
        }
        Some(entry.raw_info_text.clone())
    }

    pub async fn set(&self, mac: MacAddress, raw_info_text: String) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.lock().await.insert(mac, Entry { ts: Instant::now(), raw_info_text });
    }
}

impl DeviceInfoCacheWithStats {
    pub fn new(ttl: Duration) -> Self {
        Self { cache: DeviceInfoCache::new(ttl), stats: Mutex::new(CacheStats::default()) }
    }

    pub async fn get(&self, mac: &MacAddress) -> Option<String> {
        let hit = self.cache.get(mac).await;
        let mut stats = self.stats.lock().await;
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    pub async fn set(&self, mac: MacAddress, raw_info_text: String) {
        self.stats.lock().await.refreshes += 1;
        self.cache.set(mac, raw_info_text).await;
    }

    pub async fn snapshot(&self) -> CacheStats {
        *self.stats.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn zero_ttl_never_caches() {
        let cache = DeviceInfoCache::new(Duration::ZERO);
        cache.set(mac("AA:BB:CC:DD:EE:01"), "Connected: yes".into()).await;
        assert_eq!(cache.get(&mac("AA:BB:CC:DD:EE:01")).await, None);
    }

    #[tokio::test]
    async fn hits_within_ttl() {
        let cache = DeviceInfoCache::new(Duration::from_secs(5));
        cache.set(mac("AA:BB:CC:DD:EE:01"), "Connected: yes".into()).await;
        assert_eq!(cache.get(&mac("AA:BB:CC:DD:EE:01")).await, Some("Connected: yes".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_ttl() {
        let cache = DeviceInfoCache::new(Duration::from_secs(5));
        cache.set(mac("AA:BB:CC:DD:EE:01"), "Connected: yes".into()).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&mac("AA:BB:CC:DD:EE:01")).await, None);
    }

    #[tokio::test]
    async fn tracks_hit_miss_refresh_counts() {
        let cache = DeviceInfoCacheWithStats::new(Duration::from_secs(5));
        assert_eq!(cache.get(&mac("AA:BB:CC:DD:EE:01")).await, None);
        cache.set(mac("AA:BB:CC:DD:EE:01"), "Connected: yes".into()).await;
        assert_eq!(cache.get(&mac("AA:BB:CC:DD:EE:01")).await, Some("Connected: yes".into()));
        let stats = cache.snapshot().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.refreshes, 1);
    }
}
