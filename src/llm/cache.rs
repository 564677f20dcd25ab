//! Response caching for deterministic LLM calls.
//!
//! The reasoning prompts are deterministic functions of the OCR context, so
//! identical uploads hit identical prompts. When enabled, completed
//! responses are kept for 7 days keyed by a digest of
//! `(model, system, user)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::CompletionResponse;

/// Cache key for a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseCacheKey(pub String);

impl ResponseCacheKey {
    /// Digest of the deterministic request triple.
    pub fn generate(model: &str, system: &str, user: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"model:");
        hasher.update(model.as_bytes());
        hasher.update(b"\nsystem:");
        hasher.update(system.as_bytes());
        hasher.update(b"\nuser:");
        hasher.update(user.as_bytes());
        let hash = hasher.finalize();
        ResponseCacheKey(format!("{:x}", hash))
    }
}

impl std::fmt::Display for ResponseCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..16])
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: CompletionResponse,
    created_at: DateTime<Utc>,
    hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.created_at > ttl
    }
}

/// Cache hit/miss statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl ResponseCacheStats {
    /// Fraction of lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory response cache with TTL expiry.
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<ResponseCacheKey, CacheEntry>>>,
    stats: Arc<RwLock<ResponseCacheStats>>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache with the 7-day design TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::days(7))
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ResponseCacheStats::default())),
            ttl,
        }
    }

    /// Look up a cached response; records a hit or miss.
    pub async fn get(&self, key: &ResponseCacheKey) -> Option<CompletionResponse> {
        let mut entries = self.entries.write().await;
        let hit = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.hit_count += 1;
                Some(entry.response.clone())
            }
            _ => None,
        };
        drop(entries);

        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    /// Insert a completed response.
    pub async fn put(&self, key: ResponseCacheKey, response: CompletionResponse) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                response,
                created_at: Utc::now(),
                hit_count: 0,
            },
        );
        let count = entries.len() as u64;
        drop(entries);

        let mut stats = self.stats.write().await;
        stats.entry_count = count;
    }

    /// Drop expired entries.
    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.is_expired(self.ttl));
        let count = entries.len() as u64;
        drop(entries);

        let mut stats = self.stats.write().await;
        stats.entry_count = count;
    }

    /// Current statistics.
    pub async fn stats(&self) -> ResponseCacheStats {
        self.stats.read().await.clone()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::TokenUsage;

    fn response(content: &str) -> CompletionResponse {
        CompletionResponse {
            id: "resp-1".to_string(),
            model: "test-model".to_string(),
            content: content.to_string(),
            usage: TokenUsage::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = ResponseCacheKey::generate("m", "sys", "user");
        let b = ResponseCacheKey::generate("m", "sys", "user");
        let c = ResponseCacheKey::generate("m", "sys", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_put_get_and_stats() {
        let cache = ResponseCache::new();
        let key = ResponseCacheKey::generate("m", "s", "u");

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), response("cached")).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.content, "cached");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses_and_cleaned() {
        let cache = ResponseCache::with_ttl(Duration::zero());
        let key = ResponseCacheKey::generate("m", "s", "u");
        cache.put(key.clone(), response("stale")).await;

        assert!(cache.get(&key).await.is_none());

        cache.cleanup().await;
        assert_eq!(cache.stats().await.entry_count, 0);
    }
}
