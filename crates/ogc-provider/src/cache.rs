//! Process-wide HTTP response cache for tiles and capabilities.
//!
//! An in-memory LRU keyed by request URL. Stored entries deliberately
//! ignore server `Cache-Control` directives that would forbid reuse: tile
//! servers routinely mark tiles uncacheable even though map clients depend
//! on re-serving them, so revalidation-forbidding headers are stripped at
//! store time and entries without an expiry get a 24 h default.

use std::num::NonZeroUsize;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

/// Default entry lifetime when the server supplies no usable expiry.
pub const DEFAULT_TILE_EXPIRY_HOURS: i64 = 24;

/// How a fetch consults the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLoadControl {
    /// Go to the network, but store the response (capabilities, legends).
    PreferNetwork,
    /// Serve from cache when fresh, fetch and store otherwise (tiles).
    PreferCache,
}

/// A cached HTTP response body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Bytes,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Shared LRU of HTTP responses.
pub struct HttpTileCache {
    entries: RwLock<LruCache<String, CachedResponse>>,
    default_expiry: Duration,
}

impl HttpTileCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_expiry(capacity, Duration::hours(DEFAULT_TILE_EXPIRY_HOURS))
    }

    pub fn with_expiry(capacity: usize, default_expiry: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            default_expiry,
        }
    }

    /// Fresh cache entry for `url`, expiring lazily on read.
    pub async fn get(&self, url: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.write().await;
        match entries.get(url) {
            Some(entry) if entry.is_fresh() => Some(entry.clone()),
            Some(_) => {
                entries.pop(url);
                None
            }
            None => None,
        }
    }

    /// Store a response, rewriting its cache metadata.
    ///
    /// `cache_control` and `expires` are the server's headers. Directives
    /// forbidding reuse are dropped; `max-age`/`Expires` still set the
    /// entry lifetime and the default applies otherwise.
    pub async fn store(
        &self,
        url: &str,
        body: Bytes,
        content_type: &str,
        cache_control: Option<&str>,
        expires: Option<DateTime<Utc>>,
    ) {
        let expires_at = expires
            .or_else(|| {
                cache_control
                    .and_then(parse_max_age)
                    .map(|secs| Utc::now() + Duration::seconds(secs))
            })
            .unwrap_or_else(|| Utc::now() + self.default_expiry);

        if cache_control.is_some_and(forbids_reuse) {
            debug!(url, "stripping revalidation-forbidding Cache-Control before store");
        }

        let entry = CachedResponse {
            body,
            content_type: content_type.to_string(),
            expires_at,
        };
        self.entries.write().await.put(url.to_string(), entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

fn forbids_reuse(cache_control: &str) -> bool {
    let lower = cache_control.to_ascii_lowercase();
    ["no-store", "no-cache", "must-revalidate"]
        .iter()
        .any(|directive| lower.contains(directive))
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control
        .to_ascii_lowercase()
        .split(',')
        .filter_map(|d| d.trim().strip_prefix("max-age=").map(str::to_string))
        .find_map(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
}
