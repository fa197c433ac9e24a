//! Durable, TTL-bounded response cache.
//!
//! Responses are stored in SQLite (see [`crate::Database`]) under a
//! [`CacheKey`] fingerprint, so they survive process restarts. Expiry is
//! evaluated lazily on read: an entry is stale once `now - stored_at > ttl`.
//! Nothing sweeps the table in the background; call
//! [`ResponseCache::purge_expired`] for explicit maintenance.
//!
//! The cache never turns its own problems into caller failures. Unreadable or
//! undecodable rows are treated as misses, and failed writes are logged and
//! dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use litfetch_core::{CacheKey, Database, ResponseCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ResponseCache::new(Database::new_in_memory().await?);
//! let key = CacheKey::from_parts("doi:10.1234/abc", &Default::default());
//!
//! let title: Result<String, std::io::Error> = cache
//!     .get_or_fetch(&key, Duration::from_secs(3600), || async {
//!         Ok("A cached title".to_string())
//!     })
//!     .await;
//! assert_eq!(title?, "A cached title");
//! # Ok(())
//! # }
//! ```

mod key;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::Database;

pub use key::CacheKey;

/// Errors from explicit cache operations.
///
/// Lookups never return these; they degrade to misses instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store rejected the operation.
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The payload could not be encoded as JSON.
    #[error("failed to encode cache payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
}

impl CacheStats {
    /// Total lookups.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, `0.0` when nothing was looked up.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// SQLite-backed response cache with hit/miss accounting.
///
/// Shared through `Arc` by every fetch task; all state lives in the
/// connection pool and atomic counters.
#[derive(Debug)]
pub struct ResponseCache {
    /// `None` for a disabled cache.
    db: Option<Database>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache over an opened database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: Some(db),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache that stores nothing and always misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            db: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns true when entries are persisted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    /// Looks up a live entry.
    ///
    /// Expired, corrupted, and unreadable entries all count as misses.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.lookup(key).await;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("cache miss");
        }
        value
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let db = self.db.as_ref()?;

        let row = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT payload, stored_at_ms, ttl_ms FROM response_cache WHERE cache_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(db.pool())
        .await;

        let (payload, stored_at_ms, ttl_ms) = match row {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(error) => {
                warn!(error = %error, "cache read failed, treating as miss");
                return None;
            }
        };

        if now_ms().saturating_sub(stored_at_ms) > ttl_ms {
            debug!(stored_at_ms, ttl_ms, "cache entry expired");
            return None;
        }

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(error = %error, "corrupted cache entry, treating as miss");
                None
            }
        }
    }

    /// Stores (or overwrites) an entry.
    ///
    /// A disabled cache accepts and discards the payload.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`] if the payload cannot be serialized, or
    /// [`CacheError::Storage`] if the write fails.
    #[instrument(skip(self, payload), fields(key = %key, ttl_ms = ttl.as_millis()))]
    pub async fn put<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        let encoded = serde_json::to_string(payload)?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO response_cache (cache_key, payload, stored_at_ms, ttl_ms) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET \
             payload = excluded.payload, stored_at_ms = excluded.stored_at_ms, ttl_ms = excluded.ttl_ms",
        )
        .bind(key.as_str())
        .bind(encoded)
        .bind(now_ms())
        .bind(ttl_ms)
        .execute(db.pool())
        .await?;

        debug!("cache entry stored");
        Ok(())
    }

    /// Returns the cached payload, or runs `fetch` and caches its success.
    ///
    /// `fetch` is not invoked on a live hit. Its error propagates unchanged
    /// and nothing is cached. A failed cache write is logged; the fetched
    /// payload is still returned.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetch` returns.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = fetch().await?;
        if let Err(error) = self.put(key, &value, ttl).await {
            warn!(key = %key, error = %error, "cache write failed, continuing without caching");
        }
        Ok(value)
    }

    /// Removes an entry. Returns true when a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the delete fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let Some(db) = &self.db else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM response_cache WHERE cache_key = ?")
            .bind(key.as_str())
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every expired entry, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM response_cache WHERE ? - stored_at_ms > ttl_ms")
            .bind(now_ms())
            .execute(db.pool())
            .await?;
        let purged = result.rows_affected();
        debug!(purged, "expired cache entries purged");
        Ok(purged)
    }

    /// Number of stored rows, expired ones included.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the count query fails.
    pub async fn len(&self) -> Result<u64, CacheError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM response_cache")
            .fetch_one(db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns true when no rows are stored.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the count query fails.
    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }

    /// Snapshot of the hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Wall-clock unix milliseconds; entries must compare across restarts.
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
