//! One-time token tracking.
//!
//! Provisioning tokens authorize a single request. The authority records
//! each token's id after a successful authorization and rejects any later
//! presentation of the same id while it is remembered.
//!
//! # Design
//!
//! - **Per-entry expiry**: an id is forgotten when the token itself expires,
//!   capped at the configured maximum TTL.
//! - **No early eviction**: an id stays until its token expires. When
//!   `max_capacity` ids are remembered, new tokens are refused instead of
//!   evicting ids that are still valid.
//! - **Atomic**: check and insert happen in one cache operation, so two
//!   concurrent presentations of one token cannot both succeed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use moka::{future::Cache, notification::RemovalCause};

use crate::{
    config::TokenCacheConfig,
    error::{AuthorityError, Result},
};

/// Per-entry expiry policy; the value holds the absolute expiration instant.
struct TokenExpiry;

impl moka::Expiry<String, Instant> for TokenExpiry {
    fn expire_after_create(&self, _key: &String, value: &Instant, created_at: Instant) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// Remembers used token ids.
pub struct UsedTokenCache {
    seen: Cache<String, Instant>,
    /// Ids inserted and not yet removed by expiry.
    live: Arc<AtomicU64>,
    max_capacity: u64,
    max_ttl: Duration,
}

impl std::fmt::Debug for UsedTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsedTokenCache")
            .field("entries", &self.seen.entry_count())
            .field("max_capacity", &self.max_capacity)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl UsedTokenCache {
    /// Creates a cache with the given settings.
    #[must_use]
    pub fn new(config: &TokenCacheConfig) -> Self {
        let live = Arc::new(AtomicU64::new(0));
        let released = Arc::clone(&live);
        let seen = Cache::builder()
            .expire_after(TokenExpiry)
            .eviction_listener(move |_id, _expires_at, cause| {
                if cause != RemovalCause::Replaced {
                    released.fetch_sub(1, Ordering::AcqRel);
                }
            })
            .build();
        Self { seen, live, max_capacity: config.max_capacity, max_ttl: config.max_ttl }
    }

    fn reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_capacity).then_some(n + 1))
            .is_ok()
    }

    /// Records `token_id` as used, remembering it for `expires_in` (capped
    /// at the maximum TTL).
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] if the id is already
    /// recorded, and [`AuthorityError::Internal`] if the cache is full.
    pub async fn check_and_mark(&self, token_id: &str, expires_in: Option<Duration>) -> Result<()> {
        if self.seen.contains_key(token_id) {
            return Err(replayed(token_id));
        }
        if !self.reserve() {
            // Expired ids are released during maintenance.
            self.seen.run_pending_tasks().await;
            if !self.reserve() {
                tracing::warn!(max_capacity = self.max_capacity, "one-time token cache is full");
                return Err(AuthorityError::internal("one-time token cache is full"));
            }
        }

        let ttl = expires_in.map_or(self.max_ttl, |d| d.min(self.max_ttl));
        let entry = self.seen.entry(token_id.to_owned()).or_insert(Instant::now() + ttl).await;
        if !entry.is_fresh() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(replayed(token_id));
        }
        Ok(())
    }

    /// Number of remembered ids, after pending maintenance.
    pub async fn len(&self) -> u64 {
        self.seen.run_pending_tasks().await;
        self.seen.entry_count()
    }
}

fn replayed(token_id: &str) -> AuthorityError {
    tracing::warn!(token_id, "one-time token presented twice");
    AuthorityError::unauthorized("token already used")
}
