//! TTL cache for polled resources
//!
//! Keyed by (scope, resource kind). Entries carry the raw JSON payload and
//! their fetch time; freshness is decided per read with the caller's
//! `max_age`. Invalidation bumps a per-key generation so a fetch that was
//! already in flight when the invalidation happened can never overwrite the
//! post-invalidation state. On fetch failure the last known good payload is
//! served as long as it is younger than the staleness ceiling.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use carlink_core::{ConnectorResult, ResourceKind};

/// Staleness ceiling as a multiple of the caller's `max_age`, when no
/// explicit ceiling is configured
const DEFAULT_STALE_FACTOR: u32 = 4;

/// Cache key: resource kind scoped to a VIN (or "account" for account-level
/// resources)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub scope: String,
    pub kind: ResourceKind,
}

impl ResourceKey {
    pub fn new(scope: impl Into<String>, kind: ResourceKind) -> Self {
        Self { scope: scope.into(), kind }
    }

    /// Key for account-level resources not tied to one vehicle
    pub fn account(kind: ResourceKind) -> Self {
        Self::new("account", kind)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.kind.as_str())
    }
}

#[derive(Debug, Clone)]
struct CachedPayload {
    /// `None` records a 204 "currently unavailable" answer; that is a valid
    /// result and is cached like any other
    payload: Option<Value>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    value: Option<CachedPayload>,
}

#[derive(Debug)]
pub struct ResourceCache {
    slots: Mutex<HashMap<ResourceKey, Slot>>,
    stale_ceiling: Option<Duration>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()), stale_ceiling: None }
    }

    /// Cache with an explicit staleness ceiling for last-known-good fallback
    pub fn with_stale_ceiling(stale_ceiling: Duration) -> Self {
        Self { slots: Mutex::new(HashMap::new()), stale_ceiling: Some(stale_ceiling) }
    }

    /// Return the cached payload when younger than `max_age`, otherwise run
    /// `fetch` and store its result.
    ///
    /// Identical consecutive calls within `max_age` are answered from memory
    /// without touching the network. A fetch failure falls back to the last
    /// known good payload if one exists within the staleness ceiling;
    /// otherwise the error propagates.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &ResourceKey,
        max_age: Duration,
        fetch: F,
    ) -> ConnectorResult<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult<Option<Value>>>,
    {
        let seen_generation = {
            let slots = self.slots.lock();
            if let Some(slot) = slots.get(key) {
                if let Some(cached) = &slot.value {
                    if cached.fetched_at.elapsed() <= max_age {
                        debug!(key = %key, "cache hit");
                        return Ok(cached.payload.clone());
                    }
                }
                slot.generation
            } else {
                0
            }
        };

        debug!(key = %key, "cache miss, fetching");
        match fetch().await {
            Ok(payload) => {
                let mut slots = self.slots.lock();
                let slot = slots.entry(key.clone()).or_default();
                if slot.generation == seen_generation {
                    slot.value = Some(CachedPayload {
                        payload: payload.clone(),
                        fetched_at: Instant::now(),
                    });
                } else {
                    // Invalidated while we were fetching; the next read must
                    // fetch again rather than trust this result.
                    debug!(key = %key, "discarding fetch result from before invalidation");
                }
                Ok(payload)
            }
            Err(err) => {
                let ceiling = self
                    .stale_ceiling
                    .unwrap_or(max_age * DEFAULT_STALE_FACTOR);
                let stale = {
                    let slots = self.slots.lock();
                    slots.get(key).and_then(|slot| {
                        slot.value
                            .as_ref()
                            .filter(|cached| cached.fetched_at.elapsed() <= ceiling)
                            .map(|cached| cached.payload.clone())
                    })
                };
                match stale {
                    Some(payload) => {
                        warn!(key = %key, error = %err, "fetch failed, serving last known good");
                        Ok(payload)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Drop the entry for `key`; the next read fetches unconditionally.
    pub fn invalidate(&self, key: &ResourceKey) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.generation += 1;
        slot.value = None;
        debug!(key = %key, "invalidated");
    }

    /// Invalidate several kinds under one scope, e.g. after a command
    pub fn invalidate_kinds(&self, scope: &str, kinds: &[ResourceKind]) {
        for kind in kinds {
            self.invalidate(&ResourceKey::new(scope, *kind));
        }
    }

    /// Drop everything, e.g. on shutdown or account change
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Currently cached payload without freshness checks; test and
    /// diagnostics helper
    pub fn peek(&self, key: &ResourceKey) -> Option<Option<Value>> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.value.as_ref().map(|cached| cached.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use carlink_core::ConnectorError;
    use serde_json::json;

    fn key() -> ResourceKey {
        ResourceKey::new("VIN123", ResourceKind::Status)
    }

    fn counting_fetch(
        counter: Arc<AtomicU32>,
        payload: Value,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ConnectorResult<Option<Value>>> + Send>>
    {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let payload = payload.clone();
            Box::pin(async move { Ok(Some(payload)) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_read_within_max_age_is_served_from_memory() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let fetch = counting_fetch(calls.clone(), json!({"locked": true}));

        let first = cache.get_or_fetch(&key(), Duration::from_secs(299), &fetch).await.unwrap();
        let second = cache.get_or_fetch(&key(), Duration::from_secs(299), &fetch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_max_age() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let fetch = counting_fetch(calls.clone(), json!(1));
        let max_age = Duration::from_secs(299);

        // t=0: fetch; t=200: still fresh; t=301: expired, fetch again.
        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(101)).await;
        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let fetch = counting_fetch(calls.clone(), json!(1));
        let max_age = Duration::from_secs(300);

        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        cache.invalidate(&key());
        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_started_before_invalidation_does_not_overwrite() {
        let cache = Arc::new(ResourceCache::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(), Duration::from_secs(300), move || async move {
                        let _ = release_rx.await;
                        Ok(Some(json!("pre-invalidation")))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        cache.invalidate(&key());
        release_tx.send(()).ok();

        // The fetcher still gets its own result, but it is not cached.
        let result = pending.await.unwrap().unwrap();
        assert_eq!(result, Some(json!("pre-invalidation")));
        assert_eq!(cache.peek(&key()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_serves_last_known_good_within_ceiling() {
        let cache = ResourceCache::new();
        let max_age = Duration::from_secs(100);

        cache
            .get_or_fetch(&key(), max_age, || async { Ok(Some(json!("good"))) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(150)).await;
        let served = cache
            .get_or_fetch(&key(), max_age, || async {
                Err(ConnectorError::TransientNetwork("reset".into()))
            })
            .await
            .unwrap();
        assert_eq!(served, Some(json!("good")));

        // Past the ceiling (4x max_age) the error propagates instead.
        tokio::time::advance(Duration::from_secs(300)).await;
        let err = cache
            .get_or_fetch(&key(), max_age, || async {
                Err(ConnectorError::TransientNetwork("reset".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::TransientNetwork(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stale_ceiling_overrides_the_default() {
        let cache = ResourceCache::with_stale_ceiling(Duration::from_secs(120));
        let key = key();
        let max_age = Duration::from_secs(60);

        cache
            .get_or_fetch(&key, max_age, || async { Ok(Some(json!("good"))) })
            .await
            .unwrap();

        // 4x max_age would still allow fallback here; the explicit 120 s
        // ceiling does not.
        tokio::time::advance(Duration::from_secs(150)).await;
        let err = cache
            .get_or_fetch(&key, max_age, || async {
                Err(ConnectorError::TransientNetwork("reset".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::TransientNetwork(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_every_entry() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let fetch = counting_fetch(calls.clone(), json!(1));
        let max_age = Duration::from_secs(300);

        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        cache.clear();
        assert_eq!(cache.peek(&key()), None);
        cache.get_or_fetch(&key(), max_age, &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_answers_are_cached_too() {
        let cache = ResourceCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let fetch = move || {
            calls_in.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        };

        let first = cache.get_or_fetch(&key(), Duration::from_secs(60), &fetch).await.unwrap();
        let second = cache.get_or_fetch(&key(), Duration::from_secs(60), &fetch).await.unwrap();
        assert_eq!(first, None);
        assert_eq!(second, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
