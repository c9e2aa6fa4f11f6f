//! ============================================================================
//! Cache Manager - Verification results and processed-event markers
//! ============================================================================
//! Short-lived memoization so repeated verifications inside the TTL window do
//! not hit the backend, plus the markers that keep event delivery idempotent.
//! Entries past their TTL are misses and are removed by a periodic sweep.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::types::VerificationResult;

/// Default lifetime of a cached verification result (5 minutes)
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(300);

/// Lifetime of a processed-event marker (1 hour)
pub const PROCESSED_EVENT_TTL: Duration = Duration::from_secs(3600);

/// Default sweep interval (30 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1800);

/// Maximum number of entries per map to prevent unbounded growth
const MAX_CACHE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct CachedResult {
    result: VerificationResult,
    cached_at: Instant,
}

#[derive(Debug, Clone)]
struct ProcessedMarker {
    #[allow(dead_code)]
    metadata: Option<serde_json::Value>,
    cached_at: Instant,
}

/// Entry counts, total and still-valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub results: usize,
    pub valid_results: usize,
    pub events: usize,
    pub valid_events: usize,
}

/// Cache for verification results and processed-event markers
pub struct CacheManager {
    results: RwLock<HashMap<String, CachedResult>>,
    events: RwLock<HashMap<String, ProcessedMarker>>,
    result_ttl: Duration,
    event_ttl: Duration,
}

impl CacheManager {
    /// Create a cache with the default TTLs
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_RESULT_TTL, PROCESSED_EVENT_TTL)
    }

    /// Create a cache with custom TTLs
    pub fn with_ttl(result_ttl: Duration, event_ttl: Duration) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            result_ttl,
            event_ttl,
        }
    }

    // ========================================================================
    // Verification Results
    // ========================================================================

    /// Store a result under its task id
    pub async fn cache_result(&self, result: VerificationResult) {
        let mut results = self.results.write().await;
        if results.len() >= MAX_CACHE_SIZE && !results.contains_key(&result.task_id) {
            evict_oldest(&mut results, |e| e.cached_at);
        }
        debug!("Caching verification result for {}", result.task_id);
        results.insert(
            result.task_id.clone(),
            CachedResult {
                result,
                cached_at: Instant::now(),
            },
        );
    }

    /// Fresh cached result for a task, None on miss or expiry
    pub async fn get_cached_result(&self, task_id: &str) -> Option<VerificationResult> {
        let results = self.results.read().await;
        let cached = results.get(task_id)?;
        let age = cached.cached_at.elapsed();
        if age < self.result_ttl {
            debug!("Cache hit for task {} (age: {:?})", task_id, age);
            Some(cached.result.clone())
        } else {
            debug!("Cached result for task {} expired", task_id);
            None
        }
    }

    /// Drop the cached result for one task
    pub async fn invalidate_result(&self, task_id: &str) {
        if self.results.write().await.remove(task_id).is_some() {
            info!("Invalidated cached result for task {}", task_id);
        }
    }

    // ========================================================================
    // Processed Events
    // ========================================================================

    /// Record an event id as processed, overwriting any earlier marker
    pub async fn cache_processed_event(&self, event_id: &str, metadata: Option<serde_json::Value>) {
        let mut events = self.events.write().await;
        if events.len() >= MAX_CACHE_SIZE && !events.contains_key(event_id) {
            evict_oldest(&mut events, |e| e.cached_at);
        }
        events.insert(
            event_id.to_string(),
            ProcessedMarker {
                metadata,
                cached_at: Instant::now(),
            },
        );
    }

    /// Whether a non-expired marker exists for the event id
    pub async fn is_event_processed(&self, event_id: &str) -> bool {
        let events = self.events.read().await;
        events
            .get(event_id)
            .map(|m| m.cached_at.elapsed() < self.event_ttl)
            .unwrap_or(false)
    }

    /// Mark an event processed unless a live marker already exists.
    /// Returns true when this call set the marker.
    pub async fn mark_event_processed_if_new(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let mut events = self.events.write().await;
        if let Some(marker) = events.get(event_id) {
            if marker.cached_at.elapsed() < self.event_ttl {
                return false;
            }
        }
        if events.len() >= MAX_CACHE_SIZE {
            evict_oldest(&mut events, |e| e.cached_at);
        }
        events.insert(
            event_id.to_string(),
            ProcessedMarker {
                metadata,
                cached_at: Instant::now(),
            },
        );
        true
    }

    /// Forget every processed-event marker, returning how many were dropped
    pub async fn clear_processed_events(&self) -> usize {
        let mut events = self.events.write().await;
        let count = events.len();
        events.clear();
        if count > 0 {
            info!("Cleared {} processed-event markers", count);
        }
        count
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every entry immediately
    pub async fn clear_cache(&self) {
        let mut results = self.results.write().await;
        let mut events = self.events.write().await;
        let count = results.len() + events.len();
        results.clear();
        events.clear();
        info!("Cleared {} cache entries", count);
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn clear_expired(&self) -> usize {
        let removed_results = {
            let mut results = self.results.write().await;
            let before = results.len();
            results.retain(|_, e| e.cached_at.elapsed() < self.result_ttl);
            before - results.len()
        };
        let removed_events = {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, m| m.cached_at.elapsed() < self.event_ttl);
            before - events.len()
        };

        let removed = removed_results + removed_events;
        if removed > 0 {
            info!(
                "Cache sweep removed {} entries ({} results, {} events)",
                removed, removed_results, removed_events
            );
        }
        removed
    }

    /// Run `clear_expired` every `interval` until the handle is cancelled
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let cache = Arc::clone(self);
        CleanupHandle::spawn("cache", interval, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.clear_expired().await;
            }
        })
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let results = self.results.read().await;
        let events = self.events.read().await;
        CacheStats {
            results: results.len(),
            valid_results: results
                .values()
                .filter(|e| e.cached_at.elapsed() < self.result_ttl)
                .count(),
            events: events.len(),
            valid_events: events
                .values()
                .filter(|m| m.cached_at.elapsed() < self.event_ttl)
                .count(),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_oldest<T>(map: &mut HashMap<String, T>, cached_at: impl Fn(&T) -> Instant) {
    if let Some(oldest_key) = map
        .iter()
        .min_by_key(|(_, v)| cached_at(v))
        .map(|(k, _)| k.clone())
    {
        map.remove(&oldest_key);
    }
}

/// Handle to a periodic sweep task. Aborts the task on cancel or drop.
pub struct CleanupHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    pub(crate) fn spawn<F, Fut>(name: &'static str, interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep().await;
            }
        });
        debug!("Started {} sweep every {:?}", name, interval);
        Self { name, task }
    }

    /// Stop the sweep
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            debug!("Cancelled {} sweep", self.name);
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
