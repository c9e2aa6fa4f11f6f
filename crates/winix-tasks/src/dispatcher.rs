//! ============================================================================
//! Event Dispatcher - Progress writes and domain notifications
//! ============================================================================
//! Turns verification results into task-store progress writes and broadcast
//! events, exactly once per event id:
//! - `task-verification-result` for every dispatched result
//! - `task-completed` after a successful result, once the progress write has
//!   been issued and the completion delay has passed
//! - `task-verification-error` when verification could not be attempted
//! ============================================================================

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, CleanupHandle, PROCESSED_EVENT_TTL};
use crate::store::TaskStore;
use crate::types::{now_millis, ProgressUpdate, TaskEvent, VerificationResult};

/// Default delay before `task-completed` is emitted
pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(50);

/// Buffered events per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Source of a task's target progress when neither the task nor its
/// progress record declare one (the rendered task card, for instance)
pub trait TargetHintSource: Send + Sync {
    fn target_hint(&self, task_id: &str) -> Option<u32>;
}

/// Whether a dispatch call did anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    Duplicate,
}

pub struct EventDispatcher {
    sender: broadcast::Sender<TaskEvent>,
    processed: Mutex<HashMap<String, Instant>>,
    cache: Arc<CacheManager>,
    completion_delay: Duration,
    processed_ttl: Duration,
    target_hints: RwLock<Option<Arc<dyn TargetHintSource>>>,
}

impl EventDispatcher {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self::with_timing(cache, DEFAULT_COMPLETION_DELAY, PROCESSED_EVENT_TTL)
    }

    pub fn with_timing(cache: Arc<CacheManager>, completion_delay: Duration, processed_ttl: Duration) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            processed: Mutex::new(HashMap::new()),
            cache,
            completion_delay,
            processed_ttl,
            target_hints: RwLock::new(None),
        }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub async fn set_target_hints(&self, source: Arc<dyn TargetHintSource>) {
        *self.target_hints.write().await = Some(source);
    }

    /// Dispatch a verification result.
    ///
    /// A repeated `event_id` is a no-op. Successful results also write
    /// completed progress into the store and schedule `task-completed`.
    pub async fn dispatch_verification_event(
        &self,
        task_id: &str,
        result: &VerificationResult,
        event_id: Option<&str>,
        store: &dyn TaskStore,
    ) -> DispatchOutcome {
        if let Some(id) = event_id {
            if !self.mark_processed(id, task_id).await {
                debug!("Skipping duplicate event {} for task {}", id, task_id);
                return DispatchOutcome::Duplicate;
            }
        }

        self.emit(TaskEvent::VerificationResult {
            task_id: task_id.to_string(),
            result: result.clone(),
            timestamp: now_millis(),
            event_id: event_id.map(str::to_string),
        });

        if result.success {
            self.handle_successful_verification(task_id, result, event_id, store)
                .await;
        }

        DispatchOutcome::Dispatched
    }

    /// Write completed progress and schedule the `task-completed` event
    pub async fn handle_successful_verification(
        &self,
        task_id: &str,
        result: &VerificationResult,
        event_id: Option<&str>,
        store: &dyn TaskStore,
    ) {
        let target = self.resolve_target(task_id, store).await;
        let update = ProgressUpdate::completed(target, Utc::now());

        match store.set_task_progress(task_id, update).await {
            Ok(()) => info!("Task {} completed ({} / {})", task_id, target, target),
            Err(e) => warn!("Failed to store progress for task {}: {}", task_id, e),
        }

        let sender = self.sender.clone();
        let delay = self.completion_delay;
        let event = TaskEvent::TaskCompleted {
            task_id: task_id.to_string(),
            reward: result.reward.clone(),
            timestamp: now_millis(),
            event_id: event_id.map(str::to_string),
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(event).is_err() {
                debug!("No subscribers for task-completed");
            }
        });
    }

    /// Announce that verification could not be attempted
    pub fn dispatch_verification_error_event(&self, task_id: &str, error: &str, event_id: Option<&str>) {
        warn!("Verification error for task {}: {}", task_id, error);
        self.emit(TaskEvent::VerificationError {
            task_id: task_id.to_string(),
            error: error.to_string(),
            timestamp: now_millis(),
            event_id: event_id.map(str::to_string),
        });
    }

    /// Drop local processed-event markers older than the TTL
    pub async fn clear_expired_processed_events(&self) -> usize {
        let mut processed = self.processed.lock().await;
        let before = processed.len();
        processed.retain(|_, at| at.elapsed() < self.processed_ttl);
        let removed = before - processed.len();
        if removed > 0 {
            info!("Cleared {} expired processed events", removed);
        }
        removed
    }

    /// Forget every processed-event marker, local and cached, so a
    /// repeated event id is dispatched again
    pub async fn reset_processed_events(&self) {
        let mut processed = self.processed.lock().await;
        processed.clear();
        self.cache.clear_processed_events().await;
    }

    /// Run `clear_expired_processed_events` every `interval`
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let dispatcher = Arc::clone(self);
        CleanupHandle::spawn("processed-event", interval, move || {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                dispatcher.clear_expired_processed_events().await;
            }
        })
    }

    /// Atomic check-and-mark, mirrored into the cache manager
    async fn mark_processed(&self, event_id: &str, task_id: &str) -> bool {
        let mut processed = self.processed.lock().await;
        if let Some(at) = processed.get(event_id) {
            if at.elapsed() < self.processed_ttl {
                return false;
            }
        }
        let metadata = serde_json::json!({ "task_id": task_id });
        if !self
            .cache
            .mark_event_processed_if_new(event_id, Some(metadata))
            .await
        {
            return false;
        }
        processed.insert(event_id.to_string(), Instant::now());
        true
    }

    /// Task target, then stored max progress, then the hint source, then 1
    async fn resolve_target(&self, task_id: &str, store: &dyn TaskStore) -> u32 {
        if let Some(target) = store
            .find_task_by_id(task_id)
            .await
            .and_then(|t| t.target_value)
            .filter(|t| *t > 0)
        {
            return target;
        }
        if let Some(max) = store
            .get_task_progress(task_id)
            .await
            .and_then(|p| p.max_progress)
            .filter(|m| *m > 0)
        {
            return max;
        }
        if let Some(hint) = self
            .target_hints
            .read()
            .await
            .as_ref()
            .and_then(|h| h.target_hint(task_id))
            .filter(|h| *h > 0)
        {
            return hint;
        }
        1
    }

    fn emit(&self, event: TaskEvent) {
        debug!("Emitting {} for task {}", event.name(), event.task_id());
        if self.sender.send(event).is_err() {
            debug!("No subscribers for task events");
        }
    }
}
