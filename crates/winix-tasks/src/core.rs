//! ============================================================================
//! Verification Core - Registry, in-flight attempts, orchestration
//! ============================================================================
//! One verification per task id at a time: concurrent callers join the
//! attempt already in flight and observe the same result. Attempts run on
//! spawned tasks so they finish even when every caller has gone away.
//!
//! Flow per attempt:
//! 1. resolve the task and its verifier (declared tag, detected type, generic)
//! 2. run the verifier, turning `Err` and panics into failed results
//! 3. cache successful results
//! 4. hand the result to the event dispatcher
//! 5. clear the in-flight marker
//! ============================================================================

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::detector::TypeDetector;
use crate::dispatcher::EventDispatcher;
use crate::error::VerificationError;
use crate::store::TaskStore;
use crate::types::{TaskType, VerificationResult};
use crate::verifier::Verifier;

/// Message for attempts whose verifier failed internally
pub const GENERIC_FAILURE_MESSAGE: &str = "Verification failed. Please try again later.";

type SharedOutcome = Shared<BoxFuture<'static, VerificationResult>>;

/// Bookkeeping for one in-flight verification
struct VerificationAttempt {
    attempt_id: Uuid,
    started_at: Instant,
    callers: usize,
    outcome: SharedOutcome,
}

type VerifierRegistry = Arc<RwLock<HashMap<String, Arc<dyn Verifier>>>>;
type AttemptMap = Arc<Mutex<HashMap<String, VerificationAttempt>>>;

/// Everything a spawned attempt needs, detached from the core's lifetime
#[derive(Clone)]
struct AttemptContext {
    verifiers: VerifierRegistry,
    attempts: AttemptMap,
    store: Arc<dyn TaskStore>,
    cache: Arc<CacheManager>,
    dispatcher: Arc<EventDispatcher>,
}

pub struct VerificationCore {
    verifiers: VerifierRegistry,
    attempts: AttemptMap,
    store: RwLock<Option<Arc<dyn TaskStore>>>,
    cache: Arc<CacheManager>,
    dispatcher: Arc<EventDispatcher>,
}

impl VerificationCore {
    pub fn new(cache: Arc<CacheManager>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            verifiers: Arc::new(RwLock::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            store: RwLock::new(None),
            cache,
            dispatcher,
        }
    }

    /// Bind the task store. Verification fails with `NotInitialized` until
    /// this has been called.
    pub async fn initialize(&self, store: Arc<dyn TaskStore>) {
        *self.store.write().await = Some(store);
        info!("Verification core initialized");
    }

    pub async fn store(&self) -> Option<Arc<dyn TaskStore>> {
        self.store.read().await.clone()
    }

    /// Install or replace the verifier for a type tag
    pub async fn register_verifier(
        &self,
        type_tag: &str,
        verifier: Arc<dyn Verifier>,
    ) -> Result<(), VerificationError> {
        validate_tag(type_tag)?;
        if verifier.verifier_type().trim().is_empty() {
            return Err(VerificationError::InvalidVerifier(format!(
                "verifier for '{}' reports an empty type",
                type_tag
            )));
        }

        let previous = self
            .verifiers
            .write()
            .await
            .insert(type_tag.to_string(), verifier);
        if previous.is_some() {
            info!("Replaced verifier for '{}'", type_tag);
        } else {
            debug!("Registered verifier for '{}'", type_tag);
        }
        Ok(())
    }

    /// Registered tags, sorted
    pub async fn verifier_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.verifiers.read().await.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub async fn verify_task(&self, task_id: &str) -> Result<VerificationResult, VerificationError> {
        self.verify_task_with_event(task_id, None).await
    }

    /// Verify a task, dispatching under `event_id` (a fresh uuid when None).
    ///
    /// Joins an attempt already in flight for the same task; the joining
    /// caller's event id is ignored since the attempt dispatches once.
    pub async fn verify_task_with_event(
        &self,
        task_id: &str,
        event_id: Option<&str>,
    ) -> Result<VerificationResult, VerificationError> {
        let task_id = normalize_task_id(task_id)?;
        let store = self
            .store
            .read()
            .await
            .clone()
            .ok_or(VerificationError::NotInitialized)?;

        let outcome = {
            let mut attempts = self.attempts.lock().await;
            if let Some(attempt) = attempts.get_mut(task_id) {
                attempt.callers += 1;
                debug!(
                    "Joining verification of {} ({} callers, running {:?})",
                    task_id,
                    attempt.callers,
                    attempt.started_at.elapsed()
                );
                attempt.outcome.clone()
            } else {
                if let Some(cached) = self.cache.get_cached_result(task_id).await {
                    debug!("Returning cached verification for {}", task_id);
                    return Ok(cached);
                }

                let attempt_id = Uuid::new_v4();
                let event_id = event_id
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let ctx = AttemptContext {
                    verifiers: Arc::clone(&self.verifiers),
                    attempts: Arc::clone(&self.attempts),
                    store,
                    cache: Arc::clone(&self.cache),
                    dispatcher: Arc::clone(&self.dispatcher),
                };

                info!("Starting verification of {} (event {})", task_id, event_id);
                let outcome = spawn_attempt(ctx, task_id.to_string(), attempt_id, event_id);
                attempts.insert(
                    task_id.to_string(),
                    VerificationAttempt {
                        attempt_id,
                        started_at: Instant::now(),
                        callers: 1,
                        outcome: outcome.clone(),
                    },
                );
                outcome
            }
        };

        Ok(outcome.await)
    }

    pub async fn is_verification_in_progress(&self, task_id: &str) -> bool {
        match normalize_task_id(task_id) {
            Ok(task_id) => self.attempts.lock().await.contains_key(task_id),
            Err(_) => false,
        }
    }

    /// Task ids currently being verified, sorted
    pub async fn active_verifications(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.attempts.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget in-flight markers. Running attempts are not aborted.
    pub async fn reset_verification_attempts(&self) {
        let cleared = {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.len();
            attempts.clear();
            count
        };
        if cleared > 0 {
            warn!("Cleared {} in-flight verification markers", cleared);
        }
    }

    /// Forget in-flight markers and cached results
    pub async fn reset_state(&self) {
        self.reset_verification_attempts().await;
        self.cache.clear_cache().await;
        info!("Verification state reset");
    }
}

/// Task ids are compared without surrounding whitespace
pub(crate) fn normalize_task_id(task_id: &str) -> Result<&str, VerificationError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        Err(VerificationError::InvalidTaskId)
    } else {
        Ok(task_id)
    }
}

/// Tags are non-empty and limited to `[a-z0-9_-]`
fn validate_tag(tag: &str) -> Result<(), VerificationError> {
    let valid = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(VerificationError::InvalidVerifier(format!(
            "malformed type tag '{}'",
            tag
        )))
    }
}

fn spawn_attempt(ctx: AttemptContext, task_id: String, attempt_id: Uuid, event_id: String) -> SharedOutcome {
    let attempts = Arc::clone(&ctx.attempts);
    let fallback_id = task_id.clone();
    let handle = tokio::spawn(run_attempt(ctx, task_id, attempt_id, event_id));

    async move {
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Verification task for {} did not finish: {}", fallback_id, e);
                remove_attempt(&attempts, &fallback_id, attempt_id).await;
                VerificationResult::failure(fallback_id, GENERIC_FAILURE_MESSAGE)
            }
        }
    }
    .boxed()
    .shared()
}

async fn run_attempt(ctx: AttemptContext, task_id: String, attempt_id: Uuid, event_id: String) -> VerificationResult {
    let (detected, task) = TypeDetector::resolve(&task_id, Some(ctx.store.as_ref())).await;

    let verifier = {
        let verifiers = ctx.verifiers.read().await;
        task.as_ref()
            .and_then(|t| t.declared_tag())
            .and_then(|tag| verifiers.get(&tag).cloned())
            .or_else(|| verifiers.get(detected.as_str()).cloned())
            .or_else(|| verifiers.get(TaskType::Generic.as_str()).cloned())
    };

    let result = match verifier {
        Some(verifier) => {
            debug!("Verifying {} with '{}' verifier", task_id, verifier.verifier_type());
            match AssertUnwindSafe(verifier.verify(&task_id, task.as_ref()))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("Verifier for {} returned an error: {:#}", task_id, e);
                    VerificationResult::failure(&task_id, GENERIC_FAILURE_MESSAGE)
                        .with_data(serde_json::json!({ "error": e.to_string() }))
                }
                Err(_) => {
                    error!("Verifier for {} panicked", task_id);
                    VerificationResult::failure(&task_id, GENERIC_FAILURE_MESSAGE)
                }
            }
        }
        None => {
            warn!("No verifier registered for {} ({})", task_id, detected);
            VerificationResult::failure(&task_id, GENERIC_FAILURE_MESSAGE)
        }
    };

    if result.success {
        ctx.cache.cache_result(result.clone()).await;
    }

    ctx.dispatcher
        .dispatch_verification_event(&task_id, &result, Some(&event_id), ctx.store.as_ref())
        .await;

    remove_attempt(&ctx.attempts, &task_id, attempt_id).await;
    info!(
        "Verification of {} finished: {}",
        task_id,
        if result.success { "success" } else { "failure" }
    );
    result
}

/// Remove the in-flight marker only if it still belongs to this attempt
async fn remove_attempt(attempts: &AttemptMap, task_id: &str, attempt_id: Uuid) {
    let mut attempts = attempts.lock().await;
    if attempts
        .get(task_id)
        .map(|a| a.attempt_id == attempt_id)
        .unwrap_or(false)
    {
        attempts.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiVerifyResponse;
    use crate::store::InMemoryTaskStore;
    use crate::types::{Reward, Task, TaskEvent};
    use crate::verifier::testing::MockApi;
    use crate::verifier::{GenericVerifier, SocialVerifier, UrlGuard};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixture {
        core: Arc<VerificationCore>,
        api: Arc<MockApi>,
        store: Arc<InMemoryTaskStore>,
        dispatcher: Arc<EventDispatcher>,
    }

    async fn fixture(api: MockApi, tasks: Vec<Task>) -> Fixture {
        let api = Arc::new(api);
        let cache = Arc::new(CacheManager::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&cache)));
        let core = Arc::new(VerificationCore::new(cache, Arc::clone(&dispatcher)));
        let store = Arc::new(InMemoryTaskStore::with_tasks(tasks));

        core.register_verifier("generic", Arc::new(GenericVerifier::new(api.clone())))
            .await
            .unwrap();
        core.register_verifier(
            "social",
            Arc::new(SocialVerifier::new(api.clone(), UrlGuard::social(&[]))),
        )
        .await
        .unwrap();
        core.initialize(store.clone()).await;

        Fixture {
            core,
            api,
            store,
            dispatcher,
        }
    }

    fn ok_api() -> MockApi {
        MockApi::responding(ApiVerifyResponse::ok("Verified", Some(Reward::winix(10.0))))
    }

    struct TaggedVerifier {
        tag: &'static str,
        behaviour: Behaviour,
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    #[async_trait]
    impl Verifier for TaggedVerifier {
        fn verifier_type(&self) -> &str {
            self.tag
        }

        async fn verify(&self, task_id: &str, _task: Option<&Task>) -> anyhow::Result<VerificationResult> {
            match self.behaviour {
                Behaviour::Succeed => Ok(VerificationResult::success(task_id, "custom ok")),
                Behaviour::Fail => Err(anyhow::anyhow!("quiz backend down")),
                Behaviour::Panic => panic!("verifier bug"),
            }
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_task_id() {
        let f = fixture(ok_api(), vec![]).await;
        assert_eq!(f.core.verify_task("  ").await, Err(VerificationError::InvalidTaskId));
        assert_eq!(f.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_requires_store() {
        let cache = Arc::new(CacheManager::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&cache)));
        let core = VerificationCore::new(cache, dispatcher);
        assert_eq!(core.verify_task("t").await, Err(VerificationError::NotInitialized));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_attempt() {
        let f = fixture(ok_api().with_delay(Duration::from_millis(100)), vec![]).await;

        let (a, b) = tokio::join!(f.core.verify_task("t"), f.core.verify_task("t"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(f.api.calls(), 1);
        assert_eq!(a, b);
        assert!(a.success);
        assert!(!f.core.is_verification_in_progress("t").await);
    }

    #[tokio::test]
    async fn test_in_progress_while_running() {
        let f = fixture(ok_api().with_delay(Duration::from_millis(100)), vec![]).await;

        let core = Arc::clone(&f.core);
        let running = tokio::spawn(async move { core.verify_task("t").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.core.is_verification_in_progress("t").await);
        assert_eq!(f.core.active_verifications().await, vec!["t".to_string()]);

        running.await.unwrap().unwrap();
        assert!(!f.core.is_verification_in_progress("t").await);
        assert!(f.core.active_verifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_padded_id_tracks_same_attempt() {
        let f = fixture(ok_api().with_delay(Duration::from_millis(100)), vec![]).await;

        let core = Arc::clone(&f.core);
        let running = tokio::spawn(async move { core.verify_task(" t ").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.core.is_verification_in_progress(" t ").await);
        assert!(f.core.is_verification_in_progress("t").await);
        assert!(!f.core.is_verification_in_progress("   ").await);

        let joined = f.core.verify_task("t").await.unwrap();
        let first = running.await.unwrap().unwrap();
        assert_eq!(first, joined);
        assert_eq!(f.api.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_success_skips_network() {
        let f = fixture(ok_api(), vec![]).await;
        let mut events = f.dispatcher.subscribe();

        let first = f.core.verify_task("t").await.unwrap();
        let second = f.core.verify_task("t").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.api.calls(), 1);

        // only one result event for the two calls
        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "task-verification-result");
        let completed = events.recv().await.unwrap();
        assert_eq!(completed.name(), "task-completed");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let f = fixture(MockApi::responding(ApiVerifyResponse::rejected("Not yet")), vec![]).await;

        assert!(!f.core.verify_task("t").await.unwrap().success);
        assert!(!f.core.verify_task("t").await.unwrap().success);
        assert_eq!(f.api.calls(), 2);
    }

    #[tokio::test]
    async fn test_repeated_event_id_writes_once() {
        let f = fixture(ok_api(), vec![Task::new("t", TaskType::Generic)]).await;

        f.core.verify_task_with_event("t", Some("evt-1")).await.unwrap();
        f.core.reset_state().await;
        f.core.verify_task_with_event("t", Some("evt-1")).await.unwrap();

        assert_eq!(f.api.calls(), 2);
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_uses_generic() {
        let mut task = Task::new("m", TaskType::Generic);
        task.task_type = Some("mystery".into());
        let f = fixture(ok_api(), vec![task]).await;

        f.core.verify_task("m").await.unwrap();
        assert_eq!(f.api.last_request().unwrap().verification_type, "generic");
    }

    #[tokio::test]
    async fn test_missing_builtin_verifier_falls_back_to_generic() {
        let task = Task::new("lim", TaskType::Limited);
        let f = fixture(ok_api(), vec![task]).await;

        f.core.verify_task("lim").await.unwrap();
        assert_eq!(f.api.last_request().unwrap().verification_type, "generic");
    }

    #[tokio::test]
    async fn test_custom_tag_routes_to_registered_verifier() {
        let mut task = Task::new("q", TaskType::Generic);
        task.task_type = Some("quiz".into());
        let f = fixture(ok_api(), vec![task]).await;
        f.core
            .register_verifier(
                "quiz",
                Arc::new(TaggedVerifier {
                    tag: "quiz",
                    behaviour: Behaviour::Succeed,
                }),
            )
            .await
            .unwrap();

        let result = f.core.verify_task("q").await.unwrap();
        assert_eq!(result.message, "custom ok");
        assert_eq!(f.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_verifier_error_becomes_failure() {
        let mut task = Task::new("q", TaskType::Generic);
        task.task_type = Some("quiz".into());
        let f = fixture(ok_api(), vec![task]).await;
        f.core
            .register_verifier(
                "quiz",
                Arc::new(TaggedVerifier {
                    tag: "quiz",
                    behaviour: Behaviour::Fail,
                }),
            )
            .await
            .unwrap();

        let result = f.core.verify_task("q").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, GENERIC_FAILURE_MESSAGE);
        assert!(!f.core.is_verification_in_progress("q").await);
    }

    #[tokio::test]
    async fn test_verifier_panic_becomes_failure() {
        let mut task = Task::new("q", TaskType::Generic);
        task.task_type = Some("quiz".into());
        let f = fixture(ok_api(), vec![task]).await;
        let mut events = f.dispatcher.subscribe();
        f.core
            .register_verifier(
                "quiz",
                Arc::new(TaggedVerifier {
                    tag: "quiz",
                    behaviour: Behaviour::Panic,
                }),
            )
            .await
            .unwrap();

        let result = f.core.verify_task("q").await.unwrap();
        assert!(!result.success);
        assert!(!f.core.is_verification_in_progress("q").await);

        match events.recv().await.unwrap() {
            TaskEvent::VerificationResult { result, .. } => assert!(!result.success),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_registration_leaves_registry_unchanged() {
        let f = fixture(ok_api(), vec![]).await;
        let before = f.core.verifier_types().await;

        let nameless = f
            .core
            .register_verifier(
                "custom",
                Arc::new(TaggedVerifier {
                    tag: "",
                    behaviour: Behaviour::Succeed,
                }),
            )
            .await;
        assert!(matches!(nameless, Err(VerificationError::InvalidVerifier(_))));

        for tag in ["", "Custom", "has space", "émoji"] {
            let err = f
                .core
                .register_verifier(
                    tag,
                    Arc::new(TaggedVerifier {
                        tag: "custom",
                        behaviour: Behaviour::Succeed,
                    }),
                )
                .await;
            assert!(matches!(err, Err(VerificationError::InvalidVerifier(_))), "tag {:?}", tag);
        }

        assert_eq!(f.core.verifier_types().await, before);
        assert_eq!(before, vec!["generic".to_string(), "social".to_string()]);
    }

    #[tokio::test]
    async fn test_reset_allows_new_attempt() {
        let f = fixture(ok_api().with_delay(Duration::from_millis(100)), vec![]).await;

        let core = Arc::clone(&f.core);
        let first = tokio::spawn(async move { core.verify_task("t").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        f.core.reset_verification_attempts().await;
        assert!(!f.core.is_verification_in_progress("t").await);

        let second = f.core.verify_task("t").await.unwrap();
        first.await.unwrap().unwrap();

        assert!(second.success);
        assert_eq!(f.api.calls(), 2);
        assert!(!f.core.is_verification_in_progress("t").await);
    }
}
