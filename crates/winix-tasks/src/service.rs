//! ============================================================================
//! Verification Service - Composition root and public facade
//! ============================================================================
//! Wires cache, dispatcher, core, verifiers and the UI controller together,
//! starts the background sweeps and the card paint loop, and exposes the
//! operations the mini-app calls. `VerificationService::global` offers one
//! process-wide instance; `new` builds independent ones.
//! ============================================================================

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{HttpTaskApi, TaskApi};
use crate::cache::{CacheManager, CacheStats, CleanupHandle};
use crate::config::ServiceConfig;
use crate::core::{normalize_task_id, VerificationCore};
use crate::detector::TypeDetector;
use crate::dispatcher::EventDispatcher;
use crate::error::VerificationError;
use crate::store::TaskStore;
use crate::types::{TaskEvent, TaskType, VerificationResult};
use crate::ui::{TaskCardView, TracingCardView, UiController};
use crate::verifier::{
    GenericVerifier, LimitedVerifier, PartnerVerifier, ReferralVerifier, SocialVerifier, UrlGuard,
    Verifier,
};

static GLOBAL: OnceCell<Arc<VerificationService>> = OnceCell::new();

/// Sweeps and the paint loop, stopped by `destroy`
struct Background {
    cache_sweep: CleanupHandle,
    event_sweep: CleanupHandle,
    paint_loop: JoinHandle<()>,
}

pub struct VerificationService {
    config: ServiceConfig,
    cache: Arc<CacheManager>,
    dispatcher: Arc<EventDispatcher>,
    core: VerificationCore,
    ui: Arc<UiController>,
    partner: Arc<PartnerVerifier>,
    social_guard: UrlGuard,
    background: Mutex<Option<Background>>,
    destroyed: AtomicBool,
}

impl VerificationService {
    /// Build a service that renders task cards to the log
    pub async fn new(config: ServiceConfig, store: Arc<dyn TaskStore>, api: Arc<dyn TaskApi>) -> Self {
        Self::with_view(config, store, api, Arc::new(TracingCardView)).await
    }

    /// Build a service talking to the configured backend over HTTP
    pub async fn connect(config: ServiceConfig, store: Arc<dyn TaskStore>) -> Result<Self> {
        let api = Arc::new(HttpTaskApi::new(&config)?);
        Ok(Self::new(config, store, api).await)
    }

    pub async fn with_view(
        config: ServiceConfig,
        store: Arc<dyn TaskStore>,
        api: Arc<dyn TaskApi>,
        view: Arc<dyn TaskCardView>,
    ) -> Self {
        Wiring::new(config, api, view).await.start(store).await
    }

    /// Build a service whose registry holds the defaults plus `overrides`,
    /// registered in order. A rejected override fails construction before
    /// any background task starts.
    pub async fn with_overrides(
        config: ServiceConfig,
        store: Arc<dyn TaskStore>,
        api: Arc<dyn TaskApi>,
        view: Arc<dyn TaskCardView>,
        overrides: Vec<(String, Arc<dyn Verifier>)>,
    ) -> Result<Self, VerificationError> {
        let wiring = Wiring::new(config, api, view).await;
        for (type_tag, verifier) in overrides {
            wiring.core.register_verifier(&type_tag, verifier).await?;
        }
        Ok(wiring.start(store).await)
    }

    /// Process-wide service. Arguments are ignored once an instance exists.
    pub async fn global(config: ServiceConfig, store: Arc<dyn TaskStore>, api: Arc<dyn TaskApi>) -> Arc<Self> {
        if let Some(service) = GLOBAL.get() {
            return Arc::clone(service);
        }

        let service = Arc::new(Self::new(config, store, api).await);
        match GLOBAL.set(Arc::clone(&service)) {
            Ok(()) => service,
            Err(_) => {
                // lost the race to another initializer
                service.destroy().await;
                GLOBAL.get().map(Arc::clone).unwrap_or(service)
            }
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn verify_task(&self, task_id: &str) -> Result<VerificationResult, VerificationError> {
        self.verify_task_with_event(task_id, None).await
    }

    /// Verify a task with its card showing the loader for the duration
    pub async fn verify_task_with_event(
        &self,
        task_id: &str,
        event_id: Option<&str>,
    ) -> Result<VerificationResult, VerificationError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(VerificationError::NotInitialized);
        }
        let task_id = match normalize_task_id(task_id) {
            Ok(id) => id,
            Err(e) => {
                self.dispatcher
                    .dispatch_verification_error_event(task_id, &e.to_string(), event_id);
                return Err(e);
            }
        };

        self.ui.show_verification_loader(task_id).await;
        let outcome = self.core.verify_task_with_event(task_id, event_id).await;
        self.ui.hide_verification_loader(task_id).await;

        if let Err(e) = &outcome {
            self.dispatcher
                .dispatch_verification_error_event(task_id, &e.to_string(), event_id);
        }
        outcome
    }

    pub async fn is_verification_in_progress(&self, task_id: &str) -> bool {
        self.core.is_verification_in_progress(task_id).await
    }

    pub async fn active_verifications(&self) -> Vec<String> {
        self.core.active_verifications().await
    }

    pub async fn get_cached_result(&self, task_id: &str) -> Option<VerificationResult> {
        self.cache.get_cached_result(task_id).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear_cache().await;
    }

    /// Drop a task's cached result so the next call hits the backend
    pub async fn invalidate_result(&self, task_id: &str) {
        if let Ok(task_id) = normalize_task_id(task_id) {
            self.cache.invalidate_result(task_id).await;
        }
    }

    /// Forget processed event ids so they can be dispatched again
    pub async fn reset_processed_events(&self) {
        self.dispatcher.reset_processed_events().await;
    }

    pub async fn show_verification_loader(&self, task_id: &str) {
        self.ui.show_verification_loader(task_id).await;
    }

    pub async fn hide_verification_loader(&self, task_id: &str) {
        self.ui.hide_verification_loader(task_id).await;
    }

    /// Bind the task's action link to its card if the link is safe.
    /// Partner links are signed first. Returns the bound URL.
    pub async fn bind_action_url(&self, task_id: &str) -> Option<String> {
        let store = self.core.store().await?;
        let task = store.find_task_by_id(task_id).await?;
        let raw = task.action_url.as_deref()?;

        let checked = match TypeDetector::detect_from_task(&task) {
            TaskType::Partner => self.partner.build_action_url(task_id, raw).await,
            _ => self.social_guard.check(raw),
        };
        self.ui.bind_action_url(task_id, checked)
    }

    pub async fn reset_verification_attempts(&self) {
        self.core.reset_verification_attempts().await;
    }

    pub async fn reset_state(&self) {
        self.core.reset_state().await;
    }

    pub async fn register_verifier(
        &self,
        type_tag: &str,
        verifier: Arc<dyn Verifier>,
    ) -> Result<(), VerificationError> {
        self.core.register_verifier(type_tag, verifier).await
    }

    pub async fn verifier_types(&self) -> Vec<String> {
        self.core.verifier_types().await
    }

    /// Receive every task event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.dispatcher.subscribe()
    }

    pub fn partner_verifier(&self) -> Arc<PartnerVerifier> {
        Arc::clone(&self.partner)
    }

    /// Stop the sweeps and the paint loop. Later verifications fail with
    /// `NotInitialized`. Safe to call more than once.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(background) = self.background.lock().await.take() {
            background.cache_sweep.cancel();
            background.event_sweep.cancel();
            background.paint_loop.abort();
        }
        self.core.reset_verification_attempts().await;
        warn!("Verification service destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Components built and registered but not yet running
struct Wiring {
    config: ServiceConfig,
    cache: Arc<CacheManager>,
    dispatcher: Arc<EventDispatcher>,
    core: VerificationCore,
    ui: Arc<UiController>,
    partner: Arc<PartnerVerifier>,
    social_guard: UrlGuard,
}

impl Wiring {
    async fn new(config: ServiceConfig, api: Arc<dyn TaskApi>, view: Arc<dyn TaskCardView>) -> Self {
        let cache = Arc::new(CacheManager::with_ttl(
            config.result_cache_ttl(),
            config.processed_event_ttl(),
        ));
        let dispatcher = Arc::new(EventDispatcher::with_timing(
            Arc::clone(&cache),
            config.completion_delay(),
            config.processed_event_ttl(),
        ));
        let core = VerificationCore::new(Arc::clone(&cache), Arc::clone(&dispatcher));
        let ui = Arc::new(UiController::with_auto_hide(view, config.message_auto_hide()));

        let social_guard = UrlGuard::social(&config.blocked_domains);
        let partner = Arc::new(PartnerVerifier::new(
            Arc::clone(&api),
            UrlGuard::partner(&config.partner_domains, &config.blocked_domains),
        ));

        let defaults: [(TaskType, Arc<dyn Verifier>); 5] = [
            (
                TaskType::Social,
                Arc::new(SocialVerifier::new(Arc::clone(&api), social_guard.clone())) as Arc<dyn Verifier>,
            ),
            (
                TaskType::Referral,
                Arc::new(ReferralVerifier::new(Arc::clone(&api), social_guard.clone())) as Arc<dyn Verifier>,
            ),
            (TaskType::Limited, Arc::new(LimitedVerifier::new(Arc::clone(&api))) as Arc<dyn Verifier>),
            (TaskType::Partner, partner.clone() as Arc<dyn Verifier>),
            (TaskType::Generic, Arc::new(GenericVerifier::new(Arc::clone(&api))) as Arc<dyn Verifier>),
        ];
        for (task_type, verifier) in defaults {
            if let Err(e) = core.register_verifier(task_type.as_str(), verifier).await {
                error!("Failed to register {} verifier: {}", task_type, e);
            }
        }

        Self {
            config,
            cache,
            dispatcher,
            core,
            ui,
            partner,
            social_guard,
        }
    }

    /// Attach the store and start the sweeps and the paint loop
    async fn start(self, store: Arc<dyn TaskStore>) -> VerificationService {
        let Wiring {
            config,
            cache,
            dispatcher,
            core,
            ui,
            partner,
            social_guard,
        } = self;

        core.initialize(store).await;
        dispatcher.set_target_hints(ui.clone()).await;

        let background = Background {
            cache_sweep: cache.start_cleanup(config.cleanup_interval()),
            event_sweep: dispatcher.start_cleanup(config.cleanup_interval()),
            paint_loop: ui.spawn_event_loop(dispatcher.subscribe()),
        };

        info!(
            "Verification service ready (verifiers: {:?}, api {})",
            core.verifier_types().await,
            config.api_base_url
        );

        VerificationService {
            config,
            cache,
            dispatcher,
            core,
            ui,
            partner,
            social_guard,
            background: Mutex::new(Some(background)),
            destroyed: AtomicBool::new(false),
        }
    }
}
