//! ============================================================================
//! UI Controller - Task card presentation adapter
//! ============================================================================
//! Consumes dispatcher events and repaints task cards through `TaskCardView`:
//! loaders on/off, result messages with auto-hide, completed state, and
//! action links (only links that passed the URL guard are ever bound).
//! The verification core never touches a rendering surface directly.
//! ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatcher::TargetHintSource;
use crate::types::{Reward, TaskEvent};
use crate::verifier::UrlRejection;

/// Default time a result message stays on a card
pub const DEFAULT_MESSAGE_AUTO_HIDE: Duration = Duration::from_secs(5);

/// Rendering surface for task cards, keyed by task id
pub trait TaskCardView: Send + Sync {
    fn set_loading(&self, task_id: &str, loading: bool);

    fn show_message(&self, task_id: &str, message: &str, success: bool);

    fn clear_message(&self, task_id: &str);

    fn mark_completed(&self, task_id: &str, reward: Option<&Reward>);

    fn set_action_url(&self, task_id: &str, url: &str);

    /// Target progress rendered on the card, if any
    fn target_hint(&self, _task_id: &str) -> Option<u32> {
        None
    }
}

/// View that renders to the log, used by the CLI
pub struct TracingCardView;

impl TaskCardView for TracingCardView {
    fn set_loading(&self, task_id: &str, loading: bool) {
        debug!("[{}] loading: {}", task_id, loading);
    }

    fn show_message(&self, task_id: &str, message: &str, success: bool) {
        if success {
            info!("[{}] ✓ {}", task_id, message);
        } else {
            warn!("[{}] ✗ {}", task_id, message);
        }
    }

    fn clear_message(&self, task_id: &str) {
        debug!("[{}] message cleared", task_id);
    }

    fn mark_completed(&self, task_id: &str, reward: Option<&Reward>) {
        match reward {
            Some(r) if !r.is_empty() => info!(
                "[{}] completed, reward: {} WINIX, {} tokens",
                task_id, r.winix, r.tokens
            ),
            _ => info!("[{}] completed", task_id),
        }
    }

    fn set_action_url(&self, task_id: &str, url: &str) {
        debug!("[{}] action url: {}", task_id, url);
    }
}

pub struct UiController {
    view: Arc<dyn TaskCardView>,
    auto_hide: Duration,
    loaders: Mutex<HashSet<String>>,
    /// Bumped per message so a stale auto-hide does not clear a newer one
    message_generation: Arc<Mutex<HashMap<String, u64>>>,
}

impl UiController {
    pub fn new(view: Arc<dyn TaskCardView>) -> Self {
        Self::with_auto_hide(view, DEFAULT_MESSAGE_AUTO_HIDE)
    }

    pub fn with_auto_hide(view: Arc<dyn TaskCardView>, auto_hide: Duration) -> Self {
        Self {
            view,
            auto_hide,
            loaders: Mutex::new(HashSet::new()),
            message_generation: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn show_verification_loader(&self, task_id: &str) {
        self.loaders.lock().await.insert(task_id.to_string());
        self.view.set_loading(task_id, true);
    }

    pub async fn hide_verification_loader(&self, task_id: &str) {
        if self.loaders.lock().await.remove(task_id) {
            self.view.set_loading(task_id, false);
        }
    }

    pub async fn is_loading(&self, task_id: &str) -> bool {
        self.loaders.lock().await.contains(task_id)
    }

    /// Repaint the card an event refers to
    pub async fn apply_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::VerificationResult { task_id, result, .. } => {
                self.hide_verification_loader(task_id).await;
                self.show_message(task_id, &result.message, result.success)
                    .await;
            }
            TaskEvent::TaskCompleted { task_id, reward, .. } => {
                self.view.mark_completed(task_id, reward.as_ref());
            }
            TaskEvent::VerificationError { task_id, error, .. } => {
                self.hide_verification_loader(task_id).await;
                self.show_message(task_id, error, false).await;
            }
        }
    }

    /// Bind a vetted action link to a card. Rejected links are never bound.
    pub fn bind_action_url(&self, task_id: &str, checked: Result<Url, UrlRejection>) -> Option<String> {
        match checked {
            Ok(url) => {
                self.view.set_action_url(task_id, url.as_str());
                Some(url.into())
            }
            Err(rejection) => {
                warn!("Not binding action link for {}: {}", task_id, rejection);
                None
            }
        }
    }

    /// Apply events from the dispatcher until the channel closes
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: broadcast::Receiver<TaskEvent>) -> JoinHandle<()> {
        let ui = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => ui.apply_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("UI event loop lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("UI event loop stopped");
        })
    }

    async fn show_message(&self, task_id: &str, message: &str, success: bool) {
        self.view.show_message(task_id, message, success);

        let generation = {
            let mut generations = self.message_generation.lock().await;
            let counter = generations.entry(task_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let view = Arc::clone(&self.view);
        let generations = Arc::clone(&self.message_generation);
        let delay = self.auto_hide;
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut generations = generations.lock().await;
            if generations.get(&task_id) == Some(&generation) {
                generations.remove(&task_id);
                view.clear_message(&task_id);
            }
        });
    }
}

impl TargetHintSource for UiController {
    fn target_hint(&self, task_id: &str) -> Option<u32> {
        self.view.target_hint(task_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// What a recording view was asked to do
    #[derive(Debug, Clone, PartialEq)]
    pub enum Paint {
        Loading(String, bool),
        Message(String, String, bool),
        Cleared(String),
        Completed(String, Option<Reward>),
        ActionUrl(String, String),
    }

    #[derive(Default)]
    pub struct RecordingView {
        pub paints: StdMutex<Vec<Paint>>,
        pub hints: StdMutex<HashMap<String, u32>>,
    }

    impl RecordingView {
        pub fn paints(&self) -> Vec<Paint> {
            self.paints.lock().unwrap().clone()
        }

        fn push(&self, paint: Paint) {
            self.paints.lock().unwrap().push(paint);
        }
    }

    impl TaskCardView for RecordingView {
        fn set_loading(&self, task_id: &str, loading: bool) {
            self.push(Paint::Loading(task_id.into(), loading));
        }

        fn show_message(&self, task_id: &str, message: &str, success: bool) {
            self.push(Paint::Message(task_id.into(), message.into(), success));
        }

        fn clear_message(&self, task_id: &str) {
            self.push(Paint::Cleared(task_id.into()));
        }

        fn mark_completed(&self, task_id: &str, reward: Option<&Reward>) {
            self.push(Paint::Completed(task_id.into(), reward.cloned()));
        }

        fn set_action_url(&self, task_id: &str, url: &str) {
            self.push(Paint::ActionUrl(task_id.into(), url.into()));
        }

        fn target_hint(&self, task_id: &str) -> Option<u32> {
            self.hints.lock().unwrap().get(task_id).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Paint, RecordingView};
    use super::*;
    use crate::types::VerificationResult;

    fn result_event(task_id: &str, success: bool, message: &str) -> TaskEvent {
        let result = if success {
            VerificationResult::success(task_id, message)
        } else {
            VerificationResult::failure(task_id, message)
        };
        TaskEvent::VerificationResult {
            task_id: task_id.into(),
            result,
            timestamp: 0,
            event_id: None,
        }
    }

    #[tokio::test]
    async fn test_loader_show_hide() {
        let view = Arc::new(RecordingView::default());
        let ui = UiController::new(view.clone());

        ui.show_verification_loader("t").await;
        assert!(ui.is_loading("t").await);
        ui.hide_verification_loader("t").await;
        ui.hide_verification_loader("t").await;
        assert!(!ui.is_loading("t").await);

        assert_eq!(
            view.paints(),
            vec![Paint::Loading("t".into(), true), Paint::Loading("t".into(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_message_auto_hides() {
        let view = Arc::new(RecordingView::default());
        let ui = UiController::new(view.clone());
        ui.show_verification_loader("t").await;

        ui.apply_event(&result_event("t", false, "Not subscribed")).await;
        assert!(!ui.is_loading("t").await);
        assert!(view
            .paints()
            .contains(&Paint::Message("t".into(), "Not subscribed".into(), false)));

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(!view.paints().contains(&Paint::Cleared("t".into())));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(view.paints().contains(&Paint::Cleared("t".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_message_survives_stale_timer() {
        let view = Arc::new(RecordingView::default());
        let ui = UiController::new(view.clone());

        ui.apply_event(&result_event("t", false, "first")).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        ui.apply_event(&result_event("t", true, "second")).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let cleared = view.paints().iter().filter(|p| **p == Paint::Cleared("t".into())).count();
        assert_eq!(cleared, 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let cleared = view.paints().iter().filter(|p| **p == Paint::Cleared("t".into())).count();
        assert_eq!(cleared, 1);
    }

    #[tokio::test]
    async fn test_completed_and_error_events() {
        let view = Arc::new(RecordingView::default());
        let ui = UiController::new(view.clone());

        ui.apply_event(&TaskEvent::TaskCompleted {
            task_id: "t".into(),
            reward: Some(Reward::winix(10.0)),
            timestamp: 0,
            event_id: None,
        })
        .await;
        ui.apply_event(&TaskEvent::VerificationError {
            task_id: "u".into(),
            error: "setup failed".into(),
            timestamp: 0,
            event_id: None,
        })
        .await;

        let paints = view.paints();
        assert!(paints.contains(&Paint::Completed("t".into(), Some(Reward::winix(10.0)))));
        assert!(paints.contains(&Paint::Message("u".into(), "setup failed".into(), false)));
    }

    #[test]
    fn test_rejected_link_never_bound() {
        let view = Arc::new(RecordingView::default());
        let ui = UiController::new(view.clone());

        let bound = ui.bind_action_url("p", Err(UrlRejection::DomainNotAllowed("evil.example".into())));
        assert!(bound.is_none());
        assert!(view.paints().is_empty());

        let url = Url::parse("https://partner.io/x").unwrap();
        assert_eq!(ui.bind_action_url("p", Ok(url)).as_deref(), Some("https://partner.io/x"));
        assert_eq!(
            view.paints(),
            vec![Paint::ActionUrl("p".into(), "https://partner.io/x".into())]
        );
    }

    #[tokio::test]
    async fn test_event_loop_repaints() {
        let view = Arc::new(RecordingView::default());
        let ui = Arc::new(UiController::new(view.clone()));
        let (tx, rx) = broadcast::channel(8);
        let handle = ui.spawn_event_loop(rx);

        tx.send(result_event("t", true, "ok")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(view.paints().contains(&Paint::Message("t".into(), "ok".into(), true)));
    }
}
