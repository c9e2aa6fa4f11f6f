//! Task type detection.
//!
//! Maps a task id to the verifier that should handle it. Detection never
//! fails: a missing store, a missing task or an unknown tag all resolve to
//! [`TaskType::Generic`].

use tracing::debug;

use crate::store::TaskStore;
use crate::types::{Task, TaskType};
use crate::verifier::SocialPlatform;

pub struct TypeDetector;

impl TypeDetector {
    /// Type for a task id, looked up in the store
    pub async fn get_task_type(task_id: &str, store: Option<&dyn TaskStore>) -> TaskType {
        Self::resolve(task_id, store).await.0
    }

    /// Type plus the task itself, so callers need a single store read
    pub async fn resolve(task_id: &str, store: Option<&dyn TaskStore>) -> (TaskType, Option<Task>) {
        let Some(store) = store else {
            debug!("No task store available for {}, using generic", task_id);
            return (TaskType::Generic, None);
        };

        match store.find_task_by_id(task_id).await {
            Some(task) => (Self::detect_from_task(&task), Some(task)),
            None => {
                debug!("Task {} not found, using generic", task_id);
                (TaskType::Generic, None)
            }
        }
    }

    /// Type for a task already in hand.
    ///
    /// A declared tag wins; an unknown tag is generic. Without a tag the type
    /// is inferred from metadata.
    pub fn detect_from_task(task: &Task) -> TaskType {
        if let Some(tag) = task.declared_tag() {
            return TaskType::from_tag(&tag).unwrap_or_else(|| {
                debug!("Unknown task type '{}' for {}, using generic", tag, task.id);
                TaskType::Generic
            });
        }

        if task.partner_name.is_some() {
            TaskType::Partner
        } else if task.end_date.is_some() || task.max_completions.is_some() {
            TaskType::Limited
        } else if task
            .action_url
            .as_deref()
            .map(|url| SocialPlatform::from_url(url) != SocialPlatform::Other)
            .unwrap_or(false)
        {
            TaskType::Social
        } else {
            TaskType::Generic
        }
    }
}
