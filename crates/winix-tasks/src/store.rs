//! ============================================================================
//! Task Store - Interface to the task/progress owner
//! ============================================================================
//! The verification pipeline only reads task metadata and writes progress
//! through `set_task_progress`. `InMemoryTaskStore` backs the CLI and tests
//! and can be loaded from / saved to a JSON snapshot.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{ProgressUpdate, Task, TaskProgress};

/// Owner of task definitions and per-user progress
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_task_by_id(&self, task_id: &str) -> Option<Task>;

    async fn get_task_progress(&self, task_id: &str) -> Option<TaskProgress>;

    async fn set_task_progress(&self, task_id: &str, update: ProgressUpdate) -> Result<(), StoreError>;
}

/// Serializable contents of an [`InMemoryTaskStore`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub progress: HashMap<String, TaskProgress>,
}

/// In-process task store
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    progress: RwLock<HashMap<String, TaskProgress>>,
    writes: AtomicUsize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the given tasks
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self::from_snapshot(StoreSnapshot {
            tasks: tasks.into_iter().collect(),
            progress: HashMap::new(),
        })
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Self {
            tasks: RwLock::new(tasks),
            progress: RwLock::new(snapshot.progress),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: StoreSnapshot =
            serde_json::from_str(json).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Load a snapshot file
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("Failed to read {}: {}", path.display(), e)))?;
        let store = Self::from_json(&json)?;
        info!("Loaded task snapshot from {}", path.display());
        Ok(store)
    }

    /// Current contents, tasks sorted by id
    pub async fn snapshot(&self) -> StoreSnapshot {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        StoreSnapshot {
            tasks,
            progress: self.progress.read().await.clone(),
        }
    }

    pub async fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(&self.snapshot().await)
            .map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Write a snapshot file
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json().await?;
        std::fs::write(path, json)
            .map_err(|e| StoreError::Snapshot(format!("Failed to write {}: {}", path.display(), e)))?;
        info!("Saved task snapshot to {}", path.display());
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.snapshot().await.tasks
    }

    /// Number of progress writes accepted so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_task_by_id(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    async fn get_task_progress(&self, task_id: &str) -> Option<TaskProgress> {
        self.progress.read().await.get(task_id).cloned()
    }

    async fn set_task_progress(&self, task_id: &str, update: ProgressUpdate) -> Result<(), StoreError> {
        let target = {
            let mut tasks = self.tasks.write().await;
            tasks.get_mut(task_id).map(|task| {
                task.status = update.status;
                task.progress_value = update.progress_value;
                task.target_value
            })
        };

        let mut progress = self.progress.write().await;
        let entry = progress.entry(task_id.to_string()).or_insert(TaskProgress {
            status: update.status,
            progress_value: 0,
            max_progress: target.flatten(),
            completion_date: None,
        });
        entry.status = update.status;
        entry.progress_value = update.progress_value;
        entry.completion_date = Some(update.completion_date);
        self.writes.fetch_add(1, Ordering::SeqCst);

        debug!(
            "Progress for {}: {} ({}/{:?})",
            task_id, entry.status, entry.progress_value, entry.max_progress
        );
        Ok(())
    }
}
