//! ============================================================================
//! Core Types for WINIX Task Verification
//! ============================================================================
//! Defines tasks, progress records, verification results and the domain
//! events broadcast by the dispatcher. These types are serialized to JSON for
//! the task store snapshots and for the mini-app frontend.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Task Types
// ============================================================================

/// Task type tag, one per built-in verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Subscribe / follow / join on a social platform
    Social,
    /// Time-boxed or completion-capped task
    Limited,
    /// Visit a partner site through a signed link
    Partner,
    /// Invite friends (verified like a social task)
    Referral,
    /// Anything else
    #[default]
    Generic,
}

impl TaskType {
    /// Tag used as the verifier registry key
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Social => "social",
            TaskType::Limited => "limited",
            TaskType::Partner => "partner",
            TaskType::Referral => "referral",
            TaskType::Generic => "generic",
        }
    }

    /// Parse a declared tag, returning None for unknown tags
    pub fn from_tag(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "social" => Ok(TaskType::Social),
            "limited" => Ok(TaskType::Limited),
            "partner" | "partners" => Ok(TaskType::Partner),
            "referral" | "referrals" => Ok(TaskType::Referral),
            "generic" => Ok(TaskType::Generic),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

/// Task status as reported by the task store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Available,
    InProgress,
    Completed,
    Failed,
    Locked,
    Expired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Available => "available",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Locked => "locked",
            TaskStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reward payload returned by the backend on successful verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Reward {
    #[serde(default)]
    pub winix: f64,
    #[serde(default)]
    pub tokens: f64,
}

impl Reward {
    pub fn winix(amount: f64) -> Self {
        Self {
            winix: amount,
            tokens: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.winix == 0.0 && self.tokens == 0.0
    }
}

/// A task as owned by the external task store.
/// Read-only to the verification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Declared type tag; may be missing or unknown
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Target progress value needed to complete the task
    #[serde(default, alias = "target", skip_serializing_if = "Option::is_none")]
    pub target_value: Option<u32>,
    #[serde(default)]
    pub progress_value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completions: Option<u32>,
    #[serde(default)]
    pub completions: u32,
    /// Seconds a video/page must be watched before verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_duration: Option<u32>,
    /// Explicit `false` disables backend verification for social tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_verification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<Reward>,
}

impl Task {
    /// Create a bare task with a declared type
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type: Some(task_type.as_str().to_string()),
            title: None,
            status: TaskStatus::Available,
            target_value: None,
            progress_value: 0,
            action_url: None,
            platform: None,
            partner_name: None,
            end_date: None,
            max_completions: None,
            completions: 0,
            watch_duration: None,
            requires_verification: None,
            reward: None,
        }
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn with_target(mut self, target: u32) -> Self {
        self.target_value = Some(target);
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_completion_cap(mut self, max: u32, completions: u32) -> Self {
        self.max_completions = Some(max);
        self.completions = completions;
        self
    }

    pub fn with_partner_name(mut self, name: impl Into<String>) -> Self {
        self.partner_name = Some(name.into());
        self
    }

    /// Declared type tag, normalized to lowercase
    pub fn declared_tag(&self) -> Option<String> {
        self.task_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }

    /// Whether the task's end date has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_date.map(|end| end <= now).unwrap_or(false)
    }

    /// Whether the completion cap has been reached
    pub fn is_exhausted(&self) -> bool {
        self.max_completions
            .map(|max| self.completions >= max)
            .unwrap_or(false)
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// Per-user progress for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub progress_value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime<Utc>>,
}

/// Progress write issued through the store's mutation method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: TaskStatus,
    pub progress_value: u32,
    pub completion_date: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Mark a task completed at the given target value
    pub fn completed(target: u32, at: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Completed,
            progress_value: target,
            completion_date: at,
        }
    }
}

// ============================================================================
// Verification Results
// ============================================================================

/// Outcome of one verification attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub task_id: String,
    pub success: bool,
    /// Human-readable message, shown directly on the task card
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<Reward>,
    /// Creation time in milliseconds
    pub timestamp: i64,
    /// Backend status code, when the backend answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
    /// Raw backend payload or failure details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl VerificationResult {
    pub fn success(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(task_id, true, message)
    }

    pub fn failure(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(task_id, false, message)
    }

    fn new(task_id: impl Into<String>, success: bool, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success,
            message: message.into(),
            reward: None,
            timestamp: now_millis(),
            verification_status: None,
            data: None,
        }
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.verification_status = status;
        self
    }

    pub fn with_reward(mut self, reward: Option<Reward>) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ============================================================================
// Domain Events
// ============================================================================

/// Notifications broadcast by the event dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TaskEvent {
    #[serde(rename = "task-verification-result")]
    VerificationResult {
        task_id: String,
        result: VerificationResult,
        timestamp: i64,
        event_id: Option<String>,
    },
    #[serde(rename = "task-completed")]
    TaskCompleted {
        task_id: String,
        reward: Option<Reward>,
        timestamp: i64,
        event_id: Option<String>,
    },
    #[serde(rename = "task-verification-error")]
    VerificationError {
        task_id: String,
        error: String,
        timestamp: i64,
        event_id: Option<String>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::VerificationResult { task_id, .. }
            | TaskEvent::TaskCompleted { task_id, .. }
            | TaskEvent::VerificationError { task_id, .. } => task_id,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::VerificationResult { .. } => "task-verification-result",
            TaskEvent::TaskCompleted { .. } => "task-completed",
            TaskEvent::VerificationError { .. } => "task-verification-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_task_type_parsing() {
        assert_eq!(TaskType::from_tag("social"), Some(TaskType::Social));
        assert_eq!(TaskType::from_tag(" Partner "), Some(TaskType::Partner));
        assert_eq!(TaskType::from_tag("referrals"), Some(TaskType::Referral));
        assert_eq!(TaskType::from_tag("daily"), None);
        assert_eq!(TaskType::default(), TaskType::Generic);
    }

    #[test]
    fn test_task_deserializes_frontend_shape() {
        let json = r#"{
            "id": "task-7",
            "type": "limited",
            "target": 3,
            "end_date": "2020-01-01T00:00:00Z",
            "max_completions": 100,
            "completions": 12
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.declared_tag().as_deref(), Some("limited"));
        assert_eq!(task.target_value, Some(3));
        assert_eq!(task.status, TaskStatus::Available);
        assert!(task.is_expired_at(Utc::now()));
        assert!(!task.is_exhausted());
    }

    #[test]
    fn test_completion_cap() {
        let task = Task::new("t", TaskType::Limited).with_completion_cap(10, 10);
        assert!(task.is_exhausted());
        let task = Task::new("t", TaskType::Limited).with_completion_cap(10, 9);
        assert!(!task.is_exhausted());
    }

    #[test]
    fn test_future_end_date_not_expired() {
        let task = Task::new("t", TaskType::Limited).with_end_date(Utc::now() + Duration::hours(1));
        assert!(!task.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_progress_json_roundtrip() {
        let progress = TaskProgress {
            status: TaskStatus::Completed,
            progress_value: 5,
            max_progress: Some(5),
            completion_date: Some(Utc::now()),
        };
        let json = serde_json::to_string(&progress).unwrap();
        let restored: TaskProgress = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, progress);
    }

    #[test]
    fn test_event_wire_names() {
        let event = TaskEvent::TaskCompleted {
            task_id: "task-42".into(),
            reward: Some(Reward::winix(10.0)),
            timestamp: 1,
            event_id: Some("evt".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task-completed");
        assert_eq!(json["reward"]["winix"], 10.0);
        assert_eq!(event.name(), "task-completed");
        assert_eq!(event.task_id(), "task-42");
    }
}
