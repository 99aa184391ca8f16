use crate::model::{BlockerSeverity, ReviewStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Canonical lifecycle event vocabulary.
///
/// The serialized form (`type` tag plus flattened fields) is what the
/// dashboard transport receives verbatim over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ProjectCreated {
        project_id: i64,
        name: String,
    },
    DiscoveryProgress {
        project_id: i64,
        answered_count: usize,
        total_required: usize,
        progress_percentage: f64,
    },
    PlanningCompleted {
        project_id: i64,
        issue_count: usize,
        task_count: usize,
    },
    TasksApproved {
        project_id: i64,
        approved_count: usize,
        excluded_count: usize,
    },
    TaskReady {
        project_id: i64,
        task_id: i64,
    },
    TaskStarted {
        project_id: i64,
        task_id: i64,
        agent_id: String,
    },
    TaskCompleted {
        project_id: i64,
        task_id: i64,
        commit_sha: Option<String>,
    },
    TaskFailed {
        project_id: i64,
        task_id: i64,
        reason: String,
    },
    BlockerCreated {
        project_id: i64,
        task_id: i64,
        blocker_id: i64,
        severity: BlockerSeverity,
        reason: String,
    },
    BlockerResolved {
        project_id: i64,
        task_id: i64,
        blocker_id: i64,
    },
    ContextTierUpdated {
        project_id: i64,
        agent_id: String,
        hot: usize,
        warm: usize,
        cold: usize,
        changes: usize,
    },
    FlashSaveCompleted {
        project_id: i64,
        agent_id: String,
        checkpoint_id: i64,
        items_archived: i64,
        token_count_before: i64,
        token_count_after: i64,
    },
    LintStarted {
        task_id: i64,
    },
    LintCompleted {
        task_id: i64,
        error_count: i64,
        warning_count: i64,
    },
    LintFailed {
        task_id: i64,
        reason: String,
    },
    ReviewStarted {
        task_id: i64,
    },
    ReviewCompleted {
        task_id: i64,
        overall_score: f64,
        status: ReviewStatus,
    },
    ReviewFailed {
        task_id: i64,
        reason: String,
    },
}

impl Event {
    /// The snake_case tag this event serializes under.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ProjectCreated { .. } => "project_created",
            Event::DiscoveryProgress { .. } => "discovery_progress",
            Event::PlanningCompleted { .. } => "planning_completed",
            Event::TasksApproved { .. } => "tasks_approved",
            Event::TaskReady { .. } => "task_ready",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::BlockerCreated { .. } => "blocker_created",
            Event::BlockerResolved { .. } => "blocker_resolved",
            Event::ContextTierUpdated { .. } => "context_tier_updated",
            Event::FlashSaveCompleted { .. } => "flash_save_completed",
            Event::LintStarted { .. } => "lint_started",
            Event::LintCompleted { .. } => "lint_completed",
            Event::LintFailed { .. } => "lint_failed",
            Event::ReviewStarted { .. } => "review_started",
            Event::ReviewCompleted { .. } => "review_completed",
            Event::ReviewFailed { .. } => "review_failed",
        }
    }
}

/// In-process pub/sub for lifecycle events.
///
/// Delivery is at-least-once to live subscribers with no durable replay.
/// Per-entity ordering holds because each entity's events are emitted from
/// the component that owns its write path.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Lagging or absent subscribers are not an error; the event is simply
    /// dropped for them.
    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.kind(), "emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
