use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of project workspace being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Python,
    Typescript,
    Fullstack,
    Other,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Python => "python",
            ProjectType::Typescript => "typescript",
            ProjectType::Fullstack => "fullstack",
            ProjectType::Other => "other",
        }
    }
}

impl Default for ProjectType {
    fn default() -> Self {
        ProjectType::Python
    }
}

impl FromStr for ProjectType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "python" => Ok(ProjectType::Python),
            "typescript" => Ok(ProjectType::Typescript),
            "fullstack" => Ok(ProjectType::Fullstack),
            "other" => Ok(ProjectType::Other),
            other => Err(CoreError::Validation(format!(
                "Unknown project type: {other}"
            ))),
        }
    }
}

/// Lifecycle phase of a project.
///
/// Phases advance monotonically except `development` ⇄ `review`, which may
/// cycle for re-review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Discovery,
    Planning,
    AwaitingApproval,
    Development,
    Review,
    Completed,
    Failed,
}

impl ProjectPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectPhase::Discovery => "discovery",
            ProjectPhase::Planning => "planning",
            ProjectPhase::AwaitingApproval => "awaiting_approval",
            ProjectPhase::Development => "development",
            ProjectPhase::Review => "review",
            ProjectPhase::Completed => "completed",
            ProjectPhase::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ProjectPhase::Discovery => 0,
            ProjectPhase::Planning => 1,
            ProjectPhase::AwaitingApproval => 2,
            ProjectPhase::Development => 3,
            ProjectPhase::Review => 4,
            ProjectPhase::Completed => 5,
            ProjectPhase::Failed => 5,
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Forward transitions are always allowed; the only backward transition
    /// is `review → development` for a re-review iteration.
    pub fn can_transition_to(&self, next: ProjectPhase) -> bool {
        if *self == ProjectPhase::Review && next == ProjectPhase::Development {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectPhase {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "discovery" => Ok(ProjectPhase::Discovery),
            "planning" => Ok(ProjectPhase::Planning),
            "awaiting_approval" => Ok(ProjectPhase::AwaitingApproval),
            "development" => Ok(ProjectPhase::Development),
            "review" => Ok(ProjectPhase::Review),
            "completed" => Ok(ProjectPhase::Completed),
            "failed" => Ok(ProjectPhase::Failed),
            other => Err(CoreError::Store(format!("Unknown project phase: {other}"))),
        }
    }
}

/// A software project under orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub project_type: ProjectType,
    pub phase: ProjectPhase,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub workspace_path: String,
}

/// Project names are lowercase slugs: 3..=100 chars of `[a-z0-9_-]`.
pub fn validate_project_name(name: &str) -> CoreResult<()> {
    if name.len() < 3 || name.len() > 100 {
        return Err(CoreError::Validation(format!(
            "Project name must be 3..100 characters, got {}",
            name.len()
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(CoreError::Validation(
            "Project name must match ^[a-z0-9_-]+$".to_string(),
        ));
    }
    Ok(())
}

/// Project descriptions are 10..=500 characters.
pub fn validate_project_description(description: &str) -> CoreResult<()> {
    let len = description.chars().count();
    if !(10..=500).contains(&len) {
        return Err(CoreError::Validation(format!(
            "Project description must be 10..500 characters, got {len}"
        )));
    }
    Ok(())
}

/// Discovery answers are 1..=5000 characters and not whitespace-only.
pub fn validate_answer(answer: &str) -> CoreResult<()> {
    let len = answer.chars().count();
    if len == 0 || len > 5000 {
        return Err(CoreError::Validation(format!(
            "Answer must be 1..5000 characters, got {len}"
        )));
    }
    if answer.trim().is_empty() {
        return Err(CoreError::Validation(
            "Answer must not be whitespace-only".to_string(),
        ));
    }
    Ok(())
}

/// Who proposed an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposedBy {
    Agent,
    Human,
}

impl ProposedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposedBy::Agent => "agent",
            ProposedBy::Human => "human",
        }
    }
}

impl FromStr for ProposedBy {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "agent" => Ok(ProposedBy::Agent),
            "human" => Ok(ProposedBy::Human),
            other => Err(CoreError::Store(format!("Unknown proposer: {other}"))),
        }
    }
}

/// A unit of work decomposed from the project requirements.
///
/// `depends_on` edges stay within the owning project and must form a DAG;
/// the store checks this at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub project_id: i64,
    /// Stable dotted number like "1.2".
    pub issue_number: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: i64,
    pub depends_on: Vec<i64>,
    pub proposed_by: ProposedBy,
    pub created_at: DateTime<Utc>,
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    AwaitingReview,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::AwaitingReview => "awaiting_review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "ready" => Ok(TaskStatus::Ready),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "awaiting_review" => Ok(TaskStatus::AwaitingReview),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::Store(format!("Unknown task status: {other}"))),
        }
    }
}

/// A dispatchable unit of work belonging to an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub issue_id: i64,
    /// Stable dotted number like "1.2.3".
    pub task_number: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub depends_on: Vec<i64>,
    pub assigned_agent_id: Option<String>,
    pub required_capabilities: Vec<String>,
    /// 40-char hex SHA set in the same transaction that completes the task.
    pub commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A task is ready iff every dependency is completed. Open SYNC blockers
    /// additionally gate readiness; the store's ready query folds both in.
    pub fn deps_satisfied(&self, completed_ids: &[i64]) -> bool {
        self.depends_on.iter().all(|dep| completed_ids.contains(dep))
    }
}

/// Specialization of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Backend,
    Frontend,
    Test,
    Review,
    Lead,
    Custom,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Backend => "backend",
            AgentKind::Frontend => "frontend",
            AgentKind::Test => "test",
            AgentKind::Review => "review",
            AgentKind::Lead => "lead",
            AgentKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "backend" => Ok(AgentKind::Backend),
            "frontend" => Ok(AgentKind::Frontend),
            "test" => Ok(AgentKind::Test),
            "review" => Ok(AgentKind::Review),
            "lead" => Ok(AgentKind::Lead),
            "custom" => Ok(AgentKind::Custom),
            other => Err(CoreError::Store(format!("Unknown agent kind: {other}"))),
        }
    }
}

/// Worker-instruction granularity, D1..D4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Maturity {
    Directive,
    Coaching,
    Supporting,
    Delegating,
}

impl Maturity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Maturity::Directive => "directive",
            Maturity::Coaching => "coaching",
            Maturity::Supporting => "supporting",
            Maturity::Delegating => "delegating",
        }
    }
}

impl FromStr for Maturity {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "directive" => Ok(Maturity::Directive),
            "coaching" => Ok(Maturity::Coaching),
            "supporting" => Ok(Maturity::Supporting),
            "delegating" => Ok(Maturity::Delegating),
            other => Err(CoreError::Store(format!("Unknown maturity: {other}"))),
        }
    }
}

/// Live status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Offline => "offline",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "blocked" => Ok(AgentStatus::Blocked),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(CoreError::Store(format!("Unknown agent status: {other}"))),
        }
    }
}

/// A persisted agent. Agents are project-agnostic; the project binding is
/// through the task currently assigned. `current_task_id` is non-null iff
/// `status == Working`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub kind: AgentKind,
    pub provider: String,
    pub maturity: Maturity,
    pub status: AgentStatus,
    pub current_task_id: Option<i64>,
    pub last_heartbeat: DateTime<Utc>,
    pub metrics: AgentMetrics,
}

/// Per-agent execution counters, stored as JSON on the agent row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub review_iterations: u64,
    pub tokens_used: u64,
}

impl AgentMetrics {
    /// Completed / attempted, in [0,1]. Agents with no history rank 0.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.tasks_completed + self.tasks_failed;
        if attempted == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / attempted as f64
        }
    }
}

/// Junction row binding an agent to a project for pool bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectAgent {
    pub project_id: i64,
    pub agent_id: String,
    pub role: String,
    pub assigned_at: DateTime<Utc>,
    pub unassigned_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Kind of a context memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Task,
    Code,
    Error,
    TestResult,
    PrdSection,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Task => "TASK",
            ItemType::Code => "CODE",
            ItemType::Error => "ERROR",
            ItemType::TestResult => "TEST_RESULT",
            ItemType::PrdSection => "PRD_SECTION",
        }
    }
}

impl FromStr for ItemType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "TASK" => Ok(ItemType::Task),
            "CODE" => Ok(ItemType::Code),
            "ERROR" => Ok(ItemType::Error),
            "TEST_RESULT" => Ok(ItemType::TestResult),
            "PRD_SECTION" => Ok(ItemType::PrdSection),
            other => Err(CoreError::Validation(format!("Unknown item type: {other}"))),
        }
    }
}

/// Importance tier of a context item.
///
/// HOT is always loaded into an agent's prompt; WARM is loaded on demand;
/// COLD is archived at flash-save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "HOT",
            Tier::Warm => "WARM",
            Tier::Cold => "COLD",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Tier::Hot),
            "WARM" => Ok(Tier::Warm),
            "COLD" => Ok(Tier::Cold),
            other => Err(CoreError::Validation(format!("Unknown tier: {other}"))),
        }
    }
}

/// A single item of tiered agent memory, scoped by `(project_id, agent_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: i64,
    pub agent_id: String,
    pub project_id: i64,
    pub item_type: ItemType,
    pub content: String,
    pub importance_score: f64,
    pub tier: Tier,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Set by flash-save; archived items are excluded from normal queries.
    pub archived: bool,
}

/// Append-only record of a flash-save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCheckpoint {
    pub id: i64,
    pub agent_id: String,
    pub project_id: i64,
    /// Serialized bundle of the full pre-save context state.
    pub checkpoint_data: String,
    pub items_count: i64,
    pub items_archived: i64,
    pub hot_items_retained: i64,
    pub token_count_before: i64,
    pub token_count_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Severity of a human-in-the-loop blocker.
///
/// SYNC halts the owning branch of work and its dependents; ASYNC leaves
/// unrelated ready tasks dispatchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockerSeverity {
    Sync,
    Async,
}

impl BlockerSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerSeverity::Sync => "sync",
            BlockerSeverity::Async => "async",
        }
    }
}

impl FromStr for BlockerSeverity {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "sync" => Ok(BlockerSeverity::Sync),
            "async" => Ok(BlockerSeverity::Async),
            other => Err(CoreError::Store(format!("Unknown severity: {other}"))),
        }
    }
}

/// A recorded pause-point requiring human input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub id: i64,
    pub task_id: i64,
    pub severity: BlockerSeverity,
    pub reason: String,
    pub question: String,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Blocker {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Which linter produced a [`LintResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linter {
    Ruff,
    Eslint,
    Other,
}

impl Linter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Linter::Ruff => "ruff",
            Linter::Eslint => "eslint",
            Linter::Other => "other",
        }
    }
}

impl FromStr for Linter {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "ruff" => Ok(Linter::Ruff),
            "eslint" => Ok(Linter::Eslint),
            _ => Ok(Linter::Other),
        }
    }
}

/// One lint run against a task's changed files. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintResult {
    pub id: i64,
    pub task_id: i64,
    pub linter: Linter,
    pub error_count: i64,
    pub warning_count: i64,
    pub files_linted: i64,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

/// Severity attached to a review or lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single issue surfaced by lint or review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: FindingSeverity,
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Verdict of a review pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Approved => "approved",
            ReviewStatus::ChangesRequested => "changes_requested",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

/// Scored report produced by the review agent for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub task_id: i64,
    pub overall_score: f64,
    pub complexity_score: f64,
    pub security_score: f64,
    pub style_score: f64,
    pub coverage_score: f64,
    pub status: ReviewStatus,
    pub findings: Vec<Finding>,
}

impl ReviewReport {
    /// Render the report as markdown for blocker payloads.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "## Review: {:.0}/100 ({})\n\n\
             | dimension | score |\n|---|---|\n\
             | complexity | {:.0} |\n| security | {:.0} |\n\
             | style | {:.0} |\n| coverage | {:.0} |\n",
            self.overall_score,
            self.status.as_str(),
            self.complexity_score,
            self.security_score,
            self.style_score,
            self.coverage_score,
        );
        if !self.findings.is_empty() {
            out.push_str("\n### Findings\n");
            for f in &self.findings {
                let line = f.line.map(|l| format!(":{l}")).unwrap_or_default();
                out.push_str(&format!(
                    "- **{:?}** [{}] {}{} — {}\n",
                    f.severity, f.category, f.file, line, f.message
                ));
            }
        }
        out
    }
}

/// A persisted answer to one discovery question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryAnswer {
    pub project_id: i64,
    pub question_id: String,
    pub category: String,
    pub answer_text: String,
    pub answered_at: DateTime<Utc>,
}

/// Outcome of a worker executing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { commit_sha: Option<String> },
    Blocked { blocker_id: i64 },
    Failed { reason: String },
}

/// Result of a flash-save operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashSaveResult {
    pub checkpoint_id: i64,
    pub items_count: i64,
    pub items_archived: i64,
    pub hot_items_retained: i64,
    pub token_count_before: i64,
    pub token_count_after: i64,
    pub reduction_percentage: f64,
}
