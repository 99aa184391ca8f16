use std::time::Duration;

/// Immutable configuration snapshot, read once at process start.
///
/// All tunables come from environment variables with the defaults below;
/// runtime reconfiguration is out of scope.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Hard context ceiling per (project, agent), in tokens.
    pub context_limit_tokens: usize,
    /// Fraction of the limit at which flash-save triggers.
    pub flash_save_threshold: f64,
    /// Importance score at or above which an item is HOT.
    pub tier_hot_threshold: f64,
    /// Importance score at or above which an item is WARM.
    pub tier_warm_threshold: f64,
    /// Review score at or above which a task passes review.
    pub review_approve_score: f64,
    /// Review score below which a review fails fatally.
    pub review_reject_score: f64,
    pub max_review_iterations: u32,
    pub max_concurrent_tasks: usize,
    pub llm_timeout: Duration,
    pub task_timeout: Duration,
    /// Budget for lint and test subprocesses.
    pub tool_timeout: Duration,
    /// Consecutive git failures before an ASYNC blocker is raised.
    pub git_failure_blocker_threshold: u32,
    pub block_on_critical: bool,
    pub block_on_error: bool,
    /// Cyclomatic complexity ceiling for the review analyzers.
    pub max_complexity: u32,
    /// Function length ceiling (lines) for the review analyzers.
    pub max_function_lines: u32,
    /// Heartbeats older than this mark an agent offline.
    pub heartbeat_stale: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            context_limit_tokens: 180_000,
            flash_save_threshold: 0.80,
            tier_hot_threshold: 0.8,
            tier_warm_threshold: 0.4,
            review_approve_score: 70.0,
            review_reject_score: 50.0,
            max_review_iterations: 2,
            max_concurrent_tasks: 4,
            llm_timeout: Duration::from_secs(120),
            task_timeout: Duration::from_secs(1800),
            tool_timeout: Duration::from_secs(600),
            git_failure_blocker_threshold: 3,
            block_on_critical: true,
            block_on_error: false,
            max_complexity: 10,
            max_function_lines: 50,
            heartbeat_stale: Duration::from_secs(90),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl CoreConfig {
    /// Build a snapshot from the environment, falling back to defaults for
    /// missing or unparseable values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            context_limit_tokens: env_parse("CONTEXT_LIMIT_TOKENS", d.context_limit_tokens),
            flash_save_threshold: env_parse("FLASH_SAVE_THRESHOLD", d.flash_save_threshold),
            tier_hot_threshold: env_parse("TIER_HOT_THRESHOLD", d.tier_hot_threshold),
            tier_warm_threshold: env_parse("TIER_WARM_THRESHOLD", d.tier_warm_threshold),
            review_approve_score: env_parse("REVIEW_APPROVE_SCORE", d.review_approve_score),
            review_reject_score: env_parse("REVIEW_REJECT_SCORE", d.review_reject_score),
            max_review_iterations: env_parse("MAX_REVIEW_ITERATIONS", d.max_review_iterations),
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", d.max_concurrent_tasks),
            llm_timeout: Duration::from_secs(env_parse(
                "LLM_TIMEOUT_SECONDS",
                d.llm_timeout.as_secs(),
            )),
            task_timeout: Duration::from_secs(env_parse(
                "TASK_TIMEOUT_SECONDS",
                d.task_timeout.as_secs(),
            )),
            tool_timeout: Duration::from_secs(env_parse(
                "TOOL_TIMEOUT_SECONDS",
                d.tool_timeout.as_secs(),
            )),
            git_failure_blocker_threshold: env_parse(
                "GIT_FAILURE_BLOCKER_THRESHOLD",
                d.git_failure_blocker_threshold,
            ),
            block_on_critical: env_parse("LINT_BLOCK_ON_CRITICAL", d.block_on_critical),
            block_on_error: env_parse("LINT_BLOCK_ON_ERROR", d.block_on_error),
            max_complexity: env_parse("REVIEW_MAX_COMPLEXITY", d.max_complexity),
            max_function_lines: env_parse("REVIEW_MAX_FUNCTION_LINES", d.max_function_lines),
            heartbeat_stale: Duration::from_secs(env_parse(
                "HEARTBEAT_STALE_SECONDS",
                d.heartbeat_stale.as_secs(),
            )),
        }
    }

    /// Token count at which `should_flash_save` fires.
    pub fn flash_save_trigger_tokens(&self) -> usize {
        (self.context_limit_tokens as f64 * self.flash_save_threshold) as usize
    }
}
