use crate::blockers::BlockerService;
use crate::lint::{linters_for_files, run_linter, LintRun};
use crate::runner::ToolRunner;
use crate::tests_gate::run_tests;
use async_trait::async_trait;
use codeframe_core::{
    BlockerSeverity, CoreConfig, CoreError, CoreResult, Event, EventBus, ProjectType, ReviewReport,
    ReviewStatus, Task,
};
use codeframe_store::Store;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Review dispatch boundary. The worker wires its review agent in; the
/// pipeline only interprets the returned report.
#[async_trait]
pub trait ReviewGate: Send + Sync {
    async fn review(
        &self,
        task: &Task,
        files: &[String],
        workspace: &Path,
    ) -> CoreResult<ReviewReport>;
}

/// Terminal state of one pipeline pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineVerdict {
    Passed,
    LintBlocked { blocker_id: i64 },
    TestsBlocked { blocker_id: i64 },
    /// Review asked for changes and the iteration budget still has room;
    /// the owning worker revises and re-runs.
    ChangesRequested,
    /// The iteration budget is spent; a SYNC blocker escalates to a human.
    ReviewExhausted { blocker_id: i64 },
    /// Fatal review failure (score below the reject threshold or a critical
    /// security finding).
    ReviewRejected,
}

/// Artifacts of one pipeline pass, for the worker to persist as context.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub verdict: PipelineVerdict,
    pub lint_markdown: Option<String>,
    pub test_output: Option<String>,
    pub review: Option<ReviewReport>,
}

/// The fixed gate sequence: lint → tests → review, executed after a worker
/// produces file changes and before any commit. The first blocking gate
/// short-circuits the rest.
pub struct QualityPipeline {
    store: Store,
    bus: EventBus,
    blockers: Arc<BlockerService>,
    runner: Arc<dyn ToolRunner>,
    config: Arc<CoreConfig>,
}

impl QualityPipeline {
    pub fn new(
        store: Store,
        bus: EventBus,
        blockers: Arc<BlockerService>,
        runner: Arc<dyn ToolRunner>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            store,
            bus,
            blockers,
            runner,
            config,
        }
    }

    /// Run all gates for one task revision. `iteration` is 1-based and
    /// counts review passes for this task.
    pub async fn run(
        &self,
        task: &Task,
        files: &[String],
        workspace: &Path,
        project_type: ProjectType,
        iteration: u32,
        review_gate: &dyn ReviewGate,
    ) -> CoreResult<PipelineRun> {
        let mut run = PipelineRun {
            verdict: PipelineVerdict::Passed,
            lint_markdown: None,
            test_output: None,
            review: None,
        };

        // Gate 1: lint.
        if let Some(blocker_id) = self.lint_gate(task, files, workspace, &mut run).await? {
            run.verdict = PipelineVerdict::LintBlocked { blocker_id };
            return Ok(run);
        }

        // Gate 2: tests.
        let tests = run_tests(
            self.runner.as_ref(),
            project_type,
            workspace,
            self.config.tool_timeout,
        )
        .await?;
        run.test_output = Some(tests.output.clone());
        if !tests.passed {
            warn!(task_id = task.id, "Test gate failed");
            let blocker = self
                .blockers
                .create(
                    task,
                    BlockerSeverity::Sync,
                    "test gate failed",
                    &format!("Tests failed for task {}:\n\n```\n{}\n```", task.task_number, tests.output),
                )
                .await?;
            run.verdict = PipelineVerdict::TestsBlocked {
                blocker_id: blocker.id,
            };
            return Ok(run);
        }

        // Gate 3: review.
        self.bus.emit(Event::ReviewStarted { task_id: task.id });
        let report = match review_gate.review(task, files, workspace).await {
            Ok(report) => report,
            Err(e) => {
                self.bus.emit(Event::ReviewFailed {
                    task_id: task.id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.bus.emit(Event::ReviewCompleted {
            task_id: task.id,
            overall_score: report.overall_score,
            status: report.status,
        });
        info!(
            task_id = task.id,
            score = report.overall_score,
            status = report.status.as_str(),
            iteration,
            "Review completed"
        );

        run.verdict = match report.status {
            ReviewStatus::Approved => PipelineVerdict::Passed,
            ReviewStatus::Rejected => PipelineVerdict::ReviewRejected,
            ReviewStatus::ChangesRequested => {
                if iteration >= self.config.max_review_iterations {
                    let blocker = self
                        .blockers
                        .create(
                            task,
                            BlockerSeverity::Sync,
                            "review iterations exhausted",
                            &format!(
                                "Review still requests changes after {} iterations (last score {:.0}).\n\n{}",
                                iteration,
                                report.overall_score,
                                report.to_markdown()
                            ),
                        )
                        .await?;
                    PipelineVerdict::ReviewExhausted {
                        blocker_id: blocker.id,
                    }
                } else {
                    PipelineVerdict::ChangesRequested
                }
            }
        };
        run.review = Some(report);
        Ok(run)
    }

    /// Run the applicable linters, persist their results, and decide
    /// blocking per the configured policy. Returns a blocker id on block.
    async fn lint_gate(
        &self,
        task: &Task,
        files: &[String],
        workspace: &Path,
        run: &mut PipelineRun,
    ) -> CoreResult<Option<i64>> {
        let linters = linters_for_files(files);
        if linters.is_empty() {
            return Ok(None);
        }
        self.bus.emit(Event::LintStarted { task_id: task.id });

        let mut runs: Vec<LintRun> = Vec::new();
        for linter in linters {
            let result = match self.lint_with_retry(linter, files, workspace).await {
                Ok(result) => result,
                Err(e) => {
                    self.bus.emit(Event::LintFailed {
                        task_id: task.id,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            };
            self.store
                .insert_lint_result(
                    task.id,
                    result.linter,
                    result.error_count() as i64,
                    result.warning_count() as i64,
                    result.files_linted as i64,
                    &result.raw_output,
                )
                .await?;
            runs.push(result);
        }

        let error_count: usize = runs.iter().map(LintRun::error_count).sum();
        let warning_count: usize = runs.iter().map(LintRun::warning_count).sum();
        self.bus.emit(Event::LintCompleted {
            task_id: task.id,
            error_count: error_count as i64,
            warning_count: warning_count as i64,
        });

        let has_critical = runs.iter().any(LintRun::has_critical);
        let has_error = error_count > 0;
        let blocking = (has_critical && self.config.block_on_critical)
            || (has_error && self.config.block_on_error);

        let markdown: String = runs.iter().map(LintRun::to_markdown).collect::<Vec<_>>().join("\n");
        run.lint_markdown = Some(markdown.clone());

        if !blocking {
            return Ok(None);
        }
        warn!(task_id = task.id, error_count, "Lint gate blocked");
        let blocker = self
            .blockers
            .create(task, BlockerSeverity::Sync, "lint gate failed", &markdown)
            .await?;
        Ok(Some(blocker.id))
    }

    /// One bounded retry for transient tool faults (spawn failure, etc.).
    async fn lint_with_retry(
        &self,
        linter: codeframe_core::Linter,
        files: &[String],
        workspace: &Path,
    ) -> CoreResult<LintRun> {
        match run_linter(
            self.runner.as_ref(),
            linter,
            files,
            workspace,
            self.config.tool_timeout,
        )
        .await
        {
            Err(CoreError::Transient(first)) => {
                warn!(linter = linter.as_str(), error = %first, "Transient lint failure, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                run_linter(
                    self.runner.as_ref(),
                    linter,
                    files,
                    workspace,
                    self.config.tool_timeout,
                )
                .await
                .map_err(|e| CoreError::ExternalTool(format!("{linter:?} failed twice: {e}")))
            }
            other => other,
        }
    }
}
