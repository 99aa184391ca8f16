//! Quality gates for CodeFRAME: the lint → tests → review pipeline that
//! runs between a worker's file edits and the git commit, plus the
//! human-in-the-loop blocker protocol the gates escalate into.

mod blockers;
mod lint;
mod pipeline;
mod runner;
mod tests_gate;

pub use blockers::BlockerService;
pub use lint::{linters_for_files, parse_eslint, parse_ruff, run_linter, LintRun};
pub use pipeline::{PipelineRun, PipelineVerdict, QualityPipeline, ReviewGate};
pub use runner::{ScriptedRunner, SubprocessRunner, ToolOutput, ToolRunner};
pub use tests_gate::{run_tests, TestGateResult};
