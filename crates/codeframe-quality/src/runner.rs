use async_trait::async_trait;
use codeframe_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Captured output of an external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Boundary for linters, test runners, and other external binaries.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> CoreResult<ToolOutput>;
}

/// Real subprocess execution, awaited off the main loop with a hard budget.
pub struct SubprocessRunner;

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> CoreResult<ToolOutput> {
        info!(program, ?args, cwd = %cwd.display(), "Running tool");

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(program)
                .args(args)
                .current_dir(cwd)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(ToolOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_output(&String::from_utf8_lossy(&output.stdout), 100_000),
                stderr: truncate_output(&String::from_utf8_lossy(&output.stderr), 20_000),
            }),
            Ok(Err(e)) => Err(CoreError::Transient(format!(
                "failed to spawn {program}: {e}"
            ))),
            Err(_) => Err(CoreError::Budget(format!(
                "{program} exceeded its {}s budget",
                timeout.as_secs()
            ))),
        }
    }
}

fn truncate_output(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}\n... [truncated {} bytes]", &s[..max], s.len() - max)
    }
}

/// Scripted runner for tests: pops pre-seeded outputs per program name.
/// Programs with no script return a clean success.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Vec<ToolOutput>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next invocation of `program`.
    pub async fn push(&self, program: &str, output: ToolOutput) {
        self.scripts
            .lock()
            .await
            .entry(program.to_string())
            .or_default()
            .push(output);
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        _args: &[String],
        _cwd: &Path,
        _timeout: Duration,
    ) -> CoreResult<ToolOutput> {
        let mut scripts = self.scripts.lock().await;
        match scripts.get_mut(program) {
            Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
            _ => Ok(ToolOutput::ok("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subprocess_captures_output() {
        let runner = SubprocessRunner;
        let output = runner
            .run(
                "sh",
                &["-c".into(), "echo out; echo err >&2; exit 3".into()],
                Path::new("."),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_subprocess_timeout_is_budget_error() {
        let runner = SubprocessRunner;
        let err = runner
            .run(
                "sh",
                &["-c".into(), "sleep 5".into()],
                Path::new("."),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Budget(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_transient() {
        let runner = SubprocessRunner;
        let err = runner
            .run(
                "definitely-not-a-real-binary-xyz",
                &[],
                Path::new("."),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Transient(_)));
    }

    #[tokio::test]
    async fn test_scripted_runner_pops_in_order() {
        let runner = ScriptedRunner::new();
        runner.push("ruff", ToolOutput::failed(1, "first")).await;
        runner.push("ruff", ToolOutput::ok("second")).await;

        let a = runner
            .run("ruff", &[], Path::new("."), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(a.stdout, "first");
        let b = runner
            .run("ruff", &[], Path::new("."), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(b.stdout, "second");
        // Exhausted scripts fall back to success.
        let c = runner
            .run("ruff", &[], Path::new("."), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(c.success());
    }

    #[test]
    fn test_truncate_output() {
        let long = "x".repeat(200);
        let truncated = truncate_output(&long, 100);
        assert!(truncated.contains("truncated 100 bytes"));
        assert_eq!(truncate_output("short", 100), "short");
    }
}
