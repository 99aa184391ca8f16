use crate::runner::{ToolOutput, ToolRunner};
use codeframe_core::{CoreResult, Finding, FindingSeverity, Linter};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// Parsed outcome of one linter invocation.
#[derive(Debug, Clone)]
pub struct LintRun {
    pub linter: Linter,
    pub findings: Vec<Finding>,
    pub files_linted: usize,
    pub raw_output: String,
}

impl LintRun {
    /// F-series / eslint errors count as errors; W/I/N and eslint warns as
    /// warnings.
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity >= FindingSeverity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity < FindingSeverity::Error)
            .count()
    }

    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == FindingSeverity::Critical)
    }

    /// Markdown rendering used as the blocker payload.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "## Lint: {} ({} errors, {} warnings)\n",
            self.linter.as_str(),
            self.error_count(),
            self.warning_count()
        );
        for f in &self.findings {
            let line = f.line.map(|l| format!(":{l}")).unwrap_or_default();
            out.push_str(&format!(
                "- **{:?}** [{}] {}{} — {}\n",
                f.severity, f.category, f.file, line, f.message
            ));
        }
        out
    }
}

/// Linter selection by file extension.
pub fn linters_for_files(files: &[String]) -> Vec<Linter> {
    let mut linters = Vec::new();
    if files.iter().any(|f| f.ends_with(".py")) {
        linters.push(Linter::Ruff);
    }
    if files
        .iter()
        .any(|f| [".ts", ".tsx", ".js", ".jsx"].iter().any(|ext| f.ends_with(ext)))
    {
        linters.push(Linter::Eslint);
    }
    linters
}

fn files_for_linter(files: &[String], linter: Linter) -> Vec<String> {
    files
        .iter()
        .filter(|f| match linter {
            Linter::Ruff => f.ends_with(".py"),
            Linter::Eslint => [".ts", ".tsx", ".js", ".jsx"].iter().any(|ext| f.ends_with(ext)),
            Linter::Other => false,
        })
        .cloned()
        .collect()
}

/// Run one linter over the matching subset of the task's files.
pub async fn run_linter(
    runner: &dyn ToolRunner,
    linter: Linter,
    files: &[String],
    workspace: &Path,
    timeout: Duration,
) -> CoreResult<LintRun> {
    let targets = files_for_linter(files, linter);
    let output = match linter {
        Linter::Ruff => {
            let mut args = vec!["check".to_string(), "--output-format".into(), "concise".into()];
            args.extend(targets.iter().cloned());
            runner.run("ruff", &args, workspace, timeout).await?
        }
        Linter::Eslint => {
            let mut args = vec!["--format".to_string(), "json".into()];
            args.extend(targets.iter().cloned());
            runner.run("eslint", &args, workspace, timeout).await?
        }
        Linter::Other => ToolOutput::ok(""),
    };

    let findings = match linter {
        Linter::Ruff => parse_ruff(&output.stdout),
        Linter::Eslint => parse_eslint(&output.stdout),
        Linter::Other => Vec::new(),
    };

    Ok(LintRun {
        linter,
        findings,
        files_linted: targets.len(),
        raw_output: output.stdout,
    })
}

/// ruff severity mapping: F-series → critical, E-series → error,
/// W/I/N-series → warning.
fn ruff_severity(code: &str) -> FindingSeverity {
    match code.chars().next() {
        Some('F') => FindingSeverity::Critical,
        Some('E') => FindingSeverity::Error,
        Some('W') | Some('I') | Some('N') => FindingSeverity::Warning,
        _ => FindingSeverity::Warning,
    }
}

#[allow(clippy::expect_used)]
fn ruff_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):\d+:\s+(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$")
            .expect("static ruff pattern is valid")
    })
}

/// Parse ruff concise output: `path:line:col: CODE message`.
pub fn parse_ruff(output: &str) -> Vec<Finding> {
    let re = ruff_line_re();
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            Some(Finding {
                category: caps["code"].to_string(),
                severity: ruff_severity(&caps["code"]),
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok(),
                message: caps["msg"].to_string(),
                suggestion: None,
            })
        })
        .collect()
}

/// Parse eslint `--format json` output. Severity 2 → critical, 1 → warning.
pub fn parse_eslint(output: &str) -> Vec<Finding> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(output) else {
        if !output.trim().is_empty() {
            warn!("eslint produced unparseable JSON");
        }
        return Vec::new();
    };
    let Some(files) = parsed.as_array() else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    for file in files {
        let path = file["filePath"].as_str().unwrap_or("<unknown>");
        let Some(messages) = file["messages"].as_array() else {
            continue;
        };
        for msg in messages {
            let severity = match msg["severity"].as_i64() {
                Some(2) => FindingSeverity::Critical,
                _ => FindingSeverity::Warning,
            };
            findings.push(Finding {
                category: msg["ruleId"].as_str().unwrap_or("eslint").to_string(),
                severity,
                file: path.to_string(),
                line: msg["line"].as_u64().map(|l| l as u32),
                message: msg["message"].as_str().unwrap_or("").to_string(),
                suggestion: None,
            });
        }
    }
    findings
}
