use async_trait::async_trait;
use codeframe_core::{
    CoreConfig, CoreResult, Finding, FindingSeverity, ReviewReport, ReviewStatus, Task,
};
use codeframe_quality::ReviewGate;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Deterministic code review: complexity, function length, OWASP-derived
/// pattern checks, and a secrets sweep over the task's modified files.
///
/// Never edits files and never commits. Produces a weighted
/// `overall = 0.3·complexity + 0.4·security + 0.2·style + 0.1·coverage`.
pub struct ReviewAgent {
    config: Arc<CoreConfig>,
}

struct Pattern {
    regex: Regex,
    severity: FindingSeverity,
    message: &'static str,
}

fn patterns(pairs: &[(&str, FindingSeverity, &'static str)]) -> Vec<Pattern> {
    pairs
        .iter()
        .filter_map(|&(pattern, severity, message)| {
            Regex::new(pattern).ok().map(|regex| Pattern {
                regex,
                severity,
                message,
            })
        })
        .collect()
}

fn python_patterns() -> Vec<Pattern> {
    patterns(&[
        (r"\beval\s*\(", FindingSeverity::Critical, "eval() enables code injection"),
        (r"\bexec\s*\(", FindingSeverity::Critical, "exec() enables code injection"),
        (
            r"subprocess\.\w+\(.*shell\s*=\s*True",
            FindingSeverity::Critical,
            "shell=True enables command injection",
        ),
        (
            r#"execute\s*\(\s*f["']"#,
            FindingSeverity::Critical,
            "f-string SQL enables injection; use parameters",
        ),
        (r"os\.system\s*\(", FindingSeverity::Error, "os.system() runs through the shell"),
        (r"pickle\.loads?\s*\(", FindingSeverity::Error, "unpickling untrusted data executes code"),
        (
            r"yaml\.load\s*\(",
            FindingSeverity::Warning,
            "prefer yaml.safe_load over yaml.load",
        ),
        (r"hashlib\.md5", FindingSeverity::Warning, "MD5 is not collision resistant"),
    ])
}

fn typescript_patterns() -> Vec<Pattern> {
    patterns(&[
        (r"\beval\s*\(", FindingSeverity::Critical, "eval() enables code injection"),
        (
            r"dangerouslySetInnerHTML",
            FindingSeverity::Error,
            "raw HTML injection point",
        ),
        (r"\.innerHTML\s*=", FindingSeverity::Error, "innerHTML assignment risks XSS"),
        (r"document\.write\s*\(", FindingSeverity::Warning, "document.write risks XSS"),
        (
            r"child_process",
            FindingSeverity::Error,
            "child_process use needs input sanitization",
        ),
    ])
}

fn secret_patterns() -> Vec<Pattern> {
    patterns(&[
        (
            r#"(?i)(api[_-]?key|secret|password|token)\s*[:=]\s*["'][^"']{8,}["']"#,
            FindingSeverity::Critical,
            "hardcoded credential",
        ),
        (r"AKIA[0-9A-Z]{16}", FindingSeverity::Critical, "AWS access key id"),
        (
            r"-----BEGIN (?:RSA |EC )?PRIVATE KEY-----",
            FindingSeverity::Critical,
            "private key material",
        ),
    ])
}

impl ReviewAgent {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self { config }
    }

    /// Analyze one file's source, appending findings.
    fn analyze_source(&self, file: &str, source: &str, findings: &mut Vec<Finding>) {
        let is_python = file.ends_with(".py");
        let is_ts = [".ts", ".tsx", ".js", ".jsx"].iter().any(|e| file.ends_with(e));

        // Complexity and length per function.
        for func in split_functions(source, is_python) {
            let complexity = cyclomatic_complexity(&func.body);
            if complexity > self.config.max_complexity {
                findings.push(Finding {
                    category: "complexity".into(),
                    severity: if complexity > self.config.max_complexity * 2 {
                        FindingSeverity::Error
                    } else {
                        FindingSeverity::Warning
                    },
                    file: file.to_string(),
                    line: Some(func.line),
                    message: format!(
                        "function '{}' has cyclomatic complexity {complexity} (limit {})",
                        func.name, self.config.max_complexity
                    ),
                    suggestion: Some("extract helper functions".into()),
                });
            }
            let lines = func.body.lines().count() as u32;
            if lines > self.config.max_function_lines {
                findings.push(Finding {
                    category: "style".into(),
                    severity: FindingSeverity::Warning,
                    file: file.to_string(),
                    line: Some(func.line),
                    message: format!(
                        "function '{}' is {lines} lines long (limit {})",
                        func.name, self.config.max_function_lines
                    ),
                    suggestion: Some("split into smaller functions".into()),
                });
            }
        }

        // Language security patterns.
        let language_patterns = if is_python {
            python_patterns()
        } else if is_ts {
            typescript_patterns()
        } else {
            Vec::new()
        };
        let secrets = secret_patterns();
        for pattern in language_patterns.iter().chain(secrets.iter()) {
            for (idx, line) in source.lines().enumerate() {
                if pattern.regex.is_match(line) {
                    findings.push(Finding {
                        category: "security".into(),
                        severity: pattern.severity,
                        file: file.to_string(),
                        line: Some(idx as u32 + 1),
                        message: pattern.message.to_string(),
                        suggestion: None,
                    });
                }
            }
        }
    }

    fn scores(&self, findings: &[Finding], files: &[String]) -> (f64, f64, f64, f64) {
        let mut complexity: f64 = 100.0;
        let mut security: f64 = 100.0;
        let mut style: f64 = 100.0;

        for finding in findings {
            match finding.category.as_str() {
                "complexity" => complexity -= 20.0,
                "security" => {
                    security -= match finding.severity {
                        FindingSeverity::Critical => 40.0,
                        FindingSeverity::Error => 25.0,
                        FindingSeverity::Warning => 10.0,
                        FindingSeverity::Info => 5.0,
                    }
                }
                _ => style -= 10.0,
            }
        }

        // Coverage is approximated from whether the change touches tests.
        let has_tests = files.iter().any(|f| {
            f.contains("test") || f.contains("spec") || f.starts_with("tests/")
        });
        let coverage: f64 = if has_tests { 90.0 } else { 50.0 };

        (
            complexity.max(0.0),
            security.max(0.0),
            style.max(0.0),
            coverage,
        )
    }

    /// Build the scored report for a set of modified files.
    pub async fn review_files(
        &self,
        task: &Task,
        files: &[String],
        workspace: &Path,
    ) -> CoreResult<ReviewReport> {
        let mut findings = Vec::new();
        for file in files {
            let path = workspace.join(file);
            let Ok(source) = tokio::fs::read_to_string(&path).await else {
                // Deleted or binary files are skipped, not errors.
                continue;
            };
            self.analyze_source(file, &source, &mut findings);
        }

        let (complexity_score, security_score, style_score, coverage_score) =
            self.scores(&findings, files);
        let overall_score = 0.3 * complexity_score
            + 0.4 * security_score
            + 0.2 * style_score
            + 0.1 * coverage_score;

        let has_critical_security = findings
            .iter()
            .any(|f| f.category == "security" && f.severity == FindingSeverity::Critical);

        let status = if has_critical_security || overall_score < self.config.review_reject_score {
            ReviewStatus::Rejected
        } else if overall_score >= self.config.review_approve_score {
            ReviewStatus::Approved
        } else {
            ReviewStatus::ChangesRequested
        };

        info!(
            task_id = task.id,
            overall = overall_score,
            findings = findings.len(),
            status = status.as_str(),
            "Review report"
        );

        Ok(ReviewReport {
            task_id: task.id,
            overall_score,
            complexity_score,
            security_score,
            style_score,
            coverage_score,
            status,
            findings,
        })
    }
}

#[async_trait]
impl ReviewGate for ReviewAgent {
    async fn review(
        &self,
        task: &Task,
        files: &[String],
        workspace: &Path,
    ) -> CoreResult<ReviewReport> {
        self.review_files(task, files, workspace).await
    }
}

struct FunctionSpan {
    name: String,
    line: u32,
    body: String,
}

/// Split source into function spans with a line-based heuristic: a span runs
/// from one function header to the next.
fn split_functions(source: &str, is_python: bool) -> Vec<FunctionSpan> {
    let header = if is_python {
        Regex::new(r"^\s*(?:async\s+)?def\s+(\w+)")
    } else {
        Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)|^\s*const\s+(\w+)\s*=.*=>")
    };
    let Ok(header) = header else { return Vec::new() };

    let mut spans: Vec<FunctionSpan> = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        if let Some(caps) = header.captures(line) {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "<anonymous>".into());
            spans.push(FunctionSpan {
                name,
                line: idx as u32 + 1,
                body: String::new(),
            });
        } else if let Some(span) = spans.last_mut() {
            span.body.push_str(line);
            span.body.push('\n');
        }
    }
    spans
}

/// Decision points + 1, counted lexically.
fn cyclomatic_complexity(body: &str) -> u32 {
    let keywords = [
        "if ", "elif ", "else if", "for ", "while ", "case ", "except", "catch", " and ", " or ",
        "&&", "||", "?",
    ];
    let mut count = 1;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        for keyword in &keywords {
            count += trimmed.matches(keyword).count() as u32;
        }
    }
    count
}
