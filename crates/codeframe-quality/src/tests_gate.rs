use crate::runner::ToolRunner;
use codeframe_core::{CoreResult, ProjectType};
use std::path::Path;
use std::time::Duration;

/// Outcome of the test gate. Any failing test blocks the pipeline.
#[derive(Debug, Clone)]
pub struct TestGateResult {
    pub passed: bool,
    pub output: String,
}

/// Test runner commands per project type. Fullstack projects run both
/// runners; the gate passes only when every runner does.
fn commands_for(project_type: ProjectType) -> Vec<(&'static str, Vec<String>)> {
    match project_type {
        ProjectType::Python => vec![("pytest", vec!["-q".into()])],
        ProjectType::Typescript => vec![("npx", vec!["jest".into(), "--ci".into()])],
        ProjectType::Fullstack => vec![
            ("pytest", vec!["-q".into()]),
            ("npx", vec!["jest".into(), "--ci".into()]),
        ],
        ProjectType::Other => vec![],
    }
}

/// Run the project's test suite under the tool budget.
pub async fn run_tests(
    runner: &dyn ToolRunner,
    project_type: ProjectType,
    workspace: &Path,
    timeout: Duration,
) -> CoreResult<TestGateResult> {
    let mut passed = true;
    let mut output = String::new();

    for (program, args) in commands_for(project_type) {
        let result = runner.run(program, &args, workspace, timeout).await?;
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&format!("$ {program} {}\n", args.join(" ")));
        output.push_str(&result.stdout);
        if !result.stderr.is_empty() {
            output.push_str(&result.stderr);
        }
        passed &= result.success();
    }

    Ok(TestGateResult { passed, output })
}
