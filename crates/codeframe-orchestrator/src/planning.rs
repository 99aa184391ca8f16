use codeframe_agents::ChatMessage;
use codeframe_core::{CoreError, CoreResult, DiscoveryAnswer, Project, ProposedBy};
use codeframe_store::{NewIssue, NewTask, Store};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Issue/task tree as emitted by the planning LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedTree {
    pub issues: Vec<PlannedIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedIssue {
    pub number: String,
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedTask {
    pub number: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

fn default_priority() -> i64 {
    1
}

/// Build the planning prompt from the project and its discovery answers.
pub fn planning_prompt(project: &Project, answers: &[DiscoveryAnswer]) -> Vec<ChatMessage> {
    let mut requirements = String::new();
    for answer in answers {
        requirements.push_str(&format!("[{}] {}\n", answer.category, answer.answer_text));
    }

    let system = "You are the lead engineer planning an autonomous build. \
        Decompose the requirements into issues and tasks. Respond with JSON only: \
        {\"issues\": [{\"number\": \"1\", \"title\": \"...\", \"description\": \"...\", \
        \"priority\": 1, \"depends_on\": [], \"tasks\": [{\"number\": \"1.1\", \
        \"title\": \"...\", \"description\": \"...\", \"depends_on\": [], \
        \"required_capabilities\": [\"python\"]}]}]}. \
        Dependencies reference issue/task numbers and must form a DAG.";

    let user = format!(
        "Project: {} ({})\n{}\n\nRequirements from discovery:\n{}",
        project.name,
        project.project_type.as_str(),
        project.description,
        requirements
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Parse the planner's response, accepting bare JSON or a fenced block.
pub fn parse_plan(response: &str) -> CoreResult<PlannedTree> {
    let candidate = response.trim();
    if let Ok(tree) = serde_json::from_str::<PlannedTree>(candidate) {
        return validate_tree(tree);
    }
    if let Some(start) = candidate.find('{') {
        if let Some(end) = candidate.rfind('}') {
            if let Ok(tree) = serde_json::from_str::<PlannedTree>(&candidate[start..=end]) {
                return validate_tree(tree);
            }
        }
    }
    Err(CoreError::ExternalTool(
        "planner response did not contain a parseable issue tree".to_string(),
    ))
}

fn validate_tree(tree: PlannedTree) -> CoreResult<PlannedTree> {
    if tree.issues.is_empty() {
        return Err(CoreError::ExternalTool("planner produced no issues".into()));
    }
    for issue in &tree.issues {
        if issue.tasks.is_empty() {
            return Err(CoreError::ExternalTool(format!(
                "issue {} has no tasks",
                issue.number
            )));
        }
    }
    Ok(tree)
}

/// Persist a planned tree, translating number references into row ids.
/// The store re-checks DAG acyclicity on every insert; a cyclic plan fails
/// here with a consistency error.
pub async fn materialize(
    store: &Store,
    project_id: i64,
    tree: &PlannedTree,
) -> CoreResult<(usize, usize)> {
    let mut issue_ids: HashMap<&str, i64> = HashMap::new();
    let mut task_ids: HashMap<&str, i64> = HashMap::new();
    let mut task_count = 0;

    for issue in &tree.issues {
        let depends_on = issue
            .depends_on
            .iter()
            .filter_map(|n| issue_ids.get(n.as_str()).copied())
            .collect();
        let created = store
            .create_issue(NewIssue {
                project_id,
                issue_number: issue.number.clone(),
                title: issue.title.clone(),
                description: issue.description.clone(),
                priority: issue.priority,
                depends_on,
                proposed_by: ProposedBy::Agent,
            })
            .await?;
        issue_ids.insert(issue.number.as_str(), created.id);

        for task in &issue.tasks {
            let depends_on = task
                .depends_on
                .iter()
                .filter_map(|n| task_ids.get(n.as_str()).copied())
                .collect();
            let created = store
                .create_task(NewTask {
                    project_id,
                    issue_id: issue_ids[issue.number.as_str()],
                    task_number: task.number.clone(),
                    title: task.title.clone(),
                    description: task.description.clone(),
                    depends_on,
                    required_capabilities: task.required_capabilities.clone(),
                })
                .await?;
            task_ids.insert(task.number.as_str(), created.id);
            task_count += 1;
        }
    }

    info!(project_id, issues = tree.issues.len(), tasks = task_count, "Plan materialized");
    Ok((tree.issues.len(), task_count))
}
