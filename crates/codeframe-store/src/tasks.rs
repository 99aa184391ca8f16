use crate::store::{has_cycle, now_str, parse_ts, s_err, Store};
use codeframe_core::{AgentMetrics, CoreError, CoreResult, Task, TaskStatus};
use std::collections::HashMap;

/// Input for task creation.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: i64,
    pub issue_id: i64,
    pub task_number: String,
    pub title: String,
    pub description: String,
    pub depends_on: Vec<i64>,
    pub required_capabilities: Vec<String>,
}

const TASK_COLS: &str = "id, project_id, issue_id, task_number, title, description, status, \
                         assigned_agent_id, required_capabilities, commit_sha, created_at, completed_at";

type TaskRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    Option<String>,
);

fn row_closure(r: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
        r.get(9)?,
        r.get(10)?,
        r.get(11)?,
    ))
}

fn to_task(r: TaskRow, depends_on: Vec<i64>) -> CoreResult<Task> {
    Ok(Task {
        id: r.0,
        project_id: r.1,
        issue_id: r.2,
        task_number: r.3,
        title: r.4,
        description: r.5,
        status: r.6.parse::<TaskStatus>()?,
        depends_on,
        assigned_agent_id: r.7,
        required_capabilities: serde_json::from_str(&r.8)?,
        commit_sha: r.9,
        created_at: parse_ts(&r.10)?,
        completed_at: r.11.as_deref().map(parse_ts).transpose()?,
    })
}

fn task_deps_adjacency(
    tx: &rusqlite::Transaction<'_>,
    project_id: i64,
) -> CoreResult<HashMap<i64, Vec<i64>>> {
    let mut stmt = tx
        .prepare(
            "SELECT d.task_id, d.depends_on_id FROM task_deps d
             JOIN tasks t ON t.id = d.task_id WHERE t.project_id = ?1",
        )
        .map_err(s_err)?;
    let rows = stmt
        .query_map([project_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))
        .map_err(s_err)?;

    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        let (from, to) = row.map_err(s_err)?;
        adjacency.entry(from).or_default().push(to);
    }
    Ok(adjacency)
}

fn load_deps(conn: &rusqlite::Connection, task_id: i64) -> CoreResult<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT depends_on_id FROM task_deps WHERE task_id = ?1 ORDER BY depends_on_id")
        .map_err(s_err)?;
    let rows = stmt.query_map([task_id], |r| r.get(0)).map_err(s_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(s_err)
}

impl Store {
    /// Insert a task in status `pending`, enforcing same-project dependencies
    /// and DAG acyclicity.
    pub async fn create_task(&self, new: NewTask) -> CoreResult<Task> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        for dep in &new.depends_on {
            let same_project: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1 AND project_id = ?2)",
                    [*dep, new.project_id],
                    |row| row.get(0),
                )
                .map_err(s_err)?;
            if !same_project {
                return Err(CoreError::Consistency(format!(
                    "Task dependency {dep} is not in project {}",
                    new.project_id
                )));
            }
        }

        tx.execute(
            "INSERT INTO tasks (project_id, issue_id, task_number, title, description, status,
                                required_capabilities, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
            rusqlite::params![
                new.project_id,
                new.issue_id,
                new.task_number,
                new.title,
                new.description,
                serde_json::to_string(&new.required_capabilities)?,
                now_str()
            ],
        )
        .map_err(s_err)?;
        let id = tx.last_insert_rowid();

        for dep in &new.depends_on {
            tx.execute(
                "INSERT INTO task_deps (task_id, depends_on_id) VALUES (?1, ?2)",
                [id, *dep],
            )
            .map_err(s_err)?;
        }

        let adjacency = task_deps_adjacency(&tx, new.project_id)?;
        if has_cycle(&adjacency) {
            return Err(CoreError::Consistency(format!(
                "Task {} would create a dependency cycle",
                new.task_number
            )));
        }

        tx.commit().map_err(s_err)?;
        drop(conn);

        self.get_task(id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("Task {id} vanished after insert")))
    }

    /// Replace a task's dependency set, re-checking acyclicity.
    pub async fn update_task_deps(&self, task_id: i64, depends_on: &[i64]) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let project_id: i64 = tx
            .query_row("SELECT project_id FROM tasks WHERE id = ?1", [task_id], |r| r.get(0))
            .map_err(|_| CoreError::Store(format!("No task {task_id}")))?;

        for dep in depends_on {
            let same_project: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1 AND project_id = ?2)",
                    [*dep, project_id],
                    |row| row.get(0),
                )
                .map_err(s_err)?;
            if !same_project {
                return Err(CoreError::Consistency(format!(
                    "Task dependency {dep} is not in project {project_id}"
                )));
            }
        }

        tx.execute("DELETE FROM task_deps WHERE task_id = ?1", [task_id])
            .map_err(s_err)?;
        for dep in depends_on {
            tx.execute(
                "INSERT INTO task_deps (task_id, depends_on_id) VALUES (?1, ?2)",
                [task_id, *dep],
            )
            .map_err(s_err)?;
        }

        let adjacency = task_deps_adjacency(&tx, project_id)?;
        if has_cycle(&adjacency) {
            return Err(CoreError::Consistency(format!(
                "Updating deps of task {task_id} would create a cycle"
            )));
        }

        tx.commit().map_err(s_err)
    }

    pub async fn get_task(&self, id: i64) -> CoreResult<Option<Task>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
                [id],
                row_closure,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;
        let Some(raw) = raw else { return Ok(None) };
        let deps = load_deps(&conn, id)?;
        Ok(Some(to_task(raw, deps)?))
    }

    pub async fn list_tasks(&self, project_id: i64) -> CoreResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        let raws: Vec<TaskRow> = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLS} FROM tasks WHERE project_id = ?1 ORDER BY task_number"
                ))
                .map_err(s_err)?;
            let rows = stmt.query_map([project_id], row_closure).map_err(s_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
        };

        let mut tasks = Vec::with_capacity(raws.len());
        for raw in raws {
            let deps = load_deps(&conn, raw.0)?;
            tasks.push(to_task(raw, deps)?);
        }
        Ok(tasks)
    }

    /// Promote pending (or previously blocked) tasks whose dependencies are
    /// all completed and which carry no open SYNC blocker. Returns the ids
    /// that newly became ready.
    pub async fn recompute_ready(&self, project_id: i64) -> CoreResult<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "UPDATE tasks SET status = 'ready'
                 WHERE project_id = ?1
                   AND status IN ('pending', 'blocked')
                   AND excluded = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM task_deps d
                       JOIN tasks dep ON dep.id = d.depends_on_id
                       WHERE d.task_id = tasks.id AND dep.status != 'completed')
                   AND NOT EXISTS (
                       SELECT 1 FROM blockers b
                       WHERE b.task_id = tasks.id
                         AND b.severity = 'sync'
                         AND b.resolved_at IS NULL)
                 RETURNING id",
            )
            .map_err(s_err)?;
        let rows = stmt.query_map([project_id], |r| r.get(0)).map_err(s_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(s_err)
    }

    /// Ready tasks in dispatch order: issue priority descending, then task
    /// number ascending.
    pub async fn list_dispatchable(&self, project_id: i64) -> CoreResult<Vec<Task>> {
        let ids: Vec<i64> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare(
                    "SELECT t.id FROM tasks t
                     JOIN issues i ON i.id = t.issue_id
                     WHERE t.project_id = ?1 AND t.status = 'ready' AND t.excluded = 0
                     ORDER BY i.priority DESC, t.task_number",
                )
                .map_err(s_err)?;
            let rows = stmt.query_map([project_id], |r| r.get(0)).map_err(s_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
        };

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.get_task(id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Atomically hand a ready task to an idle agent.
    ///
    /// Enforces at-most-one-in-progress on both sides: the task must be
    /// `ready` and the agent `idle`, and both rows flip in one transaction.
    pub async fn assign_task(&self, task_id: i64, agent_id: &str) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let status: String = tx
            .query_row("SELECT status FROM tasks WHERE id = ?1", [task_id], |r| r.get(0))
            .map_err(|_| CoreError::Store(format!("No task {task_id}")))?;
        if status != "ready" {
            return Err(CoreError::Conflict(format!(
                "Task {task_id} is {status}, not ready"
            )));
        }

        let agent_status: String = tx
            .query_row("SELECT status FROM agents WHERE id = ?1", [agent_id], |r| r.get(0))
            .map_err(|_| CoreError::Store(format!("No agent {agent_id}")))?;
        if agent_status != "idle" {
            return Err(CoreError::Conflict(format!(
                "Agent {agent_id} is {agent_status}, not idle"
            )));
        }

        tx.execute(
            "UPDATE tasks SET status = 'in_progress', assigned_agent_id = ?1 WHERE id = ?2",
            rusqlite::params![agent_id, task_id],
        )
        .map_err(s_err)?;
        tx.execute(
            "UPDATE agents SET status = 'working', current_task_id = ?1 WHERE id = ?2",
            rusqlite::params![task_id, agent_id],
        )
        .map_err(s_err)?;
        tx.commit().map_err(s_err)
    }

    /// Mark a task completed, record its commit SHA, and release the agent —
    /// one transaction.
    pub async fn complete_task(&self, task_id: i64, commit_sha: Option<&str>) -> CoreResult<()> {
        self.finish_task(task_id, TaskStatus::Completed, commit_sha, None)
            .await
    }

    /// Mark a task failed with a structured reason and release the agent.
    pub async fn fail_task(&self, task_id: i64, reason: &str) -> CoreResult<()> {
        self.finish_task(task_id, TaskStatus::Failed, None, Some(reason))
            .await
    }

    /// Move an in-progress task to `blocked` and free its agent.
    pub async fn block_task(&self, task_id: i64, reason: &str) -> CoreResult<()> {
        self.finish_task(task_id, TaskStatus::Blocked, None, Some(reason))
            .await
    }

    /// Move an in-progress task to `awaiting_review` without releasing the
    /// agent (the worker still owns the revision loop).
    pub async fn set_task_awaiting_review(&self, task_id: i64) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE tasks SET status = 'awaiting_review' WHERE id = ?1 AND status = 'in_progress'",
                [task_id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Conflict(format!(
                "Task {task_id} is not in progress"
            )));
        }
        Ok(())
    }

    /// Return an awaiting-review task to `in_progress` for a revision pass.
    pub async fn resume_task(&self, task_id: i64) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE tasks SET status = 'in_progress' WHERE id = ?1 AND status = 'awaiting_review'",
                [task_id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Conflict(format!(
                "Task {task_id} is not awaiting review"
            )));
        }
        Ok(())
    }

    async fn finish_task(
        &self,
        task_id: i64,
        status: TaskStatus,
        commit_sha: Option<&str>,
        reason: Option<&str>,
    ) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let agent_id: Option<String> = tx
            .query_row(
                "SELECT assigned_agent_id FROM tasks WHERE id = ?1",
                [task_id],
                |r| r.get(0),
            )
            .map_err(|_| CoreError::Store(format!("No task {task_id}")))?;

        let completed_at = if status == TaskStatus::Completed {
            Some(now_str())
        } else {
            None
        };
        tx.execute(
            "UPDATE tasks SET status = ?1, commit_sha = ?2, completed_at = ?3,
                    last_error = COALESCE(?4, last_error),
                    assigned_agent_id = NULL
             WHERE id = ?5",
            rusqlite::params![status.as_str(), commit_sha, completed_at, reason, task_id],
        )
        .map_err(s_err)?;

        if let Some(agent_id) = agent_id {
            let metrics_json: String = tx
                .query_row("SELECT metrics FROM agents WHERE id = ?1", [&agent_id], |r| r.get(0))
                .map_err(s_err)?;
            let mut metrics: AgentMetrics =
                serde_json::from_str(&metrics_json).unwrap_or_default();
            match status {
                TaskStatus::Completed => metrics.tasks_completed += 1,
                TaskStatus::Failed => metrics.tasks_failed += 1,
                _ => {}
            }
            tx.execute(
                "UPDATE agents SET status = 'idle', current_task_id = NULL, metrics = ?1
                 WHERE id = ?2",
                rusqlite::params![serde_json::to_string(&metrics)?, agent_id],
            )
            .map_err(s_err)?;
        }

        tx.commit().map_err(s_err)
    }

    /// Record an approval: tasks in `all \ selected` are excluded and never
    /// enqueued; selected tasks stay eligible. Idempotent — re-applying the
    /// same sets changes nothing and returns the same count.
    pub async fn apply_approval(
        &self,
        project_id: i64,
        selected: &[i64],
        all: &[i64],
    ) -> CoreResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        for id in all {
            let excluded = !selected.contains(id);
            tx.execute(
                "UPDATE tasks SET excluded = ?1 WHERE id = ?2 AND project_id = ?3",
                rusqlite::params![excluded as i64, id, project_id],
            )
            .map_err(s_err)?;
        }
        tx.commit().map_err(s_err)?;
        Ok(selected.len())
    }

    /// Find a task by full SHA or a prefix of at least 7 hex chars.
    pub async fn task_by_commit(&self, sha: &str) -> CoreResult<Option<Task>> {
        if sha.len() < 7 || !sha.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::Validation(
                "Commit lookup needs at least 7 hex characters".to_string(),
            ));
        }
        let id: Option<i64> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT id FROM tasks WHERE commit_sha LIKE ?1 || '%' LIMIT 1",
                [sha],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?
        };
        match id {
            Some(id) => self.get_task(id).await,
            None => Ok(None),
        }
    }

    /// Count of tasks currently in progress for a project.
    pub async fn count_in_progress(&self, project_id: i64) -> CoreResult<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?1 AND status = 'in_progress'",
                [project_id],
                |r| r.get(0),
            )
            .map_err(s_err)?;
        Ok(n as usize)
    }

    /// True when every non-excluded task has completed.
    pub async fn all_tasks_completed(&self, project_id: i64) -> CoreResult<bool> {
        let conn = self.conn.lock().await;
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE project_id = ?1 AND excluded = 0 AND status != 'completed'",
                [project_id],
                |r| r.get(0),
            )
            .map_err(s_err)?;
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?1 AND excluded = 0",
                [project_id],
                |r| r.get(0),
            )
            .map_err(s_err)?;
        Ok(total > 0 && remaining == 0)
    }

    /// Shutdown path: every in-progress task fails with the given reason so a
    /// restart can re-queue after user acknowledgement.
    pub async fn fail_in_flight(&self, reason: &str) -> CoreResult<usize> {
        let ids: Vec<i64> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare("SELECT id FROM tasks WHERE status = 'in_progress'")
                .map_err(s_err)?;
            let rows = stmt.query_map([], |r| r.get(0)).map_err(s_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
        };
        for id in &ids {
            self.fail_task(*id, reason).await?;
        }
        Ok(ids.len())
    }

    /// Attach a warning note to a task (e.g. a skipped commit) without
    /// touching its status.
    pub async fn note_task_warning(&self, task_id: i64, note: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE tasks SET last_error = ?1 WHERE id = ?2",
                rusqlite::params![note, task_id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("No task {task_id}")));
        }
        Ok(())
    }

    /// Last recorded error reason for a task, if any.
    pub async fn task_last_error(&self, task_id: i64) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT last_error FROM tasks WHERE id = ?1", [task_id], |r| r.get(0))
            .map_err(s_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::NewIssue;
    use codeframe_core::{AgentKind, AgentStatus, Maturity, ProjectType, ProposedBy};

    async fn fixture() -> (Store, i64, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let pid = store
            .create_project("task-test", "Project for task tests", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap()
            .id;
        let iid = store
            .create_issue(NewIssue {
                project_id: pid,
                issue_number: "1".into(),
                title: "Issue 1".into(),
                description: "A test issue".into(),
                priority: 1,
                depends_on: vec![],
                proposed_by: ProposedBy::Agent,
            })
            .await
            .unwrap()
            .id;
        (store, pid, iid)
    }

    fn new_task(pid: i64, iid: i64, number: &str, deps: Vec<i64>) -> NewTask {
        NewTask {
            project_id: pid,
            issue_id: iid,
            task_number: number.to_string(),
            title: format!("Task {number}"),
            description: "A test task".into(),
            depends_on: deps,
            required_capabilities: vec!["python".into()],
        }
    }

    async fn add_idle_agent(store: &Store, id: &str) {
        store
            .upsert_agent(&codeframe_core::AgentRecord {
                id: id.to_string(),
                kind: AgentKind::Backend,
                provider: "anthropic".into(),
                maturity: Maturity::Coaching,
                status: AgentStatus::Idle,
                current_task_id: None,
                last_heartbeat: chrono::Utc::now(),
                metrics: AgentMetrics::default(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_ready_flow() {
        let (store, pid, iid) = fixture().await;
        let t1 = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        let t2 = store
            .create_task(new_task(pid, iid, "1.2", vec![t1.id]))
            .await
            .unwrap();
        assert_eq!(t1.status, TaskStatus::Pending);

        let ready = store.recompute_ready(pid).await.unwrap();
        assert_eq!(ready, vec![t1.id]);

        // t2 stays pending until t1 completes.
        let dispatchable = store.list_dispatchable(pid).await.unwrap();
        assert_eq!(dispatchable.len(), 1);
        assert_eq!(dispatchable[0].id, t1.id);
        assert_eq!(t2.depends_on, vec![t1.id]);
    }

    #[tokio::test]
    async fn test_assign_complete_releases_agent() {
        let (store, pid, iid) = fixture().await;
        let task = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        add_idle_agent(&store, "backend-1").await;

        store.recompute_ready(pid).await.unwrap();
        store.assign_task(task.id, "backend-1").await.unwrap();

        let task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        let agent = store.get_agent("backend-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.current_task_id, Some(task.id));

        // Double assignment conflicts on both sides.
        let err = store.assign_task(task.id, "backend-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let sha = "a".repeat(40);
        store.complete_task(task.id, Some(&sha)).await.unwrap();
        let task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.commit_sha.as_deref(), Some(sha.as_str()));
        assert!(task.completed_at.is_some());

        let agent = store.get_agent("backend-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert_eq!(agent.metrics.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_fail_task_records_reason() {
        let (store, pid, iid) = fixture().await;
        let task = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        add_idle_agent(&store, "backend-1").await;
        store.recompute_ready(pid).await.unwrap();
        store.assign_task(task.id, "backend-1").await.unwrap();

        store.fail_task(task.id, "LLM call timed out after 120s").await.unwrap();
        let reason = store.task_last_error(task.id).await.unwrap();
        assert_eq!(reason.as_deref(), Some("LLM call timed out after 120s"));

        let agent = store.get_agent("backend-1").await.unwrap().unwrap();
        assert_eq!(agent.metrics.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_dependency_gates_readiness() {
        let (store, pid, iid) = fixture().await;
        let t1 = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        let t2 = store
            .create_task(new_task(pid, iid, "1.2", vec![t1.id]))
            .await
            .unwrap();
        add_idle_agent(&store, "backend-1").await;

        store.recompute_ready(pid).await.unwrap();
        store.assign_task(t1.id, "backend-1").await.unwrap();
        store.complete_task(t1.id, None).await.unwrap();

        let newly = store.recompute_ready(pid).await.unwrap();
        assert_eq!(newly, vec![t2.id]);
    }

    #[tokio::test]
    async fn test_task_cycle_rejected() {
        let (store, pid, iid) = fixture().await;
        let t1 = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        let t2 = store
            .create_task(new_task(pid, iid, "1.2", vec![t1.id]))
            .await
            .unwrap();

        let err = store.update_task_deps(t1.id, &[t2.id]).await.unwrap_err();
        assert!(matches!(err, CoreError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_approval_exclusion_idempotent() {
        let (store, pid, iid) = fixture().await;
        let t1 = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        let t2 = store.create_task(new_task(pid, iid, "1.2", vec![])).await.unwrap();

        let all = vec![t1.id, t2.id];
        let selected = vec![t1.id];
        let count = store.apply_approval(pid, &selected, &all).await.unwrap();
        assert_eq!(count, 1);

        // Excluded tasks never become ready.
        store.recompute_ready(pid).await.unwrap();
        let dispatchable = store.list_dispatchable(pid).await.unwrap();
        assert_eq!(dispatchable.len(), 1);
        assert_eq!(dispatchable[0].id, t1.id);

        // Second identical approval is a no-op with the same count.
        let count2 = store.apply_approval(pid, &selected, &all).await.unwrap();
        assert_eq!(count2, count);
    }

    #[tokio::test]
    async fn test_task_by_commit_prefix() {
        let (store, pid, iid) = fixture().await;
        let task = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        add_idle_agent(&store, "backend-1").await;
        store.recompute_ready(pid).await.unwrap();
        store.assign_task(task.id, "backend-1").await.unwrap();

        let sha = "deadbeef".to_string() + &"0".repeat(32);
        store.complete_task(task.id, Some(&sha)).await.unwrap();

        let by_full = store.task_by_commit(&sha).await.unwrap().unwrap();
        assert_eq!(by_full.id, task.id);
        let by_prefix = store.task_by_commit("deadbee0").await;
        assert!(by_prefix.unwrap().is_none());
        let by_prefix = store.task_by_commit("deadbeef").await.unwrap().unwrap();
        assert_eq!(by_prefix.id, task.id);

        let err = store.task_by_commit("dead").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fail_in_flight_on_shutdown() {
        let (store, pid, iid) = fixture().await;
        let task = store.create_task(new_task(pid, iid, "1.1", vec![])).await.unwrap();
        add_idle_agent(&store, "backend-1").await;
        store.recompute_ready(pid).await.unwrap();
        store.assign_task(task.id, "backend-1").await.unwrap();

        let failed = store.fail_in_flight("shutdown").await.unwrap();
        assert_eq!(failed, 1);
        let task = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            store.task_last_error(task.id).await.unwrap().as_deref(),
            Some("shutdown")
        );
    }
}
