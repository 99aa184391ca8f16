use crate::store::{now_str, parse_ts, s_err, Store};
use codeframe_core::{CoreResult, Linter, LintResult};
use serde::Serialize;

/// One day of aggregated lint outcomes for the trend endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LintTrendPoint {
    pub day: String,
    pub runs: i64,
    pub errors: i64,
    pub warnings: i64,
}

impl Store {
    /// Append one lint run. Results are never mutated afterwards.
    pub async fn insert_lint_result(
        &self,
        task_id: i64,
        linter: Linter,
        error_count: i64,
        warning_count: i64,
        files_linted: i64,
        output: &str,
    ) -> CoreResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO lint_results
                 (task_id, linter, error_count, warning_count, files_linted, output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                task_id,
                linter.as_str(),
                error_count,
                warning_count,
                files_linted,
                output,
                now_str()
            ],
        )
        .map_err(s_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Lint runs for a task, newest first (uses the covering index).
    pub async fn lint_results_for_task(&self, task_id: i64) -> CoreResult<Vec<LintResult>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, linter, error_count, warning_count, files_linted, output, created_at
                 FROM lint_results WHERE task_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map([task_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                ))
            })
            .map_err(s_err)?;

        let mut out = Vec::new();
        for row in rows {
            let r = row.map_err(s_err)?;
            out.push(LintResult {
                id: r.0,
                task_id: r.1,
                linter: r.2.parse::<Linter>()?,
                error_count: r.3,
                warning_count: r.4,
                files_linted: r.5,
                output: r.6,
                created_at: parse_ts(&r.7)?,
            });
        }
        Ok(out)
    }

    /// Daily error/warning aggregation for a project over the last `days`.
    pub async fn lint_trend(&self, project_id: i64, days: u32) -> CoreResult<Vec<LintTrendPoint>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT substr(l.created_at, 1, 10) AS day,
                        COUNT(*), SUM(l.error_count), SUM(l.warning_count)
                 FROM lint_results l JOIN tasks t ON t.id = l.task_id
                 WHERE t.project_id = ?1
                   AND l.created_at >= datetime('now', '-' || ?2 || ' days')
                 GROUP BY day ORDER BY day",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map(rusqlite::params![project_id, days], |r| {
                Ok(LintTrendPoint {
                    day: r.get(0)?,
                    runs: r.get(1)?,
                    errors: r.get(2)?,
                    warnings: r.get(3)?,
                })
            })
            .map_err(s_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(s_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::NewIssue;
    use crate::tasks::NewTask;
    use codeframe_core::{ProjectType, ProposedBy};

    async fn fixture() -> (Store, i64, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let pid = store
            .create_project("lint-test", "Lint test project", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap()
            .id;
        let iid = store
            .create_issue(NewIssue {
                project_id: pid,
                issue_number: "1".into(),
                title: "Issue".into(),
                description: "Lint issue".into(),
                priority: 1,
                depends_on: vec![],
                proposed_by: ProposedBy::Agent,
            })
            .await
            .unwrap()
            .id;
        let tid = store
            .create_task(NewTask {
                project_id: pid,
                issue_id: iid,
                task_number: "1.1".into(),
                title: "Task".into(),
                description: "Lint task".into(),
                depends_on: vec![],
                required_capabilities: vec![],
            })
            .await
            .unwrap()
            .id;
        (store, pid, tid)
    }

    #[tokio::test]
    async fn test_append_and_list_newest_first() {
        let (store, _, tid) = fixture().await;
        store
            .insert_lint_result(tid, Linter::Ruff, 2, 1, 3, "F401 unused import")
            .await
            .unwrap();
        store
            .insert_lint_result(tid, Linter::Ruff, 0, 0, 3, "clean")
            .await
            .unwrap();

        let results = store.lint_results_for_task(tid).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output, "clean");
        assert_eq!(results[1].error_count, 2);
    }

    #[tokio::test]
    async fn test_trend_aggregates_by_day() {
        let (store, pid, tid) = fixture().await;
        store
            .insert_lint_result(tid, Linter::Eslint, 1, 2, 4, "no-unused-vars")
            .await
            .unwrap();
        store
            .insert_lint_result(tid, Linter::Eslint, 0, 1, 4, "warn only")
            .await
            .unwrap();

        let trend = store.lint_trend(pid, 7).await.unwrap();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].runs, 2);
        assert_eq!(trend[0].errors, 1);
        assert_eq!(trend[0].warnings, 3);
    }
}
