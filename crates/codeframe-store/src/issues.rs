use crate::store::{has_cycle, now_str, parse_ts, s_err, Store};
use codeframe_core::{CoreError, CoreResult, Issue, ProposedBy, Task};
use std::collections::HashMap;

/// Input for issue creation.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub project_id: i64,
    pub issue_number: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub depends_on: Vec<i64>,
    pub proposed_by: ProposedBy,
}

fn issue_deps_adjacency(
    tx: &rusqlite::Transaction<'_>,
    project_id: i64,
) -> CoreResult<HashMap<i64, Vec<i64>>> {
    let mut stmt = tx
        .prepare(
            "SELECT d.issue_id, d.depends_on_id FROM issue_deps d
             JOIN issues i ON i.id = d.issue_id WHERE i.project_id = ?1",
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

fn to_issue(
    r: (i64, i64, String, String, String, String, i64, String, String),
    depends_on: Vec<i64>,
) -> CoreResult<Issue> {
    Ok(Issue {
        id: r.0,
        project_id: r.1,
        issue_number: r.2,
        title: r.3,
        description: r.4,
        status: r.5,
        priority: r.6,
        depends_on,
        proposed_by: r.7.parse::<ProposedBy>()?,
        created_at: parse_ts(&r.8)?,
    })
}

const ISSUE_COLS: &str =
    "id, project_id, issue_number, title, description, status, priority, proposed_by, created_at";

impl Store {
    /// Insert an issue, enforcing that all dependencies belong to the same
    /// project and that the issue dependency graph stays acyclic.
    pub async fn create_issue(&self, new: NewIssue) -> CoreResult<Issue> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        for dep in &new.depends_on {
            let same_project: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?1 AND project_id = ?2)",
                    [*dep, new.project_id],
                    |row| row.get(0),
                )
                .map_err(s_err)?;
            if !same_project {
                return Err(CoreError::Consistency(format!(
                    "Issue dependency {dep} is not in project {}",
                    new.project_id
                )));
            }
        }

        tx.execute(
            "INSERT INTO issues (project_id, issue_number, title, description, status, priority, proposed_by, created_at)
             VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?7)",
            rusqlite::params![
                new.project_id,
                new.issue_number,
                new.title,
                new.description,
                new.priority,
                new.proposed_by.as_str(),
                now_str()
            ],
        )
        .map_err(s_err)?;
        let id = tx.last_insert_rowid();

        for dep in &new.depends_on {
            tx.execute(
                "INSERT INTO issue_deps (issue_id, depends_on_id) VALUES (?1, ?2)",
                [id, *dep],
            )
            .map_err(s_err)?;
        }

        let adjacency = issue_deps_adjacency(&tx, new.project_id)?;
        if has_cycle(&adjacency) {
            // Dropping the transaction rolls everything back.
            return Err(CoreError::Consistency(format!(
                "Issue {} would create a dependency cycle",
                new.issue_number
            )));
        }

        tx.commit().map_err(s_err)?;
        drop(conn);

        self.get_issue(id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("Issue {id} vanished after insert")))
    }

    /// Replace an issue's dependency set, re-checking acyclicity.
    pub async fn update_issue_deps(&self, issue_id: i64, depends_on: &[i64]) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let project_id: i64 = tx
            .query_row("SELECT project_id FROM issues WHERE id = ?1", [issue_id], |r| r.get(0))
            .map_err(|_| CoreError::Store(format!("No issue {issue_id}")))?;

        for dep in depends_on {
            let same_project: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?1 AND project_id = ?2)",
                    [*dep, project_id],
                    |row| row.get(0),
                )
                .map_err(s_err)?;
            if !same_project {
                return Err(CoreError::Consistency(format!(
                    "Issue dependency {dep} is not in project {project_id}"
                )));
            }
        }

        tx.execute("DELETE FROM issue_deps WHERE issue_id = ?1", [issue_id])
            .map_err(s_err)?;
        for dep in depends_on {
            tx.execute(
                "INSERT INTO issue_deps (issue_id, depends_on_id) VALUES (?1, ?2)",
                [issue_id, *dep],
            )
            .map_err(s_err)?;
        }

        let adjacency = issue_deps_adjacency(&tx, project_id)?;
        if has_cycle(&adjacency) {
            return Err(CoreError::Consistency(format!(
                "Updating deps of issue {issue_id} would create a cycle"
            )));
        }

        tx.commit().map_err(s_err)
    }

    pub async fn get_issue(&self, id: i64) -> CoreResult<Option<Issue>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {ISSUE_COLS} FROM issues WHERE id = ?1"),
                [id],
                |r| {
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
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;

        let Some(raw) = raw else { return Ok(None) };
        let deps = {
            let mut stmt = conn
                .prepare("SELECT depends_on_id FROM issue_deps WHERE issue_id = ?1 ORDER BY depends_on_id")
                .map_err(s_err)?;
            let rows = stmt
                .query_map([id], |r| r.get::<_, i64>(0))
                .map_err(s_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
        };
        Ok(Some(to_issue(raw, deps)?))
    }

    pub async fn list_issues(&self, project_id: i64) -> CoreResult<Vec<Issue>> {
        let ids: Vec<i64> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare("SELECT id FROM issues WHERE project_id = ?1 ORDER BY priority DESC, issue_number")
                .map_err(s_err)?;
            let rows = stmt
                .query_map([project_id], |r| r.get(0))
                .map_err(s_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
        };

        let mut issues = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(issue) = self.get_issue(id).await? {
                issues.push(issue);
            }
        }
        Ok(issues)
    }

    /// Issues with their tasks inlined, for the `?include=tasks` listing.
    pub async fn issue_tree(&self, project_id: i64) -> CoreResult<Vec<(Issue, Vec<Task>)>> {
        let issues = self.list_issues(project_id).await?;
        let tasks = self.list_tasks(project_id).await?;

        let mut tree: Vec<(Issue, Vec<Task>)> =
            issues.into_iter().map(|i| (i, Vec::new())).collect();
        for task in tasks {
            if let Some(slot) = tree.iter_mut().find(|(i, _)| i.id == task.issue_id) {
                slot.1.push(task);
            }
        }
        Ok(tree)
    }

    pub async fn set_issue_status(&self, id: i64, status: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE issues SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("No issue {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeframe_core::ProjectType;

    async fn project(store: &Store) -> i64 {
        store
            .create_project("issue-test", "Project for issue tests", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap()
            .id
    }

    fn new_issue(project_id: i64, number: &str, deps: Vec<i64>) -> NewIssue {
        NewIssue {
            project_id,
            issue_number: number.to_string(),
            title: format!("Issue {number}"),
            description: "A test issue".into(),
            priority: 1,
            depends_on: deps,
            proposed_by: ProposedBy::Agent,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_issue() {
        let store = Store::open_in_memory().await.unwrap();
        let pid = project(&store).await;

        let issue = store.create_issue(new_issue(pid, "1", vec![])).await.unwrap();
        assert_eq!(issue.status, "open");
        assert!(issue.depends_on.is_empty());

        let dependent = store
            .create_issue(new_issue(pid, "2", vec![issue.id]))
            .await
            .unwrap();
        assert_eq!(dependent.depends_on, vec![issue.id]);
    }

    #[tokio::test]
    async fn test_cycle_rejected_on_update() {
        let store = Store::open_in_memory().await.unwrap();
        let pid = project(&store).await;

        let a = store.create_issue(new_issue(pid, "1", vec![])).await.unwrap();
        let b = store
            .create_issue(new_issue(pid, "2", vec![a.id]))
            .await
            .unwrap();

        // Diamond shapes remain fine.
        let c = store
            .create_issue(new_issue(pid, "3", vec![a.id, b.id]))
            .await
            .unwrap();
        assert_eq!(c.depends_on.len(), 2);

        // Pointing a back at c closes a cycle and must roll back.
        let err = store.update_issue_deps(a.id, &[c.id]).await.unwrap_err();
        assert!(matches!(err, CoreError::Consistency(_)));

        let a_after = store.get_issue(a.id).await.unwrap().unwrap();
        assert!(a_after.depends_on.is_empty(), "rolled back to no deps");
    }

    #[tokio::test]
    async fn test_cross_project_dep_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let pid = project(&store).await;
        let other = store
            .create_project("other-proj", "Another test project", ProjectType::Python, "/tmp/o")
            .await
            .unwrap()
            .id;

        let foreign = store.create_issue(new_issue(other, "1", vec![])).await.unwrap();
        let err = store
            .create_issue(new_issue(pid, "1", vec![foreign.id]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_priority() {
        let store = Store::open_in_memory().await.unwrap();
        let pid = project(&store).await;

        store
            .create_issue(NewIssue {
                priority: 1,
                ..new_issue(pid, "1", vec![])
            })
            .await
            .unwrap();
        store
            .create_issue(NewIssue {
                priority: 5,
                ..new_issue(pid, "2", vec![])
            })
            .await
            .unwrap();

        let issues = store.list_issues(pid).await.unwrap();
        assert_eq!(issues[0].issue_number, "2");
    }
}
