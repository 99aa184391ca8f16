use crate::store::{now_str, parse_ts, s_err, Store};
use codeframe_core::model::{validate_project_description, validate_project_name};
use codeframe_core::{CoreError, CoreResult, Project, ProjectPhase, ProjectType};
use serde::Serialize;

/// Task completion aggregate, computed in the same query as the listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectProgress {
    pub completed_tasks: i64,
    pub total_tasks: i64,
    pub percentage: f64,
}

type ProjectRow = (i64, String, String, String, String, String, String, String);

fn to_project(r: ProjectRow) -> CoreResult<Project> {
    Ok(Project {
        id: r.0,
        name: r.1,
        description: r.2,
        project_type: r.3.parse::<ProjectType>()?,
        phase: r.4.parse::<ProjectPhase>()?,
        status: r.5,
        created_at: parse_ts(&r.6)?,
        workspace_path: r.7,
    })
}

const PROJECT_COLS: &str =
    "id, name, description, project_type, phase, status, created_at, workspace_path";

impl Store {
    /// Create a project in phase `discovery`. Duplicate names conflict.
    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        project_type: ProjectType,
        workspace_path: &str,
    ) -> CoreResult<Project> {
        validate_project_name(name)?;
        validate_project_description(description)?;

        let conn = self.conn.lock().await;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM projects WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(s_err)?;
        if exists {
            return Err(CoreError::Conflict(format!(
                "Project '{name}' already exists"
            )));
        }

        conn.execute(
            "INSERT INTO projects (name, description, project_type, phase, status, created_at, workspace_path)
             VALUES (?1, ?2, ?3, 'discovery', 'init', ?4, ?5)",
            rusqlite::params![name, description, project_type.as_str(), now_str(), workspace_path],
        )
        .map_err(s_err)?;
        let id = conn.last_insert_rowid();

        let row: ProjectRow = conn
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"),
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
                    ))
                },
            )
            .map_err(s_err)?;
        to_project(row)
    }

    pub async fn get_project(&self, id: i64) -> CoreResult<Option<Project>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"),
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
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;
        row.map(to_project).transpose()
    }

    pub async fn get_project_by_name(&self, name: &str) -> CoreResult<Option<Project>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE name = ?1"),
                [name],
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
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;
        row.map(to_project).transpose()
    }

    /// All projects with their task-completion progress, one query.
    pub async fn list_projects(&self) -> CoreResult<Vec<(Project, ProjectProgress)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.name, p.description, p.project_type, p.phase, p.status,
                        p.created_at, p.workspace_path,
                        (SELECT COUNT(*) FROM tasks t
                          WHERE t.project_id = p.id AND t.excluded = 0) AS total,
                        (SELECT COUNT(*) FROM tasks t
                          WHERE t.project_id = p.id AND t.excluded = 0
                            AND t.status = 'completed') AS done
                 FROM projects p ORDER BY p.id",
            )
            .map_err(s_err)?;

        let rows = stmt
            .query_map([], |r| {
                Ok((
                    (
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                        r.get(7)?,
                    ),
                    r.get::<_, i64>(8)?,
                    r.get::<_, i64>(9)?,
                ))
            })
            .map_err(s_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (raw, total, done) = row.map_err(s_err)?;
            let percentage = if total == 0 {
                0.0
            } else {
                done as f64 / total as f64 * 100.0
            };
            out.push((
                to_project(raw)?,
                ProjectProgress {
                    completed_tasks: done,
                    total_tasks: total,
                    percentage,
                },
            ));
        }
        Ok(out)
    }

    /// Advance the project phase, enforcing the monotonic state machine
    /// (only `review → development` goes backward).
    pub async fn update_project_phase(&self, id: i64, next: ProjectPhase) -> CoreResult<Project> {
        let current = self
            .get_project(id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("No project {id}")))?;

        if current.phase == next {
            return Ok(current);
        }
        if !current.phase.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Illegal phase transition {} -> {}",
                current.phase, next
            )));
        }

        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE projects SET phase = ?1 WHERE id = ?2",
            rusqlite::params![next.as_str(), id],
        )
        .map_err(s_err)?;
        drop(conn);

        tracing::info!(project_id = id, from = %current.phase, to = %next, "Project phase");
        Ok(Project {
            phase: next,
            ..current
        })
    }

    pub async fn set_project_status(&self, id: i64, status: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE projects SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("No project {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let project = store
            .create_project("my-awesome-app", "A full-stack app", ProjectType::Fullstack, "/tmp/ws")
            .await
            .unwrap();
        assert_eq!(project.phase, ProjectPhase::Discovery);
        assert_eq!(project.status, "init");

        let fetched = store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "my-awesome-app");
        assert_eq!(fetched.project_type, ProjectType::Fullstack);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let store = store().await;
        store
            .create_project("my-app", "A full-stack app", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap();
        let err = store
            .create_project("my-app", "Another description", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let store = store().await;
        let err = store
            .create_project("My App", "A valid description", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_phase_machine() {
        let store = store().await;
        let p = store
            .create_project("phased", "A phased project", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap();

        store
            .update_project_phase(p.id, ProjectPhase::Planning)
            .await
            .unwrap();
        let err = store
            .update_project_phase(p.id, ProjectPhase::Discovery)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        store
            .update_project_phase(p.id, ProjectPhase::AwaitingApproval)
            .await
            .unwrap();
        store
            .update_project_phase(p.id, ProjectPhase::Development)
            .await
            .unwrap();
        store
            .update_project_phase(p.id, ProjectPhase::Review)
            .await
            .unwrap();
        // Re-review is the one backward edge.
        let back = store
            .update_project_phase(p.id, ProjectPhase::Development)
            .await
            .unwrap();
        assert_eq!(back.phase, ProjectPhase::Development);
    }

    #[tokio::test]
    async fn test_list_with_empty_progress() {
        let store = store().await;
        store
            .create_project("list-me", "A listed project", ProjectType::Other, "/tmp/ws")
            .await
            .unwrap();
        let listed = store.list_projects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.total_tasks, 0);
        assert_eq!(listed[0].1.percentage, 0.0);
    }
}
