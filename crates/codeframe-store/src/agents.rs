use crate::store::{now_str, parse_ts, s_err, Store};
use chrono::{DateTime, Utc};
use codeframe_core::{
    AgentKind, AgentMetrics, AgentRecord, AgentStatus, CoreError, CoreResult, Maturity,
    ProjectAgent,
};

const AGENT_COLS: &str =
    "id, kind, provider, maturity, status, current_task_id, last_heartbeat, metrics";

type AgentRow = (
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    String,
    String,
);

fn row_closure(r: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
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
}

fn to_agent(r: AgentRow) -> CoreResult<AgentRecord> {
    Ok(AgentRecord {
        id: r.0,
        kind: r.1.parse::<AgentKind>()?,
        provider: r.2,
        maturity: r.3.parse::<Maturity>()?,
        status: r.4.parse::<AgentStatus>()?,
        current_task_id: r.5,
        last_heartbeat: parse_ts(&r.6)?,
        metrics: serde_json::from_str(&r.7).unwrap_or_default(),
    })
}

impl Store {
    /// Insert or replace an agent row.
    pub async fn upsert_agent(&self, agent: &AgentRecord) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agents (id, kind, provider, maturity, status, current_task_id, last_heartbeat, metrics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                provider = excluded.provider,
                maturity = excluded.maturity,
                status = excluded.status,
                current_task_id = excluded.current_task_id,
                last_heartbeat = excluded.last_heartbeat,
                metrics = excluded.metrics",
            rusqlite::params![
                agent.id,
                agent.kind.as_str(),
                agent.provider,
                agent.maturity.as_str(),
                agent.status.as_str(),
                agent.current_task_id,
                agent.last_heartbeat.to_rfc3339(),
                serde_json::to_string(&agent.metrics)?,
            ],
        )
        .map_err(s_err)?;
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> CoreResult<Option<AgentRecord>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
                [id],
                row_closure,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;
        raw.map(to_agent).transpose()
    }

    pub async fn list_agents(&self) -> CoreResult<Vec<AgentRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT {AGENT_COLS} FROM agents ORDER BY id"))
            .map_err(s_err)?;
        let rows = stmt.query_map([], row_closure).map_err(s_err)?;
        let raws = rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?;
        raws.into_iter().map(to_agent).collect()
    }

    /// Refresh an agent's heartbeat timestamp.
    pub async fn heartbeat(&self, agent_id: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE agents SET last_heartbeat = ?1 WHERE id = ?2",
                rusqlite::params![now_str(), agent_id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("No agent {agent_id}")));
        }
        Ok(())
    }

    /// Mark agents whose heartbeat predates the cutoff as offline.
    /// Working agents are left alone; their task timeout handles them.
    pub async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE agents SET status = 'offline'
                 WHERE last_heartbeat < ?1 AND status = 'idle'",
                [cutoff.to_rfc3339()],
            )
            .map_err(s_err)?;
        Ok(changed)
    }

    pub async fn update_agent_metrics(&self, agent_id: &str, metrics: &AgentMetrics) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE agents SET metrics = ?1 WHERE id = ?2",
                rusqlite::params![serde_json::to_string(metrics)?, agent_id],
            )
            .map_err(s_err)?;
        if changed == 0 {
            return Err(CoreError::Store(format!("No agent {agent_id}")));
        }
        Ok(())
    }

    /// Record an active project binding for pool bookkeeping. Idempotent: an
    /// existing active row for the pair is left untouched.
    pub async fn bind_project_agent(
        &self,
        project_id: i64,
        agent_id: &str,
        role: &str,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM project_agents
                 WHERE project_id = ?1 AND agent_id = ?2 AND is_active = 1)",
                rusqlite::params![project_id, agent_id],
                |row| row.get(0),
            )
            .map_err(s_err)?;
        if exists {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO project_agents (project_id, agent_id, role, assigned_at, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![project_id, agent_id, role, now_str()],
        )
        .map_err(s_err)?;
        Ok(())
    }

    /// Close a binding (sets `unassigned_at`, clears `is_active`).
    pub async fn unbind_project_agent(&self, project_id: i64, agent_id: &str) -> CoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE project_agents SET is_active = 0, unassigned_at = ?1
             WHERE project_id = ?2 AND agent_id = ?3 AND is_active = 1",
            rusqlite::params![now_str(), project_id, agent_id],
        )
        .map_err(s_err)?;
        Ok(())
    }

    /// All active `(project_id, agent_id)` bindings, for periodic context
    /// maintenance across projects.
    pub async fn active_bindings(&self) -> CoreResult<Vec<(i64, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT project_id, agent_id FROM project_agents WHERE is_active = 1",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))
            .map_err(s_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(s_err)
    }

    pub async fn project_agents(&self, project_id: i64) -> CoreResult<Vec<ProjectAgent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT project_id, agent_id, role, assigned_at, unassigned_at, is_active
                 FROM project_agents WHERE project_id = ?1 ORDER BY assigned_at",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map([project_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, i64>(5)?,
                ))
            })
            .map_err(s_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (project_id, agent_id, role, assigned_at, unassigned_at, is_active) =
                row.map_err(s_err)?;
            out.push(ProjectAgent {
                project_id,
                agent_id,
                role,
                assigned_at: parse_ts(&assigned_at)?,
                unassigned_at: unassigned_at.as_deref().map(parse_ts).transpose()?,
                is_active: is_active != 0,
            });
        }
        Ok(out)
    }
}
