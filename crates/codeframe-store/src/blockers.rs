use crate::store::{now_str, parse_ts, s_err, Store};
use codeframe_core::{Blocker, BlockerSeverity, CoreError, CoreResult};

const BLOCKER_COLS: &str =
    "id, task_id, severity, reason, question, resolution, created_at, resolved_at";

type BlockerRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
);

fn row_closure(r: &rusqlite::Row<'_>) -> rusqlite::Result<BlockerRow> {
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

fn to_blocker(r: BlockerRow) -> CoreResult<Blocker> {
    Ok(Blocker {
        id: r.0,
        task_id: r.1,
        severity: r.2.parse::<BlockerSeverity>()?,
        reason: r.3,
        question: r.4,
        resolution: r.5,
        created_at: parse_ts(&r.6)?,
        resolved_at: r.7.as_deref().map(parse_ts).transpose()?,
    })
}

impl Store {
    /// Create a blocker, idempotent on `(task_id, reason)` among open
    /// blockers: a duplicate returns the existing row with `created = false`.
    pub async fn create_blocker(
        &self,
        task_id: i64,
        severity: BlockerSeverity,
        reason: &str,
        question: &str,
    ) -> CoreResult<(Blocker, bool)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {BLOCKER_COLS} FROM blockers
                     WHERE task_id = ?1 AND reason = ?2 AND resolved_at IS NULL"
                ),
                rusqlite::params![task_id, reason],
                row_closure,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;

        if let Some(raw) = existing {
            return Ok((to_blocker(raw)?, false));
        }

        tx.execute(
            "INSERT INTO blockers (task_id, severity, reason, question, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![task_id, severity.as_str(), reason, question, now_str()],
        )
        .map_err(s_err)?;
        let id = tx.last_insert_rowid();

        let raw = tx
            .query_row(
                &format!("SELECT {BLOCKER_COLS} FROM blockers WHERE id = ?1"),
                [id],
                row_closure,
            )
            .map_err(s_err)?;
        tx.commit().map_err(s_err)?;
        Ok((to_blocker(raw)?, true))
    }

    /// Resolve a blocker. Resolving an already-resolved blocker is a no-op
    /// that returns the stored row.
    pub async fn resolve_blocker(&self, blocker_id: i64, resolution: &str) -> CoreResult<Blocker> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE blockers SET resolution = ?1, resolved_at = ?2
             WHERE id = ?3 AND resolved_at IS NULL",
            rusqlite::params![resolution, now_str(), blocker_id],
        )
        .map_err(s_err)?;

        let raw = conn
            .query_row(
                &format!("SELECT {BLOCKER_COLS} FROM blockers WHERE id = ?1"),
                [blocker_id],
                row_closure,
            )
            .map_err(|_| CoreError::Store(format!("No blocker {blocker_id}")))?;
        to_blocker(raw)
    }

    pub async fn get_blocker(&self, id: i64) -> CoreResult<Option<Blocker>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {BLOCKER_COLS} FROM blockers WHERE id = ?1"),
                [id],
                row_closure,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;
        raw.map(to_blocker).transpose()
    }

    /// All blockers for a project, joined through its tasks, open first.
    pub async fn list_blockers(&self, project_id: i64) -> CoreResult<Vec<Blocker>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT b.id, b.task_id, b.severity, b.reason, b.question, b.resolution,
                        b.created_at, b.resolved_at
                 FROM blockers b JOIN tasks t ON t.id = b.task_id
                 WHERE t.project_id = ?1
                 ORDER BY b.resolved_at IS NOT NULL, b.created_at",
            )
            .map_err(s_err)?;
        let rows = stmt.query_map([project_id], row_closure).map_err(s_err)?;
        let raws = rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?;
        raws.into_iter().map(to_blocker).collect()
    }

    pub async fn blockers_for_task(&self, task_id: i64) -> CoreResult<Vec<Blocker>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BLOCKER_COLS} FROM blockers WHERE task_id = ?1 ORDER BY created_at"
            ))
            .map_err(s_err)?;
        let rows = stmt.query_map([task_id], row_closure).map_err(s_err)?;
        let raws = rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?;
        raws.into_iter().map(to_blocker).collect()
    }

    pub async fn open_sync_blocker_count(&self, task_id: i64) -> CoreResult<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM blockers
                 WHERE task_id = ?1 AND severity = 'sync' AND resolved_at IS NULL",
                [task_id],
                |r| r.get(0),
            )
            .map_err(s_err)?;
        Ok(n as usize)
    }
}
