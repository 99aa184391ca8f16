use crate::store::{now_str, parse_ts, s_err, Store};
use codeframe_core::model::validate_answer;
use codeframe_core::{CoreResult, DiscoveryAnswer};

impl Store {
    /// Persist (or overwrite) the answer to one discovery question.
    pub async fn save_discovery_answer(
        &self,
        project_id: i64,
        question_id: &str,
        category: &str,
        answer_text: &str,
    ) -> CoreResult<()> {
        validate_answer(answer_text)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO discovery_answers (project_id, question_id, category, answer_text, answered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id, question_id) DO UPDATE SET
                answer_text = excluded.answer_text,
                answered_at = excluded.answered_at",
            rusqlite::params![project_id, question_id, category, answer_text, now_str()],
        )
        .map_err(s_err)?;
        Ok(())
    }

    pub async fn discovery_answers(&self, project_id: i64) -> CoreResult<Vec<DiscoveryAnswer>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT project_id, question_id, category, answer_text, answered_at
                 FROM discovery_answers WHERE project_id = ?1 ORDER BY answered_at",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map([project_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })
            .map_err(s_err)?;

        let mut out = Vec::new();
        for row in rows {
            let r = row.map_err(s_err)?;
            out.push(DiscoveryAnswer {
                project_id: r.0,
                question_id: r.1,
                category: r.2,
                answer_text: r.3,
                answered_at: parse_ts(&r.4)?,
            });
        }
        Ok(out)
    }

    pub async fn discovery_answer_count(&self, project_id: i64) -> CoreResult<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM discovery_answers WHERE project_id = ?1",
                [project_id],
                |r| r.get(0),
            )
            .map_err(s_err)?;
        Ok(n as usize)
    }
}
