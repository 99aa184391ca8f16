use crate::store::{now_str, parse_ts, s_err, Store};
use codeframe_core::{ContextCheckpoint, ContextItem, CoreError, CoreResult, ItemType, Tier};

const ITEM_COLS: &str = "id, agent_id, project_id, item_type, content, importance_score, tier, \
                         access_count, created_at, last_accessed, archived";

type ItemRow = (
    i64,
    String,
    i64,
    String,
    String,
    f64,
    String,
    i64,
    String,
    String,
    i64,
);

fn row_closure(r: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
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
    ))
}

fn to_item(r: ItemRow) -> CoreResult<ContextItem> {
    Ok(ContextItem {
        id: r.0,
        agent_id: r.1,
        project_id: r.2,
        item_type: r.3.parse::<ItemType>()?,
        content: r.4,
        importance_score: r.5,
        tier: r.6.parse::<Tier>()?,
        access_count: r.7,
        created_at: parse_ts(&r.8)?,
        last_accessed: parse_ts(&r.9)?,
        archived: r.10 != 0,
    })
}

impl Store {
    /// Persist a context item with its precomputed score and tier.
    pub async fn insert_context_item(
        &self,
        agent_id: &str,
        project_id: i64,
        item_type: ItemType,
        content: &str,
        importance_score: f64,
        tier: Tier,
    ) -> CoreResult<i64> {
        let conn = self.conn.lock().await;
        let now = now_str();
        conn.execute(
            "INSERT INTO context_items
                 (agent_id, project_id, item_type, content, importance_score, tier,
                  access_count, created_at, last_accessed, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7, 0)",
            rusqlite::params![
                agent_id,
                project_id,
                item_type.as_str(),
                content,
                importance_score,
                tier.as_str(),
                now
            ],
        )
        .map_err(s_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch one item. With `touch`, the read bumps `access_count` and
    /// `last_accessed` in the same statement batch.
    pub async fn get_context_item(&self, id: i64, touch: bool) -> CoreResult<Option<ContextItem>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let raw = tx
            .query_row(
                &format!("SELECT {ITEM_COLS} FROM context_items WHERE id = ?1"),
                [id],
                row_closure,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(s_err(other)),
            })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut item = to_item(raw)?;
        if touch {
            tx.execute(
                "UPDATE context_items
                 SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                rusqlite::params![now_str(), id],
            )
            .map_err(s_err)?;
            item.access_count += 1;
        }
        tx.commit().map_err(s_err)?;
        Ok(Some(item))
    }

    /// List non-archived items for one `(project_id, agent_id)` scope,
    /// optionally filtered by tier, highest importance first. With `touch`,
    /// every returned item's access metadata is updated in one transaction.
    pub async fn list_context_items(
        &self,
        agent_id: &str,
        project_id: i64,
        tier: Option<Tier>,
        limit: Option<usize>,
        offset: usize,
        touch: bool,
    ) -> CoreResult<Vec<ContextItem>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let limit = limit.map_or(-1, |l| l as i64);
        let raws: Vec<ItemRow> = match tier {
            Some(tier) => {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {ITEM_COLS} FROM context_items
                         WHERE project_id = ?1 AND agent_id = ?2 AND tier = ?3 AND archived = 0
                         ORDER BY importance_score DESC, id
                         LIMIT ?4 OFFSET ?5"
                    ))
                    .map_err(s_err)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![project_id, agent_id, tier.as_str(), limit, offset as i64],
                        row_closure,
                    )
                    .map_err(s_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
            }
            None => {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {ITEM_COLS} FROM context_items
                         WHERE project_id = ?1 AND agent_id = ?2 AND archived = 0
                         ORDER BY importance_score DESC, id
                         LIMIT ?3 OFFSET ?4"
                    ))
                    .map_err(s_err)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![project_id, agent_id, limit, offset as i64],
                        row_closure,
                    )
                    .map_err(s_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(s_err)?
            }
        };

        let mut items = raws.into_iter().map(to_item).collect::<CoreResult<Vec<_>>>()?;

        if touch && !items.is_empty() {
            let now = now_str();
            for item in &mut items {
                tx.execute(
                    "UPDATE context_items
                     SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                    rusqlite::params![now, item.id],
                )
                .map_err(s_err)?;
                item.access_count += 1;
            }
        }
        tx.commit().map_err(s_err)?;
        Ok(items)
    }

    pub async fn delete_context_item(&self, id: i64) -> CoreResult<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute("DELETE FROM context_items WHERE id = ?1", [id])
            .map_err(s_err)?;
        Ok(changed > 0)
    }

    /// Rewrite scores and tiers after a recompute pass, one transaction.
    pub async fn update_item_scores(&self, updates: &[(i64, f64, Tier)]) -> CoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;
        for (id, score, tier) in updates {
            tx.execute(
                "UPDATE context_items SET importance_score = ?1, tier = ?2 WHERE id = ?3",
                rusqlite::params![score, tier.as_str(), id],
            )
            .map_err(s_err)?;
        }
        tx.commit().map_err(s_err)
    }

    /// Per-tier item counts for a scope (non-archived only).
    pub async fn tier_counts(
        &self,
        agent_id: &str,
        project_id: i64,
    ) -> CoreResult<(usize, usize, usize)> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT tier, COUNT(*) FROM context_items
                 WHERE project_id = ?1 AND agent_id = ?2 AND archived = 0
                 GROUP BY tier",
            )
            .map_err(s_err)?;
        let rows = stmt
            .query_map(rusqlite::params![project_id, agent_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })
            .map_err(s_err)?;

        let (mut hot, mut warm, mut cold) = (0usize, 0usize, 0usize);
        for row in rows {
            let (tier, count) = row.map_err(s_err)?;
            match tier.parse::<Tier>()? {
                Tier::Hot => hot = count as usize,
                Tier::Warm => warm = count as usize,
                Tier::Cold => cold = count as usize,
            }
        }
        Ok((hot, warm, cold))
    }

    /// Atomic flash-save commit: write the checkpoint, then archive every
    /// COLD item in the scope. One transaction; the checkpoint row exists
    /// before any item is archived, and a failure rolls back both.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_flash_save(
        &self,
        agent_id: &str,
        project_id: i64,
        checkpoint_data: &str,
        items_count: i64,
        hot_items_retained: i64,
        token_count_before: i64,
        token_count_after: i64,
    ) -> CoreResult<ContextCheckpoint> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(s_err)?;

        let created_at = now_str();
        tx.execute(
            "INSERT INTO context_checkpoints
                 (agent_id, project_id, checkpoint_data, items_count, items_archived,
                  hot_items_retained, token_count_before, token_count_after, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                agent_id,
                project_id,
                checkpoint_data,
                items_count,
                hot_items_retained,
                token_count_before,
                token_count_after,
                created_at
            ],
        )
        .map_err(s_err)?;
        let checkpoint_id = tx.last_insert_rowid();

        let archived = tx
            .execute(
                "UPDATE context_items SET archived = 1
                 WHERE project_id = ?1 AND agent_id = ?2 AND tier = 'COLD' AND archived = 0",
                rusqlite::params![project_id, agent_id],
            )
            .map_err(s_err)?;

        tx.execute(
            "UPDATE context_checkpoints SET items_archived = ?1 WHERE id = ?2",
            rusqlite::params![archived as i64, checkpoint_id],
        )
        .map_err(s_err)?;
        tx.commit().map_err(s_err)?;

        Ok(ContextCheckpoint {
            id: checkpoint_id,
            agent_id: agent_id.to_string(),
            project_id,
            checkpoint_data: checkpoint_data.to_string(),
            items_count,
            items_archived: archived as i64,
            hot_items_retained,
            token_count_before,
            token_count_after,
            created_at: parse_ts(&created_at)?,
        })
    }

    pub async fn get_checkpoint(&self, id: i64) -> CoreResult<Option<ContextCheckpoint>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, agent_id, project_id, checkpoint_data, items_count, items_archived,
                    hot_items_retained, token_count_before, token_count_after, created_at
             FROM context_checkpoints WHERE id = ?1",
            [id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, i64>(8)?,
                    r.get::<_, String>(9)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(s_err(other)),
        })?
        .map(|r| {
            Ok(ContextCheckpoint {
                id: r.0,
                agent_id: r.1,
                project_id: r.2,
                checkpoint_data: r.3,
                items_count: r.4,
                items_archived: r.5,
                hot_items_retained: r.6,
                token_count_before: r.7,
                token_count_after: r.8,
                created_at: parse_ts(&r.9)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeframe_core::ProjectType;

    async fn fixture() -> (Store, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let pid = store
            .create_project("ctx-test", "Context test project", ProjectType::Python, "/tmp/ws")
            .await
            .unwrap()
            .id;
        (store, pid)
    }

    #[tokio::test]
    async fn test_insert_and_get_tracks_access() {
        let (store, pid) = fixture().await;
        let id = store
            .insert_context_item("backend-1", pid, ItemType::Task, "implement auth", 0.8, Tier::Hot)
            .await
            .unwrap();

        let item = store.get_context_item(id, true).await.unwrap().unwrap();
        assert_eq!(item.access_count, 1);
        assert_eq!(item.content, "implement auth");

        // Untouched read leaves the counter alone.
        let item = store.get_context_item(id, false).await.unwrap().unwrap();
        assert_eq!(item.access_count, 1);

        let item = store.get_context_item(id, true).await.unwrap().unwrap();
        assert_eq!(item.access_count, 2);
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let (store, pid) = fixture().await;
        let other = store
            .create_project("ctx-other", "Second scope project", ProjectType::Python, "/tmp/o")
            .await
            .unwrap()
            .id;

        store
            .insert_context_item("backend-1", pid, ItemType::Code, "fn a() {}", 0.9, Tier::Hot)
            .await
            .unwrap();
        store
            .insert_context_item("backend-1", other, ItemType::Code, "fn b() {}", 0.9, Tier::Hot)
            .await
            .unwrap();
        store
            .insert_context_item("frontend-1", pid, ItemType::Code, "fn c() {}", 0.9, Tier::Hot)
            .await
            .unwrap();

        let items = store
            .list_context_items("backend-1", pid, None, None, 0, false)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "fn a() {}");
    }

    #[tokio::test]
    async fn test_tier_filter_and_ordering() {
        let (store, pid) = fixture().await;
        store
            .insert_context_item("a", pid, ItemType::Task, "hot low", 0.81, Tier::Hot)
            .await
            .unwrap();
        store
            .insert_context_item("a", pid, ItemType::Task, "hot high", 0.95, Tier::Hot)
            .await
            .unwrap();
        store
            .insert_context_item("a", pid, ItemType::Code, "warm", 0.5, Tier::Warm)
            .await
            .unwrap();

        let hot = store
            .list_context_items("a", pid, Some(Tier::Hot), None, 0, false)
            .await
            .unwrap();
        assert_eq!(hot.len(), 2);
        assert_eq!(hot[0].content, "hot high");

        let all = store
            .list_context_items("a", pid, None, None, 0, false)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_flash_save_archives_cold_atomically() {
        let (store, pid) = fixture().await;
        store
            .insert_context_item("a", pid, ItemType::Task, "keep hot", 0.9, Tier::Hot)
            .await
            .unwrap();
        store
            .insert_context_item("a", pid, ItemType::PrdSection, "cold 1", 0.1, Tier::Cold)
            .await
            .unwrap();
        store
            .insert_context_item("a", pid, ItemType::PrdSection, "cold 2", 0.2, Tier::Cold)
            .await
            .unwrap();

        let checkpoint = store
            .commit_flash_save("a", pid, "{\"items\":[]}", 3, 1, 1000, 600)
            .await
            .unwrap();
        assert_eq!(checkpoint.items_archived, 2);
        assert_eq!(checkpoint.hot_items_retained, 1);

        let (hot, warm, cold) = store.tier_counts("a", pid).await.unwrap();
        assert_eq!((hot, warm, cold), (1, 0, 0));

        let reloaded = store.get_checkpoint(checkpoint.id).await.unwrap().unwrap();
        assert_eq!(reloaded.token_count_before, 1000);
        assert_eq!(reloaded.token_count_after, 600);
    }

    #[tokio::test]
    async fn test_update_scores_and_delete() {
        let (store, pid) = fixture().await;
        let id = store
            .insert_context_item("a", pid, ItemType::Code, "demote me", 0.9, Tier::Hot)
            .await
            .unwrap();

        store
            .update_item_scores(&[(id, 0.3, Tier::Cold)])
            .await
            .unwrap();
        let item = store.get_context_item(id, false).await.unwrap().unwrap();
        assert_eq!(item.tier, Tier::Cold);
        assert!((item.importance_score - 0.3).abs() < f64::EPSILON);

        assert!(store.delete_context_item(id).await.unwrap());
        assert!(!store.delete_context_item(id).await.unwrap());
        assert!(store.get_context_item(id, false).await.unwrap().is_none());
    }
}
