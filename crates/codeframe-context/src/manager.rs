use crate::scorer::{ImportanceScorer, TierThresholds};
use crate::tokens::TokenCounter;
use chrono::Utc;
use codeframe_core::{
    ContextItem, CoreConfig, CoreResult, Event, EventBus, FlashSaveResult, ItemType, Tier,
};
use codeframe_store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a tier recompute pass.
#[derive(Debug, Clone, Serialize)]
pub struct TierRecount {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub changes: usize,
}

/// Context statistics for one `(project_id, agent_id)` scope.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub total_items: usize,
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_count: usize,
    pub total_tokens: usize,
    pub hot_tokens: usize,
    pub warm_tokens: usize,
    pub cold_tokens: usize,
    pub token_usage_percentage: f64,
}

/// The Virtual Project: per-(project, agent) tiered memory.
///
/// Items are scored at insert time, re-scored on demand, and archived in
/// bulk by flash-save when token pressure crosses the configured threshold.
/// Every retrieval is scoped by `(project_id, agent_id)`; nothing ever
/// crosses scopes.
pub struct ContextManager {
    store: Store,
    scorer: ImportanceScorer,
    tokens: Arc<TokenCounter>,
    bus: EventBus,
    config: Arc<CoreConfig>,
}

impl ContextManager {
    pub fn new(
        store: Store,
        tokens: Arc<TokenCounter>,
        bus: EventBus,
        config: Arc<CoreConfig>,
    ) -> Self {
        let scorer = ImportanceScorer::new(TierThresholds {
            hot: config.tier_hot_threshold,
            warm: config.tier_warm_threshold,
        });
        Self {
            store,
            scorer,
            tokens,
            bus,
            config,
        }
    }

    /// Save one item; score and tier are computed at insert time.
    pub async fn save(
        &self,
        agent_id: &str,
        project_id: i64,
        item_type: ItemType,
        content: &str,
    ) -> CoreResult<i64> {
        let now = Utc::now();
        let (score, tier) = self.scorer.score_and_tier(item_type, now, 0, now);
        let id = self
            .store
            .insert_context_item(agent_id, project_id, item_type, content, score, tier)
            .await?;
        Ok(id)
    }

    /// Load items for a scope; `tier = None` returns all tiers. Each
    /// returned item's access metadata is bumped in the same transaction.
    pub async fn load(
        &self,
        agent_id: &str,
        project_id: i64,
        tier: Option<Tier>,
    ) -> CoreResult<Vec<ContextItem>> {
        self.store
            .list_context_items(agent_id, project_id, tier, None, 0, true)
            .await
    }

    /// Paginated listing for the HTTP surface, with the same access-tracking
    /// side effect as [`load`](Self::load).
    pub async fn load_page(
        &self,
        agent_id: &str,
        project_id: i64,
        tier: Option<Tier>,
        limit: Option<usize>,
        offset: usize,
    ) -> CoreResult<Vec<ContextItem>> {
        self.store
            .list_context_items(agent_id, project_id, tier, limit, offset, true)
            .await
    }

    /// Fetch one item by id, bumping its access metadata.
    pub async fn get(&self, item_id: i64) -> CoreResult<Option<ContextItem>> {
        self.store.get_context_item(item_id, true).await
    }

    pub async fn delete(&self, item_id: i64) -> CoreResult<bool> {
        self.store.delete_context_item(item_id).await
    }

    /// Re-score every live item in the scope and persist tier moves.
    /// Intended for periodic invocation or after bulk saves.
    pub async fn recompute_tiers(&self, agent_id: &str, project_id: i64) -> CoreResult<TierRecount> {
        let items = self
            .store
            .list_context_items(agent_id, project_id, None, None, 0, false)
            .await?;
        let now = Utc::now();

        let mut updates = Vec::new();
        let (mut hot, mut warm, mut cold) = (0usize, 0usize, 0usize);
        for item in &items {
            let (score, tier) =
                self.scorer
                    .score_and_tier(item.item_type, item.created_at, item.access_count, now);
            match tier {
                Tier::Hot => hot += 1,
                Tier::Warm => warm += 1,
                Tier::Cold => cold += 1,
            }
            if tier != item.tier || (score - item.importance_score).abs() > 1e-9 {
                updates.push((item.id, score, tier));
            }
        }
        let changes = updates.iter().filter(|(id, _, tier)| {
            items
                .iter()
                .find(|i| i.id == *id)
                .is_some_and(|i| i.tier != *tier)
        });
        let changes = changes.count();

        if !updates.is_empty() {
            self.store.update_item_scores(&updates).await?;
        }

        self.bus.emit(Event::ContextTierUpdated {
            project_id,
            agent_id: agent_id.to_string(),
            hot,
            warm,
            cold,
            changes,
        });
        Ok(TierRecount {
            hot,
            warm,
            cold,
            changes,
        })
    }

    /// Token and item counts per tier, with no access-tracking side effect.
    pub async fn stats(&self, agent_id: &str, project_id: i64) -> CoreResult<ContextStats> {
        let items = self
            .store
            .list_context_items(agent_id, project_id, None, None, 0, false)
            .await?;

        let mut stats = ContextStats {
            total_items: items.len(),
            hot_count: 0,
            warm_count: 0,
            cold_count: 0,
            total_tokens: 0,
            hot_tokens: 0,
            warm_tokens: 0,
            cold_tokens: 0,
            token_usage_percentage: 0.0,
        };
        for item in &items {
            let tokens = self.tokens.count(&item.content);
            stats.total_tokens += tokens;
            match item.tier {
                Tier::Hot => {
                    stats.hot_count += 1;
                    stats.hot_tokens += tokens;
                }
                Tier::Warm => {
                    stats.warm_count += 1;
                    stats.warm_tokens += tokens;
                }
                Tier::Cold => {
                    stats.cold_count += 1;
                    stats.cold_tokens += tokens;
                }
            }
        }
        stats.token_usage_percentage =
            stats.total_tokens as f64 / self.config.context_limit_tokens as f64 * 100.0;
        Ok(stats)
    }

    /// True when the scope's live tokens have reached the flash-save
    /// threshold (default 80% of the context limit), or when forced.
    pub async fn should_flash_save(
        &self,
        agent_id: &str,
        project_id: i64,
        force: bool,
    ) -> CoreResult<bool> {
        if force {
            return Ok(true);
        }
        let stats = self.stats(agent_id, project_id).await?;
        Ok(stats.total_tokens >= self.config.flash_save_trigger_tokens())
    }

    /// Checkpoint the full scope state and archive its COLD items, one store
    /// transaction. The reduction is reported, not enforced.
    pub async fn flash_save(&self, agent_id: &str, project_id: i64) -> CoreResult<FlashSaveResult> {
        let items = self
            .store
            .list_context_items(agent_id, project_id, None, None, 0, false)
            .await?;

        let token_count_before: usize = self.tokens.count_batch(items.iter().map(|i| i.content.as_str()));
        let cold_tokens: usize = self
            .tokens
            .count_batch(items.iter().filter(|i| i.tier == Tier::Cold).map(|i| i.content.as_str()));
        let token_count_after = token_count_before - cold_tokens;
        let hot_items_retained = items.iter().filter(|i| i.tier == Tier::Hot).count() as i64;

        let bundle = serde_json::json!({
            "saved_at": Utc::now().to_rfc3339(),
            "agent_id": agent_id,
            "project_id": project_id,
            "items": items,
        });

        let checkpoint = self
            .store
            .commit_flash_save(
                agent_id,
                project_id,
                &bundle.to_string(),
                items.len() as i64,
                hot_items_retained,
                token_count_before as i64,
                token_count_after as i64,
            )
            .await?;

        let reduction_percentage = if token_count_before == 0 {
            0.0
        } else {
            (token_count_before - token_count_after) as f64 / token_count_before as f64 * 100.0
        };

        if reduction_percentage < 30.0 && checkpoint.items_archived > 0 {
            warn!(
                agent_id,
                project_id, reduction_percentage, "Flash save reduced less than 30%"
            );
        }
        info!(
            agent_id,
            project_id,
            checkpoint_id = checkpoint.id,
            archived = checkpoint.items_archived,
            before = token_count_before,
            after = token_count_after,
            "Flash save completed"
        );

        self.bus.emit(Event::FlashSaveCompleted {
            project_id,
            agent_id: agent_id.to_string(),
            checkpoint_id: checkpoint.id,
            items_archived: checkpoint.items_archived,
            token_count_before: token_count_before as i64,
            token_count_after: token_count_after as i64,
        });

        Ok(FlashSaveResult {
            checkpoint_id: checkpoint.id,
            items_count: checkpoint.items_count,
            items_archived: checkpoint.items_archived,
            hot_items_retained: checkpoint.hot_items_retained,
            token_count_before: token_count_before as i64,
            token_count_after: token_count_after as i64,
            reduction_percentage,
        })
    }
}
