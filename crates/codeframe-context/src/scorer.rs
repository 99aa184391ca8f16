use chrono::{DateTime, Utc};
use codeframe_core::{ItemType, Tier};

/// Tier cutoffs, configuration-exposed (defaults 0.8 / 0.4).
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub hot: f64,
    pub warm: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self { hot: 0.8, warm: 0.4 }
    }
}

/// Pure importance scoring:
/// `score = 0.4·type_weight + 0.4·age_decay + 0.2·access_boost`, clamped to
/// [0,1], with `age_decay = exp(-0.5·age_days)` and
/// `access_boost = min(1, ln(1 + access_count) / 10)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportanceScorer {
    pub thresholds: TierThresholds,
}

impl ImportanceScorer {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn type_weight(item_type: ItemType) -> f64 {
        match item_type {
            ItemType::Task => 1.0,
            ItemType::Code => 0.8,
            ItemType::Error => 0.7,
            ItemType::TestResult => 0.6,
            ItemType::PrdSection => 0.5,
        }
    }

    pub fn score(
        &self,
        item_type: ItemType,
        created_at: DateTime<Utc>,
        access_count: i64,
        now: DateTime<Utc>,
    ) -> f64 {
        let age_days = (now - created_at).num_milliseconds().max(0) as f64 / 86_400_000.0;
        let age_decay = (-0.5 * age_days).exp();
        let access_boost = ((1.0 + access_count.max(0) as f64).ln() / 10.0).min(1.0);

        let score = 0.4 * Self::type_weight(item_type) + 0.4 * age_decay + 0.2 * access_boost;
        score.clamp(0.0, 1.0)
    }

    pub fn tier_for(&self, score: f64) -> Tier {
        if score >= self.thresholds.hot {
            Tier::Hot
        } else if score >= self.thresholds.warm {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }

    pub fn score_and_tier(
        &self,
        item_type: ItemType,
        created_at: DateTime<Utc>,
        access_count: i64,
        now: DateTime<Utc>,
    ) -> (f64, Tier) {
        let score = self.score(item_type, created_at, access_count, now);
        (score, self.tier_for(score))
    }
}
