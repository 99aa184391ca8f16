//! Tiered context memory for CodeFRAME agents — the Virtual Project.
//!
//! Three pieces: a pure [`ImportanceScorer`] mapping item attributes to a
//! score and tier, a cached [`TokenCounter`], and the [`ContextManager`]
//! that persists items through the store, tracks access, recomputes tiers,
//! and flash-saves under token pressure.

mod manager;
mod scorer;
mod tokens;

pub use manager::{ContextManager, ContextStats, TierRecount};
pub use scorer::{ImportanceScorer, TierThresholds};
pub use tokens::TokenCounter;
