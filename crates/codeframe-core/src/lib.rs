//! Core types shared across the CodeFRAME orchestrator.
//!
//! This crate provides the foundational pieces every other CodeFRAME crate
//! builds on: the error taxonomy, the persisted domain model, the lifecycle
//! event vocabulary with its in-process bus, the immutable configuration
//! snapshot, and the notification sink boundary.
//!
//! # Main types
//!
//! - [`CoreError`] / [`CoreResult`] — unified error enum keyed by recovery policy.
//! - [`Project`], [`Issue`], [`Task`], [`AgentRecord`] — the orchestration model.
//! - [`ContextItem`], [`Tier`] — tiered agent memory.
//! - [`Event`] / [`EventBus`] — lifecycle pub/sub.
//! - [`CoreConfig`] — process-wide tunables, read once at startup.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod notify;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use events::{Event, EventBus};
pub use model::{
    AgentKind, AgentMetrics, AgentRecord, AgentStatus, Blocker, BlockerSeverity, ContextCheckpoint,
    ContextItem, DiscoveryAnswer, Finding, FindingSeverity, FlashSaveResult, Issue, ItemType,
    Linter, LintResult, Maturity, Project, ProjectAgent, ProjectPhase, ProjectType, ProposedBy,
    ReviewReport, ReviewStatus, Task, TaskOutcome, TaskStatus, Tier,
};
pub use notify::{LogNotificationSink, NotificationSink};
