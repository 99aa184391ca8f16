//! Durable state for the CodeFRAME orchestrator.
//!
//! A single rusqlite database holds projects, issues, tasks, agents, context
//! items, checkpoints, blockers, lint results, and discovery answers. The
//! [`Store`] is the sole writer: a store-wide async lock serializes the write
//! path, multi-statement operations run inside rusqlite transactions, and
//! dependency graphs are DAG-checked before commit.

mod agents;
mod blockers;
mod context;
mod discovery;
mod issues;
mod lint;
mod migrations;
mod projects;
mod store;
mod tasks;

pub use issues::NewIssue;
pub use lint::LintTrendPoint;
pub use projects::ProjectProgress;
pub use store::Store;
pub use tasks::NewTask;
