//! The per-project lead agent: discovery dialog, LLM planning into an
//! issue/task DAG, approval handling, and the dispatch loop that feeds
//! ready tasks to the agent pool.

mod discovery;
mod lead;
mod planning;

pub use discovery::{next_unanswered, question_by_id, DiscoveryQuestion, DISCOVERY_SCRIPT};
pub use lead::{AnswerOutcome, DiscoveryProgress, LeadAgent};
pub use planning::{
    materialize, parse_plan, planning_prompt, PlannedIssue, PlannedTask, PlannedTree,
};
