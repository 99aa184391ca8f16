//! Worker agents for CodeFRAME: the LLM provider boundary, declarative
//! agent definitions, the project-agnostic task executor, the deterministic
//! review agent, and the pool that routes tasks to capable workers.

mod definitions;
mod llm;
mod pool;
mod review;
mod worker;

pub use definitions::{builtin_definitions, load_definitions, parse_definition, AgentDefinition};
pub use llm::{ChatMessage, ChatRole, HttpLlmClient, LlmClient, LlmProvider, MockLlmClient};
pub use pool::{model_for_provider, AgentPool};
pub use review::ReviewAgent;
pub use worker::{apply_patch, parse_patch, PatchFile, WorkerAgent, WorkerEnv};
