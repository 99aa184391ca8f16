//! The `codeframe` binary: loads configuration, wires the core together,
//! and serves the HTTP/WebSocket gateway.

use clap::{Parser, Subcommand};
use codeframe_agents::{
    load_definitions, model_for_provider, AgentPool, HttpLlmClient, LlmClient, LlmProvider,
    ReviewAgent, WorkerEnv,
};
use codeframe_context::{ContextManager, TokenCounter};
use codeframe_core::{CoreConfig, CoreError, CoreResult, EventBus, LogNotificationSink};
use codeframe_gateway::{build_router, AppState};
use codeframe_quality::{BlockerService, QualityPipeline, SubprocessRunner};
use codeframe_store::Store;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codeframe", about = "CodeFRAME — autonomous multi-agent development orchestrator")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "codeframe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List loaded agent definitions
    Agents,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_workspace_root")]
    workspace_root: PathBuf,
    #[serde(default = "default_db_path")]
    db_path: PathBuf,
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_api_key_env")]
    api_key_env: String,
    #[serde(default)]
    llm_base_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8350
}
fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspaces")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./.codeframe/state.db")
}
fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workspace_root: default_workspace_root(),
            db_path: default_db_path(),
            provider: default_provider(),
            api_key_env: default_api_key_env(),
            llm_base_url: None,
        }
    }
}

async fn load_file_config(path: &PathBuf) -> FileConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Bad config file, using defaults");
                FileConfig::default()
            }
        },
        Err(_) => FileConfig::default(),
    }
}

fn build_llm(file: &FileConfig) -> CoreResult<Arc<dyn LlmClient>> {
    let api_key = std::env::var(&file.api_key_env).unwrap_or_default();
    let (provider, base_url) = match file.provider.as_str() {
        "openai" => (
            LlmProvider::OpenAi,
            file.llm_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        ),
        _ => (
            LlmProvider::Claude,
            file.llm_base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        ),
    };
    Ok(Arc::new(HttpLlmClient::new(provider, base_url, api_key)))
}

#[tokio::main]
async fn main() -> CoreResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = load_file_config(&cli.config).await;
    let config = Arc::new(CoreConfig::from_env());

    match cli.command {
        Commands::Agents => {
            let dir = file.workspace_root.join(".codeframe/agents/definitions");
            let definitions = load_definitions(&dir).await?;
            for def in &definitions {
                println!(
                    "{:<10} provider={:<10} maturity={:<10} capabilities={}",
                    def.kind,
                    def.provider,
                    def.maturity.as_str(),
                    def.capabilities.join(",")
                );
            }
            Ok(())
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(file.host.clone());
            let port = port.unwrap_or(file.port);

            if let Some(parent) = file.db_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::create_dir_all(&file.workspace_root).await?;

            let store = Store::open(&file.db_path).await?;
            let bus = EventBus::default();
            let tokens = Arc::new(TokenCounter::new()?);
            let context = Arc::new(ContextManager::new(
                store.clone(),
                tokens,
                bus.clone(),
                config.clone(),
            ));
            let blockers = Arc::new(BlockerService::new(
                store.clone(),
                bus.clone(),
                Arc::new(LogNotificationSink),
            ));
            let llm = build_llm(&file)?;
            let review = Arc::new(ReviewAgent::new(config.clone()));
            let pipeline = Arc::new(QualityPipeline::new(
                store.clone(),
                bus.clone(),
                blockers.clone(),
                Arc::new(SubprocessRunner),
                config.clone(),
            ));

            let env = WorkerEnv {
                store: store.clone(),
                context: context.clone(),
                llm: llm.clone(),
                pipeline,
                blockers: blockers.clone(),
                review: review.clone(),
                bus: bus.clone(),
                config: config.clone(),
            };
            let pool = Arc::new(AgentPool::new(store.clone(), env));

            let definitions_dir = file.workspace_root.join(".codeframe/agents/definitions");
            let definitions = load_definitions(&definitions_dir).await?;
            let spawned = pool.spawn_from_definitions(&definitions).await?;
            info!(agents = spawned, "Agent pool ready");

            // Periodic heartbeat reconciliation.
            let heartbeat_pool = pool.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    if let Err(e) = heartbeat_pool.heartbeat().await {
                        warn!(error = %e, "Heartbeat reconciliation failed");
                    }
                }
            });

            // Periodic tier recompute for every active (project, agent) scope.
            let recompute_store = store.clone();
            let recompute_context = context.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
                loop {
                    tick.tick().await;
                    let bindings = match recompute_store.active_bindings().await {
                        Ok(bindings) => bindings,
                        Err(e) => {
                            warn!(error = %e, "Tier recompute skipped");
                            continue;
                        }
                    };
                    for (project_id, agent_id) in bindings {
                        if let Err(e) = recompute_context
                            .recompute_tiers(&agent_id, project_id)
                            .await
                        {
                            warn!(project_id, agent_id = %agent_id, error = %e, "Tier recompute failed");
                        }
                    }
                }
            });

            let planner_model = model_for_provider(&file.provider).to_string();
            let state = AppState::new(
                store.clone(),
                context,
                pool,
                blockers,
                review,
                bus,
                config,
                llm,
                file.workspace_root.clone(),
                planner_model,
            );
            let app = build_router(state);

            let addr = format!("{host}:{port}");
            info!(addr = %addr, "CodeFRAME listening");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(CoreError::Io)?;

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(CoreError::Io)?;

            // In-flight work cannot be resumed mid-LLM; mark it failed so a
            // restart re-queues it after user acknowledgement.
            let failed = store.fail_in_flight("shutdown").await?;
            if failed > 0 {
                warn!(failed, "Marked in-flight tasks failed on shutdown");
            }
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
