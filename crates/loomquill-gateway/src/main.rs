//! loomquill-gateway — HTTP surface over the generation pipeline, librarian
//! scheduler, and fragment store.

use clap::{Parser, Subcommand};
use loomquill_context::InstructionRegistry;
use loomquill_core::config::LoomquillConfig;
use loomquill_llm::AnthropicProvider;
use loomquill_llm::provider::LlmProvider;
use loomquill_pipeline::{ActiveAgentRegistry, GenerationPipeline, LibrarianScheduler};
use loomquill_store::{BlockConfigStore, FragmentStore, GenerationLogStore, LibrarianFindingStore, StoryStore};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loomquill-gateway", about = "HTTP surface for a Loomquill story server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server (default if no subcommand is given).
    Serve {
        /// Path to a `loomquill.toml` config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the gateway version and exit.
    Version,
}

fn default_instructions() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "writing".to_string(),
        "You are the writer agent. Continue the story in the established voice and tense. Use the provided tools to look up fragments; do not invent continuity that contradicts them.".to_string(),
    );
    map.insert(
        "analyze".to_string(),
        "You are the librarian agent. Read the newest prose fragment and report its impact on the corpus as a JSON object: {summaryUpdate, mentions, contradictions, knowledgeSuggestions, timelineEvents}. Respond with JSON only.".to_string(),
    );
    map.insert(
        "suggest-directions".to_string(),
        "You propose continuation directions for a story given its summary. Respond with a bare JSON array of {pacing, title, description, instruction} objects.".to_string(),
    );
    map
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "loomquill=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Version) => {
            println!("loomquill-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    let config = LoomquillConfig::load(config_path.as_deref());

    if config.llm.api_key.is_empty() {
        tracing::warn!("no LLM api key configured; set ANTHROPIC_API_KEY or llm.api_key in the config file");
    }

    let fragment_store = Arc::new(FragmentStore::new(&config.data_dir));
    let story_store = Arc::new(StoryStore::new(&config.data_dir));
    let block_config_store = Arc::new(BlockConfigStore::new(&config.data_dir));
    let log_store = Arc::new(GenerationLogStore::new(&config.data_dir));
    let finding_store = Arc::new(LibrarianFindingStore::new(&config.data_dir));

    let instructions = Arc::new(InstructionRegistry::new(config.data_dir.join("instruction-sets"), default_instructions()));
    instructions.reload().await;

    let provider: Arc<dyn LlmProvider> = {
        let base = AnthropicProvider::new(config.llm.api_key.clone());
        Arc::new(if config.llm.base_url != "https://api.anthropic.com" { base.with_base_url(config.llm.base_url.clone()) } else { base })
    };

    let active_agents = ActiveAgentRegistry::new(Duration::from_secs(config.librarian.active_agent_ttl_secs));
    let librarian = LibrarianScheduler::new(
        fragment_store.clone(),
        story_store.clone(),
        finding_store.clone(),
        instructions.clone(),
        provider.clone(),
        config.llm.default_model.clone(),
        active_agents.clone(),
        Duration::from_millis(config.librarian.debounce_ms),
    );
    let pipeline = GenerationPipeline::new(
        fragment_store.clone(),
        story_store.clone(),
        block_config_store.clone(),
        log_store.clone(),
        instructions.clone(),
        provider.clone(),
        config.llm.default_model.clone(),
        active_agents.clone(),
        librarian.clone(),
    );

    let state = loomquill_gateway::AppState {
        fragment_store,
        story_store,
        block_config_store,
        log_store,
        instructions,
        active_agents,
        librarian,
        pipeline,
        provider,
        model: config.llm.default_model.clone(),
        started_at: chrono::Utc::now(),
    };

    let app = loomquill_gateway::build_router(state);
    let bind_addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;

    info!("loomquill-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on: {}", bind_addr);
    info!("  data dir: {:?}", config.data_dir);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
