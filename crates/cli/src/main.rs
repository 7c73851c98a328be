use anyhow::Result;
use carefinder_core::config;
use carefinder_core::config::AppConfig;
use carefinder_core::models::SearchResponse;
use carefinder_core::pipeline::{self, SearchPipeline};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "carefinder", about = "Conversational community-resource search")]
struct Cli {
    /// Path to a config file (defaults to config/default).
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question, optionally continuing a conversation.
    Ask {
        query: String,
        /// Conversation id to continue; omit for a new session.
        #[arg(long)]
        conversation: Option<String>,
        /// Allow fetching general-knowledge context when retrieval falls short.
        #[arg(long)]
        allow_external: bool,
        /// Print the full response envelope as JSON.
        #[arg(long)]
        json: bool,
        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,
    },
    /// Print a conversation's persisted turns.
    History { conversation: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            query,
            conversation,
            allow_external,
            json,
            stream,
        } => run_ask(cfg, &query, conversation, allow_external, json, stream).await,
        Commands::History { conversation } => run_history(cfg, &conversation).await,
    }
}

async fn run_ask(
    cfg: AppConfig,
    query: &str,
    conversation: Option<String>,
    allow_external: bool,
    json: bool,
    stream: bool,
) -> Result<()> {
    let pool = storage::connect(&cfg.database.path).await?;
    storage::migrate(&pool).await?;

    let registry = pipeline::build_registry(&cfg);
    let chat = registry.chat(Some(&cfg.chat.provider))?;
    let direct = Arc::new(pipeline::build_vector_retriever(&cfg, &registry)?);
    let location = Arc::new(pipeline::build_location_retriever(&pool, &cfg, &registry).await?);
    let search = SearchPipeline::new(chat, direct, location, pool);

    let (sink, printer) = if stream {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let handle = tokio::spawn(async move {
            while let Some(token) = rx.recv().await {
                print!("{}", token);
                let _ = std::io::stdout().flush();
            }
        });
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    let response = search
        .answer(query, conversation.as_deref(), allow_external, sink)
        .await?;

    if let Some(handle) = printer {
        let _ = handle.await;
        println!();
    }

    print_response(&response, json, stream)?;
    Ok(())
}

fn print_response(response: &SearchResponse, json: bool, streamed: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    if !streamed {
        println!("{}", response.response);
    }
    for location in &response.locations {
        let name = location["name"].as_str().unwrap_or("?");
        let address = location["address"].as_str().unwrap_or("?");
        println!("  - {} ({})", name, address);
    }
    Ok(())
}

async fn run_history(cfg: AppConfig, conversation: &str) -> Result<()> {
    let pool = storage::connect(&cfg.database.path).await?;
    storage::migrate(&pool).await?;
    let turns = carefinder_core::history::reconstruct(&pool, conversation).await?;
    for turn in turns {
        println!("{}: {}", turn.role.as_chat_role(), turn.content);
    }
    Ok(())
}
