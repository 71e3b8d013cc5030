//! Knowledge Graph API - main entry point
//!
//! Runs the HTTP service, or answers a single question / explores the graph
//! from the command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_graph_api::server::{self, AppState, ServerOptions};
use knowledge_graph_api::service::DEFAULT_EXPLORE_LIMIT;
use knowledge_graph_api::{AskRequest, Config, GraphBackend, InMemoryGraph, KnowledgeService, Neo4jGraph};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "knowledge_graph_api")]
#[command(about = "Knowledge graph question answering service", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(long, env = "KG_CONFIG")]
    config: Option<PathBuf>,

    /// Serve from a JSON graph fixture instead of Neo4j
    #[arg(long, env = "KG_GRAPH_FIXTURE")]
    graph_fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question
        query: String,

        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,

        /// Maximum entities per search tier
        #[arg(long)]
        max_results: Option<usize>,

        /// Minimum fulltext score
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the full JSON response
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print entity and relationship type histograms
    Explore {
        /// Restrict entity types to nodes whose name/title contains this
        #[arg(long)]
        keyword: Option<String>,

        /// Maximum rows per histogram
        #[arg(short, long, default_value_t = DEFAULT_EXPLORE_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("knowledge_graph_api=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::new(),
    };

    let backend = open_backend(&config, cli.graph_fixture.as_deref()).await?;
    let service = KnowledgeService::from_config(&config, backend)?;

    match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            let socket: SocketAddr = addr
                .parse()
                .with_context(|| format!("Invalid listen address: {}", addr))?;
            if !service.verify_generation().await {
                warn!("Generation backend unavailable at startup; answers will use the fallback");
            }
            let options = ServerOptions {
                expose_conversations: config.server.expose_conversations,
                cors_origins: config.server.cors_origins.clone(),
            };
            server::serve(socket, Arc::new(AppState::new(service, options))).await?;
        }
        Commands::Ask {
            query,
            session,
            max_results,
            threshold,
            json,
        } => {
            let request = AskRequest {
                query,
                max_results,
                threshold,
                session_id: session,
            };
            let response = service.ask(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer);
                println!(
                    "\n[session {} | {} entities | {} relationships]",
                    response.query_details.session_id,
                    response.query_details.total_results,
                    response.query_details.relationships_found
                );
            }
        }
        Commands::Explore { keyword, limit } => {
            let explored = service.explore(keyword.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&explored)?);
        }
    }

    Ok(())
}

/// Neo4j from config, or an in-memory fixture graph when one is given.
async fn open_backend(
    config: &Config,
    fixture: Option<&std::path::Path>,
) -> anyhow::Result<Arc<dyn GraphBackend>> {
    if let Some(path) = fixture {
        let graph = InMemoryGraph::from_json_file(path)
            .with_context(|| format!("Failed to load graph fixture {}", path.display()))?;
        return Ok(Arc::new(graph));
    }

    let graph = Neo4jGraph::connect(&config.neo4j.uri, &config.neo4j.user, &config.neo4j.password)
        .await
        .context("Neo4j is required at startup")?;
    info!("Connected to Neo4j at {}", config.neo4j.uri);
    Ok(Arc::new(graph))
}
