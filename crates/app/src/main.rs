use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tfdocs_core::tools::{IngestInput, SearchInput};
use tfdocs_core::{
    create_language_model, DocType, EmbeddingService, GraphVectorReader, GraphVectorWriter,
    IngestionLedger, Neo4jStore, Settings, TerraformDocTools, ToolResponse,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tfdocs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Neo4j HTTP endpoint
    #[arg(long, env = "NEO4J_URL")]
    neo4j_url: Option<String>,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DATABASE")]
    neo4j_db: Option<String>,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER")]
    neo4j_user: Option<String>,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    neo4j_password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Discover, chunk, embed and store documentation.
    Ingest {
        /// Document types: resource, data_source, best_practice, readme, terraform.
        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<String>,
        /// Only sources of these services (e.g. S3,EC2).
        #[arg(long, value_delimiter = ',')]
        services: Option<Vec<String>>,
        /// Directories scanned for best practices and READMEs.
        #[arg(long = "scan-dir")]
        scan_dirs: Vec<PathBuf>,
        /// Ignore the ledger and re-ingest everything.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Semantic search over ingested chunks.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[arg(long, default_value = "0.7")]
        threshold: f32,
        /// Restrict to these document types.
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,
    },
    /// Create constraints and vector indexes.
    Schema,
    /// Chunk counts per document type.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "tfdocs boot"
    );

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(url) = cli.neo4j_url {
        settings.store.url = url;
    }
    if let Some(database) = cli.neo4j_db {
        settings.store.database = database;
    }
    if let Some(user) = cli.neo4j_user {
        settings.store.username = user;
    }
    if let Some(password) = cli.neo4j_password {
        settings.store.password = password;
    }

    let store = Arc::new(Neo4jStore::from_settings(&settings.store)?);
    let embeddings = Arc::new(EmbeddingService::from_settings(&settings.embedding)?);

    let output: Value = match cli.command {
        Command::Schema => {
            store
                .ensure_schema(embeddings.dimensions())
                .await
                .with_context(|| format!("creating schema at {}", store.endpoint()))?;
            json!({
                "dimensions": embeddings.dimensions(),
                "indexes": DocType::ALL.iter().map(DocType::index_name).collect::<Vec<_>>(),
            })
        }
        Command::Stats => {
            let mut counts = serde_json::Map::new();
            for doc_type in DocType::ALL {
                let count = store
                    .count(doc_type)
                    .await
                    .with_context(|| format!("counting {doc_type} chunks"))?;
                counts.insert(doc_type.to_string(), json!(count));
            }
            Value::Object(counts)
        }
        Command::Ingest {
            types,
            services,
            scan_dirs,
            force,
        } => {
            let tools = build_tools(&settings, store, embeddings).await?;
            let response = tools
                .ingest_terraform_docs(IngestInput {
                    filter_types: types,
                    filter_services: services,
                    scan_dirs: (!scan_dirs.is_empty()).then_some(scan_dirs),
                    force,
                })
                .await;
            envelope(response)?
        }
        Command::Search {
            query,
            top_k,
            threshold,
            types,
        } => {
            let tools = build_tools(&settings, store, embeddings).await?;
            let response = tools
                .terraform_doc_search(SearchInput {
                    query,
                    top_k,
                    similarity_threshold: threshold,
                    node_types: types,
                })
                .await;
            envelope(response)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn build_tools(
    settings: &Settings,
    store: Arc<Neo4jStore>,
    embeddings: Arc<EmbeddingService>,
) -> anyhow::Result<TerraformDocTools<Neo4jStore>> {
    let ledger = IngestionLedger::open(&settings.ingestion.ledger_path)
        .await
        .with_context(|| format!("opening ledger {}", settings.ingestion.ledger_path.display()))?;
    let model = create_language_model(&settings.llm)?;
    Ok(TerraformDocTools::new(
        settings,
        store,
        embeddings,
        model,
        Arc::new(ledger),
    )?)
}

fn envelope(response: ToolResponse) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(response)?)
}
