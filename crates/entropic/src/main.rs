//! Ingest documents and ask questions over them with entropy-ranked context.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # One question over one document
//! entropic --ingest report.txt --query "What changed in Q3?"
//!
//! # Three drafts sampled by relevance, merged by consensus, streamed
//! entropic --ingest a.txt --ingest b.txt --candidates 3 \
//!   --sampling relevance --synthesis consensus --stream
//!
//! # Interactive session with a JSON config file
//! entropic --config entropic.json --ingest notes.md
//! ```
//!
//! In interactive mode each line is a question. `/ingest <path>` adds a
//! document, `/reset` clears the session and `/quit` exits.

use clap::Parser;
use entropic::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Ask questions over documents far larger than the model's context window.
#[derive(Parser)]
#[command(name = "entropic")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Document to ingest before answering (repeatable)
    #[arg(long = "ingest")]
    documents: Vec<PathBuf>,

    /// Question to answer. Without this, starts an interactive session.
    #[arg(long)]
    query: Option<String>,

    /// JSON engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Model ──────────────────────────────────────────────────
    /// Completion model
    #[arg(long, default_value = entropic::api::DEFAULT_MODEL)]
    model: String,

    /// Context window of the model, in tokens
    #[arg(long)]
    max_context: Option<usize>,

    /// Maximum tokens per completion
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    // ── Draft cycle ────────────────────────────────────────────
    /// Candidate drafts per answer
    #[arg(long)]
    candidates: Option<usize>,

    /// Context sampling strategy: random, entropy, relevance, diversity
    #[arg(long)]
    sampling: Option<SamplingStrategy>,

    /// Draft synthesis strategy: majority, weighted, hierarchical, consensus
    #[arg(long)]
    synthesis: Option<SynthesisStrategy>,

    /// Stream the answer as it is generated
    #[arg(long)]
    stream: bool,

    // ── Embeddings ─────────────────────────────────────────────
    /// OpenAI-compatible embeddings endpoint. Without this, a local
    /// hashing embedder is used.
    #[arg(long)]
    embedding_url: Option<String>,

    /// Model name sent to the embeddings endpoint
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    // ── Output ─────────────────────────────────────────────────
    /// Log pipeline decisions to stderr (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(level)
        .init();
}

fn engine_config(cli: &Cli) -> Result<EngineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(candidates) = cli.candidates {
        config = config.with_candidates(candidates);
    }
    if let Some(sampling) = cli.sampling {
        config = config.with_sampling(sampling);
    }
    if let Some(synthesis) = cli.synthesis {
        config = config.with_synthesis(synthesis);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn build_session(cli: &Cli) -> Result<Session, String> {
    let config = engine_config(cli)?;

    let mut client_config = ClientConfig::default()
        .with_model(&cli.model)
        .with_max_tokens(cli.max_tokens)
        .with_temperature(cli.temperature);
    if let Some(max_context) = cli.max_context {
        client_config = client_config.with_max_context(max_context);
    }
    let client = OpenRouterClient::from_env(client_config).map_err(|e| e.to_string())?;

    let embedder: Arc<dyn Embedder> = match &cli.embedding_url {
        Some(url) => Arc::new(
            HttpEmbedder::new(
                url,
                &cli.embedding_model,
                std::env::var("EMBEDDING_API_KEY").ok(),
            )
            .map_err(|e| e.to_string())?,
        ),
        None => Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimensions)),
    };

    let handler = CompositeEventHandler::new().with_if(cli.verbose > 0, LoggingHandler);
    let session = Session::new(Arc::new(client), embedder, config)
        .map_err(|e| e.to_string())?
        .with_event_handler(handler);
    Ok(session)
}

async fn ingest_file(session: &mut Session, path: &Path) -> Result<(), String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let report = session
        .ingest(&text)
        .await
        .map_err(|e| format!("failed to ingest {}: {e}", path.display()))?;
    eprintln!(
        "  Ingested {}: {} segment(s), {} retained, {} stored",
        path.display(),
        report.segments,
        report.retained,
        report.compressed
    );
    Ok(())
}

async fn answer(session: &mut Session, query: &str, stream: bool) -> Result<(), String> {
    if stream {
        let mut stdout = std::io::stdout();
        session
            .chat_stream(query, |delta| {
                print!("{delta}");
                let _ = stdout.flush();
            })
            .await
            .map_err(|e| e.to_string())?;
        println!();
    } else {
        let text = session.chat(query).await.map_err(|e| e.to_string())?;
        println!("{text}");
    }
    Ok(())
}

async fn interactive(session: &mut Session, stream: bool) -> Result<(), String> {
    eprintln!("Session {}. Ask a question, or /ingest <path>, /reset, /quit.", session.id());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? else {
            return Ok(());
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/reset" => {
                session.reset();
                eprintln!("  Session cleared.");
            }
            _ => {
                let result = match line.strip_prefix("/ingest ") {
                    Some(path) => ingest_file(session, Path::new(path.trim())).await,
                    None => answer(session, line, stream).await,
                };
                // A failed turn leaves the session usable.
                if let Err(e) = result {
                    eprintln!("Error: {e}");
                }
            }
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut session = build_session(&cli)?;
    for path in &cli.documents {
        ingest_file(&mut session, path).await?;
    }
    match &cli.query {
        Some(query) => answer(&mut session, query, cli.stream).await,
        None => interactive(&mut session, cli.stream).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
