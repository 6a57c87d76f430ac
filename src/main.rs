//! Command-line interface for the chunkmill ingestion engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chunkmill::config::EngineConfig;
use chunkmill::embedding::HashingClient;
use chunkmill::enrich::HeuristicEnricher;
use chunkmill::extract::{Extractor, PlainTextExtractor};
use chunkmill::logging;
use chunkmill::pipeline::{
    BatchCoordinator, CancelFlag, PipelineError, PipelineOrchestrator, SessionStore,
};
use clap::{Parser, Subcommand};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "chunkmill", about = "Chunk, index, and search documents", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every text file under a directory.
    Ingest {
        /// Directory to scan for .txt files.
        dir: PathBuf,
    },
    /// Keyword search over committed chunks.
    Search {
        /// Query terms, scored as a bag of words.
        query: String,
        /// Maximum hits to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Semantic search over embedded chunks.
    Semantic {
        /// Query text to embed and match.
        query: String,
        /// Maximum hits to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Show progress for an ingestion session.
    Status {
        /// Session identifier printed by `ingest`.
        session: Uuid,
    },
    /// Tear down a document's derived state and requeue it.
    Reset {
        /// Document identifier.
        document: String,
    },
    /// Rebuild the keyword index from stored chunks.
    Rebuild,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    let sessions = SessionStore::new();
    let embedder = Arc::new(HashingClient::new(
        config.embedding_model.clone(),
        config.embedding_dimension,
    ));
    let orchestrator = Arc::new(
        PipelineOrchestrator::open(config, embedder, Arc::new(HeuristicEnricher), sessions)
            .await?,
    );

    match cli.command {
        Command::Ingest { dir } => ingest(&orchestrator, &dir).await?,
        Command::Search { query, top_k } => {
            let hits = orchestrator.search(&query, top_k).await?;
            print_hits(&orchestrator, hits.iter().map(|h| (h.chunk_id, h.score))).await?;
        }
        Command::Semantic { query, top_k } => {
            let hits = orchestrator.semantic_search(&query, top_k).await?;
            print_hits(
                &orchestrator,
                hits.iter().map(|h| (h.chunk_id, f64::from(h.score))),
            )
            .await?;
        }
        Command::Status { session } => {
            let progress = orchestrator.get_session_progress(session)?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Command::Reset { document } => {
            orchestrator.reset_document(&document).await?;
            println!("{document} reset to pending");
        }
        Command::Rebuild => {
            let report = orchestrator.rebuild_search_index().await?;
            println!(
                "rebuilt postings for {} chunks ({} postings, {} terms)",
                report.chunks, report.postings, report.terms
            );
        }
    }
    Ok(())
}

async fn ingest(
    orchestrator: &Arc<PipelineOrchestrator>,
    dir: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = orchestrator.sessions().create();
    let extractor = PlainTextExtractor;
    let mut submitted = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|ext| ext.to_str()) != Some("txt")
        {
            continue;
        }
        let document_id = entry.path().display().to_string();
        let document = extractor.extract(entry.path()).await?;
        orchestrator
            .submit(
                &document_id,
                &document.full_text,
                &document.page_offsets(),
                Some(session),
            )
            .await?;
        submitted += 1;
    }

    if submitted == 0 {
        println!("no .txt files found under {}", dir.display());
        return Ok(());
    }

    let stats = BatchCoordinator::new(Arc::clone(orchestrator))
        .run(Some(session), &CancelFlag::new())
        .await?;
    let metrics = orchestrator.metrics_snapshot();
    println!("session {session}");
    println!(
        "processed {} / failed {} / skipped {} in {:.1}s",
        stats.processed,
        stats.failed,
        stats.skipped,
        stats.elapsed.as_secs_f64()
    );
    println!(
        "chunks upserted: {}, embeddings generated: {}, skipped by dedup: {}",
        metrics.chunks_upserted, metrics.embeddings_generated, metrics.embeddings_skipped
    );
    Ok(())
}

async fn print_hits(
    orchestrator: &Arc<PipelineOrchestrator>,
    hits: impl Iterator<Item = (i64, f64)>,
) -> Result<(), PipelineError> {
    let mut any = false;
    for (chunk_id, score) in hits {
        any = true;
        match orchestrator.store().chunk_by_id(chunk_id).await? {
            Some(chunk) => {
                let preview: String = chunk.text.chars().take(96).collect();
                println!(
                    "{score:>8.4}  {}#{}  {}",
                    chunk.document_id,
                    chunk.chunk_index,
                    preview.replace('\n', " ")
                );
            }
            None => println!("{score:>8.4}  chunk {chunk_id} (missing)"),
        }
    }
    if !any {
        println!("no results");
    }
    Ok(())
}
