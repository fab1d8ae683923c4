mod discogs;
mod error;
mod matcher;
mod queue;
mod scoring;
mod service;
mod store;
mod throttle;

use std::io::BufRead;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::discogs::DiscogsClient;
use crate::queue::{JobQueue, MATCH_CONCURRENCY};
use crate::service::{Enricher, Submission};

#[derive(Parser)]
#[command(name = "waxline")]
enum Cli {
    /// Ingest scraped submissions (JSON lines) and queue matching
    Ingest(IngestArgs),
    /// Match one release against Discogs
    Match(MatchArgs),
    /// Show enrichment status for releases
    Status(StatusArgs),
}

#[derive(clap::Args)]
struct IngestArgs {
    /// Submissions file, one JSON object per line ("-" for stdin)
    file: String,
    /// SQLite database path
    #[arg(long)]
    db: Option<String>,
}

#[derive(clap::Args)]
struct MatchArgs {
    release_id: i64,
    /// Ignore the re-match cooldown
    #[arg(long)]
    force: bool,
    /// SQLite database path
    #[arg(long)]
    db: Option<String>,
}

#[derive(clap::Args)]
struct StatusArgs {
    release_ids: Vec<i64>,
    /// SQLite database path
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse() {
        Cli::Ingest(args) => ingest(args).await,
        Cli::Match(args) => match_one(args).await,
        Cli::Status(args) => status(args),
    }
}

fn build_enricher(db: Option<&str>) -> Result<Enricher, Box<dyn std::error::Error>> {
    let path = match db {
        Some(path) => path.to_string(),
        None => store::default_path().to_string_lossy().into_owned(),
    };
    let conn = store::open(&path)?;
    let catalog = Arc::new(DiscogsClient::from_env(reqwest::Client::new()));
    Ok(Enricher::new(
        Arc::new(Mutex::new(conn)),
        catalog,
        JobQueue::new(MATCH_CONCURRENCY),
    ))
}

async fn ingest(args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let enricher = build_enricher(args.db.as_deref())?;

    let reader: Box<dyn BufRead> = if args.file == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(std::io::BufReader::new(std::fs::File::open(&args.file)?))
    };

    let mut ingested = 0usize;
    let mut skipped = 0usize;
    let mut watchers = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let submission: Submission = match serde_json::from_str(&line) {
            Ok(submission) => submission,
            Err(err) => {
                tracing::warn!(line = lineno + 1, error = %err, "skipping malformed submission");
                skipped += 1;
                continue;
            }
        };
        let release_id = enricher.ingest_submission(&submission)?;
        watchers.push(enricher.submit_match(release_id));
        ingested += 1;
    }

    // let the queued matches drain before exit; pending jobs do not survive it
    for watcher in watchers {
        if let Err(err) = watcher.await {
            tracing::error!(error = %err, "match watcher died");
        }
    }

    println!("ingested {ingested} submissions ({skipped} skipped)");
    Ok(())
}

async fn match_one(args: MatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let enricher = build_enricher(args.db.as_deref())?;
    let outcome = enricher.trigger_match(args.release_id, args.force).await;

    let mut value = serde_json::to_value(&outcome)?;
    if let Some(map) = value.as_object_mut() {
        // errors surface under "debug" so scripted consumers of the stable
        // fields never have to care about them
        if let Some(reason) = map.remove("reason")
            && !reason.is_null()
        {
            map.insert("debug".to_string(), serde_json::json!({ "reason": reason }));
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn status(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let enricher = build_enricher(args.db.as_deref())?;
    let statuses = enricher.get_status(&args.release_ids)?;
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
