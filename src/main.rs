mod config;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;

use logscope_logs::{ChunkStore, MemoryStore, load_session_entries};
use logscope_types::{Entry, FieldFilters, LogLevel, QueryRequest, QueryResult};
use logscope_worker::{Envelope, FileSource, ParseCommand, ParseEvent, ParseWorker, QueryWorker};

use crate::config::Config;

/// Logscope - chunked parsing and querying of tab-delimited application logs
#[derive(Parser, Debug)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log files, parsed in the order given
    #[arg(value_name = "FILES", required = true)]
    files: Vec<PathBuf>,

    /// Substring filter on the timestamp text
    #[arg(long)]
    timestamp: Option<String>,

    /// Exact level name (TRACE, DEBUG, INFO, WARN, ERROR, FATAL)
    #[arg(long)]
    level: Option<String>,

    #[arg(long)]
    logger: Option<String>,

    #[arg(long)]
    file_position: Option<String>,

    #[arg(long)]
    message: Option<String>,

    /// Substring filter on the raw details JSON
    #[arg(long)]
    details: Option<String>,

    #[arg(long)]
    filename: Option<String>,

    /// Leave out lines that did not parse
    #[arg(long)]
    hide_invalid: bool,

    #[arg(long, default_value = "1")]
    page: usize,

    /// Entries per page (overrides config)
    #[arg(long)]
    page_size: Option<usize>,

    /// Bytes read per window (overrides config)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Group entries by a dotted path into the details JSON
    #[arg(long, value_name = "PATH")]
    group_by: Option<String>,

    /// Print the detail keys available for grouping and exit
    #[arg(long)]
    keys: bool,

    /// Print the query result as JSON
    #[arg(long)]
    json: bool,

    /// Config file (defaults to $LOGSCOPE_CONFIG)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn filters(&self) -> FieldFilters {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        FieldFilters {
            timestamp: field(&self.timestamp),
            level: field(&self.level),
            logger: field(&self.logger),
            file_position: field(&self.file_position),
            message: field(&self.message),
            details: field(&self.details),
            filename: field(&self.filename),
            show_invalid: !self.hide_invalid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    config.validate()?;

    // Logs go to stderr; stdout carries results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                config
                    .log_level
                    .parse()
                    .with_context(|| format!("Invalid log level '{}'", config.log_level))?,
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args, config).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args, config: Config) -> Result<()> {
    let store = MemoryStore::new();
    let session_id = format!("session-{}", chrono::Utc::now().timestamp_millis());

    let (parser, mut events) = ParseWorker::spawn(config.chunk_size);
    parser.send(ParseCommand::Init {
        session_id: session_id.clone(),
    })?;

    let total_files = args.files.len();
    for (file_index, path) in args.files.iter().enumerate() {
        parser.send(ParseCommand::ParseFile {
            file: FileSource::from_path(path),
            file_index,
            total_files,
        })?;
        if !drive_file(&parser, &mut events, &store, &session_id).await? {
            eprintln!("Parsing cancelled, showing partial results");
            break;
        }
    }

    // The worker answers in order, so the first KEYS_RESULT is ours
    parser.send_with_id(1, ParseCommand::ExtractKeys)?;
    while let Some(envelope) = events.recv().await {
        if let ParseEvent::KeysResult { keys } = envelope.body {
            store.save_keys(&session_id, keys)?;
            break;
        }
    }
    parser.shutdown().await;

    if args.keys {
        let mut out = std::io::stdout().lock();
        for key in store.load_keys(&session_id)? {
            writeln!(out, "{key}")?;
        }
        return Ok(());
    }

    let entries = load_session_entries(&store, &session_id)?;
    tracing::info!(session = %session_id, entries = entries.len(), "session assembled");

    let mut query = QueryWorker::spawn();
    query.load(entries)?;
    let result = query
        .query(QueryRequest {
            filters: args.filters(),
            page: args.page,
            page_size: config.page_size,
            group_by_key: args.group_by.clone(),
        })
        .await?
        .map_err(|error| anyhow::anyhow!("Query failed: {error}"))?;
    query.shutdown().await;
    store.delete_session(&session_id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result)?;
    }
    Ok(())
}

/// Relay one file's events into the store until its terminal event.
/// Returns false when the parse was cancelled.
async fn drive_file(
    parser: &ParseWorker,
    events: &mut UnboundedReceiver<Envelope<ParseEvent>>,
    store: &MemoryStore,
    session_id: &str,
) -> Result<bool> {
    let mut cancel_sent = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(envelope) = event else {
                    anyhow::bail!("Parse worker stopped unexpectedly");
                };
                match envelope.body {
                    ParseEvent::ParseChunkResult { chunk } => store.save_chunk(session_id, chunk)?,
                    ParseEvent::ParseProgress(progress) => {
                        tracing::debug!(
                            file = %progress.current_file,
                            percent = progress.percent,
                            "progress"
                        );
                    }
                    ParseEvent::ParseComplete { filename, total_entries, file_index, total_files } => {
                        tracing::info!(file = %filename, total_entries, file_index, total_files, "file complete");
                        return Ok(true);
                    }
                    ParseEvent::ParseError { error } => {
                        // Chunks already stored stay usable
                        tracing::error!(%error, "file skipped");
                        eprintln!("Error: {error}");
                        return Ok(true);
                    }
                    ParseEvent::ParseCancelled { filename, chunks_emitted } => {
                        tracing::info!(file = %filename, chunks_emitted, "parse cancelled");
                        return Ok(false);
                    }
                    ParseEvent::KeysResult { .. } => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                parser.cancel()?;
                cancel_sent = true;
            }
        }
    }
}

fn print_result(result: &QueryResult) -> Result<()> {
    let mut out = std::io::stdout().lock();

    match &result.groups {
        Some(groups) => {
            for group in groups {
                let duration = group
                    .duration_ms
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    out,
                    "{}={}  count={}  errors={}  duration={}  {} .. {}",
                    group.group_key,
                    group.key_value,
                    group.count,
                    if group.has_errors { "yes" } else { "no" },
                    duration,
                    group.first_entry.timestamp,
                    group.last_entry.timestamp,
                )?;
                for entry in &group.entries {
                    write_entry(&mut out, entry, "    ")?;
                }
            }
        }
        None => {
            for entry in &result.entries {
                write_entry(&mut out, entry, "")?;
            }
        }
    }

    writeln!(
        out,
        "-- page {}/{}, {} matching entries",
        result.page, result.total_pages, result.total_entries
    )?;
    let stats: Vec<String> = LogLevel::ALL
        .iter()
        .map(|level| format!("{level} {}", result.level_stats.get(*level)))
        .collect();
    writeln!(out, "-- {}", stats.join("  "))?;
    Ok(())
}

fn write_entry(out: &mut impl Write, entry: &Entry, indent: &str) -> std::io::Result<()> {
    if !entry.is_valid {
        return writeln!(
            out,
            "{indent}[invalid] {}: {} ({})",
            entry.filename, entry.raw, entry.parse_error
        );
    }

    writeln!(
        out,
        "{indent}{} {:<5} {} {} {} {}",
        entry.timestamp,
        entry.level_str(),
        entry.logger,
        entry.file_position,
        entry.message,
        entry.details_json
    )?;
    for line in &entry.stack_trace {
        writeln!(out, "{indent}    {line}")?;
    }
    Ok(())
}
