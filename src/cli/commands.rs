//! CLI command definitions for keyword-forge.
//!
//! This module provides the operator entry point: seed a domain, run the
//! research pipeline against it, and inspect checkpoints and phrases.

use crate::executor::{BackendExecutor, BackendTarget};
use crate::llm::{HttpLlmClient, LlmProvider, OPENROUTER_BASE_URL};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{Domain, Keyword, PipelineConfig, PipelineCoordinator, RunRequest};
use crate::progress::{DisconnectPolicy, ProgressEvent};
use crate::storage::{CheckpointStore, SqliteStore};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Default database location.
const DEFAULT_DATABASE_URL: &str = "sqlite://keyword_forge.db";

/// Multi-phase keyword research pipeline.
#[derive(Parser)]
#[command(name = "keyword-forge")]
#[command(about = "Run resumable multi-phase keyword research over a domain")]
#[command(version)]
#[command(
    long_about = "keyword-forge researches a domain and its seed keywords in seven phases and stores scored search phrases.\n\nEvery phase result is checkpointed, so rerunning a domain only redoes what is missing.\n\nExample usage:\n  keyword-forge seed --file acme.yaml\n  keyword-forge run --domain acme --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL or path.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline for a domain and stream progress events.
    Run(RunArgs),

    /// Insert or update a domain and its keywords from a YAML file.
    Seed(SeedArgs),

    /// Show every checkpoint of a domain and its keywords.
    Status(StatusArgs),

    /// Print the generated phrases of a keyword as JSON.
    Phrases(PhrasesArgs),
}

/// Arguments for `keyword-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Domain to research.
    #[arg(short, long)]
    pub domain: String,

    /// Keyword ids to process (repeatable). Defaults to every keyword of the domain.
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// Model for generation phases.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Online model for search phases.
    #[arg(long)]
    pub search_model: Option<String>,

    /// API key for the OpenAI-compatible backend.
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible backend.
    #[arg(long, env = "KEYWORD_FORGE_API_BASE", default_value = OPENROUTER_BASE_URL)]
    pub api_base: String,

    /// Maximum keywords processed concurrently.
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Cancel outstanding backend calls when stdout goes away.
    #[arg(long)]
    pub cancel_on_disconnect: bool,

    /// Print events as JSON lines instead of log lines.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Write Prometheus metrics to this file when the run ends.
    #[arg(long)]
    pub metrics_out: Option<String>,
}

/// Arguments for `keyword-forge seed`.
#[derive(Parser, Debug)]
pub struct SeedArgs {
    /// YAML file with a `domain` and its `keywords`.
    #[arg(short, long)]
    pub file: String,
}

/// Arguments for `keyword-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Domain to inspect.
    #[arg(short, long)]
    pub domain: String,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `keyword-forge phrases`.
#[derive(Parser, Debug)]
pub struct PhrasesArgs {
    /// Keyword whose phrases to print.
    #[arg(short, long)]
    pub keyword: String,
}

/// Seed file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedFile {
    pub domain: Domain,
    #[serde(default)]
    pub keywords: Vec<SeedKeyword>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedKeyword {
    pub id: String,
    pub term: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(&cli.database, args).await,
        Commands::Seed(args) => run_seed_command(&cli.database, args).await,
        Commands::Status(args) => run_status_command(&cli.database, args).await,
        Commands::Phrases(args) => run_phrases_command(&cli.database, args).await,
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pipeline_command(database: &str, args: RunArgs) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env()?.with_database_url(database);
    if let Some(model) = &args.model {
        config = config.with_generation_model(model.clone());
    }
    if let Some(model) = &args.search_model {
        config = config.with_search_model(model.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_max_concurrent_keywords(concurrency);
    }
    if args.cancel_on_disconnect {
        config = config.with_disconnect_policy(DisconnectPolicy::Cancel);
    }
    config.validate()?;

    let api_key = args.api_key.clone().unwrap_or_default();
    if api_key.trim().is_empty() {
        anyhow::bail!(
            "OPENROUTER_API_KEY is required but not set.\n\
             Provide it via --api-key <KEY> or set the OPENROUTER_API_KEY environment variable."
        );
    }

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let store = Arc::new(SqliteStore::open(&config.database_url).await?);
    let executor = build_executor(&api_key, &args.api_base, &config)?;

    info!(
        domain = %args.domain,
        generation_model = %config.generation_model,
        search_model = %config.search_model,
        concurrency = config.max_concurrent_keywords,
        "Starting pipeline run"
    );

    let coordinator = Arc::new(PipelineCoordinator::new(
        store.clone(),
        store,
        executor,
        config,
    ));
    let (emitter, mut events) = coordinator.progress_channel();
    let request = RunRequest::new(args.domain.clone()).with_keywords(args.keywords.clone());
    let handle = coordinator.spawn_run(request, emitter);

    stream_events(&mut events, args.json, &mut io::stdout()).await?;
    // Dropping the receiver is what a disconnect looks like to the run.
    drop(events);

    let result = handle.await?;

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())
            .map_err(|e| anyhow::anyhow!("Failed to write metrics file: {}", e))?;
        info!(path = %path, "Metrics written");
    }

    let outcome = result?;
    if !args.json {
        println!("✓ Run {} finished: {}", outcome.run_id, outcome.status);
        println!(
            "  Keywords:  {} ok / {} failed / {} total",
            outcome.keywords_succeeded, outcome.keywords_failed, outcome.keywords_total
        );
        println!(
            "  Phases:    {} executed / {} reused / {} degraded",
            outcome.phases_executed, outcome.phases_reused, outcome.phases_degraded
        );
        println!("  Phrases:   {} written", outcome.phrases_written);
        println!(
            "  Cost:      ${:.4} ({} tokens, {} requests)",
            outcome.cost_usd(),
            outcome.cost.total_tokens(),
            outcome.cost.requests
        );
        for failure in &outcome.failures {
            println!(
                "  ✗ {} ({}) failed in {}: {}",
                failure.keyword_id, failure.term, failure.phase, failure.message
            );
        }
    }

    Ok(())
}

fn build_executor(
    api_key: &str,
    api_base: &str,
    config: &PipelineConfig,
) -> anyhow::Result<Arc<BackendExecutor>> {
    let generation: Arc<dyn LlmProvider> = Arc::new(HttpLlmClient::new(
        api_key,
        api_base,
        config.generation_model.clone(),
    )?);
    let search: Arc<dyn LlmProvider> = Arc::new(HttpLlmClient::new(
        api_key,
        api_base,
        config.search_model.clone(),
    )?);

    Ok(Arc::new(BackendExecutor::new(
        BackendTarget::new(generation, config.generation_model.clone()),
        BackendTarget::new(search, config.search_model.clone()),
        config.retry.clone(),
    )))
}

/// Forward events until the stream ends or `out` stops accepting writes.
async fn stream_events<W: Write>(
    events: &mut mpsc::Receiver<ProgressEvent>,
    json: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        if !json {
            log_event(&event);
            continue;
        }
        let line = serde_json::to_string(&event)?;
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!(error = %e, "Event output closed, no longer streaming");
            break;
        }
    }
    Ok(())
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::RunStarted {
            run_id,
            domain_id,
            keyword_count,
        } => info!(run_id = %run_id, domain_id = %domain_id, keyword_count, "run:started"),
        ProgressEvent::Phase {
            scope_id,
            phase,
            progress,
            ..
        } => info!(scope = %scope_id, phase = %phase, progress, "{}", event.name()),
        ProgressEvent::KeywordFinished {
            keyword_id,
            phrases,
            failure,
            ..
        } => match failure {
            Some(failure) => warn!(
                keyword_id = %keyword_id,
                phase = %failure.phase,
                kind = %failure.kind,
                error = %failure.message,
                "keyword:failed"
            ),
            None => info!(keyword_id = %keyword_id, phrases, "keyword:completed"),
        },
        ProgressEvent::RunComplete { outcome } => {
            info!(status = %outcome.status, "run:complete")
        }
        ProgressEvent::RunError { kind, message, .. } => {
            warn!(kind = %kind, error = %message, "run:error")
        }
    }
}

// ============================================================================
// Seed / Status / Phrases
// ============================================================================

fn load_seed_file(path: &Path) -> anyhow::Result<SeedFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file {}: {}", path.display(), e))?;
    let seed: SeedFile = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file {}: {}", path.display(), e))?;

    if seed.domain.id.trim().is_empty() {
        anyhow::bail!("Seed file {} has an empty domain id", path.display());
    }
    Ok(seed)
}

async fn run_seed_command(database: &str, args: SeedArgs) -> anyhow::Result<()> {
    let seed = load_seed_file(Path::new(&args.file))?;
    let store = SqliteStore::open(database).await?;

    store.upsert_domain(&seed.domain).await?;
    for keyword in &seed.keywords {
        store
            .upsert_keyword(&Keyword {
                id: keyword.id.clone(),
                domain_id: seed.domain.id.clone(),
                term: keyword.term.clone(),
            })
            .await?;
    }

    info!(
        domain = %seed.domain.id,
        keywords = seed.keywords.len(),
        "Seed applied"
    );
    println!(
        "✓ Seeded domain {} with {} keyword(s)",
        seed.domain.id,
        seed.keywords.len()
    );
    Ok(())
}

async fn run_status_command(database: &str, args: StatusArgs) -> anyhow::Result<()> {
    let store = SqliteStore::open(database).await?;
    let rows = store.list_for_domain(&args.domain).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No checkpoints for domain {}", args.domain);
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:<22} {:<10} {:>4}  {}",
        "SCOPE", "ID", "PHASE", "STATUS", "PCT", "NOTE"
    );
    for row in &rows {
        let note = match (&row.error, row.degraded) {
            (Some(err), _) => err.clone(),
            (None, true) => "degraded".to_string(),
            (None, false) => String::new(),
        };
        println!(
            "{:<8} {:<20} {:<22} {:<10} {:>4}  {}",
            row.scope_kind.as_str(),
            row.scope_id,
            row.phase.as_str(),
            row.status.as_str(),
            row.progress,
            note
        );
    }
    Ok(())
}

async fn run_phrases_command(database: &str, args: PhrasesArgs) -> anyhow::Result<()> {
    let store = SqliteStore::open(database).await?;
    let phrases = store.phrases_for(&args.keyword).await?;
    println!("{}", serde_json::to_string_pretty(&phrases)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEmitter;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let args = vec!["keyword-forge", "run", "--domain", "acme"];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.domain, "acme");
                assert!(args.keywords.is_empty());
                assert!(args.model.is_none());
                assert!(args.concurrency.is_none());
                assert!(!args.json);
                assert!(!args.cancel_on_disconnect);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_options() {
        let args = vec![
            "keyword-forge",
            "run",
            "-d",
            "acme",
            "-k",
            "k1",
            "--keyword",
            "k2",
            "-m",
            "anthropic/claude-3.5-sonnet",
            "--search-model",
            "perplexity/sonar-pro",
            "-c",
            "5",
            "--json",
            "--database",
            "sqlite://other.db",
            "--log-level",
            "debug",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.database, "sqlite://other.db");
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.keywords, vec!["k1".to_string(), "k2".to_string()]);
                assert_eq!(args.model.as_deref(), Some("anthropic/claude-3.5-sonnet"));
                assert_eq!(args.search_model.as_deref(), Some("perplexity/sonar-pro"));
                assert_eq!(args.concurrency, Some(5));
                assert!(args.json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_other_commands_parse() {
        let cli = Cli::try_parse_from(["keyword-forge", "seed", "--file", "acme.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Seed(ref a) if a.file == "acme.yaml"));

        let cli = Cli::try_parse_from(["keyword-forge", "status", "-d", "acme", "-j"]).unwrap();
        assert!(matches!(cli.command, Commands::Status(ref a) if a.domain == "acme" && a.json));

        let cli = Cli::try_parse_from(["keyword-forge", "phrases", "-k", "k1"]).unwrap();
        assert!(matches!(cli.command, Commands::Phrases(ref a) if a.keyword == "k1"));
    }

    #[test]
    fn test_run_requires_domain() {
        assert!(Cli::try_parse_from(["keyword-forge", "run"]).is_err());
    }

    #[test]
    fn test_load_seed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acme.yaml");
        fs::write(
            &path,
            "domain:\n  id: acme\n  context: CRM software for small agencies.\n  locale: en-US\nkeywords:\n  - id: k1\n    term: crm\n  - id: k2\n    term: agency crm\n",
        )
        .unwrap();

        let seed = load_seed_file(&path).unwrap();
        assert_eq!(seed.domain.id, "acme");
        assert_eq!(seed.domain.locale.as_deref(), Some("en-US"));
        assert_eq!(seed.keywords.len(), 2);
        assert_eq!(seed.keywords[1].term, "agency crm");
    }

    #[test]
    fn test_load_seed_file_rejects_empty_domain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "domain:\n  id: ''\n  context: x\n").unwrap();
        assert!(load_seed_file(&path).is_err());
    }

    #[tokio::test]
    async fn test_seed_then_status() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("cli.db");
        let db = db.to_string_lossy().to_string();
        let seed_path = dir.path().join("seed.yaml");
        fs::write(
            &seed_path,
            "domain:\n  id: acme\n  context: CRM software.\nkeywords:\n  - id: k1\n    term: crm\n",
        )
        .unwrap();

        run_seed_command(
            &db,
            SeedArgs {
                file: seed_path.to_string_lossy().to_string(),
            },
        )
        .await
        .unwrap();

        let store = SqliteStore::open(&db).await.unwrap();
        use crate::storage::DomainSource;
        let keywords = store.load_keywords("acme").await.unwrap();
        assert_eq!(keywords.len(), 1);
        assert_eq!(keywords[0].term, "crm");

        run_status_command(
            &db,
            StatusArgs {
                domain: "acme".into(),
                json: true,
            },
        )
        .await
        .unwrap();
    }

    /// Writer whose reader has gone away.
    struct ClosedPipe {
        writes: usize,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn started(run_id: &str) -> ProgressEvent {
        ProgressEvent::RunStarted {
            run_id: run_id.into(),
            domain_id: "acme".into(),
            keyword_count: 0,
        }
    }

    #[tokio::test]
    async fn test_stream_events_writes_json_lines() {
        let (emitter, mut rx) = ProgressEmitter::channel(8, DisconnectPolicy::Detach);
        emitter.send(started("r1")).await;
        emitter.send(started("r2")).await;
        drop(emitter);

        let mut out = Vec::new();
        stream_events(&mut rx, true, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "run_started");
        assert_eq!(first["run_id"], "r1");
    }

    #[tokio::test]
    async fn test_stream_events_stops_on_closed_output() {
        let (emitter, mut rx) = ProgressEmitter::channel(8, DisconnectPolicy::Cancel);
        for run_id in ["r1", "r2", "r3"] {
            emitter.send(started(run_id)).await;
        }

        // Returns instead of panicking, even though the sender is still alive.
        let mut out = ClosedPipe { writes: 0 };
        stream_events(&mut rx, true, &mut out).await.unwrap();
        assert_eq!(out.writes, 1);

        drop(rx);
        emitter.send(started("r4")).await;
        assert!(emitter.is_closed());
        assert!(emitter.is_cancelled());
    }
}
