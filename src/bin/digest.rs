#![forbid(unsafe_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use digest_harness::analysis::budget;
use digest_harness::analysis::{JsonlEventSink, ProgressEvent, ProgressSink, Tee};
use digest_harness::gateway::TracingUsageSink;
use digest_harness::{Analyzer, AnalyzerConfig, CorpusProvider, FsScanner, Session};

#[derive(Parser)]
#[command(
    name = "digest",
    version,
    about = "Summarize a codebase too large for one model context"
)]
struct Cli {
    /// TOML file with model, limits and scan settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Model id, overrides the config file and DIGEST_MODEL
    #[arg(long, global = true)]
    model: Option<String>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tree, token estimate and chosen strategy (no model calls)
    Scan { path: PathBuf },
    /// Analyze a project and print the report
    Analyze {
        path: PathBuf,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write every progress event as JSONL, replacing any existing file
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Analyze, then answer follow-up questions from stdin
    Chat { path: PathBuf },
}

/// Prints event messages to stderr.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn emit(&mut self, event: ProgressEvent) {
        eprintln!("[{:?}] {}", event.stage(), event.message());
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<AnalyzerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AnalyzerConfig::load(path)?,
        None => AnalyzerConfig::from_env()?,
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    Ok(config)
}

fn scan_only(config: &AnalyzerConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let scanner = FsScanner::new(config.scan.clone())?;
    let corpus = scanner.scan(path)?;
    let route = budget::route(&corpus, &config.limits);

    println!("{}", corpus.tree);
    println!();
    println!("files: {}", corpus.file_count);
    println!("content tokens (est.): {}", corpus.estimated_tokens());
    println!("prompt tokens (est.): {}", route.estimated());
    println!(
        "threshold: {} (context {} - reserve {})",
        config.limits.single_call_threshold(),
        config.limits.context_limit,
        config.limits.overhead_reserve
    );
    if route.is_single_call() {
        println!("strategy: single call");
    } else {
        let chunk_budget = budget::chunk_budget(&corpus, &config.limits);
        let chunks = digest_harness::text_chunking::chunk_text(&corpus.content, chunk_budget);
        println!(
            "strategy: map-reduce ({} chunks at {} tokens)",
            chunks.len(),
            chunk_budget
        );
    }
    Ok(())
}

async fn analyze(
    analyzer: &Analyzer,
    session: &mut Session,
    path: &Path,
    events: Option<&Path>,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut stderr = StderrProgress;
    let report = match events {
        Some(events_path) => {
            let (mut jsonl, writer) = JsonlEventSink::create(events_path)?;
            let result = {
                let mut tee = Tee {
                    first: &mut stderr,
                    second: &mut jsonl,
                };
                analyzer.run(session, path, &mut tee).await
            };
            drop(jsonl);
            writer.join()?;
            eprintln!("[digest] events written to {}", events_path.display());
            result?
        }
        None => analyzer.run(session, path, &mut stderr).await?,
    };
    Ok(report)
}

async fn chat_loop(
    analyzer: &Analyzer,
    session: &mut Session,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        match analyzer.ask(session, question).await {
            Ok(answer) => println!("{answer}\n"),
            Err(err) => eprintln!("[digest] {err}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Scan { path } => scan_only(&config, &path)?,
        Commands::Analyze { path, out, events } => {
            let analyzer = Analyzer::from_config(&config, Arc::new(TracingUsageSink))?;
            let mut session = Session::new();
            let report = analyze(&analyzer, &mut session, &path, events.as_deref()).await?;
            match out {
                Some(out) => {
                    std::fs::write(&out, &report)?;
                    eprintln!("[digest] report written to {}", out.display());
                }
                None => println!("{report}"),
            }
        }
        Commands::Chat { path } => {
            let analyzer = Analyzer::from_config(&config, Arc::new(TracingUsageSink))?;
            let mut session = Session::new();
            let report = analyze(&analyzer, &mut session, &path, None).await?;
            println!("{report}\n");
            eprintln!("[digest] ask follow-up questions; `exit` or EOF to quit");
            chat_loop(&analyzer, &mut session).await?;
        }
    }

    Ok(())
}
