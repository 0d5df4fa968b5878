use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use docpair::config::AppConfig;
use docpair::database::models::{FeedbackLevel, InsertOutcome};
use docpair::database::repositories::{CandidateRepository, ComparisonRepository};
use docpair::database::{open_database, DbPool};
use docpair::pipeline::{
    BatchContext, BatchDriver, BatchProgress, BatchSummary, CancellationToken, DocumentSource,
    EngineRegistry, GroupReport, SearchFilters,
};
use docpair::services::industry_docs::view_url;
use docpair::services::{DirectorySource, ImageCache, IndustryDocsSource};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "docpair",
    version,
    about = "Find visually similar scanned documents for human review"
)]
struct Cli {
    /// JSON config file (default: ~/Documents/DocPair/docpair.json if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database holding candidates and comparisons
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate and inspect candidate pairs
    Candidates {
        #[command(subcommand)]
        command: CandidatesCmd,
    },

    /// Reviewer feedback on document pairs
    Comparisons {
        #[command(subcommand)]
        command: ComparisonsCmd,
    },

    /// Grade unreviewed candidates interactively
    Review {
        /// Maximum number of candidates to present
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List the available similarity engines
    Engines,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Read scans from a local `<collection>/<type>/<id>.<ext>` tree
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Do not read or write the downloaded image cache
    #[arg(long)]
    no_cache: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Documents per page
    #[arg(long)]
    page_size: Option<u32>,

    /// First page to process, counted from 0
    #[arg(long, default_value_t = 0)]
    start_page: u64,

    /// Only documents with at most this many pages (0 disables the filter)
    #[arg(long)]
    max_pages: Option<u32>,

    /// Similarity engine name, see `docpair engines`
    #[arg(long)]
    engine: Option<String>,

    /// Minimum score for a pair to become a candidate
    #[arg(long)]
    threshold: Option<f64>,

    /// Pause between result pages in milliseconds
    #[arg(long)]
    page_delay_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum CandidatesCmd {
    /// Run one batch over a single collection and type
    Search {
        #[arg(long)]
        collection: Option<String>,

        #[arg(long = "type", value_name = "TYPE")]
        doc_type: Option<String>,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Run one batch per collection and type combination
    Grouped {
        /// Comma-separated collections; `all` or `*` means any
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,

        /// Comma-separated document types; `all` or `*` means any
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Show stored candidates in insertion order
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the number of stored candidates
    Count,
}

#[derive(Subcommand, Debug)]
enum ComparisonsCmd {
    /// Show all recorded feedback
    List,

    /// Record or overwrite feedback for a pair
    Save {
        doc1: String,
        doc2: String,

        /// Feedback level from 0 (totally different) to 5 (same document)
        #[arg(long)]
        feedback: i32,

        #[arg(long)]
        comments: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Candidates { command } => match command {
            CandidatesCmd::Search {
                collection,
                doc_type,
                source,
                batch,
            } => {
                let (driver, mut ctx) = prepare_batch(&mut config, &source, &batch)?;
                ctx.filters = std::mem::take(&mut ctx.filters)
                    .with_collection(collection)
                    .with_doc_type(doc_type);

                println!(
                    "▶ Searching {} with {} (page size {})",
                    ctx.filters.label(),
                    driver.engine_name(),
                    ctx.page_size
                );
                let (ctx, progress) = attach_progress(ctx)?;
                let report = driver.run(&ctx).await;
                drop(ctx);
                progress.await.context("Progress display failed")?;

                print_group(&report);
                print_totals(&report.summary);
            }

            CandidatesCmd::Grouped {
                collections,
                types,
                source,
                batch,
            } => {
                let collections = parse_group_values(&collections);
                let types = parse_group_values(&types);
                let (driver, ctx) = prepare_batch(&mut config, &source, &batch)?;

                println!(
                    "▶ Grouped run over {} collection(s) × {} type(s) with {}",
                    collections.len().max(1),
                    types.len().max(1),
                    driver.engine_name()
                );
                let (ctx, progress) = attach_progress(ctx)?;
                let report = driver.run_grouped(&ctx, &collections, &types).await;
                drop(ctx);
                progress.await.context("Progress display failed")?;

                for group in &report.groups {
                    print_group(group);
                }
                print_totals(&report.totals);
            }

            CandidatesCmd::List { limit, json } => {
                let repo = CandidateRepository::new(open_pool(&config)?);
                let candidates = repo.fetch(limit)?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&candidates)?);
                } else if candidates.is_empty() {
                    println!("No candidates stored.");
                } else {
                    for c in &candidates {
                        println!(
                            "{:>6}  {} ↔ {}  {:.4}  {}  {}",
                            c.id, c.doc1_id, c.doc2_id, c.similarity_score, c.model, c.created_at
                        );
                    }
                }
            }

            CandidatesCmd::Count => {
                let repo = CandidateRepository::new(open_pool(&config)?);
                println!("{}", repo.count()?);
            }
        },

        Commands::Comparisons { command } => {
            let repo = ComparisonRepository::new(open_pool(&config)?);
            match command {
                ComparisonsCmd::List => {
                    let comparisons = repo.list()?;
                    if comparisons.is_empty() {
                        println!("No comparisons recorded.");
                    }
                    for c in &comparisons {
                        let label = c
                            .feedback_level()
                            .map(FeedbackLevel::label)
                            .unwrap_or("(no feedback)");
                        println!(
                            "{} ↔ {}  {}  {}{}",
                            c.doc1_id,
                            c.doc2_id,
                            label,
                            c.comparison_date,
                            c.comments
                                .as_deref()
                                .map(|s| format!("\n     {}", s))
                                .unwrap_or_default()
                        );
                    }
                }

                ComparisonsCmd::Save {
                    doc1,
                    doc2,
                    feedback,
                    comments,
                } => {
                    let saved = repo
                        .save_raw(&doc1, &doc2, feedback, comments)
                        .with_context(|| format!("Failed to save feedback for {} ↔ {}", doc1, doc2))?;
                    println!(
                        "✅ {} ↔ {}: {}",
                        saved.doc1_id,
                        saved.doc2_id,
                        saved.feedback_level().map(FeedbackLevel::label).unwrap_or("-")
                    );
                }
            }
        }

        Commands::Review { limit } => review(open_pool(&config)?, limit)?,

        Commands::Engines => {
            let registry = EngineRegistry::with_defaults(config.similarity_threshold);
            for name in registry.names() {
                let marker = if name == config.engine { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` filters output; `log` records from the library are captured too.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_pool(config: &AppConfig) -> Result<DbPool> {
    open_database(&config.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })
}

/// Applies the batch flags to `config` and wires source, engine and store.
fn prepare_batch(
    config: &mut AppConfig,
    source_args: &SourceArgs,
    args: &BatchArgs,
) -> Result<(BatchDriver, BatchContext)> {
    apply_batch_args(config, args)?;

    let registry = EngineRegistry::with_defaults(config.similarity_threshold);
    let engine = registry
        .resolve(&config.engine)
        .with_context(|| format!("Available engines: {}", registry.names().join(", ")))?;
    let source = build_source(config, source_args)?;
    let store = Arc::new(CandidateRepository::new(open_pool(config)?));

    let filters = SearchFilters::default().with_max_pages(config.max_document_pages);
    let ctx = BatchContext::new(filters, config.page_size)
        .with_start_offset(args.start_page * config.page_size as u64)
        .with_page_delay(config.page_delay());

    Ok((BatchDriver::new(source, engine, store), ctx))
}

fn apply_batch_args(config: &mut AppConfig, args: &BatchArgs) -> Result<()> {
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(max_pages) = args.max_pages {
        config.max_document_pages = Some(max_pages).filter(|&n| n > 0);
    }
    if let Some(engine) = &args.engine {
        config.engine = engine.clone();
    }
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    if let Some(delay) = args.page_delay_ms {
        config.page_delay_ms = delay;
    }
    config.validate().context("Invalid batch settings")?;
    Ok(())
}

fn build_source(config: &AppConfig, args: &SourceArgs) -> Result<Arc<dyn DocumentSource>> {
    if let Some(dir) = &args.dir {
        let source = DirectorySource::new(dir)
            .with_context(|| format!("Failed to index {}", dir.display()))?;
        return Ok(Arc::new(source));
    }

    let mut source = IndustryDocsSource::new(
        config.search_url.as_str(),
        config.download_url.as_str(),
        config.request_timeout(),
    )
    .context("Failed to build HTTP client")?;

    if !args.no_cache {
        let cache = ImageCache::open(&config.cache_path).with_context(|| {
            format!(
                "Failed to open image cache at {}",
                config.cache_path.display()
            )
        })?;
        source = source.with_cache(cache);
    }

    Ok(Arc::new(source))
}

/// Sets `token` on the first interrupt and returns the exit code on the
/// second. Returns `None` once `next_interrupt` stops delivering.
async fn watch_interrupts<F, Fut>(token: CancellationToken, mut next_interrupt: F) -> Option<i32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return None;
    }
    eprintln!("\n⚠️  Cancelling after the current pair… (Ctrl-C again to quit now)");
    token.store(true, Ordering::Relaxed);

    if !next_interrupt().await {
        return None;
    }
    Some(INTERRUPTED_EXIT_CODE)
}

#[derive(Debug, Default, PartialEq)]
struct ProgressTally {
    inserted: u64,
    already_known: u64,
}

impl ProgressTally {
    fn record(&mut self, event: &BatchProgress) {
        if let BatchProgress::CandidateSaved { outcome, .. } = event {
            match outcome {
                InsertOutcome::Inserted => self.inserted += 1,
                InsertOutcome::AlreadyExists => self.already_known += 1,
            }
        }
    }
}

/// Streams progress to an indicatif bar. Ctrl-C cancels the run, a second
/// Ctrl-C exits immediately.
fn attach_progress(ctx: BatchContext) -> Result<(BatchContext, JoinHandle<()>)> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let token = ctx.get_cancellation_token();
    tokio::spawn(async move {
        let interrupts = || async { tokio::signal::ctrl_c().await.is_ok() };
        if let Some(code) = watch_interrupts(token, interrupts).await {
            eprintln!("\n⛔ Interrupted");
            std::process::exit(code);
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let ctx = ctx.with_progress_sender(progress_tx);

    let handle = tokio::spawn(async move {
        let mut tally = ProgressTally::default();
        while let Some(event) = progress_rx.recv().await {
            tally.record(&event);
            match event {
                BatchProgress::PageStarted {
                    filters,
                    offset,
                    documents,
                    pairs,
                } => {
                    bar.set_length(pairs as u64);
                    bar.set_position(0);
                    bar.set_message(format!(
                        "{} offset {} ({} documents)",
                        filters.label(),
                        offset,
                        documents
                    ));
                }
                BatchProgress::PairCompared { .. } | BatchProgress::PairSkipped { .. } => {
                    bar.inc(1);
                }
                BatchProgress::PairFailed {
                    doc1_id,
                    doc2_id,
                    error,
                } => {
                    bar.inc(1);
                    bar.println(format!("   ⚠️  {} ↔ {}: {}", doc1_id, doc2_id, error));
                }
                BatchProgress::CandidateSaved {
                    doc1_id,
                    doc2_id,
                    score,
                    outcome,
                } => {
                    let note = if outcome == InsertOutcome::AlreadyExists {
                        " (already stored)"
                    } else {
                        ""
                    };
                    bar.println(format!("   ✨ {} ↔ {}  {:.4}{}", doc1_id, doc2_id, score, note));
                }
                BatchProgress::GroupFinished(report) => {
                    bar.println(format!(
                        "▶ {} done: {:?}",
                        report.filters.label(),
                        report.outcome
                    ));
                }
            }
        }
        bar.finish_with_message(format!(
            "{} new candidate(s), {} already stored",
            tally.inserted, tally.already_known
        ));
    });

    Ok((ctx, handle))
}

fn parse_group_values(values: &[String]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            if v == "*" || v.eq_ignore_ascii_case("all") {
                None
            } else {
                Some(v.to_string())
            }
        })
        .collect()
}

fn print_group(report: &GroupReport) {
    println!(
        "  {}: {:?}, {} processed, {} saved, {} skipped, {} failed",
        report.filters.label(),
        report.outcome,
        report.summary.processed,
        report.summary.saved,
        report.summary.skipped,
        report.summary.failed
    );
}

fn print_totals(summary: &BatchSummary) {
    println!(
        "✅ {} page(s), {} pair(s) processed, {} saved ({} already known), {} skipped, {} failed",
        summary.pages,
        summary.processed,
        summary.saved,
        summary.already_known,
        summary.skipped,
        summary.failed
    );
}

fn review(pool: DbPool, limit: i64) -> Result<()> {
    let candidates = CandidateRepository::new(pool.clone()).find_unreviewed(limit)?;
    let comparisons = ComparisonRepository::new(pool);

    if candidates.is_empty() {
        println!("No unreviewed candidates.");
        return Ok(());
    }

    println!("Feedback scale:");
    for level in FeedbackLevel::ALL {
        println!("  {} {}: {}", level.value(), level.label(), level.description());
    }

    let theme = ColorfulTheme::default();
    let mut choices: Vec<String> = FeedbackLevel::ALL
        .iter()
        .map(|level| format!("{} - {}", level.value(), level.label()))
        .collect();
    choices.push("Skip".to_string());
    choices.push("Quit".to_string());
    let skip = FeedbackLevel::ALL.len();

    let mut reviewed = 0;
    for (i, candidate) in candidates.iter().enumerate() {
        // The same pair may be listed once per engine.
        if comparisons.exists(&candidate.doc1_id, &candidate.doc2_id)? {
            continue;
        }
        println!(
            "\n[{}/{}] {} ↔ {}  score {:.4} ({})",
            i + 1,
            candidates.len(),
            candidate.doc1_id,
            candidate.doc2_id,
            candidate.similarity_score,
            candidate.model
        );
        println!("   {}", view_url(&candidate.doc1_id));
        println!("   {}", view_url(&candidate.doc2_id));

        let choice = Select::with_theme(&theme)
            .with_prompt("How similar are these documents?")
            .items(&choices)
            .default(0)
            .interact()?;
        if choice == skip {
            continue;
        }
        if choice > skip {
            break;
        }

        let level = FeedbackLevel::ALL[choice];
        let comment: String = Input::with_theme(&theme)
            .with_prompt("Comments (optional)")
            .allow_empty(true)
            .interact_text()?;
        let comments = Some(comment.trim().to_string()).filter(|c| !c.is_empty());

        comparisons.save_or_update(&candidate.doc1_id, &candidate.doc2_id, Some(level), comments)?;
        reviewed += 1;
        println!("   ✅ Saved: {}", level.label());
    }

    println!("\n✅ Recorded {} comparison(s)", reviewed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_group_values() {
        let values: Vec<String> = ["tobacco", " all", "*", "", "pharma "]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(
            parse_group_values(&values),
            vec![
                Some("tobacco".to_string()),
                None,
                None,
                Some("pharma".to_string())
            ]
        );
    }

    #[test]
    fn test_search_flags() {
        let cli = Cli::try_parse_from([
            "docpair",
            "candidates",
            "search",
            "--collection",
            "tobacco",
            "--type",
            "letter",
            "--page-size",
            "5",
            "--engine",
            "phash",
        ])
        .unwrap();

        match cli.command {
            Commands::Candidates {
                command:
                    CandidatesCmd::Search {
                        collection,
                        doc_type,
                        batch,
                        ..
                    },
            } => {
                assert_eq!(collection.as_deref(), Some("tobacco"));
                assert_eq!(doc_type.as_deref(), Some("letter"));
                assert_eq!(batch.page_size, Some(5));
                assert_eq!(batch.engine.as_deref(), Some("phash"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn batch_args(args: &[&str]) -> BatchArgs {
        let mut argv = vec!["docpair", "candidates", "search"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Candidates {
                command: CandidatesCmd::Search { batch, .. },
            } => batch,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn scripted(interrupts: Vec<bool>) -> impl FnMut() -> std::future::Ready<bool> {
        let mut script = interrupts.into_iter();
        move || std::future::ready(script.next().unwrap_or(false))
    }

    #[test]
    fn test_page_delay_defaults_to_one_second() {
        let mut config = AppConfig::default();
        apply_batch_args(&mut config, &batch_args(&[])).unwrap();

        assert_eq!(config.page_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_page_delay_flag_overrides_config() {
        let mut config = AppConfig::default();
        let args = batch_args(&["--page-delay-ms", "250", "--max-pages", "0"]);
        apply_batch_args(&mut config, &args).unwrap();

        assert_eq!(config.page_delay(), Duration::from_millis(250));
        assert_eq!(config.max_document_pages, None);
    }

    #[test]
    fn test_batch_flags_are_validated() {
        let mut config = AppConfig::default();
        let args = batch_args(&["--page-size", "1"]);

        assert!(apply_batch_args(&mut config, &args).is_err());
    }

    #[tokio::test]
    async fn test_second_interrupt_exits() {
        let token = CancellationToken::default();

        let code = watch_interrupts(token.clone(), scripted(vec![true, true])).await;

        assert!(token.load(Ordering::Relaxed));
        assert_eq!(code, Some(INTERRUPTED_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_single_interrupt_only_cancels() {
        let token = CancellationToken::default();

        let code = watch_interrupts(token.clone(), scripted(vec![true])).await;

        assert!(token.load(Ordering::Relaxed));
        assert_eq!(code, None);
    }

    #[tokio::test]
    async fn test_no_interrupt_leaves_run_alone() {
        let token = CancellationToken::default();

        let code = watch_interrupts(token.clone(), scripted(vec![false])).await;

        assert!(!token.load(Ordering::Relaxed));
        assert_eq!(code, None);
    }

    #[test]
    fn test_tally_counts_only_new_candidates_as_inserted() {
        let saved = |outcome| BatchProgress::CandidateSaved {
            doc1_id: "a".to_string(),
            doc2_id: "b".to_string(),
            score: 0.95,
            outcome,
        };
        let mut tally = ProgressTally::default();

        tally.record(&saved(InsertOutcome::Inserted));
        tally.record(&saved(InsertOutcome::AlreadyExists));
        tally.record(&saved(InsertOutcome::AlreadyExists));
        tally.record(&BatchProgress::PairSkipped {
            doc1_id: "a".to_string(),
            doc2_id: "c".to_string(),
            reason: "not found".to_string(),
        });

        assert_eq!(
            tally,
            ProgressTally {
                inserted: 1,
                already_known: 2,
            }
        );
    }
}
