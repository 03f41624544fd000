mod config;
mod error;
mod llm;
mod models;
mod pipeline;
mod scraper;
mod sheet;
mod storage;
mod utils;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, LlmProvider, SinkKind, WriteMode};
use crate::llm::LlmClient;
use crate::pipeline::{Checkpoint, ClassifyTask, Pipeline, RunPlan, ScrapeTask};
use crate::scraper::{build_source, SourceKind};
use crate::sheet::{a1, open_sink, open_source, SheetReader};
use crate::storage::Repository;

#[derive(Parser)]
#[command(
    name = "sheet-scout",
    about = "Sharded, resumable stock-data scraping into a spreadsheet",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Browser-exported cookies: a JSON array or a path to one
    #[arg(long, env = "TRADINGVIEW_COOKIES", global = true, hide_env_values = true)]
    cookies: Option<String>,

    /// Service-account JSON for the destination spreadsheet
    #[arg(long, env = "GSPREAD_CREDENTIALS", global = true, hide_env_values = true)]
    credentials: Option<String>,
}

/// Row window, sharding and batching overrides.
#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// First source index (0 = first data row)
    #[arg(long, env = "START_INDEX")]
    start: Option<usize>,

    /// Last source index, inclusive
    #[arg(long, env = "END_INDEX")]
    end: Option<usize>,

    #[arg(long, env = "SHARD_INDEX")]
    shard_index: Option<usize>,

    #[arg(long, env = "SHARD_STEP")]
    shard_step: Option<usize>,

    #[arg(long, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    #[arg(long, env = "CHECKPOINT_FILE")]
    checkpoint: Option<PathBuf>,
}

impl RunArgs {
    fn apply(self, config: &mut AppConfig) {
        let run = &mut config.run;
        run.start_index = self.start.unwrap_or(run.start_index);
        run.end_index = self.end.unwrap_or(run.end_index);
        run.shard_index = self.shard_index.unwrap_or(run.shard_index);
        run.shard_step = self.shard_step.unwrap_or(run.shard_step);
        run.batch_size = self.batch_size.unwrap_or(run.batch_size);
        if self.checkpoint.is_some() {
            run.checkpoint_file = self.checkpoint;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every stock in the source list into the destination sheet
    Scrape {
        #[arg(short, long, value_enum)]
        source: SourceKind,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Fill sector and scope columns of the destination sheet with an LLM
    Classify {
        #[arg(long, value_enum)]
        provider: Option<LlmProvider>,

        /// Column letter the sector goes to; scope lands one to the right
        #[arg(long, default_value = "D")]
        output_column: String,

        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        gemini_api_key: Option<String>,

        #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
        groq_api_key: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Inspect or clear the resume point
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,

        /// The classify checkpoint instead of the scrape one
        #[arg(long)]
        classify: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show DuckDB sheet and run statistics
    Stats,

    /// Apply the DuckDB schema without running anything
    Migrate,
}

#[derive(Subcommand)]
enum CheckpointAction {
    Show,
    Reset,
}

const SCRAPE_CHECKPOINT: &str = "checkpoint";
const CLASSIFY_CHECKPOINT: &str = "classify_checkpoint";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "sheet_scout=info,warn",
        1 => "sheet_scout=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;
    if cli.cookies.is_some() {
        config.scraper.cookies = cli.cookies;
    }
    if cli.credentials.is_some() {
        config.sink.credentials = cli.credentials;
    }
    if let Some(creds) = &config.sink.credentials {
        match crate::config::service_account_email(creds) {
            Some(email) => info!("Service account: {}", email),
            None => warn!("Credentials are not a service-account JSON; ignoring them"),
        }
    }

    match cli.command {
        Command::Scrape { source, run } => {
            run.apply(&mut config);
            let _t = utils::Timer::start(format!("Scrape ({:?})", source));
            let plan = RunPlan::from_config(&config)?;
            let checkpoint = checkpoint_for(&config, SCRAPE_CHECKPOINT, &plan);

            let rows = open_source(&config.source, &config.scraper)?;
            let destination = open_sink(&config.sink)?;
            let quotes = build_source(source, &config.scraper)?;
            let date = utils::format_date(chrono::Local::now().date_naive(), &config.run.date_format)?;
            let task = ScrapeTask::new(quotes, date)
                .with_columns(config.source.symbol_column, config.source.url_column)
                .uppercase_symbols(config.source.uppercase_symbols);

            let stats = Pipeline::new(plan, checkpoint)
                .with_run_log(destination.run_log.clone())
                .run(rows.as_ref(), destination.sheet.as_ref(), &task)
                .await?;
            if stats.unwritten > 0 {
                bail!("{} rows could not be written; rerun to retry them", stats.unwritten);
            }
        }

        Command::Classify {
            provider,
            output_column,
            gemini_api_key,
            groq_api_key,
            run,
        } => {
            run.apply(&mut config);
            if let Some(p) = provider {
                config.llm.provider = p;
            }
            let env_key = match config.llm.provider {
                LlmProvider::Gemini => gemini_api_key,
                LlmProvider::Groq => groq_api_key,
            };
            if env_key.is_some() {
                config.llm.api_key = env_key;
            }
            let Some(column) = a1::column_index(output_column.trim()) else {
                bail!("Not a column letter: {:?}", output_column);
            };

            let _t = utils::Timer::start(format!("Classify ({:?})", config.llm.provider));
            let mut plan = RunPlan::from_config(&config)?;
            if plan.write_mode != WriteMode::Range {
                warn!("Classify writes beside its input rows; ignoring append mode");
                plan.write_mode = WriteMode::Range;
            }
            let checkpoint = checkpoint_for(&config, CLASSIFY_CHECKPOINT, &plan);

            let destination = open_sink(&config.sink)?;
            let reader = SheetReader(Arc::clone(&destination.sheet));
            let llm = LlmClient::new(&config.llm, &config.scraper)?;
            let task = ClassifyTask::new(Box::new(llm)).with_output_column(column);

            let stats = Pipeline::new(plan, checkpoint)
                .with_run_log(destination.run_log.clone())
                .run(&reader, destination.sheet.as_ref(), &task)
                .await?;
            if stats.unwritten > 0 {
                bail!("{} rows could not be written; rerun to retry them", stats.unwritten);
            }
        }

        Command::Checkpoint { action, classify, run } => {
            run.apply(&mut config);
            let plan = RunPlan::from_config(&config)?;
            let stem = if classify { CLASSIFY_CHECKPOINT } else { SCRAPE_CHECKPOINT };
            let checkpoint = checkpoint_for(&config, stem, &plan);

            match action {
                CheckpointAction::Show => match checkpoint.peek()? {
                    Some(next) => println!(
                        "{} → next index {} (resumes at {})",
                        checkpoint.path().display(),
                        next,
                        plan.window.resume_from(next)
                    ),
                    None => println!(
                        "{}: no checkpoint, starts at {}",
                        checkpoint.path().display(),
                        plan.window.start
                    ),
                },
                CheckpointAction::Reset => {
                    if checkpoint.reset()? {
                        println!("Removed {}", checkpoint.path().display());
                    } else {
                        println!("{} did not exist", checkpoint.path().display());
                    }
                }
            }
        }

        Command::Stats => {
            let repo = open_repository(&config)?;
            println!("─────────────────────────────────");
            println!("  Sheet Scout — DuckDB Stats");
            println!("─────────────────────────────────");
            let sheets = repo.sheet_names()?;
            if sheets.is_empty() {
                println!("  No sheets yet");
            }
            for sheet in &sheets {
                let cells = repo.cell_count(sheet)?;
                let last = repo.max_row(sheet)?;
                println!(
                    "  {:<12}: {} cells, last row {}",
                    sheet,
                    utils::fmt_number(cells),
                    last.map(|r| r.to_string()).unwrap_or("—".into())
                );
            }
            println!("─────────────────────────────────");
            for run in repo.recent_runs(10)? {
                let took = run
                    .finished_at
                    .map(|f| format!("{}s", (f - run.started_at).num_seconds()))
                    .unwrap_or("—".into());
                println!(
                    "  #{:<4} {:<18} {}/{} {} {:>6} rows {:>6} written {:>4} errors {:>7}  {}",
                    run.id,
                    run.task,
                    run.shard_index,
                    run.shard_step,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    utils::fmt_number(run.rows_processed),
                    utils::fmt_number(run.rows_written),
                    run.errors,
                    took,
                    run.status,
                );
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            open_repository(&config)?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn checkpoint_for(config: &AppConfig, stem: &str, plan: &RunPlan) -> Checkpoint {
    let checkpoint = Checkpoint::for_shard(config.run.checkpoint_file.as_deref(), stem, plan.shard);
    info!("Checkpoint file: {}", checkpoint.path().display());
    checkpoint
}

fn open_repository(config: &AppConfig) -> Result<Repository> {
    if config.sink.kind != SinkKind::Duckdb {
        bail!("DuckDB commands need sink.kind = \"duckdb\" (SCOUT_SINK__KIND=duckdb)");
    }
    let repo = Repository::open(&config.sink.path)
        .with_context(|| format!("Failed to open {:?}", config.sink.path))?;
    repo.run_migrations()?;
    Ok(repo)
}
