use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod config;
mod db;
mod error;
mod extract;
mod grade;
mod logging;
mod models;
mod pipeline;
mod report;
mod roster;

use config::Config;
use extract::{Extractor, LlmExtractor};
use models::{GradeBatch, GradeRequest};
use pipeline::PipelineOptions;
use roster::{InMemoryRoster, RosterLookup};

#[derive(Parser)]
#[command(name = "grade-intake")]
#[command(about = "Turn pasted exam grades into reviewed entries for the Doce Acesso class roster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo roster
    Seed,
    /// Import students from a CSV file (full_name,matricula,class_id)
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Parse and validate pasted grades without saving them
    Process {
        #[arg(long = "class")]
        class_id: String,
        #[arg(long = "subject")]
        subject_id: String,
        #[arg(long = "exam")]
        exam_id: String,
        /// Text file with one grade per line; reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// Match against a roster CSV instead of the database
        #[arg(long)]
        roster_csv: Option<PathBuf>,
        /// Skip the language model and split lines directly
        #[arg(long)]
        no_llm: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
    /// Store the approved entries of a processed batch
    Save {
        /// Batch JSON written by `process`
        #[arg(long)]
        batch: PathBuf,
        /// Also store unknown matriculas as unlinked grades
        #[arg(long)]
        force_unlinked: bool,
    },
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config.require_database_url()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_source_text(input: Option<&PathBuf>) -> anyhow::Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read grades from stdin")?;
            Ok(text)
        }
    }
}

fn write_output(out: Option<&PathBuf>, contents: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Batch written to {}.", path.display());
        }
        None => println!("{contents}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            let count = db::seed(&pool).await?;
            println!("Seeded {count} students.");
        }
        Commands::ImportRoster { csv } => {
            let pool = connect(&config).await?;
            let imported = db::import_roster_csv(&pool, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Process {
            class_id,
            subject_id,
            exam_id,
            input,
            roster_csv,
            no_llm,
            format,
            out,
            timeout_secs,
        } => {
            let request = GradeRequest {
                class_id,
                subject_id,
                exam_id,
                source_text: read_source_text(input.as_ref())?,
            };

            let roster: Box<dyn RosterLookup> = match roster_csv {
                Some(path) => {
                    let roster = InMemoryRoster::from_csv(&path)?;
                    if roster.is_empty() {
                        tracing::warn!(path = %path.display(), "roster CSV has no students");
                    } else {
                        info!(students = roster.len(), "loaded roster CSV");
                    }
                    Box::new(roster)
                }
                None => Box::new(db::PgRoster::new(connect(&config).await?)),
            };

            let caller_timeout = Duration::from_secs(timeout_secs);
            let mut options = PipelineOptions {
                lookup_concurrency: config.lookup_concurrency,
                ..PipelineOptions::default()
            };

            let llm = match (&config.llm, no_llm) {
                (Some(llm), false) => {
                    options.extraction_timeout = llm.timeout_within(caller_timeout);
                    let client = llm.http_client(options.extraction_timeout)?;
                    Some(LlmExtractor::new(client, llm.clone()))
                }
                _ => {
                    info!("language model disabled or not configured, splitting lines directly");
                    None
                }
            };
            let extractor = llm.as_ref().map(|llm| llm as &dyn Extractor);

            let batch = tokio::time::timeout(
                caller_timeout,
                pipeline::process_grades(request, extractor, roster.as_ref(), options),
            )
            .await
            .with_context(|| format!("grade processing timed out after {timeout_secs}s"))?;

            let contents = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&batch)?,
                OutputFormat::Markdown => report::build_report(&batch),
            };
            write_output(out.as_ref(), &contents)?;
        }
        Commands::Save {
            batch,
            force_unlinked,
        } => {
            let contents = std::fs::read_to_string(&batch)
                .with_context(|| format!("failed to read {}", batch.display()))?;
            let parsed: GradeBatch = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a processed batch", batch.display()))?;

            let pool = connect(&config).await?;
            let outcome = db::save_batch(&pool, &parsed, force_unlinked).await?;
            println!(
                "Saved {} grades for exam {} ({} unlinked, {} left for review).",
                outcome.saved + outcome.unlinked,
                parsed.request.exam_id,
                outcome.unlinked,
                outcome.skipped
            );
        }
    }

    Ok(())
}
