//! folio-schema CLI - reconcile the site's backend schema

use clap::{Args, Parser, Subcommand};
use folio_schema::config::{
    DEFAULT_AVAILABILITY_INTERVAL_MS, DEFAULT_AVAILABILITY_POLLS, DEFAULT_ENV_FILES,
};
use folio_schema::reconcile::StepOutcome;
use folio_schema::remote::AttributeChange;
use folio_schema::{Environment, ReconcileOptions, ReconcileReport, Reconciler, SchemaSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "folio-schema")]
#[command(about = "Reconcile the portfolio site's collections against the backend", long_about = None)]
struct Cli {
    /// Env file to read (repeatable; earlier files win). Defaults to .env.local and .env
    #[arg(long = "env-file", global = true)]
    env_files: Vec<PathBuf>,

    /// Schema file to use instead of the built-in schema
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Log request URLs and raw responses
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing collections and attributes, widen and migrate (default)
    Sync(SyncArgs),

    /// Report which declared collections are missing, without changing anything
    Check,

    /// Print the schema as YAML
    Schema,
}

#[derive(Args)]
struct SyncArgs {
    /// Polls while waiting for a new fallback attribute to become available
    #[arg(long, default_value_t = DEFAULT_AVAILABILITY_POLLS)]
    poll_attempts: u32,

    /// Delay between availability polls, in milliseconds
    #[arg(long, default_value_t = DEFAULT_AVAILABILITY_INTERVAL_MS)]
    poll_interval_ms: u64,
}

impl Default for SyncArgs {
    fn default() -> Self {
        Self {
            poll_attempts: DEFAULT_AVAILABILITY_POLLS,
            poll_interval_ms: DEFAULT_AVAILABILITY_INTERVAL_MS,
        }
    }
}

impl From<SyncArgs> for ReconcileOptions {
    fn from(args: SyncArgs) -> Self {
        ReconcileOptions {
            availability_polls: args.poll_attempts,
            availability_interval: Duration::from_millis(args.poll_interval_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "folio_schema=debug"
    } else {
        "folio_schema=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let schema = match &cli.schema {
        Some(path) => SchemaSet::load(path)?,
        None => SchemaSet::required(),
    };

    match cli
        .command
        .unwrap_or_else(|| Commands::Sync(SyncArgs::default()))
    {
        Commands::Sync(args) => sync(&cli.env_files, schema, args.into()).await,
        Commands::Check => check(&cli.env_files, schema).await,
        Commands::Schema => {
            print!("{}", schema.to_yaml()?);
            Ok(())
        }
    }
}

fn load_environment(env_files: &[PathBuf]) -> anyhow::Result<Environment> {
    let files: Vec<PathBuf> = if env_files.is_empty() {
        DEFAULT_ENV_FILES.iter().map(PathBuf::from).collect()
    } else {
        env_files.to_vec()
    };
    Ok(Environment::load(&files)?)
}

fn connect(
    env_files: &[PathBuf],
    schema: SchemaSet,
    options: ReconcileOptions,
) -> anyhow::Result<Reconciler<folio_schema::HttpTransport>> {
    let env = load_environment(env_files)?;
    Reconciler::from_environment(&env, schema, options).map_err(|e| {
        if let Some(hint) = e.suggestion() {
            tracing::error!("{}", hint);
        }
        e.into()
    })
}

async fn sync(
    env_files: &[PathBuf],
    schema: SchemaSet,
    options: ReconcileOptions,
) -> anyhow::Result<()> {
    let reconciler = connect(env_files, schema, options)?;
    let report = reconciler.run().await;
    print_report(&report);

    if !report.is_success() {
        anyhow::bail!("{} step(s) failed", report.failures().len());
    }
    Ok(())
}

async fn check(env_files: &[PathBuf], schema: SchemaSet) -> anyhow::Result<()> {
    let reconciler = connect(env_files, schema, ReconcileOptions::default())?;
    let missing = reconciler.missing_collections().await?;

    if missing.is_empty() {
        println!("All required collections exist.");
        return Ok(());
    }

    println!("Missing collections:");
    for id in &missing {
        println!("  - {}", id);
    }
    anyhow::bail!("{} collection(s) missing; run `folio-schema sync`", missing.len())
}

fn print_report(report: &ReconcileReport) {
    for collection in &report.collections {
        println!("--- {} ---", collection.id);
        if let Some(e) = &collection.failure {
            println!("  FAILED: {}", e);
            if let Some(hint) = e.suggestion() {
                println!("  hint: {}", hint);
            }
            continue;
        }

        for attribute in &collection.attributes {
            let line = match &attribute.outcome {
                StepOutcome::Applied(change) => describe_change(change),
                StepOutcome::FellBack {
                    fallback_key,
                    change,
                    migration,
                } => format!(
                    "fallback {} ({}), {} migrated, {} failed, {} unlisted",
                    fallback_key,
                    describe_change(change),
                    migration.migrated,
                    migration.failed.len(),
                    migration.unlisted
                ),
                StepOutcome::Failed(e) => match e.suggestion() {
                    Some(hint) => format!("FAILED: {} (hint: {})", e, hint),
                    None => format!("FAILED: {}", e),
                },
            };
            println!("  {}: {}", attribute.key, line);
        }

        for backfill in &collection.backfills {
            match &backfill.result {
                Ok(summary) => println!(
                    "  {} -> {}: {} migrated, {} failed, {} unlisted",
                    backfill.from,
                    backfill.to,
                    summary.migrated,
                    summary.failed.len(),
                    summary.unlisted
                ),
                Err(e) => println!("  {} -> {}: warning: {}", backfill.from, backfill.to, e),
            }
        }
    }

    println!();
    println!(
        "{} schema change(s), {} document(s) migrated, {} warning(s), {} failure(s)",
        report.schema_changes(),
        report.documents_migrated(),
        report.warnings(),
        report.failures().len()
    );
}

fn describe_change(change: &AttributeChange) -> String {
    match change {
        AttributeChange::Created => "created".to_string(),
        AttributeChange::Widened { from, to } => match from {
            Some(from) => format!("widened {} -> {}", from, to),
            None => format!("widened to {}", to),
        },
        AttributeChange::Satisfied => "ok".to_string(),
    }
}
