use anyhow::Context;
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use tracing::error;

use pullsync::app::App;
use pullsync::config::Config;
use pullsync::logging;
use pullsync::observability;
use pullsync::pipeline::{BuildOutcome, RunContext};

#[derive(Parser)]
#[command(name = "pullsync")]
#[command(about = "Pull-based sync engine: fetch, queue, upsert and clean up tracked records")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to $PULLSYNC_CONFIG or pullsync.toml)
    #[arg(long, global = true)]
    config: Option<String>,
    /// Debug level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured resources with their last run times
    List,
    /// Run a resource to completion
    Sync {
        id: String,
        /// Continue an interrupted run instead of starting a new one
        #[arg(long = "continue")]
        resume: bool,
    },
    /// Run a resource job by job, printing progress
    Batch { id: String },
    /// Show the first page as the resource would process it
    Debug { id: String },
    /// Forget the last run times of a resource
    Reset { id: String },
    /// Run every resource whose schedule is due
    Cron,
    /// Run a file_upload resource against a local file
    Upload { id: String, path: String },
    /// Protect a synced record from updates and cleanup
    Lock { id: String, entity_type: String },
    /// Remove the protection added by `lock`
    Unlock { id: String, entity_type: String },
}

fn format_time(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_build(outcome: &Option<BuildOutcome>) {
    match outcome {
        Some(BuildOutcome::Queued { items, has_next_page }) => println!(
            "   First page: {} item(s){}",
            items,
            if *has_next_page { ", more pages queued" } else { "" }
        ),
        Some(BuildOutcome::Ignored) => println!("   Nothing to do"),
        Some(BuildOutcome::Skipped(msg)) => println!("⚠️  Skipped: {}", msg),
        Some(BuildOutcome::Failed(msg)) => println!("❌ Failed: {}", msg),
        None => println!("   Resumed interrupted run"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let _guard = logging::init_logging(
        &config.settings.log_dir,
        cli.verbose || config.settings.log_verbose,
    );
    observability::describe_all();
    if let Some(addr) = config.settings.metrics_addr.as_deref() {
        observability::install_prometheus(addr)?;
    }

    let app = App::open(config)?;

    match cli.command {
        Commands::List => {
            println!("📋 Configured resources:");
            for definition in app.manager().definitions() {
                let runner = app.runner_for(definition.clone())?;
                println!(
                    "   {:<24} {:<8} cron={:<12} last start={} last end={}",
                    definition.id,
                    if definition.status { "enabled" } else { "disabled" },
                    if definition.cron.is_empty() { "-" } else { definition.cron.as_str() },
                    format_time(runner.last_run_start().await?),
                    format_time(runner.last_run_end().await?),
                );
            }
        }
        Commands::Sync { id, resume } => {
            println!("🔄 Syncing {}...", id);
            let summary = app.sync(&id, resume).await?;
            print_build(&summary.build);
            println!("✅ Ran {} job(s)", summary.jobs);
        }
        Commands::Batch { id } => {
            let runner = app.runner(&id)?;
            let mut batch = runner.run_as_batch().await?;
            print_build(&Some(batch.build_outcome().clone()));
            while let Some(progress) = batch.step().await? {
                println!("   Task {} out of {}", progress.current, progress.total);
            }
            println!("✅ Batch complete");
        }
        Commands::Debug { id } => {
            let runner = app.runner(&id)?;
            let preview = runner.debug().await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::Reset { id } => {
            app.reset(&id).await?;
            println!("✅ Reset last run of {}", id);
        }
        Commands::Cron => {
            let summaries = app.run_due(Local::now()).await?;
            if summaries.is_empty() {
                println!("Nothing due");
            }
            for summary in summaries {
                println!("🔄 {}:", summary.resource);
                print_build(&summary.build);
                println!("   Ran {} job(s)", summary.jobs);
            }
        }
        Commands::Upload { id, path } => {
            println!("📥 Uploading {} into {}...", path, id);
            let runner = app.upload_runner(&id, &path)?;
            let outcome = runner.build(RunContext::new()).await?;
            print_build(&Some(outcome));
            let jobs = runner.run_jobs().await?;
            println!("✅ Ran {} job(s)", jobs);
        }
        Commands::Lock { id, entity_type } => {
            if app.set_locked(&id, &entity_type, true).await? {
                println!("🔒 Locked {} ({})", id, entity_type);
            } else {
                error!("No synced record for {} ({})", id, entity_type);
                println!("❌ No synced record for {} ({})", id, entity_type);
            }
        }
        Commands::Unlock { id, entity_type } => {
            if app.set_locked(&id, &entity_type, false).await? {
                println!("🔓 Unlocked {} ({})", id, entity_type);
            } else {
                println!("❌ No synced record for {} ({})", id, entity_type);
            }
        }
    }
    Ok(())
}
