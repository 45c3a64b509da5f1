use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use testdash::config::DashboardConfig;
use testdash::live::{Broadcaster, LiveEvent};
use testdash::orchestrator::RunOrchestrator;
use testdash::projects::validate::{normalize_grep, validate_project_id};
use testdash::projects::ProjectCatalog;
use testdash::storage::{self, HistoryStore, RunRecord};

#[derive(Parser)]
#[command(
    name = "testdash",
    about = "Run browser end-to-end test suites and watch them live",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + live channel + run queue)
    Serve {
        /// Bind address, overrides server.listen_address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one project's suite in the foreground
    Run {
        /// Project id (directory name under the project root)
        project: String,

        /// Only run tests matching this filter
        #[arg(long)]
        grep: Option<String>,
    },

    /// Run every runnable project, one after another
    RunAll {
        /// Only run tests matching this filter
        #[arg(long)]
        grep: Option<String>,
    },

    /// Show a project's recent runs
    History {
        /// Project id
        project: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List discovered projects
    Projects {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = DashboardConfig::resolve(cli.config.as_deref())?;

    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.listen_address = bind;
            }
            tracing::info!(bind = %config.server.listen_address, "Starting testdash daemon");
            testdash::serve(config).await?;
        }
        Commands::Run { project, grep } => {
            validate_project_id(&project)?;
            let grep = normalize_grep(grep.as_deref())?;

            let catalog = ProjectCatalog::new(&config.projects);
            let descriptor = catalog
                .find(&project)?
                .with_context(|| format!("project '{}' not found under {}", project, catalog.root().display()))?;

            let orchestrator = build_orchestrator(&config)?;
            let printer = spawn_printer(orchestrator.live());
            let outcome = orchestrator.start_run(&descriptor, grep.as_deref()).await;
            drop(orchestrator);
            let _ = printer.await;

            let run = outcome?;
            if run.stats.failed > 0 || run.exit_code != 0 {
                std::process::exit(1);
            }
        }
        Commands::RunAll { grep } => {
            let grep = normalize_grep(grep.as_deref())?;
            let catalog = ProjectCatalog::new(&config.projects);
            let projects: Vec<_> = catalog.discover()?.into_values().collect();
            if projects.is_empty() {
                println!("No projects found under {}.", catalog.root().display());
                return Ok(());
            }

            let orchestrator = build_orchestrator(&config)?;
            let printer = spawn_printer(orchestrator.live());
            let summary = orchestrator.start_batch_run(&projects, grep.as_deref()).await;
            drop(orchestrator);
            let _ = printer.await;

            println!("\n=== Batch Summary ===");
            println!("Completed: {}", summary.completed.join(", "));
            for (id, reason) in &summary.failed {
                println!("Failed:    {} ({})", id, reason);
            }
            if !summary.skipped.is_empty() {
                println!("Skipped:   {}", summary.skipped.join(", "));
            }
            if !summary.failed.is_empty() {
                bail!("{} project(s) could not be run", summary.failed.len());
            }
        }
        Commands::History { project, json } => {
            validate_project_id(&project)?;
            let pool = storage::open_pool(&config.storage.db_path)?;
            let history = HistoryStore::new(pool).read_all_async(&project).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else if history.runs.is_empty() {
                println!("No runs recorded for {}.", project);
            } else {
                println!(
                    "{:<24} | {:<25} | {:>5} | {:>6} | {:>6} | {:>7} | {:>9}",
                    "Run", "Started", "Total", "Passed", "Failed", "Skipped", "Duration"
                );
                println!("{:-<24}-|-{:-<25}-|-{:->5}-|-{:->6}-|-{:->6}-|-{:->7}-|-{:->9}", "", "", "", "", "", "", "");
                for run in &history.runs {
                    print_run_row(run);
                }
            }
        }
        Commands::Projects { json } => {
            let catalog = ProjectCatalog::new(&config.projects);
            let projects: Vec<_> = catalog.discover()?.into_values().collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects found under {}.", catalog.root().display());
            } else {
                println!("{:<20} | {:<25} | {:<28} | Runnable", "Id", "Name", "Base URL");
                println!("{:-<20}-|-{:-<25}-|-{:-<28}-|-{:-<8}", "", "", "", "");
                for p in projects {
                    println!(
                        "{:<20} | {:<25} | {:<28} | {}",
                        p.id,
                        p.name,
                        p.base_url.as_deref().unwrap_or("-"),
                        if p.can_run_from_ui { "yes" } else { "no" }
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &DashboardConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_orchestrator(config: &DashboardConfig) -> Result<RunOrchestrator> {
    let pool = storage::open_pool(&config.storage.db_path)?;
    Ok(RunOrchestrator::new(
        config.runner.clone(),
        HistoryStore::new(pool),
        Broadcaster::new(config.live.channel_capacity),
    ))
}

/// Echo live events to the terminal until the broadcaster goes away.
fn spawn_printer(live: &Broadcaster) -> tokio::task::JoinHandle<()> {
    let mut rx = live.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &LiveEvent) {
    let data = &event.data;
    let project = data["projectId"].as_str().unwrap_or("?");
    match event.event.as_str() {
        "tests:started" => {
            let expected = data["expectedTotal"]
                .as_u64()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("\n=== {} : running {} tests ===", project, expected);
        }
        "tests:progress" => {
            let expected = data["expectedTotal"]
                .as_u64()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "  [{}/{}] passed {} | failed {} | skipped {}",
                data["completed"], expected, data["passed"], data["failed"], data["skipped"]
            );
        }
        "tests:completed" => {
            let stats = &data["run"]["stats"];
            println!(
                "=== {} : {} total, {} passed, {} failed, {} skipped in {} ms (exit {}) ===",
                project,
                stats["total"],
                stats["passed"],
                stats["failed"],
                stats["skipped"],
                stats["duration"],
                data["run"]["exitCode"]
            );
        }
        "tests:error" => {
            println!("=== {} : ERROR {} ===", project, data["error"].as_str().unwrap_or("unknown"));
        }
        other => println!("{}: {}", other, data),
    }
}

fn print_run_row(run: &RunRecord) {
    println!(
        "{:<24} | {:<25} | {:>5} | {:>6} | {:>6} | {:>7} | {:>7}ms",
        run.id,
        run.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        run.stats.total,
        run.stats.passed,
        run.stats.failed,
        run.stats.skipped,
        run.stats.duration,
    );
}
