//! ferry - Distributed migration between search clusters
//!
//! Registers tasks, builds their backlogs and runs workers that copy
//! documents, index configurations and templates between clusters.

use anyhow::Context;
use clap::Parser;
use console::{style, Term};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cluster_ferry::cluster::HttpConnector;
use cluster_ferry::config::{CliArgs, Command, FerryConfig, OutputFormat, WorkerConfig};
use cluster_ferry::coordinator::{list_workers, WorkerCoordinator, DEFAULT_LIVENESS_TIMEOUT};
use cluster_ferry::generator::{BacklogSummary, SubtaskGenerator};
use cluster_ferry::mutator::PluginRegistry;
use cluster_ferry::queue::{RunControl, TaskRegistry, WorkQueueStore};
use cluster_ferry::store::{KvStore, RedisStore, RedisStoreConfig};
use cluster_ferry::task::{Subtask, Task};
use cluster_ferry::transfer::{TransferEngine, TransferOutcome};
use cluster_ferry::worker::WorkerLoop;

/// HTTP timeout for the planning commands
const PLANNING_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();
    let config = FerryConfig::from(&args);

    // Initialize logging
    let default_level = if args.verbose { "cluster_ferry=debug" } else { "cluster_ferry=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?),
        )
        .init();

    // Handle Ctrl+C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown_clone.load(Ordering::Relaxed) {
            eprintln!("\nForce shutdown!");
            std::process::exit(130);
        }
        eprintln!("\nShutting down after the current subtask... (press Ctrl+C again to force)");
        shutdown_clone.store(true, Ordering::SeqCst);
    })?;

    let store = connect(&config.redis_url).await?;

    match args.command {
        Command::Work {
            poll_interval,
            heartbeat_interval,
            liveness_timeout,
            timeout,
            scroll_size,
            backoff_min,
            backoff_max,
            exit_when_drained,
        } => {
            let worker_config = WorkerConfig::from_work_args(
                poll_interval,
                heartbeat_interval,
                liveness_timeout,
                timeout,
                scroll_size,
                backoff_min,
                backoff_max,
                exit_when_drained,
                args.quiet,
                args.verbose,
            )?;
            run_work(&config, store, worker_config, shutdown).await?
        }

        Command::Add { name, file, size_field } => {
            run_add(&config, store, &name, &file, size_field.as_deref()).await?
        }

        Command::Remove { name, yes } => run_remove(store, &name, yes).await?,

        Command::List { format } => run_list(store, OutputFormat::parse(&format)?).await?,

        Command::Rebuild {
            name,
            clear_completed,
        } => run_rebuild(&config, store, &name, clear_completed).await?,

        Command::Status {
            name,
            watch,
            interval,
            format,
        } => {
            run_status(store, name.as_deref(), watch, interval, OutputFormat::parse(&format)?, shutdown)
                .await?
        }

        Command::Errors { name, clear } => run_errors(store, &name, clear).await?,

        Command::Pause => {
            RunControl::new(store).pause().await?;
            println!("{} Workers paused.", style("Success:").green().bold());
        }

        Command::Resume => {
            RunControl::new(store).resume().await?;
            println!("{} Workers resumed.", style("Success:").green().bold());
        }
    }

    Ok(())
}

async fn connect(redis_url: &str) -> anyhow::Result<Arc<dyn KvStore>> {
    let store = RedisStore::connect(RedisStoreConfig::with_url(redis_url)).await?;
    Ok(Arc::new(store))
}

fn load_plugins(path: Option<&Path>) -> anyhow::Result<Arc<PluginRegistry>> {
    let registry = match path {
        Some(path) => PluginRegistry::from_file(path)
            .with_context(|| format!("loading plugins from {}", path.display()))?,
        None => PluginRegistry::new(),
    };
    Ok(Arc::new(registry))
}

fn spinner(quiet: bool) -> anyhow::Result<Option<ProgressBar>> {
    if quiet {
        return Ok(None);
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(Some(pb))
}

/// Subtask description with its size range in readable units
fn describe_sized(subtask: &Subtask) -> String {
    match subtask.documents() {
        Some(range) if range.is_bounded() => format!(
            "documents {}/{} [{}, {})",
            range.index,
            range.doc_type,
            format_size(range.min_size as u64, BINARY),
            format_size(range.max_size as u64, BINARY)
        ),
        _ => subtask.transfer.describe(),
    }
}

fn print_summary(summary: &BacklogSummary) {
    println!("  Subtasks generated: {}", style(summary.generated).cyan());
    println!("  Already completed:  {}", style(summary.skipped_completed).dim());
    println!("  Enqueued:           {}", style(summary.enqueued).green());
    println!("  Documents expected: {}", style(summary.documents).yellow());
}

async fn run_work(
    config: &FerryConfig,
    store: Arc<dyn KvStore>,
    worker_config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let plugins = load_plugins(config.plugins.as_deref())?;
    let connector = Arc::new(HttpConnector::new(worker_config.http_timeout));
    let engine = TransferEngine::new(connector, plugins, worker_config.transfer.clone());

    let coordinator = Arc::new(WorkerCoordinator::reserve(store.clone(), worker_config.liveness_timeout).await?);
    let ticker_stop = Arc::new(AtomicBool::new(false));
    let ticker = coordinator.spawn_ticker(worker_config.heartbeat_interval, ticker_stop.clone());

    println!(
        "{} Starting worker {}",
        style("[Worker]").cyan().bold(),
        style(coordinator.name()).green()
    );
    println!("  Redis: {}", style(&config.redis_url).dim());
    println!(
        "  Mode: {}",
        if worker_config.continuous {
            style("continuous").green()
        } else {
            style("until backlogs are empty").yellow()
        }
    );
    println!();

    let pb = spinner(!worker_config.show_progress)?;

    let completed = Arc::new(AtomicU64::new(0));
    let documents = Arc::new(AtomicU64::new(0));
    let pb_clone = pb.clone();
    let (completed_clone, documents_clone) = (completed.clone(), documents.clone());

    let mut worker = WorkerLoop::new(
        coordinator.clone(),
        WorkQueueStore::new(store.clone()),
        TaskRegistry::new(store.clone()),
        RunControl::new(store.clone()),
        engine,
    )
    .with_poll_interval(worker_config.poll_interval)
    .on_complete(Box::new(move |task_id: &str, subtask: &Subtask, outcome: &TransferOutcome| {
        let done = completed_clone.fetch_add(1, Ordering::Relaxed) + 1;
        let docs = documents_clone.fetch_add(outcome.transferred, Ordering::Relaxed) + outcome.transferred;
        if let Some(ref pb) = pb_clone {
            pb.set_message(format!(
                "Subtasks: {} | Documents: {} | Last: {} {}",
                style(done).green(),
                style(docs).cyan(),
                style(task_id).yellow(),
                style(subtask.transfer.describe()).dim(),
            ));
        }
    }));
    if !worker_config.continuous {
        worker = worker.exit_when_drained();
    }

    // Ctrl+C lets the subtask in flight finish
    let kill = worker.kill_handle();
    let watcher = tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        kill.store(true, Ordering::SeqCst);
    });

    let stats = worker.run().await?;

    watcher.abort();
    ticker_stop.store(true, Ordering::SeqCst);
    ticker.abort();
    // Wait until an in-flight heartbeat has finished or been cancelled
    let _ = ticker.await;
    coordinator.release().await?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    // Print summary
    println!();
    println!("{}", style("Worker Complete").green().bold());
    println!("  Subtasks completed: {}", style(stats.completed).green());
    if stats.failed > 0 {
        println!("  Subtasks failed: {}", style(stats.failed).red());
    }
    println!("  Documents written: {}", style(stats.documents).cyan());
    if stats.dropped > 0 {
        println!("  Items dropped by mutators: {}", style(stats.dropped).dim());
    }
    println!("  Duration: {:.1}s", stats.duration.as_secs_f64());

    Ok(())
}

async fn build_backlog(
    config: &FerryConfig,
    store: Arc<dyn KvStore>,
    name: &str,
    task: &Task,
) -> anyhow::Result<BacklogSummary> {
    let plugins = load_plugins(config.plugins.as_deref())?;
    let connector = Arc::new(HttpConnector::new(PLANNING_TIMEOUT));
    let generator = SubtaskGenerator::new(WorkQueueStore::new(store), connector, plugins);

    let pb = spinner(config.quiet)?;
    if let Some(ref pb) = pb {
        pb.set_message(format!("Building backlog for {}", style(name).green()));
    }
    let result = generator.build_backlog(name, task).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result?)
}

async fn run_add(
    config: &FerryConfig,
    store: Arc<dyn KvStore>,
    name: &str,
    file: &Path,
    size_field: Option<&str>,
) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let mut task = Task::from_json(&json)?;
    if let Some(field) = size_field {
        task.default_size_field(field);
    }

    TaskRegistry::new(store.clone()).add(name, &task).await?;
    println!(
        "{} Registered task {} ({} -> {})",
        style("[Task]").cyan().bold(),
        style(name).green(),
        style(&task.source.host).dim(),
        style(&task.destination.host).dim()
    );

    let summary = build_backlog(config, store, name, &task)
        .await
        .with_context(|| format!("task {} is registered; run `ferry rebuild {}` to retry", name, name))?;
    print_summary(&summary);

    Ok(())
}

async fn run_remove(store: Arc<dyn KvStore>, name: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        print!(
            "{} This will remove task {} with its backlog, progress and error log. Continue? [y/N] ",
            style("Warning:").yellow().bold(),
            name
        );
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    TaskRegistry::new(store).remove(name).await?;
    println!("{} Task {} removed.", style("Success:").green().bold(), name);

    Ok(())
}

async fn run_list(store: Arc<dyn KvStore>, format: OutputFormat) -> anyhow::Result<()> {
    let names = TaskRegistry::new(store).list().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Text if names.is_empty() => println!("{}", style("No tasks registered").dim()),
        OutputFormat::Text => {
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

async fn run_rebuild(
    config: &FerryConfig,
    store: Arc<dyn KvStore>,
    name: &str,
    clear_completed: bool,
) -> anyhow::Result<()> {
    let task = TaskRegistry::new(store.clone()).get(name).await?;
    if clear_completed {
        WorkQueueStore::new(store.clone()).clear_completed(name).await?;
    }

    println!(
        "{} Rebuilding backlog for {}",
        style("[Task]").cyan().bold(),
        style(name).green()
    );
    let summary = build_backlog(config, store, name, &task).await?;
    print_summary(&summary);

    Ok(())
}

async fn run_status(
    store: Arc<dyn KvStore>,
    name: Option<&str>,
    watch: bool,
    interval: u64,
    format: OutputFormat,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let registry = TaskRegistry::new(store.clone());
    let queue = WorkQueueStore::new(store.clone());
    let control = RunControl::new(store.clone());

    loop {
        let names = match name {
            Some(name) => {
                registry.get(name).await?;
                vec![name.to_string()]
            }
            None => registry.list().await?,
        };

        let mut tasks = Vec::new();
        for task_id in &names {
            let backlog = queue.count_backlog(task_id).await?;
            let completed = queue.count_completed(task_id).await?;
            let progress = queue.overall_progress(task_id).await?;
            let errors = queue.errors(task_id).await?.len();
            tasks.push(json!({
                "name": task_id,
                "backlogSubtasks": queue.backlog_len(task_id).await?,
                "backlogDocuments": backlog,
                "completedDocuments": completed,
                "inFlight": progress.in_flight.iter().map(|(subtask, p)| json!({
                    "subtask": describe_sized(subtask),
                    "worker": p.worker,
                    "transferred": p.transferred,
                    "total": p.total,
                })).collect::<Vec<_>>(),
                "inFlightTransferred": progress.transferred,
                "inFlightTotal": progress.total,
                "errors": errors,
            }));
        }
        let running = control.is_running().await?;
        let workers = list_workers(store.as_ref(), DEFAULT_LIVENESS_TIMEOUT).await?;

        if format == OutputFormat::Json {
            let status = json!({
                "running": running,
                "tasks": tasks,
                "workers": workers,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            // Clear screen in watch mode
            if watch {
                let term = Term::stdout();
                let _ = term.clear_screen();
            }

            println!("{}", style("cluster-ferry Status").cyan().bold());
            println!("{}", "=".repeat(50));
            println!();
            println!(
                "Run state: {}",
                if running {
                    style("running").green().bold()
                } else {
                    style("paused").yellow().bold()
                }
            );
            println!();

            for task in &tasks {
                let done = task["completedDocuments"].as_u64().unwrap_or(0)
                    + task["inFlightTransferred"].as_u64().unwrap_or(0);
                let total = task["completedDocuments"].as_u64().unwrap_or(0)
                    + task["inFlightTotal"].as_u64().unwrap_or(0)
                    + task["backlogDocuments"].as_u64().unwrap_or(0);
                let percent = if total > 0 { done as f64 * 100.0 / total as f64 } else { 100.0 };

                println!(
                    "{} {}",
                    style("Task").yellow().bold(),
                    style(task["name"].as_str().unwrap_or_default()).green()
                );
                println!("  Backlog:   {} subtasks", style(&task["backlogSubtasks"]).cyan());
                println!("  Documents: {} / {} ({:.1}%)", style(done).green(), total, percent);
                for item in task["inFlight"].as_array().into_iter().flatten() {
                    println!(
                        "    {} {} {}/{} ({})",
                        style("→").blue(),
                        item["subtask"].as_str().unwrap_or_default(),
                        item["transferred"],
                        item["total"],
                        style(item["worker"].as_str().unwrap_or_default()).dim()
                    );
                }
                let errors = task["errors"].as_u64().unwrap_or(0);
                println!(
                    "  Errors:    {}",
                    if errors > 0 { style(errors).red() } else { style(errors).dim() }
                );
                println!();
            }
            if tasks.is_empty() {
                println!("  {}", style("No tasks registered").dim());
                println!();
            }

            println!("{}", style("Workers").yellow().bold());
            if workers.is_empty() {
                println!("  {}", style("No live workers").dim());
            } else {
                for worker in &workers {
                    let seconds = (cluster_ferry::queue::now_millis() - worker.last_modified).max(0) / 1000;
                    let detail = match (&worker.task, &worker.subtask) {
                        (Some(task), Some(subtask)) => format!(" {} {}", task, subtask),
                        _ => String::new(),
                    };
                    println!(
                        "  {} {} [{}]{} (last seen: {}s ago)",
                        style("●").green(),
                        worker.name,
                        worker.state,
                        style(detail).dim(),
                        seconds
                    );
                }
            }
            println!();
            println!(
                "Last updated: {}",
                style(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")).dim()
            );
        }

        if !watch || shutdown.load(Ordering::Relaxed) {
            break;
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}

async fn run_errors(store: Arc<dyn KvStore>, name: &str, clear: bool) -> anyhow::Result<()> {
    let queue = WorkQueueStore::new(store);
    let errors = queue.errors(name).await?;

    if errors.is_empty() {
        println!("{}", style("No errors recorded").dim());
    }
    for record in &errors {
        let when = chrono::DateTime::from_timestamp_millis(record.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!(
            "{} {}",
            style(when).dim(),
            style(describe_sized(&record.subtask)).yellow()
        );
        println!("  {}", style(&record.message).red());
    }

    if clear {
        queue.clear_errors(name).await?;
        println!(
            "{} Cleared {} error(s).",
            style("Success:").green().bold(),
            errors.len()
        );
    }

    Ok(())
}
