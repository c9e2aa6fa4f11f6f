// ============================================================================
// winix-cli - task verification tool for WINIX mini-app tasks
// ============================================================================
// Usage:
//   winix-cli --tasks tasks.json show                 List tasks and progress
//   winix-cli --tasks tasks.json detect TASK_ID       Show the detected type
//   winix-cli check-url URL [--partner]               Vet an action link
//   winix-cli --tasks tasks.json verify TASK_ID       Verify against the backend
//   winix-cli config                                  Print effective config
// ============================================================================

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use winix_tasks::verifier::SocialPlatform;
use winix_tasks::{
    InMemoryTaskStore, ServiceConfig, TaskEvent, TaskStore, TypeDetector, UrlGuard,
    VerificationService,
};

/// WINIX task verification tool
#[derive(Parser)]
#[command(name = "winix-cli", version, about = "Inspect and verify WINIX mini-app tasks")]
struct Cli {
    /// Task snapshot file (JSON with `tasks` and `progress`)
    #[arg(long, global = true)]
    tasks: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks with their detected type and progress
    Show,

    /// Show which verifier a task would be routed to
    Detect { task_id: String },

    /// Check whether an action link would be opened
    CheckUrl {
        url: String,

        /// Apply the partner allow-list instead of the social rules
        #[arg(long)]
        partner: bool,
    },

    /// Verify a task against the backend
    Verify {
        task_id: String,

        /// Event id for duplicate suppression (random when omitted)
        #[arg(long)]
        event_id: Option<String>,

        /// Write the updated progress back to the snapshot file
        #[arg(long)]
        save: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".into())
}

fn load_store(path: Option<&Path>) -> Result<InMemoryTaskStore> {
    let path = path.ok_or_else(|| anyhow!("--tasks <FILE> is required for this command"))?;
    InMemoryTaskStore::load(path).with_context(|| format!("Could not load tasks from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so it can set RUST_LOG
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("winix_tasks=debug,winix_cli=info")),
        )
        .init();

    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = ServiceConfig::from_env();

    match cli.command {
        Commands::Show => cmd_show(&load_store(cli.tasks.as_deref())?).await,
        Commands::Detect { task_id } => cmd_detect(&load_store(cli.tasks.as_deref())?, &task_id).await,
        Commands::CheckUrl { url, partner } => cmd_check_url(&config, &url, partner),
        Commands::Verify {
            task_id,
            event_id,
            save,
        } => {
            let path = cli.tasks.as_deref();
            let store = Arc::new(load_store(path)?);
            cmd_verify(config, store, &task_id, event_id.as_deref(), save.then_some(path).flatten()).await
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn cmd_show(store: &InMemoryTaskStore) -> Result<()> {
    let tasks = store.list_tasks().await;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<9}  {:<12}  {:<9}  {:<20}  {}",
        "TASK ID", "TYPE", "STATUS", "PROGRESS", "ENDS", "TITLE"
    );
    println!("{}", "-".repeat(96));

    for task in &tasks {
        let progress = match store.get_task_progress(&task.id).await {
            Some(p) => format!("{}/{}", p.progress_value, p.max_progress.unwrap_or(0)),
            None => "-".into(),
        };
        let title = task
            .title
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(30)
            .collect::<String>();
        println!(
            "{:<20}  {:<9}  {:<12}  {:<9}  {:<20}  {}",
            task.id,
            TypeDetector::detect_from_task(task).as_str(),
            task.status.as_str(),
            progress,
            format_date(task.end_date),
            title
        );
    }

    println!("\nTotal: {} tasks", tasks.len());
    Ok(())
}

async fn cmd_detect(store: &InMemoryTaskStore, task_id: &str) -> Result<()> {
    let (task_type, task) = TypeDetector::resolve(task_id, Some(store as &dyn TaskStore)).await;
    let task = task.ok_or_else(|| anyhow!("Task '{}' not found", task_id))?;

    println!("Task:     {}", task.id);
    println!("Declared: {}", task.declared_tag().unwrap_or_else(|| "-".into()));
    println!("Verifier: {}", task_type);
    if let Some(url) = task.action_url.as_deref() {
        println!("Link:     {} ({})", url, SocialPlatform::from_url(url).as_str());
    }
    if task.is_expired_at(Utc::now()) {
        println!("Note:     task has expired");
    }
    if task.is_exhausted() {
        println!("Note:     completion limit reached");
    }
    Ok(())
}

fn cmd_check_url(config: &ServiceConfig, url: &str, partner: bool) -> Result<()> {
    let guard = if partner {
        UrlGuard::partner(&config.partner_domains, &config.blocked_domains)
    } else {
        UrlGuard::social(&config.blocked_domains)
    };

    match guard.check(url) {
        Ok(parsed) => {
            println!("✓ allowed: {}", parsed);
            if !partner {
                println!("  platform: {}", SocialPlatform::from_url(url).as_str());
            }
            Ok(())
        }
        Err(rejection) => Err(anyhow!("✗ rejected: {}", rejection)),
    }
}

async fn cmd_verify(
    config: ServiceConfig,
    store: Arc<InMemoryTaskStore>,
    task_id: &str,
    event_id: Option<&str>,
    save_to: Option<&Path>,
) -> Result<()> {
    let service = VerificationService::connect(config, store.clone()).await?;
    let mut events = service.subscribe();

    info!("Verifying {}", task_id);
    let result = service.verify_task_with_event(task_id, event_id).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        // wait for the delayed completion event before shutting down
        let wait = service.config().completion_delay() * 4 + std::time::Duration::from_millis(100);
        let completed = tokio::time::timeout(wait, async {
            while let Ok(event) = events.recv().await {
                if matches!(&event, TaskEvent::TaskCompleted { task_id: id, .. } if id == task_id) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        if let Some(event) = completed {
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
    }

    if let Some(path) = save_to {
        store
            .save(path)
            .await
            .with_context(|| format!("Could not save tasks to {}", path.display()))?;
    }

    service.destroy().await;
    Ok(())
}
