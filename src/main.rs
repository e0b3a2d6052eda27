//! safescan - image classification coordinator
//!
//! # Usage
//!
//! ```bash
//! # Classifier program receives the image path as its last argument and
//! # prints {"nsfw": <f>, "sfw": <f>} on stdout
//! ./safescan --classifier ./bin/nsfw-infer
//!
//! # With a config file and JSON logs
//! SAFESCAN_CONFIG=/etc/safescan.toml ./safescan --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `SAFESCAN_CONFIG`: path to the TOML config file
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use safescan::api::create_app;
use safescan::hub::NotificationHub;
use safescan::{AppConfig, AppContext, CommandClassifier, SledUploadStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "safescan")]
#[command(about = "Image classification coordinator with live review events")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides the SAFESCAN_CONFIG lookup)
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long, env = "SAFESCAN_ADDR")]
    addr: Option<String>,

    /// Number of classification workers (0 = one per CPU)
    #[arg(short, long, env = "SAFESCAN_WORKERS")]
    workers: Option<usize>,

    /// Classifier program; the image path is appended as last argument
    #[arg(long, env = "SAFESCAN_CLASSIFIER")]
    classifier: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SAFESCAN_LOG_JSON")]
    log_json: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    NotificationHub,
    CachePurge,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::NotificationHub => write!(f, "NotificationHub"),
            TaskName::CachePurge => write!(f, "CachePurge"),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load(),
    };

    if let Some(addr) = &args.addr {
        config.server.bind_address.clone_from(addr);
    }
    if let Some(workers) = args.workers {
        config.workers.count = workers;
    }
    if let Some(program) = &args.classifier {
        config.classifier.program = Some(program.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ============================================================================
// Supervision
// ============================================================================

/// Every supervised task reports its name alongside its outcome.
type TaskOutcome = (TaskName, Result<()>);

fn spawn_task<F>(tasks: &mut JoinSet<TaskOutcome>, name: TaskName, task: F)
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        info!(task = %name, "Task starting");
        (name, task.await)
    });
}

/// HTTP server; finishes in-flight requests once `cancel` fires.
async fn serve_http(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel: CancellationToken,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server stopped with an error")
}

/// The hub would otherwise live as long as the context's handle does.
async fn run_hub(hub: NotificationHub, cancel: CancellationToken) -> Result<()> {
    tokio::select! {
        () = hub.run() => {}
        () = cancel.cancelled() => {}
    }
    Ok(())
}

/// Wait for every task to end.
///
/// All tasks are meant to run until cancellation, so any task ending on its
/// own (cleanly, with an error or by panicking) cancels the rest. The first
/// failure becomes the process result.
async fn supervise(mut tasks: JoinSet<TaskOutcome>, cancel: CancellationToken) -> Result<()> {
    let mut first_failure: Option<anyhow::Error> = None;

    while let Some(joined) = tasks.join_next().await {
        let shutting_down = cancel.is_cancelled();
        match joined {
            Ok((name, Ok(()))) if shutting_down => {
                info!(task = %name, remaining = tasks.len(), "Task stopped");
            }
            Ok((name, Ok(()))) => {
                warn!(task = %name, "Task exited unexpectedly, shutting down");
                cancel.cancel();
            }
            Ok((name, Err(e))) => {
                error!(task = %name, error = %e, "Task failed, shutting down");
                cancel.cancel();
                first_failure.get_or_insert(e.context(format!("{name} failed")));
            }
            Err(e) => {
                error!(error = %e, "Task panicked, shutting down");
                cancel.cancel();
                first_failure.get_or_insert(anyhow::anyhow!("task panicked: {e}"));
            }
        }
    }

    first_failure.map_or(Ok(()), Err)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(&args)?;
    let program = config
        .classifier
        .program
        .clone()
        .context("No classifier configured: set [classifier].program or pass --classifier")?;

    config
        .files
        .ensure_dirs()
        .context("Failed to create upload directories")?;
    let repository = Arc::new(
        SledUploadStore::open(&config.storage.db_path).context("Failed to open upload store")?,
    );
    let classifier = Arc::new(CommandClassifier::new(program, config.classifier.args.clone()));

    let bind_address = config.server.bind_address.clone();
    let purge_interval = config.purge_interval();

    let (ctx, hub) = AppContext::new(config, classifier, repository);
    let ctx = Arc::new(ctx);
    ctx.start().context("Failed to start worker pool")?;

    info!("safescan starting");
    info!(
        addr = %bind_address,
        workers = ctx.dispatcher.worker_count(),
        job_timeout_ms = ctx.config.workers.job_timeout_ms,
        "Configuration ready"
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("Listening on http://{}", bind_address);

    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
    spawn_task(
        &mut tasks,
        TaskName::HttpServer,
        serve_http(listener, create_app(Arc::clone(&ctx)), cancel_token.clone()),
    );
    spawn_task(&mut tasks, TaskName::NotificationHub, run_hub(hub, cancel_token.clone()));
    let cache = Arc::clone(&ctx.cache);
    let purge_cancel = cancel_token.clone();
    spawn_task(&mut tasks, TaskName::CachePurge, async move {
        cache.purge_loop(purge_interval, purge_cancel).await;
        Ok(())
    });

    // Returns only after the server has finished in-flight requests, so the
    // pool is drained with no new work arriving.
    let outcome = supervise(tasks, cancel_token).await;

    ctx.shutdown().await;
    info!("safescan shutdown complete");
    outcome
}
