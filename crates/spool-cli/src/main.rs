use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spool_core::ports::{ExecutorListener, IdGenerator, SequentialIdGenerator, StoreListener};
use spool_core::{
    Descriptor, DurableStore, ExecutorBuilder, Handler, Job, Payload, RunContext, RunOutcome,
    ShutdownPolicy, SpoolConfig, StoreBuilder, TaskError,
};

#[derive(Debug, Parser)]
#[command(name = "spool", about = "Run hello tasks through a durable spool")]
struct Args {
    /// TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage directory (overrides config and SPOOL_STORE_DIR).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Number of new hello tasks to enqueue.
    #[arg(long, default_value_t = 3)]
    tasks: u32,

    /// Fail this many handler calls before succeeding.
    #[arg(long, default_value_t = 2)]
    fail_first: u32,

    /// Only run what was restored from disk.
    #[arg(long)]
    restore_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Payload for Hello {
    const KIND: &'static str = "spool.hello.v1";

    fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: &Descriptor<Hello>, cx: &RunContext) -> Result<(), TaskError> {
        cx.checkpoint(task)?;
        sleep(Duration::from_millis(50)).await;
        cx.checkpoint(task)?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::failed(format!("intentional failure (left={left})")));
        }

        println!("Hello, {}! (attempt {})", task.payload().name, cx.attempt());
        Ok(())
    }
}

struct LogListener;

impl StoreListener for LogListener {
    fn on_restore_finished(&self, _finished_at: DateTime<Utc>, duration_ms: u64, restored: usize) {
        info!(restored, duration_ms, "restored from disk");
    }
}

impl ExecutorListener<Hello> for LogListener {
    fn on_finished(&self, task: &Descriptor<Hello>, outcome: &RunOutcome) {
        match outcome.error() {
            Some(err) => warn!(id = %task.id(), error = %err, "gave up"),
            None => info!(id = %task.id(), outcome = ?outcome.kind(), "done"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<SpoolConfig> {
    let mut cfg = match &args.config {
        Some(path) => SpoolConfig::load_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut cfg = SpoolConfig::default();
            cfg.apply_env(|key| std::env::var(key).ok());
            cfg
        }
    };
    if let Some(dir) = &args.dir {
        cfg.store.dir = dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_config(&args)?;

    let listener = Arc::new(LogListener);
    let store: Arc<DurableStore<Hello>> = StoreBuilder::from_config(&cfg.store)
        .listener(listener.clone())
        .open()
        .with_context(|| format!("opening store at {}", cfg.store.dir.display()))?;
    let restore_store = Arc::clone(&store);
    tokio::task::spawn_blocking(move || restore_store.wait_restored()).await?;

    let executor = ExecutorBuilder::from_config(Arc::clone(&store), &cfg.executor)
        .listener(listener)
        .spawn();
    let handler: Arc<dyn Handler<Hello>> = Arc::new(HelloHandler::new(args.fail_first));

    let restored = executor.restore_queue_by_restorer(|task| Some(Job::new(task, Arc::clone(&handler))))?;
    info!(restored, "resumed persisted tasks");

    if !args.restore_only {
        let ids = SequentialIdGenerator::after(store.find_by_min_max_id(false)?.map(|d| d.id()));
        for n in 0..args.tasks {
            let id = ids.next_id();
            let task = Descriptor::new(id, "hello", Hello { name: format!("task-{n}") });
            if !executor.enqueue(Job::new(Arc::new(task), Arc::clone(&handler))).await? {
                warn!(id = %id, "enqueue rejected");
            }
        }
    }

    tokio::select! {
        _ = executor.wait_idle() => {
            executor.shutdown(ShutdownPolicy::Graceful).await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; unfinished tasks stay on disk");
            executor.shutdown(ShutdownPolicy::Interrupt).await;
        }
    }

    println!("{}", serde_json::to_string(&executor.counts())?);
    info!(left_in_store = store.len(), "bye");
    store.release();
    Ok(())
}
