//! CLI for wartlern.
//!
//! Every subcommand opens the decision engine on a file-backed knowledge
//! store, performs one operation, prints the result as JSON on stdout and
//! flushes the knowledge before exiting. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use wartlern_core::{OutcomeRecord, Priority, Technician, WorkContext, WorkItem};
use wartlern_engine::{
    DecisionEngine, EngineConfig, EngineError, TrainingCoordinator, TrainingSession,
    TrainingStatus,
};
use wartlern_policy::FileBackend;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "wartlern.json")]
    config: PathBuf,

    /// Directory holding the persisted knowledge
    #[arg(long, global = true, env = "WARTLERN_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct ContextArgs {
    /// Equipment category, e.g. ELEC
    #[arg(long)]
    category: Option<String>,

    /// Work type, e.g. correctivo
    #[arg(long = "type")]
    work_type: Option<String>,

    /// Priority already recorded on the work (LOW, MEDIUM, HIGH, baja, media, alta)
    #[arg(long = "current-priority")]
    priority: Option<Priority>,
}

impl ContextArgs {
    fn into_context(self) -> Option<WorkContext> {
        if self.category.is_none() && self.work_type.is_none() && self.priority.is_none() {
            return None;
        }
        Some(WorkContext {
            category: self.category,
            work_type: self.work_type,
            priority: self.priority,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decide the priority of a work description
    Priority {
        /// Free-text description
        text: String,

        #[command(flatten)]
        context: ContextArgs,
    },
    /// Pick a technician for a work item
    Assign {
        /// JSON file with one work item or an array of them
        #[arg(long)]
        work: PathBuf,

        /// Work item id to pick from an array
        #[arg(long)]
        id: Option<String>,

        /// JSON file with an array of candidate technicians
        #[arg(long)]
        technicians: PathBuf,
    },
    /// Learn from the outcome of an assigned work item
    ///
    /// The reported running accuracy covers this invocation only.
    Learn {
        #[arg(long)]
        work: PathBuf,

        #[arg(long)]
        id: Option<String>,

        /// JSON file with the outcome record
        #[arg(long)]
        outcome: PathBuf,
    },
    /// Reinforce a priority choice for a context
    LearnPriority {
        /// The priority that was chosen
        #[arg(long)]
        chosen: Priority,

        #[command(flatten)]
        context: ContextArgs,

        #[arg(long)]
        outcome: PathBuf,
    },
    /// Learn from text documents gathered about a topic
    LearnTopic {
        topic: String,

        /// Files whose contents are learned, one document each
        #[arg(required = true)]
        documents: Vec<PathBuf>,
    },
    /// Show knowledge and learning statistics
    ///
    /// Only the learned knowledge is persisted. Decision counters and the
    /// running accuracy cover the current process, so a fresh invocation
    /// reports them as zero.
    Stats,
    /// Forget all learned knowledge
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Train the priority classifier and wait for it to finish
    Train {
        #[arg(long, default_value = "10")]
        epochs: u32,

        #[arg(long, default_value = "1000")]
        samples: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize result")?
    );
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {what} from {path:?}"))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid {what} in {path:?}"))
}

/// Reads a single work item, or the one with `id` from an array.
fn load_work_item(path: &Path, id: Option<&str>) -> Result<WorkItem> {
    let value: serde_json::Value = read_json(path, "work items")?;
    let items: Vec<WorkItem> = if value.is_array() {
        serde_json::from_value(value).with_context(|| format!("Invalid work items in {path:?}"))?
    } else {
        vec![serde_json::from_value(value).with_context(|| format!("Invalid work item in {path:?}"))?]
    };
    select_work_item(items, id)
}

fn select_work_item(items: Vec<WorkItem>, id: Option<&str>) -> Result<WorkItem> {
    match id {
        Some(id) => items
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("work item {id}")).into()),
        None => {
            let count = items.len();
            let mut items = items.into_iter();
            match (items.next(), count) {
                (Some(item), 1) => Ok(item),
                (None, _) => Err(EngineError::NotFound("no work item in input".to_string()).into()),
                _ => Err(EngineError::InvalidInput(format!(
                    "{count} work items given, select one with --id"
                ))
                .into()),
            }
        }
    }
}

async fn open_engine(config: &EngineConfig, data_dir: &Path) -> Result<DecisionEngine> {
    let backend = Arc::new(FileBackend::new(data_dir));
    DecisionEngine::open(config, backend)
        .await
        .with_context(|| format!("Failed to open knowledge in {data_dir:?}"))
}

/// Runs `op` against the engine, then flushes. A failed flush is reported
/// but does not hide the result the operation already produced.
async fn with_engine<T, F>(config: &EngineConfig, data_dir: &Path, op: F) -> Result<T>
where
    F: FnOnce(&DecisionEngine) -> Result<T>,
{
    let engine = open_engine(config, data_dir).await?;
    let result = op(&engine);
    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "knowledge could not be persisted");
    }
    result
}

async fn run_training(config: &EngineConfig, epochs: u32, samples: usize) -> Result<TrainingSession> {
    let coordinator = TrainingCoordinator::new(config.training.clone());
    let mut updates = coordinator.subscribe();
    coordinator.start(epochs, samples)?;

    let mut printed = 0;
    let mut interrupted = false;
    loop {
        let session = updates.borrow_and_update().clone();
        for line in session.logs.iter().skip(printed) {
            eprintln!("{line}");
        }
        printed = session.logs.len();
        if !session.status.is_active() {
            return Ok(session);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(coordinator.status());
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                let status = coordinator.stop();
                debug!(?status, "interrupt received");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::from_path(&cli.config)
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Priority { text, context } => {
            let context = context.into_context();
            let decision = with_engine(&config, &data_dir, |engine| {
                Ok(engine.priority_decision(&text, context.as_ref()))
            })
            .await?;
            print_json(&decision)?;
        }
        Commands::Assign {
            work,
            id,
            technicians,
        } => {
            let item = load_work_item(&work, id.as_deref())?;
            let pool: Vec<Technician> = read_json(&technicians, "technicians")?;
            let decision = with_engine(&config, &data_dir, |engine| {
                Ok(engine.decide_technician(&item, &pool)?)
            })
            .await?;
            print_json(&decision)?;
        }
        Commands::Learn { work, id, outcome } => {
            let item = load_work_item(&work, id.as_deref())?;
            let outcome: OutcomeRecord = read_json(&outcome, "outcome")?;
            let result = with_engine(&config, &data_dir, |engine| {
                Ok(engine.learn_from_outcome(&item, &outcome)?)
            })
            .await?;
            print_json(&result)?;
        }
        Commands::LearnPriority {
            chosen,
            context,
            outcome,
        } => {
            let context = context.into_context().unwrap_or_default();
            let outcome: OutcomeRecord = read_json(&outcome, "outcome")?;
            let result = with_engine(&config, &data_dir, |engine| {
                Ok(engine.learn_priority(&context, chosen, &outcome)?)
            })
            .await?;
            print_json(&result)?;
        }
        Commands::LearnTopic { topic, documents } => {
            let texts = documents
                .iter()
                .map(|p| std::fs::read_to_string(p).with_context(|| format!("Failed to read {p:?}")))
                .collect::<Result<Vec<_>>>()?;
            let result = with_engine(&config, &data_dir, |engine| {
                Ok(engine.learn_from_documents(&topic, &texts)?)
            })
            .await?;
            print_json(&result)?;
        }
        Commands::Stats => {
            let stats = with_engine(&config, &data_dir, |engine| Ok(engine.statistics())).await?;
            print_json(&stats)?;
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("Refusing to reset knowledge without --yes");
            }
            let summary = with_engine(&config, &data_dir, |engine| Ok(engine.reset_knowledge())).await?;
            print_json(&summary)?;
        }
        Commands::Train { epochs, samples } => {
            let session = run_training(&config, epochs, samples).await?;
            print_json(&session)?;
            if session.status == TrainingStatus::Error {
                anyhow::bail!(
                    "Training failed: {}",
                    session.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    Ok(())
}
