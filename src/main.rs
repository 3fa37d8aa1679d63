use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use courier_sync::config::Config;
use courier_sync::data::{DataLayer, SubmitOutcome};
use courier_sync::offline::{MutationInput, MutationOp};
use courier_sync::sync::StaticConnectivity;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "courier-sync")]
#[command(about = "Inspect and drive the courier app's offline data layer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/courier-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Offline mutation queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Cached pages and settings
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Read one page of a collection through the cache
  Fetch {
    /// Cache namespace, e.g. orders_u1
    collection: String,
    /// Remote endpoint, e.g. packages
    endpoint: String,
    #[arg(short, long, default_value_t = 1)]
    page: u32,
    /// Print every cached page instead of fetching one
    #[arg(long)]
    cached: bool,
  },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// Print pending mutations in replay order
  List,
  /// Send pending mutations to the remote
  Replay,
  /// Give up on a pending mutation, e.g. one the remote keeps rejecting
  Remove {
    /// Mutation id as shown by `queue list`
    id: String,
  },
  /// Submit a write, queueing it if the remote is unreachable
  Add {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    target: String,
    #[arg(long, value_enum)]
    op: OpArg,
    /// JSON object with the fields to write
    #[arg(long, default_value = "{}")]
    payload: String,
    /// Queue without trying the remote
    #[arg(long)]
    offline: bool,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop cached settings and the pages of the given collections
  Clear {
    /// Collections whose pages should be dropped, e.g. orders_u1
    collections: Vec<String>,
  },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OpArg {
  StatusUpdate,
  Create,
  Update,
  Delete,
}

impl From<OpArg> for MutationOp {
  fn from(op: OpArg) -> Self {
    match op {
      OpArg::StatusUpdate => MutationOp::StatusUpdate,
      OpArg::Create => MutationOp::Create,
      OpArg::Update => MutationOp::Update,
      OpArg::Delete => MutationOp::Delete,
    }
  }
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("courier-sync")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "courier-sync.log"));

  let filter =
    EnvFilter::try_from_env("COURIER_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .with(stderr)
    .init();

  Ok(guard)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let layer = DataLayer::open(&config)?;

  match args.command {
    Command::Queue { action } => match action {
      QueueAction::List => print_json(&layer.offline.list().await)?,
      QueueAction::Replay => {
        let report = layer
          .replayer(Arc::new(StaticConnectivity::new(true)))
          .replay()
          .await;
        println!(
          "replayed {}, remaining {}",
          report.replayed, report.remaining
        );
        if let Some(id) = report.rejected {
          println!(
            "rejected {}: fix the cause and replay, or drop it with `queue remove {}`",
            id, id
          );
        }
      }
      QueueAction::Remove { id } => {
        if layer.offline.remove(&id).await {
          println!("removed {}", id);
        } else {
          return Err(eyre!("No pending mutation with id {}", id));
        }
      }
      QueueAction::Add {
        resource,
        target,
        op,
        payload,
        offline,
      } => {
        let payload: Map<String, Value> = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Payload must be a JSON object: {}", e))?;
        let input = MutationInput {
          resource,
          target_id: target,
          operation: op.into(),
          payload,
        };
        match layer.submit(input, !offline).await? {
          SubmitOutcome::Sent(value) => print_json(&value)?,
          SubmitOutcome::Queued(id) => println!("queued {}", id),
        }
      }
    },
    Command::Cache {
      action: CacheAction::Clear { collections },
    } => {
      layer.clear_caches(&collections).await;
      println!("cleared {} collection(s) and settings", collections.len());
    }
    Command::Fetch {
      collection,
      endpoint,
      page,
      cached,
    } => {
      if cached {
        print_json(&layer.orders.cached_items(&collection).await)?;
      } else {
        print_json(&layer.fetch_page(&collection, &endpoint, page).await?)?;
      }
    }
  }

  Ok(())
}
