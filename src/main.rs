use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rill_config::{DataBackend, EngineConfig, HopPolicy, StateBackend, StoreConfig};
use rill_engine::{Engine, Invocation, LocalInvoker, Stores};
use rill_workflow::RequestState;

mod demo;

/// Rill - A DAG workflow engine for chains of stateless functions
#[derive(Parser)]
#[command(name = "rill")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.rill)
  #[arg(long, global = true, env = "RILL_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Keep progress and payloads in memory only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// When a step hands control back to the invoker
  #[arg(long, global = true, value_enum, default_value_t = Hops::Inline, env = "RILL_HOP_POLICY")]
  hops: Hops,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Hops {
  /// Run every ready node inside one step
  Inline,
  /// Return a hop after every node
  PerNode,
}

impl From<Hops> for HopPolicy {
  fn from(hops: Hops) -> Self {
    match hops {
      Hops::Inline => HopPolicy::Inline,
      Hops::PerNode => HopPolicy::PerNode,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Run the demo workflow with a payload read from stdin
  Run {
    /// Conditional branch to take; repeat for several
    #[arg(long = "condition", default_values_t = demo::CONDITIONS.map(String::from))]
    conditions: Vec<String>,

    /// Request id to use instead of a generated one
    #[arg(long)]
    request_id: Option<String>,
  },

  /// Print the progress record of a request
  Status { request_id: String },

  /// Mark a running request as failed
  Cancel {
    request_id: String,

    #[arg(long, default_value = "cancelled from the command line")]
    reason: String,
  },

  /// Delete everything stored for a request
  Purge { request_id: String },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rill=info,rill_engine=info,warn")),
    )
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".rill"),
  };

  let Some(command) = cli.command else {
    println!("rill - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let stores = open_stores(&data_dir, cli.ephemeral).await?;
    let config = EngineConfig {
      hop_policy: cli.hops.into(),
      ..EngineConfig::default()
    };

    match command {
      Commands::Run {
        conditions,
        request_id,
      } => run_workflow(stores, config, conditions, request_id).await,
      Commands::Status { request_id } => {
        let engine = demo_engine(stores, config, Vec::new())?;
        let progress = engine.progress(&request_id).await?;
        println!("{}", serde_json::to_string_pretty(&progress)?);
        Ok(())
      }
      Commands::Cancel { request_id, reason } => {
        let engine = demo_engine(stores, config, Vec::new())?;
        let state = engine.cancel(&request_id, &reason).await?;
        eprintln!("Request {request_id} is {state:?}");
        Ok(())
      }
      Commands::Purge { request_id } => {
        let engine = demo_engine(stores, config, Vec::new())?;
        engine.purge(&request_id).await?;
        eprintln!("Purged request {request_id}");
        Ok(())
      }
    }
  })
}

async fn open_stores(data_dir: &Path, ephemeral: bool) -> Result<Stores> {
  let config = if ephemeral {
    StoreConfig::default()
  } else {
    tokio::fs::create_dir_all(data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    StoreConfig {
      state: StateBackend::Sqlite {
        url: format!("sqlite://{}", data_dir.join("state.db").display()),
      },
      data: DataBackend::Fs {
        path: data_dir.join("payloads"),
      },
    }
  };

  Stores::open(&config).await.context("failed to open stores")
}

fn demo_engine(stores: Stores, config: EngineConfig, conditions: Vec<String>) -> Result<Engine> {
  let dag = demo::workflow(conditions).context("invalid workflow definition")?;
  Engine::new(dag, stores.state, stores.data, config).context("failed to create engine")
}

async fn run_workflow(
  stores: Stores,
  config: EngineConfig,
  conditions: Vec<String>,
  request_id: Option<String>,
) -> Result<()> {
  let payload = read_payload_from_stdin()?;
  let engine = demo_engine(stores, config, conditions)?;

  let mut invocation = Invocation::start(payload);
  if let Some(request_id) = request_id {
    invocation.request_id = request_id;
  }
  let request_id = invocation.request_id.clone();
  info!(request_id, "request_submitted");

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      on_signal.cancel();
    }
  });

  let invoker = LocalInvoker::new(engine);
  let progress = invoker
    .execute_once(invocation, cancel)
    .await
    .context("workflow execution failed")?;

  match progress.state {
    RequestState::Completed => {
      let output = invoker
        .engine()
        .result(&request_id)
        .await?
        .context("completed request has no result")?;
      eprintln!("Execution completed: {request_id}");
      println!("{}", String::from_utf8_lossy(&output));
      Ok(())
    }
    RequestState::Failed => bail!(
      "request {request_id} failed: {}",
      progress.last_error.as_deref().unwrap_or("unknown error")
    ),
    state => bail!("request {request_id} stopped while {state:?}"),
  }
}

fn read_payload_from_stdin() -> Result<Bytes> {
  if io::stdin().is_terminal() {
    return Ok(Bytes::new());
  }

  let mut input = Vec::new();
  io::stdin()
    .read_to_end(&mut input)
    .context("failed to read payload from stdin")?;
  Ok(Bytes::from(input))
}
