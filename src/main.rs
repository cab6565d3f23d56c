mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use app::{App, MirrorAction};
use casesync::config::Config;

#[derive(Parser, Debug)]
#[command(name = "casesync")]
#[command(about = "Offline-first sync for case study drafts")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/casesync/config.yaml)
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
  /// Queue, binary and per-class sync status
  Status,
  /// Local case studies
  #[command(subcommand)]
  Case(CaseCommand),
  /// Capture a file for a case (field: images or supportingDocs)
  Attach {
    case_id: String,
    field: String,
    file: PathBuf,
    /// Mime type, guessed from the extension when omitted
    #[arg(long)]
    mime: Option<String>,
  },
  /// Run one drain pass now
  Sync,
  /// Keep syncing on a timer and when connectivity returns
  Watch,
  /// Changes that reached the retry ceiling
  Failed,
  /// Reset a failed change so it is attempted again
  Retry { change_id: String },
  /// Drop a draft that never reached the server
  Discard { case_id: String },
  /// Upstream directory mirror
  #[command(subcommand)]
  Mirror(MirrorCommand),
  /// Delete expired mirror cache entries
  PurgeCache,
}

#[derive(Subcommand, Debug)]
enum CaseCommand {
  /// Create a draft case
  New {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    owner: String,
    #[arg(long)]
    summary: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum MirrorCommand {
  /// Print a dataset (customers, items, employees)
  Load { resource: String },
  /// Case-insensitive search over a dataset
  Search { resource: String, query: String },
  /// Refetch a dataset, or "all"
  Refresh { resource: String },
}

/// File logging under the data directory, plus stderr when verbose.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)?;
  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "casesync.log"));

  let filter = EnvFilter::try_from_env("CASESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let app = App::new(config)?;

  match args.command {
    Command::Status => app.status(),
    Command::Case(CaseCommand::New {
      title,
      owner,
      summary,
    }) => app.new_case(title, owner, summary),
    Command::Attach {
      case_id,
      field,
      file,
      mime,
    } => app.attach(&case_id, &field, &file, mime.as_deref()),
    Command::Sync => app.sync().await,
    Command::Watch => app.watch().await,
    Command::Failed => app.failed(),
    Command::Retry { change_id } => app.retry(&change_id),
    Command::Discard { case_id } => app.discard(&case_id),
    Command::Mirror(MirrorCommand::Load { resource }) => {
      app.mirror(MirrorAction::Load, &resource, "").await
    }
    Command::Mirror(MirrorCommand::Search { resource, query }) => {
      app.mirror(MirrorAction::Search, &resource, &query).await
    }
    Command::Mirror(MirrorCommand::Refresh { resource }) => {
      app.mirror(MirrorAction::Refresh, &resource, "").await
    }
    Command::PurgeCache => app.purge_cache(),
  }
}
