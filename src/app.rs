//! Terminal host for the sync core.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use casesync::binary::{AttachmentField, BinaryStore, CapturedFile};
use casesync::config::Config;
use casesync::db::Database;
use casesync::entities::CaseFields;
use casesync::mirror::{
  Customer, Employee, HttpDirectory, Item, MirrorCache, MirrorResource, MirrorResult,
  ResourceKind, SqliteCache,
};
use casesync::queue::LocalMutations;
use casesync::store::SqliteStore;
use casesync::sync::{
  probe_connectivity, ConnectivityWatcher, HttpRemote, RemoteApi, SyncOrchestrator, SyncSettings,
  TriggerOutcome,
};

/// What to do with a mirrored dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
  Load,
  Search,
  Refresh,
}

/// Components wired from one configuration
pub struct App {
  config: Config,
  cache: Arc<SqliteCache>,
  mutations: LocalMutations<SqliteStore>,
  remote: Arc<HttpRemote>,
  connectivity: ConnectivityWatcher,
  orchestrator: Arc<SyncOrchestrator<SqliteStore, HttpRemote>>,
  mirror: MirrorCache<SqliteCache, HttpDirectory>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(&config.database_path()?)?;
    let store = Arc::new(SqliteStore::new(db.clone()));

    let token = Config::get_api_token().ok();
    if token.is_none() {
      warn!("No API token set, requests are sent unauthenticated");
    }
    let remote = Arc::new(HttpRemote::new(
      &config.remote.base_url,
      token.clone(),
      config.sync.request_timeout(),
    )?);
    let directory = Arc::new(HttpDirectory::new(
      &config.remote.directory_url,
      token,
      config.mirror.page_size,
      config.mirror.fetch_timeout(),
    )?);

    let binaries = BinaryStore::new(Arc::clone(&store), config.binaries.clone());
    let mutations = LocalMutations::new(Arc::clone(&store), binaries.clone());
    // Offline until a probe or an explicit sync says otherwise
    let connectivity = ConnectivityWatcher::new(false);
    let orchestrator = Arc::new(SyncOrchestrator::new(
      Arc::clone(&store),
      binaries,
      Arc::clone(&remote),
      connectivity.clone(),
      SyncSettings::from(&config.sync),
    ));

    let cache = Arc::new(SqliteCache::new(db, config.mirror.max_entry_bytes));
    let mirror = MirrorCache::new(Arc::clone(&cache), directory, &config.mirror);

    Ok(Self {
      config,
      cache,
      mutations,
      remote,
      connectivity,
      orchestrator,
      mirror,
    })
  }

  pub fn status(&self) -> Result<()> {
    let snapshot = self.orchestrator.snapshot()?;
    println!("State:    {:?}", snapshot.state);
    println!(
      "Queue:    {} total, {} waiting, {} failed",
      snapshot.queue.total, snapshot.queue.waiting, snapshot.queue.failed
    );
    let b = &snapshot.binaries;
    println!(
      "Binaries: {} stored, {} bytes ({:.1}% of quota), {} pending, {} synced, {} error",
      b.count, b.total_bytes, b.usage_percent, b.pending, b.synced, b.error
    );
    for meta in &snapshot.metadata {
      let last = meta
        .last_sync_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
      println!(
        "  {:<16} {:?}, last sync {}{}",
        meta.class,
        meta.phase,
        last,
        meta
          .last_error
          .as_deref()
          .map(|e| format!(" ({})", e))
          .unwrap_or_default()
      );
    }
    Ok(())
  }

  pub fn new_case(&self, title: String, owner: String, summary: Option<String>) -> Result<()> {
    let case = self.mutations.create_case(CaseFields {
      title,
      owner,
      summary: summary.unwrap_or_default(),
      ..CaseFields::default()
    })?;
    println!("{}", case.id);
    Ok(())
  }

  pub fn attach(&self, case_id: &str, field: &str, file: &Path, mime: Option<&str>) -> Result<()> {
    let field: AttachmentField = field.parse()?;
    let captured = CapturedFile::from_path(file, mime)?;
    let (_, object) = self.mutations.attach(case_id, field, captured)?;
    println!(
      "{} {} ({} bytes, thumbnail: {})",
      object.id, object.file_name, object.size, object.has_thumbnail
    );
    Ok(())
  }

  /// One drain pass, if the remote answers.
  pub async fn sync(&self) -> Result<()> {
    if let Err(e) = self.remote.ping().await {
      println!("Remote unreachable, nothing sent: {}", e);
      return Ok(());
    }
    self.connectivity.set_online(true);

    match self.orchestrator.sync_now().await? {
      TriggerOutcome::Completed(report) => {
        println!(
          "Binaries: {} synced, {} failed",
          report.binaries_synced, report.binaries_failed
        );
        println!(
          "Changes:  {} synced, {} failed, {} deferred, {} need attention",
          report.changes_synced,
          report.changes_failed,
          report.changes_deferred,
          report.permanently_failed
        );
      }
      TriggerOutcome::AlreadyRunning => println!("A sync pass is already running"),
    }
    Ok(())
  }

  /// Sync in the background until Ctrl-C.
  pub async fn watch(&self) -> Result<()> {
    let probe = tokio::spawn(probe_connectivity(
      Arc::clone(&self.remote),
      self.connectivity.clone(),
      Duration::from_secs(self.config.sync.probe_interval_secs),
      self.config.sync.request_timeout(),
    ));
    self.orchestrator.start()?;
    info!("Watching for changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    self.orchestrator.stop().await?;
    probe.abort();
    Ok(())
  }

  pub fn failed(&self) -> Result<()> {
    let failed = self
      .orchestrator
      .queue()
      .permanently_failed(self.config.sync.max_retries)?;
    if failed.is_empty() {
      println!("No failed changes");
    }
    for change in failed {
      println!(
        "{}  {} {} {}  after {} attempts: {}",
        change.id,
        change.payload.operation().as_str(),
        change.payload.entity().as_str(),
        change.payload.target_id(),
        change.retry_count,
        change.last_error.as_deref().unwrap_or("-")
      );
    }
    Ok(())
  }

  pub fn retry(&self, change_id: &str) -> Result<()> {
    let change = self.orchestrator.retry_change(change_id)?;
    println!("{} queued for another attempt", change.id);
    Ok(())
  }

  pub fn discard(&self, case_id: &str) -> Result<()> {
    if !self.mutations.discard_case(case_id)? {
      return Err(eyre!(
        "Case {} already exists on the server; delete it instead",
        case_id
      ));
    }
    println!("Discarded {}", case_id);
    Ok(())
  }

  pub async fn mirror(&self, action: MirrorAction, resource: &str, query: &str) -> Result<()> {
    if resource == "all" && action == MirrorAction::Refresh {
      let (customers, items, employees) = futures::try_join!(
        self.mirror.refresh::<Customer>(),
        self.mirror.refresh::<Item>(),
        self.mirror.refresh::<Employee>()
      )?;
      summarize(&customers);
      summarize(&items);
      summarize(&employees);
      return Ok(());
    }

    match resource.parse::<ResourceKind>()? {
      ResourceKind::Customers => self.mirror_as::<Customer>(action, query).await,
      ResourceKind::Items => self.mirror_as::<Item>(action, query).await,
      ResourceKind::Employees => self.mirror_as::<Employee>(action, query).await,
    }
  }

  async fn mirror_as<T: MirrorResource>(&self, action: MirrorAction, query: &str) -> Result<()> {
    let result = match action {
      MirrorAction::Load => self.mirror.load::<T>().await?,
      MirrorAction::Search => self.mirror.search::<T>(query).await?,
      MirrorAction::Refresh => self.mirror.refresh::<T>().await?,
    };
    for item in &result.items {
      println!("{}", serde_json::to_string(item)?);
    }
    summarize(&result);
    Ok(())
  }

  pub fn purge_cache(&self) -> Result<()> {
    let removed = self.cache.purge_expired()?;
    println!("Removed {} expired cache entries", removed);
    Ok(())
  }
}

fn summarize<T: MirrorResource>(result: &MirrorResult<T>) {
  eprintln!(
    "{} {} from {:?}",
    result.items.len(),
    T::resource(),
    result.source
  );
}
