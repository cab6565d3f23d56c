//! Drains the pending change queue against the remote system.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectivityWatcher;
use super::metadata::{MetadataStore, SyncClass, SyncMetadata};
use super::remote::{BinaryUpload, PushOutcome, RemoteApi};
use super::retry::RetryPolicy;
use crate::binary::{BinaryStats, BinaryStore, BinarySyncStatus};
use crate::config::SyncConfig;
use crate::entities::{
  AttachmentRef, CaseStudy, EntityKind, EntitySyncStatus, LocalComment, LocalEntity,
  SavedReference,
};
use crate::error::{Error, RemoteError, Result};
use crate::queue::{ChangePayload, ChangeQueue, EntityChange, Operation, PendingChange, QueueStats};
use crate::store::{DocumentStore, WriteOp};

/// Observable orchestrator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
  #[default]
  Idle,
  Syncing,
  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
  Timer,
  ConnectivityRestored,
  Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
  Completed(SyncReport),
  /// Another pass was in flight; this trigger was dropped
  AlreadyRunning,
}

/// Aggregate counts from one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub binaries_synced: usize,
  pub binaries_failed: usize,
  pub changes_synced: usize,
  pub changes_failed: usize,
  /// Waiting on an attachment upload or an earlier change for the same entity
  pub changes_deferred: usize,
  /// Skipped because the retry ceiling was reached
  pub permanently_failed: usize,
}

impl SyncReport {
  pub fn has_errors(&self) -> bool {
    self.binaries_failed > 0 || self.changes_failed > 0 || self.permanently_failed > 0
  }
}

/// Everything the host UI needs to render sync status
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
  pub state: OrchestratorState,
  pub online: bool,
  pub queue: QueueStats,
  pub binaries: BinaryStats,
  pub metadata: Vec<SyncMetadata>,
  pub failed: Vec<PendingChange>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
  pub policy: RetryPolicy,
  /// Timer period while online
  pub interval: Duration,
  /// Upper bound for every remote call
  pub request_timeout: Duration,
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      policy: RetryPolicy::new(config.max_retries, config.fail_fast_on_rejection),
      interval: config.interval(),
      request_timeout: config.request_timeout(),
    }
  }
}

enum Resolution {
  Ready(ChangePayload),
  /// A referenced binary has not been uploaded yet
  Waiting(String),
  /// A referenced binary can never be uploaded
  Unavailable(String),
}

/// Releases the single-flight flag when a pass ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| FlightGuard(flag))
  }
}

impl Drop for FlightGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

#[derive(Default)]
struct PassErrors(HashMap<SyncClass, Vec<String>>);

impl PassErrors {
  fn push(&mut self, class: SyncClass, message: String) {
    self.0.entry(class).or_default().push(message);
  }

  fn summary(&mut self, class: SyncClass) -> Option<String> {
    let messages = self.0.remove(&class)?;
    Some(format!("{} failed: {}", messages.len(), messages.join("; ")))
  }
}

/// Sync service built from injected store, remote API and connectivity signal.
///
/// At most one drain pass runs at a time. `start` spawns the trigger loop
/// (timer while online, connectivity restored); `sync_now` is the manual
/// trigger.
pub struct SyncOrchestrator<S: DocumentStore + 'static, R: RemoteApi + 'static> {
  store: Arc<S>,
  binaries: BinaryStore<S>,
  queue: ChangeQueue<S>,
  metadata: MetadataStore<S>,
  remote: Arc<R>,
  connectivity: ConnectivityWatcher,
  settings: SyncSettings,
  in_flight: AtomicBool,
  state: Mutex<OrchestratorState>,
  shutdown: Notify,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DocumentStore + 'static, R: RemoteApi + 'static> SyncOrchestrator<S, R> {
  pub fn new(
    store: Arc<S>,
    binaries: BinaryStore<S>,
    remote: Arc<R>,
    connectivity: ConnectivityWatcher,
    settings: SyncSettings,
  ) -> Self {
    Self {
      queue: ChangeQueue::new(Arc::clone(&store)),
      metadata: MetadataStore::new(Arc::clone(&store)),
      store,
      binaries,
      remote,
      connectivity,
      settings,
      in_flight: AtomicBool::new(false),
      state: Mutex::new(OrchestratorState::Idle),
      shutdown: Notify::new(),
      task: Mutex::new(None),
    }
  }

  pub fn queue(&self) -> &ChangeQueue<S> {
    &self.queue
  }

  pub fn state(&self) -> OrchestratorState {
    self.state.lock().map(|s| *s).unwrap_or(OrchestratorState::Error)
  }

  pub fn is_syncing(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  pub fn snapshot(&self) -> Result<SyncSnapshot> {
    let max = self.settings.policy.max_attempts;
    Ok(SyncSnapshot {
      state: self.state(),
      online: self.connectivity.is_online(),
      queue: self.queue.stats(max)?,
      binaries: self.binaries.stats()?,
      metadata: self.metadata.all()?,
      failed: self.queue.permanently_failed(max)?,
    })
  }

  /// Spawn the trigger loop. Calling it again while running is a no-op.
  pub fn start(self: &Arc<Self>) -> Result<()> {
    let mut task = self.task.lock()?;
    if task.is_some() {
      return Ok(());
    }
    let this = Arc::clone(self);
    *task = Some(tokio::spawn(async move { this.run_loop().await }));
    Ok(())
  }

  /// Stop the trigger loop, letting a running pass finish first.
  pub async fn stop(&self) -> Result<()> {
    let handle = self.task.lock()?.take();
    if let Some(handle) = handle {
      self.shutdown.notify_one();
      if let Err(e) = handle.await {
        warn!("Sync loop ended abnormally: {}", e);
      }
    }
    Ok(())
  }

  /// Put a change that hit the retry ceiling back in play.
  ///
  /// Failed uploads it references get a fresh budget too, otherwise the
  /// change would fail again on the missing attachment.
  pub fn retry_change(&self, id: &str) -> Result<PendingChange> {
    let change = self
      .queue
      .get(id)?
      .ok_or_else(|| Error::NotFound(format!("pending change {}", id)))?;
    for binary_id in change.payload.local_attachment_ids() {
      self.binaries.reset_failed(&binary_id)?;
    }
    self.queue.retry(id)
  }

  /// Explicit request from the host.
  pub async fn sync_now(&self) -> Result<TriggerOutcome> {
    self.trigger(TriggerSource::Manual).await
  }

  async fn run_loop(self: Arc<Self>) {
    let mut online = self.connectivity.subscribe();
    let mut ticker = tokio::time::interval(self.settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Sync loop started (every {}s)", self.settings.interval.as_secs());

    loop {
      tokio::select! {
        _ = self.shutdown.notified() => break,
        _ = ticker.tick() => {
          if self.connectivity.is_online() {
            self.run_trigger(TriggerSource::Timer).await;
          }
        }
        changed = online.changed() => {
          if changed.is_err() {
            break;
          }
          let is_online = *online.borrow_and_update();
          if is_online {
            self.run_trigger(TriggerSource::ConnectivityRestored).await;
          }
        }
      }
    }

    info!("Sync loop stopped");
  }

  async fn run_trigger(&self, source: TriggerSource) {
    if let Err(e) = self.trigger(source).await {
      error!("Drain pass failed: {}", e);
    }
  }

  async fn trigger(&self, source: TriggerSource) -> Result<TriggerOutcome> {
    let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
      debug!("Sync trigger {:?} dropped, a pass is already running", source);
      return Ok(TriggerOutcome::AlreadyRunning);
    };

    self.set_state(OrchestratorState::Syncing);
    debug!("Drain pass started by {:?}", source);

    match self.drain().await {
      Ok(report) => {
        self.set_state(if report.has_errors() {
          OrchestratorState::Error
        } else {
          OrchestratorState::Idle
        });
        info!(
          "Drain pass done: {} binaries and {} changes synced, {} failed, {} deferred, {} need attention",
          report.binaries_synced,
          report.changes_synced,
          report.binaries_failed + report.changes_failed,
          report.changes_deferred,
          report.permanently_failed
        );
        Ok(TriggerOutcome::Completed(report))
      }
      Err(e) => {
        self.set_state(OrchestratorState::Error);
        Err(e)
      }
    }
  }

  fn set_state(&self, state: OrchestratorState) {
    if let Ok(mut current) = self.state.lock() {
      *current = state;
    }
  }

  async fn drain(&self) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let mut errors = PassErrors::default();
    for class in SyncClass::all() {
      self.metadata.begin(class)?;
    }

    self.sync_binaries(&mut report, &mut errors).await?;
    self.sync_changes(&mut report, &mut errors).await?;

    for class in SyncClass::all() {
      self.metadata.finish(class, errors.summary(class))?;
    }
    Ok(report)
  }

  /// Bound a remote call by the request timeout.
  async fn call<T, F>(&self, fut: F) -> std::result::Result<T, RemoteError>
  where
    F: Future<Output = std::result::Result<T, RemoteError>>,
  {
    let limit = self.settings.request_timeout;
    match tokio::time::timeout(limit, fut).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::timeout(limit)),
    }
  }

  async fn sync_binaries(&self, report: &mut SyncReport, errors: &mut PassErrors) -> Result<()> {
    let interrupted = self.binaries.reset_interrupted()?;
    if interrupted > 0 {
      debug!("Re-queued {} interrupted uploads", interrupted);
    }

    for object in self.binaries.pending_uploads(self.settings.policy.max_attempts)? {
      self.binaries.mark_uploading(&object.id)?;

      let Some(file) = self.binaries.load(&object.id)? else {
        // Payload row lost; nothing left to upload
        let message = format!("Payload for {} is missing", object.file_name);
        self
          .binaries
          .mark_failed(&object.id, &message, self.settings.policy.max_attempts)?;
        report.binaries_failed += 1;
        errors.push(SyncClass::Binaries, message);
        continue;
      };

      let upload = BinaryUpload {
        binary_id: object.id.clone(),
        field_name: object.field_name.as_str().to_string(),
        file_name: file.file_name,
        mime_type: file.mime_type,
        bytes: file.bytes,
      };

      match self.call(self.remote.upload_binary(upload)).await {
        Ok(url) => {
          debug!("Uploaded {} to {}", object.file_name, url);
          self.binaries.mark_synced(&object.id, &url)?;
          report.binaries_synced += 1;
        }
        Err(e) => {
          let retry_count = self.settings.policy.after_failure(object.retry_count, &e);
          warn!(
            "Upload of {} failed (attempt {}): {}",
            object.file_name, retry_count, e
          );
          self.binaries.mark_failed(&object.id, &e.message, retry_count)?;
          report.binaries_failed += 1;
          errors.push(SyncClass::Binaries, format!("{}: {}", object.file_name, e));
        }
      }
    }
    Ok(())
  }

  async fn sync_changes(&self, report: &mut SyncReport, errors: &mut PassErrors) -> Result<()> {
    let policy = self.settings.policy;
    // Entities with an earlier change still outstanding this pass
    let mut blocked: HashSet<String> = HashSet::new();
    let ids: Vec<String> = self.queue.list()?.into_iter().map(|c| c.id).collect();

    for id in ids {
      // Re-read: an earlier confirmation may have remapped this payload
      let Some(change) = self.queue.get(&id)? else {
        continue;
      };
      let class = SyncClass::Entity(change.payload.entity());
      let target = change.payload.target_id().to_string();

      if policy.is_exhausted(change.retry_count) {
        report.permanently_failed += 1;
        errors.push(
          class,
          format!(
            "{} {} needs attention: {}",
            change.payload.operation().as_str(),
            target,
            change.last_error.as_deref().unwrap_or("unknown error")
          ),
        );
        blocked.insert(target);
        continue;
      }

      if blocked.iter().any(|b| change.payload.references(b)) {
        report.changes_deferred += 1;
        blocked.insert(target);
        continue;
      }

      let payload = match self.resolve_attachments(&change.payload)? {
        Resolution::Ready(payload) => payload,
        Resolution::Waiting(binary_id) => {
          debug!("Change {} waits for binary {}", change.id, binary_id);
          report.changes_deferred += 1;
          blocked.insert(target);
          continue;
        }
        Resolution::Unavailable(message) => {
          self.fail_change(&change, RemoteError::rejected(message), report, errors)?;
          blocked.insert(target);
          continue;
        }
      };

      match self.call(self.remote.push_change(&payload)).await {
        Ok(outcome) => {
          self.confirm(&change, payload, outcome)?;
          report.changes_synced += 1;
        }
        Err(e) => {
          self.fail_change(&change, e, report, errors)?;
          blocked.insert(target);
        }
      }
    }
    Ok(())
  }

  /// Swap local attachment references for the uploaded URLs.
  fn resolve_attachments(&self, payload: &ChangePayload) -> Result<Resolution> {
    let mut resolved = payload.clone();
    for attachment in resolved.attachments_mut() {
      let Some(binary_id) = attachment.local_id().map(String::from) else {
        continue;
      };
      let object = match self.binaries.get(&binary_id)? {
        Some(object) => object,
        None => {
          return Ok(Resolution::Unavailable(format!(
            "Attachment {} is missing",
            binary_id
          )))
        }
      };
      match (object.sync_status, object.remote_url) {
        (BinarySyncStatus::Synced, Some(url)) => {
          *attachment = AttachmentRef::Remote {
            url,
            file_name: object.file_name,
            mime_type: object.mime_type,
          };
        }
        (BinarySyncStatus::Error, _) if self.settings.policy.is_exhausted(object.retry_count) => {
          return Ok(Resolution::Unavailable(format!(
            "Attachment {} failed to upload: {}",
            object.file_name,
            object.last_error.as_deref().unwrap_or("unknown error")
          )));
        }
        _ => return Ok(Resolution::Waiting(binary_id)),
      }
    }
    Ok(Resolution::Ready(resolved))
  }

  fn fail_change(
    &self,
    change: &PendingChange,
    error: RemoteError,
    report: &mut SyncReport,
    errors: &mut PassErrors,
  ) -> Result<()> {
    let retry_count = self.settings.policy.after_failure(change.retry_count, &error);
    let op = change.payload.operation().as_str();
    let target = change.payload.target_id();
    warn!("Sync of {} {} failed (attempt {}): {}", op, target, retry_count, error);

    self.queue.record_failure(&change.id, &error.message, retry_count)?;
    match change.payload.entity() {
      EntityKind::Case => self.mark_failed::<CaseStudy>(target)?,
      EntityKind::Comment => self.mark_failed::<LocalComment>(target)?,
      EntityKind::SavedReference => self.mark_failed::<SavedReference>(target)?,
    }

    report.changes_failed += 1;
    errors.push(
      SyncClass::Entity(change.payload.entity()),
      format!("{} {}: {}", op, target, error),
    );
    Ok(())
  }

  fn mark_failed<T: LocalEntity>(&self, id: &str) -> Result<()> {
    if let Some(mut record) = self.store.get::<T>(id)? {
      record.sync_state_mut().status = EntitySyncStatus::Error;
      self.store.put(&record)?;
      debug!("Marked {} {} as failed", T::kind().as_str(), id);
    }
    Ok(())
  }

  /// Apply a confirmed change locally.
  ///
  /// The change removal, the re-keyed record and every id remap commit in
  /// one batch, so a crash leaves the change queued against the old id.
  fn confirm(&self, change: &PendingChange, sent: ChangePayload, outcome: PushOutcome) -> Result<()> {
    let target = sent.target_id().to_string();
    let entity_id = match (sent.operation(), outcome.remote_id) {
      (Operation::Create, Some(remote_id)) => remote_id,
      _ => target.clone(),
    };
    let more_pending = self
      .queue
      .changes_for(&target)?
      .iter()
      .any(|c| c.id != change.id);

    let mut ops = vec![WriteOp::delete::<PendingChange>(&change.id)];
    match &sent {
      ChangePayload::Case(c) => {
        self.confirmed_writes::<CaseStudy>(c, &entity_id, more_pending, &mut ops)?
      }
      ChangePayload::Comment(c) => {
        self.confirmed_writes::<LocalComment>(c, &entity_id, more_pending, &mut ops)?
      }
      ChangePayload::SavedReference(c) => {
        self.confirmed_writes::<SavedReference>(c, &entity_id, more_pending, &mut ops)?
      }
    }

    if entity_id != target {
      info!("{} {} assigned remote id {}", sent.entity().as_str(), target, entity_id);
      for remapped in self.queue.remapped(&target, &entity_id)? {
        if remapped.id != change.id {
          ops.push(WriteOp::put(&remapped)?);
        }
      }
      if let ChangePayload::Case(_) = sent {
        ops.extend(self.remap_comment_parents(&target, &entity_id)?);
        ops.extend(self.binaries.reassign_parent_ops(&target, &entity_id)?);
      }
    }
    self.store.write_batch(ops)?;

    self.reclaim_binaries(&entity_id, sent.operation() == Operation::Delete)
  }

  fn confirmed_writes<T: LocalEntity>(
    &self,
    change: &EntityChange<T::Fields>,
    entity_id: &str,
    more_pending: bool,
    ops: &mut Vec<WriteOp>,
  ) -> Result<()> {
    let (local_id, sent_fields) = match change {
      EntityChange::Create { local_id, fields } => (local_id, fields),
      EntityChange::Update { id, fields } => (id, fields),
      EntityChange::Delete { id } => {
        ops.push(WriteOp::delete::<T>(id));
        return Ok(());
      }
    };

    // Deleted locally in the meantime; the queued delete will follow
    let Some(current) = self.store.get::<T>(local_id)? else {
      return Ok(());
    };
    if local_id != entity_id {
      ops.push(WriteOp::delete::<T>(local_id));
    }

    let record = if more_pending {
      // Later local edits are still queued; keep them and stay pending
      let mut record = T::confirmed(entity_id.to_string(), current.fields().clone());
      record.sync_state_mut().status = EntitySyncStatus::Pending;
      record
    } else {
      T::confirmed(entity_id.to_string(), sent_fields.clone())
    };
    ops.push(WriteOp::put(&record)?);
    Ok(())
  }

  fn remap_comment_parents(&self, old: &str, new: &str) -> Result<Vec<WriteOp>> {
    let mut comments: Vec<LocalComment> = self.store.query_by_index("case_id", old)?;
    for comment in &mut comments {
      comment.fields.case_id = new.to_string();
    }
    comments.iter().map(WriteOp::put).collect()
  }

  /// Delete binaries of a confirmed parent that no queued change still needs.
  ///
  /// Only uploaded binaries are reclaimed, unless the parent itself was deleted.
  fn reclaim_binaries(&self, parent: &str, parent_deleted: bool) -> Result<()> {
    let mut reclaimed = 0;
    for object in self.binaries.list_for_parent(parent)? {
      if !parent_deleted && object.sync_status != BinarySyncStatus::Synced {
        continue;
      }
      if self.queue.references_binary(&object.id)? {
        continue;
      }
      self.binaries.delete(&object.id)?;
      reclaimed += 1;
    }
    if reclaimed > 0 {
      debug!("Reclaimed {} binaries of {}", reclaimed, parent);
    }
    Ok(())
  }
}

impl<S: DocumentStore + 'static, R: RemoteApi + 'static> Drop for SyncOrchestrator<S, R> {
  fn drop(&mut self) {
    if let Ok(mut task) = self.task.lock() {
      if let Some(handle) = task.take() {
        handle.abort();
      }
    }
  }
}
