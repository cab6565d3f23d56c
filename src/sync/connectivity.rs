//! Online/offline signal supplied by the host.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use super::remote::RemoteApi;

/// Observable connectivity state.
///
/// Hosts call `set_online` on transitions; subscribers see each change once.
#[derive(Clone)]
pub struct ConnectivityWatcher {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityWatcher {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!("Connectivity changed: {}", if online { "online" } else { "offline" });
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Ping the remote on an interval and publish the result.
///
/// Runs until the task is aborted.
pub async fn probe_connectivity<R: RemoteApi>(
  remote: Arc<R>,
  watcher: ConnectivityWatcher,
  interval: Duration,
  timeout: Duration,
) {
  let mut ticker = tokio::time::interval(interval);
  loop {
    ticker.tick().await;
    let online = match tokio::time::timeout(timeout, remote.ping()).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
        debug!("Connectivity probe failed: {}", e);
        false
      }
      Err(_) => false,
    };
    watcher.set_online(online);
  }
}
