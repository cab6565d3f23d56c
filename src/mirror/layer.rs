//! Cache-first access to upstream directory datasets.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::chunked::ChunkedCache;
use super::directory::UpstreamDirectory;
use super::resources::MirrorResource;
use crate::config::MirrorConfig;
use crate::error::{RemoteError, Result};

/// Where a mirrored dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Cache,
  Network,
}

#[derive(Debug, Clone)]
pub struct MirrorResult<T> {
  pub items: Vec<T>,
  pub source: CacheSource,
  /// When the cached copy was written (None for uncached network data)
  pub cached_at: Option<DateTime<Utc>>,
}

/// Mirror of upstream datasets kept in chunked cache entries until the TTL expires.
pub struct MirrorCache<B: CacheBackend, D: UpstreamDirectory> {
  cache: ChunkedCache<B>,
  directory: Arc<D>,
  ttl: Duration,
  fetch_timeout: Duration,
  /// Scope hash appended to keys (e.g., per tenant)
  scope: Option<String>,
}

impl<B: CacheBackend, D: UpstreamDirectory> MirrorCache<B, D> {
  pub fn new(backend: Arc<B>, directory: Arc<D>, config: &MirrorConfig) -> Self {
    Self {
      cache: ChunkedCache::new(backend, config.chunk_budget_bytes),
      directory,
      ttl: config.ttl(),
      fetch_timeout: config.fetch_timeout(),
      scope: None,
    }
  }

  /// Keep this mirror's entries apart from other scopes.
  pub fn with_scope(mut self, scope: &str) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    self.scope = Some(hex::encode(hasher.finalize()));
    self
  }

  pub fn cache_key<T: MirrorResource>(&self) -> String {
    match &self.scope {
      Some(scope) => format!("mirror:{}:{}", T::resource(), scope),
      None => format!("mirror:{}", T::resource()),
    }
  }

  /// The whole dataset, from cache when present, otherwise fetched and cached.
  pub async fn load<T: MirrorResource>(&self) -> Result<MirrorResult<T>> {
    let key = self.cache_key::<T>();

    if let Some(entry) = self.cache.get_entry::<T>(&key)? {
      debug!("Cache hit for {} ({} items)", key, entry.items.len());
      return Ok(MirrorResult {
        items: entry.items,
        source: CacheSource::Cache,
        cached_at: Some(entry.meta.cached_at),
      });
    }

    debug!("Cache miss for {}, fetching upstream", key);
    let items = match tokio::time::timeout(self.fetch_timeout, self.directory.fetch_all::<T>()).await {
      Ok(result) => result?,
      Err(_) => return Err(RemoteError::timeout(self.fetch_timeout).into()),
    };

    // The fetched data is still usable when caching fails
    let cached_at = match self.cache.set_chunked(&key, &items, self.ttl) {
      Ok(meta) => Some(meta.cached_at),
      Err(e) => {
        warn!("Failed to cache {}: {}", key, e);
        None
      }
    };

    info!("Mirrored {} {}", items.len(), T::resource());
    Ok(MirrorResult {
      items,
      source: CacheSource::Network,
      cached_at,
    })
  }

  /// Items whose search fields contain `query`, ignoring case. An empty query
  /// returns everything.
  pub async fn search<T: MirrorResource>(&self, query: &str) -> Result<MirrorResult<T>> {
    let mut result = self.load::<T>().await?;
    let needle = query.trim().to_lowercase();
    if !needle.is_empty() {
      result.items.retain(|item| item.matches(&needle));
    }
    Ok(result)
  }

  /// Drop the cached copy and fetch again.
  pub async fn refresh<T: MirrorResource>(&self) -> Result<MirrorResult<T>> {
    self.invalidate::<T>()?;
    self.load().await
  }

  pub fn invalidate<T: MirrorResource>(&self) -> Result<()> {
    self.cache.del_chunked(&self.cache_key::<T>())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::mirror::backend::MemoryCache;
  use crate::mirror::resources::{Customer, Item};
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Directory serving a fixed customer list
  struct MockDirectory {
    customers: Vec<Customer>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
  }

  impl MockDirectory {
    fn new(n: usize) -> Self {
      let customers = (0..n)
        .map(|i| Customer {
          id: i.to_string(),
          name: format!("Customer {}", i),
          code: format!("C-{:04}", i),
          city: if i % 2 == 0 { "Porto" } else { "Braga" }.to_string(),
        })
        .collect();
      Self {
        customers,
        fetches: AtomicUsize::new(0),
        delay: None,
      }
    }
  }

  #[async_trait]
  impl UpstreamDirectory for MockDirectory {
    async fn fetch_all<T: MirrorResource>(&self) -> std::result::Result<Vec<T>, RemoteError> {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      self.fetches.fetch_add(1, Ordering::SeqCst);
      if T::resource() != Customer::resource() {
        return Err(RemoteError::from_status(404, ""));
      }
      // Reinterpret through JSON to hand back the requested type
      let value = serde_json::to_value(&self.customers)
        .map_err(|e| RemoteError::transient(e.to_string()))?;
      serde_json::from_value(value).map_err(|e| RemoteError::transient(e.to_string()))
    }
  }

  fn config() -> MirrorConfig {
    MirrorConfig {
      chunk_budget_bytes: 512,
      ..MirrorConfig::default()
    }
  }

  fn mirror(directory: MockDirectory) -> (Arc<MockDirectory>, MirrorCache<MemoryCache, MockDirectory>) {
    let directory = Arc::new(directory);
    let cache = MirrorCache::new(
      Arc::new(MemoryCache::new(1024 * 1024)),
      Arc::clone(&directory),
      &config(),
    );
    (directory, cache)
  }

  #[tokio::test]
  async fn test_load_fetches_once_then_serves_cache() {
    let (directory, cache) = mirror(MockDirectory::new(100));

    let first = cache.load::<Customer>().await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.items.len(), 100);
    assert!(first.cached_at.is_some());

    let second = cache.load::<Customer>().await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.items, first.items);
    assert_eq!(directory.fetches.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_search_filters_loaded_copy() {
    let (_, cache) = mirror(MockDirectory::new(10));

    let braga = cache.search::<Customer>("BRAGA").await.unwrap();
    assert_eq!(braga.items.len(), 5);
    let one = cache.search::<Customer>("c-0007").await.unwrap();
    assert_eq!(one.items.len(), 1);
    assert_eq!(one.items[0].id, "7");
    assert_eq!(cache.search::<Customer>("  ").await.unwrap().items.len(), 10);
  }

  #[tokio::test]
  async fn test_refresh_refetches() {
    let (directory, cache) = mirror(MockDirectory::new(5));
    cache.load::<Customer>().await.unwrap();

    let refreshed = cache.refresh::<Customer>().await.unwrap();
    assert_eq!(refreshed.source, CacheSource::Network);
    assert_eq!(directory.fetches.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_upstream_failure_is_returned() {
    let (_, cache) = mirror(MockDirectory::new(5));
    assert!(matches!(cache.load::<Item>().await, Err(Error::Remote(_))));
  }

  #[tokio::test]
  async fn test_fetch_timeout() {
    let mut directory = MockDirectory::new(5);
    directory.delay = Some(Duration::from_millis(200));
    let directory = Arc::new(directory);
    let cache = MirrorCache::new(
      Arc::new(MemoryCache::new(1024 * 1024)),
      directory,
      &MirrorConfig {
        fetch_timeout_secs: 0,
        ..config()
      },
    );

    match cache.load::<Customer>().await {
      Err(Error::Remote(e)) => assert!(e.message.contains("timed out")),
      other => panic!("expected timeout, got {:?}", other.map(|r| r.items.len())),
    }
  }

  #[tokio::test]
  async fn test_uncacheable_dataset_still_returned() {
    let (_, cache) = mirror(MockDirectory::new(3));
    // A budget too small for any single customer
    let cache = MirrorCache {
      cache: ChunkedCache::new(Arc::new(MemoryCache::new(16)), 16),
      ..cache
    };

    let result = cache.load::<Customer>().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.items.len(), 3);
    assert!(result.cached_at.is_none());
  }

  #[test]
  fn test_scoped_keys() {
    let (_, cache) = mirror(MockDirectory::new(0));
    assert_eq!(cache.cache_key::<Customer>(), "mirror:customers");

    let scoped = cache.with_scope("tenant-a");
    let key = scoped.cache_key::<Customer>();
    assert!(key.starts_with("mirror:customers:"));
    assert_eq!(key.len(), "mirror:customers:".len() + 64);
  }
}
