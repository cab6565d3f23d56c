//! Key/value backends for the mirror cache.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};

/// Minimal TTL key/value store with a hard per-value size limit.
pub trait CacheBackend: Send + Sync {
  fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

  /// Value under `key`, or None if absent or expired.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Deleting an absent key is a no-op.
  fn del(&self, key: &str) -> Result<()>;

  fn max_value_bytes(&self) -> usize;
}

fn check_size(key: &str, value: &str, max: usize) -> Result<()> {
  if value.len() > max {
    return Err(Error::Cache(format!(
      "Value for {} is {} bytes, the limit is {}",
      key,
      value.len(),
      max
    )));
  }
  Ok(())
}

/// Cache entries in the `kv_cache` table of the shared database.
#[derive(Clone)]
pub struct SqliteCache {
  db: Database,
  max_value_bytes: usize,
}

impl SqliteCache {
  pub fn new(db: Database, max_value_bytes: usize) -> Self {
    Self {
      db,
      max_value_bytes,
    }
  }

  /// Drop every expired row, returning how many went.
  pub fn purge_expired(&self) -> Result<usize> {
    let conn = self.db.conn().lock()?;
    let removed = conn.execute(
      "DELETE FROM kv_cache WHERE expires_at <= ?",
      params![Utc::now().timestamp_millis()],
    )?;
    if removed > 0 {
      debug!("Purged {} expired cache entries", removed);
    }
    Ok(removed)
  }
}

impl CacheBackend for SqliteCache {
  fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    check_size(key, value, self.max_value_bytes)?;
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
    let conn = self.db.conn().lock()?;
    conn.execute(
      "INSERT INTO kv_cache (key, value, expires_at) VALUES (?, ?, ?)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
      params![key, value, expires_at],
    )?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self.db.conn().lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_cache WHERE key = ? AND expires_at > ?",
        params![key, Utc::now().timestamp_millis()],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn del(&self, key: &str) -> Result<()> {
    let conn = self.db.conn().lock()?;
    conn.execute("DELETE FROM kv_cache WHERE key = ?", params![key])?;
    Ok(())
  }

  fn max_value_bytes(&self) -> usize {
    self.max_value_bytes
  }
}

/// Expiry deadline; None when the TTL runs past what `Instant` can hold
type Deadline = Option<Instant>;

fn is_live(deadline: &Deadline, now: Instant) -> bool {
  deadline.map_or(true, |at| at > now)
}

/// Process-local backend, used in tests and when no database is wanted.
pub struct MemoryCache {
  entries: Mutex<HashMap<String, (String, Deadline)>>,
  max_value_bytes: usize,
}

impl MemoryCache {
  pub fn new(max_value_bytes: usize) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      max_value_bytes,
    }
  }

  /// Number of live entries
  pub fn len(&self) -> Result<usize> {
    let now = Instant::now();
    let entries = self.entries.lock()?;
    Ok(entries.values().filter(|(_, deadline)| is_live(deadline, now)).count())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl CacheBackend for MemoryCache {
  fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    check_size(key, value, self.max_value_bytes)?;
    let mut entries = self.entries.lock()?;
    entries.insert(key.to_string(), (value.to_string(), Instant::now().checked_add(ttl)));
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<String>> {
    let mut entries = self.entries.lock()?;
    match entries.get(key) {
      Some((value, deadline)) if is_live(deadline, Instant::now()) => Ok(Some(value.clone())),
      Some(_) => {
        entries.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  fn del(&self, key: &str) -> Result<()> {
    self.entries.lock()?.remove(key);
    Ok(())
  }

  fn max_value_bytes(&self) -> usize {
    self.max_value_bytes
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_cache_expiry_and_purge() {
    let cache = SqliteCache::new(Database::open_in_memory().unwrap(), 1024);
    cache.set("live", "a", Duration::from_secs(60)).unwrap();
    cache.set("dead", "b", Duration::ZERO).unwrap();

    assert_eq!(cache.get("live").unwrap().as_deref(), Some("a"));
    assert_eq!(cache.get("dead").unwrap(), None);
    assert_eq!(cache.purge_expired().unwrap(), 1);

    cache.set("live", "c", Duration::from_secs(60)).unwrap();
    assert_eq!(cache.get("live").unwrap().as_deref(), Some("c"));
    cache.del("live").unwrap();
    cache.del("live").unwrap();
    assert_eq!(cache.get("live").unwrap(), None);
  }

  #[test]
  fn test_values_over_limit_are_rejected() {
    let sqlite = SqliteCache::new(Database::open_in_memory().unwrap(), 4);
    let memory = MemoryCache::new(4);
    let backends: [&dyn CacheBackend; 2] = [&sqlite, &memory];
    for backend in backends {
      assert!(matches!(
        backend.set("k", "too long", Duration::from_secs(60)),
        Err(Error::Cache(_))
      ));
      assert_eq!(backend.get("k").unwrap(), None);
    }
  }

  #[test]
  fn test_huge_ttl_never_expires() {
    let sqlite = SqliteCache::new(Database::open_in_memory().unwrap(), 64);
    let memory = MemoryCache::new(64);
    let backends: [&dyn CacheBackend; 2] = [&sqlite, &memory];
    for backend in backends {
      backend.set("k", "v", Duration::from_secs(u64::MAX)).unwrap();
      assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
    }
    assert_eq!(sqlite.purge_expired().unwrap(), 0);
    assert_eq!(memory.len().unwrap(), 1);
  }

  #[test]
  fn test_memory_cache_ttl() {
    let cache = MemoryCache::new(1024);
    cache.set("k", "v", Duration::from_millis(20)).unwrap();
    assert_eq!(cache.len().unwrap(), 1);
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.get("k").unwrap(), None);
    assert!(cache.is_empty().unwrap());
  }
}
