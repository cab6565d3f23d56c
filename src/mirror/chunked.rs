//! Splits large datasets across size-bounded cache entries.
//!
//! An entry under `key` is stored as `key:chunk:0..N-1` (JSON arrays of items)
//! plus a `key:meta` record written last. Reads treat the entry as all or
//! nothing: a missing meta record, a missing chunk or a count mismatch is a
//! miss.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
  pub chunk_count: usize,
  pub total_items: usize,
  pub cached_at: DateTime<Utc>,
  /// Seconds
  pub ttl: u64,
}

/// A reconstructed entry
#[derive(Debug, Clone)]
pub struct ChunkedEntry<T> {
  pub items: Vec<T>,
  pub meta: ChunkMeta,
}

pub struct ChunkedCache<B: CacheBackend> {
  backend: Arc<B>,
  chunk_budget: usize,
}

impl<B: CacheBackend> Clone for ChunkedCache<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      chunk_budget: self.chunk_budget,
    }
  }
}

fn meta_key(key: &str) -> String {
  format!("{}:meta", key)
}

fn chunk_key(key: &str, index: usize) -> String {
  format!("{}:chunk:{}", key, index)
}

impl<B: CacheBackend> ChunkedCache<B> {
  /// The budget is capped at the backend's per-value limit.
  pub fn new(backend: Arc<B>, chunk_budget: usize) -> Self {
    let chunk_budget = chunk_budget.min(backend.max_value_bytes());
    Self {
      backend,
      chunk_budget,
    }
  }

  /// Store `items` under `key`, replacing any previous entry.
  pub fn set_chunked<T: Serialize>(&self, key: &str, items: &[T], ttl: Duration) -> Result<ChunkMeta> {
    let chunks = pack(items, self.chunk_budget)?;
    let previous = self.chunk_count(key)?;

    for (index, chunk) in chunks.iter().enumerate() {
      if let Err(e) = self.backend.set(&chunk_key(key, index), chunk, ttl) {
        warn!("Writing chunk {} of {} failed: {}", index, key, e);
        self.remove_chunks(key, 0..index);
        return Err(e);
      }
    }

    let meta = ChunkMeta {
      chunk_count: chunks.len(),
      total_items: items.len(),
      cached_at: Utc::now(),
      ttl: ttl.as_secs(),
    };
    if let Err(e) = self.backend.set(&meta_key(key), &serde_json::to_string(&meta)?, ttl) {
      warn!("Writing metadata for {} failed: {}", key, e);
      self.remove_chunks(key, 0..chunks.len());
      return Err(e);
    }
    // Chunks of a longer previous entry are no longer covered by the meta
    self.remove_chunks(key, chunks.len()..previous);

    debug!(
      "Cached {} items for {} in {} chunks",
      meta.total_items, key, meta.chunk_count
    );
    Ok(meta)
  }

  pub fn get_chunked<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
    Ok(self.get_entry(key)?.map(|entry| entry.items))
  }

  /// Like `get_chunked`, keeping the metadata record.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<ChunkedEntry<T>>> {
    let Some(raw) = self.backend.get(&meta_key(key))? else {
      return Ok(None);
    };
    let meta: ChunkMeta = match serde_json::from_str(&raw) {
      Ok(meta) => meta,
      Err(e) => {
        warn!("Unreadable metadata for {}: {}", key, e);
        return Ok(None);
      }
    };

    let mut items = Vec::with_capacity(meta.total_items);
    for index in 0..meta.chunk_count {
      let Some(chunk) = self.backend.get(&chunk_key(key, index))? else {
        debug!("Chunk {} of {} is gone, treating as miss", index, key);
        return Ok(None);
      };
      match serde_json::from_str::<Vec<T>>(&chunk) {
        Ok(mut part) => items.append(&mut part),
        Err(e) => {
          warn!("Unreadable chunk {} of {}: {}", index, key, e);
          return Ok(None);
        }
      }
    }

    if items.len() != meta.total_items {
      warn!(
        "{} holds {} items, metadata expects {}",
        key,
        items.len(),
        meta.total_items
      );
      return Ok(None);
    }
    Ok(Some(ChunkedEntry { items, meta }))
  }

  pub fn del_chunked(&self, key: &str) -> Result<()> {
    let Some(raw) = self.backend.get(&meta_key(key))? else {
      return Ok(());
    };
    // Without readable metadata the chunk count is unknown; drop the meta only
    if let Ok(meta) = serde_json::from_str::<ChunkMeta>(&raw) {
      for index in 0..meta.chunk_count {
        self.backend.del(&chunk_key(key, index))?;
      }
    }
    self.backend.del(&meta_key(key))
  }

  fn chunk_count(&self, key: &str) -> Result<usize> {
    Ok(
      self
        .backend
        .get(&meta_key(key))?
        .and_then(|raw| serde_json::from_str::<ChunkMeta>(&raw).ok())
        .map_or(0, |meta| meta.chunk_count),
    )
  }

  fn remove_chunks(&self, key: &str, indexes: Range<usize>) {
    for index in indexes {
      if let Err(e) = self.backend.del(&chunk_key(key, index)) {
        debug!("Cleanup of chunk {} of {} failed: {}", index, key, e);
      }
    }
  }
}

/// Pack serialized items into JSON arrays no larger than `budget` bytes.
fn pack<T: Serialize>(items: &[T], budget: usize) -> Result<Vec<String>> {
  let mut chunks = Vec::new();
  let mut current = String::from("[");

  for item in items {
    let encoded = serde_json::to_string(item)?;
    // Brackets alone take two bytes
    if encoded.len() + 2 > budget {
      return Err(Error::ChunkTooLarge {
        size: encoded.len(),
        budget,
      });
    }

    let separator = usize::from(current.len() > 1);
    if current.len() + separator + encoded.len() + 1 > budget {
      current.push(']');
      chunks.push(std::mem::replace(&mut current, String::from("[")));
    }
    if current.len() > 1 {
      current.push(',');
    }
    current.push_str(&encoded);
  }

  if current.len() > 1 || chunks.is_empty() {
    current.push(']');
    chunks.push(current);
  }
  Ok(chunks)
}
