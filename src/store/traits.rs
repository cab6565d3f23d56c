//! Core traits for the durable local store.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::entities::{EntitySyncStatus, Syncable};
use crate::error::Result;

/// A typed document kept in one collection of the local store.
///
/// Implementors name their collection and declare the secondary index values
/// that `query_by_index` and `search` look up. A field may appear several
/// times to index multiple values.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Primary key within the collection
  fn id(&self) -> String;

  /// Collection name (e.g., "cases", "binaries")
  fn collection() -> &'static str;

  /// Secondary index values as (field, value) pairs
  fn index_values(&self) -> Vec<(&'static str, String)>;
}

/// One write in an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
  Put {
    collection: &'static str,
    id: String,
    data: Vec<u8>,
    indexes: Vec<(&'static str, String)>,
  },
  Delete {
    collection: &'static str,
    id: String,
  },
}

impl WriteOp {
  pub fn put<T: Record>(record: &T) -> Result<Self> {
    Ok(WriteOp::Put {
      collection: T::collection(),
      id: record.id(),
      data: serde_json::to_vec(record)?,
      indexes: record.index_values(),
    })
  }

  pub fn delete<T: Record>(id: &str) -> Self {
    WriteOp::Delete {
      collection: T::collection(),
      id: id.to_string(),
    }
  }
}

/// Indexed document storage backend.
///
/// Backends only move serialized bytes; the typed helpers below do the
/// (de)serialization. Every batch is applied atomically. Results come back in
/// first-insertion order.
pub trait DocumentStore: Send + Sync {
  /// Apply all operations or none of them.
  fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

  fn get_raw(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>>;

  /// Documents whose index `field` equals `value`.
  fn query_raw(&self, collection: &str, field: &str, value: &str) -> Result<Vec<Vec<u8>>>;

  /// Documents whose index `field` contains `needle`, ignoring case.
  fn search_raw(&self, collection: &str, field: &str, needle: &str) -> Result<Vec<Vec<u8>>>;

  fn all_raw(&self, collection: &str) -> Result<Vec<Vec<u8>>>;

  fn count(&self, collection: &str) -> Result<usize>;

  /// Upsert a single record.
  fn put<T: Record>(&self, record: &T) -> Result<()>
  where
    Self: Sized,
  {
    self.write_batch(vec![WriteOp::put(record)?])
  }

  /// Upsert many records in one batch.
  fn bulk_put<T: Record>(&self, records: &[T]) -> Result<()>
  where
    Self: Sized,
  {
    let ops = records.iter().map(WriteOp::put).collect::<Result<Vec<_>>>()?;
    self.write_batch(ops)
  }

  /// Store server snapshots, marking each row synced.
  fn hydrate<T: Record + Syncable>(&self, mut records: Vec<T>) -> Result<()>
  where
    Self: Sized,
  {
    let now = Utc::now();
    for record in &mut records {
      let state = record.sync_state_mut();
      state.status = EntitySyncStatus::Synced;
      state.last_synced_at = Some(now);
    }
    self.bulk_put(&records)
  }

  fn get<T: Record>(&self, id: &str) -> Result<Option<T>>
  where
    Self: Sized,
  {
    match self.get_raw(T::collection(), id)? {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn query_by_index<T: Record>(&self, field: &str, value: &str) -> Result<Vec<T>>
  where
    Self: Sized,
  {
    decode_all(self.query_raw(T::collection(), field, value)?)
  }

  fn search<T: Record>(&self, field: &str, needle: &str) -> Result<Vec<T>>
  where
    Self: Sized,
  {
    decode_all(self.search_raw(T::collection(), field, needle)?)
  }

  fn all<T: Record>(&self) -> Result<Vec<T>>
  where
    Self: Sized,
  {
    decode_all(self.all_raw(T::collection())?)
  }

  /// Remove a record. Deleting a missing id is a no-op.
  fn delete<T: Record>(&self, id: &str) -> Result<()>
  where
    Self: Sized,
  {
    self.write_batch(vec![WriteOp::delete::<T>(id)])
  }
}

fn decode_all<T: Record>(rows: Vec<Vec<u8>>) -> Result<Vec<T>> {
  rows
    .iter()
    .map(|data| serde_json::from_slice(data).map_err(Into::into))
    .collect()
}
