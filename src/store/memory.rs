//! In-memory document store, used by tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::{DocumentStore, WriteOp};
use crate::error::Result;

struct Document {
  seq: u64,
  data: Vec<u8>,
  indexes: Vec<(&'static str, String)>,
}

#[derive(Default)]
struct Collections {
  next_seq: u64,
  docs: HashMap<String, HashMap<String, Document>>,
}

impl Collections {
  fn matching<F>(&self, collection: &str, pred: F) -> Vec<Vec<u8>>
  where
    F: Fn(&Document) -> bool,
  {
    let mut rows: Vec<&Document> = self
      .docs
      .get(collection)
      .map(|c| c.values().filter(|d| pred(d)).collect())
      .unwrap_or_default();
    rows.sort_by_key(|d| d.seq);
    rows.into_iter().map(|d| d.data.clone()).collect()
  }
}

/// Document store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Collections>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl DocumentStore for MemoryStore {
  fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
    // A single lock acquisition makes the batch atomic for readers
    let mut inner = self.inner.lock()?;
    for op in ops {
      match op {
        WriteOp::Put {
          collection,
          id,
          data,
          indexes,
        } => {
          let next_seq = inner.next_seq;
          let docs = inner.docs.entry(collection.to_string()).or_default();
          let seq = docs.get(&id).map(|d| d.seq).unwrap_or(next_seq);
          docs.insert(id, Document { seq, data, indexes });
          inner.next_seq += 1;
        }
        WriteOp::Delete { collection, id } => {
          if let Some(docs) = inner.docs.get_mut(collection) {
            docs.remove(&id);
          }
        }
      }
    }
    Ok(())
  }

  fn get_raw(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
    let inner = self.inner.lock()?;
    Ok(
      inner
        .docs
        .get(collection)
        .and_then(|c| c.get(id))
        .map(|d| d.data.clone()),
    )
  }

  fn query_raw(&self, collection: &str, field: &str, value: &str) -> Result<Vec<Vec<u8>>> {
    let inner = self.inner.lock()?;
    Ok(inner.matching(collection, |d| {
      d.indexes.iter().any(|(f, v)| *f == field && v == value)
    }))
  }

  fn search_raw(&self, collection: &str, field: &str, needle: &str) -> Result<Vec<Vec<u8>>> {
    let needle = needle.to_lowercase();
    let inner = self.inner.lock()?;
    Ok(inner.matching(collection, |d| {
      d.indexes
        .iter()
        .any(|(f, v)| *f == field && v.to_lowercase().contains(&needle))
    }))
  }

  fn all_raw(&self, collection: &str) -> Result<Vec<Vec<u8>>> {
    let inner = self.inner.lock()?;
    Ok(inner.matching(collection, |_| true))
  }

  fn count(&self, collection: &str) -> Result<usize> {
    let inner = self.inner.lock()?;
    Ok(inner.docs.get(collection).map(|c| c.len()).unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{CommentFields, LocalComment};

  #[test]
  fn test_matches_sqlite_semantics() {
    let store = MemoryStore::new();
    let comment = |id: &str, case_id: &str, body: &str| {
      LocalComment::new_local(
        id.to_string(),
        CommentFields {
          case_id: case_id.to_string(),
          author: "ana".to_string(),
          body: body.to_string(),
        },
      )
    };
    store.put(&comment("m1", "c1", "Looks good")).unwrap();
    store.put(&comment("m2", "c2", "Needs photos")).unwrap();
    store.put(&comment("m3", "c1", "Approved")).unwrap();
    store.put(&comment("m1", "c1", "Looks great")).unwrap();

    let on_c1: Vec<LocalComment> = store.query_by_index("case_id", "c1").unwrap();
    assert_eq!(
      on_c1.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
      vec!["m1", "m3"]
    );
    assert_eq!(on_c1[0].fields.body, "Looks great");

    store.delete::<LocalComment>("m2").unwrap();
    assert_eq!(store.count("comments").unwrap(), 2);
  }
}
