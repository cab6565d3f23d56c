//! SQLite implementation of the document store.

use rusqlite::{params, OptionalExtension};

use super::traits::{DocumentStore, WriteOp};
use crate::db::Database;
use crate::error::Result;

/// Document store persisted in the shared SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl DocumentStore for SqliteStore {
  fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
    let mut conn = self.db.conn().lock()?;
    let tx = conn.transaction()?;

    for op in ops {
      match op {
        WriteOp::Put {
          collection,
          id,
          data,
          indexes,
        } => {
          // Upsert keeps the rowid, so first-insertion order survives updates
          tx.execute(
            "INSERT INTO documents (collection, id, data, updated_at)
             VALUES (?, ?, ?, datetime('now'))
             ON CONFLICT(collection, id) DO UPDATE SET
               data = excluded.data,
               updated_at = excluded.updated_at",
            params![collection, id, data],
          )?;
          tx.execute(
            "DELETE FROM document_index WHERE collection = ? AND id = ?",
            params![collection, id],
          )?;
          for (field, value) in indexes {
            tx.execute(
              "INSERT OR IGNORE INTO document_index (collection, id, field, value)
               VALUES (?, ?, ?, ?)",
              params![collection, id, field, value],
            )?;
          }
        }
        WriteOp::Delete { collection, id } => {
          tx.execute(
            "DELETE FROM document_index WHERE collection = ? AND id = ?",
            params![collection, id],
          )?;
          tx.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
          )?;
        }
      }
    }

    tx.commit()?;
    Ok(())
  }

  fn get_raw(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.db.conn().lock()?;
    let data = conn
      .query_row(
        "SELECT data FROM documents WHERE collection = ? AND id = ?",
        params![collection, id],
        |row| row.get(0),
      )
      .optional()?;
    Ok(data)
  }

  fn query_raw(&self, collection: &str, field: &str, value: &str) -> Result<Vec<Vec<u8>>> {
    let conn = self.db.conn().lock()?;
    let mut stmt = conn.prepare(
      "SELECT data FROM documents
       WHERE collection = ?1 AND id IN (
         SELECT id FROM document_index
         WHERE collection = ?1 AND field = ?2 AND value = ?3
       )
       ORDER BY rowid",
    )?;
    let rows = stmt
      .query_map(params![collection, field, value], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
    Ok(rows)
  }

  fn search_raw(&self, collection: &str, field: &str, needle: &str) -> Result<Vec<Vec<u8>>> {
    let conn = self.db.conn().lock()?;
    let mut stmt = conn.prepare(
      "SELECT data FROM documents
       WHERE collection = ?1 AND id IN (
         SELECT id FROM document_index
         WHERE collection = ?1 AND field = ?2 AND instr(lower(value), lower(?3)) > 0
       )
       ORDER BY rowid",
    )?;
    let rows = stmt
      .query_map(params![collection, field, needle], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
    Ok(rows)
  }

  fn all_raw(&self, collection: &str) -> Result<Vec<Vec<u8>>> {
    let conn = self.db.conn().lock()?;
    let mut stmt = conn.prepare("SELECT data FROM documents WHERE collection = ? ORDER BY rowid")?;
    let rows = stmt
      .query_map(params![collection], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
    Ok(rows)
  }

  fn count(&self, collection: &str) -> Result<usize> {
    let conn = self.db.conn().lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM documents WHERE collection = ?",
      params![collection],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{CaseFields, CaseStudy, EntitySyncStatus};

  fn case(id: &str, title: &str, owner: &str) -> CaseStudy {
    CaseStudy::new_local(
      id.to_string(),
      CaseFields {
        title: title.to_string(),
        owner: owner.to_string(),
        ..CaseFields::default()
      },
    )
  }

  #[test]
  fn test_put_get_and_index_queries() {
    let store = SqliteStore::new(Database::open_in_memory().unwrap());
    store.put(&case("c1", "Pump retrofit", "ana")).unwrap();
    store.put(&case("c2", "Conveyor upgrade", "ben")).unwrap();
    store.put(&case("c3", "Pump seal study", "ana")).unwrap();

    let got: CaseStudy = store.get("c2").unwrap().unwrap();
    assert_eq!(got.fields.title, "Conveyor upgrade");

    let by_owner: Vec<CaseStudy> = store.query_by_index("owner", "ana").unwrap();
    assert_eq!(
      by_owner.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
      vec!["c1", "c3"]
    );

    let found: Vec<CaseStudy> = store.search("title", "PUMP").unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(store.count("cases").unwrap(), 3);
  }

  #[test]
  fn test_upsert_replaces_indexes_and_keeps_order() {
    let store = SqliteStore::new(Database::open_in_memory().unwrap());
    store.put(&case("c1", "First", "ana")).unwrap();
    store.put(&case("c2", "Second", "ana")).unwrap();
    store.put(&case("c1", "First renamed", "ben")).unwrap();

    let all: Vec<CaseStudy> = store.all().unwrap();
    assert_eq!(all[0].id, "c1");
    assert_eq!(all[0].fields.title, "First renamed");

    let ana: Vec<CaseStudy> = store.query_by_index("owner", "ana").unwrap();
    assert_eq!(ana.len(), 1);
    assert_eq!(ana[0].id, "c2");
  }

  #[test]
  fn test_delete_is_idempotent() {
    let store = SqliteStore::new(Database::open_in_memory().unwrap());
    store.put(&case("c1", "First", "ana")).unwrap();
    store.delete::<CaseStudy>("c1").unwrap();
    store.delete::<CaseStudy>("c1").unwrap();
    assert!(store.get::<CaseStudy>("c1").unwrap().is_none());
    assert!(store.query_by_index::<CaseStudy>("owner", "ana").unwrap().is_empty());
  }

  #[test]
  fn test_hydrate_marks_synced() {
    let store = SqliteStore::new(Database::open_in_memory().unwrap());
    store
      .hydrate(vec![case("c1", "Remote one", "ana"), case("c2", "Remote two", "ana")])
      .unwrap();

    let synced: Vec<CaseStudy> = store.query_by_index("sync_status", "synced").unwrap();
    assert_eq!(synced.len(), 2);
    assert!(synced.iter().all(|c| c.sync.status == EntitySyncStatus::Synced));
    assert!(synced.iter().all(|c| c.sync.last_synced_at.is_some()));
  }

  #[test]
  fn test_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    {
      let store = SqliteStore::new(Database::open(&path).unwrap());
      store.put(&case("c1", "Persisted", "ana")).unwrap();
    }

    let store = SqliteStore::new(Database::open(&path).unwrap());
    let got: CaseStudy = store.get("c1").unwrap().unwrap();
    assert_eq!(got.fields.title, "Persisted");
  }
}
