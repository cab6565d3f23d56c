/// Schema for the durable local store.
///
/// `documents` holds every record collection (cases, comments, saved
/// references, binaries, pending changes, sync metadata) as serialized JSON.
/// `document_index` carries the secondary index values declared by each
/// record type. `kv_cache` backs the mirror cache chunks and expires by TTL.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, id)
);

CREATE TABLE IF NOT EXISTS document_index (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (collection, id, field, value)
);

CREATE INDEX IF NOT EXISTS idx_document_index_lookup
    ON document_index(collection, field, value);

CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_cache_expiry ON kv_cache(expires_at);
"#;
