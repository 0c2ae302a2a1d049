//! SQL schema for the Restock SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision for later migrations.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per document. `collection` is the full slash-separated path,
-- e.g. 'users/u1/cart'; subcollections are separate collections.
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT NOT NULL,
    doc_id      TEXT NOT NULL,
    data_json   TEXT NOT NULL,   -- JSON object
    created_at  TEXT,            -- RFC 3339 UTC, fixed width; NULL when unknown
    updated_at  TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    PRIMARY KEY (collection, doc_id)
);

CREATE INDEX IF NOT EXISTS documents_created_idx ON documents(collection, created_at);

PRAGMA user_version = 1;
";
