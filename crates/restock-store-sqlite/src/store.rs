//! [`SqliteStore`]: the SQLite implementation of [`DocumentStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use serde_json::{Map, Value};
use uuid::Uuid;

use restock_core::store::{self, Document, DocumentStore};

use crate::{
  Error, Result,
  encode::{RawDocument, encode_data, encode_dt},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Restock document store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or replace a document wholesale, with an explicit creation time.
  /// Used to import documents whose store-side creation time is known.
  pub async fn seed(
    &self,
    collection: &str,
    id: &str,
    data: &Map<String, Value>,
    create_time: Option<DateTime<Utc>>,
  ) -> Result<()> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;

    let collection_str = collection.to_owned();
    let id_str         = id.to_owned();
    let data_json      = encode_data(data)?;
    let created_str    = create_time.map(encode_dt);
    let updated_str    = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO documents (collection, doc_id, data_json, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![collection_str, id_str, data_json, created_str, updated_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Write `data` under `id`, keeping `created_at` when the row exists.
  async fn upsert(&self, collection: &str, id: &str, data: &Map<String, Value>) -> Result<()> {
    let collection_str = collection.to_owned();
    let id_str         = id.to_owned();
    let data_json      = encode_data(data)?;
    let now_str        = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO documents (collection, doc_id, data_json, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?4)
           ON CONFLICT (collection, doc_id) DO UPDATE SET
             data_json  = excluded.data_json,
             updated_at = excluded.updated_at",
          rusqlite::params![collection_str, id_str, data_json, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;

    let collection_str = collection.to_owned();
    let id_str         = id.to_owned();

    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT doc_id, data_json, created_at FROM documents
               WHERE collection = ?1 AND doc_id = ?2",
              rusqlite::params![collection_str, id_str],
              RawDocument::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_document(collection)).transpose()
  }

  async fn set_merge(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
    let mut data = self
      .get(collection, id)
      .await?
      .map(|doc| doc.data)
      .unwrap_or_default();
    store::merge_fields(&mut data, fields);
    self.upsert(collection, id, &data).await
  }

  async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
    store::validate_collection(collection)?;
    let id = Uuid::new_v4().simple().to_string();
    self.upsert(collection, &id, &fields).await?;
    Ok(id)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;

    let collection_str = collection.to_owned();
    let id_str         = id.to_owned();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
          rusqlite::params![collection_str, id_str],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  async fn list(&self, collection: &str) -> Result<Vec<Document>> {
    store::validate_collection(collection)?;

    let collection_str = collection.to_owned();

    let raws: Vec<RawDocument> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc_id, data_json, created_at FROM documents
           WHERE collection = ?1
           ORDER BY created_at, doc_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![collection_str], RawDocument::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_document(collection)).collect()
  }
}
