//! In-memory [`DocumentStore`] for tests and dry experiments.
//!
//! Collections live in a `BTreeMap` behind a `std::sync::RwLock`, so listing
//! is ordered by document id.

use std::{
  collections::BTreeMap,
  sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
  Error, Result,
  store::{self, Document, DocumentStore},
};

#[derive(Debug, Clone)]
struct StoredDoc {
  data:        Map<String, Value>,
  create_time: Option<DateTime<Utc>>,
}

type Collections = BTreeMap<String, BTreeMap<String, StoredDoc>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
  collections: RwLock<Collections>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Insert or replace a document wholesale, with an explicit creation time.
  pub fn seed(
    &self,
    collection: &str,
    id: &str,
    data: Map<String, Value>,
    create_time: Option<DateTime<Utc>>,
  ) -> Result<()> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;
    self
      .collections
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(collection.to_owned())
      .or_default()
      .insert(id.to_owned(), StoredDoc { data, create_time });
    Ok(())
  }

  /// Number of documents in `collection`.
  pub fn count(&self, collection: &str) -> usize {
    self
      .collections
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(collection)
      .map_or(0, BTreeMap::len)
  }

  fn read_doc(&self, collection: &str, id: &str) -> Option<Document> {
    let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
    collections.get(collection)?.get(id).map(|doc| Document {
      id:          id.to_owned(),
      data:        doc.data.clone(),
      create_time: doc.create_time,
    })
  }

  fn merge_doc(&self, collection: &str, id: &str, fields: Map<String, Value>) {
    let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
    let doc = collections
      .entry(collection.to_owned())
      .or_default()
      .entry(id.to_owned())
      .or_insert_with(|| StoredDoc { data: Map::new(), create_time: Some(Utc::now()) });
    store::merge_fields(&mut doc.data, fields);
  }
}

impl DocumentStore for MemoryStore {
  type Error = Error;

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;
    Ok(self.read_doc(collection, id))
  }

  async fn set_merge(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;
    self.merge_doc(collection, id, fields);
    Ok(())
  }

  async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
    store::validate_collection(collection)?;
    let id = Uuid::new_v4().simple().to_string();
    self.merge_doc(collection, &id, fields);
    Ok(id)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
    store::validate_collection(collection)?;
    store::validate_document_id(id)?;
    let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
    Ok(
      collections
        .get_mut(collection)
        .is_some_and(|docs| docs.remove(id).is_some()),
    )
  }

  async fn list(&self, collection: &str) -> Result<Vec<Document>> {
    store::validate_collection(collection)?;
    let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
    let docs = collections
      .get(collection)
      .map(|docs| {
        docs
          .iter()
          .map(|(id, doc)| Document {
            id:          id.clone(),
            data:        doc.data.clone(),
            create_time: doc.create_time,
          })
          .collect()
      })
      .unwrap_or_default();
    Ok(docs)
  }
}
