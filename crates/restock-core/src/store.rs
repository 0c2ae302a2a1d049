//! The `DocumentStore` trait and the document envelope it traffics in.
//!
//! The trait is implemented by storage backends (`restock-store-sqlite`, and
//! [`crate::memory::MemoryStore`] for tests). The runner depends on this
//! abstraction, never on a concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── Documents ───────────────────────────────────────────────────────────────

/// One stored document: an id unique within its collection, a JSON object,
/// and the store's own record of when the document was first written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id:          String,
  pub data:        Map<String, Value>,
  /// Absent for documents imported without a known creation time.
  pub create_time: Option<DateTime<Utc>>,
}

impl Document {
  pub fn get(&self, field: &str) -> Option<&Value> { self.data.get(field) }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

/// Check a slash-separated collection path such as `users/abc/cart`.
///
/// Collections alternate collection and document segments, so a valid path
/// has an odd number of non-empty segments.
pub fn validate_collection(path: &str) -> Result<()> {
  let segments: Vec<&str> = path.split('/').collect();
  if segments.iter().any(|s| s.trim().is_empty()) || segments.len() % 2 == 0 {
    return Err(Error::InvalidCollection(path.to_owned()));
  }
  Ok(())
}

/// Check a document id: non-empty and free of path separators.
pub fn validate_document_id(id: &str) -> Result<()> {
  if id.trim().is_empty() || id.contains('/') {
    return Err(Error::InvalidDocumentId(id.to_owned()));
  }
  Ok(())
}

pub const USERS_COLLECTION: &str = "users";

/// Path of a per-user subcollection, e.g. `users/{uid}/history`.
pub fn user_collection(user_id: &str, name: &str) -> String {
  format!("{USERS_COLLECTION}/{user_id}/{name}")
}

/// Shallow merge: every top-level field in `fields` replaces the field of the
/// same name in `target`; other fields are kept.
pub fn merge_fields(target: &mut Map<String, Value>, fields: Map<String, Value>) {
  for (key, value) in fields {
    target.insert(key, value);
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a hierarchical document store.
///
/// All methods return `Send` futures so the trait can be driven from a
/// multi-threaded tokio runtime.
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch one document. Returns `None` if it does not exist.
  fn get<'a>(
    &'a self,
    collection: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a;

  /// Merge `fields` into the document, creating it when absent. The store's
  /// creation time is set on first write only.
  fn set_merge<'a>(
    &'a self,
    collection: &'a str,
    id: &'a str,
    fields: Map<String, Value>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Create a document under a store-generated id and return that id.
  fn add<'a>(
    &'a self,
    collection: &'a str,
    fields: Map<String, Value>,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;

  /// Delete a document. Returns whether it existed.
  fn delete<'a>(
    &'a self,
    collection: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Every document directly inside `collection`.
  fn list<'a>(
    &'a self,
    collection: &'a str,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;
}
