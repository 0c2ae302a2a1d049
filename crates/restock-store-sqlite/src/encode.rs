//! Encoding and decoding helpers between documents and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so that text order
//! is time order. Document bodies are stored as compact JSON objects.

use chrono::{DateTime, SecondsFormat, Utc};
use restock_core::store::Document;
use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Document bodies ─────────────────────────────────────────────────────────

pub fn encode_data(data: &Map<String, Value>) -> Result<String> { Ok(serde_json::to_string(data)?) }

pub fn decode_data(collection: &str, id: &str, s: &str) -> Result<Map<String, Value>> {
  match serde_json::from_str(s)? {
    Value::Object(map) => Ok(map),
    _ => Err(Error::NotAnObject { collection: collection.to_owned(), id: id.to_owned() }),
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// Raw strings read directly from a `documents` row.
pub struct RawDocument {
  pub doc_id:     String,
  pub data_json:  String,
  pub created_at: Option<String>,
}

impl RawDocument {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      doc_id:     row.get(0)?,
      data_json:  row.get(1)?,
      created_at: row.get(2)?,
    })
  }

  pub fn into_document(self, collection: &str) -> Result<Document> {
    Ok(Document {
      data:        decode_data(collection, &self.doc_id, &self.data_json)?,
      create_time: self.created_at.as_deref().map(decode_dt).transpose()?,
      id:          self.doc_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let whole = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).single().unwrap();
    let later = whole + chrono::Duration::milliseconds(250);
    let (a, b) = (encode_dt(whole), encode_dt(later));
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&b).unwrap(), later);
  }

  #[test]
  fn non_object_bodies_are_rejected() {
    assert!(matches!(
      decode_data("users", "u1", "[1,2]"),
      Err(Error::NotAnObject { .. })
    ));
    assert!(matches!(decode_data("users", "u1", "{"), Err(Error::Json(_))));
  }
}
