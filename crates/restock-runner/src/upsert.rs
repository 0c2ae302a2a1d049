//! Merging due items into a destination collection such as a user's cart.
//!
//! Items with a derivable key are upserted under that key so repeated runs
//! accumulate quantity on one document; items without one are appended under
//! a store-generated id. In dry-run mode every write is planned exactly as in
//! a live run, but nothing is sent to the store. Quantities planned earlier in
//! the same batch count as already written, so a key that recurs across
//! bundles plans as create-then-update in both modes.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use restock_core::{
  identity,
  item::{self, ItemRecord},
  resolve::{DueBundle, DueItem},
  store::{Document, DocumentStore},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Value of the `source` field on every document this writer touches.
pub const AUTO_SUBSCRIPTION_SOURCE: &str = "auto-subscription";

/// Identifier fields consulted for the destination key, in order.
const KEY_FIELDS: &[&str] = &["itemId", "item_id", "productId", "product_id", "id"];

/// Older documents keep their count under this misspelt field.
const LEGACY_QUANTITY_FIELD: &str = "quantify";

// ─── Planning ────────────────────────────────────────────────────────────────

/// Where a planned write goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteTarget {
  /// Merge into an existing document.
  Update { id: String },
  /// Create a document under a derived key.
  Create { id: String },
  /// Append a document under a store-generated id.
  Add,
}

/// One destination write, computed before anything is sent to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedWrite {
  pub subscription_id: String,
  pub target:          WriteTarget,
  pub quantity:        u32,
  pub fields:          Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReport {
  /// Writes performed, or that would have been performed in a dry run.
  pub written: usize,
  pub failed:  usize,
  pub planned: Vec<PlannedWrite>,
}

/// The destination document id for `item`: its normalized identifier (a
/// url-embedded id wins), else the longest digit run of its url.
pub fn destination_key(item: &ItemRecord) -> Option<String> {
  let raw = KEY_FIELDS
    .iter()
    .filter_map(|field| item.field(field))
    .find(|value| !value.is_null())
    .unwrap_or(&Value::Null);

  let key = identity::normalize_id(raw, item.url.as_deref());
  if !key.is_empty() {
    return Some(key);
  }
  item
    .url
    .as_deref()
    .map(identity::longest_digit_run)
    .filter(|digits| !digits.is_empty())
    .map(str::to_owned)
}

/// Quantity already recorded on a destination document; `0` when absent.
pub fn existing_quantity(doc: &Document) -> u32 {
  doc
    .get("quantity")
    .or_else(|| doc.get(LEGACY_QUANTITY_FIELD))
    .and_then(item::positive_int)
    .unwrap_or(0)
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
  Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Descriptive fields the item supplies. Absent values are left out so a
/// merge keeps whatever the document already has.
fn descriptive_fields(item: &ItemRecord) -> Map<String, Value> {
  let mut fields = Map::new();
  let text = [("url", &item.url), ("name", &item.name), ("image", &item.image)];
  for (field, value) in text {
    if let Some(value) = value {
      fields.insert(field.to_owned(), Value::String(value.clone()));
    }
  }
  let numbers = [("price", item.price), ("priceTax", item.price_tax)];
  for (field, value) in numbers {
    if let Some(value) = value {
      fields.insert(field.to_owned(), json!(value));
    }
  }
  fields
}

fn document_fields(item: &ItemRecord, quantity: u32, stamp: (&str, Value)) -> Map<String, Value> {
  let mut fields = descriptive_fields(item);
  fields.insert("quantity".to_owned(), json!(quantity));
  fields.insert(LEGACY_QUANTITY_FIELD.to_owned(), json!(quantity));
  fields.insert("source".to_owned(), json!(AUTO_SUBSCRIPTION_SOURCE));
  fields.insert(stamp.0.to_owned(), stamp.1);
  fields
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Writes due items into one destination collection.
pub struct UpsertWriter<S> {
  store:      Arc<S>,
  collection: String,
}

impl<S: DocumentStore> UpsertWriter<S> {
  pub fn new(store: Arc<S>, collection: impl Into<String>) -> Self {
    Self { store, collection: collection.into() }
  }

  /// Work out the write for one due item. `staged` holds the quantities
  /// already planned in this batch by key; the destination document is only
  /// read for keys not in it.
  pub async fn plan(
    &self,
    subscription_id: &str,
    due: &DueItem,
    now: DateTime<Utc>,
    staged: &BTreeMap<String, u32>,
  ) -> Result<PlannedWrite> {
    let incoming = due.quantity.max(1);

    let Some(id) = destination_key(&due.item) else {
      return Ok(PlannedWrite {
        subscription_id: subscription_id.to_owned(),
        target:          WriteTarget::Add,
        quantity:        incoming,
        fields:          document_fields(&due.item, incoming, ("createdAt", timestamp_value(now))),
      });
    };

    let existing = match staged.get(&id) {
      Some(&quantity) => Some(quantity),
      None => self
        .store
        .get(&self.collection, &id)
        .await
        .map_err(Error::store)?
        .map(|doc| existing_quantity(&doc)),
    };

    let planned = match existing {
      Some(current) => {
        let quantity = current.saturating_add(incoming);
        PlannedWrite {
          subscription_id: subscription_id.to_owned(),
          target: WriteTarget::Update { id },
          quantity,
          fields: document_fields(&due.item, quantity, ("updatedAt", timestamp_value(now))),
        }
      }
      None => PlannedWrite {
        subscription_id: subscription_id.to_owned(),
        target:          WriteTarget::Create { id },
        quantity:        incoming,
        fields:          document_fields(&due.item, incoming, ("createdAt", timestamp_value(now))),
      },
    };
    Ok(planned)
  }

  /// Send a planned write to the store.
  pub async fn apply(&self, planned: &PlannedWrite) -> Result<()> {
    match &planned.target {
      WriteTarget::Update { id } | WriteTarget::Create { id } => {
        self
          .store
          .set_merge(&self.collection, id, planned.fields.clone())
          .await
          .map_err(Error::store)?;
      }
      WriteTarget::Add => {
        let id = self
          .store
          .add(&self.collection, planned.fields.clone())
          .await
          .map_err(Error::store)?;
        debug!(collection = %self.collection, %id, "added document under generated id");
      }
    }
    Ok(())
  }

  /// Merge every due item of `bundles` into the destination collection.
  ///
  /// A failure on one item is logged and counted; the remaining items are
  /// still written.
  pub async fn write_due(&self, bundles: &[DueBundle], dry_run: bool, now: DateTime<Utc>) -> WriteReport {
    let mut report = WriteReport::default();
    let mut staged = BTreeMap::new();

    for bundle in bundles {
      for due in &bundle.items {
        let label = due.item.label();
        let outcome = match self.plan(&bundle.subscription_id, due, now, &staged).await {
          Ok(planned) if dry_run => Ok(planned),
          Ok(planned) => self.apply(&planned).await.map(|()| planned),
          Err(e) => Err(e),
        };

        match outcome {
          Ok(planned) => {
            if dry_run {
              info!(
                collection = %self.collection,
                target = ?planned.target,
                quantity = planned.quantity,
                item = %label,
                "dry run: would write"
              );
            } else {
              debug!(
                collection = %self.collection,
                target = ?planned.target,
                quantity = planned.quantity,
                item = %label,
                "wrote"
              );
            }
            if let WriteTarget::Update { id } | WriteTarget::Create { id } = &planned.target {
              staged.insert(id.clone(), planned.quantity);
            }
            report.written += 1;
            report.planned.push(planned);
          }
          Err(e) => {
            warn!(collection = %self.collection, item = %label, error = %e, "write failed");
            report.failed += 1;
          }
        }
      }
    }

    report
  }
}
