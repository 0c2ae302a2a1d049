//! Item and subscription records read from loosely-shaped documents.
//!
//! Records are kept next to their raw JSON so identity derivation can look at
//! every field, while the handful of typed attributes the job acts on are
//! extracted once, leniently.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
  identity::{self, LookupKey},
  store::Document,
};

const QUANTITY_FIELDS: &[&str] = &["quantity", "qty"];
const FREQUENCY_FIELDS: &[&str] = &["frequency", "frequencyDays", "frequency_days"];

// ─── Field helpers ───────────────────────────────────────────────────────────

/// Read a positive whole number from a number or numeric string, flooring
/// fractions. Zero, negatives and non-numbers yield `None`.
pub fn positive_int(value: &Value) -> Option<u32> {
  let n = match value {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  if !n.is_finite() || n < 1.0 {
    return None;
  }
  Some(n.floor().min(f64::from(u32::MAX)) as u32)
}

fn first_positive_int(record: &Map<String, Value>, fields: &[&str]) -> Option<u32> {
  fields.iter().filter_map(|f| record.get(*f)).find_map(positive_int)
}

fn text_field(record: &Map<String, Value>, field: &str) -> Option<String> {
  record
    .get(field)
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
}

fn number_field(record: &Map<String, Value>, field: &str) -> Option<f64> {
  record.get(field).and_then(Value::as_f64)
}

// ─── ItemRecord ──────────────────────────────────────────────────────────────

/// One purchasable line, whether it came from history, a subscription or a
/// cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
  /// The record exactly as stored.
  pub raw:            Map<String, Value>,
  pub url:            Option<String>,
  pub name:           Option<String>,
  pub image:          Option<String>,
  /// Always at least 1.
  pub quantity:       u32,
  pub frequency_days: Option<u32>,
  pub price:          Option<f64>,
  pub price_tax:      Option<f64>,
}

impl ItemRecord {
  pub fn from_map(raw: Map<String, Value>) -> Self {
    Self {
      url:            text_field(&raw, "url"),
      name:           text_field(&raw, "name"),
      image:          text_field(&raw, "image"),
      quantity:       first_positive_int(&raw, QUANTITY_FIELDS).unwrap_or(1),
      frequency_days: first_positive_int(&raw, FREQUENCY_FIELDS),
      price:          number_field(&raw, "price"),
      price_tax:      number_field(&raw, "priceTax"),
      raw,
    }
  }

  /// Build a record from any JSON value; only objects qualify.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Object(map) => Some(Self::from_map(map.clone())),
      _ => None,
    }
  }

  pub fn field(&self, name: &str) -> Option<&Value> { self.raw.get(name) }

  /// The first identifier-like field present on the record, if any.
  pub fn raw_identifier(&self) -> Option<&Value> {
    self
      .raw
      .iter()
      .find(|(field, value)| identity::is_id_field(field) && !value.is_null())
      .map(|(_, value)| value)
  }

  pub fn candidate_keys(&self) -> BTreeSet<LookupKey> { identity::candidate_keys(&self.raw) }

  /// Whether the record carries anything history can be matched on: a
  /// normalizable id, an id inside its url, or a name.
  pub fn is_identity_bearing(&self) -> bool {
    let has_id = self
      .raw
      .iter()
      .any(|(field, value)| identity::is_id_field(field) && !identity::normalize_id(value, None).is_empty());
    let has_url_id = self
      .url
      .as_deref()
      .is_some_and(|url| !identity::extract_id_from_url(url).is_empty());
    has_id || has_url_id || self.name.is_some()
  }

  /// Short human-readable label for logs.
  pub fn label(&self) -> String {
    if let Some(name) = &self.name {
      return name.clone();
    }
    if let Some(url) = &self.url {
      return url.clone();
    }
    match self.raw_identifier() {
      Some(Value::String(s)) => s.clone(),
      Some(other) => other.to_string(),
      None => "(unnamed item)".to_owned(),
    }
  }
}

// ─── SubscriptionRecord ──────────────────────────────────────────────────────

/// A recurring-purchase configuration: a set of items reordered every
/// `frequency_days` unless an item overrides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
  pub id:             String,
  pub frequency_days: Option<u32>,
  pub items:          Vec<ItemRecord>,
}

impl SubscriptionRecord {
  /// Read a subscription from its stored document. Non-object entries in the
  /// `items` array are ignored.
  pub fn from_document(doc: &Document) -> Self {
    let items = doc
      .data
      .get("items")
      .and_then(Value::as_array)
      .map(|items| items.iter().filter_map(ItemRecord::from_value).collect())
      .unwrap_or_default();

    Self {
      id: doc.id.clone(),
      frequency_days: first_positive_int(&doc.data, FREQUENCY_FIELDS),
      items,
    }
  }
}
