//! The last-purchased index: lookup key → most recent purchase instant.
//!
//! History documents come in whatever shape the writing flow chose, so item
//! lists are located by field synonyms first and by a bounded breadth-first
//! walk of the document second.

use std::collections::{BTreeMap, VecDeque, btree_map};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
  identity::{self, KeyKind, LookupKey},
  item::ItemRecord,
  store::Document,
  timestamp,
};

/// Entry-level timestamp fields, in priority order.
pub const ENTRY_TIMESTAMP_FIELDS: &[&str] =
  &["createdAt", "created_at", "timeStamp", "timestamp", "purchasedAt"];

/// Item-level timestamp fields, in priority order.
pub const ITEM_TIMESTAMP_FIELDS: &[&str] = &["timeStamp", "timestamp", "createdAt", "purchasedAt"];

/// Fields that hold an entry's item array directly.
pub const ITEM_ARRAY_FIELDS: &[&str] =
  &["items", "history", "products", "lineItems", "line_items", "orderItems"];

const MAX_SEARCH_DEPTH: usize = 6;
const PLAUSIBILITY_SAMPLE: usize = 10;
const MIN_NUM_KEY_DIGITS: usize = 4;

// ─── Index ───────────────────────────────────────────────────────────────────

/// Per-user map from lookup key to the latest purchase seen under that key.
///
/// Iteration follows key order, so scans over the index are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastPurchasedIndex {
  entries: BTreeMap<LookupKey, DateTime<Utc>>,
}

impl LastPurchasedIndex {
  pub fn new() -> Self { Self::default() }

  /// Record a purchase under `key`, keeping the later of the two instants.
  pub fn record(&mut self, key: LookupKey, at: DateTime<Utc>) {
    match self.entries.entry(key) {
      btree_map::Entry::Vacant(slot) => {
        slot.insert(at);
      }
      btree_map::Entry::Occupied(mut slot) => {
        if at > *slot.get() {
          slot.insert(at);
        }
      }
    }
  }

  /// Record every candidate key of `item`, plus a `num:` key for the digit
  /// run of each `id:` and `raw:` key.
  pub fn record_item(&mut self, item: &ItemRecord, at: DateTime<Utc>) {
    for key in item.candidate_keys() {
      if matches!(key.kind(), KeyKind::Id | KeyKind::Raw) {
        let digits = identity::longest_digit_run(key.value());
        if digits.len() >= MIN_NUM_KEY_DIGITS {
          self.record(LookupKey::new(KeyKind::Num, digits), at);
        }
      }
      self.record(key, at);
    }
  }

  pub fn get(&self, key: &LookupKey) -> Option<DateTime<Utc>> { self.entries.get(key).copied() }

  pub fn iter(&self) -> impl Iterator<Item = (&LookupKey, DateTime<Utc>)> {
    self.entries.iter().map(|(k, at)| (k, *at))
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

// ─── Building ────────────────────────────────────────────────────────────────

/// Build the index from a user's history documents. Entries and items that
/// cannot be interpreted are skipped.
pub fn build_index<'a>(entries: impl IntoIterator<Item = &'a Document>) -> LastPurchasedIndex {
  let mut index = LastPurchasedIndex::new();
  for entry in entries {
    index_entry(&mut index, entry);
  }
  index
}

fn index_entry(index: &mut LastPurchasedIndex, entry: &Document) {
  let entry_time =
    timestamp::first_timestamp(&entry.data, ENTRY_TIMESTAMP_FIELDS).or(entry.create_time);

  for item in locate_items(&entry.data) {
    let Some(at) = timestamp::first_timestamp(&item.raw, ITEM_TIMESTAMP_FIELDS).or(entry_time)
    else {
      continue;
    };
    index.record_item(&item, at);
  }
}

/// Find the items of a history entry.
///
/// Tries the [`ITEM_ARRAY_FIELDS`] first, then the first plausible item array
/// found breadth-first within [`MAX_SEARCH_DEPTH`] levels, then the entry
/// itself when it looks like an item. Non-object array elements are dropped.
pub fn locate_items(data: &Map<String, Value>) -> Vec<ItemRecord> {
  let array = ITEM_ARRAY_FIELDS
    .iter()
    .find_map(|field| data.get(*field).and_then(Value::as_array))
    .or_else(|| find_item_array(data));

  match array {
    Some(elements) => elements.iter().filter_map(ItemRecord::from_value).collect(),
    None if is_item_shaped(data) => vec![ItemRecord::from_map(data.clone())],
    None => Vec::new(),
  }
}

fn find_item_array(root: &Map<String, Value>) -> Option<&Vec<Value>> {
  let mut queue: VecDeque<(&Value, usize)> = root.values().map(|v| (v, 1)).collect();

  while let Some((value, depth)) = queue.pop_front() {
    match value {
      Value::Array(elements) => {
        if is_plausible_item_array(elements) {
          return Some(elements);
        }
        if depth < MAX_SEARCH_DEPTH {
          queue.extend(elements.iter().map(|v| (v, depth + 1)));
        }
      }
      Value::Object(map) if depth < MAX_SEARCH_DEPTH => {
        queue.extend(map.values().map(|v| (v, depth + 1)));
      }
      _ => {}
    }
  }
  None
}

/// At least 30% of the first ten elements are item-shaped objects.
fn is_plausible_item_array(elements: &[Value]) -> bool {
  let sample = &elements[..elements.len().min(PLAUSIBILITY_SAMPLE)];
  if sample.is_empty() {
    return false;
  }
  let hits = sample
    .iter()
    .filter(|v| v.as_object().is_some_and(is_item_shaped))
    .count();
  hits * 10 >= sample.len() * 3
}

fn is_item_shaped(map: &Map<String, Value>) -> bool {
  map.keys().any(|field| {
    identity::is_id_field(field)
      || field.eq_ignore_ascii_case("url")
      || field.eq_ignore_ascii_case("name")
      || ITEM_TIMESTAMP_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(field))
  })
}
