//! Identity normalization: canonical ids and lookup keys for item records.
//!
//! The same product reaches the store as a numeric id, an opaque SKU, a
//! detail-page URL or a free-text name, depending on which flow wrote the
//! record. Nothing in this module fails: a field that cannot be interpreted
//! simply contributes no key.

use std::{collections::BTreeSet, fmt, sync::OnceLock};

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Field names that carry a product identifier. Compared case-insensitively.
pub const ID_FIELDS: &[&str] = &[
  "id",
  "itemId",
  "item_id",
  "productId",
  "product_id",
  "sku",
  "skuId",
  "shop_item_id",
  "product_id_jp",
];

/// Minimum length of an alphanumeric or digit run accepted as an id.
pub const MIN_ID_LEN: usize = 4;

// ─── Lookup keys ─────────────────────────────────────────────────────────────

/// The family a [`LookupKey`] belongs to.
///
/// Declaration order is the iteration order of key sets and of the
/// last-purchased index, so stronger identities are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
  Id,
  Num,
  Raw,
  RawObj,
  Name,
}

impl KeyKind {
  pub fn prefix(self) -> &'static str {
    match self {
      Self::Id => "id",
      Self::Num => "num",
      Self::Raw => "raw",
      Self::RawObj => "rawobj",
      Self::Name => "name",
    }
  }

  /// Whether keys of this kind take part in digit-run matching.
  pub fn is_numeric_source(self) -> bool {
    matches!(self, Self::Id | Self::Num | Self::Raw)
  }
}

/// A normalized key under which a purchase can be found. Rendered as
/// `<kind>:<value>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LookupKey {
  kind:  KeyKind,
  value: String,
}

impl LookupKey {
  pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
    Self { kind, value: value.into() }
  }

  pub fn kind(&self) -> KeyKind { self.kind }

  pub fn value(&self) -> &str { &self.value }
}

impl fmt::Display for LookupKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind.prefix(), self.value)
  }
}

impl Serialize for LookupKey {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

// ─── Patterns ────────────────────────────────────────────────────────────────

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
  cell.get_or_init(|| {
    Regex::new(source).unwrap_or_else(|error| panic!("identity regex {source:?} failed to compile: {error}"))
  })
}

static DIGIT_RUN_RE: OnceLock<Regex> = OnceLock::new();
static ALNUM_RUN_RE: OnceLock<Regex> = OnceLock::new();
static ID_SHAPE_RE: OnceLock<Regex> = OnceLock::new();
static HTML_SEGMENT_RE: OnceLock<Regex> = OnceLock::new();
static QUERY_ID_RE: OnceLock<Regex> = OnceLock::new();
static URL_ORIGIN_RE: OnceLock<Regex> = OnceLock::new();

fn digit_run_regex() -> &'static Regex { pattern(&DIGIT_RUN_RE, "[0-9]+") }

fn alnum_run_regex() -> &'static Regex { pattern(&ALNUM_RUN_RE, "[A-Za-z0-9]+") }

fn id_shape_regex() -> &'static Regex { pattern(&ID_SHAPE_RE, r"^[A-Za-z0-9_.\-]{4,}$") }

fn html_segment_regex() -> &'static Regex {
  pattern(&HTML_SEGMENT_RE, r"/([A-Za-z0-9_.\-]{4,})\.html(?:[?#]|$)")
}

fn query_id_regex() -> &'static Regex { pattern(&QUERY_ID_RE, r"[?&]id=([A-Za-z0-9_.\-]{4,})") }

/// `scheme://host[:port]`, which never identifies a product.
fn url_origin_regex() -> &'static Regex {
  pattern(&URL_ORIGIN_RE, r"^[A-Za-z][A-Za-z0-9+.\-]*://[^/?#]*")
}

/// The longest match of `re` in `s` satisfying `accept`; the first wins a tie.
fn longest_match<'s>(re: &Regex, s: &'s str, accept: impl Fn(&str) -> bool) -> &'s str {
  re.find_iter(s)
    .map(|m| m.as_str())
    .filter(|run| accept(run))
    .fold("", |best, run| if run.len() > best.len() { run } else { best })
}

/// The longest run of ASCII digits in `s`; the first one wins a tie.
pub fn longest_digit_run(s: &str) -> &str { longest_match(digit_run_regex(), s, |_| true) }

/// The longest run of ASCII letters and digits in `s`.
pub fn longest_alnum_run(s: &str) -> &str { longest_match(alnum_run_regex(), s, |_| true) }

fn is_id_shaped(s: &str) -> bool { id_shape_regex().is_match(s) }

// ─── Ids ─────────────────────────────────────────────────────────────────────

/// Extract a product id from a detail-page URL.
///
/// Tries, in order: the path segment before a trailing `.html`, an `id`
/// query parameter, the longest alphanumeric run of at least four characters
/// that contains a digit, and finally the longest digit run. The scheme and
/// host are ignored by both fallbacks. Returns an empty string when nothing
/// qualifies.
pub fn extract_id_from_url(url: &str) -> String {
  let url = url.trim();
  if url.is_empty() {
    return String::new();
  }
  if let Some(id) = html_segment_id(url).or_else(|| query_param_id(url)) {
    return id.to_owned();
  }
  let rest = match url_origin_regex().find(url) {
    Some(origin) => &url[origin.end()..],
    None => url,
  };
  let alnum = longest_match(alnum_run_regex(), rest, |run| run.bytes().any(|b| b.is_ascii_digit()));
  if alnum.len() >= MIN_ID_LEN {
    return alnum.to_owned();
  }
  longest_digit_run(rest).to_owned()
}

fn html_segment_id(url: &str) -> Option<&str> {
  let caps = html_segment_regex().captures(url)?;
  caps.get(1).map(|m| m.as_str())
}

fn query_param_id(url: &str) -> Option<&str> {
  let caps = query_id_regex().captures(url)?;
  caps.get(1).map(|m| m.as_str())
}

/// Normalize a free-form identifier string.
pub fn normalize_id_str(s: &str) -> String {
  let s = s.trim();
  if s.is_empty() {
    return String::new();
  }
  if is_id_shaped(s) {
    return s.to_owned();
  }
  let alnum = longest_alnum_run(s);
  if alnum.len() >= MIN_ID_LEN {
    return alnum.to_owned();
  }
  let digits = longest_digit_run(s);
  if digits.len() >= MIN_ID_LEN {
    return digits.to_owned();
  }
  String::new()
}

/// Derive a canonical id from a raw identifier value, preferring an id
/// embedded in `url` when one can be found there.
pub fn normalize_id(value: &Value, url: Option<&str>) -> String {
  if let Some(url) = url {
    let from_url = extract_id_from_url(url);
    if !from_url.is_empty() {
      return from_url;
    }
  }
  match value {
    Value::Null | Value::Bool(_) => String::new(),
    Value::Number(n) => {
      let s = n.to_string();
      let digits = longest_digit_run(&s);
      if digits.is_empty() { s.clone() } else { digits.to_owned() }
    }
    Value::String(s) => normalize_id_str(s),
    Value::Array(_) | Value::Object(_) => normalize_id_str(&value.to_string()),
  }
}

/// Render an identifier value as trimmed text, or `None` for values that
/// cannot identify anything.
fn identifier_text(value: &Value) -> Option<String> {
  let text = match value {
    Value::Null | Value::Bool(_) => return None,
    Value::String(s) => s.trim().to_owned(),
    other => other.to_string(),
  };
  (!text.is_empty()).then_some(text)
}

/// Lower-case a product name and collapse its whitespace.
pub fn normalize_name(name: &str) -> String {
  name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Whether `field` is one of the [`ID_FIELDS`], ignoring case.
pub fn is_id_field(field: &str) -> bool {
  ID_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(field))
}

// ─── Candidate keys ──────────────────────────────────────────────────────────

#[derive(Default)]
struct KeySet(BTreeSet<LookupKey>);

impl KeySet {
  fn push(&mut self, kind: KeyKind, value: impl Into<String>) {
    let value = value.into();
    if !value.is_empty() {
      self.0.insert(LookupKey::new(kind, value));
    }
  }

  fn push_identifier(&mut self, value: &Value) {
    let Some(text) = identifier_text(value) else { return };
    self.push(KeyKind::Id, normalize_id(value, None));
    self.push(KeyKind::Num, longest_digit_run(&text));
    self.push(KeyKind::Raw, text);
  }
}

/// Every key under which `record` could plausibly have been stored.
///
/// The result is a set; callers match against all of it rather than picking
/// one canonical key.
pub fn candidate_keys(record: &Map<String, Value>) -> BTreeSet<LookupKey> {
  let mut keys = KeySet::default();

  for (field, value) in record {
    if is_id_field(field) {
      keys.push_identifier(value);
    }
  }

  if let Some(url) = record.get("url").and_then(Value::as_str).map(str::trim)
    && !url.is_empty()
  {
    keys.push(KeyKind::Id, extract_id_from_url(url));
    keys.push(KeyKind::Num, longest_digit_run(url));
    keys.push(KeyKind::Raw, url);
  }

  if let Some(name) = record.get("name").and_then(Value::as_str) {
    keys.push(KeyKind::Name, normalize_name(name));
  }

  if !record.is_empty()
    && let Ok(serialized) = serde_json::to_string(record)
  {
    keys.push(KeyKind::RawObj, serialized);
  }

  keys.0
}
