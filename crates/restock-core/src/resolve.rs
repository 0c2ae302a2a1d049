//! Due-item resolution: which subscription items should be reordered now.
//!
//! Each item is looked up in the [`LastPurchasedIndex`] by an ordered list of
//! matchers, from strict to lenient. The first matcher that finds a purchase
//! decides the item's last-purchased instant; the item is due when at least
//! its threshold of whole days has passed since then.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  history::LastPurchasedIndex,
  identity::{self, KeyKind, LookupKey},
  item::{ItemRecord, SubscriptionRecord},
};

/// Threshold used when neither the item nor its subscription sets one.
pub const DEFAULT_THRESHOLD_DAYS: u32 = 30;

/// Reported as days-since-purchase for items with no purchase on record.
pub const NEVER_PURCHASED_DAYS: i64 = i64::MAX;

const MIN_NUMERIC_DIGITS: usize = 4;
const MIN_SUBSTRING_TOKEN_CHARS: usize = 2;
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePolicy {
  pub default_threshold_days:  u32,
  /// Treat items with no purchase on record as due.
  pub include_never_purchased: bool,
}

impl Default for DuePolicy {
  fn default() -> Self {
    Self { default_threshold_days: DEFAULT_THRESHOLD_DAYS, include_never_purchased: false }
  }
}

/// The threshold for one item: its own frequency, else its subscription's,
/// else the policy default.
pub fn threshold_days(item: &ItemRecord, subscription: &SubscriptionRecord, policy: &DuePolicy) -> u32 {
  item
    .frequency_days
    .or(subscription.frequency_days)
    .unwrap_or(policy.default_threshold_days)
}

// ─── Matchers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
  Exact,
  Numeric,
  NameTokens,
}

/// A purchase found for an item: the index key that matched and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
  pub key:      LookupKey,
  pub at:       DateTime<Utc>,
  pub strategy: MatchStrategy,
}

/// A matcher looks for a purchase of the item with the given candidate keys.
pub type Matcher = fn(&BTreeSet<LookupKey>, &LastPurchasedIndex) -> Option<Match>;

/// Matchers in the order they are tried.
pub const MATCHERS: &[Matcher] = &[match_exact, match_numeric, match_name_tokens];

/// The first candidate key, in key order, present in the index.
pub fn match_exact(keys: &BTreeSet<LookupKey>, index: &LastPurchasedIndex) -> Option<Match> {
  keys.iter().find_map(|key| {
    index
      .get(key)
      .map(|at| Match { key: key.clone(), at, strategy: MatchStrategy::Exact })
  })
}

fn numeric_runs<'a>(keys: impl Iterator<Item = &'a LookupKey>) -> BTreeSet<&'a str> {
  keys
    .filter(|key| key.kind().is_numeric_source())
    .map(|key| identity::longest_digit_run(key.value()))
    .filter(|digits| digits.len() >= MIN_NUMERIC_DIGITS)
    .collect()
}

/// The first index key whose digit run contains, or is contained in, a digit
/// run of the item's id-like keys.
pub fn match_numeric(keys: &BTreeSet<LookupKey>, index: &LastPurchasedIndex) -> Option<Match> {
  let wanted = numeric_runs(keys.iter());
  if wanted.is_empty() {
    return None;
  }

  index.iter().find_map(|(key, at)| {
    if !key.kind().is_numeric_source() {
      return None;
    }
    let digits = identity::longest_digit_run(key.value());
    if digits.len() < MIN_NUMERIC_DIGITS {
      return None;
    }
    wanted
      .iter()
      .any(|w| w.contains(digits) || digits.contains(*w))
      .then(|| Match { key: key.clone(), at, strategy: MatchStrategy::Numeric })
  })
}

/// Lower-cased tokens of a name, splitting on whitespace and punctuation.
pub fn name_tokens(name: &str) -> Vec<String> {
  name
    .to_lowercase()
    .chars()
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect::<String>()
    .split_whitespace()
    .map(str::to_owned)
    .collect()
}

/// Whether two token lists describe the same product: at least half of the
/// smaller list's tokens appear in the larger one.
///
/// A token appears when it equals a token of the larger list or, for tokens
/// of two or more characters, occurs inside the larger list's tokens joined
/// without spaces. The second rule covers names written without word breaks.
pub fn tokens_overlap(a: &[String], b: &[String]) -> bool {
  let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
  if small.is_empty() {
    return false;
  }
  let joined: String = large.concat();
  let present = small
    .iter()
    .filter(|token| {
      large.contains(*token)
        || (token.chars().count() >= MIN_SUBSTRING_TOKEN_CHARS && joined.contains(token.as_str()))
    })
    .count();
  present * 2 >= small.len()
}

/// The first `name:` index key whose tokens overlap the item's name tokens.
pub fn match_name_tokens(keys: &BTreeSet<LookupKey>, index: &LastPurchasedIndex) -> Option<Match> {
  let wanted: Vec<Vec<String>> = keys
    .iter()
    .filter(|key| key.kind() == KeyKind::Name)
    .map(|key| name_tokens(key.value()))
    .filter(|tokens| !tokens.is_empty())
    .collect();
  if wanted.is_empty() {
    return None;
  }

  index
    .iter()
    .filter(|(key, _)| key.kind() == KeyKind::Name)
    .find_map(|(key, at)| {
      let tokens = name_tokens(key.value());
      wanted
        .iter()
        .any(|w| tokens_overlap(w, &tokens))
        .then(|| Match { key: key.clone(), at, strategy: MatchStrategy::NameTokens })
    })
}

/// Run the [`MATCHERS`] in order and return the first hit.
pub fn find_last_purchase(item: &ItemRecord, index: &LastPurchasedIndex) -> Option<Match> {
  if !item.is_identity_bearing() {
    return None;
  }
  let keys = item.candidate_keys();
  MATCHERS.iter().find_map(|matcher| matcher(&keys, index))
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Why an item was judged due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueDiagnostics {
  /// The index key that matched, rendered as `<kind>:<value>`.
  pub matched_key:              Option<LookupKey>,
  pub strategy:                 Option<MatchStrategy>,
  pub last_purchased_date:      Option<DateTime<Utc>>,
  /// [`NEVER_PURCHASED_DAYS`] when nothing matched.
  pub days_since_last_purchase: i64,
  pub threshold_days:           u32,
}

/// A due item with its normalized quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueItem {
  pub item:        ItemRecord,
  pub quantity:    u32,
  pub diagnostics: DueDiagnostics,
}

/// The due items of one subscription. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueBundle {
  pub subscription_id: String,
  pub items:           Vec<DueItem>,
}

/// Whole days from `at` to `now`, rounded toward negative infinity.
pub fn days_between(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
  (now - at).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// Decide one item. Returns the diagnostics when the item is due.
pub fn evaluate_item(
  item: &ItemRecord,
  subscription: &SubscriptionRecord,
  index: &LastPurchasedIndex,
  policy: &DuePolicy,
  now: DateTime<Utc>,
) -> Option<DueDiagnostics> {
  let threshold = threshold_days(item, subscription, policy);

  match find_last_purchase(item, index) {
    Some(found) => {
      let days = days_between(found.at, now);
      (days >= i64::from(threshold)).then(|| DueDiagnostics {
        matched_key:              Some(found.key),
        strategy:                 Some(found.strategy),
        last_purchased_date:      Some(found.at),
        days_since_last_purchase: days,
        threshold_days:           threshold,
      })
    }
    None => policy.include_never_purchased.then_some(DueDiagnostics {
      matched_key:              None,
      strategy:                 None,
      last_purchased_date:      None,
      days_since_last_purchase: NEVER_PURCHASED_DAYS,
      threshold_days:           threshold,
    }),
  }
}

/// Compute the due bundles for a user's subscriptions. Subscriptions with no
/// due items produce no bundle; bundle order follows `subscriptions`.
pub fn resolve_due(
  subscriptions: &[SubscriptionRecord],
  index: &LastPurchasedIndex,
  policy: &DuePolicy,
  now: DateTime<Utc>,
) -> Vec<DueBundle> {
  subscriptions
    .iter()
    .filter_map(|sub| {
      let items: Vec<DueItem> = sub
        .items
        .iter()
        .filter_map(|item| {
          evaluate_item(item, sub, index, policy, now).map(|diagnostics| DueItem {
            item: item.clone(),
            quantity: item.quantity.max(1),
            diagnostics,
          })
        })
        .collect();
      (!items.is_empty()).then(|| DueBundle { subscription_id: sub.id.clone(), items })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};
  use serde_json::{Value, json};

  use super::*;
  use crate::{history::build_index, store::Document};

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).single().expect("valid") }

  fn history(entries: &[(Value, i64)]) -> LastPurchasedIndex {
    let docs: Vec<Document> = entries
      .iter()
      .enumerate()
      .map(|(i, (item, days_ago))| {
        let at = now() - Duration::days(*days_ago);
        let Value::Object(data) = json!({ "createdAt": at.to_rfc3339(), "items": [item] }) else {
          unreachable!()
        };
        Document { id: format!("h{i}"), data, create_time: None }
      })
      .collect();
    build_index(&docs)
  }

  fn subscription(id: &str, frequency: Option<u32>, items: Vec<Value>) -> SubscriptionRecord {
    SubscriptionRecord {
      id:             id.into(),
      frequency_days: frequency,
      items:          items.iter().filter_map(ItemRecord::from_value).collect(),
    }
  }

  fn resolve(subs: &[SubscriptionRecord], index: &LastPurchasedIndex) -> Vec<DueBundle> {
    resolve_due(subs, index, &DuePolicy::default(), now())
  }

  #[test]
  fn scenario_a_due_by_id() {
    let index = history(&[(json!({ "id": "123456" }), 40)]);
    let subs = [subscription("s1", Some(30), vec![json!({ "id": "123456", "quantity": 2 })])];

    let bundles = resolve(&subs, &index);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].subscription_id, "s1");
    let due = &bundles[0].items[0];
    assert_eq!(due.quantity, 2);
    assert_eq!(due.diagnostics.days_since_last_purchase, 40);
    assert_eq!(due.diagnostics.threshold_days, 30);
    assert_eq!(due.diagnostics.strategy, Some(MatchStrategy::Exact));
  }

  #[test]
  fn scenario_b_not_yet_due() {
    let index = history(&[(json!({ "id": "123456" }), 40)]);
    let subs = [subscription("s1", Some(45), vec![json!({ "id": "123456", "quantity": 2 })])];
    assert!(resolve(&subs, &index).is_empty());
  }

  #[test]
  fn scenario_c_unsegmented_name() {
    let index = history(&[(json!({ "name": "味噌汁 セット" }), 10)]);
    let subs = [subscription("s1", None, vec![json!({ "name": "味噌汁セット", "frequency": 7 })])];

    let bundles = resolve(&subs, &index);
    assert_eq!(bundles.len(), 1);
    let diagnostics = &bundles[0].items[0].diagnostics;
    let key = diagnostics.matched_key.as_ref().map(ToString::to_string).unwrap_or_default();
    assert!(key.starts_with("name:"), "{key}");
    assert_eq!(diagnostics.strategy, Some(MatchStrategy::NameTokens));
    assert_eq!(diagnostics.days_since_last_purchase, 10);
  }

  #[test]
  fn threshold_is_inclusive() {
    let index = history(&[(json!({ "id": "123456" }), 30)]);
    let due = [subscription("s1", Some(30), vec![json!({ "id": "123456" })])];
    let not_due = [subscription("s1", Some(31), vec![json!({ "id": "123456" })])];
    assert_eq!(resolve(&due, &index).len(), 1);
    assert!(resolve(&not_due, &index).is_empty());
  }

  #[test]
  fn partial_days_round_down() {
    let at = now() - Duration::days(6) - Duration::hours(23);
    assert_eq!(days_between(at, now()), 6);
    assert_eq!(days_between(now() + Duration::hours(1), now()), -1);
  }

  #[test]
  fn exact_id_beats_name() {
    let index = history(&[(json!({ "id": "123456" }), 40), (json!({ "name": "milk" }), 1)]);
    let subs = [subscription("s1", Some(30), vec![json!({ "id": "123456", "name": "milk" })])];

    let bundles = resolve(&subs, &index);
    let key = bundles[0].items[0].diagnostics.matched_key.clone();
    assert_eq!(key, Some(LookupKey::new(KeyKind::Id, "123456")));
  }

  #[test]
  fn numeric_suffix_match() {
    let index = history(&[(json!({ "url": "https://shop.example.jp/g/g4902102072618/" }), 35)]);
    let subs = [subscription("s1", None, vec![json!({ "productId": "2072618" })])];

    let bundles = resolve(&subs, &index);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].items[0].diagnostics.strategy, Some(MatchStrategy::Numeric));
  }

  #[test]
  fn short_digit_runs_never_match() {
    let index = history(&[(json!({ "id": "A-1234" }), 90)]);
    let subs = [subscription("s1", None, vec![json!({ "id": "B-123x" })])];
    assert!(resolve(&subs, &index).is_empty());
  }

  #[test]
  fn item_frequency_overrides_subscription() {
    let index = history(&[(json!({ "id": "123456" }), 10)]);
    let subs = [subscription("s1", Some(60), vec![json!({ "id": "123456", "frequency": 7 })])];
    let bundles = resolve(&subs, &index);
    assert_eq!(bundles[0].items[0].diagnostics.threshold_days, 7);
  }

  #[test]
  fn default_threshold_applies() {
    let index = history(&[(json!({ "id": "123456" }), 29), (json!({ "id": "654321" }), 30)]);
    let subs = [subscription("s1", None, vec![json!({ "id": "123456" }), json!({ "id": "654321" })])];
    let bundles = resolve(&subs, &index);
    assert_eq!(bundles[0].items.len(), 1);
    assert_eq!(bundles[0].items[0].diagnostics.days_since_last_purchase, 30);
  }

  #[test]
  fn never_purchased_follows_policy() {
    let index = LastPurchasedIndex::new();
    let subs = [subscription("s1", None, vec![json!({ "id": "777777" })])];
    assert!(resolve(&subs, &index).is_empty());

    let policy = DuePolicy { include_never_purchased: true, ..DuePolicy::default() };
    let bundles = resolve_due(&subs, &index, &policy, now());
    let diagnostics = &bundles[0].items[0].diagnostics;
    assert_eq!(diagnostics.days_since_last_purchase, NEVER_PURCHASED_DAYS);
    assert_eq!(diagnostics.matched_key, None);
  }

  #[test]
  fn items_without_identity_never_match() {
    let index = history(&[(json!({ "price": 100 }), 90)]);
    let subs = [subscription("s1", None, vec![json!({ "price": 100 })])];
    assert!(resolve(&subs, &index).is_empty());
  }

  #[test]
  fn bundles_group_by_subscription() {
    let index = history(&[(json!({ "id": "111111" }), 40), (json!({ "id": "222222" }), 40)]);
    let subs = [
      subscription("weekly", Some(7), vec![json!({ "id": "111111" }), json!({ "id": "222222" })]),
      subscription("quiet", Some(90), vec![json!({ "id": "111111" })]),
    ];
    let bundles = resolve(&subs, &index);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].subscription_id, "weekly");
    assert_eq!(bundles[0].items.len(), 2);
  }

  #[test]
  fn token_overlap_rules() {
    let t = |s: &str| name_tokens(s);
    assert!(tokens_overlap(&t("Organic Milk 1L"), &t("organic milk")));
    assert!(tokens_overlap(&t("味噌汁セット"), &t("味噌汁 セット")));
    assert!(!tokens_overlap(&t("green tea"), &t("black coffee beans")));
    assert!(!tokens_overlap(&t(""), &t("milk")));
  }
}
