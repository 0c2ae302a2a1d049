//! Tests for the writer and the batch loop against `MemoryStore`.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use restock_core::{
  item::ItemRecord,
  memory::MemoryStore,
  resolve::{DueBundle, DueDiagnostics, DueItem},
  store::{Document, DocumentStore},
};
use serde_json::{Map, Value, json};

use crate::{
  RunOptions, Runner, UpsertWriter, WriteTarget,
  upsert::{AUTO_SUBSCRIPTION_SOURCE, destination_key},
};

fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).single().expect("valid") }

fn object(value: Value) -> Map<String, Value> {
  let Value::Object(map) = value else { panic!("expected object") };
  map
}

fn days_ago(days: i64) -> String { (now() - chrono::Duration::days(days)).to_rfc3339() }

fn options() -> RunOptions { RunOptions { delay: Duration::ZERO, ..RunOptions::default() } }

/// A user `uid` with one history entry and one subscription.
fn seed_user(store: &MemoryStore, uid: &str, history: Value, subscription: Value) {
  store.seed("users", uid, Map::new(), None).unwrap();
  store
    .seed(&format!("users/{uid}/history"), "h1", object(history), None)
    .unwrap();
  store
    .seed(&format!("users/{uid}/subscriptions"), "s1", object(subscription), None)
    .unwrap();
}

fn milk_user(store: &MemoryStore, uid: &str) {
  seed_user(
    store,
    uid,
    json!({ "createdAt": days_ago(40), "items": [{ "id": "123456", "name": "Milk" }] }),
    json!({ "frequency": 30, "items": [{ "id": "123456", "name": "Milk", "quantity": 2, "price": 198 }] }),
  );
}

fn due(item: Value, quantity: u32) -> DueItem {
  DueItem {
    item: ItemRecord::from_value(&item).expect("object"),
    quantity,
    diagnostics: DueDiagnostics {
      matched_key:              None,
      strategy:                 None,
      last_purchased_date:      None,
      days_since_last_purchase: 40,
      threshold_days:           30,
    },
  }
}

fn bundle(items: Vec<DueItem>) -> Vec<DueBundle> {
  vec![DueBundle { subscription_id: "s1".into(), items }]
}

async fn cart_doc(store: &MemoryStore, uid: &str, id: &str) -> Document {
  store
    .get(&format!("users/{uid}/cart"), id)
    .await
    .unwrap()
    .expect("cart document")
}

// ─── Flaky store ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FlakyError {
  #[error("injected failure")]
  Injected,
  #[error(transparent)]
  Core(#[from] restock_core::Error),
}

/// Wraps a `MemoryStore`, failing writes to one document id and listings of
/// one collection.
#[derive(Default)]
struct FlakyStore {
  inner:         MemoryStore,
  fail_write_id: Option<String>,
  fail_list:     Option<String>,
}

impl DocumentStore for FlakyStore {
  type Error = FlakyError;

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, FlakyError> {
    Ok(self.inner.get(collection, id).await?)
  }

  async fn set_merge(
    &self,
    collection: &str,
    id: &str,
    fields: Map<String, Value>,
  ) -> Result<(), FlakyError> {
    if self.fail_write_id.as_deref() == Some(id) {
      return Err(FlakyError::Injected);
    }
    Ok(self.inner.set_merge(collection, id, fields).await?)
  }

  async fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String, FlakyError> {
    Ok(self.inner.add(collection, fields).await?)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<bool, FlakyError> {
    Ok(self.inner.delete(collection, id).await?)
  }

  async fn list(&self, collection: &str) -> Result<Vec<Document>, FlakyError> {
    if self.fail_list.as_deref() == Some(collection) {
      return Err(FlakyError::Injected);
    }
    Ok(self.inner.list(collection).await?)
  }
}

// ─── Upsert writer ───────────────────────────────────────────────────────────

#[test]
fn destination_key_prefers_url_id() {
  let item = ItemRecord::from_value(&json!({
    "id": "111111",
    "url": "https://shop.example.jp/item/222222.html",
  }))
  .unwrap();
  assert_eq!(destination_key(&item).as_deref(), Some("222222"));

  let item = ItemRecord::from_value(&json!({ "productId": 4902102072618_i64 })).unwrap();
  assert_eq!(destination_key(&item).as_deref(), Some("4902102072618"));

  let item = ItemRecord::from_value(&json!({ "name": "tofu" })).unwrap();
  assert_eq!(destination_key(&item), None);
}

#[tokio::test]
async fn quantities_accumulate() {
  let store = Arc::new(MemoryStore::new());
  let writer = UpsertWriter::new(Arc::clone(&store), "users/u1/cart");

  let first = writer.write_due(&bundle(vec![due(json!({ "id": "123456" }), 2)]), false, now()).await;
  let second = writer.write_due(&bundle(vec![due(json!({ "id": "123456" }), 3)]), false, now()).await;

  assert_eq!(first.planned[0].target, WriteTarget::Create { id: "123456".into() });
  assert_eq!(second.planned[0].target, WriteTarget::Update { id: "123456".into() });
  let doc = cart_doc(&store, "u1", "123456").await;
  assert_eq!(doc.get("quantity"), Some(&json!(5)));
  assert_eq!(doc.get("quantify"), Some(&json!(5)));
  assert_eq!(doc.get("source"), Some(&json!(AUTO_SUBSCRIPTION_SOURCE)));
  assert!(doc.get("createdAt").is_some());
  assert!(doc.get("updatedAt").is_some());
}

#[tokio::test]
async fn legacy_quantity_field_is_read() {
  let store = Arc::new(MemoryStore::new());
  store
    .seed("users/u1/cart", "123456", object(json!({ "quantify": 3 })), None)
    .unwrap();
  let writer = UpsertWriter::new(Arc::clone(&store), "users/u1/cart");

  writer.write_due(&bundle(vec![due(json!({ "id": "123456" }), 2)]), false, now()).await;
  assert_eq!(cart_doc(&store, "u1", "123456").await.get("quantity"), Some(&json!(5)));
}

#[tokio::test]
async fn descriptive_fields_are_kept_unless_supplied() {
  let store = Arc::new(MemoryStore::new());
  store
    .seed(
      "users/u1/cart",
      "123456",
      object(json!({ "quantity": 1, "name": "old name", "image": "old.png", "price": 100 })),
      None,
    )
    .unwrap();
  let writer = UpsertWriter::new(Arc::clone(&store), "users/u1/cart");

  writer
    .write_due(&bundle(vec![due(json!({ "id": "123456", "name": "new name" }), 1)]), false, now())
    .await;

  let doc = cart_doc(&store, "u1", "123456").await;
  assert_eq!(doc.get("name"), Some(&json!("new name")));
  assert_eq!(doc.get("image"), Some(&json!("old.png")));
  assert_eq!(doc.get("price"), Some(&json!(100)));
}

#[tokio::test]
async fn keyless_items_are_added() {
  let store = Arc::new(MemoryStore::new());
  let writer = UpsertWriter::new(Arc::clone(&store), "users/u1/cart");

  let report = writer.write_due(&bundle(vec![due(json!({ "name": "tofu" }), 1)]), false, now()).await;
  assert_eq!(report.written, 1);
  assert_eq!(report.planned[0].target, WriteTarget::Add);
  let docs = store.list("users/u1/cart").await.unwrap();
  assert_eq!(docs.len(), 1);
  assert_eq!(docs[0].get("name"), Some(&json!("tofu")));
}

#[tokio::test]
async fn dry_run_plans_without_writing() {
  let items = || bundle(vec![due(json!({ "id": "123456" }), 2), due(json!({ "name": "tofu" }), 1)]);

  let live_store = Arc::new(MemoryStore::new());
  let dry_store = Arc::new(MemoryStore::new());
  let live = UpsertWriter::new(Arc::clone(&live_store), "users/u1/cart")
    .write_due(&items(), false, now())
    .await;
  let dry = UpsertWriter::new(Arc::clone(&dry_store), "users/u1/cart")
    .write_due(&items(), true, now())
    .await;

  assert_eq!(live.written, 2);
  assert_eq!(dry.written, live.written);
  assert_eq!(dry.planned, live.planned);
  assert_eq!(live_store.count("users/u1/cart"), 2);
  assert_eq!(dry_store.count("users/u1/cart"), 0);
}

#[tokio::test]
async fn shared_key_across_bundles_plans_the_same_in_dry_run() {
  let items = || {
    vec![
      DueBundle { subscription_id: "s1".into(), items: vec![due(json!({ "id": "123456" }), 2)] },
      DueBundle { subscription_id: "s2".into(), items: vec![due(json!({ "id": "123456" }), 3)] },
    ]
  };

  let live_store = Arc::new(MemoryStore::new());
  let dry_store = Arc::new(MemoryStore::new());
  let live = UpsertWriter::new(Arc::clone(&live_store), "users/u1/cart")
    .write_due(&items(), false, now())
    .await;
  let dry = UpsertWriter::new(Arc::clone(&dry_store), "users/u1/cart")
    .write_due(&items(), true, now())
    .await;

  let targets: Vec<_> = live.planned.iter().map(|p| (p.target.clone(), p.quantity)).collect();
  assert_eq!(targets, [
    (WriteTarget::Create { id: "123456".into() }, 2),
    (WriteTarget::Update { id: "123456".into() }, 5),
  ]);
  assert_eq!(dry.planned, live.planned);
  assert_eq!(cart_doc(&live_store, "u1", "123456").await.get("quantity"), Some(&json!(5)));
  assert_eq!(dry_store.count("users/u1/cart"), 0);
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_batch() {
  let store = Arc::new(FlakyStore { fail_write_id: Some("222222".into()), ..FlakyStore::default() });
  let writer = UpsertWriter::new(Arc::clone(&store), "users/u1/cart");

  let report = writer
    .write_due(
      &bundle(vec![
        due(json!({ "id": "111111" }), 1),
        due(json!({ "id": "222222" }), 1),
        due(json!({ "id": "333333" }), 1),
      ]),
      false,
      now(),
    )
    .await;

  assert_eq!(report.written, 2);
  assert_eq!(report.failed, 1);
  assert_eq!(store.inner.count("users/u1/cart"), 2);
}

// ─── Runner ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_writes_due_items_to_cart() {
  let store = Arc::new(MemoryStore::new());
  milk_user(&store, "u1");

  let summary = Runner::new(Arc::clone(&store), options()).run(now()).await.unwrap();
  assert_eq!(summary.users_processed, 1);
  assert_eq!(summary.due_items, 1);
  assert_eq!(summary.written, 1);
  assert_eq!(summary.users[0].history_entries, 1);

  let doc = cart_doc(&store, "u1", "123456").await;
  assert_eq!(doc.get("quantity"), Some(&json!(2)));
  assert_eq!(doc.get("name"), Some(&json!("Milk")));
  assert_eq!(doc.get("price"), Some(&json!(198.0)));
}

#[tokio::test]
async fn repeated_runs_accumulate() {
  let store = Arc::new(MemoryStore::new());
  milk_user(&store, "u1");
  let runner = Runner::new(Arc::clone(&store), options());

  runner.run(now()).await.unwrap();
  runner.run(now()).await.unwrap();
  assert_eq!(cart_doc(&store, "u1", "123456").await.get("quantity"), Some(&json!(4)));
}

#[tokio::test]
async fn nothing_due_writes_nothing() {
  let store = Arc::new(MemoryStore::new());
  seed_user(
    &store,
    "u1",
    json!({ "createdAt": days_ago(3), "items": [{ "id": "123456" }] }),
    json!({ "frequency": 30, "items": [{ "id": "123456" }] }),
  );

  let summary = Runner::new(Arc::clone(&store), options()).run(now()).await.unwrap();
  assert_eq!(summary.users_processed, 1);
  assert_eq!(summary.written, 0);
  assert_eq!(store.count("users/u1/cart"), 0);
}

#[tokio::test]
async fn dry_run_leaves_carts_untouched() {
  let store = Arc::new(MemoryStore::new());
  milk_user(&store, "u1");

  let opts = RunOptions { dry_run: true, ..options() };
  let summary = Runner::new(Arc::clone(&store), opts).run(now()).await.unwrap();
  assert!(summary.dry_run);
  assert_eq!(summary.written, 1);
  assert_eq!(store.count("users/u1/cart"), 0);
}

#[tokio::test]
async fn eligibility_and_limit() {
  let store = Arc::new(MemoryStore::new());
  milk_user(&store, "a");
  milk_user(&store, "b");
  milk_user(&store, "c");
  store.seed("users", "no-subs", Map::new(), None).unwrap();

  let all = Runner::new(Arc::clone(&store), options()).eligible_users().await.unwrap();
  assert_eq!(all, ["a", "b", "c"]);

  let opts = RunOptions { limit: Some(2), ..options() };
  let limited = Runner::new(Arc::clone(&store), opts).eligible_users().await.unwrap();
  assert_eq!(limited, ["a", "b"]);
}

#[tokio::test]
async fn single_user_without_subscriptions_runs_nothing() {
  let store = Arc::new(MemoryStore::new());
  milk_user(&store, "u1");
  store.seed("users", "idle", Map::new(), None).unwrap();

  let only = |uid: &str| RunOptions { only_user: Some(uid.to_owned()), ..options() };

  let found = Runner::new(Arc::clone(&store), only("u1")).eligible_users().await.unwrap();
  assert_eq!(found, ["u1"]);

  for uid in ["ghost", "idle"] {
    let summary = Runner::new(Arc::clone(&store), only(uid)).run(now()).await.unwrap();
    assert_eq!(summary.users_processed, 0);
    assert_eq!(summary.users_failed, 0);
  }
  assert_eq!(store.count("users/u1/cart"), 0);
}

#[tokio::test]
async fn failing_user_is_counted_and_skipped() {
  let store = FlakyStore { fail_list: Some("users/u1/history".into()), ..FlakyStore::default() };
  milk_user(&store.inner, "u1");
  milk_user(&store.inner, "u2");
  let store = Arc::new(store);

  let summary = Runner::new(Arc::clone(&store), options()).run(now()).await.unwrap();
  assert_eq!(summary.users_failed, 1);
  assert_eq!(summary.users_processed, 1);
  assert_eq!(summary.users[0].uid, "u2");
  assert_eq!(store.inner.count("users/u1/cart"), 0);
  assert_eq!(store.inner.count("users/u2/cart"), 1);
}

#[tokio::test]
async fn never_purchased_items_follow_the_policy() {
  let store = Arc::new(MemoryStore::new());
  seed_user(
    &store,
    "u1",
    json!({ "createdAt": days_ago(1), "items": [] }),
    json!({ "items": [{ "id": "777777", "name": "Rice" }] }),
  );

  let skipped = Runner::new(Arc::clone(&store), options()).run(now()).await.unwrap();
  assert_eq!(skipped.due_items, 0);

  let mut opts = options();
  opts.policy.include_never_purchased = true;
  let included = Runner::new(Arc::clone(&store), opts).run(now()).await.unwrap();
  assert_eq!(included.due_items, 1);
  assert_eq!(cart_doc(&store, "u1", "777777").await.get("quantity"), Some(&json!(1)));
}
