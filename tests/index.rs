//! Secondary index coverage: creation against existing rows, ongoing
//! maintenance through puts/deletes, and index scans.

use serde_json::json;
use synckv::config::Options;
use synckv::error::Error;
use synckv::index::IndexDef;
use synckv::scan::ScanOptions;
use synckv::store::Store;

fn put_mutator(tx: &mut synckv::txn::WriteTransaction, args: &serde_json::Value) -> synckv::error::CResult<()> {
    tx.put(args["key"].as_str().unwrap(), args["value"].clone())
}

#[tokio::test]
async fn create_index_builds_entries_for_existing_rows() {
    let store = Store::open(&Options::memory("i1")).unwrap();
    store.register("put", put_mutator);

    store.mutate("put", json!({"key": "users/1", "value": {"team": "eng"}})).await.unwrap();
    store.mutate("put", json!({"key": "users/2", "value": {"team": "eng"}})).await.unwrap();
    store.mutate("put", json!({"key": "users/3", "value": {"team": "sales"}})).await.unwrap();

    store
        .create_index(IndexDef { name: "byTeam".into(), key_prefix: "users/".into(), json_pointer: "/team".into() })
        .await
        .unwrap();

    let rows = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("byTeam"))).await.unwrap();
    let eng: Vec<&str> = rows.iter().filter(|r| r.secondary == "eng").map(|r| r.primary.as_str()).collect();
    assert_eq!(eng, vec!["users/1", "users/2"]);
}

#[tokio::test]
async fn index_maintenance_follows_later_puts_and_deletes() {
    let store = Store::open(&Options::memory("i2")).unwrap();
    store.register("put", put_mutator);
    store.register("del", |tx, args| tx.del(args["key"].as_str().unwrap()).map(|_| ()));

    store
        .create_index(IndexDef { name: "byTeam".into(), key_prefix: "users/".into(), json_pointer: "/team".into() })
        .await
        .unwrap();

    store.mutate("put", json!({"key": "users/1", "value": {"team": "eng"}})).await.unwrap();
    let rows = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("byTeam"))).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].secondary, "eng");

    // Moving the row to a new secondary value drops the old entry.
    store.mutate("put", json!({"key": "users/1", "value": {"team": "sales"}})).await.unwrap();
    let rows = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("byTeam"))).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].secondary, "sales");

    store.mutate("del", json!({"key": "users/1"})).await.unwrap();
    let rows = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("byTeam"))).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn scanning_an_unknown_index_is_an_error() {
    let store = Store::open(&Options::memory("i3")).unwrap();
    let err = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("nope"))).await.unwrap_err();
    assert!(matches!(err, Error::UnknownIndex(name) if name == "nope"));
}

#[tokio::test]
async fn creating_a_duplicate_index_name_is_rejected() {
    let store = Store::open(&Options::memory("i4")).unwrap();
    let def = IndexDef { name: "byTeam".into(), key_prefix: "users/".into(), json_pointer: "/team".into() };
    store.create_index(def.clone()).await.unwrap();
    let err = store.create_index(def).await.unwrap_err();
    assert!(matches!(err, Error::IndexExists(name) if name == "byTeam"));
}

#[tokio::test]
async fn dropping_an_index_removes_its_entries() {
    let store = Store::open(&Options::memory("i5")).unwrap();
    store.register("put", put_mutator);
    store
        .create_index(IndexDef { name: "byTeam".into(), key_prefix: "users/".into(), json_pointer: "/team".into() })
        .await
        .unwrap();
    store.mutate("put", json!({"key": "users/1", "value": {"team": "eng"}})).await.unwrap();

    store.drop_index("byTeam").await.unwrap();
    let err = store.read_tx(|tx| tx.scan_index(ScanOptions::new().on_index("byTeam"))).await.unwrap_err();
    assert!(matches!(err, Error::UnknownIndex(_)));
}
