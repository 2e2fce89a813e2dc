//! End-to-end coverage of the transactional store: mutate/read round
//! trips, point/prefix/range scans, and persistence across a restart.

use serde_json::json;
use synckv::config::Options;
use synckv::error::Error;
use synckv::scan::{ScanOptions, StartKey};
use synckv::store::Store;

fn put_mutator(tx: &mut synckv::txn::WriteTransaction, args: &serde_json::Value) -> synckv::error::CResult<()> {
    tx.put(args["key"].as_str().unwrap(), args["value"].clone())
}

#[tokio::test]
async fn mutate_then_read_round_trips() {
    let store = Store::open(&Options::memory("s1")).unwrap();
    store.register("put", put_mutator);

    store.mutate("put", json!({"key": "users/1", "value": {"name": "alice"}})).await.unwrap();
    let value = store.read_tx(|tx| tx.get("users/1")).await.unwrap();
    assert_eq!(value, Some(json!({"name": "alice"})));
}

#[tokio::test]
async fn mutate_with_unregistered_name_is_rejected() {
    let store = Store::open(&Options::memory("s2")).unwrap();
    let err = store.mutate("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::UnknownMutator(name) if name == "nope"));
}

#[tokio::test]
async fn mutator_failure_does_not_persist_but_still_advances_commit_chain() {
    let store = Store::open(&Options::memory("s3")).unwrap();
    store.register("always_fails", |_tx, _args| Err(Error::MutatorFailed("nope".into())));
    store.register("put", put_mutator);

    assert!(store.mutate("always_fails", json!({})).await.is_err());
    // A later mutation still succeeds; the failed one didn't wedge the chain.
    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), Some(json!(1)));

    // The failed mutation was never queued for push.
    let pending = store.pending_mutations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "put");
}

#[tokio::test]
async fn prefix_scan_returns_only_matching_keys_in_order() {
    let store = Store::open(&Options::memory("s4")).unwrap();
    store.register("put", put_mutator);

    for (key, n) in [("users/2", 2), ("users/1", 1), ("teams/1", 9)] {
        store.mutate("put", json!({"key": key, "value": n})).await.unwrap();
    }

    let rows = store.read_tx(|tx| tx.scan(ScanOptions::new().with_prefix("users/"))).await.unwrap();
    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["users/1", "users/2"]);
}

#[tokio::test]
async fn range_scan_respects_exclusive_start() {
    let store = Store::open(&Options::memory("s5")).unwrap();
    store.register("put", put_mutator);
    for key in ["a", "b", "c"] {
        store.mutate("put", json!({"key": key, "value": key})).await.unwrap();
    }

    let rows = store
        .read_tx(|tx| tx.scan(ScanOptions::new().with_start(StartKey::Key("a".into()), true)))
        .await
        .unwrap();
    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test]
async fn delete_removes_key_from_scans() {
    let store = Store::open(&Options::memory("s6")).unwrap();
    store.register("put", put_mutator);
    store.register("del", |tx, args| {
        tx.del(args["key"].as_str().unwrap()).map(|_| ())
    });

    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
    store.mutate("del", json!({"key": "a"})).await.unwrap();

    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), None);
    assert!(store.read_tx(|tx| tx.is_empty()).await.unwrap());
}

#[tokio::test]
async fn pending_mutations_survive_restart_and_replay_after_reregistering() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("store").to_string_lossy().to_string();

    {
        let store = Store::open(&Options::new(name.clone())).unwrap();
        store.register("put", put_mutator);
        store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
        store.close().unwrap();
    }

    let store = Store::open(&Options::new(name)).unwrap();
    // Before replay, the mutation log is durable but not yet applied locally.
    assert_eq!(store.pending_mutations().await.len(), 1);
    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), None);

    store.register("put", put_mutator);
    store.replay_pending().await.unwrap();
    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn transaction_outstanding_when_store_closes_is_rejected() {
    let store = std::sync::Arc::new(Store::open(&Options::memory("s8")).unwrap());
    let closing = store.clone();
    store.register("close_mid_transaction", move |tx, _args| {
        closing.close().unwrap();
        tx.get("a").map(|_| ())
    });

    let err = store.mutate("close_mid_transaction", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::TransactionClosed));
}

#[tokio::test]
async fn operations_on_a_closed_store_are_rejected() {
    let store = Store::open(&Options::memory("s7")).unwrap();
    store.register("put", put_mutator);
    store.close().unwrap();

    let err = store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap_err();
    assert!(matches!(err, Error::StoreClosed));
}
