//! Covers the "maybeEndPull" guard directly against `Store`: a pull whose
//! response arrives after a newer pull has already landed must be
//! discarded rather than applied over a stale base.

use serde_json::json;
use synckv::config::Options;
use synckv::store::Store;
use synckv::sync::wire::PatchOp;

#[tokio::test]
async fn superseded_pull_response_is_discarded() {
    let store = Store::open(&Options::memory("stale1")).unwrap();

    let first = store.begin_pull().await;
    let second = store.begin_pull().await;

    // The newer pull lands first.
    let outcome = store
        .end_pull(&second, json!("c2"), 0, vec![PatchOp::Put { key: "a".into(), value: json!(2) }])
        .await
        .unwrap();
    assert!(outcome.applied);

    // The older one's response arrives afterward and must be a no-op.
    let outcome = store
        .end_pull(&first, json!("c1"), 0, vec![PatchOp::Put { key: "a".into(), value: json!(1) }])
        .await
        .unwrap();
    assert!(!outcome.applied);

    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn regressed_last_mutation_id_is_rejected() {
    let store = Store::open(&Options::memory("stale2")).unwrap();
    store.register("put", |tx, args| tx.put(args["key"].as_str().unwrap(), args["value"].clone()));
    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();

    let snapshot = store.begin_pull().await;
    store.end_pull(&snapshot, json!("c1"), 1, vec![]).await.unwrap();

    let stale_snapshot = store.begin_pull().await;
    let err = store.end_pull(&stale_snapshot, json!("c0"), 0, vec![]).await.unwrap_err();
    assert!(matches!(err, synckv::error::Error::ProtocolError(_)));
}

#[tokio::test]
async fn clear_patch_wipes_existing_rows() {
    let store = Store::open(&Options::memory("stale3")).unwrap();
    store.register("put", |tx, args| tx.put(args["key"].as_str().unwrap(), args["value"].clone()));
    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();

    let snapshot = store.begin_pull().await;
    let outcome = store.end_pull(&snapshot, json!("c1"), 1, vec![PatchOp::Del { key: "".into() }, PatchOp::Put { key: "b".into(), value: json!(9) }]).await.unwrap();

    assert!(outcome.cleared);
    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), None);
    assert_eq!(store.read_tx(|tx| tx.get("b")).await.unwrap(), Some(json!(9)));
}
