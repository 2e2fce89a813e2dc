//! Incremental query re-evaluation (spec §4.5). A subscription's query
//! runs once to seed `on_data` and record its read set; afterward it's
//! only re-run when a commit's delta could plausibly have changed its
//! result, and `on_data` only fires again if the new result is actually
//! different (deep JSON equality, not a version bump).

use crate::commit::KeyChange;
use crate::error::{CResult, Error};
use crate::store::Store;
use crate::txn::{ReadSet, ReadTransaction};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

type QueryFn = dyn Fn(&ReadTransaction) -> CResult<Value> + Send + Sync;
type OnData = dyn Fn(&Value) + Send + Sync;
type OnError = dyn Fn(&Error) + Send + Sync;
type OnDone = dyn Fn() + Send + Sync;

pub struct Subscription {
    query: Box<QueryFn>,
    on_data: Box<OnData>,
    on_error: Box<OnError>,
    on_done: Option<Box<OnDone>>,
    read_set: StdMutex<ReadSet>,
    last_result: StdMutex<Option<Value>>,
}

pub struct SubscriptionBuilder {
    query: Box<QueryFn>,
    on_data: Box<OnData>,
    on_error: Box<OnError>,
    on_done: Option<Box<OnDone>>,
}

impl SubscriptionBuilder {
    pub fn new(query: impl Fn(&ReadTransaction) -> CResult<Value> + Send + Sync + 'static) -> Self {
        SubscriptionBuilder {
            query: Box::new(query),
            on_data: Box::new(|_| {}),
            on_error: Box::new(|e| log::warn!("subscription query failed: {e}")),
            on_done: None,
        }
    }

    pub fn on_data(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_data = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }

    pub fn on_done(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }
}

pub struct SubscriptionEngine {
    store: Arc<Store>,
    subs: StdMutex<HashMap<u64, Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriptionEngine {
    pub fn new(store: Arc<Store>) -> Self {
        SubscriptionEngine { store, subs: StdMutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Registers a subscription and runs its query once immediately,
    /// seeding `on_data` with the current result.
    pub async fn subscribe(&self, builder: SubscriptionBuilder) -> CResult<u64> {
        let sub = Arc::new(Subscription {
            query: builder.query,
            on_data: builder.on_data,
            on_error: builder.on_error,
            on_done: builder.on_done,
            read_set: StdMutex::new(ReadSet::default()),
            last_result: StdMutex::new(None),
        });
        self.run(&sub).await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subs.lock().unwrap().insert(id, sub);
        Ok(id)
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Some(sub) = self.subs.lock().unwrap().remove(&id) {
            if let Some(on_done) = &sub.on_done {
                on_done();
            }
        }
    }

    /// Drains every live subscription, firing `on_done` exactly once for
    /// each (spec §4.5 "on_done fires on store close"). Called from
    /// `Store::close`/`SyncStore::close`.
    pub fn close(&self) {
        let subs: HashMap<u64, Arc<Subscription>> = self.subs.lock().unwrap().drain().collect();
        for sub in subs.into_values() {
            if let Some(on_done) = &sub.on_done {
                on_done();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-evaluates every subscription whose read set intersects `delta`
    /// or one of `touched_indexes`; `cleared` forces every subscription to
    /// re-run (a wholesale patch reset isn't diffable meaningfully).
    pub async fn on_commit(&self, delta: &[KeyChange], touched_indexes: &HashSet<String>, cleared: bool) {
        let subs: Vec<Arc<Subscription>> = self.subs.lock().unwrap().values().cloned().collect();
        for sub in subs {
            let affected = cleared || {
                let read_set = sub.read_set.lock().unwrap();
                delta.iter().any(|kc| read_set.keys.contains(&kc.key) || read_set.prefixes.iter().any(|p| kc.key.starts_with(p.as_str())))
                    || touched_indexes.iter().any(|name| read_set.indexes.contains(name))
            };
            if affected {
                self.run(&sub).await;
            }
        }
    }

    async fn run(&self, sub: &Arc<Subscription>) {
        let sub_for_query = sub.clone();
        let outcome = self.store.read_tx(move |tx| Ok((sub_for_query.query.as_ref()(tx), tx.read_set()))).await;

        match outcome {
            Ok((Ok(value), read_set)) => {
                *sub.read_set.lock().unwrap() = read_set;
                let mut last = sub.last_result.lock().unwrap();
                let changed = last.as_ref() != Some(&value);
                if changed {
                    *last = Some(value.clone());
                    drop(last);
                    (sub.on_data)(&value);
                }
            }
            Ok((Err(e), read_set)) => {
                *sub.read_set.lock().unwrap() = read_set;
                (sub.on_error)(&e);
            }
            Err(e) => (sub.on_error)(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn fires_on_data_once_for_identical_results() {
        let store = Arc::new(Store::open(&Options::memory("t")).unwrap());
        store.register("put", |tx, args| {
            tx.put(args["key"].as_str().unwrap(), args["value"].clone())
        });
        let engine = SubscriptionEngine::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let id = engine
            .subscribe(SubscriptionBuilder::new(|tx| tx.get("a").map(|v| v.unwrap_or(Value::Null))).on_data(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
        engine.on_commit(&[KeyChange { key: "a".into(), value: Some(json!(1)) }], &HashSet::new(), false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2); // initial + the change to 1

        // Re-running with the same value must not re-fire on_data.
        engine.on_commit(&[KeyChange { key: "a".into(), value: Some(json!(1)) }], &HashSet::new(), false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        engine.unsubscribe(id);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn unrelated_key_does_not_trigger_reevaluation() {
        let store = Arc::new(Store::open(&Options::memory("t")).unwrap());
        let engine = SubscriptionEngine::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        engine
            .subscribe(SubscriptionBuilder::new(|tx| tx.get("a").map(|v| v.unwrap_or(Value::Null))).on_data(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine.on_commit(&[KeyChange { key: "b".into(), value: Some(json!(1)) }], &HashSet::new(), false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
