//! The client-facing façade (spec §4.6). `SyncStore` is the one type an
//! application holds: it wires the transactional store, the sync engine,
//! a push and a pull connection loop, and the subscription engine
//! together and exposes the public operations from spec §6.

use crate::config::Options;
use crate::error::CResult;
use crate::store::Store;
use crate::subscription::{SubscriptionBuilder, SubscriptionEngine};
use crate::sync::engine::{AuthRefresher, SyncEngine};
use crate::sync::puller::{HttpPuller, Puller};
use crate::sync::pusher::{HttpPusher, Pusher};
use crate::txn::WriteTransaction;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub struct SyncStore<P: Puller, U: Pusher> {
    store: Arc<Store>,
    engine: Arc<SyncEngine<P, U>>,
    subscriptions: Arc<SubscriptionEngine>,
    push_loop: Arc<crate::loop_::ConnectionLoop>,
    pull_loop: Arc<crate::loop_::ConnectionLoop>,
    push_delay_ms: u64,
    pull_interval_ms: Option<u64>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncStore<HttpPuller, HttpPusher> {
    /// Opens a store against the real network transport.
    pub fn open(options: Options) -> CResult<Self> {
        Self::with_transport(options, HttpPuller::new(), HttpPusher::new())
    }
}

impl<P: Puller + 'static, U: Pusher + 'static> SyncStore<P, U> {
    pub fn with_transport(options: Options, puller: P, pusher: U) -> CResult<Self> {
        let store = Arc::new(Store::open(&options)?);
        Self::from_parts(store, puller, pusher, &options, None, None)
    }

    pub fn with_transport_and_auth(
        options: Options,
        puller: P,
        pusher: U,
        pull_refresher: Option<AuthRefresher>,
        push_refresher: Option<AuthRefresher>,
    ) -> CResult<Self> {
        let store = Arc::new(Store::open(&options)?);
        Self::from_parts(store, puller, pusher, &options, pull_refresher, push_refresher)
    }

    fn from_parts(
        store: Arc<Store>,
        puller: P,
        pusher: U,
        options: &Options,
        pull_refresher: Option<AuthRefresher>,
        push_refresher: Option<AuthRefresher>,
    ) -> CResult<Self> {
        let mut engine = SyncEngine::new(store.clone(), puller, pusher).with_schema_version(options.schema_version.clone());
        if let Some(url) = &options.pull_url {
            engine = engine.with_pull_url(url.clone());
        }
        if let Some(url) = &options.push_url {
            engine = engine.with_push_url(url.clone());
        }
        engine = engine.with_pull_auth(options.pull_auth.clone(), pull_refresher).with_push_auth(options.push_auth.clone(), push_refresher);

        Ok(SyncStore {
            store: store.clone(),
            engine: Arc::new(engine),
            subscriptions: Arc::new(SubscriptionEngine::new(store)),
            push_loop: Arc::new(crate::loop_::ConnectionLoop::new(options.max_connections)),
            pull_loop: Arc::new(crate::loop_::ConnectionLoop::new(options.max_connections)),
            push_delay_ms: options.push_delay_ms,
            pull_interval_ms: options.pull_interval_ms,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn client_id(&self) -> Uuid {
        self.store.client_id()
    }

    pub fn register(&self, name: impl Into<String>, mutator: impl Fn(&mut WriteTransaction, &Value) -> CResult<()> + Send + Sync + 'static) {
        self.store.register(name, mutator);
    }

    /// Call once after registering every mutator, before `start`.
    pub async fn replay_pending(&self) -> CResult<()> {
        self.store.replay_pending().await
    }

    pub async fn mutate(&self, name: &str, args: Value) -> CResult<u64> {
        let outcome = self.store.mutate(name, args).await?;
        self.subscriptions.on_commit(&outcome.delta, &outcome.touched_indexes, false).await;
        self.push_loop.wake();
        Ok(outcome.id)
    }

    pub async fn read_tx<F, R>(&self, f: F) -> CResult<R>
    where
        F: FnOnce(&crate::txn::ReadTransaction) -> CResult<R>,
    {
        self.store.read_tx(f).await
    }

    pub async fn subscribe(&self, builder: SubscriptionBuilder) -> CResult<u64> {
        self.subscriptions.subscribe(builder).await
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.unsubscribe(id);
    }

    /// Snapshot of mutations not yet acknowledged by a pull. Useful for a
    /// "syncing..." indicator; doesn't block on the mutation log's lock.
    pub fn pending_mutations_for_push(&self) -> Vec<crate::mutation::Mutation> {
        self.store.pending_mutations_for_push()
    }

    pub async fn create_index(&self, def: crate::index::IndexDef) -> CResult<()> {
        self.store.create_index(def).await
    }

    pub async fn drop_index(&self, name: &str) -> CResult<()> {
        self.store.drop_index(name).await
    }

    /// Triggers one push cycle outside the background loop -- useful for
    /// tests and for an application-driven "sync now" action.
    pub async fn push_now(&self) -> CResult<()> {
        self.engine.push().await
    }

    /// Triggers one pull cycle outside the background loop.
    pub async fn pull_now(&self) -> CResult<()> {
        let outcome = self.engine.pull().await?;
        if outcome.applied {
            self.subscriptions.on_commit(&outcome.delta, &Default::default(), outcome.cleared).await;
        }
        Ok(())
    }

    /// Spawns the background push and pull connection loops (spec §4.4).
    /// A pull loop only runs if `pull_interval_ms` is configured; the push
    /// loop always runs, debounced by `push_delay_ms` and woken early by
    /// every `mutate` call.
    pub fn start(self: &Arc<Self>) {
        let push_self = self.clone();
        let push_delay_ms = self.push_delay_ms;
        let push_loop = self.push_loop.clone();
        let push_task = tokio::spawn(async move {
            loop {
                let result = push_loop
                    .tick(push_delay_ms, || async {
                        push_self.engine.push().await
                    })
                    .await;
                if let Err(e) = result {
                    log::warn!("push cycle failed: {e}");
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(push_task);

        if let Some(interval_ms) = self.pull_interval_ms {
            let pull_self = self.clone();
            let pull_loop = self.pull_loop.clone();
            let pull_task = tokio::spawn(async move {
                loop {
                    let result = pull_loop
                        .tick(interval_ms, || async {
                            let outcome = pull_self.engine.pull().await?;
                            if outcome.applied {
                                pull_self.subscriptions.on_commit(&outcome.delta, &Default::default(), outcome.cleared).await;
                            }
                            Ok(())
                        })
                        .await;
                    if let Err(e) = result {
                        log::warn!("pull cycle failed: {e}");
                    }
                }
            });
            tasks.push(pull_task);
        }
    }

    /// Wakes the pull loop early (e.g. after a server-sent invalidation hint).
    pub fn request_pull(&self) {
        self.pull_loop.wake();
    }

    pub async fn close(&self) -> CResult<()> {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.subscriptions.close();
        self.store.close()
    }
}
