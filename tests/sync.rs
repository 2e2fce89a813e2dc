//! End-to-end push/pull coverage against fake transports, exercised
//! through the public `SyncStore` façade rather than the internal engine.

use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use synckv::config::Options;
use synckv::error::{CResult, Error};
use synckv::sync::wire::{MutationInfo, PatchOp, PullRequest, PullResponse, PushRequest, PushResponse};
use synckv::client::SyncStore;
use synckv::sync::{Puller, Pusher};

struct ScriptedPuller {
    responses: Mutex<Vec<CResult<PullResponse>>>,
}

impl ScriptedPuller {
    fn new(responses: Vec<CResult<PullResponse>>) -> Self {
        ScriptedPuller { responses: Mutex::new(responses) }
    }
}

impl Puller for ScriptedPuller {
    fn pull<'a>(&'a self, _url: &'a str, _auth: Option<&'a str>, _req: PullRequest) -> Pin<Box<dyn Future<Output = CResult<PullResponse>> + Send + 'a>> {
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.is_empty() {
            Err(Error::Internal("no scripted response left".into()))
        } else if responses.len() > 1 {
            responses.remove(0)
        } else {
            match &responses[0] {
                Ok(resp) => Ok(resp.clone()),
                Err(Error::Unauthorized) => Err(Error::Unauthorized),
                Err(e) => Err(Error::Internal(e.to_string())),
            }
        };
        Box::pin(async move { next })
    }
}

struct RecordingPusher {
    sent: Arc<Mutex<Vec<PushRequest>>>,
}

impl RecordingPusher {
    fn new() -> (Self, Arc<Mutex<Vec<PushRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (RecordingPusher { sent: sent.clone() }, sent)
    }
}

impl Pusher for RecordingPusher {
    fn push<'a>(&'a self, _url: &'a str, _auth: Option<&'a str>, req: PushRequest) -> Pin<Box<dyn Future<Output = CResult<PushResponse>> + Send + 'a>> {
        self.sent.lock().unwrap().push(req);
        Box::pin(async move { Ok(PushResponse::default()) })
    }
}

struct RejectingPusher;

impl Pusher for RejectingPusher {
    fn push<'a>(&'a self, _url: &'a str, _auth: Option<&'a str>, req: PushRequest) -> Pin<Box<dyn Future<Output = CResult<PushResponse>> + Send + 'a>> {
        let infos = req.mutations.iter().map(|m| MutationInfo { id: m.id, error: "rejected by server".into() }).collect();
        Box::pin(async move { Ok(PushResponse { mutation_infos: infos }) })
    }
}

fn options(name: &str) -> Options {
    let mut opts = Options::memory(name);
    opts.pull_url = Some("http://sync.invalid/pull".into());
    opts.push_url = Some("http://sync.invalid/push".into());
    opts
}

#[tokio::test]
async fn pull_applies_patch_and_notifies_subscriptions() {
    let puller = ScriptedPuller::new(vec![Ok(PullResponse {
        cookie: json!("c1"),
        last_mutation_id: 0,
        patch: vec![PatchOp::Put { key: "a".into(), value: json!(1) }],
    })]);
    let (pusher, _sent) = RecordingPusher::new();
    let store = SyncStore::with_transport(options("sy1"), puller, pusher).unwrap();

    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Default::default();
    let seen_clone = seen.clone();
    store
        .subscribe(synckv::subscription::SubscriptionBuilder::new(|tx| tx.get("a").map(|v| v.unwrap_or(serde_json::Value::Null))).on_data(
            move |v| seen_clone.lock().unwrap().push(v.clone()),
        ))
        .await
        .unwrap();

    store.pull_now().await.unwrap();

    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), Some(json!(1)));
    assert_eq!(*seen.lock().unwrap(), vec![json!(null), json!(1)]);
}

#[tokio::test]
async fn push_sends_every_pending_mutation_and_they_stay_queued_until_acked() {
    let (pusher, sent) = RecordingPusher::new();
    let store = SyncStore::with_transport(options("sy2"), ScriptedPuller::new(vec![]), pusher).unwrap();
    store.register("put", |tx, args| tx.put(args["key"].as_str().unwrap(), args["value"].clone()));

    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
    store.mutate("put", json!({"key": "b", "value": 2})).await.unwrap();
    store.push_now().await.unwrap();

    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(sent.lock().unwrap()[0].mutations.len(), 2);

    // Push doesn't trim the log -- only a pull's lastMutationID does.
    let pending = store.pending_mutations_for_push();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn per_mutation_push_errors_are_advisory_not_a_cycle_failure() {
    let store = SyncStore::with_transport(options("sy4"), ScriptedPuller::new(vec![]), RejectingPusher).unwrap();
    store.register("put", |tx, args| tx.put(args["key"].as_str().unwrap(), args["value"].clone()));
    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();

    // A 200 with rejected mutations is still a successful push cycle; the
    // mutation isn't dropped, only a pull's lastMutationID retires it.
    store.push_now().await.unwrap();
    assert_eq!(store.pending_mutations_for_push().len(), 1);
}

#[tokio::test]
async fn pending_mutation_is_rebased_after_a_pull_acknowledges_an_earlier_one() {
    let puller = ScriptedPuller::new(vec![Ok(PullResponse {
        cookie: json!("c1"),
        last_mutation_id: 1,
        // A real server's patch would reflect mutation 1's effect too, since
        // it's the one being acknowledged.
        patch: vec![PatchOp::Put { key: "a".into(), value: json!(1) }],
    })]);
    let (pusher, _sent) = RecordingPusher::new();
    let store = SyncStore::with_transport(options("sy3"), puller, pusher).unwrap();
    store.register("put", |tx, args| tx.put(args["key"].as_str().unwrap(), args["value"].clone()));

    store.mutate("put", json!({"key": "a", "value": 1})).await.unwrap();
    store.mutate("put", json!({"key": "b", "value": 2})).await.unwrap();

    // The pull only acknowledges mutation id 1; mutation 2 must be rebased
    // on top of the new snapshot and stay visible locally and in the log.
    store.pull_now().await.unwrap();

    assert_eq!(store.read_tx(|tx| tx.get("a")).await.unwrap(), Some(json!(1)));
    assert_eq!(store.read_tx(|tx| tx.get("b")).await.unwrap(), Some(json!(2)));
    assert_eq!(store.pending_mutations_for_push().len(), 1);
}
