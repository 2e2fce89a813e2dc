//! The transactional store (spec §4.1, §4.3's local half). Owns the
//! backend, the commit graph, registered mutators and the pending
//! mutation log; the sync engine and connection loop drive it but hold no
//! state of their own about commits.

use crate::backend::{file::FileBackend, memory::MemoryBackend, Backend, WriteBatch};
use crate::commit::{CommitNode, IndexChangeRecord, KeyChange};
use crate::config::Options;
use crate::error::{CResult, Error};
use crate::index::{self, IndexDef};
use crate::keyspace::{self, meta_key};
use crate::mutation::Mutation;
use crate::overlay;
use crate::scan::ScanOptions;
use crate::sync::wire::PatchOp;
use crate::txn::{ReadTransaction, WriteTransaction};
use crate::value;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use uuid::Uuid;

/// A registered write procedure: given a write transaction and the
/// caller's arguments, applies whatever reads/writes it needs. Errors
/// abort the mutation without persisting it (Open Question (iii), see
/// DESIGN.md) but don't lose its slot in the mutation id sequence.
pub type Mutator = Arc<dyn Fn(&mut WriteTransaction, &Value) -> CResult<()> + Send + Sync>;

/// A point-in-time view of what a pull should be relative to, captured
/// before the network round trip so a racing local mutation during that
/// round trip is detected rather than silently dropped.
pub struct PullSnapshot {
    pub cookie: Value,
    pub last_mutation_id: u64,
    pub pending: Vec<Mutation>,
    generation: u64,
}

/// What a successful local mutation touched, so the caller can notify the
/// subscription engine precisely instead of re-running every live query.
#[derive(Debug, Default)]
pub struct MutationDelta {
    pub id: u64,
    pub delta: Vec<KeyChange>,
    pub touched_indexes: std::collections::HashSet<String>,
}

#[derive(Debug, Default)]
pub struct PullOutcome {
    /// `false` when a newer pull already landed while this one was in
    /// flight; the response was discarded rather than applied.
    pub applied: bool,
    pub delta: Vec<KeyChange>,
    /// `true` when the patch contained an empty-key `del` (clear-all):
    /// `delta` isn't exhaustive in that case and every live subscription
    /// should just re-run.
    pub cleared: bool,
}

pub struct Store {
    backend: Box<dyn Backend>,
    head: AsyncRwLock<Arc<CommitNode>>,
    commits: StdMutex<HashMap<crate::commit::CommitId, Arc<CommitNode>>>,
    next_commit_id: AtomicU64,
    next_mutation_id: AtomicU64,
    indexes: AsyncRwLock<HashMap<String, IndexDef>>,
    mutators: StdMutex<HashMap<String, Mutator>>,
    mutation_log: AsyncMutex<Vec<Mutation>>,
    pull_generation: AtomicU64,
    client_id: Uuid,
    closed: AtomicBool,
}

impl Store {
    pub fn open_memory() -> CResult<Self> {
        Self::open_with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn open(options: &Options) -> CResult<Self> {
        let backend: Box<dyn Backend> = if options.use_memstore {
            Box::new(MemoryBackend::new())
        } else {
            Box::new(FileBackend::open(PathBuf::from(format!("{}.synckv", options.name)))?)
        };
        Self::open_with_backend(backend)
    }

    fn open_with_backend(backend: Box<dyn Backend>) -> CResult<Self> {
        let client_id = load_or_create_client_id(backend.as_ref())?;
        let (cookie, last_mutation_id) = load_sync_state(backend.as_ref())?;
        let indexes = load_indexes(backend.as_ref())?;
        let mutation_log = load_mutation_log(backend.as_ref())?;

        let next_mutation_id = mutation_log.iter().map(|m| m.id).max().unwrap_or(last_mutation_id) + 1;
        let root = Arc::new(CommitNode::root(0, cookie, last_mutation_id));
        let mut commits = HashMap::new();
        commits.insert(0, root.clone());

        log::info!("opened store client_id={client_id} base_last_mutation_id={last_mutation_id} pending={}", mutation_log.len());

        Ok(Store {
            backend,
            head: AsyncRwLock::new(root),
            commits: StdMutex::new(commits),
            next_commit_id: AtomicU64::new(1),
            next_mutation_id: AtomicU64::new(next_mutation_id),
            indexes: AsyncRwLock::new(indexes),
            mutators: StdMutex::new(HashMap::new()),
            mutation_log: AsyncMutex::new(mutation_log),
            pull_generation: AtomicU64::new(0),
            client_id,
            closed: AtomicBool::new(false),
        })
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn register(&self, name: impl Into<String>, mutator: impl Fn(&mut WriteTransaction, &Value) -> CResult<()> + Send + Sync + 'static) {
        self.mutators.lock().unwrap().insert(name.into(), Arc::new(mutator));
    }

    /// Reconstructs the in-memory commit chain for mutations that were
    /// pending at last close, by re-running each one's now-registered
    /// mutator. Call once after `register`ing every mutator and before
    /// starting sync; a mutation whose mutator isn't registered yet is
    /// left out of the local preview (it's still queued for push and will
    /// be resolved by the server's next pull patch).
    pub async fn replay_pending(&self) -> CResult<()> {
        let pending = self.mutation_log.lock().await.clone();
        for m in pending {
            let known = self.mutators.lock().unwrap().contains_key(&m.name);
            if !known {
                log::warn!("not replaying pending mutation {} ({}): mutator not registered", m.id, m.name);
                continue;
            }
            if let Err(e) = self.apply_local(m.id, &m.name, &m.args).await {
                log::warn!("replay of pending mutation {} ({}) failed: {e}", m.id, m.name);
            }
        }
        Ok(())
    }

    /// Runs a registered mutator as a new local commit and, if it
    /// succeeds, appends it to the durable pending-mutation log for the
    /// push path. Returns the mutation id either way the mutator ran.
    pub async fn mutate(&self, name: &str, args: Value) -> CResult<MutationDelta> {
        self.ensure_open()?;
        if !self.mutators.lock().unwrap().contains_key(name) {
            return Err(Error::UnknownMutator(name.to_string()));
        }
        let id = self.next_mutation_id.fetch_add(1, Ordering::SeqCst);
        let result = self.apply_local(id, name, &args).await;
        match result {
            Ok(outcome) => {
                let mut log = self.mutation_log.lock().await;
                log.push(Mutation { id, name: name.to_string(), args });
                self.persist_mutation_log(&log)?;
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("mutator {name} (id {id}) failed: {e}");
                Err(e)
            }
        }
    }

    async fn apply_local(&self, id: u64, name: &str, args: &Value) -> CResult<MutationDelta> {
        let mutator = self.mutators.lock().unwrap().get(name).cloned().ok_or_else(|| Error::UnknownMutator(name.to_string()))?;
        let indexes_snapshot = self.indexes.read().await.clone();

        let mut head_guard = self.head.write().await;
        let parent = head_guard.clone();
        let overlay = {
            let commits = self.commits.lock().unwrap();
            overlay::compose(&commits, &parent)
        };
        let mut wtx = WriteTransaction::new(self.backend.as_ref(), &overlay, &indexes_snapshot, &self.closed);
        let mutator_result = mutator(&mut wtx, args);
        let (delta, index_delta, errored) = match &mutator_result {
            Ok(()) => {
                let (d, i) = wtx.finish();
                (d, i, false)
            }
            Err(_) => (Vec::new(), Vec::new(), true),
        };

        let touched_indexes: std::collections::HashSet<String> = index_delta.iter().map(|ic| ic.index.clone()).collect();
        let commit_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
        let node = Arc::new(CommitNode::local(commit_id, &parent, id, name.to_string(), delta.clone(), index_delta, errored));
        self.commits.lock().unwrap().insert(commit_id, node.clone());
        *head_guard = node;

        // A mutator's own error already describes what went wrong, and a
        // transaction that got cut off by a concurrent close should surface
        // as that, not as a generic mutator failure; wrap anything else so
        // callers can match on a single failure kind.
        mutator_result.map(|()| MutationDelta { id, delta, touched_indexes }).map_err(|e| match e {
            Error::MutatorFailed(_) | Error::TransactionClosed => e,
            other => Error::MutatorFailed(other.to_string()),
        })
    }

    pub async fn read_tx<F, R>(&self, f: F) -> CResult<R>
    where
        F: FnOnce(&ReadTransaction) -> CResult<R>,
    {
        self.ensure_open()?;
        let indexes = self.indexes.read().await;
        let head = self.head.read().await;
        let overlay = {
            let commits = self.commits.lock().unwrap();
            overlay::compose(&commits, &head)
        };
        let rt = ReadTransaction::new(self.backend.as_ref(), &overlay, &indexes, &self.closed);
        f(&rt)
    }

    pub async fn create_index(&self, def: IndexDef) -> CResult<()> {
        self.ensure_open()?;
        value::pointer_tokens(&def.json_pointer)?;

        let mut indexes = self.indexes.write().await;
        if indexes.contains_key(&def.name) {
            return Err(Error::IndexExists(def.name));
        }
        let mut head_guard = self.head.write().await;
        let overlay = {
            let commits = self.commits.lock().unwrap();
            overlay::compose(&commits, &head_guard)
        };
        let rows = {
            let rt = ReadTransaction::new(self.backend.as_ref(), &overlay, &indexes, &self.closed);
            rt.scan(ScanOptions::new().with_prefix(def.key_prefix.clone()))?
        };

        let mut batch = WriteBatch::new();
        for row in &rows {
            for secondary in value::index_values_for_row(&row.value, &def.json_pointer)? {
                batch.put(index::encode_index_key(&def.name, &secondary, &row.key), vec![1]);
            }
        }
        self.backend.commit(batch)?;

        indexes.insert(def.name.clone(), def.clone());
        persist_indexes(self.backend.as_ref(), &indexes)?;

        let commit_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
        let node = Arc::new(CommitNode::index_change(commit_id, &head_guard, IndexChangeRecord::Created(def)));
        self.commits.lock().unwrap().insert(commit_id, node.clone());
        *head_guard = node;
        Ok(())
    }

    pub async fn drop_index(&self, name: &str) -> CResult<()> {
        self.ensure_open()?;
        let mut indexes = self.indexes.write().await;
        if indexes.remove(name).is_none() {
            return Err(Error::UnknownIndex(name.to_string()));
        }
        persist_indexes(self.backend.as_ref(), &indexes)?;

        let mut batch = WriteBatch::new();
        for (k, _) in self.backend.scan_prefix(&index::index_key_prefix(name))? {
            batch.delete(k);
        }
        self.backend.commit(batch)?;

        let mut head_guard = self.head.write().await;
        let commit_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
        let node = Arc::new(CommitNode::index_change(commit_id, &head_guard, IndexChangeRecord::Dropped(name.to_string())));
        self.commits.lock().unwrap().insert(commit_id, node.clone());
        *head_guard = node;
        Ok(())
    }

    /// Snapshots the store's sync-relevant state before a pull's network
    /// round trip. Never blocks behind an in-flight write for long: just a
    /// read-lock acquisition and a clone.
    pub async fn begin_pull(&self) -> PullSnapshot {
        let generation = self.pull_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let head = self.head.read().await;
        let overlay = {
            let commits = self.commits.lock().unwrap();
            overlay::compose(&commits, &head)
        };
        let pending = self.mutation_log.lock().await.clone();
        PullSnapshot { cookie: overlay.base_cookie, last_mutation_id: overlay.base_last_mutation_id, pending, generation }
    }

    pub fn pending_mutations_for_push(&self) -> Vec<Mutation> {
        self.mutation_log.try_lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub async fn pending_mutations(&self) -> Vec<Mutation> {
        self.mutation_log.lock().await.clone()
    }

    /// Applies a pull response's patch to the backend, advances the base
    /// snapshot, and replays any mutation still pending after the new
    /// `last_mutation_id` on top of it (spec §4.3 "maybeEndPull"). A no-op
    /// if a newer pull already completed while this one's request was in
    /// flight.
    pub async fn end_pull(&self, snapshot: &PullSnapshot, new_cookie: Value, new_last_mutation_id: u64, patch: Vec<PatchOp>) -> CResult<PullOutcome> {
        self.ensure_open()?;
        if new_last_mutation_id < snapshot.last_mutation_id {
            return Err(Error::ProtocolError(format!(
                "pull response lastMutationID {new_last_mutation_id} regressed behind {}",
                snapshot.last_mutation_id
            )));
        }

        let indexes_snapshot = self.indexes.read().await.clone();
        let mut head_guard = self.head.write().await;

        if self.pull_generation.load(Ordering::SeqCst) != snapshot.generation {
            log::debug!("discarding stale pull response (generation {} superseded)", snapshot.generation);
            return Ok(PullOutcome::default());
        }

        let mut delta_acc: HashMap<String, Option<Value>> = HashMap::new();
        let mut cleared = false;
        let mut batch = WriteBatch::new();
        for op in &patch {
            match op {
                // A `del` with an empty key is the wire's clear-all (spec
                // §4.3, §6 `Op = put | del`): wipe every existing primary
                // row before the ops that follow it in this patch apply.
                PatchOp::Del { key } if key.is_empty() => {
                    cleared = true;
                    for (k, _) in self.backend.scan_prefix(keyspace::PRIMARY_PREFIX)? {
                        batch.delete(k);
                    }
                }
                PatchOp::Put { key, value } => {
                    batch.put(keyspace::encode_primary_key(key), serde_json::to_vec(value)?);
                    delta_acc.insert(key.clone(), Some(value.clone()));
                }
                PatchOp::Del { key } => {
                    batch.delete(keyspace::encode_primary_key(key));
                    delta_acc.insert(key.clone(), None);
                }
            }
        }
        self.backend.commit(batch)?;

        // Rebuild every live index's entries against the new base rather
        // than trying to diff them; patches are rare relative to reads.
        let mut index_batch = WriteBatch::new();
        for name in indexes_snapshot.keys() {
            for (k, _) in self.backend.scan_prefix(&index::index_key_prefix(name))? {
                index_batch.delete(k);
            }
        }
        for def in indexes_snapshot.values() {
            for (key, bytes) in self.backend.scan_prefix(&keyspace::encode_primary_key(&def.key_prefix))? {
                let key_str = keyspace::decode_primary_key(&key).expect("primary key round-trips");
                let row: Value = serde_json::from_slice(&bytes)?;
                for secondary in value::index_values_for_row(&row, &def.json_pointer)? {
                    index_batch.put(index::encode_index_key(&def.name, &secondary, &key_str), vec![1]);
                }
            }
        }
        self.backend.commit(index_batch)?;

        let root_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
        let root = Arc::new(CommitNode::root(root_id, new_cookie.clone(), new_last_mutation_id));
        self.commits.lock().unwrap().insert(root_id, root.clone());
        persist_sync_state(self.backend.as_ref(), &new_cookie, new_last_mutation_id)?;

        let mut sync_head = root;
        let still_pending: Vec<Mutation> = snapshot.pending.iter().cloned().filter(|m| m.id > new_last_mutation_id).collect();
        for m in &still_pending {
            let mutator = self.mutators.lock().unwrap().get(&m.name).cloned();
            let Some(mutator) = mutator else {
                log::warn!("not rebasing pending mutation {} ({}) onto new snapshot: mutator not registered", m.id, m.name);
                continue;
            };
            let overlay = {
                let commits = self.commits.lock().unwrap();
                overlay::compose(&commits, &sync_head)
            };
            let mut wtx = WriteTransaction::new(self.backend.as_ref(), &overlay, &indexes_snapshot, &self.closed);
            let result = mutator(&mut wtx, &m.args);
            let (d, i, errored) = match &result {
                Ok(()) => {
                    let (d, i) = wtx.finish();
                    (d, i, false)
                }
                Err(e) => {
                    log::warn!("pending mutation {} ({}) failed rebasing onto new snapshot: {e}", m.id, m.name);
                    (Vec::new(), Vec::new(), true)
                }
            };
            for kc in &d {
                delta_acc.insert(kc.key.clone(), kc.value.clone());
            }
            let commit_id = self.next_commit_id.fetch_add(1, Ordering::SeqCst);
            let node = Arc::new(CommitNode::local(commit_id, &sync_head, m.id, m.name.clone(), d, i, errored));
            self.commits.lock().unwrap().insert(commit_id, node.clone());
            sync_head = node;
        }

        let mut log = self.mutation_log.lock().await;
        log.retain(|m| m.id > new_last_mutation_id);
        persist_mutation_log_inner(self.backend.as_ref(), &log)?;
        drop(log);

        *head_guard = sync_head;
        log::info!("pull applied: new_last_mutation_id={new_last_mutation_id} replayed={}", still_pending.len());

        let delta = if cleared { Vec::new() } else { delta_acc.into_iter().map(|(key, value)| KeyChange { key, value }).collect() };
        Ok(PullOutcome { applied: true, delta, cleared })
    }

    pub fn status(&self) -> CResult<crate::backend::Status> {
        self.backend.status()
    }

    pub fn close(&self) -> CResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.backend.close()
    }

    fn ensure_open(&self) -> CResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn persist_mutation_log(&self, log: &[Mutation]) -> CResult<()> {
        persist_mutation_log_inner(self.backend.as_ref(), log)
    }
}

fn load_or_create_client_id(backend: &dyn Backend) -> CResult<Uuid> {
    match backend.get(&meta_key("client_id"))? {
        Some(bytes) => {
            let s = String::from_utf8_lossy(&bytes);
            Uuid::parse_str(&s).map_err(|e| Error::Internal(format!("corrupt client_id: {e}")))
        }
        None => {
            let id = Uuid::new_v4();
            let mut batch = WriteBatch::new();
            batch.put(meta_key("client_id"), id.to_string().into_bytes());
            backend.commit(batch)?;
            Ok(id)
        }
    }
}

fn load_sync_state(backend: &dyn Backend) -> CResult<(Value, u64)> {
    match backend.get(&meta_key("sync_state"))? {
        Some(bytes) => {
            let (cookie, last_mutation_id): (Value, u64) = serde_json::from_slice(&bytes)?;
            Ok((cookie, last_mutation_id))
        }
        None => Ok((Value::Null, 0)),
    }
}

fn persist_sync_state(backend: &dyn Backend, cookie: &Value, last_mutation_id: u64) -> CResult<()> {
    let mut batch = WriteBatch::new();
    batch.put(meta_key("sync_state"), serde_json::to_vec(&(cookie, last_mutation_id))?);
    backend.commit(batch)
}

fn load_indexes(backend: &dyn Backend) -> CResult<HashMap<String, IndexDef>> {
    match backend.get(&meta_key("indexes"))? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(HashMap::new()),
    }
}

fn persist_indexes(backend: &dyn Backend, indexes: &HashMap<String, IndexDef>) -> CResult<()> {
    let mut batch = WriteBatch::new();
    batch.put(meta_key("indexes"), serde_json::to_vec(indexes)?);
    backend.commit(batch)
}

fn load_mutation_log(backend: &dyn Backend) -> CResult<Vec<Mutation>> {
    match backend.get(&meta_key("mutation_log"))? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(Vec::new()),
    }
}

fn persist_mutation_log_inner(backend: &dyn Backend, log: &[Mutation]) -> CResult<()> {
    let mut batch = WriteBatch::new();
    batch.put(meta_key("mutation_log"), serde_json::to_vec(log)?);
    backend.commit(batch)
}
