//! The commit graph (spec §3 "Commit", §9 "Commit graph"). Every write
//! transaction or index change produces a new, immutable `CommitNode`
//! extending its parent; the store's `head` always points at one of
//! these. Unlike a content hash, ids here are assigned by a per-store
//! monotonic counter (see DESIGN.md, Open Question (i)) -- uniqueness is
//! all that's observable, not collision-resistance.

use crate::index::IndexDef;
use serde_json::Value;

pub type CommitId = u64;

/// One key's before/after state within a single commit's delta, used by
/// the subscription engine to decide which live queries to re-run.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub key: String,
    /// `None` means the key was deleted.
    pub value: Option<Value>,
}

/// One secondary index entry gained or lost by a commit.
#[derive(Debug, Clone)]
pub struct IndexEntryChange {
    pub index: String,
    pub secondary: String,
    pub primary: String,
    pub removed: bool,
}

#[derive(Debug, Clone)]
pub enum IndexChangeRecord {
    Created(IndexDef),
    Dropped(String),
}

#[derive(Debug, Clone)]
pub enum CommitKind {
    /// The authoritative base received from the server: a cookie and the
    /// mutation id it acknowledges. The root of every commit chain.
    Snapshot { cookie: Value, last_mutation_id: u64 },

    /// A single mutator invocation applied on top of `parent`.
    Local {
        mutation_id: u64,
        name: String,
        delta: Vec<KeyChange>,
        index_delta: Vec<IndexEntryChange>,
        /// Set when replay of this mutation failed; the commit is still
        /// appended (ordering is preserved) but carries no effective delta.
        errored: bool,
    },

    /// An index creation or deletion. The entries a creation's build scan
    /// produces are written straight to the backend (see `Store::create_index`),
    /// not carried here -- this commit only marks that the event happened,
    /// so `head`/version bookkeeping and subscriptions see it.
    IndexChange { change: IndexChangeRecord },
}

#[derive(Debug, Clone)]
pub struct CommitNode {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    /// The highest mutation id reachable from this commit (spec invariant 1).
    pub max_mutation_id: u64,
    pub kind: CommitKind,
}

impl CommitNode {
    pub fn root(id: CommitId, cookie: Value, last_mutation_id: u64) -> Self {
        CommitNode {
            id,
            parent: None,
            max_mutation_id: last_mutation_id,
            kind: CommitKind::Snapshot { cookie, last_mutation_id },
        }
    }

    pub fn local(
        id: CommitId,
        parent: &CommitNode,
        mutation_id: u64,
        name: String,
        delta: Vec<KeyChange>,
        index_delta: Vec<IndexEntryChange>,
        errored: bool,
    ) -> Self {
        CommitNode {
            id,
            parent: Some(parent.id),
            max_mutation_id: parent.max_mutation_id.max(mutation_id),
            kind: CommitKind::Local { mutation_id, name, delta, index_delta, errored },
        }
    }

    pub fn index_change(id: CommitId, parent: &CommitNode, change: IndexChangeRecord) -> Self {
        CommitNode {
            id,
            parent: Some(parent.id),
            max_mutation_id: parent.max_mutation_id,
            kind: CommitKind::IndexChange { change },
        }
    }
}
