//! Composes a commit chain into a flat view on top of the backend.
//!
//! The backend only ever holds the content of the most recently
//! acknowledged `Snapshot` (spec §3's "base KV contents"); every `Local`
//! and `IndexChange` commit is a pure in-memory delta layered on top.
//! Reads walk the chain from a given head back to its nearest `Snapshot`
//! ancestor, collecting the most-recent value for each key (the first
//! one seen walking backward from head wins), then fall back to the
//! backend for anything the chain didn't touch.

use crate::commit::{CommitId, CommitKind, CommitNode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Overlay {
    /// Most-recent value per primary key touched by the chain. `None` = deleted.
    pub keys: HashMap<String, Option<Value>>,
    /// Per-index, most-recent removed/present state of each `(secondary, primary)` pair.
    pub index_entries: HashMap<String, HashMap<(String, String), bool>>,
    pub base_cookie: Value,
    pub base_last_mutation_id: u64,
}

impl Overlay {
    pub fn key(&self, key: &str) -> Option<&Option<Value>> {
        self.keys.get(key)
    }

    pub fn index_entry(&self, index: &str, secondary: &str, primary: &str) -> Option<bool> {
        self.index_entries
            .get(index)
            .and_then(|m| m.get(&(secondary.to_string(), primary.to_string())))
            .copied()
    }

    pub fn index_overlay(&self, index: &str) -> Option<&HashMap<(String, String), bool>> {
        self.index_entries.get(index)
    }
}

/// Walks from `head` to its nearest `Snapshot` ancestor, composing the
/// delta. Panics if a non-snapshot commit's parent is missing from
/// `commits` -- that would mean the chain was garbage-collected while
/// still reachable from `head`, a store bug.
pub fn compose(commits: &HashMap<CommitId, Arc<CommitNode>>, head: &Arc<CommitNode>) -> Overlay {
    let mut overlay = Overlay::default();
    let mut node = head.clone();
    loop {
        match &node.kind {
            CommitKind::Snapshot { cookie, last_mutation_id } => {
                overlay.base_cookie = cookie.clone();
                overlay.base_last_mutation_id = *last_mutation_id;
                return overlay;
            }
            CommitKind::Local { delta, index_delta, errored, .. } => {
                if !*errored {
                    for kc in delta {
                        overlay.keys.entry(kc.key.clone()).or_insert_with(|| kc.value.clone());
                    }
                    merge_index_delta(&mut overlay, index_delta);
                }
            }
            CommitKind::IndexChange { .. } => {
                // Entries live in the backend directly; nothing to overlay.
            }
        }
        let parent_id = node.parent.expect("non-snapshot commit must have a parent");
        node = commits
            .get(&parent_id)
            .expect("parent commit missing from graph (garbage collected while reachable)")
            .clone();
    }
}

fn merge_index_delta(overlay: &mut Overlay, index_delta: &[crate::commit::IndexEntryChange]) {
    for ic in index_delta {
        let m = overlay.index_entries.entry(ic.index.clone()).or_default();
        m.entry((ic.secondary.clone(), ic.primary.clone())).or_insert(ic.removed);
    }
}
