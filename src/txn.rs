//! Read and write transactions (spec §4.1 "Transactions").
//!
//! Both transaction kinds are built from an already-`compose`d [`Overlay`]
//! and a reference to the backend holding the last-acknowledged snapshot --
//! neither one touches the commit graph or `head` directly. A
//! `ReadTransaction` is a closed, consistent view for the lifetime of the
//! borrow (spec invariant "a transaction sees a single consistent
//! snapshot"); a `WriteTransaction` additionally buffers its own writes in
//! memory and flushes them as one `Local` commit's delta when the caller
//! finishes it.

use crate::backend::Backend;
use crate::commit::{IndexEntryChange, KeyChange};
use crate::error::{CResult, Error};
use crate::index::IndexDef;
use crate::keyspace::encode_primary_key;
use crate::overlay::Overlay;
use crate::scan::{IndexScanItem, ScanItem, ScanOptions, StartKey};
use crate::{index, keyspace};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Keys, prefixes and indexes a transaction actually read, recorded so the
/// subscription engine can decide whether a later commit's delta could
/// possibly change this transaction's result (spec §4.5 "Incremental
/// re-evaluation").
#[derive(Debug, Default, Clone)]
pub struct ReadSet {
    pub keys: HashSet<String>,
    pub prefixes: HashSet<String>,
    pub indexes: HashSet<String>,
}

pub struct ReadTransaction<'s> {
    backend: &'s dyn Backend,
    overlay: &'s Overlay,
    indexes: &'s HashMap<String, IndexDef>,
    read_set: RefCell<ReadSet>,
    closed: &'s AtomicBool,
}

impl<'s> ReadTransaction<'s> {
    pub fn new(backend: &'s dyn Backend, overlay: &'s Overlay, indexes: &'s HashMap<String, IndexDef>, closed: &'s AtomicBool) -> Self {
        ReadTransaction { backend, overlay, indexes, read_set: RefCell::new(ReadSet::default()), closed }
    }

    pub fn into_read_set(self) -> ReadSet {
        self.read_set.into_inner()
    }

    /// A snapshot of everything read so far, without consuming the
    /// transaction -- used by the subscription engine to record a query's
    /// read set after evaluating it.
    pub fn read_set(&self) -> ReadSet {
        self.read_set.borrow().clone()
    }

    /// Outstanding transactions reject further operations once the store
    /// closes underneath them (spec §4.1 "Cancellation").
    fn ensure_open(&self) -> CResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransactionClosed);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> CResult<Option<Value>> {
        self.ensure_open()?;
        self.read_set.borrow_mut().keys.insert(key.to_string());
        if let Some(overlaid) = self.overlay.key(key) {
            return Ok(overlaid.clone());
        }
        self.backend_get(key)
    }

    pub fn has(&self, key: &str) -> CResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn is_empty(&self) -> CResult<bool> {
        Ok(self.scan(ScanOptions::new().with_limit(1))?.is_empty())
    }

    /// Point/prefix/range scan over primary rows (spec §4.1).
    pub fn scan(&self, opts: ScanOptions) -> CResult<Vec<ScanItem>> {
        self.ensure_open()?;
        self.read_set.borrow_mut().prefixes.insert(opts.prefix.clone());
        let mut rows = self.composed_base(&opts.prefix)?;

        if let Some(start) = &opts.start {
            let start_key = match &start.key {
                StartKey::Key(k) => k.clone(),
                StartKey::Pair(..) => return Err(Error::Internal("base scan cannot start from an index pair".into())),
            };
            rows.retain(|(k, _)| if start.exclusive { k.as_str() > start_key.as_str() } else { k.as_str() >= start_key.as_str() });
        }
        if let Some(limit) = opts.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows.into_iter().map(|(key, value)| ScanItem { key, value }).collect())
    }

    /// Scan over a secondary index's entries (spec §4.2).
    pub fn scan_index(&self, opts: ScanOptions) -> CResult<Vec<IndexScanItem>> {
        self.ensure_open()?;
        let name = opts.index_name.as_deref().ok_or_else(|| Error::Internal("scan_index requires index_name".into()))?;
        if !self.indexes.contains_key(name) {
            return Err(Error::UnknownIndex(name.to_string()));
        }
        self.read_set.borrow_mut().indexes.insert(name.to_string());

        let mut entries = self.composed_index(name)?;
        if let Some(start) = &opts.start {
            match &start.key {
                StartKey::Key(_) => return Err(Error::Internal("index scan requires a Pair start".into())),
                StartKey::Pair(secondary, primary) => {
                    entries.retain(|(s, p, _)| {
                        let cmp = (s.as_str(), p.as_str()).cmp(&(secondary.as_str(), primary.as_deref().unwrap_or("")));
                        if start.exclusive { cmp == std::cmp::Ordering::Greater } else { cmp != std::cmp::Ordering::Less }
                    });
                }
            }
        }
        if let Some(limit) = opts.limit {
            entries.truncate(limit as usize);
        }
        Ok(entries.into_iter().map(|(secondary, primary, value)| IndexScanItem { secondary, primary, value }).collect())
    }

    fn backend_get(&self, key: &str) -> CResult<Option<Value>> {
        match self.backend.get(&encode_primary_key(key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Base rows under `prefix`, backend content overridden by the overlay,
    /// in ascending key order.
    fn composed_base(&self, prefix: &str) -> CResult<Vec<(String, Value)>> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for (k, v) in self.backend.scan_prefix(&encode_primary_key(prefix))? {
            if let Some(key) = keyspace::decode_primary_key(&k) {
                merged.insert(key, serde_json::from_slice(&v)?);
            }
        }
        for (key, value) in &self.overlay.keys {
            if !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(v) => merged.insert(key.clone(), v.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    /// Entries of index `name`, backend content overridden by the overlay,
    /// in ascending `(secondary, primary)` order, joined against the
    /// current primary row for each surviving entry.
    fn composed_index(&self, name: &str) -> CResult<Vec<(String, String, Value)>> {
        let mut present: BTreeMap<(String, String), bool> = BTreeMap::new();
        let prefix = index::index_key_prefix(name);
        for (k, _) in self.backend.scan_prefix(&prefix)? {
            if let Some((secondary, primary)) = index::decode_index_key(&k[prefix.len()..]) {
                present.insert((secondary, primary), true);
            }
        }
        if let Some(overlay) = self.overlay.index_overlay(name) {
            for ((secondary, primary), removed) in overlay {
                if *removed {
                    present.remove(&(secondary.clone(), primary.clone()));
                } else {
                    present.insert((secondary.clone(), primary.clone()), true);
                }
            }
        }

        let mut out = Vec::with_capacity(present.len());
        for (secondary, primary) in present.into_keys() {
            if let Some(value) = self.get(&primary)? {
                out.push((secondary, primary, value));
            }
        }
        Ok(out)
    }
}

/// A write transaction buffers its own puts/deletes and the index
/// maintenance they trigger; nothing reaches the backend until the store
/// turns the buffer into a `Local` commit (spec §4.1, §4.2).
pub struct WriteTransaction<'s> {
    read: ReadTransaction<'s>,
    indexes: &'s HashMap<String, IndexDef>,
    pending: BTreeMap<String, Option<Value>>,
    index_delta: Vec<IndexEntryChange>,
}

impl<'s> WriteTransaction<'s> {
    pub fn new(backend: &'s dyn Backend, overlay: &'s Overlay, indexes: &'s HashMap<String, IndexDef>, closed: &'s AtomicBool) -> Self {
        WriteTransaction {
            read: ReadTransaction::new(backend, overlay, indexes, closed),
            indexes,
            pending: BTreeMap::new(),
            index_delta: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> CResult<Option<Value>> {
        if let Some(v) = self.pending.get(key) {
            return Ok(v.clone());
        }
        self.read.get(key)
    }

    pub fn has(&self, key: &str) -> CResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn scan(&self, opts: ScanOptions) -> CResult<Vec<ScanItem>> {
        let mut rows: BTreeMap<String, Value> = self.read.scan(opts.clone())?.into_iter().map(|i| (i.key, i.value)).collect();
        for (key, value) in &self.pending {
            if !key.starts_with(&opts.prefix) {
                continue;
            }
            match value {
                Some(v) => rows.insert(key.clone(), v.clone()),
                None => rows.remove(key),
            };
        }
        Ok(rows.into_iter().map(|(key, value)| ScanItem { key, value }).collect())
    }

    pub fn put(&mut self, key: &str, value: Value) -> CResult<()> {
        let old = self.get(key)?;
        self.maintain_indexes(key, old.as_ref(), Some(&value));
        self.pending.insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> CResult<bool> {
        let old = self.get(key)?;
        let existed = old.is_some();
        if existed {
            self.maintain_indexes(key, old.as_ref(), None);
            self.pending.insert(key.to_string(), None);
        }
        Ok(existed)
    }

    fn maintain_indexes(&mut self, key: &str, old: Option<&Value>, new: Option<&Value>) {
        for def in self.indexes.values() {
            if !key.starts_with(&def.key_prefix) {
                continue;
            }
            // The pointer's syntax was validated at `create_index` time; a
            // per-row mismatch just yields no entries, so these can't fail.
            let old_secondaries = old.map(|v| crate::value::index_values_for_row(v, &def.json_pointer).unwrap_or_default()).unwrap_or_default();
            let new_secondaries = new.map(|v| crate::value::index_values_for_row(v, &def.json_pointer).unwrap_or_default()).unwrap_or_default();

            for s in &old_secondaries {
                if !new_secondaries.contains(s) {
                    self.index_delta.push(IndexEntryChange {
                        index: def.name.clone(),
                        secondary: s.clone(),
                        primary: key.to_string(),
                        removed: true,
                    });
                }
            }
            for s in &new_secondaries {
                if !old_secondaries.contains(s) {
                    self.index_delta.push(IndexEntryChange {
                        index: def.name.clone(),
                        secondary: s.clone(),
                        primary: key.to_string(),
                        removed: false,
                    });
                }
            }
        }
    }

    /// Consumes the transaction, returning the delta to fold into a new
    /// `Local` commit.
    pub fn finish(self) -> (Vec<KeyChange>, Vec<IndexEntryChange>) {
        let delta = self.pending.into_iter().map(|(key, value)| KeyChange { key, value }).collect();
        (delta, self.index_delta)
    }
}
