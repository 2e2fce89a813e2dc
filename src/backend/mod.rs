//! The storage backend contract (spec §6): a byte-addressable key-value
//! map with atomic batch commit. Adapted from the teacher crate's
//! `storage::engine::Engine` trait -- the same point get/set/delete/scan
//! shape, generalized from "one engine, one head" to "one engine, many
//! batched writers" so secondary index maintenance can commit alongside
//! the primary row atomically (spec §9 "Secondary indexes should be
//! physically stored in the same backend... so index maintenance
//! participates in the commit's atomicity").

pub mod file;
pub mod memory;

use crate::error::CResult;
use serde_derive::{Deserialize, Serialize};

/// A single write inside a batch. Keys and values are opaque bytes; the
/// store layer is responsible for canonical key encoding (primary rows
/// vs. `i/<name>/` index rows).
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered set of writes applied atomically by `Backend::commit`.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch(pub Vec<WriteOp>);

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch(Vec::new())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.0.push(WriteOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.0.push(WriteOp::Delete(key));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Backend status, reported for diagnostics -- shape borrowed from the
/// teacher's `storage::Status`, trimmed to what a byte-map actually knows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    pub keys: u64,
}

/// A byte-addressable key-value map with atomic batch commit, lexically
/// ordered scans, and an explicit close. Durable backends survive
/// restart; memory backends drop their data on close.
pub trait Backend: Send + Sync {
    fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> CResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All live key/value pairs whose key starts with `prefix`, in
    /// ascending byte order.
    fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies `batch` atomically: either every write lands, or none do.
    fn commit(&self, batch: WriteBatch) -> CResult<()>;

    fn is_empty(&self) -> CResult<bool>;

    fn status(&self) -> CResult<Status>;

    /// Releases resources. Durable backends flush; memory backends just drop.
    fn close(&self) -> CResult<()>;
}
