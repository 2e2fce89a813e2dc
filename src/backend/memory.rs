//! Memory-only backend, adapted from the teacher crate's
//! `storage::memory::Memory` -- same `BTreeMap<Vec<u8>, Vec<u8>>`, now
//! guarded by a `RwLock` so concurrent transactions can read while a
//! commit is being prepared, and committing a whole `WriteBatch`
//! atomically instead of one `set`/`delete` call at a time.

use crate::backend::{Backend, Status, WriteBatch, WriteOp};
use crate::error::CResult;
use std::collections::BTreeMap;
use std::sync::RwLock;

pub struct MemoryBackend {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend { data: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read().unwrap();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> CResult<()> {
        let mut data = self.data.write().unwrap();
        for op in batch.0 {
            match op {
                WriteOp::Put(k, v) => {
                    data.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> CResult<bool> {
        Ok(self.data.read().unwrap().is_empty())
    }

    fn status(&self) -> CResult<Status> {
        Ok(Status { name: "memory".to_string(), keys: self.data.read().unwrap().len() as u64 })
    }

    fn close(&self) -> CResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ops() {
        let b = MemoryBackend::new();
        assert_eq!(b.get(b"a").unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), vec![1]);
        b.commit(batch).unwrap();
        assert_eq!(b.get(b"a").unwrap(), Some(vec![1]));

        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec());
        b.commit(batch).unwrap();
        assert_eq!(b.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_prefix_ascending() {
        let b = MemoryBackend::new();
        let mut batch = WriteBatch::new();
        for k in ["a/1", "a/0", "b/0"] {
            batch.put(k.as_bytes().to_vec(), vec![0]);
        }
        b.commit(batch).unwrap();
        let got: Vec<_> = b.scan_prefix(b"a/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(got, vec![b"a/0".to_vec(), b"a/1".to_vec()]);
    }
}
