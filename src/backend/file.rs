//! Durable, append-only backend. Adapted from the teacher crate's
//! `storage::log::Log` + `storage::log_cask::LogCask`: the same
//! length-prefixed entry format and in-memory keydir rebuilt by
//! scanning the log on open, generalized so one `commit()` call appends
//! every write in a `WriteBatch` before a single `fsync`, rather than
//! fsync-ing (or not) per `set`/`delete` call -- that's what makes the
//! batch atomic from a reader's point of view: the keydir is only
//! updated after the whole batch has been flushed to disk.
//!
//! Entry format (unchanged from the teacher):
//! - key length as big-endian u32
//! - value length as big-endian i32, or -1 for tombstones
//! - key bytes
//! - value bytes (absent for tombstones)

use crate::backend::{Backend, Status, WriteBatch, WriteOp};
use crate::error::{CResult, Error};
use fs4::FileExt;
use std::collections::BTreeMap;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

/// Maps a key to its value's position and length within the log file.
type KeyDir = BTreeMap<Vec<u8>, (u64, u32)>;

pub struct FileBackend {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    keydir: RwLock<KeyDir>,
}

impl FileBackend {
    /// Opens or creates the log at `path`, rebuilding the keydir by
    /// scanning it from the start. Takes an exclusive advisory lock on
    /// the file for the lifetime of the backend.
    pub fn open(path: PathBuf) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file =
            std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive()
            .map_err(|e| Error::Internal(format!("failed to lock {}: {e}", path.display())))?;
        let keydir = Self::build_keydir(&mut file)?;
        Ok(FileBackend { path, file: Mutex::new(file), keydir: RwLock::new(keydir) })
    }

    fn build_keydir(file: &mut std::fs::File) -> CResult<KeyDir> {
        let mut len_buf = [0u8; 4];
        let mut keydir = KeyDir::new();
        let file_len = file.metadata()?.len();
        let mut r = BufReader::new(&mut *file);
        let mut pos = r.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            let mut read_entry = || -> std::io::Result<(Vec<u8>, u64, Option<u32>)> {
                r.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                r.read_exact(&mut len_buf)?;
                let value_len_or_tombstone = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None,
                };
                let value_pos = pos + 4 + 4 + key_len as u64;
                let mut key = vec![0; key_len as usize];
                r.read_exact(&mut key)?;
                if let Some(value_len) = value_len_or_tombstone {
                    if value_pos + value_len as u64 > file_len {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "value extends beyond end of file",
                        ));
                    }
                    r.seek_relative(value_len as i64)?;
                }
                Ok((key, value_pos, value_len_or_tombstone))
            };

            match read_entry() {
                Ok((key, value_pos, Some(value_len))) => {
                    keydir.insert(key, (value_pos, value_len));
                    pos = value_pos + value_len as u64;
                }
                Ok((key, value_pos, None)) => {
                    keydir.remove(&key);
                    pos = value_pos;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::error!("found incomplete entry at offset {pos}, truncating log");
                    file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(keydir)
    }

    fn read_value(file: &mut std::fs::File, pos: u64, len: u32) -> CResult<Vec<u8>> {
        let mut value = vec![0; len as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut value)?;
        Ok(value)
    }

    fn append_entry(file: &mut std::fs::File, key: &[u8], value: Option<&[u8]>) -> CResult<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let entry_len = 4 + 4 + key_len + value_len;

        let pos = file.seek(SeekFrom::End(0))?;
        file.write_all(&key_len.to_be_bytes())?;
        file.write_all(&value_len_or_tombstone.to_be_bytes())?;
        file.write_all(key)?;
        if let Some(value) = value {
            file.write_all(value)?;
        }
        Ok((pos, entry_len))
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let keydir = self.keydir.read().unwrap();
        match keydir.get(key) {
            Some(&(pos, len)) => {
                drop(keydir);
                let mut file = self.file.lock().unwrap();
                Ok(Some(Self::read_value(&mut file, pos, len)?))
            }
            None => Ok(None),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries: Vec<(Vec<u8>, u64, u32)> = {
            let keydir = self.keydir.read().unwrap();
            keydir
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, &(pos, len))| (k.clone(), pos, len))
                .collect()
        };
        let mut file = self.file.lock().unwrap();
        entries
            .into_iter()
            .map(|(k, pos, len)| Ok((k, Self::read_value(&mut file, pos, len)?)))
            .collect()
    }

    fn commit(&self, batch: WriteBatch) -> CResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock().unwrap();
        let mut applied = Vec::with_capacity(batch.0.len());
        for op in &batch.0 {
            match op {
                WriteOp::Put(k, v) => applied.push((k.clone(), Self::append_entry(&mut file, k, Some(v))?)),
                WriteOp::Delete(k) => applied.push((k.clone(), Self::append_entry(&mut file, k, None)?)),
            }
        }
        file.sync_data()?;
        drop(file);

        let mut keydir = self.keydir.write().unwrap();
        for (op, (key, (pos, entry_len))) in batch.0.into_iter().zip(applied) {
            match op {
                WriteOp::Put(_, v) => {
                    let value_len = v.len() as u32;
                    keydir.insert(key, (pos + entry_len as u64 - value_len as u64, value_len));
                }
                WriteOp::Delete(_) => {
                    keydir.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> CResult<bool> {
        Ok(self.keydir.read().unwrap().is_empty())
    }

    fn status(&self) -> CResult<Status> {
        Ok(Status {
            name: self.path.display().to_string(),
            keys: self.keydir.read().unwrap().len() as u64,
        })
    }

    fn close(&self) -> CResult<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }
}
