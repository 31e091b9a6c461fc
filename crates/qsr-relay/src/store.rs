//! In-memory TTL byte cache for relay artifacts.
//!
//! Every entry carries an absolute expiry. Expiry is checked lazily on every
//! read and enforced in bulk by [`RelayStore::evict_expired_for`], which the
//! cleanup scheduler calls per owner so abandoned transfers cannot grow the
//! map without bound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use bytes::Bytes;

use qsr_core::types::{ChunkBatch, ChunkPayload, FileId, OwnerId};
use qsr_crypto::transfer_digest;

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    expires_at: SystemTime,
}

impl Entry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Default)]
struct Inner {
    chunks: HashMap<(OwnerId, FileId, u32), Entry>,
    file_info: HashMap<(OwnerId, FileId), Entry>,
    wrapped_keys: HashMap<(OwnerId, String), Entry>,
}

/// Outcome of storing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// An unexpired chunk already existed at this index; the new bytes were
    /// discarded and the existing entry kept (its expiry extended if the new
    /// one reaches further).
    pub reused: bool,
    pub expires_at: SystemTime,
}

/// Counts from one eviction sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictStats {
    pub chunks: usize,
    pub file_infos: usize,
    pub wrapped_keys: usize,
}

impl EvictStats {
    pub fn total(&self) -> usize {
        self.chunks + self.file_infos + self.wrapped_keys
    }
}

/// Thread-safe TTL cache holding encrypted chunks, serialized file metadata,
/// and wrapped keys.
pub struct RelayStore {
    inner: Mutex<Inner>,
}

impl Default for RelayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStore {
    pub fn new() -> Self {
        RelayStore {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Store one encrypted chunk. When an unexpired chunk already sits at
    /// this index the incoming bytes are dropped and the stored entry wins;
    /// its expiry is extended to `expires_at` if that reaches further.
    pub fn put_chunk(
        &self,
        owner: OwnerId,
        file: FileId,
        index: u32,
        data: Bytes,
        expires_at: SystemTime,
    ) -> PutOutcome {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let key = (owner, file, index);

        if let Some(existing) = inner.chunks.get_mut(&key) {
            if !existing.is_expired(now) {
                existing.expires_at = existing.expires_at.max(expires_at);
                return PutOutcome {
                    reused: true,
                    expires_at: existing.expires_at,
                };
            }
        }

        inner.chunks.insert(key, Entry { data, expires_at });
        PutOutcome {
            reused: false,
            expires_at,
        }
    }

    /// Read a batch of chunks, partitioned into found / never-stored /
    /// stored-but-expired so the caller can retry missing indices but treat
    /// expiry as fatal.
    pub fn get_chunks(&self, owner: OwnerId, file: FileId, indices: &[u32]) -> ChunkBatch {
        let now = SystemTime::now();
        let inner = self.inner.lock().unwrap();
        let mut batch = ChunkBatch::default();

        for &index in indices {
            match inner.chunks.get(&(owner, file, index)) {
                Some(entry) if entry.is_expired(now) => batch.expired.push(index),
                Some(entry) => batch.found.push(ChunkPayload {
                    index,
                    digest: transfer_digest(&entry.data),
                    data: entry.data.clone(),
                }),
                None => batch.missing.push(index),
            }
        }

        batch
    }

    /// Sorted indices of all unexpired chunks stored for a file.
    pub fn chunk_indices(&self, owner: OwnerId, file: FileId) -> Vec<u32> {
        let now = SystemTime::now();
        let inner = self.inner.lock().unwrap();
        let mut indices: Vec<u32> = inner
            .chunks
            .iter()
            .filter(|((o, f, _), entry)| *o == owner && *f == file && !entry.is_expired(now))
            .map(|((_, _, i), _)| *i)
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn put_file_info(
        &self,
        owner: OwnerId,
        file: FileId,
        data: Bytes,
        expires_at: SystemTime,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.file_info.insert((owner, file), Entry { data, expires_at });
    }

    /// File metadata, or `None` when absent or expired.
    pub fn get_file_info(&self, owner: OwnerId, file: FileId) -> Option<Bytes> {
        let now = SystemTime::now();
        let inner = self.inner.lock().unwrap();
        inner
            .file_info
            .get(&(owner, file))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone())
    }

    pub fn put_wrapped_key(
        &self,
        owner: OwnerId,
        lookup: &str,
        data: Bytes,
        expires_at: SystemTime,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .wrapped_keys
            .insert((owner, lookup.to_string()), Entry { data, expires_at });
    }

    /// Wrapped key for a code, or `None` when absent or expired.
    pub fn get_wrapped_key(&self, owner: OwnerId, lookup: &str) -> Option<Bytes> {
        let now = SystemTime::now();
        let inner = self.inner.lock().unwrap();
        inner
            .wrapped_keys
            .get(&(owner, lookup.to_string()))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone())
    }

    /// Push the expiry of a file's chunks and metadata out to `expires_at`.
    /// Extend-only: entries already living longer are untouched.
    pub fn extend_expiry(&self, owner: OwnerId, file: FileId, expires_at: SystemTime) {
        let mut inner = self.inner.lock().unwrap();
        for ((o, f, _), entry) in inner.chunks.iter_mut() {
            if *o == owner && *f == file {
                entry.expires_at = entry.expires_at.max(expires_at);
            }
        }
        if let Some(entry) = inner.file_info.get_mut(&(owner, file)) {
            entry.expires_at = entry.expires_at.max(expires_at);
        }
    }

    /// Drop a file's chunks and metadata. Returns the number of entries
    /// removed.
    pub fn remove_file(&self, owner: OwnerId, file: FileId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.chunks.len() + inner.file_info.len();
        inner.chunks.retain(|(o, f, _), _| !(*o == owner && *f == file));
        inner.file_info.remove(&(owner, file));
        before - (inner.chunks.len() + inner.file_info.len())
    }

    pub fn remove_wrapped_key(&self, owner: OwnerId, lookup: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.wrapped_keys.remove(&(owner, lookup.to_string()));
    }

    /// Evict every expired entry belonging to `owner`. Other owners' entries,
    /// expired or not, are untouched.
    pub fn evict_expired_for(&self, owner: OwnerId) -> EvictStats {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().unwrap();
        let mut stats = EvictStats::default();

        let before = inner.chunks.len();
        inner
            .chunks
            .retain(|(o, _, _), entry| *o != owner || !entry.is_expired(now));
        stats.chunks = before - inner.chunks.len();

        let before = inner.file_info.len();
        inner
            .file_info
            .retain(|(o, _), entry| *o != owner || !entry.is_expired(now));
        stats.file_infos = before - inner.file_info.len();

        let before = inner.wrapped_keys.len();
        inner
            .wrapped_keys
            .retain(|(o, _), entry| *o != owner || !entry.is_expired(now));
        stats.wrapped_keys = before - inner.wrapped_keys.len();

        stats
    }
}
