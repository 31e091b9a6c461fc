//! Relay operations: the seam between the HTTP surface and the store and
//! registry underneath. One [`RelayService`] instance serves the whole
//! process; handlers and the cleanup scheduler share it behind an `Arc`.

use bytes::Bytes;

use qsr_core::error::{RelayError, RelayResult};
use qsr_core::types::{
    ChunkAck, ChunkBatch, CodeIssue, CodeStatusView, CreateCodeRequest, FileId, FileInfo,
    KeyFetch, OwnerId, SessionId, UsageSummary,
};

use crate::registry::PickupCodeRegistry;
use crate::store::RelayStore;

pub struct RelayService {
    store: RelayStore,
    registry: PickupCodeRegistry,
}

impl RelayService {
    pub fn new(store: RelayStore, registry: PickupCodeRegistry) -> Self {
        RelayService { store, registry }
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }

    pub fn registry(&self) -> &PickupCodeRegistry {
        &self.registry
    }

    /// Issue a pickup code. A dedup hit comes back as
    /// [`CodeIssue::Duplicate`]; issuing an alias via `reuse_file_id` also
    /// pushes the shared chunk set's expiry out to cover the new code.
    pub fn create_code(&self, owner: OwnerId, req: &CreateCodeRequest) -> RelayResult<CodeIssue> {
        let issue = self.registry.create_code(owner, req)?;
        if let CodeIssue::Issued(issued) = &issue {
            if issued.reused {
                self.store.extend_expiry(owner, issued.file_id, issued.expires_at);
            }
        }
        Ok(issue)
    }

    /// Accept one encrypted chunk from the sender. When an unexpired chunk
    /// already sits at this index (shared chunk set), the upload is skipped
    /// and the ack says so; the sender checks the digest either way.
    pub fn store_chunk(
        &self,
        owner: OwnerId,
        lookup: &str,
        index: u32,
        data: Bytes,
    ) -> RelayResult<ChunkAck> {
        if data.is_empty() {
            return Err(RelayError::EmptyChunk);
        }
        let (file_id, expires_at) = self.registry.sender_record(owner, lookup)?;
        let outcome = self.store.put_chunk(owner, file_id, index, data, expires_at);

        let batch = self.store.get_chunks(owner, file_id, &[index]);
        let stored = batch
            .found
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Storage(format!("chunk {index} vanished after put")))?;

        Ok(ChunkAck {
            index,
            digest: stored.digest,
            reused: outcome.reused,
            expires_at: outcome.expires_at,
        })
    }

    /// Accept the wrapped content key. Keyed per code: every alias carries
    /// its own wrapped copy of the same content key.
    pub fn store_wrapped_key(&self, owner: OwnerId, lookup: &str, key: Bytes) -> RelayResult<()> {
        if key.is_empty() {
            return Err(RelayError::EmptyChunk);
        }
        let (_, expires_at) = self.registry.sender_record(owner, lookup)?;
        self.store.put_wrapped_key(owner, lookup, key, expires_at);
        Ok(())
    }

    /// Finalize an upload. Verifies that chunks `0..total_chunks` are all
    /// present and the wrapped key is stored, registers the metadata, and
    /// flips the code receivable.
    pub fn upload_complete(
        &self,
        owner: OwnerId,
        lookup: &str,
        info: &FileInfo,
    ) -> RelayResult<CodeStatusView> {
        let (file_id, expires_at) = self.registry.sender_record(owner, lookup)?;

        let present = self.store.chunk_indices(owner, file_id);
        let missing: Vec<u32> = (0..info.total_chunks)
            .filter(|i| !present.contains(i))
            .collect();
        if !missing.is_empty() {
            return Err(RelayError::UploadIncomplete { missing });
        }
        if self.store.get_wrapped_key(owner, lookup).is_none() {
            return Err(RelayError::KeyNotReady);
        }

        let encoded = serde_json::to_vec(info)
            .map_err(|e| RelayError::Storage(format!("encode file info: {e}")))?;
        self.store
            .put_file_info(owner, file_id, Bytes::from(encoded), expires_at);
        self.registry.mark_receivable(owner, lookup)?;
        tracing::info!(owner, file_id, code = lookup, chunks = info.total_chunks, "upload complete");
        self.registry.code_status(owner, lookup)
    }

    /// Receiver fetches the wrapped key and gets a download session with it.
    /// `KEY_NOT_READY` is the poll-again signal while the sender is still
    /// uploading.
    pub fn fetch_wrapped_key(&self, lookup: &str) -> RelayResult<KeyFetch> {
        let resolved = self.registry.receiver_access(lookup, None)?;
        let wrapped_key = self
            .store
            .get_wrapped_key(resolved.owner, lookup)
            .ok_or(RelayError::KeyNotReady)?;
        let session_id = self.registry.open_session(lookup)?;
        Ok(KeyFetch {
            wrapped_key,
            session_id,
        })
    }

    /// Receiver fetches file metadata.
    pub fn fetch_file_info(&self, lookup: &str, session: Option<SessionId>) -> RelayResult<FileInfo> {
        let resolved = self.registry.receiver_access(lookup, session)?;
        let raw = self
            .store
            .get_file_info(resolved.owner, resolved.file_id)
            .ok_or(RelayError::FileInfoNotReady)?;
        serde_json::from_slice(&raw)
            .map_err(|e| RelayError::Storage(format!("decode file info: {e}")))
    }

    /// Batched chunk read for a receiver. Missing indices are retryable;
    /// expired ones are fatal for the transfer.
    pub fn download_chunks(
        &self,
        lookup: &str,
        session: Option<SessionId>,
        indices: &[u32],
    ) -> RelayResult<ChunkBatch> {
        let resolved = self.registry.receiver_access(lookup, session)?;
        Ok(self.store.get_chunks(resolved.owner, resolved.file_id, indices))
    }

    /// Receiver reports a finished download; usage is counted here, not at
    /// key fetch, so an aborted download does not burn a use.
    pub fn download_complete(&self, lookup: &str, session: SessionId) -> RelayResult<UsageSummary> {
        self.registry.close_session(lookup, session)
    }

    /// Sender revokes a file: every code over it flips to `invalidated` and
    /// the relay forgets its bytes immediately.
    pub fn invalidate(&self, owner: OwnerId, file_id: FileId) -> RelayResult<()> {
        let lookups = self.registry.invalidate_file(owner, file_id)?;
        self.store.remove_file(owner, file_id);
        for lookup in &lookups {
            self.store.remove_wrapped_key(owner, lookup);
        }
        Ok(())
    }

    pub fn code_status(&self, owner: OwnerId, lookup: &str) -> RelayResult<CodeStatusView> {
        self.registry.code_status(owner, lookup)
    }

    /// One cleanup pass: expire codes, purge fully-terminal files, then
    /// evict each owner's leftover expired bytes in turn. Returns the number
    /// of store entries dropped.
    pub fn sweep(&self) -> usize {
        let outcome = self.registry.sweep();
        let mut removed = 0;
        for (owner, file) in &outcome.purged_files {
            removed += self.store.remove_file(*owner, *file);
        }
        for (owner, lookup) in &outcome.purged_lookups {
            self.store.remove_wrapped_key(*owner, lookup);
            removed += 1;
        }
        for owner in &outcome.owners {
            removed += self.store.evict_expired_for(*owner).total();
        }
        if outcome.expired_marked > 0 || removed > 0 {
            tracing::debug!(
                expired = outcome.expired_marked,
                purged_files = outcome.purged_files.len(),
                entries = removed,
                "cleanup sweep"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsr_core::types::CodeStatus;
    use std::time::Duration;

    fn service() -> RelayService {
        RelayService::new(RelayStore::new(), PickupCodeRegistry::new("pepper", 100))
    }

    fn request(total: u32) -> (CreateCodeRequest, FileInfo) {
        let req = CreateCodeRequest {
            file_name: "notes.txt".into(),
            file_size: 64 * total as u64,
            mime_type: "text/plain".into(),
            content_hash: Some("hash-of-notes".into()),
            usage_limit: 3,
            ttl: Duration::from_secs(3600),
            reuse_file_id: None,
        };
        let info = FileInfo {
            file_name: "notes.txt".into(),
            file_size: 64 * total as u64,
            mime_type: "text/plain".into(),
            total_chunks: total,
        };
        (req, info)
    }

    fn issue(svc: &RelayService, owner: OwnerId, req: &CreateCodeRequest) -> qsr_core::types::IssuedCode {
        match svc.create_code(owner, req).unwrap() {
            CodeIssue::Issued(issued) => issued,
            CodeIssue::Duplicate { .. } => panic!("unexpected duplicate"),
        }
    }

    fn upload(svc: &RelayService, owner: OwnerId, lookup: &str, info: &FileInfo) {
        for i in 0..info.total_chunks {
            let data = Bytes::from(vec![i as u8; 64]);
            let ack = svc.store_chunk(owner, lookup, i, data).unwrap();
            assert_eq!(ack.index, i);
        }
        svc.store_wrapped_key(owner, lookup, Bytes::from_static(&[7u8; 60]))
            .unwrap();
        let view = svc.upload_complete(owner, lookup, info).unwrap();
        assert_eq!(view.status, CodeStatus::Transferring);
    }

    #[test]
    fn full_relay_cycle() {
        let svc = service();
        let (req, info) = request(4);
        let issued = issue(&svc, 1, &req);
        let lookup = issued.code.lookup();

        // key not ready while the sender is still uploading
        assert!(matches!(
            svc.fetch_wrapped_key(lookup),
            Err(RelayError::KeyNotReady)
        ));

        upload(&svc, 1, lookup, &info);

        let key = svc.fetch_wrapped_key(lookup).unwrap();
        assert_eq!(key.wrapped_key.len(), 60);

        let fetched = svc.fetch_file_info(lookup, Some(key.session_id)).unwrap();
        assert_eq!(fetched, info);

        let batch = svc
            .download_chunks(lookup, Some(key.session_id), &[0, 1, 2, 3])
            .unwrap();
        assert_eq!(batch.found.len(), 4);
        assert!(batch.missing.is_empty());

        let summary = svc.download_complete(lookup, key.session_id).unwrap();
        assert_eq!(summary.used_count, 1);
        assert_eq!(summary.remaining, Some(2));
    }

    #[test]
    fn upload_complete_names_missing_chunks() {
        let svc = service();
        let (req, info) = request(5);
        let issued = issue(&svc, 1, &req);
        let lookup = issued.code.lookup();

        for i in [0u32, 1, 3] {
            svc.store_chunk(1, lookup, i, Bytes::from_static(b"x")).unwrap();
        }
        svc.store_wrapped_key(1, lookup, Bytes::from_static(b"key"))
            .unwrap();

        match svc.upload_complete(1, lookup, &info) {
            Err(RelayError::UploadIncomplete { missing }) => assert_eq!(missing, vec![2, 4]),
            other => panic!("expected incomplete upload, got {other:?}"),
        }
    }

    #[test]
    fn upload_complete_requires_wrapped_key() {
        let svc = service();
        let (req, info) = request(1);
        let issued = issue(&svc, 1, &req);
        let lookup = issued.code.lookup();

        svc.store_chunk(1, lookup, 0, Bytes::from_static(b"x")).unwrap();
        assert!(matches!(
            svc.upload_complete(1, lookup, &info),
            Err(RelayError::KeyNotReady)
        ));
    }

    #[test]
    fn empty_chunk_rejected() {
        let svc = service();
        let (req, _) = request(1);
        let issued = issue(&svc, 1, &req);
        assert!(matches!(
            svc.store_chunk(1, issued.code.lookup(), 0, Bytes::new()),
            Err(RelayError::EmptyChunk)
        ));
    }

    #[test]
    fn alias_code_shares_chunks_and_needs_no_reupload() {
        let svc = service();
        let (req, info) = request(3);
        let first = issue(&svc, 1, &req);
        upload(&svc, 1, first.code.lookup(), &info);

        // same content again: dedup surfaces the existing file
        let file_id = match svc.create_code(1, &req).unwrap() {
            CodeIssue::Duplicate { file_id } => file_id,
            CodeIssue::Issued(_) => panic!("expected duplicate"),
        };
        assert_eq!(file_id, first.file_id);

        // caller opts into reuse: alias code, no chunk upload
        let mut reuse_req = req.clone();
        reuse_req.reuse_file_id = Some(file_id);
        let alias = issue(&svc, 1, &reuse_req);
        assert!(alias.reused);

        let alias_lookup = alias.code.lookup();
        svc.store_wrapped_key(1, alias_lookup, Bytes::from_static(b"rewrapped"))
            .unwrap();
        svc.upload_complete(1, alias_lookup, &info).unwrap();

        let key = svc.fetch_wrapped_key(alias_lookup).unwrap();
        let batch = svc
            .download_chunks(alias_lookup, Some(key.session_id), &[0, 1, 2])
            .unwrap();
        assert_eq!(batch.found.len(), 3);
    }

    #[test]
    fn reupload_of_existing_chunk_acks_reused() {
        let svc = service();
        let (req, _) = request(1);
        let issued = issue(&svc, 1, &req);
        let lookup = issued.code.lookup();

        let first = svc
            .store_chunk(1, lookup, 0, Bytes::from_static(b"payload"))
            .unwrap();
        assert!(!first.reused);

        let second = svc
            .store_chunk(1, lookup, 0, Bytes::from_static(b"payload"))
            .unwrap();
        assert!(second.reused);
        assert_eq!(second.digest, first.digest);
    }

    #[test]
    fn invalidate_purges_bytes_immediately() {
        let svc = service();
        let (req, info) = request(2);
        let issued = issue(&svc, 1, &req);
        let lookup = issued.code.lookup();
        upload(&svc, 1, lookup, &info);

        svc.invalidate(1, issued.file_id).unwrap();

        assert!(matches!(
            svc.fetch_wrapped_key(lookup),
            Err(RelayError::CodeInvalidated)
        ));
        assert!(svc.store().get_wrapped_key(1, lookup).is_none());
        assert!(svc.store().chunk_indices(1, issued.file_id).is_empty());
    }

    #[test]
    fn sweep_evicts_expired_transfer_but_not_neighbors() {
        let svc = service();

        let (mut req_a, _) = request(2);
        req_a.ttl = Duration::ZERO;
        req_a.content_hash = Some("hash-a".into());
        let a = issue(&svc, 1, &req_a);

        let (req_b, info_b) = request(2);
        let b = issue(&svc, 2, &req_b);
        upload(&svc, 2, b.code.lookup(), &info_b);

        svc.sweep();

        // expired owner's code is gone, the neighbor still downloads fine
        assert!(matches!(
            svc.code_status(1, a.code.lookup()),
            Err(RelayError::CodeNotFound)
        ));
        let key = svc.fetch_wrapped_key(b.code.lookup()).unwrap();
        let batch = svc
            .download_chunks(b.code.lookup(), Some(key.session_id), &[0, 1])
            .unwrap();
        assert_eq!(batch.found.len(), 2);
    }
}
