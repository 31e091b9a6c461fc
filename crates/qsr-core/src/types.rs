use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::code::PickupCode;

/// Owning user of a code and its relay artifacts.
pub type OwnerId = u64;

/// Server-assigned identifier for one uploaded file's record.
pub type FileId = u64;

/// Ephemeral correlation id for one receiver's download.
pub type SessionId = uuid::Uuid;

/// Lifecycle of a pickup code. Transitions are one-directional;
/// `Completed`, `Expired` and `Invalidated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    /// Code issued, no upload finished yet
    Waiting,
    /// Chunks and wrapped key present; receivable
    Transferring,
    /// Usage count reached the limit
    Completed,
    /// Time limit reached
    Expired,
    /// Explicitly revoked by the sender
    Invalidated,
}

impl CodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CodeStatus::Completed | CodeStatus::Expired | CodeStatus::Invalidated
        )
    }
}

/// File metadata the sender registers at upload-complete time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
}

/// Request to issue a new pickup code.
#[derive(Debug, Clone)]
pub struct CreateCodeRequest {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Whole-file plaintext hash computed by the sender, hex. Optional;
    /// without it no dedup check is performed.
    pub content_hash: Option<String>,
    pub usage_limit: u32,
    pub ttl: std::time::Duration,
    /// Take the reuse branch of a dedup conflict: issue a code that shares
    /// the named file's already-uploaded chunk set.
    pub reuse_file_id: Option<FileId>,
}

/// Outcome of a create-code request.
#[derive(Debug)]
pub enum CodeIssue {
    Issued(IssuedCode),
    /// Identical content already registered and still live. The caller must
    /// explicitly choose reuse or invalidation; the registry never decides.
    Duplicate { file_id: FileId },
}

#[derive(Debug)]
pub struct IssuedCode {
    pub code: PickupCode,
    pub file_id: FileId,
    pub expires_at: SystemTime,
    /// True when this code was aliased onto an existing chunk set and no
    /// chunk upload is needed.
    pub reused: bool,
}

/// Server acknowledgement for one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub index: u32,
    /// SHA-256 hex of the encrypted chunk as the server received it.
    pub digest: String,
    /// True when an unexpired chunk already existed at this index and the
    /// upload was skipped.
    pub reused: bool,
    pub expires_at: SystemTime,
}

/// One encrypted chunk returned by a batch download.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub index: u32,
    pub data: Bytes,
    pub digest: String,
}

/// Result of a batched chunk read, partitioned so the caller can react
/// differently to "never stored" and "stored but past expiry".
#[derive(Debug, Default)]
pub struct ChunkBatch {
    pub found: Vec<ChunkPayload>,
    pub missing: Vec<u32>,
    pub expired: Vec<u32>,
}

/// Wrapped key plus the download session opened by fetching it.
#[derive(Debug, Clone)]
pub struct KeyFetch {
    pub wrapped_key: Bytes,
    pub session_id: SessionId,
}

/// Usage accounting after a download-complete notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub used_count: u32,
    pub usage_limit: u32,
    /// None when the limit is the unlimited sentinel.
    pub remaining: Option<u32>,
    pub status: CodeStatus,
}

/// Snapshot of a code's record, for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStatusView {
    pub lookup: String,
    pub file_id: FileId,
    pub status: CodeStatus,
    pub used_count: u32,
    pub usage_limit: u32,
    pub expires_at: SystemTime,
}
