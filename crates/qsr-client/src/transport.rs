//! The seam between orchestrators and the relay.
//!
//! Everything the orchestrators need from a relay, as one async trait.
//! Production code backs it with HTTP; tests back it with an in-process
//! relay service. The sender's identity is the transport's business (an
//! HTTP implementation carries it as a header), so it never appears in
//! these signatures.

use async_trait::async_trait;
use bytes::Bytes;

use qsr_core::error::RelayResult;
use qsr_core::types::{
    ChunkAck, ChunkBatch, CodeIssue, CodeStatusView, CreateCodeRequest, FileId, FileInfo,
    KeyFetch, SessionId, UsageSummary,
};

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn create_code(&self, req: &CreateCodeRequest) -> RelayResult<CodeIssue>;

    async fn store_chunk(&self, lookup: &str, index: u32, data: Bytes) -> RelayResult<ChunkAck>;

    async fn store_wrapped_key(&self, lookup: &str, key: Bytes) -> RelayResult<()>;

    async fn upload_complete(&self, lookup: &str, info: &FileInfo) -> RelayResult<CodeStatusView>;

    async fn fetch_wrapped_key(&self, lookup: &str) -> RelayResult<KeyFetch>;

    async fn fetch_file_info(
        &self,
        lookup: &str,
        session: Option<SessionId>,
    ) -> RelayResult<FileInfo>;

    async fn download_chunks(
        &self,
        lookup: &str,
        session: Option<SessionId>,
        indices: &[u32],
    ) -> RelayResult<ChunkBatch>;

    async fn download_complete(&self, lookup: &str, session: SessionId)
        -> RelayResult<UsageSummary>;

    async fn invalidate(&self, file_id: FileId) -> RelayResult<()>;
}
