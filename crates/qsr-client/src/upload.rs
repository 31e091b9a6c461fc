//! Sender-side orchestration: slice, encrypt, push, wrap, finalize.
//!
//! Content keys live only on the sender. They are kept in a
//! [`ContentKeyCache`] after a successful upload because issuing an alias
//! code over an existing chunk set means re-wrapping the *original* content
//! key under the new code's key segment; a fresh key could never decrypt
//! the shared chunks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};

use qsr_core::code::PickupCode;
use qsr_core::config::TransferConfig;
use qsr_core::error::RelayError;
use qsr_core::types::{CodeIssue, CreateCodeRequest, FileId, FileInfo, IssuedCode};
use qsr_crypto::{
    derive_wrapping_key_with, encrypt_chunk, generate_content_key, transfer_digest, wrap_key,
    ChunkPlan, ContentKey, KdfParams,
};

use crate::retry::RetryPolicy;
use crate::transport::RelayTransport;
use crate::{ClientError, ClientResult};

const CHUNK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// What to do when the relay reports the same content is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Issue an alias code over the existing chunk set; no re-transmission.
    Reuse,
    /// Invalidate the existing file first, then upload fresh.
    Invalidate,
    /// Surface the conflict to the caller.
    Fail,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub usage_limit: u32,
    pub ttl: Duration,
}

#[derive(Debug)]
pub struct UploadOutcome {
    /// Hand the full code to the receiving party out of band. The relay
    /// only ever saw its first half.
    pub code: PickupCode,
    pub file_id: FileId,
    pub total_chunks: u32,
    /// Chunks the relay already held and did not need transmitted.
    pub reused_chunks: u32,
}

/// Sender-local map of file ids to the content keys that encrypted them.
/// Never leaves the process; shared across uploads so alias codes can
/// re-wrap the right key.
#[derive(Default)]
pub struct ContentKeyCache {
    keys: Mutex<HashMap<FileId, ContentKey>>,
}

impl ContentKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: FileId, key: ContentKey) {
        self.keys.lock().unwrap().insert(file_id, key);
    }

    pub fn get(&self, file_id: FileId) -> Option<ContentKey> {
        self.keys.lock().unwrap().get(&file_id).cloned()
    }

    pub fn remove(&self, file_id: FileId) {
        self.keys.lock().unwrap().remove(&file_id);
    }
}

/// One sender-side transfer. Holds the transport and tuning; `upload`
/// drives the whole pipeline for a single file.
pub struct Uploader<T> {
    transport: Arc<T>,
    config: TransferConfig,
    kdf: KdfParams,
    keys: Arc<ContentKeyCache>,
}

impl<T: RelayTransport + 'static> Uploader<T> {
    pub fn new(
        transport: Arc<T>,
        config: TransferConfig,
        kdf: KdfParams,
        keys: Arc<ContentKeyCache>,
    ) -> Self {
        Uploader {
            transport,
            config,
            kdf,
            keys,
        }
    }

    pub async fn upload(
        &self,
        data: Bytes,
        req: &UploadRequest,
        on_duplicate: DuplicatePolicy,
    ) -> ClientResult<UploadOutcome> {
        let content_hash = transfer_digest(&data);
        let issued = self
            .issue_code(&data, req, &content_hash, on_duplicate)
            .await?;

        let plan = ChunkPlan::new(data.len(), self.config.chunk_size)?;
        let wrapping_key = derive_wrapping_key_with(issued.code.key_segment(), &self.kdf)?;

        let (content_key, reused_chunks) = if issued.reused {
            // shared chunk set: re-wrap the key that encrypted it
            let key = self
                .keys
                .get(issued.file_id)
                .ok_or(ClientError::MissingContentKey {
                    file_id: issued.file_id,
                })?;
            tracing::info!(code = %issued.code, "chunk set already on relay, skipping transmission");
            (key, plan.count())
        } else {
            let key = generate_content_key()?;
            let reused = self
                .push_chunks(&data, &plan, &key, issued.code.lookup())
                .await?;
            (key, reused)
        };

        let wrapped = wrap_key(&wrapping_key, &content_key)?;
        self.transport
            .store_wrapped_key(issued.code.lookup(), Bytes::from(wrapped))
            .await?;

        let info = FileInfo {
            file_name: req.file_name.clone(),
            file_size: data.len() as u64,
            mime_type: req.mime_type.clone(),
            total_chunks: plan.count(),
        };
        let view = self
            .transport
            .upload_complete(issued.code.lookup(), &info)
            .await?;
        tracing::info!(code = %issued.code, file_id = issued.file_id, status = ?view.status, chunks = plan.count(), "upload complete");

        self.keys.insert(issued.file_id, content_key);
        Ok(UploadOutcome {
            code: issued.code,
            file_id: issued.file_id,
            total_chunks: plan.count(),
            reused_chunks,
        })
    }

    async fn issue_code(
        &self,
        data: &Bytes,
        req: &UploadRequest,
        content_hash: &str,
        on_duplicate: DuplicatePolicy,
    ) -> ClientResult<IssuedCode> {
        let create = CreateCodeRequest {
            file_name: req.file_name.clone(),
            file_size: data.len() as u64,
            mime_type: req.mime_type.clone(),
            content_hash: Some(content_hash.to_string()),
            usage_limit: req.usage_limit,
            ttl: req.ttl,
            reuse_file_id: None,
        };

        let file_id = match self.transport.create_code(&create).await? {
            CodeIssue::Issued(issued) => return Ok(issued),
            CodeIssue::Duplicate { file_id } => file_id,
        };

        match on_duplicate {
            DuplicatePolicy::Fail => Err(RelayError::DuplicateContent { file_id }.into()),
            DuplicatePolicy::Reuse => {
                let reuse = CreateCodeRequest {
                    reuse_file_id: Some(file_id),
                    ..create
                };
                match self.transport.create_code(&reuse).await? {
                    CodeIssue::Issued(issued) => Ok(issued),
                    CodeIssue::Duplicate { file_id } => {
                        Err(RelayError::DuplicateContent { file_id }.into())
                    }
                }
            }
            DuplicatePolicy::Invalidate => {
                self.transport.invalidate(file_id).await?;
                self.keys.remove(file_id);
                match self.transport.create_code(&create).await? {
                    CodeIssue::Issued(issued) => Ok(issued),
                    CodeIssue::Duplicate { file_id } => {
                        Err(RelayError::DuplicateContent { file_id }.into())
                    }
                }
            }
        }
    }

    /// Encrypt and push every chunk through a bounded concurrency window.
    /// Returns how many chunks the relay already held.
    ///
    /// Transient failures and bad acks share one per-chunk attempt budget: a
    /// digest that does not match the transmitted bytes is re-sent like a
    /// dropped request, and only exhausting the budget fails the upload.
    async fn push_chunks(
        &self,
        data: &Bytes,
        plan: &ChunkPlan,
        content_key: &ContentKey,
        lookup: &str,
    ) -> ClientResult<u32> {
        let policy = RetryPolicy::new(self.config.chunk_retry_attempts, CHUNK_RETRY_INTERVAL);

        let uploads = (0..plan.count()).filter_map(|index| {
            plan.range(index).map(|range| {
                let chunk = data.slice(range);
                let key = content_key.clone();
                let transport = Arc::clone(&self.transport);
                let lookup = lookup.to_string();
                async move {
                    let encrypted = Bytes::from(encrypt_chunk(&key, &chunk)?);
                    let digest = transfer_digest(&encrypted);
                    let mut attempt = 0;
                    let ack = loop {
                        attempt += 1;
                        match transport.store_chunk(&lookup, index, encrypted.clone()).await {
                            // reused or not, the ack must name this
                            // transfer's bytes; a shared chunk with another
                            // digest is one this content key cannot decrypt
                            Ok(ack) if ack.digest == digest => break ack,
                            Ok(_) if attempt < policy.max_attempts => {
                                tracing::debug!(index, attempt, "ack digest mismatch, re-sending");
                            }
                            Ok(_) => return Err(ClientError::DigestMismatch { index }),
                            Err(err) if is_transient(&err) && attempt < policy.max_attempts => {
                                tracing::debug!(index, attempt, "retrying chunk after: {err}");
                            }
                            Err(err) if is_transient(&err) => {
                                return Err(ClientError::RetriesExhausted {
                                    attempts: attempt,
                                    source: err,
                                });
                            }
                            Err(err) => return Err(err.into()),
                        }
                        if !policy.interval.is_zero() {
                            tokio::time::sleep(policy.interval).await;
                        }
                    };
                    tracing::trace!(index, reused = ack.reused, "chunk acked");
                    Ok::<bool, ClientError>(ack.reused)
                }
            })
        });

        let acks: Vec<bool> = stream::iter(uploads)
            .buffer_unordered(self.config.upload_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(acks.iter().filter(|reused| **reused).count() as u32)
    }
}

fn is_transient(err: &RelayError) -> bool {
    matches!(
        err,
        RelayError::Storage(_) | RelayError::Io(_) | RelayError::Other(_)
    )
}
