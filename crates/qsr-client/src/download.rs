//! Receiver-side orchestration: poll for the key, unwrap, pull batches,
//! reassemble.

use std::sync::Arc;
use std::time::Duration;

use qsr_core::code::PickupCode;
use qsr_core::config::TransferConfig;
use qsr_core::error::RelayError;
use qsr_core::types::{FileInfo, UsageSummary};
use qsr_crypto::{decrypt_chunk, derive_wrapping_key_with, transfer_digest, unwrap_key, KdfParams};

use crate::retry::{retry_with, RetryPolicy};
use crate::transport::RelayTransport;
use crate::{ClientError, ClientResult};

/// A completed download.
#[derive(Debug)]
pub struct Download {
    pub info: FileInfo,
    pub data: Vec<u8>,
    pub usage: UsageSummary,
}

/// One receiver-side transfer.
pub struct Downloader<T> {
    transport: Arc<T>,
    config: TransferConfig,
    kdf: KdfParams,
}

impl<T: RelayTransport + 'static> Downloader<T> {
    pub fn new(transport: Arc<T>, config: TransferConfig, kdf: KdfParams) -> Self {
        Downloader {
            transport,
            config,
            kdf,
        }
    }

    /// Fetch and decrypt the file behind `code`.
    ///
    /// `KEY_NOT_READY` is polled through the configured retry budget, since
    /// the sender may still be uploading. A key that arrives but fails to
    /// unwrap is fatal immediately: that is the wrong-code signal, and no
    /// amount of retrying fixes a wrong code.
    pub async fn download(&self, code: &PickupCode) -> ClientResult<Download> {
        let lookup = code.lookup();

        let key_policy = RetryPolicy::new(
            self.config.key_retry_attempts,
            Duration::from_millis(self.config.key_retry_interval_ms),
        );
        let fetch = retry_with(
            key_policy,
            |err| matches!(err, RelayError::KeyNotReady),
            || self.transport.fetch_wrapped_key(lookup),
        )
        .await?;
        let session = fetch.session_id;

        let wrapping_key = derive_wrapping_key_with(code.key_segment(), &self.kdf)?;
        let content_key = unwrap_key(&wrapping_key, &fetch.wrapped_key)?;
        tracing::debug!(code = %code, %session, "content key unwrapped");

        let info = self
            .transport
            .fetch_file_info(lookup, Some(session))
            .await?;

        let mut data = Vec::with_capacity(info.file_size as usize);
        let indices: Vec<u32> = (0..info.total_chunks).collect();
        let batch_size = self.config.download_batch_size.max(1);

        for batch_indices in indices.chunks(batch_size) {
            let mut batch = self
                .transport
                .download_chunks(lookup, Some(session), batch_indices)
                .await?;

            if let Some(&index) = batch.expired.first() {
                return Err(RelayError::ChunkExpired { index }.into());
            }

            // one targeted refetch for stragglers, then give up
            if !batch.missing.is_empty() {
                tracing::debug!(missing = batch.missing.len(), "refetching missing chunks");
                let refetch = self
                    .transport
                    .download_chunks(lookup, Some(session), &batch.missing)
                    .await?;
                if let Some(&index) = refetch.expired.first() {
                    return Err(RelayError::ChunkExpired { index }.into());
                }
                if let Some(&index) = refetch.missing.first() {
                    return Err(RelayError::ChunkMissing { index }.into());
                }
                batch.found.extend(refetch.found);
            }

            batch.found.sort_by_key(|c| c.index);
            for chunk in &batch.found {
                if transfer_digest(&chunk.data) != chunk.digest {
                    return Err(ClientError::DigestMismatch { index: chunk.index });
                }
                let plaintext = decrypt_chunk(&content_key, &chunk.data)?;
                data.extend_from_slice(&plaintext);
            }
        }

        if data.len() as u64 != info.file_size {
            return Err(ClientError::SizeMismatch {
                expected: info.file_size,
                got: data.len() as u64,
            });
        }

        let usage = self.transport.download_complete(lookup, session).await?;
        tracing::info!(code = %code, bytes = data.len(), used = usage.used_count, "download complete");

        Ok(Download { info, data, usage })
    }
}
