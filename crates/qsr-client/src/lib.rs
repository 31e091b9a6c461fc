//! qsr-client: transfer orchestration for senders and receivers.
//!
//! The relay never sees plaintext or key material; everything
//! crypto-relevant happens here. An [`Uploader`] slices, encrypts, and
//! pushes chunks through any [`RelayTransport`], wraps the content key
//! under the pickup code's withheld half, and finalizes the upload. A
//! [`Downloader`] does the mirror image: polls for the wrapped key, unwraps
//! it (the only moment a wrong code can be detected), pulls chunk batches,
//! and reassembles the file.
//!
//! One orchestrator value drives one transfer.

pub mod download;
pub mod retry;
pub mod transport;
pub mod upload;

pub use download::{Download, Downloader};
pub use retry::{retry_with, RetryPolicy};
pub use transport::RelayTransport;
pub use upload::{ContentKeyCache, DuplicatePolicy, UploadOutcome, UploadRequest, Uploader};

use qsr_core::error::RelayError;
use qsr_crypto::CryptoError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// A retryable operation stayed unavailable for the whole retry budget.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RelayError,
    },

    /// The relay acknowledged different bytes than the sender transmitted,
    /// or returned bytes whose digest does not match its own claim.
    #[error("chunk {index}: digest mismatch")]
    DigestMismatch { index: u32 },

    /// Reassembled plaintext does not add up to the advertised file size.
    #[error("reassembled {got} bytes, metadata promised {expected}")]
    SizeMismatch { expected: u64, got: u64 },

    /// Asked to alias onto an existing file whose content key this sender
    /// no longer holds; only invalidate-and-reupload can proceed.
    #[error("no cached content key for file {file_id}")]
    MissingContentKey { file_id: qsr_core::types::FileId },
}

impl ClientError {
    /// True when the receiver presented a structurally valid code whose key
    /// segment failed to unwrap the content key: a wrong code, not a
    /// transient condition.
    pub fn is_wrong_code(&self) -> bool {
        matches!(self, ClientError::Crypto(CryptoError::KeyUnwrap))
    }
}
