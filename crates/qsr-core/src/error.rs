use thiserror::Error;

use crate::types::FileId;

pub type RelayResult<T> = Result<T, RelayError>;

/// Error taxonomy for relay operations.
///
/// The terminal-state variants (`CodeExpired`, `CodeCompleted`,
/// `CodeInvalidated`) and the availability variants (`KeyNotReady`,
/// `ChunkMissing`, `ChunkExpired`) are deliberately distinct so callers can
/// tell "wrong code", "expired", "already used up" and "not ready yet"
/// apart without string matching.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("pickup code not found")]
    CodeNotFound,

    #[error("pickup code has expired")]
    CodeExpired,

    #[error("pickup code has reached its usage limit")]
    CodeCompleted,

    #[error("pickup code was invalidated by the sender")]
    CodeInvalidated,

    #[error("wrapped key not stored yet; sender may still be uploading")]
    KeyNotReady,

    #[error("file metadata not stored yet; sender may still be uploading")]
    FileInfoNotReady,

    #[error("chunk {index} is not present in the relay")]
    ChunkMissing { index: u32 },

    #[error("chunk {index} is past its expiry")]
    ChunkExpired { index: u32 },

    #[error("identical content already registered under file {file_id}")]
    DuplicateContent { file_id: FileId },

    #[error("upload incomplete: {} chunk(s) missing", missing.len())]
    UploadIncomplete { missing: Vec<u32> },

    #[error("file {file_id} not found")]
    FileNotFound { file_id: FileId },

    #[error("download session not found")]
    SessionNotFound,

    #[error("invalid pickup code: {0}")]
    InvalidCode(String),

    #[error("empty chunk body")]
    EmptyChunk,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Machine-readable reason code carried in HTTP error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::CodeNotFound => "NOT_FOUND",
            RelayError::CodeExpired => "EXPIRED",
            RelayError::CodeCompleted => "COMPLETED",
            RelayError::CodeInvalidated => "INVALIDATED",
            RelayError::KeyNotReady => "KEY_NOT_READY",
            RelayError::FileInfoNotReady => "FILE_INFO_NOT_READY",
            RelayError::ChunkMissing { .. } => "CHUNK_MISSING",
            RelayError::ChunkExpired { .. } => "CHUNK_EXPIRED",
            RelayError::DuplicateContent { .. } => "DUPLICATE_CONTENT",
            RelayError::UploadIncomplete { .. } => "INCOMPLETE_UPLOAD",
            RelayError::FileNotFound { .. } => "FILE_NOT_FOUND",
            RelayError::SessionNotFound => "SESSION_NOT_FOUND",
            RelayError::InvalidCode(_) => "INVALID_CODE",
            RelayError::EmptyChunk => "EMPTY_CHUNK",
            RelayError::Storage(_) => "STORAGE_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Other(_) => "INTERNAL_ERROR",
        }
    }
}
