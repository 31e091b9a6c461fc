//! qsr-crypto: client-side E2E encryption for the pickup-code relay
//!
//! Wire formats (binary):
//! ```text
//! encrypted chunk  = [12 bytes: random nonce][ciphertext][16 bytes: Poly1305 tag]
//! wrapped key      = [12 bytes: random nonce][ciphertext of 32-byte content key][16-byte tag]
//! ```
//!
//! Key hierarchy:
//! ```text
//! Pickup code (12 chars)
//!   ├── lookup segment (first 6)  → server-side record/cache key, never used as key material
//!   └── key segment (last 6)      → Argon2id → Wrapping Key (256-bit)
//!                                     └── wraps the random per-file Content Key (256-bit)
//!                                           └── ChaCha20-Poly1305 over each chunk
//! ```
//!
//! The server only ever holds the wrapped key and encrypted chunks; without
//! the key segment it cannot reconstruct the wrapping key, so a full server
//! compromise yields ciphertext only.

pub mod chunk;
pub mod kdf;
pub mod keys;
pub mod split;

pub use chunk::{decrypt_chunk, encrypt_chunk, transfer_digest};
pub use kdf::{derive_wrapping_key, derive_wrapping_key_with, KdfParams};
pub use keys::{generate_content_key, unwrap_key, wrap_key, ContentKey, WrappingKey};
pub use split::ChunkPlan;

use thiserror::Error;

/// Size of a content or wrapping key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Length of the pickup code's key segment
pub const KEY_SEGMENT_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication failed while unwrapping the content key: wrong pickup
    /// code, or truncated/corrupted storage. This is the only signal that a
    /// receiver typed the wrong code.
    #[error("key unwrap failed: wrong pickup code or corrupted data")]
    KeyUnwrap,

    /// Authentication failed while decrypting a chunk: tampering,
    /// truncation, or wrong content key.
    #[error("chunk authentication failed: tampered, truncated, or wrong key")]
    ChunkAuth,

    #[error("key segment must be {KEY_SEGMENT_LEN} uppercase alphanumerics")]
    InvalidKeySegment,

    #[error("chunk size must be non-zero")]
    InvalidChunkSize,

    #[error("KDF failed: {0}")]
    Kdf(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Entropy-source failure while generating a key. Fatal.
    #[error("random key generation failed: {0}")]
    Entropy(String),
}
