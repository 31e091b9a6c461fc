//! Key derivation: pickup-code key segment → wrapping key via Argon2id.
//!
//! Sender and receiver derive the wrapping key independently and never
//! exchange it, so the derivation must be a pure function of the key
//! segment. The salt is itself derived from the segment (there is nowhere
//! to store a random salt that the server could not see), which is
//! acceptable here: the segment space is small and the KDF cost parameters
//! carry the work factor.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::keys::WrappingKey;
use crate::{CryptoError, KEY_SEGMENT_LEN, KEY_SIZE};

const SALT_CONTEXT: &str = "qsr-relay 2024-06 wrapping-key salt";
const SALT_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive the wrapping key from a pickup code's key segment with default
/// cost parameters.
pub fn derive_wrapping_key(key_segment: &str) -> Result<WrappingKey, CryptoError> {
    derive_wrapping_key_with(key_segment, &KdfParams::default())
}

/// Derive the wrapping key with explicit cost parameters (tests use cheap
/// ones). Deterministic: the same segment always yields the same key.
pub fn derive_wrapping_key_with(
    key_segment: &str,
    params: &KdfParams,
) -> Result<WrappingKey, CryptoError> {
    if key_segment.len() != KEY_SEGMENT_LEN
        || !key_segment
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(CryptoError::InvalidKeySegment);
    }

    let salt_full = blake3::derive_key(SALT_CONTEXT, key_segment.as_bytes());
    let salt = &salt_full[..SALT_LEN];

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(key_segment.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id: {e}")))?;

    Ok(WrappingKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap parameters so the test suite stays fast.
    pub(crate) fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let params = fast_params();
        let k1 = derive_wrapping_key_with("ABC123", &params).unwrap();
        let k2 = derive_wrapping_key_with("ABC123", &params).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn different_segments_different_keys() {
        let params = fast_params();
        let k1 = derive_wrapping_key_with("ABC123", &params).unwrap();
        let k2 = derive_wrapping_key_with("ABC124", &params).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn rejects_malformed_segments() {
        let params = fast_params();
        assert!(matches!(
            derive_wrapping_key_with("abc123", &params),
            Err(CryptoError::InvalidKeySegment)
        ));
        assert!(derive_wrapping_key_with("ABC12", &params).is_err());
        assert!(derive_wrapping_key_with("ABC1234", &params).is_err());
        assert!(derive_wrapping_key_with("ABC-12", &params).is_err());
    }

    #[test]
    fn wrong_segments_never_unwrap() {
        use crate::keys::{generate_content_key, unwrap_key, wrap_key};
        use rand::Rng;

        let params = fast_params();
        let segment = "K7PQ2M";
        let wrapping = derive_wrapping_key_with(segment, &params).unwrap();
        let content = generate_content_key().unwrap();
        let wrapped = wrap_key(&wrapping, &content).unwrap();

        // sample the segment space: no wrong guess may yield a key that
        // authenticates against the wrapped blob
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        for _ in 0..48 {
            let guess: String = (0..6)
                .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                .collect();
            if guess == segment {
                continue;
            }
            let wrong = derive_wrapping_key_with(&guess, &params).unwrap();
            assert!(
                matches!(unwrap_key(&wrong, &wrapped), Err(CryptoError::KeyUnwrap)),
                "segment {guess} must not unwrap the key"
            );
        }
        assert!(unwrap_key(&wrapping, &wrapped).is_ok());
    }

    #[test]
    fn salt_depends_on_segment() {
        // Two segments differing in one character must not collide even
        // though the salt is derived rather than random.
        let params = fast_params();
        let k1 = derive_wrapping_key_with("AAAAA0", &params).unwrap();
        let k2 = derive_wrapping_key_with("AAAAA1", &params).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
