//! Content keys, wrapping keys, and key wrapping.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{CryptoError, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// The random 256-bit key that directly encrypts one file's chunks.
/// Zeroized on drop so it does not linger in memory.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The key derived from the pickup code's key segment. Encrypts the content
/// key for untrusted storage; never transmitted or stored anywhere.
#[derive(Clone)]
pub struct WrappingKey {
    bytes: [u8; KEY_SIZE],
}

impl WrappingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit content key.
pub fn generate_content_key() -> Result<ContentKey, CryptoError> {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng()
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(ContentKey::from_bytes(bytes))
}

/// Wrap (encrypt) the content key under the wrapping key.
///
/// Output: `[12-byte nonce][ciphertext + 16-byte tag]`, safe to hand to the
/// relay.
pub fn wrap_key(wrapping: &WrappingKey, content: &ContentKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(wrapping.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, content.as_bytes().as_ref())
        .map_err(|e| CryptoError::Encrypt(format!("key wrapping: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unwrap (decrypt) a content key.
///
/// Fails with [`CryptoError::KeyUnwrap`] when authentication fails — the
/// sole mechanism by which a wrong pickup code is detected, since the
/// lookup segment alone proves nothing.
pub fn unwrap_key(wrapping: &WrappingKey, wrapped: &[u8]) -> Result<ContentKey, CryptoError> {
    if wrapped.len() < NONCE_SIZE + KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::KeyUnwrap);
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(wrapping.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::KeyUnwrap)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::KeyUnwrap);
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ContentKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wrapping_key() -> WrappingKey {
        WrappingKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn content_keys_are_random() {
        let k1 = generate_content_key().unwrap();
        let k2 = generate_content_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let wrapping = test_wrapping_key();
        let content = generate_content_key().unwrap();

        let wrapped = wrap_key(&wrapping, &content).unwrap();
        let unwrapped = unwrap_key(&wrapping, &wrapped).unwrap();

        assert_eq!(content.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn unwrap_with_wrong_key_fails() {
        let w1 = WrappingKey::from_bytes([1u8; KEY_SIZE]);
        let w2 = WrappingKey::from_bytes([2u8; KEY_SIZE]);
        let content = generate_content_key().unwrap();

        let wrapped = wrap_key(&w1, &content).unwrap();
        assert!(matches!(
            unwrap_key(&w2, &wrapped),
            Err(CryptoError::KeyUnwrap)
        ));
    }

    #[test]
    fn unwrap_tampered_fails() {
        let wrapping = test_wrapping_key();
        let content = generate_content_key().unwrap();

        let wrapped = wrap_key(&wrapping, &content).unwrap();
        for i in 0..wrapped.len() {
            let mut copy = wrapped.clone();
            copy[i] ^= 0x01;
            assert!(
                unwrap_key(&wrapping, &copy).is_err(),
                "bit flip at byte {i} must fail authentication"
            );
        }
        assert!(unwrap_key(&wrapping, &wrapped).is_ok());
    }

    #[test]
    fn unwrap_truncated_fails() {
        let wrapping = test_wrapping_key();
        let content = generate_content_key().unwrap();
        let wrapped = wrap_key(&wrapping, &content).unwrap();

        assert!(unwrap_key(&wrapping, &wrapped[..wrapped.len() - 1]).is_err());
        assert!(unwrap_key(&wrapping, &[]).is_err());
    }

    #[test]
    fn wrapped_key_size() {
        let wrapping = test_wrapping_key();
        let content = generate_content_key().unwrap();
        let wrapped = wrap_key(&wrapping, &content).unwrap();

        // nonce (12) + key (32) + tag (16) = 60
        assert_eq!(wrapped.len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
    }
}
