//! Per-chunk ChaCha20-Poly1305 encryption and the transfer digest.
//!
//! Encrypted chunk format: `[12 bytes: random nonce][ciphertext][16-byte tag]`
//!
//! Every encryption call draws a fresh random nonce. Nonces are never
//! derived from the chunk index: reuse under the same key would break
//! confidentiality, and random nonces also keep re-encryption of the same
//! plaintext unlinkable.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::keys::ContentKey;
use crate::{CryptoError, NONCE_SIZE, TAG_SIZE};

/// Encrypt a single chunk under the content key.
pub fn encrypt_chunk(key: &ContentKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encrypt(format!("chunk: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a single chunk. Fails with [`CryptoError::ChunkAuth`] on
/// tampering, truncation, or a wrong key — never returns garbage bytes.
pub fn decrypt_chunk(key: &ContentKey, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::ChunkAuth);
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::ChunkAuth)
}

/// SHA-256 hex of an encrypted chunk, used in the upload acknowledgement
/// handshake between orchestrator and relay. Not the dedup hash — dedup
/// operates on the whole-file plaintext hash.
pub fn transfer_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_content_key;
    use proptest::prelude::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_content_key().unwrap();
        let plaintext = b"hello, encrypted relay!";

        let encrypted = encrypt_chunk(&key, plaintext).unwrap();
        let decrypted = decrypt_chunk(&key, &encrypted).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn encrypt_decrypt_empty() {
        let key = generate_content_key().unwrap();
        let encrypted = encrypt_chunk(&key, b"").unwrap();
        assert_eq!(decrypt_chunk(&key, &encrypted).unwrap(), b"");
    }

    #[test]
    fn decrypt_wrong_key_fails() {
        let k1 = generate_content_key().unwrap();
        let k2 = generate_content_key().unwrap();

        let encrypted = encrypt_chunk(&k1, b"secret data").unwrap();
        assert!(matches!(
            decrypt_chunk(&k2, &encrypted),
            Err(CryptoError::ChunkAuth)
        ));
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = generate_content_key().unwrap();
        let a = encrypt_chunk(&key, b"same plaintext").unwrap();
        let b = encrypt_chunk(&key, b"same plaintext").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE], "nonces must not repeat");
        assert_ne!(a, b);
    }

    #[test]
    fn encrypted_size() {
        let key = generate_content_key().unwrap();
        let encrypted = encrypt_chunk(&key, &vec![0u8; 1000]).unwrap();
        // nonce (12) + plaintext (1000) + tag (16) = 1028
        assert_eq!(encrypted.len(), NONCE_SIZE + 1000 + TAG_SIZE);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_content_key().unwrap();
        let mut encrypted = encrypt_chunk(&key, b"secret data").unwrap();
        encrypted[NONCE_SIZE + 2] ^= 0xFF;
        assert!(decrypt_chunk(&key, &encrypted).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = generate_content_key().unwrap();
        let encrypted = encrypt_chunk(&key, b"secret data").unwrap();
        assert!(decrypt_chunk(&key, &encrypted[..NONCE_SIZE + TAG_SIZE - 1]).is_err());
        assert!(decrypt_chunk(&key, &[]).is_err());
    }

    #[test]
    fn digest_is_stable_hex() {
        let d = transfer_digest(b"abc");
        assert_eq!(
            d,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    proptest! {
        #[test]
        fn roundtrip_any_payload(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let key = generate_content_key().unwrap();
            let encrypted = encrypt_chunk(&key, &data).unwrap();
            let decrypted = decrypt_chunk(&key, &encrypted).unwrap();
            prop_assert_eq!(decrypted, data);
        }

        #[test]
        fn any_bitflip_is_rejected(
            data in proptest::collection::vec(any::<u8>(), 1..=256),
            flip_byte in 0usize..268,
            flip_bit in 0u8..8,
        ) {
            let key = generate_content_key().unwrap();
            let mut encrypted = encrypt_chunk(&key, &data).unwrap();
            let pos = flip_byte % encrypted.len();
            encrypted[pos] ^= 1 << flip_bit;
            prop_assert!(decrypt_chunk(&key, &encrypted).is_err());
        }
    }
}
