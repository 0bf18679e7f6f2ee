//! XChaCha20-Poly1305 (IETF) built from [`hchacha20`] + `ChaCha20Poly1305`
//! (spec §4.4).
//!
//! ```text
//! subkey    = HChaCha20(key, nonce[0..16])
//! subnonce  = 0x00000000 || nonce[16..24]     (12 bytes)
//! encrypt/decrypt with ChaCha20-Poly1305(subkey, subnonce, aad, ...)
//! ```
//!
//! AAD is always empty in this system, but the interface accepts it per spec.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use super::hchacha20::hchacha20;
use crate::error::PumpError;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

fn derive_subcipher(key: &[u8; 32], nonce24: &[u8; NONCE_LEN]) -> (ChaCha20Poly1305, [u8; 12]) {
    let hnonce: [u8; 16] = nonce24[0..16].try_into().unwrap();
    let subkey = hchacha20(key, &hnonce);

    let mut subnonce = [0u8; 12];
    subnonce[4..12].copy_from_slice(&nonce24[16..24]);

    (ChaCha20Poly1305::new(Key::from_slice(&subkey)), subnonce)
}

/// Encrypt `plaintext` under `key` with the given 24-byte `nonce` and
/// (possibly empty) additional authenticated data. Returns
/// `ciphertext || 16-byte tag`.
pub fn encrypt(
    plaintext: &[u8],
    aad: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &[u8; 32],
) -> Result<Vec<u8>, PumpError> {
    let (cipher, subnonce) = derive_subcipher(key, nonce);
    cipher
        .encrypt(
            Nonce::from_slice(&subnonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| PumpError::Other(anyhow::anyhow!("XChaCha20-Poly1305 encrypt failed")))
}

/// Decrypt `ciphertext_and_tag` (as produced by [`encrypt`]) under `key` with
/// the given 24-byte `nonce` and AAD. Returns [`PumpError::DecryptFailed`] on
/// tag mismatch — the caller (the session cryptor) treats this as
/// authoritative evidence that the shared key is dead.
pub fn decrypt(
    ciphertext_and_tag: &[u8],
    aad: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &[u8; 32],
) -> Result<Vec<u8>, PumpError> {
    let (cipher, subnonce) = derive_subcipher(key, nonce);
    cipher
        .decrypt(
            Nonce::from_slice(&subnonce),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| PumpError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [0x42u8; 32];
        let nonce = [0x24u8; 24];
        let plaintext = b"system status payload plus counter tail".to_vec();

        let ct = encrypt(&plaintext, b"", &nonce, &key).unwrap();
        assert_eq!(ct.len(), plaintext.len() + TAG_LEN);

        let pt = decrypt(&ct, b"", &nonce, &key).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; 24];
        let ct = encrypt(&[], b"", &nonce, &key).unwrap();
        assert_eq!(ct.len(), TAG_LEN);
        assert_eq!(decrypt(&ct, b"", &nonce, &key).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn bit_flip_anywhere_fails_decrypt() {
        let key = [0x77u8; 32];
        let nonce = [0x88u8; 24];
        let ct = encrypt(b"hello pump", b"", &nonce, &key).unwrap();

        for i in 0..ct.len() {
            let mut corrupted = ct.clone();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(decrypt(&corrupted, b"", &nonce, &key), Err(PumpError::DecryptFailed)),
                "byte {i} flip was not detected"
            );
        }
    }

    #[test]
    fn wrong_key_fails_decrypt() {
        let nonce = [0x33u8; 24];
        let ct = encrypt(b"payload", b"", &nonce, &[1u8; 32]).unwrap();
        assert!(matches!(
            decrypt(&ct, b"", &nonce, &[2u8; 32]),
            Err(PumpError::DecryptFailed)
        ));
    }
}
