//! HChaCha20 kernel (spec §4.4).
//!
//! A keyed pseudorandom function built from the ChaCha20 core: 20 rounds (10
//! column/diagonal double-rounds) of the ChaCha quarter-round over a 16-word
//! state seeded with the constant, key and nonce, with no feed-forward
//! addition of the initial state at the end (unlike the full ChaCha20 block
//! function). Used both to derive XChaCha20-Poly1305 subkeys and, directly,
//! as the KDF in `deriveSharedKey`.

const CONSTANT: [u8; 16] = *b"expand 32-byte k";

#[inline]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = state[d].rotate_left(16);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = state[b].rotate_left(12);

    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = state[d].rotate_left(8);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = state[b].rotate_left(7);
}

/// `HChaCha20(key, nonce) -> 32 bytes`. `nonce` must be exactly 16 bytes.
pub fn hchacha20(key: &[u8; 32], nonce: &[u8; 16]) -> [u8; 32] {
    let mut state = [0u32; 16];

    for (i, word) in CONSTANT.chunks_exact(4).enumerate() {
        state[i] = u32::from_le_bytes(word.try_into().unwrap());
    }
    for (i, word) in key.chunks_exact(4).enumerate() {
        state[4 + i] = u32::from_le_bytes(word.try_into().unwrap());
    }
    for (i, word) in nonce.chunks_exact(4).enumerate() {
        state[12 + i] = u32::from_le_bytes(word.try_into().unwrap());
    }

    for _ in 0..10 {
        // Column round.
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);
        // Diagonal round.
        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    let mut out = [0u8; 32];
    for (i, word) in state[0..4].iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    for (i, word) in state[12..16].iter().enumerate() {
        out[16 + i * 4..16 + i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test vector from the XChaCha20 draft (draft-irtf-cfrg-xchacha-03 §2.2.1).
    #[test]
    fn draft_test_vector() {
        let key: [u8; 32] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b,
            0x1c, 0x1d, 0x1e, 0x1f,
        ];
        let nonce: [u8; 16] = [
            0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x4a, 0x00, 0x00, 0x00, 0x00, 0x31, 0x41,
            0x59, 0x27,
        ];
        let expected: [u8; 32] = [
            0x82, 0x41, 0x3b, 0x42, 0x27, 0xb2, 0x7b, 0xfe, 0xd3, 0x0e, 0x42, 0x50, 0x8a, 0x87,
            0x7d, 0x73, 0x3a, 0x0f, 0x9c, 0xb8, 0x76, 0xec, 0x89, 0x04, 0x27, 0x6a, 0xc6, 0xc9,
            0xdd, 0x8c, 0x0f, 0x75,
        ];
        assert_eq!(hchacha20(&key, &nonce), expected);
    }

    #[test]
    fn deterministic_for_same_input() {
        let key = [7u8; 32];
        let nonce = [9u8; 16];
        assert_eq!(hchacha20(&key, &nonce), hchacha20(&key, &nonce));
    }

    #[test]
    fn differs_for_different_keys() {
        let nonce = [0u8; 16];
        assert_ne!(hchacha20(&[1u8; 32], &nonce), hchacha20(&[2u8; 32], &nonce));
    }
}
