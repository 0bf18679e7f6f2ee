//! Cryptographic primitives (spec §4.4, component C4): the HChaCha20
//! kernel, X25519 Diffie-Hellman, and the XChaCha20-Poly1305 AEAD built from
//! the two.

pub mod hchacha20;
pub mod x25519;
pub mod xchacha20poly1305;

pub use hchacha20::hchacha20;
pub use x25519::{derive_shared_key, x25519 as x25519_dh, KeyPair};
