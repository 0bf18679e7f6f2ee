//! X25519 key exchange (spec §4.4) and the pump's `deriveSharedKey`
//! composition on top of it.
//!
//! Peer public keys cross this module's boundary as raw 32-byte arrays (no
//! DER framing), matching the pump's own wire format.

use x25519_dalek::{PublicKey, StaticSecret};

use super::hchacha20::hchacha20;

/// A long-lived (non-ephemeral) X25519 key pair for this device, persisted
/// across restarts so the relay key-exchange flow can be retried without
/// re-pairing.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand_core::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct a key pair from a persisted 32-byte private scalar.
    pub fn from_private_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn private_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

/// Raw X25519 Diffie-Hellman: `scalar_mult(private, public) -> 32 bytes`.
pub fn x25519(private: &KeyPair, peer_public_raw: &[u8; 32]) -> [u8; 32] {
    let peer = PublicKey::from(*peer_public_raw);
    *private.secret.diffie_hellman(&peer).as_bytes()
}

/// `deriveSharedKey(private, peer_public_raw) -> 32-byte shared key`
/// (spec §4.4): `HChaCha20(X25519(private, peer_public), nonce = 16 zero bytes)`.
pub fn derive_shared_key(private: &KeyPair, peer_public_raw: &[u8; 32]) -> [u8; 32] {
    let ss = x25519(private, peer_public_raw);
    hchacha20(&ss, &[0u8; 16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_shared_key() {
        let device = KeyPair::generate();
        let pump = KeyPair::generate();

        let device_shared = derive_shared_key(&device, &pump.public_bytes());
        let pump_shared = derive_shared_key(&pump, &device.public_bytes());

        assert_eq!(device_shared, pump_shared);
    }

    #[test]
    fn private_bytes_round_trip() {
        let kp = KeyPair::generate();
        let bytes = kp.private_bytes();
        let restored = KeyPair::from_private_bytes(bytes);
        assert_eq!(kp.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn different_peers_yield_different_shared_keys() {
        let device = KeyPair::generate();
        let pump_a = KeyPair::generate();
        let pump_b = KeyPair::generate();

        assert_ne!(
            derive_shared_key(&device, &pump_a.public_bytes()),
            derive_shared_key(&device, &pump_b.public_bytes())
        );
    }
}
