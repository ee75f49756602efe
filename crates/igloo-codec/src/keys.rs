//! The broker's transport keypair.
//!
//! One secp256k1 keypair per broker user, used only to address and open
//! NIP-46 envelopes on relays. It is persisted so client sessions survive
//! restarts and regenerated only on explicit reset. It is never the signing
//! identity: `get_public_key` answers with the identity signer's pubkey, not
//! this one.

use k256::ecdh::diffie_hellman;
use k256::schnorr::signature::Signer;
use k256::schnorr::SigningKey;
use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};
use zeroize::Zeroizing;

use igloo_core::ClientPubkey;

use crate::error::{CodecError, Result};

/// Transport keypair: 32-byte secret, x-only public key.
pub struct TransportKeypair {
    secret: Zeroizing<[u8; 32]>,
    public_hex: String,
}

impl TransportKeypair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Result<Self> {
        let mut secret = Zeroizing::new([0u8; 32]);
        loop {
            getrandom::getrandom(secret.as_mut())
                .map_err(|e| CodecError::InvalidKey(format!("rng failure: {}", e)))?;
            // Rejection-sample the (astronomically unlikely) invalid scalars.
            if SigningKey::from_bytes(secret.as_ref()).is_ok() {
                break;
            }
        }
        Self::from_secret_bytes(secret.as_slice())
    }

    /// Rebuild a keypair from a persisted 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        let signing = SigningKey::from_bytes(&secret)
            .map_err(|e| CodecError::InvalidKey(format!("not a valid scalar: {}", e)))?;
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        Ok(Self {
            secret: Zeroizing::new(secret),
            public_hex,
        })
    }

    /// The x-only public key, lowercase hex. This is what relays filter on.
    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// The raw secret, for persistence. Callers must not log or copy it
    /// beyond the store write.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// BIP-340 Schnorr signature over a 32-byte event id.
    pub fn sign_event_id(&self, event_id: &[u8; 32]) -> Result<String> {
        let signing = SigningKey::from_bytes(self.secret.as_ref())
            .map_err(|e| CodecError::Signing(e.to_string()))?;
        let signature = signing.sign(event_id);
        Ok(hex::encode(signature.to_bytes()))
    }

    /// ECDH shared x-coordinate with a peer's x-only pubkey.
    ///
    /// Nostr pubkeys drop the parity byte, so the full point is recovered by
    /// trying the even prefix first and the odd one second.
    pub fn shared_secret(&self, peer: &ClientPubkey) -> Result<Zeroizing<[u8; 32]>> {
        let secret = K256SecretKey::from_slice(self.secret.as_ref())
            .map_err(|e| CodecError::InvalidKey(format!("secret: {}", e)))?;

        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&peer.to_bytes());
        let public = K256PublicKey::from_sec1_bytes(&compressed)
            .or_else(|_| {
                compressed[0] = 0x03;
                K256PublicKey::from_sec1_bytes(&compressed)
            })
            .map_err(|e| CodecError::InvalidKey(format!("peer pubkey: {}", e)))?;

        let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }
}

impl std::fmt::Debug for TransportKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKeypair")
            .field("public", &self.public_hex)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_bytes() {
        let keys = TransportKeypair::generate().unwrap();
        let restored = TransportKeypair::from_secret_bytes(keys.secret_bytes()).unwrap();
        assert_eq!(keys.public_key_hex(), restored.public_key_hex());
        assert_eq!(keys.public_key_hex().len(), 64);
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let alice = TransportKeypair::generate().unwrap();
        let bob = TransportKeypair::generate().unwrap();

        let alice_view = ClientPubkey::parse(bob.public_key_hex()).unwrap();
        let bob_view = ClientPubkey::parse(alice.public_key_hex()).unwrap();

        let s1 = alice.shared_secret(&alice_view).unwrap();
        let s2 = bob.shared_secret(&bob_view).unwrap();
        assert_eq!(*s1, *s2);
    }

    #[test]
    fn rejects_wrong_length_secrets() {
        assert!(TransportKeypair::from_secret_bytes(&[0u8; 31]).is_err());
        assert!(TransportKeypair::from_secret_bytes(&[0u8; 32]).is_err()); // zero scalar
    }
}
