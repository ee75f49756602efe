//! A single-key signer.
//!
//! Holds one secp256k1 key in process and implements the full adapter
//! surface, NIP-04 included. Used for development deployments without a
//! threshold quorum and throughout the test suite. The production signer is
//! a threshold node reached over its own coordination protocol; it plugs in
//! behind the same trait.

use async_trait::async_trait;

use igloo_codec::{event_id, nip04, nip44, ConversationKey, TransportKeypair};
use igloo_core::{ClientPubkey, EventTemplate, NostrEvent};

use crate::{IdentityError, IdentitySigner, Result};

/// In-process signer over a single secret key.
pub struct LocalSigner {
    keys: TransportKeypair,
}

impl LocalSigner {
    pub fn generate() -> Result<Self> {
        let keys = TransportKeypair::generate().map_err(reject)?;
        Ok(Self { keys })
    }

    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let keys = TransportKeypair::from_secret_bytes(secret).map_err(reject)?;
        Ok(Self { keys })
    }

    /// The raw secret, for sealing into the credential store. Callers must
    /// not hold onto the bytes beyond the seal.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.keys.secret_bytes()
    }

    fn conversation_key(&self, peer: &ClientPubkey) -> Result<ConversationKey> {
        let shared = self.keys.shared_secret(peer).map_err(reject)?;
        Ok(ConversationKey::from_shared_secret(&shared))
    }
}

fn reject(e: impl std::fmt::Display) -> IdentityError {
    IdentityError::Rejected(e.to_string())
}

#[async_trait]
impl IdentitySigner for LocalSigner {
    async fn get_public_key(&self) -> Result<String> {
        Ok(self.keys.public_key_hex().to_string())
    }

    async fn sign_event(&self, template: EventTemplate) -> Result<NostrEvent> {
        let mut event =
            event_id::finalize_template(&template, self.keys.public_key_hex()).map_err(reject)?;

        let mut id_bytes = [0u8; 32];
        hex::decode_to_slice(&event.id, &mut id_bytes)
            .map_err(|e| IdentityError::Rejected(format!("event id: {}", e)))?;
        event.sig = self.keys.sign_event_id(&id_bytes).map_err(reject)?;
        Ok(event)
    }

    async fn nip44_encrypt(&self, peer: ClientPubkey, plaintext: String) -> Result<String> {
        let key = self.conversation_key(&peer)?;
        nip44::encrypt(&key, &plaintext).map_err(reject)
    }

    async fn nip44_decrypt(&self, peer: ClientPubkey, ciphertext: String) -> Result<String> {
        let key = self.conversation_key(&peer)?;
        nip44::decrypt(&key, &ciphertext).map_err(reject)
    }

    async fn nip04_encrypt(&self, peer: ClientPubkey, plaintext: String) -> Result<String> {
        let shared = self.keys.shared_secret(&peer).map_err(reject)?;
        nip04::encrypt(&shared, &plaintext).map_err(reject)
    }

    async fn nip04_decrypt(&self, peer: ClientPubkey, ciphertext: String) -> Result<String> {
        let shared = self.keys.shared_secret(&peer).map_err(reject)?;
        nip04::decrypt(&shared, &ciphertext).map_err(reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_a_template_end_to_end() {
        let signer = LocalSigner::generate().unwrap();
        let template = EventTemplate {
            pubkey: None,
            created_at: Some(1_700_000_000),
            kind: 1,
            tags: vec![],
            content: "hello".into(),
        };

        let event = signer.sign_event(template).await.unwrap();
        assert_eq!(event.pubkey, signer.get_public_key().await.unwrap());
        assert_eq!(event.kind, 1);
        assert_eq!(event.sig.len(), 128);
    }

    #[tokio::test]
    async fn nip44_and_nip04_round_trip_against_self() {
        let signer = LocalSigner::generate().unwrap();
        let peer_keys = TransportKeypair::generate().unwrap();
        let peer = ClientPubkey::parse(peer_keys.public_key_hex()).unwrap();

        let sealed44 = signer
            .nip44_encrypt(peer.clone(), "m44".into())
            .await
            .unwrap();
        // Peer decrypts with the mirrored shared secret.
        let own = ClientPubkey::parse(signer.get_public_key().await.unwrap().as_str()).unwrap();
        let shared = peer_keys.shared_secret(&own).unwrap();
        let key = ConversationKey::from_shared_secret(&shared);
        assert_eq!(nip44::decrypt(&key, &sealed44).unwrap(), "m44");

        let sealed04 = signer
            .nip04_encrypt(peer.clone(), "m04".into())
            .await
            .unwrap();
        assert_eq!(nip04::decrypt(&shared, &sealed04).unwrap(), "m04");
    }
}
