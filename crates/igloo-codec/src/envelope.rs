//! Opening and sealing NIP-46 envelopes.

use tracing::warn;
use zeroize::Zeroizing;

use igloo_core::{ClientPubkey, NostrEvent, NIP46_EVENT_KIND};

use crate::error::{CodecError, Result};
use crate::event_id::canonical_event_id;
use crate::keys::TransportKeypair;
use crate::nip44::ConversationKey;
use crate::{nip04, nip44};

/// Encrypts and decrypts NIP-46 envelopes with the broker's transport key.
pub struct EnvelopeCodec {
    keys: TransportKeypair,
}

impl EnvelopeCodec {
    pub fn new(keys: TransportKeypair) -> Self {
        Self { keys }
    }

    /// The transport pubkey relays filter on.
    pub fn transport_pubkey(&self) -> &str {
        self.keys.public_key_hex()
    }

    /// Decrypt an inbound envelope.
    ///
    /// NIP-44 first; NIP-04 as the compatibility fallback. An event that
    /// yields under neither is dropped with a warning, never an error the
    /// sender hears about.
    pub fn open(&self, event: &NostrEvent) -> Result<(ClientPubkey, String)> {
        let sender = ClientPubkey::parse(&event.pubkey)
            .map_err(|e| CodecError::Event(e.to_string()))?;
        let shared: Zeroizing<[u8; 32]> = self.keys.shared_secret(&sender)?;

        let conversation = ConversationKey::from_shared_secret(&shared);
        match nip44::decrypt(&conversation, &event.content) {
            Ok(plaintext) => return Ok((sender, plaintext)),
            Err(nip44_err) => {
                if let Ok(plaintext) = nip04::decrypt(&shared, &event.content) {
                    return Ok((sender, plaintext));
                }
                warn!(
                    sender = %sender,
                    event_id = %event.id,
                    error = %nip44_err,
                    "dropping envelope that decrypts under neither nip44 nor nip04"
                );
                Err(CodecError::Undecryptable)
            }
        }
    }

    /// Encrypt and sign an outbound envelope addressed to one client.
    /// Outbound traffic is always NIP-44.
    pub fn seal(&self, recipient: &ClientPubkey, plaintext: &str) -> Result<NostrEvent> {
        let shared = self.keys.shared_secret(recipient)?;
        let conversation = ConversationKey::from_shared_secret(&shared);
        let content = nip44::encrypt(&conversation, plaintext)?;

        let pubkey = self.keys.public_key_hex().to_string();
        let created_at = igloo_core::time::unix_now();
        let tags = vec![vec!["p".to_string(), recipient.as_str().to_string()]];

        let id = canonical_event_id(&pubkey, created_at, NIP46_EVENT_KIND, &tags, &content)?;
        let sig = self.keys.sign_event_id(&id)?;

        Ok(NostrEvent {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: NIP46_EVENT_KIND,
            tags,
            content,
            sig,
        })
    }
}
