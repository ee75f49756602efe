//! Sealing and unsealing the per-user credential blob.
//!
//! The `user_credentials` table stores one opaque blob per user: the
//! signing credential, encrypted under the user's derived key. Decryption
//! happens on demand after login and the plaintext never touches the store.
//!
//! The construction reuses the NIP-44 v2 payload format (ChaCha20 +
//! HMAC-SHA256 over an HKDF-derived message key), keyed from the derived key
//! instead of an ECDH secret.

use igloo_codec::nip44::{self, ConversationKey};
use igloo_store::{BlobStore, Table};

use crate::derived::DerivedKey;
use crate::{AuthError, Result};

fn sealing_key(key: &DerivedKey) -> ConversationKey {
    ConversationKey::from_shared_secret(key.as_bytes())
}

/// Encrypt a credential blob under the derived key.
pub fn seal(key: &DerivedKey, plaintext: &str) -> Result<String> {
    nip44::encrypt(&sealing_key(key), plaintext).map_err(|_| AuthError::CredentialUnwrap)
}

/// Decrypt a credential blob. A wrong key fails the MAC and surfaces as
/// [`AuthError::CredentialUnwrap`].
pub fn open(key: &DerivedKey, sealed: &str) -> Result<String> {
    nip44::decrypt(&sealing_key(key), sealed).map_err(|_| AuthError::CredentialUnwrap)
}

/// Store a user's sealed credential.
pub async fn store_credential(
    store: &BlobStore,
    user_id: &str,
    key: &DerivedKey,
    plaintext: &str,
) -> Result<()> {
    let sealed = seal(key, plaintext)?;
    store
        .put(
            Table::UserCredentials,
            user_id.to_string(),
            sealed.into_bytes(),
        )
        .await?;
    Ok(())
}

/// Fetch and unseal a user's credential, if one is stored.
pub async fn load_credential(
    store: &BlobStore,
    user_id: &str,
    key: &DerivedKey,
) -> Result<Option<String>> {
    let Some(bytes) = store
        .get(Table::UserCredentials, user_id.to_string())
        .await?
    else {
        return Ok(None);
    };
    let sealed = String::from_utf8(bytes).map_err(|_| AuthError::CredentialUnwrap)?;
    open(key, &sealed).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open_round_trip() {
        let key = DerivedKey::derive("alice", "Str0ng-pass!");
        let sealed = seal(&key, "share-material").unwrap();
        assert_ne!(sealed, "share-material");
        assert_eq!(open(&key, &sealed).unwrap(), "share-material");
    }

    #[test]
    fn wrong_key_cannot_open() {
        let key = DerivedKey::derive("alice", "Str0ng-pass!");
        let sealed = seal(&key, "share-material").unwrap();

        let wrong = DerivedKey::derive("alice", "Wrong-pass1!");
        assert!(matches!(
            open(&wrong, &sealed),
            Err(AuthError::CredentialUnwrap)
        ));
    }

    #[tokio::test]
    async fn credential_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("c.redb")).unwrap();
        let key = DerivedKey::derive("alice", "Str0ng-pass!");

        assert_eq!(load_credential(&store, "u1", &key).await.unwrap(), None);

        store_credential(&store, "u1", &key, "frost-share").await.unwrap();
        assert_eq!(
            load_credential(&store, "u1", &key).await.unwrap().as_deref(),
            Some("frost-share")
        );
    }
}
