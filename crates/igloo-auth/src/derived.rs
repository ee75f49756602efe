//! The per-user derived key.
//!
//! A successful login turns `{username, password}` into a 32-byte key that
//! unwraps the user's encrypted credential blob on demand. The key lives
//! only in ephemeral memory tied to a live session token and is zeroized
//! when that token goes away.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// 32 bytes of unwrap-key material. Cloning copies into fresh zeroizing
/// storage; dropping wipes.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; 32]>);

impl DerivedKey {
    /// Derive from credentials. The username acts as context so two users
    /// with the same password get unrelated keys.
    pub fn derive(username: &str, password: &str) -> Self {
        let (_, hk) = Hkdf::<Sha256>::extract(Some(b"igloo.unwrap.v1"), password.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        // Expand only fails for absurd output lengths; 32 is always fine.
        let _ = hk.expand(username.as_bytes(), okm.as_mut());
        Self(okm)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(<sensitive>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_user() {
        let a = DerivedKey::derive("alice", "hunter22!A");
        let b = DerivedKey::derive("alice", "hunter22!A");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn username_and_password_both_matter() {
        let base = DerivedKey::derive("alice", "hunter22!A");
        assert_ne!(
            base.as_bytes(),
            DerivedKey::derive("bob", "hunter22!A").as_bytes()
        );
        assert_ne!(
            base.as_bytes(),
            DerivedKey::derive("alice", "other-pass9Z!").as_bytes()
        );
    }
}
