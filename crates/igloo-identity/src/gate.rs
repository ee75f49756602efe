//! The signer gate.
//!
//! A signer exists only while an authenticated operator session holds the
//! derived key that unwraps the user's credential. The gate is where the
//! broker asks "is anyone home": installed on login, cleared on logout or
//! token expiry, and every call through an empty gate fails `unauthorized`.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::{DeadlineSigner, IdentityError, Result};

/// Holds the currently unlocked signer, if any.
#[derive(Clone, Default)]
pub struct SignerGate {
    inner: Arc<RwLock<Option<DeadlineSigner>>>,
}

impl SignerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a signer after a successful credential unwrap.
    pub async fn install(&self, signer: DeadlineSigner) {
        *self.inner.write().await = Some(signer);
        info!("identity signer installed");
    }

    /// Remove the signer; subsequent calls fail `unauthorized`.
    pub async fn clear(&self) {
        if self.inner.write().await.take().is_some() {
            info!("identity signer cleared");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// The current signer, or `unauthorized` when nobody has logged in.
    pub async fn current(&self) -> Result<DeadlineSigner> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or(IdentityError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalSigner;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_gate_is_unauthorized() {
        let gate = SignerGate::new();
        assert!(!gate.is_unlocked().await);
        assert!(matches!(
            gate.current().await.unwrap_err(),
            IdentityError::Unauthorized
        ));
    }

    #[tokio::test]
    async fn install_and_clear() {
        let gate = SignerGate::new();
        let signer = DeadlineSigner::new(
            Arc::new(LocalSigner::generate().unwrap()),
            Duration::from_secs(5),
        );

        gate.install(signer).await;
        assert!(gate.is_unlocked().await);
        assert!(gate.current().await.is_ok());

        gate.clear().await;
        assert!(matches!(
            gate.current().await.unwrap_err(),
            IdentityError::Unauthorized
        ));
    }
}
