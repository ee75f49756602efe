//! The auth gateway.
//!
//! Guards every operator-facing operation: rate-limited credential
//! verification, session-token lifecycle with idle and absolute timeouts,
//! one-time onboarding, and the per-user derived key that unwraps persisted
//! credentials for the identity adapter.
//!
//! The derived key is the sensitive piece. It exists only inside the token
//! table, tied to a live session token, and is zeroized when the token dies.
//! It never appears in logs, API responses, or the store.

pub mod credentials;
pub mod derived;
pub mod gateway;
pub mod password;
pub mod rate_limit;
pub mod tokens;

use thiserror::Error;

pub use derived::DerivedKey;
pub use gateway::{AuthConfig, AuthGateway, AuthStatus};
pub use rate_limit::FixedWindowLimiter;
pub use tokens::{TokenConfig, TokenTable};

/// Result type for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised by the auth gateway
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong username, password, secret, or api key
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Too many attempts from this address in the current window
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Missing, unknown, or expired session token
    #[error("invalid or expired session token")]
    InvalidToken,

    /// Onboarding already happened; the admin secret is spent
    #[error("onboarding is closed")]
    OnboardingClosed,

    /// Onboarding requested but no admin secret is configured
    #[error("onboarding requires a configured admin secret")]
    OnboardingUnavailable,

    /// Password failed the strength policy
    #[error("weak password: {0}")]
    WeakPassword(String),

    /// A username is already taken
    #[error("user already exists")]
    UserExists,

    /// Password hashing failed
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// Credential blob could not be unwrapped
    #[error("credential unwrap failed")]
    CredentialUnwrap,

    /// The persistent store misbehaved
    #[error("store error: {0}")]
    Store(#[from] igloo_store::StoreError),
}
