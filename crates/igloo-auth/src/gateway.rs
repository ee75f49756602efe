//! The auth gateway: every credential check funnels through here.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use igloo_core::time::unix_now;
use igloo_store::{BlobStore, Table};

use crate::derived::DerivedKey;
use crate::password::{check_password_policy, hash_password, verify_password};
use crate::rate_limit::FixedWindowLimiter;
use crate::tokens::{TokenConfig, TokenTable};
use crate::{AuthError, Result};

/// Pseudo user id under which a configured api key authenticates.
pub const API_KEY_USER: &str = "api-key";

/// Gateway configuration, resolved from the environment by the binary.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Username+password login enabled.
    pub password_auth: bool,
    /// Bearer api-key accepted when set.
    pub api_key: Option<String>,
    /// One-time onboarding secret; consumed by the first admin signup.
    pub admin_secret: Option<String>,
    pub rate_window: Duration,
    pub rate_max_attempts: u32,
    pub tokens: TokenConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password_auth: true,
            api_key: None,
            admin_secret: None,
            rate_window: crate::rate_limit::DEFAULT_WINDOW,
            rate_max_attempts: crate::rate_limit::DEFAULT_MAX_ATTEMPTS,
            tokens: TokenConfig::default(),
        }
    }
}

/// What `GET /api/auth/status` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub password_auth: bool,
    pub api_key_auth: bool,
    pub onboarding_open: bool,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_attempts: u32,
    pub session_idle_timeout_secs: u64,
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user_id: String,
}

#[derive(Serialize, Deserialize)]
struct UserRecord {
    id: String,
    username: String,
    password_hash: String,
    created_at: u64,
}

/// The gateway.
pub struct AuthGateway {
    config: AuthConfig,
    store: BlobStore,
    limiter: FixedWindowLimiter,
    tokens: TokenTable,
}

impl AuthGateway {
    pub fn new(config: AuthConfig, store: BlobStore) -> Self {
        let limiter = FixedWindowLimiter::new(config.rate_window, config.rate_max_attempts);
        let tokens = TokenTable::new(config.tokens, Some(store.clone()));
        Self {
            config,
            store,
            limiter,
            tokens,
        }
    }

    /// Restore persisted auth sessions.
    pub async fn load(&self) {
        self.tokens.load(unix_now()).await;
    }

    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    pub async fn status(&self) -> AuthStatus {
        AuthStatus {
            password_auth: self.config.password_auth,
            api_key_auth: self.config.api_key.is_some(),
            onboarding_open: self.needs_onboarding().await,
            rate_limit_window_secs: self.limiter.window().as_secs(),
            rate_limit_max_attempts: self.limiter.max_attempts(),
            session_idle_timeout_secs: self.config.tokens.idle_timeout.as_secs(),
        }
    }

    /// True until the first admin exists.
    pub async fn needs_onboarding(&self) -> bool {
        match self.store.list(Table::Users).await {
            Ok(rows) => rows.is_empty(),
            Err(e) => {
                warn!(error = %e, "cannot inspect users table");
                false
            }
        }
    }

    /// One-time creation of the first admin, gated by the environment
    /// admin secret. The secret stops being accepted the moment a user
    /// exists.
    pub async fn onboard(
        &self,
        presented_secret: &str,
        username: &str,
        password: &str,
        addr: IpAddr,
        now: u64,
    ) -> Result<LoginOutcome> {
        self.check_rate(addr, now)?;

        let Some(expected) = &self.config.admin_secret else {
            return Err(AuthError::OnboardingUnavailable);
        };
        if !self.needs_onboarding().await {
            return Err(AuthError::OnboardingClosed);
        }
        if !constant_time_eq(expected, presented_secret) {
            return Err(AuthError::InvalidCredentials);
        }

        check_password_policy(password)?;

        let username = normalize_username(username);
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            username: username.clone(),
            password_hash: hash_password(password)?,
            created_at: now,
        };
        let encoded =
            serde_json::to_vec(&record).map_err(|e| AuthError::Hashing(e.to_string()))?;
        self.store.put(Table::Users, username.clone(), encoded).await?;

        info!(user = %username, "first admin onboarded, admin secret consumed");

        let derived = DerivedKey::derive(&username, password);
        let token = self.tokens.issue(&record.id, Some(derived), now);
        Ok(LoginOutcome {
            token,
            user_id: record.id,
        })
    }

    /// Exchange credentials for a session token.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        addr: IpAddr,
        now: u64,
    ) -> Result<LoginOutcome> {
        if !self.config.password_auth {
            return Err(AuthError::InvalidCredentials);
        }
        self.check_rate(addr, now)?;

        let username = normalize_username(username);
        let record = self
            .store
            .get(Table::Users, username.clone())
            .await?
            .and_then(|bytes| serde_json::from_slice::<UserRecord>(&bytes).ok());

        let Some(record) = record else {
            // Burn comparable time so unknown users are not distinguishable
            // by response latency.
            let _ = verify_password(DUMMY_HASH, password);
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(&record.password_hash, password) {
            return Err(AuthError::InvalidCredentials);
        }

        let derived = DerivedKey::derive(&username, password);
        let token = self.tokens.issue(&record.id, Some(derived), now);
        info!(user = %username, "login succeeded");
        Ok(LoginOutcome {
            token,
            user_id: record.id,
        })
    }

    /// Check a bearer value at a request boundary: a session token, or the
    /// configured api key.
    pub fn authenticate(&self, bearer: &str, now: u64) -> Result<String> {
        match self.tokens.authenticate(bearer, now) {
            Ok(user_id) => Ok(user_id),
            Err(_) => {
                if let Some(api_key) = &self.config.api_key {
                    if constant_time_eq(api_key, bearer) {
                        return Ok(API_KEY_USER.to_string());
                    }
                }
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// The derived key bound to a live session token.
    pub fn derived_key(&self, token: &str, now: u64) -> Result<DerivedKey> {
        self.tokens.derived_key(token, now)
    }

    /// Delete the token server-side; its derived key is zeroized with it.
    pub fn logout(&self, token: &str) -> bool {
        self.tokens.revoke(token)
    }

    /// Periodically reap expired tokens and stale rate windows.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = unix_now();
                let reaped = gateway.tokens.reap(now);
                gateway.limiter.prune(now);
                if reaped > 0 {
                    info!(reaped, "expired auth sessions removed");
                }
            }
        });
    }

    fn check_rate(&self, addr: IpAddr, now: u64) -> Result<()> {
        self.limiter
            .try_acquire(addr, now)
            .map_err(|retry_after_secs| AuthError::RateLimited { retry_after_secs })
    }
}

// A real PHC string (for "placeholder") used to equalize verification work
// on unknown-user logins.
const DUMMY_HASH: &str = "$argon2id$v=19$m=65536,t=3,p=1$c29tZXNhbHRzb21lc2FsdA$v/Q7wIh+EQyBHpw7a5jFHiRkYyV1HdLybIzIBzMCRWo";

fn normalize_username(username: &str) -> String {
    username.trim().to_ascii_lowercase()
}

fn constant_time_eq(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
