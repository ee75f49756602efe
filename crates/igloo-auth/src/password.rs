//! Password hashing and strength policy.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

use crate::{AuthError, Result};

// Explicit Argon2id parameters so hashes stay auditable across upgrades.
const ARGON2_M_COST: u32 = 64 * 1024; // KiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 1;

fn argon2_instance() -> Result<Argon2<'static>> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, None)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with a fresh per-user salt; returns the PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2_instance()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify a password against a stored PHC string.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Enforce the onboarding password policy: at least 8 chars with upper,
/// lower, digit, and symbol.
pub fn check_password_policy(password: &str) -> Result<()> {
    let long_enough = password.chars().count() >= 8;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());

    let missing = [
        (long_enough, "at least 8 characters"),
        (has_upper, "an uppercase letter"),
        (has_lower, "a lowercase letter"),
        (has_digit, "a digit"),
        (has_symbol, "a symbol"),
    ]
    .iter()
    .find(|(ok, _)| !ok)
    .map(|(_, what)| *what);

    match missing {
        Some(what) => Err(AuthError::WeakPassword(format!("needs {}", what))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Correct-Horse-1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "Correct-Horse-1"));
        assert!(!verify_password(&hash, "wrong"));
        assert!(!verify_password("not a phc string", "anything"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("Correct-Horse-1").unwrap();
        let b = hash_password("Correct-Horse-1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn policy_requires_all_character_classes() {
        assert!(check_password_policy("Abcdef1!").is_ok());

        assert!(check_password_policy("Ab1!").is_err()); // short
        assert!(check_password_policy("abcdef1!").is_err()); // no upper
        assert!(check_password_policy("ABCDEF1!").is_err()); // no lower
        assert!(check_password_policy("Abcdefg!").is_err()); // no digit
        assert!(check_password_policy("Abcdefg1").is_err()); // no symbol
    }
}
