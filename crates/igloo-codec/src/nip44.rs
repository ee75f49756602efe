//! NIP-44 (v2) payload encryption.
//!
//! <https://github.com/nostr-protocol/nips/blob/master/44.md>
//!
//! Payload layout after base64 decoding: `version || nonce(32) ||
//! ciphertext || hmac(32)`. Message keys come from HKDF-expand over the
//! conversation key; the plaintext is length-prefixed and padded to the
//! power-of-two-ish schedule the NIP defines before ChaCha20.

use std::ops::Range;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CodecError, Result};

const VERSION: u8 = 2;
const MESSAGE_KEYS_SIZE: usize = 76;
const CHACHA_KEY_RANGE: Range<usize> = 0..32;
const CHACHA_NONCE_RANGE: Range<usize> = 32..44;
const HMAC_KEY_RANGE: Range<usize> = 44..MESSAGE_KEYS_SIZE;

const MIN_PLAINTEXT_SIZE: usize = 1;
const MAX_PLAINTEXT_SIZE: usize = 65535;

/// Symmetric key shared by two transport endpoints.
#[derive(Clone)]
pub struct ConversationKey(Zeroizing<[u8; 32]>);

impl ConversationKey {
    /// Derive from an ECDH shared x-coordinate, per the NIP: HKDF-extract
    /// with salt `"nip44-v2"`; the PRK is the conversation key.
    pub fn from_shared_secret(shared_x: &[u8; 32]) -> Self {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(b"nip44-v2"), shared_x);
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&prk);
        Self(key)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(<sensitive>)")
    }
}

struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

impl MessageKeys {
    fn derive(conversation_key: &ConversationKey, nonce: &[u8; 32]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::from_prk(conversation_key.as_bytes())
            .map_err(|_| CodecError::Nip44("conversation key is not a valid PRK".into()))?;

        let mut okm = [0u8; MESSAGE_KEYS_SIZE];
        hk.expand(nonce, &mut okm)
            .map_err(|_| CodecError::Nip44("hkdf expand failed".into()))?;

        let mut keys = MessageKeys {
            chacha_key: [0u8; 32],
            chacha_nonce: [0u8; 12],
            hmac_key: [0u8; 32],
        };
        keys.chacha_key.copy_from_slice(&okm[CHACHA_KEY_RANGE]);
        keys.chacha_nonce.copy_from_slice(&okm[CHACHA_NONCE_RANGE]);
        keys.hmac_key.copy_from_slice(&okm[HMAC_KEY_RANGE]);
        Ok(keys)
    }
}

fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = 1usize << ((unpadded_len - 1).ilog2() + 1);
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((unpadded_len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>> {
    let len = plaintext.len();
    if len < MIN_PLAINTEXT_SIZE {
        return Err(CodecError::Nip44("message empty".into()));
    }
    if len > MAX_PLAINTEXT_SIZE {
        return Err(CodecError::Nip44("message too long".into()));
    }

    let padded_len = calc_padded_len(len);
    let mut padded = Vec::with_capacity(2 + padded_len);
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(plaintext);
    padded.resize(2 + padded_len, 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < 2 {
        return Err(CodecError::Nip44("invalid padding".into()));
    }
    let unpadded_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if unpadded_len == 0 {
        return Err(CodecError::Nip44("message empty".into()));
    }
    if padded.len() != 2 + calc_padded_len(unpadded_len) {
        return Err(CodecError::Nip44("invalid padding".into()));
    }
    Ok(padded[2..2 + unpadded_len].to_vec())
}

/// Encrypt a plaintext; returns the base64 payload.
pub fn encrypt(conversation_key: &ConversationKey, plaintext: &str) -> Result<String> {
    let mut nonce = [0u8; 32];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| CodecError::Nip44(format!("nonce generation failed: {}", e)))?;
    encrypt_with_nonce(conversation_key, plaintext.as_bytes(), &nonce)
}

fn encrypt_with_nonce(
    conversation_key: &ConversationKey,
    plaintext: &[u8],
    nonce: &[u8; 32],
) -> Result<String> {
    let keys = MessageKeys::derive(conversation_key, nonce)?;

    let mut ciphertext = pad(plaintext)?;
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut ciphertext);

    let mut mac = Hmac::<Sha256>::new_from_slice(&keys.hmac_key)
        .map_err(|_| CodecError::Nip44("hmac key rejected".into()))?;
    mac.update(nonce);
    mac.update(&ciphertext);
    let mac_bytes = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + 32 + ciphertext.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac_bytes);

    Ok(BASE64.encode(payload))
}

/// Decrypt a base64 payload back to the plaintext string.
pub fn decrypt(conversation_key: &ConversationKey, payload: &str) -> Result<String> {
    // '#' marks a version this implementation does not speak.
    if payload.starts_with('#') {
        return Err(CodecError::Nip44("unsupported future version".into()));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| CodecError::Nip44(format!("base64: {}", e)))?;

    let len = data.len();
    if !(99..=65603).contains(&len) {
        return Err(CodecError::Nip44(format!("invalid payload length {}", len)));
    }
    if data[0] != VERSION {
        return Err(CodecError::Nip44(format!("unknown version {}", data[0])));
    }

    let nonce: [u8; 32] = data[1..33]
        .try_into()
        .map_err(|_| CodecError::Nip44("nonce slice".into()))?;
    let ciphertext = &data[33..len - 32];
    let mac_bytes = &data[len - 32..];

    let keys = MessageKeys::derive(conversation_key, &nonce)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&keys.hmac_key)
        .map_err(|_| CodecError::Nip44("hmac key rejected".into()))?;
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(mac_bytes)
        .map_err(|_| CodecError::Nip44("invalid hmac".into()))?;

    let mut padded = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut padded);

    let plaintext = unpad(&padded)?;
    String::from_utf8(plaintext).map_err(|e| CodecError::Nip44(format!("utf8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::from_shared_secret(&[7u8; 32])
    }

    #[test]
    fn padding_schedule_matches_the_nip() {
        assert_eq!(calc_padded_len(1), 32);
        assert_eq!(calc_padded_len(32), 32);
        assert_eq!(calc_padded_len(33), 64);
        assert_eq!(calc_padded_len(64), 64);
        assert_eq!(calc_padded_len(65), 96);
        assert_eq!(calc_padded_len(256), 256);
        assert_eq!(calc_padded_len(257), 320);
    }

    #[test]
    fn round_trip() {
        let messages = ["x", "hello world", &"long".repeat(500)];
        for message in messages {
            let sealed = encrypt(&key(), message).unwrap();
            assert_eq!(decrypt(&key(), &sealed).unwrap(), message);
        }
    }

    #[test]
    fn tampered_payload_fails_hmac() {
        let sealed = encrypt(&key(), "payload").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(decrypt(&key(), &tampered).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(&key(), "payload").unwrap();
        let other = ConversationKey::from_shared_secret(&[8u8; 32]);
        assert!(decrypt(&other, &sealed).is_err());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(encrypt(&key(), "").is_err());
        let huge = "a".repeat(65536);
        assert!(encrypt(&key(), &huge).is_err());
    }

    #[test]
    fn rejects_future_version_flag() {
        assert!(decrypt(&key(), "#v3-something").is_err());
    }
}
