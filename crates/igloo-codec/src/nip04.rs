//! NIP-04 payload encryption, the legacy fallback.
//!
//! <https://github.com/nostr-protocol/nips/blob/master/04.md>
//!
//! AES-256-CBC keyed directly with the ECDH shared x-coordinate; payload
//! format `base64(ciphertext) + "?iv=" + base64(iv)`. Inbound envelopes that
//! fail NIP-44 are retried through this path; the broker never produces it
//! on its own.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{CodecError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypt a plaintext under the shared secret.
pub fn encrypt(shared_x: &[u8; 32], plaintext: &str) -> Result<String> {
    let mut iv = [0u8; 16];
    getrandom::getrandom(&mut iv)
        .map_err(|e| CodecError::Nip04(format!("iv generation failed: {}", e)))?;

    let ciphertext = Aes256CbcEnc::new(shared_x.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!("{}?iv={}", BASE64.encode(ciphertext), BASE64.encode(iv)))
}

/// Decrypt a `<ciphertext>?iv=<iv>` payload under the shared secret.
pub fn decrypt(shared_x: &[u8; 32], payload: &str) -> Result<String> {
    let (cipher_b64, iv_b64) = payload
        .split_once("?iv=")
        .ok_or_else(|| CodecError::Nip04("missing ?iv= separator".into()))?;

    let ciphertext = BASE64
        .decode(cipher_b64)
        .map_err(|e| CodecError::Nip04(format!("ciphertext base64: {}", e)))?;
    let iv_bytes = BASE64
        .decode(iv_b64)
        .map_err(|e| CodecError::Nip04(format!("iv base64: {}", e)))?;
    let iv: [u8; 16] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CodecError::Nip04(format!("iv must be 16 bytes, got {}", iv_bytes.len())))?;

    let plaintext = Aes256CbcDec::new(shared_x.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CodecError::Nip04("bad padding or corrupt ciphertext".into()))?;

    String::from_utf8(plaintext).map_err(|e| CodecError::Nip04(format!("utf8: {}", e)))
}
