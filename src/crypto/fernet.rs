//! Fernet-compatible credential envelope
//!
//! Token layout (base64url, no padding):
//!
//! ```text
//! [0x80][timestamp: u64 BE][iv: 16][ciphertext: AES-128-CBC, PKCS#7][tag: HMAC-SHA256, 32]
//! ```
//!
//! Unlike classic Fernet, the signing and encryption keys are not halves of the
//! master key. Both are derived from it with HKDF-SHA256 (empty salt) under
//! distinct info strings, so the two primitives never share key material.

use aes::Aes128;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::Utc;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Envelope format version byte
pub const VERSION: u8 = 0x80;

/// HKDF info for the HMAC subkey
const SIGNING_INFO: &[u8] = b"hono-auth-signing-key";
/// HKDF info for the AES subkey
const ENCRYPTION_INFO: &[u8] = b"hono-auth-encryption-key";

const SUBKEY_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

const IV_OFFSET: usize = 1 + TIMESTAMP_LEN;
const CIPHERTEXT_OFFSET: usize = IV_OFFSET + IV_LEN;
/// Smallest well-formed token: header, one ciphertext block, tag
const MIN_TOKEN_LEN: usize = CIPHERTEXT_OFFSET + BLOCK_LEN + TAG_LEN;

/// Errors produced by the credential cipher
///
/// Decryption failures are deliberately a single variant with a fixed message:
/// callers cannot tell a forged token from a truncated one.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The master key could not be decoded or expanded
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    /// Authentication tag mismatch or malformed token
    #[error("Token is invalid or has been tampered with")]
    TamperOrFormat,
}

/// Why a token was rejected. Only ever logged, never returned.
#[derive(Debug, Clone, Copy)]
enum Rejection {
    Base64,
    Length,
    Tag,
    Version,
    Padding,
    Utf8,
}

fn reject(reason: Rejection) -> CipherError {
    tracing::debug!(?reason, "Credential token rejected");
    CipherError::TamperOrFormat
}

/// Credential cipher with pre-derived subkeys
///
/// Construct once from the configured master key and share behind an `Arc`.
#[derive(Clone)]
pub struct FernetCipher {
    signing_key: [u8; SUBKEY_LEN],
    encryption_key: [u8; SUBKEY_LEN],
}

impl std::fmt::Debug for FernetCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FernetCipher").finish_non_exhaustive()
    }
}

impl FernetCipher {
    /// Build a cipher from a url-safe base64 master key (padding optional)
    pub fn new(master_key: &str) -> Result<Self, CipherError> {
        let key_bytes = decode_b64(master_key)
            .map_err(|e| CipherError::InvalidKey(format!("not url-safe base64: {e}")))?;
        if key_bytes.is_empty() {
            return Err(CipherError::InvalidKey("key is empty".to_string()));
        }
        Self::from_bytes(&key_bytes)
    }

    /// Build a cipher from raw master key bytes
    pub fn from_bytes(master_key: &[u8]) -> Result<Self, CipherError> {
        let hk = Hkdf::<Sha256>::new(Some(&[][..]), master_key);

        let mut signing_key = [0u8; SUBKEY_LEN];
        hk.expand(SIGNING_INFO, &mut signing_key)
            .map_err(|e| CipherError::InvalidKey(format!("HKDF expand failed: {e}")))?;

        let mut encryption_key = [0u8; SUBKEY_LEN];
        hk.expand(ENCRYPTION_INFO, &mut encryption_key)
            .map_err(|e| CipherError::InvalidKey(format!("HKDF expand failed: {e}")))?;

        Ok(Self {
            signing_key,
            encryption_key,
        })
    }

    /// Seal `plaintext` into a new token with a fresh random IV
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let timestamp = Utc::now().timestamp().max(0) as u64;
        self.encrypt_with(plaintext.as_bytes(), timestamp, iv)
    }

    fn encrypt_with(
        &self,
        plaintext: &[u8],
        timestamp: u64,
        iv: [u8; IV_LEN],
    ) -> Result<String, CipherError> {
        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(CIPHERTEXT_OFFSET + ciphertext.len() + TAG_LEN);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let tag = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&tag);

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Open a token and return its plaintext
    ///
    /// The tag is verified in constant time before any decryption is attempted.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let bytes = self.verified_bytes(token)?;

        let iv = &bytes[IV_OFFSET..CIPHERTEXT_OFFSET];
        let ciphertext = &bytes[CIPHERTEXT_OFFSET..bytes.len() - TAG_LEN];

        let plaintext = Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|_| reject(Rejection::Length))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| reject(Rejection::Padding))?;

        String::from_utf8(plaintext).map_err(|_| reject(Rejection::Utf8))
    }

    /// Unix timestamp recorded in an authentic token
    pub fn issued_at(&self, token: &str) -> Result<u64, CipherError> {
        let bytes = self.verified_bytes(token)?;
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&bytes[1..IV_OFFSET]);
        Ok(u64::from_be_bytes(ts))
    }

    /// Decode and authenticate a token, returning its raw bytes
    fn verified_bytes(&self, token: &str) -> Result<Vec<u8>, CipherError> {
        let bytes = decode_b64(token).map_err(|_| reject(Rejection::Base64))?;

        if bytes.len() < MIN_TOKEN_LEN || (bytes.len() - CIPHERTEXT_OFFSET - TAG_LEN) % BLOCK_LEN != 0
        {
            return Err(reject(Rejection::Length));
        }

        let (signed, tag) = bytes.split_at(bytes.len() - TAG_LEN);
        self.mac(signed)?
            .verify_slice(tag)
            .map_err(|_| reject(Rejection::Tag))?;

        if bytes[0] != VERSION {
            return Err(reject(Rejection::Version));
        }

        Ok(bytes)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256, CipherError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| CipherError::InvalidKey(format!("HMAC init failed: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

/// Encrypt `plaintext` under `master_key` (url-safe base64)
pub fn encrypt(master_key: &str, plaintext: &str) -> Result<String, CipherError> {
    FernetCipher::new(master_key)?.encrypt(plaintext)
}

/// Decrypt `token` under `master_key` (url-safe base64)
pub fn decrypt(master_key: &str, token: &str) -> Result<String, CipherError> {
    FernetCipher::new(master_key)?.decrypt(token)
}

/// Url-safe base64 decode that tolerates trailing `=` padding
fn decode_b64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(input.trim().trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        URL_SAFE_NO_PAD.encode([0x42u8; 32])
    }

    fn test_cipher() -> FernetCipher {
        FernetCipher::new(&test_key()).unwrap()
    }

    fn raw(token: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(token).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let token = cipher.encrypt("discord-access-token").unwrap();
        assert_eq!(cipher.decrypt(&token).unwrap(), "discord-access-token");
    }

    #[test]
    fn test_abc123_layout() {
        let key = test_key();
        let token = encrypt(&key, "abc123").unwrap();
        let bytes = raw(&token);

        // 1 version + 8 timestamp + 16 iv + 16 (one padded block) + 32 tag
        assert_eq!(bytes.len(), 73);
        assert_eq!(bytes[0], VERSION);
        assert!(!token.contains('='));
        assert_eq!(decrypt(&key, &token).unwrap(), "abc123");

        let mut tampered = bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(tampered);
        assert!(matches!(
            decrypt(&key, &tampered),
            Err(CipherError::TamperOrFormat)
        ));
    }

    #[test]
    fn test_full_block_plaintext_gets_extra_padding_block() {
        let cipher = test_cipher();
        let token = cipher.encrypt("0123456789abcdef").unwrap();
        assert_eq!(raw(&token).len(), CIPHERTEXT_OFFSET + 32 + TAG_LEN);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = test_cipher();
        let token = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&token).unwrap(), "");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = test_cipher();
        let a = raw(&cipher.encrypt("same").unwrap());
        let b = raw(&cipher.encrypt("same").unwrap());
        assert_ne!(a[IV_OFFSET..CIPHERTEXT_OFFSET], b[IV_OFFSET..CIPHERTEXT_OFFSET]);
    }

    #[test]
    fn test_deterministic_with_fixed_iv_and_timestamp() {
        let cipher = test_cipher();
        let a = cipher.encrypt_with(b"abc123", 1_700_000_000, [7u8; 16]).unwrap();
        let b = cipher.encrypt_with(b"abc123", 1_700_000_000, [7u8; 16]).unwrap();
        assert_eq!(a, b);
        assert_eq!(cipher.issued_at(&a).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = test_cipher().encrypt("secret").unwrap();
        let other = FernetCipher::new(&URL_SAFE_NO_PAD.encode([0x43u8; 32])).unwrap();
        assert!(matches!(other.decrypt(&token), Err(CipherError::TamperOrFormat)));
    }

    #[test]
    fn test_subkeys_are_independent() {
        let cipher = test_cipher();
        assert_ne!(cipher.signing_key, cipher.encryption_key);
    }

    #[test]
    fn test_padded_key_and_token_accepted() {
        let padded_key = base64::engine::general_purpose::URL_SAFE.encode([0x42u8; 32]);
        assert!(padded_key.ends_with('='));
        let cipher = FernetCipher::new(&padded_key).unwrap();
        let token = cipher.encrypt("abc").unwrap();
        let padded_token = base64::engine::general_purpose::URL_SAFE.encode(raw(&token));
        assert_eq!(cipher.decrypt(&padded_token).unwrap(), "abc");
        assert_eq!(test_cipher().decrypt(&token).unwrap(), "abc");
    }

    #[test]
    fn test_malformed_inputs_collapse_to_one_error() {
        let cipher = test_cipher();
        let valid = raw(&cipher.encrypt("abc123").unwrap());

        let mut wrong_version = valid.clone();
        wrong_version[0] = 0x81;

        let cases = vec![
            "not base64 !!!".to_string(),
            String::new(),
            URL_SAFE_NO_PAD.encode(&valid[..40]),
            URL_SAFE_NO_PAD.encode(&valid[..valid.len() - 1]),
            URL_SAFE_NO_PAD.encode(wrong_version),
        ];

        for case in cases {
            let err = cipher.decrypt(&case).unwrap_err();
            assert!(matches!(err, CipherError::TamperOrFormat));
            assert_eq!(err.to_string(), "Token is invalid or has been tampered with");
        }
    }

    #[test]
    fn test_version_checked_only_after_tag() {
        // A correctly signed token with a foreign version byte is still rejected
        let cipher = test_cipher();
        let mut body = raw(&cipher.encrypt("abc").unwrap());
        body.truncate(body.len() - TAG_LEN);
        body[0] = 0x81;
        let tag = cipher.mac(&body).unwrap().finalize().into_bytes();
        body.extend_from_slice(&tag);
        let token = URL_SAFE_NO_PAD.encode(body);
        assert!(matches!(cipher.decrypt(&token), Err(CipherError::TamperOrFormat)));
    }

    #[test]
    fn test_invalid_master_key() {
        assert!(matches!(FernetCipher::new("***"), Err(CipherError::InvalidKey(_))));
        assert!(matches!(FernetCipher::new(""), Err(CipherError::InvalidKey(_))));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn roundtrip_any_plaintext(plaintext in ".{0,200}") {
                let cipher = test_cipher();
                let token = cipher.encrypt(&plaintext).unwrap();
                prop_assert_eq!(cipher.decrypt(&token).unwrap(), plaintext);
            }

            #[test]
            fn token_length_follows_padding(plaintext in "[a-zA-Z0-9]{0,80}") {
                let token = test_cipher().encrypt(&plaintext).unwrap();
                let padded = (plaintext.len() / BLOCK_LEN + 1) * BLOCK_LEN;
                prop_assert_eq!(raw(&token).len(), CIPHERTEXT_OFFSET + padded + TAG_LEN);
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn every_single_bit_flip_is_detected(plaintext in "[ -~]{0,40}") {
                let cipher = test_cipher();
                let bytes = raw(&cipher.encrypt(&plaintext).unwrap());

                for bit in 0..bytes.len() * 8 {
                    let mut flipped = bytes.clone();
                    flipped[bit / 8] ^= 1 << (bit % 8);
                    let token = URL_SAFE_NO_PAD.encode(&flipped);
                    prop_assert!(matches!(
                        cipher.decrypt(&token),
                        Err(CipherError::TamperOrFormat)
                    ));
                }
            }
        }
    }
}
