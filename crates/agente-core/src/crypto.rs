//! API key sealing - パスフレーズで API キーを暗号化して保存する
//!
//! # 形式
//! - 鍵導出: PBKDF2-HMAC-SHA256、100,000 回、16 バイトの salt
//! - 暗号化: AES-256-GCM、12 バイトの IV
//! - 保存形式: `{ encrypted, iv, salt }`（それぞれ base64）
//!
//! 復号の失敗（パスフレーズ違い・改ざん）は区別しません。

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

pub const PBKDF2_ROUNDS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;

/// A sealed API key, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedApiKey {
    /// Ciphertext with the GCM tag appended.
    pub encrypted: String,
    pub iv: String,
    pub salt: String,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64 in {field}: {source}")]
    Encoding {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("encryption failed")]
    Encrypt,

    #[error("wrong passphrase or corrupted data")]
    Decrypt,

    #[error("decrypted key is not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

fn cipher(passphrase: &str, salt: &[u8]) -> Aes256Gcm {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|source| CryptoError::Encoding { field, source })
}

/// Seal `plaintext` with a key derived from `passphrase`. Salt and IV are fresh per call.
pub fn encrypt_api_key(plaintext: &str, passphrase: &str) -> Result<EncryptedApiKey, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let encrypted = cipher(passphrase, &salt)
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(EncryptedApiKey {
        encrypted: STANDARD.encode(encrypted),
        iv: STANDARD.encode(iv),
        salt: STANDARD.encode(salt),
    })
}

pub fn decrypt_api_key(sealed: &EncryptedApiKey, passphrase: &str) -> Result<String, CryptoError> {
    let encrypted = decode("encrypted", &sealed.encrypted)?;
    let iv = decode("iv", &sealed.iv)?;
    let salt = decode("salt", &sealed.salt)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidLength {
            field: "iv",
            expected: IV_LEN,
            actual: iv.len(),
        });
    }

    let plaintext = cipher(passphrase, &salt)
        .decrypt(Nonce::from_slice(&iv), encrypted.as_slice())
        .map_err(|_| CryptoError::Decrypt)?;
    Ok(String::from_utf8(plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let sealed = encrypt_api_key("sk-test-123", "correct horse").unwrap();
        assert_eq!(STANDARD.decode(&sealed.iv).unwrap().len(), IV_LEN);
        assert_eq!(STANDARD.decode(&sealed.salt).unwrap().len(), SALT_LEN);
        assert_eq!(decrypt_api_key(&sealed, "correct horse").unwrap(), "sk-test-123");
    }

    #[test]
    fn every_seal_uses_fresh_salt_and_iv() {
        let a = encrypt_api_key("sk", "pw").unwrap();
        let b = encrypt_api_key("sk", "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.encrypted, b.encrypted);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = encrypt_api_key("sk-test-123", "right").unwrap();
        assert!(matches!(
            decrypt_api_key(&sealed, "wrong"),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let sealed = encrypt_api_key("sk-test-123", "pw").unwrap();
        let mut bytes = STANDARD.decode(&sealed.encrypted).unwrap();
        bytes[0] ^= 0x01;
        let tampered = EncryptedApiKey {
            encrypted: STANDARD.encode(bytes),
            ..sealed
        };
        assert!(matches!(
            decrypt_api_key(&tampered, "pw"),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn malformed_fields_are_rejected_before_decrypting() {
        let sealed = EncryptedApiKey {
            encrypted: "AAAA".into(),
            iv: "not base64!".into(),
            salt: "AAAA".into(),
        };
        assert!(matches!(
            decrypt_api_key(&sealed, "pw"),
            Err(CryptoError::Encoding { field: "iv", .. })
        ));

        let short_iv = EncryptedApiKey {
            iv: STANDARD.encode([0u8; 8]),
            ..sealed
        };
        assert!(matches!(
            decrypt_api_key(&short_iv, "pw"),
            Err(CryptoError::InvalidLength { field: "iv", actual: 8, .. })
        ));
    }

    #[test]
    fn stored_form_uses_plain_field_names() {
        let sealed = EncryptedApiKey {
            encrypted: "e".into(),
            iv: "i".into(),
            salt: "s".into(),
        };
        let json = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json, serde_json::json!({ "encrypted": "e", "iv": "i", "salt": "s" }));
    }
}
