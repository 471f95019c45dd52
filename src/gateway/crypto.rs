//! Decryption of encrypted event callbacks.
//!
//! When an encrypt key is configured, the platform posts `{"encrypt": "<base64>"}`.
//! The decoded bytes are a 16-byte IV followed by AES-256-CBC ciphertext
//! (PKCS#7 padded), keyed with SHA-256 of the encrypt key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload too short ({0} bytes)")]
    TooShort(usize),
    #[error("ciphertext could not be decrypted")]
    Cipher,
    #[error("plaintext is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Clone)]
pub struct EventCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for EventCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCipher").finish_non_exhaustive()
    }
}

impl EventCipher {
    pub fn new(encrypt_key: &str) -> Self {
        Self {
            key: Sha256::digest(encrypt_key.as_bytes()).into(),
        }
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, DecryptError> {
        let raw = STANDARD.decode(encrypted.trim())?;
        if raw.len() <= IV_LEN {
            return Err(DecryptError::TooShort(raw.len()));
        }
        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| DecryptError::Cipher)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| DecryptError::Cipher)?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// Produce an envelope `decrypt` accepts. Used to sign test fixtures and by tooling
    /// that replays captured events.
    pub fn encrypt_with_iv(&self, plaintext: &str, iv: [u8; IV_LEN]) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        let mut raw = Vec::with_capacity(IV_LEN + ciphertext.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);
        STANDARD.encode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_recovers_event() {
        let cipher = EventCipher::new("test key");
        let event = r#"{"type":"url_verification","challenge":"abc"}"#;
        let envelope = cipher.encrypt_with_iv(event, [7u8; 16]);
        assert_eq!(cipher.decrypt(&envelope).unwrap(), event);
    }

    #[test]
    fn key_is_sha256_of_encrypt_key() {
        let cipher = EventCipher::new("test key");
        let expected: [u8; 32] = Sha256::digest(b"test key").into();
        assert_eq!(cipher.key, expected);
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = EventCipher::new("right").encrypt_with_iv("{\"a\":1}", [1u8; 16]);
        let result = EventCipher::new("wrong").decrypt(&envelope);
        // A wrong key almost always breaks the padding; if it happens not to,
        // the plaintext is garbage rather than the original.
        match result {
            Ok(plain) => assert_ne!(plain, "{\"a\":1}"),
            Err(e) => assert!(matches!(e, DecryptError::Cipher | DecryptError::Utf8(_))),
        }
    }

    #[test]
    fn malformed_input_is_rejected() {
        let cipher = EventCipher::new("k");
        assert!(matches!(cipher.decrypt("not base64!!"), Err(DecryptError::Base64(_))));
        assert!(matches!(
            cipher.decrypt(&STANDARD.encode([0u8; 8])),
            Err(DecryptError::TooShort(8))
        ));
        assert!(matches!(
            cipher.decrypt(&STANDARD.encode([0u8; 20])),
            Err(DecryptError::Cipher)
        ));
    }
}
