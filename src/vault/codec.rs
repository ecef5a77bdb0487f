//! Per-field authenticated encryption.
//!
//! Exactly one (ciphertext, IV) pair per logical field, encrypted under
//! the record's data key. A fresh IV is generated on every call,
//! including re-encryption of an edited field: reusing an IV under the
//! same key is a correctness violation.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use super::{DataKey, IV_LEN};
use crate::error::CodecError;

/// One encrypted logical field (title, description, progress payload,
/// tips payload), exactly as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Encrypt one field under the record's data key with a fresh IV.
pub fn encrypt(plaintext: &str, key: &DataKey) -> Result<EncryptedField, CodecError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length");
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CodecError::EncryptFailure)?;

    Ok(EncryptedField { ciphertext, iv })
}

/// Decrypt one field. Fails with `DecryptFailure` on an
/// authentication-tag mismatch (wrong key, corrupted ciphertext, or
/// tampering); an absent field is represented by `Option` at the row
/// level and never reaches this function.
pub fn decrypt(field: &EncryptedField, key: &DataKey) -> Result<String, CodecError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length");
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(&field.iv), field.ciphertext.as_slice())
        .map_err(|_| CodecError::DecryptFailure)?;

    match String::from_utf8(plaintext.clone()) {
        Ok(text) => {
            plaintext.zeroize();
            Ok(text)
        }
        Err(_) => {
            plaintext.zeroize();
            Err(CodecError::DecryptFailure)
        }
    }
}
