//! Envelope-encryption key layer: AES-256-GCM key wrapping with a
//! session-bound master key.
//!
//! Each goal record gets one data key at creation time. The data key is
//! wrapped under the session master key and stored alongside the record;
//! every field of that record is encrypted under the same data key. The
//! master key itself is derived (or injected) once per session and cached
//! for the vault's lifetime. Key material is zeroized on drop.

pub mod codec;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeyError;

/// Symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;
/// GCM nonce length.
pub const IV_LEN: usize = 12;
/// Argon2id salt length for session-derived master keys.
pub const SALT_LEN: usize = 32;

// ── Key material ────────────────────────────────────────────────────

/// The per-user master key. Used only to wrap and unwrap data keys,
/// never to encrypt content directly.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// A per-record data key. Generated fresh at record creation, never
/// regenerated for that record afterwards.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; KEY_LEN]);

impl DataKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// A data key encrypted under the master key, as persisted next to the
/// record it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

impl WrappedKey {
    /// Short non-sensitive fingerprint for audit logging. Derived from
    /// the wrap ciphertext, so it identifies the stored wrap without
    /// revealing anything about the key inside.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.ciphertext);
        hex::encode(&digest[..4])
    }
}

// ── Master-key sources ──────────────────────────────────────────────

/// The seam to the external authentication/session context. The vault
/// calls this at most once and caches the result.
pub trait MasterKeySource: Send + Sync {
    fn master_key(&self) -> Result<MasterKey, KeyError>;
}

/// Derives the master key from an authenticated session secret with
/// Argon2id and the owner's stored salt.
pub struct SessionKeySource {
    secret: Vec<u8>,
    salt: [u8; SALT_LEN],
}

impl SessionKeySource {
    pub fn new(secret: impl Into<Vec<u8>>, salt: [u8; SALT_LEN]) -> Self {
        Self {
            secret: secret.into(),
            salt,
        }
    }
}

impl MasterKeySource for SessionKeySource {
    fn master_key(&self) -> Result<MasterKey, KeyError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(&self.secret, &self.salt, &mut key)
            .map_err(|_| KeyError::Unavailable)?;
        Ok(MasterKey(key))
    }
}

impl Drop for SessionKeySource {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Fixed-key source for tests and embedders that manage their own
/// derivation.
pub struct StaticKeySource(MasterKey);

impl StaticKeySource {
    pub fn new(key: MasterKey) -> Self {
        Self(key)
    }
}

impl MasterKeySource for StaticKeySource {
    fn master_key(&self) -> Result<MasterKey, KeyError> {
        Ok(self.0.clone())
    }
}

/// The "no authenticated session" state. Every key request fails.
pub struct NoSession;

impl MasterKeySource for NoSession {
    fn master_key(&self) -> Result<MasterKey, KeyError> {
        Err(KeyError::Unavailable)
    }
}

// ── Vault ───────────────────────────────────────────────────────────

/// Wraps and unwraps per-record data keys under the session master key.
///
/// The master key is fetched from the source on first use and cached for
/// the vault's lifetime; it is read-only shared state after that, so the
/// vault can be shared across concurrent decrypts via `Arc`.
pub struct KeyVault {
    source: Box<dyn MasterKeySource>,
    cached: OnceLock<MasterKey>,
    unwraps: AtomicU64,
}

impl KeyVault {
    pub fn new(source: Box<dyn MasterKeySource>) -> Self {
        Self {
            source,
            cached: OnceLock::new(),
            unwraps: AtomicU64::new(0),
        }
    }

    /// The cached session master key, derived on first call.
    pub fn master_key(&self) -> Result<&MasterKey, KeyError> {
        if let Some(key) = self.cached.get() {
            return Ok(key);
        }
        let derived = self.source.master_key()?;
        // If two callers race the first derivation, the loser's copy is
        // dropped and zeroized.
        Ok(self.cached.get_or_init(|| derived))
    }

    /// Generate a fresh 256-bit data key from the OS CSPRNG.
    pub fn generate_data_key(&self) -> DataKey {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        DataKey(bytes)
    }

    /// Encrypt a data key under the master key with a fresh IV.
    pub fn wrap_data_key(&self, key: &DataKey) -> Result<WrappedKey, KeyError> {
        let master = self.master_key()?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(master.as_bytes()).expect("key length");
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), key.as_bytes().as_slice())
            .map_err(|_| KeyError::WrapFailure)?;

        Ok(WrappedKey { ciphertext, iv })
    }

    /// Decrypt a wrapped data key. Fails with `UnwrapFailure` on an
    /// authentication-tag mismatch or a malformed payload.
    pub fn unwrap_data_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyError> {
        let master = self.master_key()?;
        self.unwraps.fetch_add(1, Ordering::Relaxed);

        let cipher = Aes256Gcm::new_from_slice(master.as_bytes()).expect("key length");
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(&wrapped.iv), wrapped.ciphertext.as_slice())
            .map_err(|_| KeyError::UnwrapFailure)?;

        if plaintext.len() != KEY_LEN {
            plaintext.zeroize();
            return Err(KeyError::UnwrapFailure);
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(DataKey(bytes))
    }

    /// Total data-key unwraps performed by this vault. Audit counter:
    /// a correct load performs exactly one unwrap per record.
    pub fn unwrap_count(&self) -> u64 {
        self.unwraps.load(Ordering::Relaxed)
    }
}
