use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use super::{Crypt, CryptError};

/// Argon2id parameters for key derivation.
/// Tuned so one interactive login stays well below a second while
/// remaining expensive for offline brute force.
const ARGON2_M_COST: u32 = 65536; // 64 MB memory
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Encryption with a user-supplied password.
///
/// Blob layout: `salt (16) || nonce (12) || AES-256-GCM ciphertext`.
/// The salt is random per blob and never reused; the key is derived
/// fresh on every call and dropped afterwards.
pub struct PasswordCrypt {
    password: String,
}

impl PasswordCrypt {
    pub const TAG: &'static str = "password_v1";

    #[must_use]
    pub fn new(password: impl Into<String>) -> Self {
        let password = password.into();
        relog_core::print::redact(&password);
        Self { password }
    }
}

impl Crypt for PasswordCrypt {
    fn tag(&self) -> &'static str {
        Self::TAG
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        seal(self.password.as_bytes(), &salt, plaintext)
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptError> {
        open_sealed(self.password.as_bytes(), payload)
    }
}

impl std::fmt::Debug for PasswordCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCrypt")
            .field("password", &"[PASSWORD]")
            .finish()
    }
}

/// Derives a 256-bit AES key from `secret` and `salt` using Argon2id.
pub(super) fn derive_key(
    secret: &[u8],
    salt: &[u8],
    params: Params,
) -> Result<[u8; 32], CryptError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| CryptError::Encrypt(e.to_string()))?;
    Ok(key)
}

pub(super) fn standard_params() -> Params {
    // Params::new only fails on out-of-range values; these are fixed.
    Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32)).unwrap_or_default()
}

/// Encrypts `plaintext` with a key derived from `secret` and `salt`.
/// Output carries the salt and nonce in front of the ciphertext.
pub(super) fn seal(secret: &[u8], salt: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
    seal_with_params(secret, salt, plaintext, standard_params())
}

pub(super) fn seal_with_params(
    secret: &[u8],
    salt: &[u8],
    plaintext: &[u8],
    params: Params,
) -> Result<Vec<u8>, CryptError> {
    let key = derive_key(secret, salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptError::Encrypt(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptError::Encrypt(e.to_string()))?;

    let mut out = Vec::with_capacity(salt.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal`]. Every failure (short blob, bad tag, wrong key)
/// collapses into [`CryptError::Decrypt`] so the error gives no oracle
/// for distinguishing a wrong password from corrupted data.
pub(super) fn open_sealed(secret: &[u8], payload: &[u8]) -> Result<Vec<u8>, CryptError> {
    open_sealed_with_params(secret, payload, standard_params())
}

pub(super) fn open_sealed_with_params(
    secret: &[u8],
    payload: &[u8],
    params: Params,
) -> Result<Vec<u8>, CryptError> {
    if payload.len() < SALT_LEN + NONCE_LEN {
        return Err(CryptError::Decrypt);
    }
    let (salt, rest) = payload.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(secret, salt, params).map_err(|_| CryptError::Decrypt)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptError::Decrypt)
}
