//! Pluggable encryption at rest for refresh credentials.
//!
//! Every [`Crypt`] turns a secret byte blob into a tagged ciphertext and
//! back. The tag is persisted next to the payload so the right strategy
//! can be picked on load; unknown tags fail closed instead of being
//! treated as plaintext.

use thiserror::Error;

mod dummy;
mod hardware;
mod password;

pub use dummy::DummyCrypt;
pub use hardware::HardwareCrypt;
pub use password::PasswordCrypt;

/// Encryption strategy for secrets at rest.
///
/// Implementations derive all key material per call from their context
/// (password, machine secret) plus a random per-blob salt; nothing is
/// cached to disk and nothing outlives the call.
pub trait Crypt: Send + Sync {
    /// Stable identifier stored alongside every blob.
    fn tag(&self) -> &'static str;

    /// Whether this strategy offers no real protection and the caller
    /// should warn before using it.
    fn insecure(&self) -> bool {
        false
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError>;

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptError>;

    /// A replacement strategy new blobs should be written with, if this
    /// one is a legacy sub-version. `None` means no upgrade is due.
    fn upgrade(&self) -> Option<Box<dyn Crypt>> {
        None
    }
}

/// A ciphertext plus the tag of the [`Crypt`] that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedBlob {
    pub crypt_type: String,
    pub payload: Vec<u8>,
}

impl EncryptedBlob {
    #[must_use]
    pub fn new(crypt_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            crypt_type: crypt_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum CryptError {
    /// The stored tag names no registered strategy. Refuse to touch the
    /// payload rather than guess.
    #[error("unknown crypt type: {0}")]
    UnknownType(String),

    /// Wrong password, truncated blob, corrupted data or a machine-bound
    /// blob from another machine. Deliberately indistinguishable.
    #[error("unable to decrypt data")]
    Decrypt,

    #[error("unable to encrypt data: {0}")]
    Encrypt(String),

    /// The selected strategy needs a password and none was supplied.
    #[error("a password is required to decrypt this data")]
    MissingPassword,

    #[error("machine key store error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Whether the given tag names a strategy that requires a user password.
#[must_use]
pub fn needs_password(tag: &str) -> bool {
    tag == PasswordCrypt::TAG
}

/// Whether the given tag names a registered strategy at all.
#[must_use]
pub fn is_known_tag(tag: &str) -> bool {
    matches!(
        tag,
        DummyCrypt::TAG | PasswordCrypt::TAG | HardwareCrypt::TAG_V1 | HardwareCrypt::TAG_V2
    )
}

/// Creates the strategy named by `tag`.
///
/// `password` is consulted only for tags that need one; passing `None`
/// for such a tag yields [`CryptError::MissingPassword`]. Unknown tags
/// fail closed with [`CryptError::UnknownType`].
pub fn from_tag(tag: &str, password: Option<String>) -> Result<Box<dyn Crypt>, CryptError> {
    match tag {
        DummyCrypt::TAG => Ok(Box::new(DummyCrypt)),
        PasswordCrypt::TAG => {
            let password = password.ok_or(CryptError::MissingPassword)?;
            Ok(Box::new(PasswordCrypt::new(password)))
        }
        HardwareCrypt::TAG_V1 => Ok(Box::new(HardwareCrypt::v1()?)),
        HardwareCrypt::TAG_V2 => Ok(Box::new(HardwareCrypt::v2()?)),
        unknown => Err(CryptError::UnknownType(unknown.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_fails_closed() {
        let err = from_tag("rot13_v1", None).map(|_| ()).unwrap_err();
        assert!(matches!(err, CryptError::UnknownType(t) if t == "rot13_v1"));
    }

    #[test]
    fn password_tag_requires_password() {
        let err = from_tag(PasswordCrypt::TAG, None).map(|_| ()).unwrap_err();
        assert!(matches!(err, CryptError::MissingPassword));
    }

    #[test]
    fn known_tags() {
        assert!(is_known_tag("none_v1"));
        assert!(is_known_tag("password_v1"));
        assert!(is_known_tag("hardware_v1"));
        assert!(is_known_tag("hardware_v2"));
        assert!(!is_known_tag("none_v2"));
        assert!(needs_password("password_v1"));
        assert!(!needs_password("none_v1"));
    }
}
