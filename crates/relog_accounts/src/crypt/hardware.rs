use aes_gcm::aead::OsRng;
use argon2::Params;
use base64::{prelude::BASE64_STANDARD, Engine};
use keyring::Entry;
use rand::RngCore;

use super::{
    password::{open_sealed_with_params, seal_with_params, standard_params},
    Crypt, CryptError,
};

const KEYRING_SERVICE: &str = "relog";
const KEYRING_USER: &str = "machine-key";

const SALT_LEN: usize = 16;

/// Key-derivation strength of a machine-bound blob.
///
/// V1 blobs were written with lighter Argon2 parameters; they still
/// decrypt, but [`Crypt::upgrade`] steers new writes to V2.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HwVersion {
    V1,
    V2,
}

impl HwVersion {
    fn params(self) -> Params {
        match self {
            // Original parameters, kept only to read old blobs.
            Self::V1 => Params::new(19456, 2, 1, Some(32)).unwrap_or_default(),
            Self::V2 => standard_params(),
        }
    }
}

/// Encryption bound to the local machine.
///
/// The key material is a random 32-byte secret held in the OS keyring
/// under `relog/machine-key`, created on first use. Blobs written here
/// cannot be decrypted on another machine, so a copied store file is
/// useless without the keyring entry. Blob layout matches
/// [`PasswordCrypt`](super::PasswordCrypt).
pub struct HardwareCrypt {
    secret: Vec<u8>,
    version: HwVersion,
}

impl HardwareCrypt {
    pub const TAG_V1: &'static str = "hardware_v1";
    pub const TAG_V2: &'static str = "hardware_v2";

    pub fn v1() -> Result<Self, CryptError> {
        Ok(Self {
            secret: machine_secret()?,
            version: HwVersion::V1,
        })
    }

    pub fn v2() -> Result<Self, CryptError> {
        Ok(Self {
            secret: machine_secret()?,
            version: HwVersion::V2,
        })
    }

    /// Builds a current-version instance from explicit key material
    /// instead of the OS keyring.
    #[cfg(test)]
    fn with_secret(secret: Vec<u8>, version: HwVersion) -> Self {
        Self { secret, version }
    }
}

impl Crypt for HardwareCrypt {
    fn tag(&self) -> &'static str {
        match self.version {
            HwVersion::V1 => Self::TAG_V1,
            HwVersion::V2 => Self::TAG_V2,
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        seal_with_params(&self.secret, &salt, plaintext, self.version.params())
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptError> {
        open_sealed_with_params(&self.secret, payload, self.version.params())
    }

    fn upgrade(&self) -> Option<Box<dyn Crypt>> {
        match self.version {
            HwVersion::V1 => Some(Box::new(Self {
                secret: self.secret.clone(),
                version: HwVersion::V2,
            })),
            HwVersion::V2 => None,
        }
    }
}

impl std::fmt::Debug for HardwareCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareCrypt")
            .field("version", &self.version)
            .field("secret", &"[MACHINE KEY]")
            .finish()
    }
}

/// Loads the machine secret from the OS keyring, generating and storing
/// a fresh one on first use.
fn machine_secret() -> Result<Vec<u8>, CryptError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    match entry.get_password() {
        Ok(encoded) => BASE64_STANDARD
            .decode(&encoded)
            .map_err(|_| CryptError::Decrypt),
        Err(keyring::Error::NoEntry) => {
            let mut secret = [0u8; 32];
            OsRng.fill_bytes(&mut secret);
            entry.set_password(&BASE64_STANDARD.encode(secret))?;
            Ok(secret.to_vec())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    #[test]
    fn round_trip_both_versions() {
        for version in [HwVersion::V1, HwVersion::V2] {
            let crypt = HardwareCrypt::with_secret(secret(7), version);
            let blob = crypt.encrypt(b"refresh token").unwrap();
            assert_eq!(crypt.decrypt(&blob).unwrap(), b"refresh token");
        }
    }

    #[test]
    fn other_machine_cannot_decrypt() {
        let blob = HardwareCrypt::with_secret(secret(7), HwVersion::V2)
            .encrypt(b"refresh token")
            .unwrap();
        let other = HardwareCrypt::with_secret(secret(8), HwVersion::V2);
        assert!(matches!(
            other.decrypt(&blob).unwrap_err(),
            CryptError::Decrypt
        ));
    }

    #[test]
    fn v1_upgrades_to_v2() {
        let v1 = HardwareCrypt::with_secret(secret(7), HwVersion::V1);
        assert_eq!(v1.tag(), HardwareCrypt::TAG_V1);

        let v2 = v1.upgrade().unwrap();
        assert_eq!(v2.tag(), HardwareCrypt::TAG_V2);
        assert!(v2.upgrade().is_none());

        // The upgraded instance shares key material, only the KDF changes.
        let blob = v2.encrypt(b"refresh token").unwrap();
        let same_machine_v2 = HardwareCrypt::with_secret(secret(7), HwVersion::V2);
        assert_eq!(same_machine_v2.decrypt(&blob).unwrap(), b"refresh token");
    }

    #[test]
    fn versions_are_not_interchangeable() {
        let v1 = HardwareCrypt::with_secret(secret(7), HwVersion::V1);
        let v2 = HardwareCrypt::with_secret(secret(7), HwVersion::V2);
        let blob = v1.encrypt(b"refresh token").unwrap();
        assert!(matches!(
            v2.decrypt(&blob).unwrap_err(),
            CryptError::Decrypt
        ));
    }
}
