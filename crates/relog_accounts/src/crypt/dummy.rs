use super::{Crypt, CryptError};

/// Identity transform for users who explicitly opt out of encryption.
///
/// The extra friction required before this becomes selectable (holding a
/// modifier key on the confirmation) lives in the caller; the core only
/// reports [`Crypt::insecure`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyCrypt;

impl DummyCrypt {
    pub const TAG: &'static str = "none_v1";
}

impl Crypt for DummyCrypt {
    fn tag(&self) -> &'static str {
        Self::TAG
    }

    fn insecure(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(payload.to_vec())
    }
}
