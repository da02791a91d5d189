use std::hash::{Hash, Hasher};

use uuid::Uuid;

use crate::crypt::EncryptedBlob;

/// A playable identity known to the store.
///
/// Identity is the `(variant, id)` pair: two accounts are the same
/// account if they are the same kind and carry the same id, even when
/// the display name differs (names change server-side; ids do not).
#[derive(Clone, Debug)]
pub enum Account {
    Microsoft(MicrosoftAccount),
    Offline(OfflineAccount),
}

impl Account {
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Account::Microsoft(account) => account.id,
            Account::Offline(account) => account.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Account::Microsoft(account) => &account.name,
            Account::Offline(account) => &account.name,
        }
    }

    /// Whether this account can run the login pipeline at all.
    /// Offline accounts have nothing to exchange.
    #[must_use]
    pub fn can_login(&self) -> bool {
        matches!(self, Account::Microsoft(_))
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Account::Microsoft(a), Account::Microsoft(b)) => a.id == b.id,
            (Account::Offline(a), Account::Offline(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        self.id().hash(state);
    }
}

/// A Microsoft account. The access and refresh tokens live inside
/// `data`, encrypted under the crypt named by its tag; they are only
/// ever decrypted for the duration of a login.
#[derive(Clone, Debug)]
pub struct MicrosoftAccount {
    pub id: Uuid,
    pub name: String,
    pub data: EncryptedBlob,
}

impl MicrosoftAccount {
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>, data: EncryptedBlob) -> Self {
        Self {
            id,
            name: name.into(),
            data,
        }
    }
}

/// A local account with no online identity. Its id is derived from the
/// name, matching the convention offline-mode servers use, so the same
/// name always yields the same id on every machine.
#[derive(Clone, Debug)]
pub struct OfflineAccount {
    pub id: Uuid,
    pub name: String,
}

impl OfflineAccount {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = offline_uuid(&name);
        Self { id, name }
    }
}

/// Deterministic name-derived UUID for offline accounts.
#[must_use]
pub fn offline_uuid(name: &str) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("OfflinePlayer:{name}").as_bytes(),
    )
}
