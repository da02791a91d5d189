//! Account switching core: Microsoft token pipeline, encryption at rest
//! for refresh credentials, and the versioned on-disk account store.
//!
//! The crate is UI-agnostic. A host application drives it through
//! [`session::AuthSession`] with a [`session::LoginHandler`] of its own,
//! persists the result through [`storage::AccountStore`], and renders
//! [`session::AuthStage`] values however it likes.

pub mod account;
pub mod config;
pub mod crypt;
mod error;
pub mod microsoft;
pub mod session;
pub mod storage;

pub use account::{Account, MicrosoftAccount, OfflineAccount};
pub use config::SwitcherConfig;
pub use crypt::{Crypt, CryptError, DummyCrypt, EncryptedBlob, HardwareCrypt, PasswordCrypt};
pub use error::{AuthError, NotEntitledReason};
pub use microsoft::{Grant, Profile, Token};
pub use session::{
    AuthSession, AuthStage, LoginData, LoginHandler, LoginMethod, LoginResult, TokenExchange,
};
pub use storage::{AccountStore, StoreError};
