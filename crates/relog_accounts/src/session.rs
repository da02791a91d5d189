//! The login pipeline.
//!
//! [`AuthSession`] drives a full login attempt: obtain a grant from a
//! receiver, walk the token hops, re-encrypt the credentials and hand
//! back a [`LoginResult`]. The host supplies a [`LoginHandler`] for
//! stage display, cancellation and password prompts; the session never
//! talks to a UI directly.
//!
//! Cancellation is checked between stages. A hop that is already in
//! flight runs to completion; its result is discarded and the attempt
//! resolves to [`LoginResult::Cancelled`] without touching the account.

use std::sync::Arc;

use async_trait::async_trait;
use relog_core::info;
use tokio::time::{sleep, Duration};

use crate::account::MicrosoftAccount;
use crate::crypt::{self, Crypt, CryptError, EncryptedBlob};
use crate::error::AuthError;
use crate::microsoft::{
    self, CallbackReceiver, Grant, MsTokens, PollingReceiver, Profile, Token, XHashedToken,
};

/// How the grant is obtained for a fresh login.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginMethod {
    /// Local callback server + system browser.
    Browser,
    /// Device code typed on the provider's verification page.
    DeviceCode,
}

/// Where the pipeline currently is. Reported through
/// [`LoginHandler::stage`] strictly in pipeline order; hosts render
/// these however they like and must not act on them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthStage {
    Initializing,
    /// The consent page was opened at `url`.
    AwaitingBrowser {
        url: String,
    },
    /// Device flow: the user must enter `user_code` at `uri`.
    AwaitingCode {
        uri: String,
        user_code: String,
    },
    Processing,
    CodeToTokens,
    RefreshToTokens,
    MsToXbox,
    XboxToXsts,
    XstsToGame,
    GameToProfile,
    Encrypting,
    Decrypting,
    Finalizing,
}

/// Host-side callbacks for one login attempt.
pub trait LoginHandler: Send + Sync {
    /// Polled between stages; `true` abandons the attempt.
    fn cancelled(&self) -> bool;

    /// Fire-and-forget progress report.
    fn stage(&self, stage: AuthStage);

    /// Asks the user for the store password. `None` means the user
    /// dismissed the prompt, which cancels the attempt. Only called
    /// when the stored blob actually needs a password.
    fn password(&self) -> Option<String> {
        None
    }
}

impl<H: LoginHandler + ?Sized> LoginHandler for Arc<H> {
    fn cancelled(&self) -> bool {
        (**self).cancelled()
    }
    fn stage(&self, stage: AuthStage) {
        (**self).stage(stage);
    }
    fn password(&self) -> Option<String> {
        (**self).password()
    }
}

/// Everything the host needs to act as the logged-in identity.
#[derive(Clone, Debug)]
pub struct LoginData {
    pub profile: Profile,
    /// The game access token, valid for the current session only.
    pub access: Token,
}

/// Terminal outcome of a login attempt. Declining and cancelling are
/// outcomes, not errors; only genuine failures surface as `Err`.
#[derive(Debug)]
pub enum LoginResult {
    /// Fresh login: a new account ready to be added to the store.
    Created {
        account: MicrosoftAccount,
        data: LoginData,
    },
    /// Stored login; `changed` means the account entry was updated and
    /// the store should be saved.
    LoggedIn {
        data: LoginData,
        changed: bool,
    },
    /// The user declined consent at the receiver.
    Declined,
    Cancelled,
}

/// The token hops behind the session, as a seam. Production uses
/// [`LiveExchange`]; tests script the hops to drive the pipeline
/// without a network.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn code_to_tokens(&self, code: &str, redirect: &str) -> Result<MsTokens, AuthError>;
    async fn refresh_to_tokens(&self, refresh: &Token) -> Result<MsTokens, AuthError>;
    async fn ms_to_xbox(&self, access: &Token) -> Result<XHashedToken, AuthError>;
    async fn xbox_to_xsts(&self, xbl: &Token, hash: &str) -> Result<XHashedToken, AuthError>;
    async fn xsts_to_game(&self, xsts: &Token, hash: &str) -> Result<Token, AuthError>;
    async fn game_to_profile(&self, access: &Token) -> Result<Profile, AuthError>;
}

/// The real hop functions from [`crate::microsoft`].
pub struct LiveExchange;

#[async_trait]
impl TokenExchange for LiveExchange {
    async fn code_to_tokens(&self, code: &str, redirect: &str) -> Result<MsTokens, AuthError> {
        microsoft::code_to_tokens(code, redirect).await
    }
    async fn refresh_to_tokens(&self, refresh: &Token) -> Result<MsTokens, AuthError> {
        microsoft::refresh_to_tokens(refresh).await
    }
    async fn ms_to_xbox(&self, access: &Token) -> Result<XHashedToken, AuthError> {
        microsoft::ms_to_xbox(access).await
    }
    async fn xbox_to_xsts(&self, xbl: &Token, hash: &str) -> Result<XHashedToken, AuthError> {
        microsoft::xbox_to_xsts(xbl, hash).await
    }
    async fn xsts_to_game(&self, xsts: &Token, hash: &str) -> Result<Token, AuthError> {
        microsoft::xsts_to_game(xsts, hash).await
    }
    async fn game_to_profile(&self, access: &Token) -> Result<Profile, AuthError> {
        microsoft::game_to_profile(access).await
    }
}

pub struct AuthSession {
    crypt: Box<dyn Crypt>,
    handler: Box<dyn LoginHandler>,
    exchange: Box<dyn TokenExchange>,
}

impl AuthSession {
    /// A session over the live hop functions. `crypt` is what new and
    /// re-encrypted blobs are written with.
    #[must_use]
    pub fn new(crypt: Box<dyn Crypt>, handler: Box<dyn LoginHandler>) -> Self {
        Self::with_exchange(crypt, handler, Box::new(LiveExchange))
    }

    /// A session over a custom exchange layer. The seam tests use to
    /// script hop responses.
    #[must_use]
    pub fn with_exchange(
        crypt: Box<dyn Crypt>,
        handler: Box<dyn LoginHandler>,
        exchange: Box<dyn TokenExchange>,
    ) -> Self {
        Self {
            crypt,
            handler,
            exchange,
        }
    }

    /// Fresh login: obtain a grant with `method`, then run the chain.
    pub async fn login(&self, method: LoginMethod) -> Result<LoginResult, AuthError> {
        let attempt = async {
            self.handler.stage(AuthStage::Initializing);
            let grant = self.obtain_grant(method).await?;
            self.login_with_grant(grant).await
        };
        finish(attempt.await)
    }

    /// Runs the chain on an already-obtained grant.
    pub async fn login_with_grant(&self, grant: Grant) -> Result<LoginResult, AuthError> {
        finish(self.grant_to_account(grant).await)
    }

    /// Re-login on a stored account: stored access token first, one
    /// refresh on a 401, nothing else.
    pub async fn login_stored(
        &self,
        account: &mut MicrosoftAccount,
    ) -> Result<LoginResult, AuthError> {
        finish(self.stored_inner(account).await)
    }

    async fn obtain_grant(&self, method: LoginMethod) -> Result<Grant, AuthError> {
        match method {
            LoginMethod::Browser => {
                let receiver = CallbackReceiver::bind().await?;
                self.handler.stage(AuthStage::AwaitingBrowser {
                    url: receiver.consent_url(),
                });
                let _clipboard = receiver.present();

                let receive = receiver.receive();
                tokio::pin!(receive);
                loop {
                    tokio::select! {
                        grant = &mut receive => break grant,
                        () = sleep(Duration::from_millis(250)) => {
                            if self.handler.cancelled() {
                                break Err(AuthError::Cancelled);
                            }
                        }
                    }
                }
            }
            LoginMethod::DeviceCode => {
                let receiver = PollingReceiver::start().await?;
                self.handler.stage(AuthStage::AwaitingCode {
                    uri: receiver.verification_uri().to_owned(),
                    user_code: receiver.user_code().to_owned(),
                });
                receiver.receive(|| self.handler.cancelled()).await
            }
        }
    }

    async fn grant_to_account(&self, grant: Grant) -> Result<LoginResult, AuthError> {
        self.handler.stage(AuthStage::Processing);
        let tokens = match grant {
            Grant::Declined => return Ok(LoginResult::Declined),
            Grant::Tokens(tokens) => tokens,
            Grant::Code { code, redirect } => {
                self.checkpoint()?;
                self.handler.stage(AuthStage::CodeToTokens);
                self.exchange.code_to_tokens(&code, &redirect).await?
            }
        };

        let (profile, access, refresh) = self.tokens_to_profile(tokens).await?;

        self.checkpoint()?;
        self.handler.stage(AuthStage::Encrypting);
        let data = self.encrypt_pair(&access, &refresh)?;

        self.handler.stage(AuthStage::Finalizing);
        info!("Logged in as {}", profile.name);
        let account = MicrosoftAccount::new(profile.id, profile.name.clone(), data);
        Ok(LoginResult::Created {
            account,
            data: LoginData { profile, access },
        })
    }

    async fn stored_inner(&self, account: &mut MicrosoftAccount) -> Result<LoginResult, AuthError> {
        self.checkpoint()?;
        self.handler.stage(AuthStage::Decrypting);

        let tag = account.data.crypt_type.clone();
        let password = if crypt::needs_password(&tag) {
            match self.handler.password() {
                Some(password) => Some(password),
                None => return Err(AuthError::Cancelled),
            }
        } else {
            None
        };
        let stored_crypt = crypt::from_tag(&tag, password)?;
        let plain = stored_crypt.decrypt(&account.data.payload)?;
        let (access, refresh) = split_pair(&plain).ok_or(CryptError::Decrypt)?;

        // Happy path: the stored game token is still valid.
        self.checkpoint()?;
        self.handler.stage(AuthStage::GameToProfile);
        match self.exchange.game_to_profile(&access).await {
            Ok(profile) => {
                let mut changed = profile.name != account.name;
                account.name = profile.name.clone();

                // Legacy crypt sub-versions get rewritten in place.
                if let Some(upgraded) = stored_crypt.upgrade() {
                    self.checkpoint()?;
                    self.handler.stage(AuthStage::Encrypting);
                    account.data = encrypt_pair_with(&*upgraded, &access, &refresh)?;
                    changed = true;
                }

                self.handler.stage(AuthStage::Finalizing);
                info!("Logged in as {} (stored token)", account.name);
                Ok(LoginResult::LoggedIn {
                    data: LoginData { profile, access },
                    changed,
                })
            }
            // A stale access token earns exactly one refresh attempt.
            Err(error) if error.is_unauthorized() => {
                self.checkpoint()?;
                self.handler.stage(AuthStage::RefreshToTokens);
                let tokens = self.exchange.refresh_to_tokens(&refresh).await?;
                // The old refresh token is dead from here on.

                let (profile, access, refresh) = self.tokens_to_profile(tokens).await?;

                self.checkpoint()?;
                self.handler.stage(AuthStage::Encrypting);
                account.data = self.encrypt_pair(&access, &refresh)?;
                account.name = profile.name.clone();

                self.handler.stage(AuthStage::Finalizing);
                info!("Logged in as {} (refreshed)", account.name);
                Ok(LoginResult::LoggedIn {
                    data: LoginData { profile, access },
                    changed: true,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Hops 3 through 6. Returns the profile, the game access token
    /// and the refresh token to store.
    async fn tokens_to_profile(
        &self,
        tokens: MsTokens,
    ) -> Result<(Profile, Token, Token), AuthError> {
        self.checkpoint()?;
        self.handler.stage(AuthStage::MsToXbox);
        let xbl = self.exchange.ms_to_xbox(&tokens.access).await?;

        self.checkpoint()?;
        self.handler.stage(AuthStage::XboxToXsts);
        let xsts = self.exchange.xbox_to_xsts(&xbl.token, &xbl.hash).await?;

        self.checkpoint()?;
        self.handler.stage(AuthStage::XstsToGame);
        let access = self.exchange.xsts_to_game(&xsts.token, &xsts.hash).await?;

        self.checkpoint()?;
        self.handler.stage(AuthStage::GameToProfile);
        let profile = self.exchange.game_to_profile(&access).await?;

        Ok((profile, access, tokens.refresh))
    }

    fn encrypt_pair(&self, access: &Token, refresh: &Token) -> Result<EncryptedBlob, AuthError> {
        Ok(encrypt_pair_with(&*self.crypt, access, refresh)?)
    }

    fn checkpoint(&self) -> Result<(), AuthError> {
        if self.handler.cancelled() {
            Err(AuthError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancellation is an outcome, not an error; nothing downstream should
/// ever see `AuthError::Cancelled`.
fn finish(result: Result<LoginResult, AuthError>) -> Result<LoginResult, AuthError> {
    match result {
        Err(AuthError::Cancelled) => Ok(LoginResult::Cancelled),
        other => other,
    }
}

fn encrypt_pair_with(
    crypt: &dyn Crypt,
    access: &Token,
    refresh: &Token,
) -> Result<EncryptedBlob, CryptError> {
    let mut plain = Vec::with_capacity(access.secret().len() + refresh.secret().len() + 1);
    plain.extend_from_slice(access.secret().as_bytes());
    plain.push(0);
    plain.extend_from_slice(refresh.secret().as_bytes());
    Ok(EncryptedBlob::new(crypt.tag(), crypt.encrypt(&plain)?))
}

/// Splits a decrypted `access \0 refresh` pair. `None` on any shape
/// violation, which callers treat as a failed decryption.
fn split_pair(plain: &[u8]) -> Option<(Token, Token)> {
    let split = plain.iter().position(|&b| b == 0)?;
    let access = std::str::from_utf8(&plain[..split]).ok()?;
    let refresh = std::str::from_utf8(&plain[split + 1..]).ok()?;
    if access.is_empty() || refresh.is_empty() {
        return None;
    }
    Some((Token::new(access), Token::new(refresh)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::DummyCrypt;

    #[test]
    fn pair_round_trips_through_blob() {
        let access = Token::new("game-access");
        let refresh = Token::new("ms-refresh");
        let blob = encrypt_pair_with(&DummyCrypt, &access, &refresh).unwrap();
        assert_eq!(blob.crypt_type, "none_v1");

        let (a, r) = split_pair(&blob.payload).unwrap();
        assert_eq!(a.secret(), "game-access");
        assert_eq!(r.secret(), "ms-refresh");
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(split_pair(b"no separator").is_none());
        assert!(split_pair(b"\0refresh-only").is_none());
        assert!(split_pair(b"access-only\0").is_none());
        assert!(split_pair(b"bad\xFF\xFE\0utf8").is_none());
    }
}
