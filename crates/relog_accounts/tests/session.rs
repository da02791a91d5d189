//! Pipeline tests over a scripted exchange layer: hop order, the
//! single refresh retry, decline, cancellation and stage reporting,
//! all without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use relog_accounts::account::MicrosoftAccount;
use relog_accounts::crypt::{Crypt, CryptError, DummyCrypt, EncryptedBlob};
use relog_accounts::microsoft::{Grant, MsTokens, Profile, Token, XHashedToken};
use relog_accounts::session::{AuthSession, AuthStage, LoginHandler, LoginResult, TokenExchange};
use relog_accounts::AuthError;

const USER_HASH: &str = "8263829";

fn profile(name: &str) -> Profile {
    Profile {
        id: Uuid::new_v3(&Uuid::NAMESPACE_OID, name.as_bytes()),
        name: name.to_owned(),
    }
}

/// What the scripted profile hop should answer, in order.
enum ProfileStep {
    Found(Profile),
    Unauthorized,
}

impl ProfileStep {
    fn into_result(self) -> Result<Profile, AuthError> {
        match self {
            ProfileStep::Found(profile) => Ok(profile),
            ProfileStep::Unauthorized => Err(AuthError::ProviderRejected {
                hop: "game_to_profile",
                status: 401,
                detail: "token expired".to_owned(),
            }),
        }
    }
}

struct ScriptedExchange {
    calls: Mutex<Vec<&'static str>>,
    profile_steps: Mutex<VecDeque<ProfileStep>>,
    game_tokens_issued: AtomicU32,
}

impl ScriptedExchange {
    fn new(profile_steps: Vec<ProfileStep>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            profile_steps: Mutex::new(profile_steps.into()),
            game_tokens_issued: AtomicU32::new(0),
        })
    }

    fn record(&self, hop: &'static str) {
        self.calls.lock().unwrap().push(hop);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

struct SharedExchange(Arc<ScriptedExchange>);

impl std::ops::Deref for SharedExchange {
    type Target = ScriptedExchange;

    fn deref(&self) -> &ScriptedExchange {
        &self.0
    }
}

#[async_trait]
impl TokenExchange for SharedExchange {
    async fn code_to_tokens(&self, code: &str, _redirect: &str) -> Result<MsTokens, AuthError> {
        self.record("code_to_tokens");
        assert_eq!(code, "the-auth-code");
        Ok(MsTokens {
            access: Token::new("msa-fresh"),
            refresh: Token::new("msr-fresh"),
        })
    }

    async fn refresh_to_tokens(&self, refresh: &Token) -> Result<MsTokens, AuthError> {
        self.record("refresh_to_tokens");
        assert_eq!(refresh.secret(), "msr-stored");
        Ok(MsTokens {
            access: Token::new("msa-rotated"),
            refresh: Token::new("msr-rotated"),
        })
    }

    async fn ms_to_xbox(&self, access: &Token) -> Result<XHashedToken, AuthError> {
        self.record("ms_to_xbox");
        assert!(access.secret().starts_with("msa-"));
        Ok(XHashedToken {
            token: Token::new("xbl-token"),
            hash: USER_HASH.to_owned(),
        })
    }

    async fn xbox_to_xsts(&self, xbl: &Token, hash: &str) -> Result<XHashedToken, AuthError> {
        self.record("xbox_to_xsts");
        assert_eq!(xbl.secret(), "xbl-token");
        assert_eq!(hash, USER_HASH);
        Ok(XHashedToken {
            token: Token::new("xsts-token"),
            hash: USER_HASH.to_owned(),
        })
    }

    async fn xsts_to_game(&self, xsts: &Token, hash: &str) -> Result<Token, AuthError> {
        self.record("xsts_to_game");
        assert_eq!(xsts.secret(), "xsts-token");
        assert_eq!(hash, USER_HASH);
        let n = self.game_tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(format!("game-{n}")))
    }

    async fn game_to_profile(&self, _access: &Token) -> Result<Profile, AuthError> {
        self.record("game_to_profile");
        self.profile_steps
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected game_to_profile call")
            .into_result()
    }
}

#[derive(Default)]
struct ScriptedHandler {
    stages: Mutex<Vec<AuthStage>>,
    cancelled: AtomicBool,
    cancel_at: Option<AuthStage>,
    password: Option<String>,
}

impl ScriptedHandler {
    fn stages(&self) -> Vec<AuthStage> {
        self.stages.lock().unwrap().clone()
    }
}

impl LoginHandler for ScriptedHandler {
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn stage(&self, stage: AuthStage) {
        if self.cancel_at.as_ref() == Some(&stage) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.stages.lock().unwrap().push(stage);
    }

    fn password(&self) -> Option<String> {
        self.password.clone()
    }
}

fn session(exchange: &Arc<ScriptedExchange>, handler: &Arc<ScriptedHandler>) -> AuthSession {
    AuthSession::with_exchange(
        Box::new(DummyCrypt),
        Box::new(Arc::clone(handler)),
        Box::new(SharedExchange(Arc::clone(exchange))),
    )
}

fn stored_account(name: &str, crypt: &dyn Crypt) -> MicrosoftAccount {
    let payload = crypt.encrypt(b"game-stored\0msr-stored").unwrap();
    MicrosoftAccount::new(
        profile(name).id,
        name,
        EncryptedBlob::new(crypt.tag(), payload),
    )
}

fn code_grant() -> Grant {
    Grant::Code {
        code: "the-auth-code".to_owned(),
        redirect: "http://127.0.0.1:59125/callback".to_owned(),
    }
}

#[tokio::test]
async fn fresh_login_runs_hops_in_order() {
    let exchange = ScriptedExchange::new(vec![ProfileStep::Found(profile("Alice"))]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let result = session.login_with_grant(code_grant()).await.unwrap();
    let LoginResult::Created { account, data } = result else {
        panic!("expected created account");
    };

    assert_eq!(
        exchange.calls(),
        vec![
            "code_to_tokens",
            "ms_to_xbox",
            "xbox_to_xsts",
            "xsts_to_game",
            "game_to_profile",
        ]
    );
    assert_eq!(account.name, "Alice");
    assert_eq!(account.id, profile("Alice").id);
    assert_eq!(data.profile.name, "Alice");
    assert_eq!(data.access.secret(), "game-1");

    // The blob holds the fresh game access + refresh pair.
    assert_eq!(account.data.crypt_type, "none_v1");
    assert_eq!(account.data.payload, b"game-1\0msr-fresh");

    assert_eq!(
        handler.stages(),
        vec![
            AuthStage::Processing,
            AuthStage::CodeToTokens,
            AuthStage::MsToXbox,
            AuthStage::XboxToXsts,
            AuthStage::XstsToGame,
            AuthStage::GameToProfile,
            AuthStage::Encrypting,
            AuthStage::Finalizing,
        ]
    );
}

#[tokio::test]
async fn device_tokens_skip_the_code_hop() {
    let exchange = ScriptedExchange::new(vec![ProfileStep::Found(profile("Alice"))]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let grant = Grant::Tokens(MsTokens {
        access: Token::new("msa-device"),
        refresh: Token::new("msr-device"),
    });
    let result = session.login_with_grant(grant).await.unwrap();
    assert!(matches!(result, LoginResult::Created { .. }));
    assert_eq!(exchange.calls()[0], "ms_to_xbox");
}

#[tokio::test]
async fn declined_grant_is_an_outcome_not_an_error() {
    let exchange = ScriptedExchange::new(vec![]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let result = session.login_with_grant(Grant::Declined).await.unwrap();
    assert!(matches!(result, LoginResult::Declined));
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn stored_login_tries_the_stored_token_first() {
    let exchange = ScriptedExchange::new(vec![ProfileStep::Found(profile("Alice"))]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    let before = account.data.clone();
    let result = session.login_stored(&mut account).await.unwrap();

    let LoginResult::LoggedIn { data, changed } = result else {
        panic!("expected logged in");
    };
    assert!(!changed);
    assert_eq!(data.access.secret(), "game-stored");
    assert_eq!(exchange.calls(), vec!["game_to_profile"]);
    assert_eq!(account.data, before);

    assert_eq!(
        handler.stages(),
        vec![
            AuthStage::Decrypting,
            AuthStage::GameToProfile,
            AuthStage::Finalizing,
        ]
    );
}

#[tokio::test]
async fn stale_token_earns_exactly_one_refresh() {
    let exchange = ScriptedExchange::new(vec![
        ProfileStep::Unauthorized,
        ProfileStep::Found(profile("Alice")),
    ]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    let result = session.login_stored(&mut account).await.unwrap();

    let LoginResult::LoggedIn { data, changed } = result else {
        panic!("expected logged in");
    };
    assert!(changed);
    assert_eq!(data.access.secret(), "game-1");

    assert_eq!(
        exchange.calls(),
        vec![
            "game_to_profile",
            "refresh_to_tokens",
            "ms_to_xbox",
            "xbox_to_xsts",
            "xsts_to_game",
            "game_to_profile",
        ]
    );
    // The rotated pair replaced the stored blob.
    assert_eq!(account.data.payload, b"game-1\0msr-rotated");

    assert_eq!(
        handler.stages(),
        vec![
            AuthStage::Decrypting,
            AuthStage::GameToProfile,
            AuthStage::RefreshToTokens,
            AuthStage::MsToXbox,
            AuthStage::XboxToXsts,
            AuthStage::XstsToGame,
            AuthStage::GameToProfile,
            AuthStage::Encrypting,
            AuthStage::Finalizing,
        ]
    );
}

#[tokio::test]
async fn second_unauthorized_is_terminal() {
    let exchange =
        ScriptedExchange::new(vec![ProfileStep::Unauthorized, ProfileStep::Unauthorized]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    let before = account.data.clone();
    let error = session.login_stored(&mut account).await.unwrap_err();

    assert!(matches!(
        error,
        AuthError::ProviderRejected { status: 401, .. }
    ));
    // One refresh, never a second.
    let refreshes = exchange
        .calls()
        .iter()
        .filter(|c| **c == "refresh_to_tokens")
        .count();
    assert_eq!(refreshes, 1);
    // The account entry is only replaced after a full success.
    assert_eq!(account.data, before);
}

#[tokio::test]
async fn renamed_profile_marks_store_dirty() {
    let exchange = ScriptedExchange::new(vec![ProfileStep::Found(profile("AliceRenamed"))]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    let result = session.login_stored(&mut account).await.unwrap();

    let LoginResult::LoggedIn { changed, .. } = result else {
        panic!("expected logged in");
    };
    assert!(changed);
    assert_eq!(account.name, "AliceRenamed");
}

#[tokio::test]
async fn cancellation_between_stages_stops_the_pipeline() {
    let exchange = ScriptedExchange::new(vec![]);
    let handler = Arc::new(ScriptedHandler {
        cancel_at: Some(AuthStage::XboxToXsts),
        ..ScriptedHandler::default()
    });
    let session = session(&exchange, &handler);

    let result = session.login_with_grant(code_grant()).await.unwrap();
    assert!(matches!(result, LoginResult::Cancelled));

    // The hop in flight when the flag was raised still completed, the
    // next one never started.
    assert_eq!(
        exchange.calls(),
        vec!["code_to_tokens", "ms_to_xbox", "xbox_to_xsts"]
    );
    assert!(!handler.stages().contains(&AuthStage::Encrypting));
}

#[tokio::test]
async fn dismissed_password_prompt_cancels() {
    let exchange = ScriptedExchange::new(vec![]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    account.data.crypt_type = "password_v1".to_owned();

    let result = session.login_stored(&mut account).await.unwrap();
    assert!(matches!(result, LoginResult::Cancelled));
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn unknown_crypt_tag_fails_closed() {
    let exchange = ScriptedExchange::new(vec![]);
    let handler = Arc::new(ScriptedHandler::default());
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &DummyCrypt);
    account.data.crypt_type = "rot13_v1".to_owned();

    let error = session.login_stored(&mut account).await.unwrap_err();
    assert!(matches!(
        error,
        AuthError::DecryptionFailed(CryptError::UnknownType(tag)) if tag == "rot13_v1"
    ));
    assert!(exchange.calls().is_empty());
}

#[tokio::test]
async fn stored_password_crypt_decrypts_with_prompted_password() {
    use relog_accounts::crypt::PasswordCrypt;

    let exchange = ScriptedExchange::new(vec![ProfileStep::Found(profile("Alice"))]);
    let handler = Arc::new(ScriptedHandler {
        password: Some("correct horse".to_owned()),
        ..ScriptedHandler::default()
    });
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &PasswordCrypt::new("correct horse"));
    let result = session.login_stored(&mut account).await.unwrap();
    assert!(matches!(result, LoginResult::LoggedIn { .. }));
}

#[tokio::test]
async fn wrong_password_is_a_decryption_failure() {
    use relog_accounts::crypt::PasswordCrypt;

    let exchange = ScriptedExchange::new(vec![]);
    let handler = Arc::new(ScriptedHandler {
        password: Some("wrong password".to_owned()),
        ..ScriptedHandler::default()
    });
    let session = session(&exchange, &handler);

    let mut account = stored_account("Alice", &PasswordCrypt::new("correct horse"));
    let error = session.login_stored(&mut account).await.unwrap_err();
    assert!(matches!(
        error,
        AuthError::DecryptionFailed(CryptError::Decrypt)
    ));
    assert!(exchange.calls().is_empty());
}
