//! The Microsoft token exchange pipeline.
//!
//! Every hop is a stateless async function over [`relog_core::CLIENT`]
//! with its own timeout. Hops do not retry and never log or format
//! token values; failures carry only the hop name, the HTTP status and
//! a provider error code.
//!
//! Chain for a fresh login: grant (code or device) → [`code_to_tokens`]
//! / [`device_to_tokens`] → [`ms_to_xbox`] → [`xbox_to_xsts`] →
//! [`xsts_to_game`] → [`game_to_profile`]. Re-login replaces the first
//! step with [`refresh_to_tokens`].

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AuthError, NotEntitledReason};

pub mod device;
pub mod server;

pub use device::{DevicePoller, LivePoller, PollingReceiver};
pub use server::CallbackReceiver;

pub const CLIENT_ID: &str = "54fd49e4-2103-4044-9603-2b028c814ec3";
pub const SCOPE: &str = "XboxLive.signin XboxLive.offline_access";

const TIMEOUT: Duration = Duration::from_secs(15);

const MS_DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
const MS_DEVICE_TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
const MS_TOKEN_URL: &str = "https://login.live.com/oauth20_token.srf";
const XBL_AUTH_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const XSTS_AUTH_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const GAME_AUTH_URL: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
const PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";
const NAME_LOOKUP_URL: &str = "https://api.mojang.com/users/profiles/minecraft";

/// A bearer secret. Registers itself for log redaction on construction
/// and never appears in `Debug` output.
#[derive(Clone, Eq, PartialEq)]
pub struct Token(String);

impl Token {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        relog_core::print::redact(&value);
        Self(value)
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// Microsoft access + refresh token pair.
#[derive(Clone, Debug)]
pub struct MsTokens {
    pub access: Token,
    pub refresh: Token,
}

/// An Xbox-side token (XBL or XSTS) paired with the user hash both
/// sides of the exchange must agree on.
#[derive(Clone, Debug)]
pub struct XHashedToken {
    pub token: Token,
    pub hash: String,
}

/// The game profile an access token resolves to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
}

/// Device grant bootstrap data shown to the user.
#[derive(Clone, Debug)]
pub struct DeviceAuth {
    pub device_code: Token,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// One poll of the device token endpoint.
#[derive(Debug)]
pub enum DevicePoll {
    Tokens(MsTokens),
    /// The user has not finished in the browser yet; poll again after
    /// the interval.
    Pending,
    /// The provider wants a longer interval; add 5 s and poll again.
    SlowDown,
    /// The user explicitly declined. Terminal, but not an error.
    Declined,
    /// The device code expired before the user finished. Terminal.
    Expired,
}

/// What a receiver hands to the pipeline: either an authorization code
/// still to be exchanged, or tokens the device flow already produced.
#[derive(Debug)]
pub enum Grant {
    Code {
        code: String,
        redirect: String,
    },
    Tokens(MsTokens),
    /// The user backed out at the receiver. Not an error.
    Declined,
}

#[derive(Deserialize)]
struct WireMsTokens {
    access_token: String,
    refresh_token: String,
}

impl From<WireMsTokens> for MsTokens {
    fn from(wire: WireMsTokens) -> Self {
        Self {
            access: Token::new(wire.access_token),
            refresh: Token::new(wire.refresh_token),
        }
    }
}

#[derive(Deserialize)]
struct WireOAuthError {
    error: String,
}

#[derive(Deserialize)]
struct WireDeviceAuth {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

#[derive(Deserialize)]
struct WireXboxToken {
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "DisplayClaims")]
    display_claims: WireDisplayClaims,
}

#[derive(Deserialize)]
struct WireDisplayClaims {
    xui: Vec<WireXui>,
}

#[derive(Deserialize)]
struct WireXui {
    uhs: String,
}

#[derive(Deserialize)]
struct WireXErr {
    #[serde(rename = "XErr")]
    xerr: u64,
}

#[derive(Deserialize)]
struct WireGameToken {
    access_token: String,
}

#[derive(Deserialize)]
struct WireProfile {
    id: String,
    name: String,
}

impl WireXboxToken {
    fn into_hashed(self, hop: &'static str) -> Result<XHashedToken, AuthError> {
        let hash = self
            .display_claims
            .xui
            .into_iter()
            .next()
            .map(|x| x.uhs)
            .ok_or(AuthError::MalformedResponse {
                hop,
                detail: "no user hash in display claims".to_owned(),
            })?;
        Ok(XHashedToken {
            token: Token::new(self.token),
            hash,
        })
    }
}

fn net(hop: &'static str) -> impl FnOnce(reqwest::Error) -> AuthError {
    move |source| AuthError::Network { hop, source }
}

fn malformed(hop: &'static str) -> impl FnOnce(reqwest::Error) -> AuthError {
    move |error| AuthError::MalformedResponse {
        hop,
        detail: error.to_string(),
    }
}

/// Classifies a non-success response. The body is consulted only for
/// the provider's `error` code; payload values never reach the error.
async fn rejected(hop: &'static str, response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    if status == 429 {
        return AuthError::RateLimited { hop };
    }
    let detail = match response.json::<WireOAuthError>().await {
        Ok(body) => body.error,
        Err(_) => "no error code in response".to_owned(),
    };
    AuthError::ProviderRejected {
        hop,
        status,
        detail,
    }
}

/// Requests a device code pair: the pre-hop of the polling receiver.
pub async fn request_device_code() -> Result<DeviceAuth, AuthError> {
    const HOP: &str = "request_device_code";
    let response = relog_core::CLIENT
        .post(MS_DEVICE_CODE_URL)
        .timeout(TIMEOUT)
        .form(&[("client_id", CLIENT_ID), ("scope", SCOPE)])
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireDeviceAuth = response.json().await.map_err(malformed(HOP))?;
    if wire.interval == 0 || wire.interval >= wire.expires_in {
        return Err(AuthError::MalformedResponse {
            hop: HOP,
            detail: format!(
                "implausible polling interval {} for expiry {}",
                wire.interval, wire.expires_in
            ),
        });
    }
    Ok(DeviceAuth {
        device_code: Token::new(wire.device_code),
        user_code: wire.user_code,
        verification_uri: wire.verification_uri,
        expires_in: wire.expires_in,
        interval: wire.interval,
    })
}

/// Hop 1, device variant: one poll of the device token endpoint.
/// Pending and slow-down are data, not errors; the receiver loops.
pub async fn device_to_tokens(device_code: &Token) -> Result<DevicePoll, AuthError> {
    const HOP: &str = "device_to_tokens";
    let response = relog_core::CLIENT
        .post(MS_DEVICE_TOKEN_URL)
        .timeout(TIMEOUT)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("client_id", CLIENT_ID),
            ("device_code", device_code.secret()),
        ])
        .send()
        .await
        .map_err(net(HOP))?;

    if response.status().is_success() {
        let wire: WireMsTokens = response.json().await.map_err(malformed(HOP))?;
        return Ok(DevicePoll::Tokens(wire.into()));
    }

    let status = response.status().as_u16();
    match response.json::<WireOAuthError>().await {
        Ok(body) => match body.error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            "authorization_declined" => Ok(DevicePoll::Declined),
            "expired_token" => Ok(DevicePoll::Expired),
            other => Err(AuthError::ProviderRejected {
                hop: HOP,
                status,
                detail: other.to_owned(),
            }),
        },
        Err(error) => Err(AuthError::MalformedResponse {
            hop: HOP,
            detail: error.to_string(),
        }),
    }
}

/// Hop 1: authorization code (from the callback receiver) to the
/// Microsoft token pair. `redirect` must match the consent request.
pub async fn code_to_tokens(code: &str, redirect: &str) -> Result<MsTokens, AuthError> {
    const HOP: &str = "code_to_tokens";
    let response = relog_core::CLIENT
        .post(MS_TOKEN_URL)
        .timeout(TIMEOUT)
        .form(&[
            ("client_id", CLIENT_ID),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect),
            ("scope", SCOPE),
        ])
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireMsTokens = response.json().await.map_err(malformed(HOP))?;
    Ok(wire.into())
}

/// Hop 2: refresh token rotation. The provider may rotate the refresh
/// token; the caller must keep only the returned pair.
pub async fn refresh_to_tokens(refresh: &Token) -> Result<MsTokens, AuthError> {
    const HOP: &str = "refresh_to_tokens";
    let response = relog_core::CLIENT
        .post(MS_TOKEN_URL)
        .timeout(TIMEOUT)
        .form(&[
            ("client_id", CLIENT_ID),
            ("refresh_token", refresh.secret()),
            ("grant_type", "refresh_token"),
            ("scope", SCOPE),
        ])
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireMsTokens = response.json().await.map_err(malformed(HOP))?;
    Ok(wire.into())
}

/// Hop 3: Microsoft access token to Xbox Live token + user hash.
pub async fn ms_to_xbox(access: &Token) -> Result<XHashedToken, AuthError> {
    const HOP: &str = "ms_to_xbox";
    let body = serde_json::json!({
        "Properties": {
            "AuthMethod": "RPS",
            "SiteName": "user.auth.xboxlive.com",
            "RpsTicket": format!("d={}", access.secret()),
        },
        "RelyingParty": "http://auth.xboxlive.com",
        "TokenType": "JWT",
    });
    let response = relog_core::CLIENT
        .post(XBL_AUTH_URL)
        .timeout(TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireXboxToken = response.json().await.map_err(malformed(HOP))?;
    wire.into_hashed(HOP)
}

/// Hop 4: Xbox Live token to XSTS token, constrained to the game's
/// relying party. The 401 `XErr` values single out accounts that exist
/// but cannot play; the returned user hash must match `hash`.
pub async fn xbox_to_xsts(xbl: &Token, hash: &str) -> Result<XHashedToken, AuthError> {
    const HOP: &str = "xbox_to_xsts";
    let body = serde_json::json!({
        "Properties": {
            "UserTokens": [xbl.secret()],
            "SandboxId": "RETAIL",
        },
        "RelyingParty": "rp://api.minecraftservices.com/",
        "TokenType": "JWT",
    });
    let response = relog_core::CLIENT
        .post(XSTS_AUTH_URL)
        .timeout(TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(net(HOP))?;

    if response.status().as_u16() == 401 {
        return match response.json::<WireXErr>().await {
            Ok(body) => Err(classify_xerr(body.xerr)),
            Err(error) => Err(AuthError::MalformedResponse {
                hop: HOP,
                detail: error.to_string(),
            }),
        };
    }
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }

    let wire: WireXboxToken = response.json().await.map_err(malformed(HOP))?;
    let token = wire.into_hashed(HOP)?;
    if token.hash != hash {
        return Err(AuthError::MalformedResponse {
            hop: HOP,
            detail: "XBL and XSTS user hashes do not match".to_owned(),
        });
    }
    Ok(token)
}

fn classify_xerr(xerr: u64) -> AuthError {
    match xerr {
        2_148_916_233 => AuthError::NotEntitled(NotEntitledReason::NoXboxProfile),
        2_148_916_235 => AuthError::NotEntitled(NotEntitledReason::RegionBarred),
        2_148_916_236..=2_148_916_238 => AuthError::NotEntitled(NotEntitledReason::AgeRestricted),
        other => AuthError::ProviderRejected {
            hop: "xbox_to_xsts",
            status: 401,
            detail: format!("XErr {other}"),
        },
    }
}

/// Hop 5: XSTS token + user hash to the game access token.
pub async fn xsts_to_game(xsts: &Token, hash: &str) -> Result<Token, AuthError> {
    const HOP: &str = "xsts_to_game";
    let body = serde_json::json!({
        "identityToken": format!("XBL3.0 x={hash};{}", xsts.secret()),
    });
    let response = relog_core::CLIENT
        .post(GAME_AUTH_URL)
        .timeout(TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireGameToken = response.json().await.map_err(malformed(HOP))?;
    Ok(Token::new(wire.access_token))
}

/// Hop 6: game access token to the owned profile. A 404 means the
/// account authenticated fine but owns no profile.
pub async fn game_to_profile(access: &Token) -> Result<Profile, AuthError> {
    const HOP: &str = "game_to_profile";
    let response = relog_core::CLIENT
        .get(PROFILE_URL)
        .timeout(TIMEOUT)
        .bearer_auth(access.secret())
        .send()
        .await
        .map_err(net(HOP))?;
    if response.status().as_u16() == 404 {
        return Err(AuthError::NotEntitled(NotEntitledReason::NoGameProfile));
    }
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireProfile = response.json().await.map_err(malformed(HOP))?;
    parse_profile(HOP, wire)
}

/// Resolves a profile from a player name via the public lookup
/// endpoint. Used for display name resolution, no token involved.
pub async fn name_to_profile(name: &str) -> Result<Profile, AuthError> {
    const HOP: &str = "name_to_profile";
    let url = format!("{NAME_LOOKUP_URL}/{}", urlencoding::encode(name));
    let response = relog_core::CLIENT
        .get(url)
        .timeout(TIMEOUT)
        .send()
        .await
        .map_err(net(HOP))?;
    if !response.status().is_success() {
        return Err(rejected(HOP, response).await);
    }
    let wire: WireProfile = response.json().await.map_err(malformed(HOP))?;
    parse_profile(HOP, wire)
}

/// Profile ids come back dashless; `Uuid::try_parse` accepts both the
/// simple and the hyphenated form.
fn parse_profile(hop: &'static str, wire: WireProfile) -> Result<Profile, AuthError> {
    let id = Uuid::try_parse(&wire.id).map_err(|_| AuthError::MalformedResponse {
        hop,
        detail: "profile id is not a UUID".to_owned(),
    })?;
    Ok(Profile {
        id,
        name: wire.name,
    })
}

/// The consent URL for the authorization-code flow served by
/// [`CallbackReceiver`].
#[must_use]
pub fn consent_url(redirect: &str, state: &str) -> String {
    format!(
        "https://login.live.com/oauth20_authorize.srf\
         ?client_id={CLIENT_ID}\
         &response_type=code\
         &scope={}\
         &redirect_uri={}\
         &state={}\
         &prompt=select_account",
        urlencoding::encode(SCOPE),
        urlencoding::encode(redirect),
        urlencoding::encode(state),
    )
}
