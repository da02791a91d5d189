use thiserror::Error;

use crate::crypt::CryptError;

/// Classified failure of a login attempt.
///
/// Every variant that stems from a pipeline hop carries the hop name so
/// logs can say *where* it failed. Hop names are short identifiers like
/// `"xbox_to_xsts"`; token values never end up in here.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Timeout, DNS failure, connection refused. Retryable by the user,
    /// never retried automatically.
    #[error("network failure during {hop}")]
    Network {
        hop: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The provider refused the request: bad grant, expired code,
    /// revoked consent. Terminal for this attempt.
    #[error("provider rejected {hop} (status {status}): {detail}")]
    ProviderRejected {
        hop: &'static str,
        status: u16,
        detail: String,
    },

    /// The account is valid but lacks the required entitlement.
    /// Distinct from [`AuthError::ProviderRejected`] so callers can show
    /// an actionable message instead of a retry prompt.
    #[error("account not entitled: {0}")]
    NotEntitled(NotEntitledReason),

    #[error("rate limited during {hop}, try again later")]
    RateLimited { hop: &'static str },

    /// The provider answered with something we cannot parse. The detail
    /// describes the shape mismatch, never the payload values.
    #[error("malformed response during {hop}: {detail}")]
    MalformedResponse { hop: &'static str, detail: String },

    /// Wrong password, corrupted blob, or a blob from another machine.
    /// Terminal for this attempt; the stored account entry is untouched.
    #[error("unable to decrypt stored credentials")]
    DecryptionFailed(#[from] CryptError),

    /// The user navigated away. Not surfaced as an error by callers.
    #[error("login cancelled")]
    Cancelled,

    /// Local resource failure (callback listener, clipboard scratch).
    #[error(transparent)]
    Io(#[from] relog_core::IoError),
}

/// Why an account cannot use the service, as reported by the
/// relying-party token hop or the profile hop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum NotEntitledReason {
    #[error("no Xbox profile is linked to this Microsoft account")]
    NoXboxProfile,
    #[error("Xbox Live is not available in this account's region")]
    RegionBarred,
    #[error("this account is a child account and needs family consent")]
    AgeRestricted,
    #[error("this account does not own the game")]
    NoGameProfile,
}

impl AuthError {
    /// Whether a stale stored access token caused this failure, which
    /// makes a single refresh-and-retry appropriate.
    #[must_use]
    pub(crate) fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::ProviderRejected { status: 401, .. })
    }
}
