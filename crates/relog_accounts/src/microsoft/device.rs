//! Device-code receiver: the browserless alternative to the local
//! callback server. The user types a short code on the provider's
//! verification page while we poll the token endpoint.

use async_trait::async_trait;
use relog_core::{info, pt};
use tokio::time::{sleep, Duration, Instant};

use super::{device_to_tokens, request_device_code, DeviceAuth, DevicePoll, Grant, Token};
use crate::error::AuthError;

const HOP: &str = "polling_receiver";

/// Extra delay added per provider `slow_down` response.
const SLOW_DOWN_STEP: u64 = 5;

/// One poll of the device token endpoint, as a seam. Production uses
/// [`LivePoller`]; tests script the responses to drive the loop
/// without a network.
#[async_trait]
pub trait DevicePoller: Send + Sync {
    async fn poll(&self, device_code: &Token) -> Result<DevicePoll, AuthError>;
}

/// The real [`device_to_tokens`] hop.
pub struct LivePoller;

#[async_trait]
impl DevicePoller for LivePoller {
    async fn poll(&self, device_code: &Token) -> Result<DevicePoll, AuthError> {
        device_to_tokens(device_code).await
    }
}

pub struct PollingReceiver {
    auth: DeviceAuth,
    poller: Box<dyn DevicePoller>,
}

impl PollingReceiver {
    /// Requests a device code pair from the provider.
    pub async fn start() -> Result<Self, AuthError> {
        let auth = request_device_code().await?;
        Ok(Self::with_poller(auth, Box::new(LivePoller)))
    }

    /// A receiver over an already-obtained code pair and a custom
    /// poller.
    #[must_use]
    pub fn with_poller(auth: DeviceAuth, poller: Box<dyn DevicePoller>) -> Self {
        Self { auth, poller }
    }

    /// The code the user must type on the verification page.
    #[must_use]
    pub fn user_code(&self) -> &str {
        &self.auth.user_code
    }

    #[must_use]
    pub fn verification_uri(&self) -> &str {
        &self.auth.verification_uri
    }

    /// Polls until the user approves, declines, the code expires, or
    /// `cancelled` turns true. The interval starts at the provider's
    /// value and only grows (each `slow_down` adds 5 s).
    pub async fn receive(self, cancelled: impl Fn() -> bool) -> Result<Grant, AuthError> {
        let deadline = Instant::now() + Duration::from_secs(self.auth.expires_in);
        let mut interval = self.auth.interval;

        pt!("Polling for device approval every {interval}s");
        loop {
            if cancelled() {
                return Err(AuthError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(expired());
            }

            match self.poller.poll(&self.auth.device_code).await? {
                DevicePoll::Tokens(tokens) => {
                    info!("Device flow approved");
                    return Ok(Grant::Tokens(tokens));
                }
                DevicePoll::Pending => {}
                DevicePoll::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    pt!("Provider asked to slow down, interval now {interval}s");
                }
                DevicePoll::Declined => return Ok(Grant::Declined),
                DevicePoll::Expired => return Err(expired()),
            }

            sleep(Duration::from_secs(interval)).await;
        }
    }
}

fn expired() -> AuthError {
    AuthError::ProviderRejected {
        hop: HOP,
        status: 400,
        detail: "device code expired before approval".to_owned(),
    }
}
