//! Local HTTP receiver for the authorization-code flow.
//!
//! Binds a loopback-only listener on a fixed port, opens the consent
//! page in the user's browser (and copies the URL to the clipboard as
//! a fallback), then serves exactly one GET request: the provider's
//! redirect carrying `code` and `state`. The listener closes after the
//! first request whether or not it was valid.

use rand::Rng;
use relog_core::{err, info, IntoIoError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use super::Grant;
use crate::error::AuthError;

/// Fixed redirect target, registered with the OAuth client id. Only
/// one login can run at a time; a second bind fails until the first
/// receiver closes.
pub const CALLBACK_ADDR: &str = "127.0.0.1:59125";

const HOP: &str = "callback_receiver";

/// How long the accepted connection may take to deliver its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the request head; the redirect query fits in far
/// less, anything bigger is not the provider.
const MAX_REQUEST_LEN: usize = 8192;

const PAGE_OK: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Login complete</h1>\
    <p>You can close this tab and return to the application.</p></body></html>";
const PAGE_BAD: &str =
    "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Login failed</h1>\
    <p>The request was not valid. Close this tab and try again.</p></body></html>";

pub struct CallbackReceiver {
    listener: TcpListener,
    state: String,
    redirect: String,
}

impl CallbackReceiver {
    /// Binds the loopback listener and generates the per-attempt state.
    pub async fn bind() -> Result<Self, AuthError> {
        let listener = TcpListener::bind(CALLBACK_ADDR).await.path(CALLBACK_ADDR)?;
        Ok(Self {
            listener,
            state: random_state(),
            redirect: format!("http://{CALLBACK_ADDR}/callback"),
        })
    }

    #[must_use]
    pub fn redirect(&self) -> &str {
        &self.redirect
    }

    #[must_use]
    pub fn consent_url(&self) -> String {
        super::consent_url(&self.redirect, &self.state)
    }

    /// Opens the consent page in the browser and copies the URL to the
    /// clipboard. Neither failing is fatal; the caller still shows the
    /// URL through its own stage callback.
    pub fn present(&self) -> ClipboardGuard {
        let url = self.consent_url();
        if let Err(error) = open::that(&url) {
            err!("Could not open browser: {error}");
        }
        ClipboardGuard::copy(&url)
    }

    /// Serves the single callback request and closes the listener.
    ///
    /// A redirect with `error=access_denied` is the user backing out,
    /// reported as [`Grant::Declined`]. A state mismatch or a malformed
    /// request is an error; the listener still closes.
    pub async fn receive(self) -> Result<Grant, AuthError> {
        let (mut stream, _) = self.listener.accept().await.path(CALLBACK_ADDR)?;

        let request = timeout(READ_TIMEOUT, read_request_line(&mut stream))
            .await
            .map_err(|_| AuthError::ProviderRejected {
                hop: HOP,
                status: 408,
                detail: "callback connection timed out".to_owned(),
            })?
            .path(CALLBACK_ADDR)?;

        let outcome = parse_request(&request);
        let page = match &outcome {
            CallbackOutcome::Code { state, .. } if *state == self.state => PAGE_OK,
            CallbackOutcome::Denied => PAGE_OK,
            _ => PAGE_BAD,
        };
        // Best effort; the browser may already have gone away.
        let _ = stream.write_all(page.as_bytes()).await;
        let _ = stream.flush().await;
        drop(stream);
        // `self.listener` drops here, releasing the port.

        match outcome {
            CallbackOutcome::Code { code, state } if state == self.state => {
                info!("Callback received, exchanging code");
                Ok(Grant::Code {
                    code,
                    redirect: self.redirect,
                })
            }
            CallbackOutcome::Code { .. } => Err(AuthError::ProviderRejected {
                hop: HOP,
                status: 400,
                detail: "state mismatch".to_owned(),
            }),
            CallbackOutcome::Denied => Ok(Grant::Declined),
            CallbackOutcome::Invalid(detail) => Err(AuthError::MalformedResponse {
                hop: HOP,
                detail: detail.to_owned(),
            }),
        }
    }
}

/// Reads until the request line is complete. A browser redirect is one
/// packet in practice, but TCP makes no such promise, so keep reading
/// until the first line break, EOF, or the size cap.
async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buffer = [0u8; 1024];
    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        head.extend_from_slice(&buffer[..read]);
        if head.contains(&b'\n') || head.len() >= MAX_REQUEST_LEN {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

enum CallbackOutcome {
    Code { code: String, state: String },
    Denied,
    Invalid(&'static str),
}

/// Picks the callback parameters out of the request line. Only the
/// query string matters; everything else in the request is ignored.
fn parse_request(request: &str) -> CallbackOutcome {
    let Some(first_line) = request.lines().next() else {
        return CallbackOutcome::Invalid("empty request");
    };
    let mut parts = first_line.split_whitespace();
    if parts.next() != Some("GET") {
        return CallbackOutcome::Invalid("not a GET request");
    }
    let Some(path) = parts.next() else {
        return CallbackOutcome::Invalid("no request path");
    };
    let Some((_, query)) = path.split_once('?') else {
        return CallbackOutcome::Invalid("no query string");
    };

    let mut code = None;
    let mut state = None;
    for param in query.split('&') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let Ok(value) = urlencoding::decode(value) else {
            return CallbackOutcome::Invalid("undecodable query parameter");
        };
        match key {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" if value == "access_denied" => return CallbackOutcome::Denied,
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => CallbackOutcome::Code { code, state },
        (Some(_), None) => CallbackOutcome::Invalid("missing state parameter"),
        _ => CallbackOutcome::Invalid("missing code parameter"),
    }
}

/// Random per-attempt state, 96 to 128 URL-safe characters.
fn random_state() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(96..=128);
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Holds the consent URL placed on the clipboard and scrubs it on drop
/// if the clipboard still contains it, so the URL does not outlive the
/// login attempt.
pub struct ClipboardGuard {
    value: Option<String>,
}

impl ClipboardGuard {
    fn copy(value: &str) -> Self {
        match arboard::Clipboard::new().and_then(|mut c| c.set_text(value.to_owned())) {
            Ok(()) => Self {
                value: Some(value.to_owned()),
            },
            Err(error) => {
                err!("Could not copy link to clipboard: {error}");
                Self { value: None }
            }
        }
    }
}

impl Drop for ClipboardGuard {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        if let Ok(mut clipboard) = arboard::Clipboard::new() {
            if clipboard.get_text().is_ok_and(|current| current == value) {
                let _ = clipboard.clear();
            }
        }
    }
}
