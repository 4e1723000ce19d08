//! Loopback HTTP callback for the browser sign-in.
//!
//! The identity provider relay redirects the browser to
//! `http://127.0.0.1:<port>/callback?state=..` with either the delegation
//! (`principal`, `delegation`, `expiration`) or an `error`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::identity::Principal;

/// Local OAuth-style callback path.
pub const CALLBACK_PATH: &str = "/callback";

/// Error code the provider uses when the user closes or aborts the flow.
const USER_INTERRUPT: &str = "UserInterrupt";

const MAX_REQUEST_BYTES: usize = 8192;

/// How long one connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Result delivered to the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Delegated {
        principal: Principal,
        delegation: String,
        expiration: u64,
    },
    /// The user aborted the flow.
    Denied,
    /// The provider reported an error, or answered with an unusable payload.
    Failed(String),
}

/// Parses a raw HTTP request into a callback outcome.
///
/// Returns `None` for requests that are not our callback (other paths,
/// missing or mismatched state); those are answered and ignored.
pub fn parse_callback_request(request: &str, expected_state: &str) -> Option<CallbackOutcome> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let path = parts.next()?;

    let url = url::Url::parse(&format!("http://localhost{path}")).ok()?;
    if url.path() != CALLBACK_PATH {
        return None;
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
    };

    if param("state")? != expected_state {
        return None;
    }

    if let Some(error) = param("error") {
        if error == USER_INTERRUPT {
            return Some(CallbackOutcome::Denied);
        }
        return Some(CallbackOutcome::Failed(error));
    }

    let outcome = (|| {
        let principal = param("principal").context("missing principal")?;
        let principal: Principal = principal.parse()?;
        let delegation = param("delegation")
            .filter(|d| !d.is_empty())
            .context("missing delegation")?;
        let expiration = param("expiration")
            .context("missing expiration")?
            .parse::<u64>()
            .context("invalid expiration")?;
        anyhow::Ok(CallbackOutcome::Delegated {
            principal,
            delegation,
            expiration,
        })
    })();

    Some(outcome.unwrap_or_else(|err| CallbackOutcome::Failed(format!("{err:#}"))))
}

/// Bound loopback listener waiting for one callback.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Binds `127.0.0.1:<port>`; port 0 lets the OS pick a free port.
    ///
    /// # Errors
    /// Returns an error if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Failed to bind login callback on 127.0.0.1:{port}"))?;
        let port = listener
            .local_addr()
            .context("Failed to read callback address")?
            .port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.port)
    }

    /// Accepts connections until one carries our callback.
    ///
    /// Each connection is served on its own task, so an idle or slow
    /// connection does not hold up the others.
    ///
    /// # Errors
    /// Returns an error if accepting connections fails.
    pub async fn wait(&self, expected_state: &str) -> Result<CallbackOutcome> {
        let (tx, mut rx) = mpsc::channel(1);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Failed to accept login callback")?;
                    let tx = tx.clone();
                    let expected_state = expected_state.to_string();
                    tokio::spawn(async move {
                        if let Some(outcome) = serve_connection(stream, peer, &expected_state).await {
                            let _ = tx.send(outcome).await;
                        }
                    });
                }
                Some(outcome) = rx.recv() => return Ok(outcome),
            }
        }
    }
}

/// Answers one connection; returns the outcome if it was our callback.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    expected_state: &str,
) -> Option<CallbackOutcome> {
    let request = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut stream)).await
    {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            debug!(%peer, "unreadable callback request: {err:#}");
            return None;
        }
        Err(_) => {
            debug!(%peer, "dropping idle connection on callback port");
            return None;
        }
    };

    let outcome = parse_callback_request(&request, expected_state);
    let response = match &outcome {
        Some(CallbackOutcome::Delegated { .. }) => success_response(),
        Some(CallbackOutcome::Denied | CallbackOutcome::Failed(_)) => failure_response(),
        None => invalid_response(),
    };
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    if outcome.is_none() {
        debug!(%peer, "ignoring unrelated request on callback port");
    }
    outcome
}

async fn read_request(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let mut len = 0;
    loop {
        let n = stream
            .read(&mut buffer[len..])
            .await
            .context("Failed to read callback request")?;
        len += n;
        let head = &buffer[..len];
        if n == 0 || len == buffer.len() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer[..len]).into_owned())
}

fn html_response(status: &str, title: &str, message: &str) -> String {
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\" /><title>{title}</title></head><body><p>{message}</p></body></html>"
    );
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn success_response() -> String {
    html_response(
        "200 OK",
        "Signed in",
        "Signed in. Return to your terminal to continue.",
    )
}

fn failure_response() -> String {
    html_response(
        "200 OK",
        "Sign-in failed",
        "Sign-in did not complete. Return to your terminal for details.",
    )
}

fn invalid_response() -> String {
    let body = "Invalid login callback";
    format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}
