//! Identity client seam.
//!
//! [`IdentityClient`] is the boundary to the identity provider SDK: the
//! session store never talks to a provider directly. [`BrowserAuthClient`]
//! is the implementation used by the CLI.

use std::future::Future;

use anyhow::Result;
use url::Url;

use crate::completion::Completion;
use crate::identity::Identity;
use crate::session::SignInError;
use crate::window::PopupGeometry;

pub mod browser;
pub mod callback;
pub mod storage;

pub use browser::BrowserAuthClient;

/// Parameters for one interactive login.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub identity_provider: Url,
    /// Requested delegation lifetime in nanoseconds.
    pub max_time_to_live_nanos: u64,
    pub window: PopupGeometry,
    /// `window.open` features for hosts that render the provider in a popup.
    pub window_features: String,
}

/// Callbacks handed to [`IdentityClient::login`].
///
/// Settles at most once: after the first `success` or `error`, further calls
/// are ignored (and logged).
#[derive(Clone)]
pub struct LoginCallbacks {
    completion: Completion<Identity, SignInError>,
}

impl LoginCallbacks {
    pub(crate) fn new(completion: Completion<Identity, SignInError>) -> Self {
        Self { completion }
    }

    pub fn success(&self, identity: Identity) {
        if !self.completion.resolve(identity) {
            tracing::debug!("login success reported after the flow already settled");
        }
    }

    pub fn error(&self, error: SignInError) {
        if !self.completion.reject(error) {
            tracing::debug!("login error reported after the flow already settled");
        }
    }
}

/// External identity provider client.
pub trait IdentityClient: Send + Sync + 'static {
    /// Whether a (non-expired) session is available, e.g. restored from disk.
    fn is_authenticated(&self) -> impl Future<Output = Result<bool>> + Send;

    /// The client's current identity, anonymous when signed out.
    ///
    /// Implementations return the same handle until the next login or
    /// logout so callers can detect changes with [`Identity::ptr_eq`].
    fn identity(&self) -> impl Future<Output = Result<Identity>> + Send;

    /// Starts an interactive login and reports the outcome through
    /// `callbacks`. The returned future may complete before the callbacks
    /// fire.
    fn login(
        &self,
        request: LoginRequest,
        callbacks: LoginCallbacks,
    ) -> impl Future<Output = ()> + Send;

    /// Ends the session. A no-op when already signed out.
    fn logout(&self) -> impl Future<Output = Result<()>> + Send;
}
