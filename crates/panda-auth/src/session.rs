//! Session store.
//!
//! [`SessionStore`] owns the current [`Session`] and drives the sign-in
//! lifecycle against an [`IdentityClient`]. Construct one per process and
//! pass it by reference.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{IdentityClient, LoginCallbacks, LoginRequest};
use crate::completion;
use crate::config::Config;
use crate::identity::Identity;
use crate::provider::{Domain, identity_provider_url};
use crate::store::{Readable, Subscription, Writable};
use crate::window::popup_center;

/// Value published by the session store.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub identity: Identity,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.is_anonymous()
    }
}

/// Parameters for [`SessionStore::sign_in`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SignInParams {
    /// Public provider domain; falls back to the configured default.
    pub domain: Option<Domain>,
}

/// Why an interactive sign-in did not produce an identity.
#[derive(Debug, Error)]
pub enum SignInError {
    #[error("Sign-in cancelled")]
    Cancelled,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Sign-in timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Sign-in flow ended without a result")]
    Abandoned,

    #[error("Invalid identity provider: {0}")]
    InvalidProvider(String),

    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

pub struct SessionStore<C> {
    client: C,
    config: Config,
    session: Writable<Session>,
}

impl<C: IdentityClient> SessionStore<C> {
    /// Creates a store in the anonymous state.
    pub fn new(client: C, config: Config) -> Self {
        Self {
            client,
            config,
            session: Writable::new(Session::anonymous()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Identity currently held by the store.
    pub fn identity(&self) -> Identity {
        self.session.get().identity
    }

    /// Restores a previous session from the client, if there is one.
    ///
    /// Client failures are logged and treated as "no session".
    pub async fn sync(&self) {
        match self.client.is_authenticated().await {
            Ok(true) => match self.client.identity().await {
                Ok(identity) => {
                    info!(principal = %identity.principal(), "restored session");
                    self.session.set(Session { identity });
                }
                Err(err) => warn!("Failed to load restored identity: {err:#}"),
            },
            Ok(false) => debug!("no session to restore"),
            Err(err) => warn!("Failed to check for an existing session: {err:#}"),
        }
    }

    /// Returns the client's current identity, bypassing the cached value.
    ///
    /// Falls back to the anonymous identity if the client fails.
    pub async fn get_identity(&self) -> Identity {
        match self.client.identity().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Failed to read identity from client: {err:#}");
                Identity::anonymous()
            }
        }
    }

    /// Runs the interactive login. On success the store holds the new
    /// identity; on failure the store is left unchanged.
    ///
    /// # Errors
    /// Returns the reason the provider flow failed.
    pub async fn sign_in(&self, params: SignInParams) -> Result<(), SignInError> {
        let request = self.login_request(params.domain)?;
        info!(provider = %request.identity_provider, "starting sign-in");

        let (completion, pending) = completion::channel();
        self.client
            .login(request, LoginCallbacks::new(completion))
            .await;

        match pending.settled().await {
            Some(Ok(identity)) => {
                info!(principal = %identity.principal(), "signed in");
                self.session.set(Session { identity });
                Ok(())
            }
            Some(Err(err)) => {
                warn!("Sign-in failed: {err}");
                Err(err)
            }
            None => Err(SignInError::Abandoned),
        }
    }

    /// Ends the session and resets the store to anonymous.
    ///
    /// The local reset happens even if the client fails to log out.
    pub async fn sign_out(&self) {
        if let Err(err) = self.client.logout().await {
            warn!("Client logout failed, resetting local session anyway: {err:#}");
        }
        info!("signed out");
        self.session.set(Session::anonymous());
    }

    /// Builds the login request for `domain` from configuration.
    ///
    /// # Errors
    /// Returns [`SignInError::InvalidProvider`] if the provider URL is malformed.
    pub fn login_request(&self, domain: Option<Domain>) -> Result<LoginRequest, SignInError> {
        let identity_provider = identity_provider_url(&self.config.identity, domain)
            .map_err(|err| SignInError::InvalidProvider(format!("{err:#}")))?;
        let popup = &self.config.popup;
        let window = popup.geometry();

        Ok(LoginRequest {
            identity_provider,
            max_time_to_live_nanos: self.config.identity.max_time_to_live_nanos(),
            window,
            window_features: popup_center(window, popup.screen_width, popup.screen_height),
        })
    }
}

impl<C: IdentityClient> Readable<Session> for SessionStore<C> {
    fn get(&self) -> Session {
        self.session.get()
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.session.subscribe(listener)
    }
}
