//! Browser-based identity client.
//!
//! Opens the identity provider in the system browser, waits for the result on
//! a loopback callback and keeps the delegated session in a [`SessionStorage`]
//! file so the next process can restore it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use url::Url;

use super::callback::{CallbackListener, CallbackOutcome};
use super::storage::{SessionStorage, StoredSession};
use super::{IdentityClient, LoginCallbacks, LoginRequest};
use crate::config::{Config, IdentityConfig, paths};
use crate::identity::{DelegatedIdentity, Identity, mask_delegation, now_nanos};
use crate::interrupt;
use crate::session::SignInError;

/// Set to skip launching a browser (the URL is still handed to the opener).
pub const NO_BROWSER_ENV: &str = "PANDA_NO_BROWSER";

type Opener = Arc<dyn Fn(&Url) -> Result<()> + Send + Sync>;

/// Opens `url` in the system browser unless `PANDA_NO_BROWSER` is set.
///
/// # Errors
/// Returns an error if the platform opener fails.
pub fn open_in_browser(url: &Url) -> Result<()> {
    if std::env::var_os(NO_BROWSER_ENV).is_some() {
        debug!("browser launch disabled by {NO_BROWSER_ENV}");
        return Ok(());
    }
    open::that(url.as_str()).with_context(|| format!("Failed to open browser for {url}"))
}

/// Builds the provider URL the browser is sent to.
///
/// # Errors
/// Returns an error if the redirect URI is not a valid URL.
pub fn authorize_url(request: &LoginRequest, redirect_uri: &str, state: &str) -> Result<Url> {
    Url::parse(redirect_uri).with_context(|| format!("Invalid redirect URI '{redirect_uri}'"))?;

    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair(
            "max_time_to_live",
            &request.max_time_to_live_nanos.to_string(),
        )
        .finish();

    let mut url = request.identity_provider.clone();
    url.set_fragment(Some(&format!("authorize?{query}")));
    Ok(url)
}

pub struct BrowserAuthClient {
    storage: SessionStorage,
    config: IdentityConfig,
    /// `None` until the storage has been read once.
    cached: Mutex<Option<Identity>>,
    opener: Opener,
}

impl BrowserAuthClient {
    pub fn new(storage: SessionStorage, config: IdentityConfig) -> Self {
        Self {
            storage,
            config,
            cached: Mutex::new(None),
            opener: Arc::new(open_in_browser),
        }
    }

    /// Client backed by `<PANDA_HOME>/session.json`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SessionStorage::new(paths::session_path()),
            config.identity.clone(),
        )
    }

    /// Replaces how the authorize URL is opened.
    #[must_use]
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Url) -> Result<()> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    fn cache(&self) -> MutexGuard<'_, Option<Identity>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current identity, reading the session file on first use.
    ///
    /// An expired session is removed and reported as anonymous.
    fn current(&self) -> Result<Identity> {
        let mut cache = self.cache();

        if let Some(identity) = cache.as_ref() {
            let expired = identity.delegation().is_some_and(DelegatedIdentity::is_expired);
            if !expired {
                return Ok(identity.clone());
            }
            info!(principal = %identity.principal(), "session expired");
            self.storage.clear()?;
            *cache = Some(Identity::anonymous());
            return Ok(Identity::anonymous());
        }

        let identity = match self.storage.load()? {
            Some(stored) if stored.identity.is_expired() => {
                info!(principal = %stored.identity.principal, "discarding expired session");
                self.storage.clear()?;
                Identity::anonymous()
            }
            Some(stored) => {
                debug!(principal = %stored.identity.principal, "loaded stored session");
                Identity::delegated(stored.identity)
            }
            None => Identity::anonymous(),
        };
        *cache = Some(identity.clone());
        Ok(identity)
    }

    async fn run_login(&self, request: &LoginRequest) -> Result<Identity, SignInError> {
        let listener = CallbackListener::bind(self.config.callback_port).await?;
        let state = uuid::Uuid::new_v4().to_string();
        let url = authorize_url(request, &listener.redirect_uri(), &state)?;

        debug!(port = listener.port(), "waiting for login callback");
        if let Err(err) = (self.opener)(&url) {
            warn!("Could not open the identity provider: {err:#}");
        }

        interrupt::reset();
        let waited = async {
            tokio::select! {
                outcome = listener.wait(&state) => outcome.map_err(SignInError::from),
                () = interrupt::wait_for_interrupt() => Err(SignInError::Cancelled),
            }
        };
        let outcome = match self.config.login_timeout() {
            Some(limit) => tokio::time::timeout(limit, waited)
                .await
                .unwrap_or(Err(SignInError::TimedOut(limit)))?,
            None => waited.await?,
        };

        match outcome {
            CallbackOutcome::Delegated {
                principal,
                delegation,
                expiration,
            } => {
                if expiration <= now_nanos() {
                    return Err(SignInError::Provider(
                        "delegation is already expired".to_string(),
                    ));
                }
                let delegated = DelegatedIdentity {
                    principal,
                    delegation,
                    expiration,
                    provider: request.identity_provider.to_string(),
                };
                debug!(
                    delegation = %mask_delegation(&delegated.delegation),
                    "received delegation"
                );
                self.storage
                    .save(&StoredSession::new(delegated.clone()))
                    .context("Failed to persist session")?;

                let identity = Identity::delegated(delegated);
                *self.cache() = Some(identity.clone());
                Ok(identity)
            }
            CallbackOutcome::Denied => Err(SignInError::Cancelled),
            CallbackOutcome::Failed(reason) => Err(SignInError::Provider(reason)),
        }
    }
}

impl IdentityClient for BrowserAuthClient {
    async fn is_authenticated(&self) -> Result<bool> {
        Ok(!self.current()?.is_anonymous())
    }

    async fn identity(&self) -> Result<Identity> {
        self.current()
    }

    async fn login(&self, request: LoginRequest, callbacks: LoginCallbacks) {
        match self.run_login(&request).await {
            Ok(identity) => callbacks.success(identity),
            Err(err) => callbacks.error(err),
        }
    }

    async fn logout(&self) -> Result<()> {
        *self.cache() = Some(Identity::anonymous());
        if self.storage.clear()? {
            info!(path = %self.storage.path().display(), "removed stored session");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::{TempDir, tempdir};
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::{SessionStore, SignInParams};
    use crate::store::Readable;

    const PRINCIPAL: &str = "rdmx6-jaaaa-aaaaa-aaadq-cai";

    fn storage(dir: &TempDir) -> SessionStorage {
        SessionStorage::new(dir.path().join("session.json"))
    }

    fn fragment_params(url: &Url) -> HashMap<String, String> {
        let fragment = url.fragment().unwrap();
        let query = fragment.strip_prefix("authorize?").unwrap();
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    /// Client whose opener forwards the authorize URL to the returned channel.
    fn capturing_client(dir: &TempDir) -> (BrowserAuthClient, mpsc::UnboundedReceiver<Url>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = BrowserAuthClient::new(storage(dir), IdentityConfig::default()).with_opener(
            move |url| {
                let _ = tx.send(url.clone());
                Ok(())
            },
        );
        (client, rx)
    }

    /// Plays the provider relay: answers the first authorize URL with `extra`.
    fn respond_with(mut rx: mpsc::UnboundedReceiver<Url>, extra: Vec<(&'static str, String)>) {
        tokio::spawn(async move {
            let url = rx.recv().await.unwrap();
            let params = fragment_params(&url);
            let mut callback = Url::parse(&params["redirect_uri"]).unwrap();
            callback
                .query_pairs_mut()
                .append_pair("state", &params["state"])
                .extend_pairs(extra);
            reqwest::get(callback).await.unwrap();
        });
    }

    fn far_future() -> String {
        (now_nanos() + 3_600_000_000_000).to_string()
    }

    #[test]
    fn test_authorize_url() {
        let request = LoginRequest {
            identity_provider: Url::parse("https://identity.ic0.app").unwrap(),
            max_time_to_live_nanos: 604_800_000_000_000,
            window: crate::window::PopupGeometry::default(),
            window_features: String::new(),
        };
        let url = authorize_url(&request, "http://127.0.0.1:5000/callback", "st").unwrap();

        assert_eq!(url.host_str(), Some("identity.ic0.app"));
        let params = fragment_params(&url);
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:5000/callback");
        assert_eq!(params["state"], "st");
        assert_eq!(params["max_time_to_live"], "604800000000000");
    }

    #[tokio::test]
    async fn test_login_round_trip_persists_and_restores() {
        let dir = tempdir().unwrap();
        let (client, rx) = capturing_client(&dir);
        let store = SessionStore::new(client, Config::default());

        respond_with(
            rx,
            vec![
                ("principal", PRINCIPAL.to_string()),
                ("delegation", "opaque-delegation-chain".to_string()),
                ("expiration", far_future()),
            ],
        );
        store.sign_in(SignInParams::default()).await.unwrap();

        let identity = store.identity();
        assert_eq!(identity.principal().as_str(), PRINCIPAL);
        assert_eq!(
            identity.delegation().unwrap().provider,
            "https://identity.ic0.app/"
        );
        assert!(Identity::ptr_eq(&store.get_identity().await, &identity));
        assert!(storage(&dir).load().unwrap().is_some());

        // A fresh process restores the session from disk.
        let restored = SessionStore::new(
            BrowserAuthClient::new(storage(&dir), IdentityConfig::default()),
            Config::default(),
        );
        restored.sync().await;
        assert_eq!(restored.get().identity.principal().as_str(), PRINCIPAL);
    }

    #[tokio::test]
    async fn test_user_interrupt_is_cancelled() {
        let dir = tempdir().unwrap();
        let (client, rx) = capturing_client(&dir);
        let store = SessionStore::new(client, Config::default());

        respond_with(rx, vec![("error", "UserInterrupt".to_string())]);
        let err = store.sign_in(SignInParams::default()).await.unwrap_err();

        assert!(matches!(err, SignInError::Cancelled));
        assert!(store.identity().is_anonymous());
        assert!(storage(&dir).load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_delegation_is_rejected() {
        let dir = tempdir().unwrap();
        let (client, rx) = capturing_client(&dir);
        let store = SessionStore::new(client, Config::default());

        respond_with(
            rx,
            vec![
                ("principal", PRINCIPAL.to_string()),
                ("delegation", "opaque-delegation-chain".to_string()),
                ("expiration", "1".to_string()),
            ],
        );
        let err = store.sign_in(SignInParams::default()).await.unwrap_err();

        assert!(matches!(err, SignInError::Provider(_)));
        assert!(storage(&dir).load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_times_out() {
        let dir = tempdir().unwrap();
        let config = IdentityConfig {
            login_timeout_secs: 5,
            ..Default::default()
        };
        let client = BrowserAuthClient::new(storage(&dir), config).with_opener(|_| Ok(()));
        let store = SessionStore::new(client, Config::default());

        let err = store.sign_in(SignInParams::default()).await.unwrap_err();

        assert!(matches!(err, SignInError::TimedOut(d) if d.as_secs() == 5));
    }

    #[tokio::test]
    async fn test_expired_stored_session_is_discarded() {
        let dir = tempdir().unwrap();
        storage(&dir)
            .save(&StoredSession::new(DelegatedIdentity {
                principal: PRINCIPAL.parse().unwrap(),
                delegation: "opaque-delegation-chain".to_string(),
                expiration: 1,
                provider: "https://identity.ic0.app/".to_string(),
            }))
            .unwrap();
        let client = BrowserAuthClient::new(storage(&dir), IdentityConfig::default());

        assert!(!client.is_authenticated().await.unwrap());
        assert!(storage(&dir).load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_handle_is_stable() {
        let dir = tempdir().unwrap();
        storage(&dir)
            .save(&StoredSession::new(DelegatedIdentity {
                principal: PRINCIPAL.parse().unwrap(),
                delegation: "opaque-delegation-chain".to_string(),
                expiration: u64::MAX,
                provider: "https://identity.ic0.app/".to_string(),
            }))
            .unwrap();
        let client = BrowserAuthClient::new(storage(&dir), IdentityConfig::default());

        let a = client.identity().await.unwrap();
        let b = client.identity().await.unwrap();
        assert!(Identity::ptr_eq(&a, &b));
        assert!(!a.is_anonymous());
    }

    #[tokio::test]
    async fn test_logout_clears_storage_and_is_idempotent() {
        let dir = tempdir().unwrap();
        storage(&dir)
            .save(&StoredSession::new(DelegatedIdentity {
                principal: PRINCIPAL.parse().unwrap(),
                delegation: "opaque-delegation-chain".to_string(),
                expiration: u64::MAX,
                provider: "https://identity.ic0.app/".to_string(),
            }))
            .unwrap();
        let client = BrowserAuthClient::new(storage(&dir), IdentityConfig::default());
        assert!(client.is_authenticated().await.unwrap());

        client.logout().await.unwrap();
        client.logout().await.unwrap();

        assert!(!client.is_authenticated().await.unwrap());
        assert!(storage(&dir).load().unwrap().is_none());
    }
}
