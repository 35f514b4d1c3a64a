//! Session validation: exchanges a stored token for a verified identity
//!
//! Every call to [`SessionValidator::activate`] starts a fresh attempt on
//! its own task with its own cancellation token. Starting a new attempt or
//! deactivating cancels the previous one, and results are only applied
//! while their attempt is still the live one, so a stale response can never
//! overwrite newer state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::io::HttpClient;
use crate::model::{Credential, Identity};
use crate::store::CredentialStore;

/// Tri-state session projection.
///
/// While `loading` is true the other two fields are indeterminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub loading: bool,
    pub authenticated: bool,
    pub user: Option<Identity>,
}

impl SessionState {
    pub fn pending() -> Self {
        Self {
            loading: true,
            authenticated: false,
            user: None,
        }
    }

    pub fn logged_out() -> Self {
        Self {
            loading: false,
            authenticated: false,
            user: None,
        }
    }

    pub fn authenticated(user: Identity) -> Self {
        Self {
            loading: false,
            authenticated: true,
            user: Some(user),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.loading
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::pending()
    }
}

/// Where a consumer should send the user for a given session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Loading,
    Login,
    Dashboard,
}

impl Landing {
    pub fn for_session(state: &SessionState) -> Self {
        if state.loading {
            Landing::Loading
        } else if state.authenticated && state.user.is_some() {
            Landing::Dashboard
        } else {
            Landing::Login
        }
    }
}

/// `GET /me` response body
#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    data: Option<MeData>,
}

#[derive(Debug, Deserialize)]
struct MeData {
    #[serde(default)]
    authenticated: Option<bool>,
    #[serde(default)]
    user: Option<Identity>,
}

/// Ask the backend who a token belongs to.
///
/// A 2xx status alone is not enough: the body must carry both a true
/// `authenticated` flag and a user object.
pub async fn verify_token(
    http: &dyn HttpClient,
    me_url: &str,
    credential: &Credential,
) -> Result<Identity, SessionError> {
    let response = http
        .get(me_url, Some(&credential.token))
        .await
        .map_err(|e| SessionError::Network(e.to_string()))?;

    if !response.is_success() {
        return Err(SessionError::Rejected(format!(
            "status {}",
            response.status
        )));
    }

    let parsed: MeResponse = serde_json::from_str(&response.body)
        .map_err(|e| SessionError::Rejected(format!("malformed payload: {}", e)))?;

    match parsed.data {
        Some(MeData {
            authenticated: Some(true),
            user: Some(user),
        }) => Ok(user),
        _ => Err(SessionError::Rejected(
            "payload is not an authenticated session".to_string(),
        )),
    }
}

/// Bookkeeping for the attempt allowed to publish results
#[derive(Debug, Default)]
struct LiveAttempt {
    generation: u64,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl LiveAttempt {
    /// Cancel whatever is in flight and retire its generation
    fn retire(&mut self) {
        self.generation += 1;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct Shared {
    store: Arc<dyn CredentialStore>,
    state: watch::Sender<SessionState>,
    live: Mutex<LiveAttempt>,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, LiveAttempt> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail_closed(&self, reason: &SessionError) {
        if reason.clears_credentials() {
            if let Err(e) = self.store.clear() {
                tracing::warn!("Failed to clear credential store: {}", e);
            }
        }
        self.state.send_replace(SessionState::logged_out());
    }

    /// Publish the outcome of attempt `generation`, unless it was superseded.
    ///
    /// Blocks on the store, so async callers run it on the blocking pool.
    fn resolve(
        &self,
        generation: u64,
        credential: &Credential,
        outcome: Result<Identity, SessionError>,
    ) {
        // Held across the write so retire() cannot interleave
        let mut live = self.live();
        if live.generation != generation {
            tracing::debug!("Discarding result of superseded validation #{}", generation);
            return;
        }

        match outcome {
            Ok(user) if self.store.get().as_ref() != Some(credential) => {
                tracing::info!(
                    "Token for '{}' left the store during validation, staying logged out",
                    user.username
                );
                self.state.send_replace(SessionState::logged_out());
            }
            Ok(user) => {
                tracing::info!("Session validated for '{}'", user.username);
                if let Err(e) = self.store.set_identity(&user) {
                    tracing::warn!("Failed to persist identity mirror: {}", e);
                }
                self.state.send_replace(SessionState::authenticated(user));
            }
            Err(SessionError::Cancelled) => {
                tracing::debug!("Validation #{} cancelled", generation);
                return;
            }
            Err(reason) => {
                tracing::warn!("Session validation failed: {}", reason);
                self.fail_closed(&reason);
            }
        }

        live.cancel = None;
        live.handle = None;
    }
}

/// Owns the session state for one consumer and validates it on activation
pub struct SessionValidator {
    shared: Arc<Shared>,
    http: Arc<dyn HttpClient>,
    me_url: String,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for SessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionValidator")
            .field("me_url", &self.me_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SessionValidator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn CredentialStore>,
        me_url: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::pending());
        Self {
            shared: Arc::new(Shared {
                store,
                state,
                live: Mutex::new(LiveAttempt::default()),
            }),
            http,
            me_url: me_url.into(),
            timeout: None,
        }
    }

    /// Give up on a validation request after `timeout`, failing closed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Whether a validation request is currently in flight
    pub fn is_validating(&self) -> bool {
        self.shared.live().handle.is_some()
    }

    /// Start a validation attempt, cancelling any previous one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self) {
        let mut live = self.shared.live();
        live.retire();
        let generation = live.generation;
        self.shared.state.send_replace(SessionState::pending());

        let Some(credential) = self.shared.store.get() else {
            tracing::debug!("No stored credential, session is logged out");
            self.shared.fail_closed(&SessionError::NoCredential);
            return;
        };

        tracing::debug!("Starting validation #{} against {}", generation, self.me_url);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let http = Arc::clone(&self.http);
        let me_url = self.me_url.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let verify = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(
                        limit,
                        verify_token(http.as_ref(), &me_url, &credential),
                    )
                    .await
                    .unwrap_or_else(|_| {
                        Err(SessionError::Network(format!(
                            "no response within {:?}",
                            limit
                        )))
                    }),
                    None => verify_token(http.as_ref(), &me_url, &credential).await,
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = task_cancel.cancelled() => Err(SessionError::Cancelled),
                outcome = verify => outcome,
            };
            if matches!(outcome, Err(SessionError::Cancelled)) {
                tracing::debug!("Validation #{} cancelled", generation);
                return;
            }

            let applied = tokio::task::spawn_blocking(move || {
                shared.resolve(generation, &credential, outcome);
            })
            .await;
            if let Err(e) = applied {
                tracing::warn!("Applying validation #{} failed: {}", generation, e);
            }
        });

        live.cancel = Some(cancel);
        live.handle = Some(handle);
    }

    /// Cancel the in-flight attempt. State stays as it was.
    pub fn deactivate(&self) {
        let mut live = self.shared.live();
        if live.handle.is_some() {
            tracing::debug!("Deactivating validation #{}", live.generation);
        }
        live.retire();
    }

    /// Wait until the current attempt has resolved.
    ///
    /// Never returns if the attempt is cancelled while pending.
    pub async fn resolved(&self) -> SessionState {
        let mut receiver = self.subscribe();
        let state = match receiver.wait_for(SessionState::is_resolved).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }
}

impl Drop for SessionValidator {
    fn drop(&mut self) {
        self.shared.live().retire();
    }
}
